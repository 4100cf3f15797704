// kernel-agent/src/lib.rs
// Kernel write probe loader and ring buffer event source

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};

#[cfg(target_os = "linux")]
use tracing::{error, warn};
#[cfg(target_os = "linux")]
use libbpf_rs::{Link, Object, ObjectBuilder, RingBufferBuilder};

#[macro_use]
pub mod error;
pub mod events;
pub mod safe_parser;
pub mod simulation;
pub mod source;

pub use error::*;
pub use events::*;
pub use safe_parser::{decode_record, trim_comm};
pub use source::{event_channel, EventSource, RecordSender, RingBufferSource, SourceCloser};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EbpfConfig {
    pub object_path: String,
    pub program_name: String,
    pub tracepoint_category: String,
    pub tracepoint_name: String,
    pub ring_buffer_map: String,
    pub channel_capacity: usize,
    pub poll_timeout_ms: u64,
    /// Must match SAMPLE_LEN of the compiled kernel program
    pub sample_len: usize,
}

impl Default for EbpfConfig {
    fn default() -> Self {
        Self {
            object_path: "kernel-agent/bpf/write_monitor.bpf.o".to_string(),
            program_name: "trace_write".to_string(),
            tracepoint_category: "syscalls".to_string(),
            tracepoint_name: "sys_enter_write".to_string(),
            ring_buffer_map: "events".to_string(),
            channel_capacity: 1024,
            poll_timeout_ms: 100,
            sample_len: DEFAULT_SAMPLE_LEN,
        }
    }
}

impl EbpfConfig {
    pub fn layout(&self) -> Result<RecordLayout> {
        RecordLayout::new(self.sample_len)
    }

    pub fn validate(&self) -> Result<()> {
        self.layout()?;
        if self.channel_capacity == 0 {
            return Err(shield_error!(config, "ebpf.channel_capacity", "must be greater than 0"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(shield_error!(config, "ebpf.poll_timeout_ms", "must be greater than 0"));
        }
        Ok(())
    }
}

enum Worker {
    Thread(std::thread::JoinHandle<()>),
    Task(tokio::task::JoinHandle<()>),
}

/// Owns the producer feeding a [`RingBufferSource`].
///
/// Dropping the handle without calling [`SourceHandle::shutdown`] leaves the
/// producer running until it notices the consumer is gone.
pub struct SourceHandle {
    closer: SourceCloser,
    worker: Worker,
}

impl SourceHandle {
    pub(crate) fn from_thread(closer: SourceCloser, thread: std::thread::JoinHandle<()>) -> Self {
        Self {
            closer,
            worker: Worker::Thread(thread),
        }
    }

    pub(crate) fn from_task(closer: SourceCloser, task: tokio::task::JoinHandle<()>) -> Self {
        Self {
            closer,
            worker: Worker::Task(task),
        }
    }

    pub fn closer(&self) -> SourceCloser {
        self.closer.clone()
    }

    /// Close the source and wait for the producer to release its resources
    pub async fn shutdown(self) {
        self.closer.close();
        match self.worker {
            Worker::Thread(thread) => {
                if tokio::task::spawn_blocking(move || thread.join()).await.is_err() {
                    debug!("Ring buffer thread join was interrupted");
                }
            }
            Worker::Task(task) => {
                let _ = task.await;
            }
        }
        info!("🛑 Event producer stopped");
    }
}

pub struct EbpfLoader {
    config: EbpfConfig,
}

impl EbpfLoader {
    pub fn with_config(config: EbpfConfig) -> Self {
        Self { config }
    }

    /// Load and attach the write probe, then start forwarding ring buffer
    /// records. Every error returned here is fatal.
    #[instrument(skip(self), fields(object = %self.config.object_path))]
    pub async fn initialize(self) -> Result<(RingBufferSource, SourceHandle)> {
        info!("🔧 Initializing eBPF write probe...");
        self.config.validate()?;

        self.start_probe().await
    }

    #[cfg(not(target_os = "linux"))]
    async fn start_probe(self) -> Result<(RingBufferSource, SourceHandle)> {
        Err(ShieldError::EbpfLoad(
            "kernel write probe requires Linux".to_string(),
        ))
    }

    #[cfg(target_os = "linux")]
    async fn start_probe(self) -> Result<(RingBufferSource, SourceHandle)> {
        if !nix::unistd::Uid::effective().is_root() {
            return Err(shield_error!(
                permission,
                "load eBPF programs",
                "root privileges required"
            ));
        }

        let (sender, source, closer) = event_channel(self.config.channel_capacity);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let config = self.config;

        let thread = std::thread::Builder::new()
            .name("ringbuf-poll".to_string())
            .spawn(move || Self::ring_buffer_processor(config, sender, ready_tx))
            .map_err(|e| ShieldError::Io {
                operation: "spawn ring buffer thread".to_string(),
                source: e,
            })?;

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("✅ eBPF write probe attached, consuming ring buffer");
                Ok((source, SourceHandle::from_thread(closer, thread)))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(ShieldError::EbpfLoad(
                    "ring buffer thread exited during startup".to_string(),
                ))
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn raise_memlock_limit() -> Result<()> {
        use nix::sys::resource::{setrlimit, Resource, RLIM_INFINITY};

        setrlimit(Resource::RLIMIT_MEMLOCK, RLIM_INFINITY, RLIM_INFINITY).map_err(|e| {
            shield_error!(permission, "raise RLIMIT_MEMLOCK", e)
        })
    }

    #[cfg(target_os = "linux")]
    fn attach_probe(config: &EbpfConfig) -> Result<(Object, Link)> {
        if let Err(e) = Self::raise_memlock_limit() {
            // Kernels >= 5.11 account BPF memory through cgroups instead
            warn!("{}", e);
        }

        let mut object = ObjectBuilder::default()
            .open_file(&config.object_path)
            .map_err(|e| ShieldError::EbpfLoad(format!("cannot open {}: {}", config.object_path, e)))?
            .load()
            .map_err(|e| ShieldError::EbpfLoad(format!("cannot load {}: {}", config.object_path, e)))?;

        let program = object
            .prog_mut(&config.program_name)
            .ok_or_else(|| shield_error!(ebpf, format!("program {} not found", config.program_name), "attach"))?;

        let link = program
            .attach_tracepoint(&config.tracepoint_category, &config.tracepoint_name)
            .map_err(|e| {
                shield_error!(
                    ebpf,
                    e,
                    format!("tracepoint {}/{}", config.tracepoint_category, config.tracepoint_name)
                )
            })?;

        Ok((object, link))
    }

    /// Runs on a dedicated thread: libbpf handles never leave it.
    #[cfg(target_os = "linux")]
    fn ring_buffer_processor(
        config: EbpfConfig,
        sender: RecordSender,
        ready: tokio::sync::oneshot::Sender<Result<()>>,
    ) {
        let (object, _link) = match Self::attach_probe(&config) {
            Ok(attached) => attached,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        let Some(rb_map) = object.map(&config.ring_buffer_map) else {
            let _ = ready.send(Err(shield_error!(
                ebpf,
                format!("map {} not found", config.ring_buffer_map),
                "ring buffer"
            )));
            return;
        };

        let callback_sender = sender.clone();
        let mut rb_builder = RingBufferBuilder::new();
        let added = rb_builder.add(rb_map, move |data: &[u8]| {
            // Non-zero aborts the current poll once the consumer is gone
            match callback_sender.blocking_send_record(data.to_vec()) {
                Ok(()) => 0,
                Err(_) => -1,
            }
        });
        if let Err(e) = added {
            let _ = ready.send(Err(shield_error!(ebpf, e, "ring buffer")));
            return;
        }

        let rb = match rb_builder.build() {
            Ok(rb) => rb,
            Err(e) => {
                let _ = ready.send(Err(shield_error!(ebpf, e, "ring buffer")));
                return;
            }
        };

        if ready.send(Ok(())).is_err() {
            return;
        }

        info!("📡 Ring buffer processor started");
        let timeout = Duration::from_millis(config.poll_timeout_ms);

        while !sender.is_closed() {
            if let Err(e) = rb.poll(timeout) {
                if sender.is_closed() {
                    break;
                }
                error!("Ring buffer polling error: {}", e);
                let kind = RingBufferErrorKind::PollFailed {
                    reason: e.to_string(),
                };
                if sender.blocking_report_error(ShieldError::RingBuffer { kind }).is_err() {
                    break;
                }
            }
        }

        info!("Ring buffer processor stopped");
    }
}

/// Producer that stands in for the kernel probe, see [`simulation`]
pub fn start_simulation(config: &EbpfConfig, interval: Duration) -> Result<(RingBufferSource, SourceHandle)> {
    config.validate()?;
    let layout = config.layout()?;
    let (sender, source, closer) = event_channel(config.channel_capacity);

    let task = tokio::spawn(simulation::mock_event_generator(
        sender,
        closer.clone(),
        layout,
        interval,
    ));
    info!("🎭 Simulated write producer started");

    Ok((source, SourceHandle::from_task(closer, task)))
}
