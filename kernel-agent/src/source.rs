// kernel-agent/src/source.rs
// Event source: bounded record channel with an explicit close signal

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::{Result, ShieldError};

/// One raw record, or a transient read failure observed by the producer
pub type RawRecord = Result<Vec<u8>>;

/// Capability the consumption loop reads from.
///
/// `read` suspends until the next record is available. Once the source is
/// closed every call returns a `RingBuffer(Closed)` error.
#[async_trait]
pub trait EventSource: Send {
    async fn read(&mut self) -> Result<Vec<u8>>;
}

/// Create a connected producer handle, consumer and closer.
pub fn event_channel(capacity: usize) -> (RecordSender, RingBufferSource, SourceCloser) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (closed_tx, closed_rx) = watch::channel(false);

    let closer = SourceCloser { closed: closed_tx };
    let sender = RecordSender {
        tx,
        closed: closer.subscribe(),
    };
    let source = RingBufferSource {
        rx,
        closed: closed_rx,
    };

    (sender, source, closer)
}

/// Producer side, held by the ring buffer poll thread or the simulator
#[derive(Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<RawRecord>,
    closed: watch::Receiver<bool>,
}

impl RecordSender {
    pub async fn send_record(&self, record: Vec<u8>) -> Result<()> {
        self.tx.send(Ok(record)).await.map_err(|_| ShieldError::closed())
    }

    /// Blocking variant for producers running outside the async runtime.
    /// Waits for capacity instead of dropping the record.
    pub fn blocking_send_record(&self, record: Vec<u8>) -> Result<()> {
        self.tx.blocking_send(Ok(record)).map_err(|_| ShieldError::closed())
    }

    pub fn blocking_report_error(&self, error: ShieldError) -> Result<()> {
        self.tx.blocking_send(Err(error)).map_err(|_| ShieldError::closed())
    }

    /// True once the source was closed or the consumer went away
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.tx.is_closed()
    }
}

/// Cloneable handle whose only power is closing the source
#[derive(Clone)]
pub struct SourceCloser {
    closed: watch::Sender<bool>,
}

impl SourceCloser {
    /// Close the source. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        let was_closed = self.closed.send_replace(true);
        if !was_closed {
            debug!("Event source closed");
        }
        !was_closed
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once the source has been closed
    pub async fn closed(&self) {
        wait_closed(&mut self.subscribe()).await;
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    if closed.wait_for(|closed| *closed).await.is_err() {
        // Every closer is gone, nothing can close the source any more
        std::future::pending::<()>().await;
    }
}

/// Consumer side of the kernel ring buffer
pub struct RingBufferSource {
    rx: mpsc::Receiver<RawRecord>,
    closed: watch::Receiver<bool>,
}

#[async_trait]
impl EventSource for RingBufferSource {
    async fn read(&mut self) -> Result<Vec<u8>> {
        if *self.closed.borrow() {
            self.rx.close();
            return Err(ShieldError::closed());
        }

        tokio::select! {
            biased;
            _ = wait_closed(&mut self.closed) => {
                self.rx.close();
                Err(ShieldError::closed())
            }
            record = self.rx.recv() => match record {
                Some(record) => record,
                None => Err(ShieldError::closed()),
            },
        }
    }
}
