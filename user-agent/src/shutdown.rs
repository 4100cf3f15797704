// user-agent/src/shutdown.rs
// Shutdown coordination: termination requests close the event source

use anyhow::{Context, Result};
use shield_kernel::SourceCloser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_stream::wrappers::SignalStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The request stream ended after at most one request
    Graceful,
    /// A second request arrived while shutdown was in progress
    Forced,
}

/// SIGINT and SIGTERM merged into one stream of signal names
pub fn termination_requests() -> Result<impl Stream<Item = &'static str> + Unpin> {
    let interrupt = signal(SignalKind::interrupt()).context("cannot install SIGINT handler")?;
    let terminate = signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;

    Ok(SignalStream::new(interrupt)
        .map(|_| "SIGINT")
        .merge(SignalStream::new(terminate).map(|_| "SIGTERM")))
}

pub struct ShutdownCoordinator {
    closer: SourceCloser,
}

impl ShutdownCoordinator {
    pub fn new(closer: SourceCloser) -> Self {
        Self { closer }
    }

    /// Close the event source on the first request. Resolves `Forced` if a
    /// further request arrives before the process is gone.
    pub async fn run<S>(self, mut requests: S) -> ShutdownOutcome
    where
        S: Stream<Item = &'static str> + Unpin,
    {
        let Some(request) = requests.next().await else {
            return ShutdownOutcome::Graceful;
        };

        info!("🛑 Received {}, stopping event consumption", request);
        self.closer.close();

        match requests.next().await {
            Some(request) => {
                warn!("Received {} while shutdown is in progress, exiting now", request);
                ShutdownOutcome::Forced
            }
            None => ShutdownOutcome::Graceful,
        }
    }
}
