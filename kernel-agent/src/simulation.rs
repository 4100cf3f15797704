// kernel-agent/src/simulation.rs
// Synthetic write producer for running the pipeline without kernel privileges

use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

use crate::events::{RecordLayout, WriteEvent};
use crate::source::{RecordSender, SourceCloser};

const PROCESSES: &[&str] = &["vim", "bash", "python3", "postgres", "gzip", "scp", "cryptor"];

pub async fn mock_event_generator(
    sender: RecordSender,
    closer: SourceCloser,
    layout: RecordLayout,
    period: Duration,
) {
    info!("🎭 Mock write generator started");
    let mut ticker = interval(period);
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sequence += 1;
                if sender.send_record(generate_mock_record(&layout)).await.is_err() {
                    break;
                }
            }
            _ = closer.closed() => {
                debug!("Mock write generator received shutdown signal");
                break;
            }
        }
    }

    info!("Mock write generator stopped after {} records", sequence);
}

/// One synthetic record: text-like, zeroed, random, or truncated
pub fn generate_mock_record(layout: &RecordLayout) -> Vec<u8> {
    let process = PROCESSES[fastrand::usize(..PROCESSES.len())];
    let pid = fastrand::u32(1000..65535);
    let write_length = fastrand::u64(1..65536);

    let sample: Vec<u8> = match fastrand::u8(0..10) {
        0..=4 => (0..layout.sample_len())
            .map(|_| fastrand::alphanumeric() as u8)
            .collect(),
        5..=6 => vec![0u8; layout.sample_len()],
        _ => (0..layout.sample_len()).map(|_| fastrand::u8(..)).collect(),
    };

    let mut record = WriteEvent::new(pid, write_length, process, &sample).encode(layout);
    if fastrand::u8(0..50) == 0 {
        // Garbled record, exercises the decode failure path
        record.truncate(fastrand::usize(..record.len()));
    }
    record
}
