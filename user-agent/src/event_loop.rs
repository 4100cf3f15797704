// user-agent/src/event_loop.rs
// Event consumption loop: read -> decode -> classify -> enforce

use shield_kernel::{decode_record, ErrorRecovery, EventSource, RecordLayout, RecoveryStrategy};
use tracing::{debug, info, trace, warn};

use crate::response::{KillOutcome, ResponseHandler};
use crate::threat_classifier::ThreatClassifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub records_processed: u64,
    pub malformed_records: u64,
    pub read_errors: u64,
    pub threats_detected: u64,
    pub processes_killed: u64,
    pub kill_failures: u64,
}

pub struct EventLoop<S> {
    source: S,
    layout: RecordLayout,
    classifier: ThreatClassifier,
    response: ResponseHandler,
    state: LoopState,
    stats: LoopStats,
}

impl<S: EventSource> EventLoop<S> {
    pub fn new(source: S, layout: RecordLayout, classifier: ThreatClassifier, response: ResponseHandler) -> Self {
        Self {
            source,
            layout,
            classifier,
            response,
            state: LoopState::Running,
            stats: LoopStats::default(),
        }
    }

    /// Consume records until the source reports closed. The source is dropped
    /// on return so the producer observes the consumer going away.
    pub async fn run(mut self) -> LoopStats {
        info!("🛡️  Ransomware defense active, monitoring write entropy...");

        while self.state == LoopState::Running {
            match self.source.read().await {
                Ok(raw) => self.process_record(&raw),
                Err(e) => match e.recovery_strategy() {
                    RecoveryStrategy::Stop => {
                        debug!("Event source closed, leaving consumption loop");
                        self.state = LoopState::Stopped;
                    }
                    _ => {
                        self.stats.read_errors += 1;
                        warn!("Event read failed: {}", e);
                    }
                },
            }
        }

        info!("Consumption loop stopped");
        self.stats
    }

    fn process_record(&mut self, raw: &[u8]) {
        let event = match decode_record(raw, &self.layout) {
            Ok(event) => event,
            Err(e) => {
                self.stats.malformed_records += 1;
                trace!("Skipping record: {}", e);
                return;
            }
        };
        self.stats.records_processed += 1;

        let verdict = self.classifier.classify(&event.sample, &event.process_name);
        if !verdict.is_suspicious() {
            if verdict.entropy() > self.classifier.threshold() {
                debug!("High entropy write from allow-listed {}: {}", event.process_name, verdict);
            }
            return;
        }

        self.stats.threats_detected += 1;
        warn!(
            "🚨 [DANGER] High entropy ({:.2}) detected from PID: {} ({})",
            verdict.entropy(),
            event.pid,
            event.process_name
        );

        match self.response.respond(&event, &verdict) {
            KillOutcome::Killed => self.stats.processes_killed += 1,
            KillOutcome::DryRun => {}
            KillOutcome::NotFound | KillOutcome::Refused { .. } | KillOutcome::Failed { .. } => {
                self.stats.kill_failures += 1
            }
        }
    }
}
