// user-agent/src/response.rs
// Enforcement: terminate processes flagged by the classifier

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use shield_kernel::{ShieldError, WriteEvent};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::ResponseConfig;
use crate::threat_classifier::Verdict;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    Killed,
    /// Already exited, or the pid was never valid
    NotFound,
    /// Target deliberately not signalled
    Refused { reason: &'static str },
    Failed { reason: String },
    DryRun,
}

impl KillOutcome {
    pub fn is_killed(&self) -> bool {
        matches!(self, KillOutcome::Killed)
    }
}

impl fmt::Display for KillOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillOutcome::Killed => write!(f, "killed"),
            KillOutcome::NotFound => write!(f, "not_found"),
            KillOutcome::Refused { reason } => write!(f, "refused: {}", reason),
            KillOutcome::Failed { reason } => write!(f, "failed: {}", reason),
            KillOutcome::DryRun => write!(f, "dry_run"),
        }
    }
}

/// Process control capability used by the response handler
pub trait ProcessKiller: Send + Sync {
    fn kill(&self, pid: u32) -> KillOutcome;
}

/// Resolves the pid with signal 0, then sends SIGKILL. No retry.
pub struct SignalKiller;

impl ProcessKiller for SignalKiller {
    fn kill(&self, pid: u32) -> KillOutcome {
        let target = Pid::from_raw(pid as i32);

        if let Err(e) = signal::kill(target, None) {
            return match e {
                Errno::ESRCH => KillOutcome::NotFound,
                other => KillOutcome::Failed {
                    reason: other.to_string(),
                },
            };
        }

        match signal::kill(target, Signal::SIGKILL) {
            Ok(()) => KillOutcome::Killed,
            Err(Errno::ESRCH) => KillOutcome::NotFound,
            Err(e) => KillOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}

/// Reports what would have been killed
pub struct DryRunKiller;

impl ProcessKiller for DryRunKiller {
    fn kill(&self, _pid: u32) -> KillOutcome {
        KillOutcome::DryRun
    }
}

/// Pids that must never reach kill(2): 0 and negative values address
/// process groups, and the agent does not terminate itself.
fn refuse_reason(pid: u32) -> Option<&'static str> {
    if pid == 0 {
        Some("pid 0 addresses the caller's process group")
    } else if pid > i32::MAX as u32 {
        Some("pid outside the kernel pid range")
    } else if pid == std::process::id() {
        Some("target is the agent itself")
    } else {
        None
    }
}

#[derive(Debug, Serialize)]
struct IncidentRecord<'a> {
    timestamp: DateTime<Utc>,
    pid: u32,
    process_name: &'a str,
    write_length: u64,
    entropy: f64,
    outcome: String,
}

pub struct ResponseHandler {
    killer: Box<dyn ProcessKiller>,
    incident_log: Option<PathBuf>,
}

impl ResponseHandler {
    pub fn new(config: &ResponseConfig) -> Self {
        let killer: Box<dyn ProcessKiller> = if config.enable_process_kill {
            Box::new(SignalKiller)
        } else {
            warn!("Process termination disabled, running in dry-run mode");
            Box::new(DryRunKiller)
        };
        Self::with_killer(config, killer)
    }

    pub fn with_killer(config: &ResponseConfig, killer: Box<dyn ProcessKiller>) -> Self {
        Self {
            killer,
            incident_log: config.incident_log.as_ref().map(PathBuf::from),
        }
    }

    /// Terminate the writer of a suspicious record. Fire-and-forget: the
    /// outcome is reported, never retried or escalated.
    pub fn respond(&self, event: &WriteEvent, verdict: &Verdict) -> KillOutcome {
        let pid = event.pid;
        let outcome = match refuse_reason(pid) {
            Some(reason) => KillOutcome::Refused { reason },
            None => self.killer.kill(pid),
        };

        match &outcome {
            KillOutcome::Killed => {
                warn!("❌ [KILLED] Terminated ransomware process PID {} ({})", pid, event.process_name);
            }
            KillOutcome::NotFound => {
                warn!("⚠️ [FAIL] Could not kill PID {} ({}): process not found", pid, event.process_name);
            }
            KillOutcome::Refused { reason } => {
                warn!("⚠️ [FAIL] Refusing to kill PID {} ({}): {}", pid, event.process_name, reason);
            }
            KillOutcome::Failed { reason } => {
                let err = ShieldError::Enforcement {
                    pid,
                    reason: reason.clone(),
                };
                error!("⚠️ [FAIL] {}", err);
            }
            KillOutcome::DryRun => {
                info!("🧪 [DRY-RUN] Would kill PID {} ({})", pid, event.process_name);
            }
        }

        if let Some(path) = &self.incident_log {
            if let Err(e) = Self::append_incident(path, event, verdict, &outcome) {
                warn!("Failed to write incident log: {:#}", e);
            }
        }

        outcome
    }

    fn append_incident(path: &Path, event: &WriteEvent, verdict: &Verdict, outcome: &KillOutcome) -> Result<()> {
        let record = IncidentRecord {
            timestamp: Utc::now(),
            pid: event.pid,
            process_name: &event.process_name,
            write_length: event.write_length,
            entropy: verdict.entropy(),
            outcome: outcome.to_string(),
        };

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
