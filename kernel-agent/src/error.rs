// kernel-agent/src/error.rs
// Error taxonomy for the entropy shield agent

use std::result;
use thiserror::Error;

/// Main error type shared by the probe loader, the event source and the decoder
#[derive(Error, Debug)]
pub enum ShieldError {
    /// eBPF program attach or map lookup errors
    #[error("eBPF error: {message} (context: {context})")]
    EbpfError { message: String, context: String },

    /// eBPF object open/load errors
    #[error("eBPF program load failed: {0}")]
    EbpfLoad(String),

    /// Raw record does not match the fixed wire layout
    #[error("Malformed record: expected at least {expected} bytes, got {actual}")]
    MalformedRecord { expected: usize, actual: usize },

    /// Ring buffer related errors
    #[error("Ring buffer error: {kind}")]
    RingBuffer { kind: RingBufferErrorKind },

    /// Process termination could not be carried out
    #[error("Enforcement failed for PID {pid}: {reason}")]
    Enforcement { pid: u32, reason: String },

    /// Configuration validation errors
    #[error("Configuration error: {field} - {message}")]
    Config { field: String, message: String },

    /// Permission or system access errors
    #[error("Permission denied: {operation} (details: {details})")]
    Permission { operation: String, details: String },

    /// I/O related errors
    #[error("I/O error: {operation} failed - {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

/// Specific ring buffer error types
#[derive(Error, Debug)]
pub enum RingBufferErrorKind {
    #[error("event source closed")]
    Closed,

    #[error("ring buffer polling failed: {reason}")]
    PollFailed { reason: String },
}

/// Result type alias for convenience
pub type Result<T> = result::Result<T, ShieldError>;

/// What the consumption loop does after observing an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Log and keep reading
    Continue,
    /// Drop the current record without reporting it
    Skip,
    /// Leave the loop cleanly
    Stop,
    /// Refuse to start; the process exits non-zero
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Fatal,
    Transient,
    Decode,
    Enforcement,
    Shutdown,
}

/// Trait for error recovery
pub trait ErrorRecovery {
    fn recovery_strategy(&self) -> RecoveryStrategy;
    fn error_category(&self) -> ErrorCategory;

    fn is_recoverable(&self) -> bool {
        !matches!(self.error_category(), ErrorCategory::Fatal)
    }
}

impl ErrorRecovery for ShieldError {
    fn recovery_strategy(&self) -> RecoveryStrategy {
        match self.error_category() {
            ErrorCategory::Fatal => RecoveryStrategy::Abort,
            ErrorCategory::Transient | ErrorCategory::Enforcement => RecoveryStrategy::Continue,
            ErrorCategory::Decode => RecoveryStrategy::Skip,
            ErrorCategory::Shutdown => RecoveryStrategy::Stop,
        }
    }

    fn error_category(&self) -> ErrorCategory {
        match self {
            ShieldError::RingBuffer { kind } => match kind {
                RingBufferErrorKind::Closed => ErrorCategory::Shutdown,
                RingBufferErrorKind::PollFailed { .. } => ErrorCategory::Transient,
            },
            ShieldError::MalformedRecord { .. } => ErrorCategory::Decode,
            ShieldError::Enforcement { .. } => ErrorCategory::Enforcement,
            ShieldError::EbpfError { .. }
            | ShieldError::EbpfLoad(_)
            | ShieldError::Config { .. }
            | ShieldError::Permission { .. }
            | ShieldError::Io { .. } => ErrorCategory::Fatal,
        }
    }
}

impl ShieldError {
    pub fn closed() -> Self {
        ShieldError::RingBuffer {
            kind: RingBufferErrorKind::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ShieldError::RingBuffer {
                kind: RingBufferErrorKind::Closed
            }
        )
    }
}

/// Helper macros for error creation
#[macro_export]
macro_rules! shield_error {
    (ebpf, $msg:expr, $ctx:expr) => {
        $crate::error::ShieldError::EbpfError {
            message: $msg.to_string(),
            context: $ctx.to_string(),
        }
    };
    (config, $field:expr, $msg:expr) => {
        $crate::error::ShieldError::Config {
            field: $field.to_string(),
            message: $msg.to_string(),
        }
    };
    (permission, $op:expr, $details:expr) => {
        $crate::error::ShieldError::Permission {
            operation: $op.to_string(),
            details: $details.to_string(),
        }
    };
}

impl From<std::io::Error> for ShieldError {
    fn from(err: std::io::Error) -> Self {
        ShieldError::Io {
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_source_stops_the_loop() {
        let err = ShieldError::closed();

        assert!(err.is_closed());
        assert!(err.is_recoverable());
        assert_eq!(err.error_category(), ErrorCategory::Shutdown);
        assert_eq!(err.recovery_strategy(), RecoveryStrategy::Stop);
    }

    #[test]
    fn test_poll_failure_is_transient() {
        let err = ShieldError::RingBuffer {
            kind: RingBufferErrorKind::PollFailed {
                reason: "Interrupted system call".to_string(),
            },
        };

        assert!(!err.is_closed());
        assert_eq!(err.error_category(), ErrorCategory::Transient);
        assert_eq!(err.recovery_strategy(), RecoveryStrategy::Continue);
    }

    #[test]
    fn test_malformed_record_is_skipped() {
        let err = ShieldError::MalformedRecord {
            expected: 160,
            actual: 12,
        };

        assert_eq!(err.recovery_strategy(), RecoveryStrategy::Skip);
        assert_eq!(
            err.to_string(),
            "Malformed record: expected at least 160 bytes, got 12"
        );
    }

    #[test]
    fn test_startup_errors_abort() {
        let errors = [
            shield_error!(ebpf, "program trace_write not found", "attach"),
            shield_error!(config, "detection.entropy_threshold", "out of range"),
            shield_error!(permission, "load eBPF object", "effective uid is not 0"),
            ShieldError::EbpfLoad("no such file".to_string()),
        ];

        for err in errors {
            assert!(!err.is_recoverable(), "{err} should be fatal");
            assert_eq!(err.recovery_strategy(), RecoveryStrategy::Abort);
        }
    }

    #[test]
    fn test_enforcement_failure_does_not_stop_monitoring() {
        let err = ShieldError::Enforcement {
            pid: 4242,
            reason: "EPERM".to_string(),
        };

        assert_eq!(err.error_category(), ErrorCategory::Enforcement);
        assert_eq!(err.recovery_strategy(), RecoveryStrategy::Continue);
    }
}
