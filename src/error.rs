//! Error taxonomy for a run.
//!
//! Three severities exist: `ConfigError` aborts a run before any task is
//! scheduled, a `TaskFailure` is recorded and the run continues, and a
//! failure on the first write of a single-file group poisons that group only.

use thiserror::Error;

use crate::message::PayloadKind;

/// Fatal pre-flight errors. A run performs zero writes when one of these
/// surfaces.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no export routine registered for {kind:?} in format '{format}'")]
    UnregisteredFormat { kind: PayloadKind, format: String },

    #[error("no processor '{name}' registered for {kind:?}")]
    UnregisteredProcessor { kind: PayloadKind, name: String },

    #[error("routine for {kind:?} in format '{format}' is already registered")]
    ConflictingRoutine { kind: PayloadKind, format: String },

    #[error("processor '{name}' for {kind:?} is already registered")]
    ConflictingProcessor { kind: PayloadKind, name: String },

    #[error("'nearest' association requires a discard epsilon")]
    NearestWithoutEpsilon,

    #[error("master channel '{0}' is not part of the export selection")]
    UnknownMasterChannel(String),

    #[error("unknown channel '{0}' in run configuration")]
    UnknownChannel(String),

    #[error("cpu_percentage must be within 0..=100, got {0}")]
    InvalidCpuPercentage(u32),

    #[error("naming pattern error: {0}")]
    InvalidNamingPattern(String),

    #[error("missing required argument '{arg}' for processor '{processor}'")]
    MissingProcessorArg { processor: String, arg: String },
}

/// Errors raised by routine and processor invocations. Caught at the task
/// boundary and recorded, never propagated across tasks.
#[derive(Debug, Error)]
pub enum RoutineError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode: {0}")]
    Encode(#[from] image::ImageError),

    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("payload kind mismatch: routine expects {expected:?}, got {actual:?}")]
    PayloadMismatch { expected: PayloadKind, actual: PayloadKind },

    #[error("{0}")]
    Invalid(String),
}

/// One recorded task-level failure: which message failed and why.
#[derive(Debug)]
pub struct TaskFailure {
    pub channel: String,
    pub timestamp: f64,
    pub error: RoutineError,
    /// True when this was the initializing write of a single-file group; the
    /// remaining tasks of that group were skipped.
    pub group_init: bool,
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} @ {:.6}: {}{}",
            self.channel,
            self.timestamp,
            self.error,
            if self.group_init { " (group init, group aborted)" } else { "" }
        )
    }
}
