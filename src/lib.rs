//! unbag - Extract multi-channel timestamped logs into per-message files
//!
//! This library converts the channels of a sequential, timestamped log into
//! user-chosen output formats through a registry of export routines, with
//! optional time alignment (resampling) against a master channel and a
//! bounded parallel export scheduler.
//!
//! # Features
//!
//! - **Records**: JSON lines and CSV appenders (single shared file per
//!   channel/format)
//! - **Images**: PNG/JPEG, one file per message
//! - **PointClouds**: XYZ rows or ASCII PCD, one file per message
//! - **Processors**: grayscale, resize, record field selection, applied
//!   before export
//! - **Resampling**: `last`/`nearest` association against a master channel
//!   with a discard epsilon
//! - **Parallel export**: bounded worker pool; same-file tasks stay ordered
//!   on one worker
//! - **Deterministic naming**: `%name`/`%index`/`%timestamp` plus strftime
//!   tokens, assigned in a sequential pre-pass
//!
//! # Example
//!
//! ```rust,no_run
//! use unbag::{Exporter, Registry, RunConfig, JsonlSource};
//!
//! let source = JsonlSource::open("input.jsonl")?;
//! let registry = Registry::with_builtins();
//! let config = RunConfig::load("run.json")?;
//! let summary = Exporter::new(&registry).run(&source, &config)?;
//! assert!(summary.success);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod inspect;
pub mod message;
pub mod naming;
pub mod processors;
pub mod registry;
pub mod resample;
pub mod routines;
pub mod source;

// Re-export main types for convenience
pub use config::{ExportSpec, ProcessingSpec, ResampleSpec, RunConfig};
pub use error::{ConfigError, RoutineError, TaskFailure};
pub use export::{Exporter, RunSummary};
pub use message::{Channel, ImageData, Message, Payload, PayloadKind};
pub use registry::{ExportMode, Registry};
pub use resample::{Association, Frame, Resampler};
pub use source::{ChannelSource, JsonlSource, MemorySource};
