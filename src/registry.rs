//! Routine and processor registry.
//!
//! An explicit table from `(payload kind, format)` to export routines and
//! from `(payload kind, name)` to processors, populated once at startup and
//! read-only during export, so lookups need no locking. Every lookup a run
//! needs is resolved up front, so a missing routine is a pre-flight
//! `ConfigError`, never a mid-run surprise.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ConfigError, RoutineError};
use crate::message::{Message, Payload, PayloadKind};
use crate::{processors, routines};

/// Whether a routine appends every call into one shared file or writes one
/// complete file per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Each call appends/merges into a shared path; the `is_first` flag marks
    /// the call that must initialize the file.
    SingleFile,
    /// Each call writes a complete independent file.
    MultiFile,
}

impl std::fmt::Display for ExportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExportMode::SingleFile => "single-file",
            ExportMode::MultiFile => "multi-file",
        })
    }
}

/// Export routine contract: given a message and an extension-less output
/// path, write the bytes. The routine picks its own file extension.
pub type RoutineFn =
    Arc<dyn Fn(&Message, &Path, &str, bool) -> Result<(), RoutineError> + Send + Sync>;

/// Processor contract: payload in, payload of the same kind out.
pub type ProcessorFn =
    Arc<dyn Fn(&Message, &BTreeMap<String, String>) -> Result<Payload, RoutineError> + Send + Sync>;

#[derive(Clone)]
pub struct RoutineDescriptor {
    pub mode: ExportMode,
    pub func: RoutineFn,
}

#[derive(Clone)]
pub struct ProcessorDescriptor {
    pub func: ProcessorFn,
    /// Argument names that must be present in a `ProcessingSpec`.
    pub required_args: Vec<&'static str>,
}

/// Registration table for export routines and processors. Constructed
/// explicitly and passed into the exporter; scoped to one run.
#[derive(Default, Clone)]
pub struct Registry {
    routines: BTreeMap<(PayloadKind, String), RoutineDescriptor>,
    processors: BTreeMap<(PayloadKind, String), ProcessorDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the builtin routines and processors.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        routines::register_builtins(&mut reg);
        processors::register_builtins(&mut reg);
        reg
    }

    /// Register a routine for every format in `formats`. A duplicate
    /// `(kind, format)` pair is a configuration conflict.
    pub fn register_routine(
        &mut self,
        kind: PayloadKind,
        formats: &[&str],
        mode: ExportMode,
        func: RoutineFn,
    ) -> Result<(), ConfigError> {
        for fmt in formats {
            let key = (kind, fmt.to_string());
            if self.routines.contains_key(&key) {
                return Err(ConfigError::ConflictingRoutine { kind, format: fmt.to_string() });
            }
            self.routines.insert(key, RoutineDescriptor { mode, func: Arc::clone(&func) });
        }
        Ok(())
    }

    /// Replace any existing registration for the given formats.
    pub fn register_routine_override(
        &mut self,
        kind: PayloadKind,
        formats: &[&str],
        mode: ExportMode,
        func: RoutineFn,
    ) {
        for fmt in formats {
            self.routines
                .insert((kind, fmt.to_string()), RoutineDescriptor { mode, func: Arc::clone(&func) });
        }
    }

    pub fn register_processor(
        &mut self,
        kind: PayloadKind,
        name: &str,
        required_args: Vec<&'static str>,
        func: ProcessorFn,
    ) -> Result<(), ConfigError> {
        let key = (kind, name.to_string());
        if self.processors.contains_key(&key) {
            return Err(ConfigError::ConflictingProcessor { kind, name: name.to_string() });
        }
        self.processors.insert(key, ProcessorDescriptor { func, required_args });
        Ok(())
    }

    pub fn routine(&self, kind: PayloadKind, format: &str) -> Result<&RoutineDescriptor, ConfigError> {
        self.routines
            .get(&(kind, format.to_string()))
            .ok_or_else(|| ConfigError::UnregisteredFormat { kind, format: format.to_string() })
    }

    pub fn processor(&self, kind: PayloadKind, name: &str) -> Result<&ProcessorDescriptor, ConfigError> {
        self.processors
            .get(&(kind, name.to_string()))
            .ok_or_else(|| ConfigError::UnregisteredProcessor { kind, name: name.to_string() })
    }

    /// All registered formats for a payload kind, with their modes.
    pub fn formats_for(&self, kind: PayloadKind) -> Vec<(&str, ExportMode)> {
        self.routines
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, fmt), desc)| (fmt.as_str(), desc.mode))
            .collect()
    }

    /// Every `(kind, format, mode)` triple, for the `formats` command.
    pub fn all_routines(&self) -> Vec<(PayloadKind, &str, ExportMode)> {
        self.routines
            .iter()
            .map(|((k, fmt), desc)| (*k, fmt.as_str(), desc.mode))
            .collect()
    }

    pub fn all_processors(&self) -> Vec<(PayloadKind, &str, &[&'static str])> {
        self.processors
            .iter()
            .map(|((k, name), desc)| (*k, name.as_str(), desc.required_args.as_slice()))
            .collect()
    }
}
