//! Naming resolver: pattern → concrete output path.
//!
//! Tokens: `%name` (channel name, slashes flattened), `%index` (monotonic
//! per `(channel, format, subdir)` counter), `%timestamp` (zero-padded
//! `seconds_nanoseconds`), plus chrono strftime date/time tokens evaluated
//! against the message timestamp. Indices are assigned during the single
//! sequential pre-pass over the message stream, never at completion time,
//! so file names are identical regardless of worker count.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use chrono::format::{Item, StrftimeItems};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::ConfigError;
use crate::message::Message;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%(name|index|timestamp)").expect("token regex"));

/// Default pattern used when a run configuration leaves naming unset.
pub const DEFAULT_PATTERN: &str = "%name_%index";

/// A validated naming pattern.
#[derive(Debug, Clone)]
pub struct NamingPattern {
    pattern: String,
    has_date_tokens: bool,
}

impl NamingPattern {
    /// Parse and validate a pattern. Unknown `%` specifiers left over after
    /// removing the custom tokens are rejected.
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        if pattern.is_empty() {
            return Err(ConfigError::InvalidNamingPattern("pattern is empty".into()));
        }
        let stripped = TOKEN_RE.replace_all(pattern, "");
        let has_date_tokens = stripped.contains('%');
        if has_date_tokens {
            for item in StrftimeItems::new(&stripped) {
                if matches!(item, Item::Error) {
                    return Err(ConfigError::InvalidNamingPattern(format!(
                        "invalid strftime specifier in '{pattern}'"
                    )));
                }
            }
        }
        Ok(Self { pattern: pattern.to_string(), has_date_tokens })
    }

    /// Resolve the pattern for one message. Returns the extension-less file
    /// name; the routine appends its own extension.
    pub fn resolve(&self, msg: &Message, index: u64) -> String {
        let base = msg.channel.trim_matches('/').replace('/', "_");
        let (sec, nanos) = msg.timestamp_parts();
        let substituted = TOKEN_RE.replace_all(&self.pattern, |caps: &Captures| match &caps[1] {
            "name" => base.clone(),
            "index" => index.to_string(),
            "timestamp" => format!("{sec:010}_{nanos:09}"),
            _ => unreachable!(),
        });
        if !self.has_date_tokens {
            return substituted.into_owned();
        }
        match DateTime::<Utc>::from_timestamp(sec as i64, nanos) {
            Some(dt) => dt.format(&substituted).to_string(),
            // Out-of-range timestamp: leave the date tokens verbatim rather
            // than dropping the file.
            None => substituted.into_owned(),
        }
    }

    /// True when every message resolves to the same name: no index,
    /// timestamp or date token varies per message.
    pub fn is_constant(&self) -> bool {
        !self.has_date_tokens
            && !self.pattern.contains("%index")
            && !self.pattern.contains("%timestamp")
    }
}

/// Monotonic per-key index assignment for `%index`. Keys are
/// `(channel, format, subdir)`; assignment order follows the sequential
/// pre-pass, which makes the sequence reproducible across runs.
#[derive(Default)]
pub struct IndexAllocator {
    next: BTreeMap<(String, String, Option<String>), u64>,
}

impl IndexAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, channel: &str, format: &str, subdir: Option<&str>) -> u64 {
        let key = (channel.to_string(), format.to_string(), subdir.map(str::to_string));
        let slot = self.next.entry(key).or_insert(0);
        let idx = *slot;
        *slot += 1;
        idx
    }
}

/// Join output directory, optional subdirectory and resolved file name.
pub fn output_path(output_dir: &Path, subdir: Option<&str>, file_name: &str) -> PathBuf {
    let mut path = output_dir.to_path_buf();
    if let Some(sub) = subdir {
        path.push(sub);
    }
    path.push(file_name);
    path
}
