//! Channels, messages and the typed payload union.

use serde::{Deserialize, Serialize};

/// Payload type tag. Routines and processors register against a kind, never
/// against a concrete channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Record,
    Image,
    PointCloud,
    Blob,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PayloadKind::Record => "record",
            PayloadKind::Image => "image",
            PayloadKind::PointCloud => "pointcloud",
            PayloadKind::Blob => "blob",
        };
        f.write_str(s)
    }
}

/// Raw image payload: row-major pixel data plus enough shape information for
/// the encoders.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel: 1 (grayscale) or 3 (RGB).
    pub channels: u8,
    pub data: Vec<u8>,
}

/// Typed message payload. Modeled as a tagged union instead of the dynamic
/// attribute access the source log uses.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Record(serde_json::Value),
    Image(ImageData),
    PointCloud(Vec<[f32; 3]>),
    Blob(Vec<u8>),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Record(_) => PayloadKind::Record,
            Payload::Image(_) => PayloadKind::Image,
            Payload::PointCloud(_) => PayloadKind::PointCloud,
            Payload::Blob(_) => PayloadKind::Blob,
        }
    }

    pub fn as_record(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Record(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageData> {
        match self {
            Payload::Image(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_points(&self) -> Option<&[[f32; 3]]> {
        match self {
            Payload::PointCloud(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Payload::Blob(b) => Some(b),
            _ => None,
        }
    }
}

/// A named, typed stream of timestamped messages within the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub kind: PayloadKind,
}

/// One entry of a channel: timestamp in seconds plus typed payload.
/// Immutable after creation; processors yield a new payload of the same
/// kind instead of mutating in place.
#[derive(Debug, Clone)]
pub struct Message {
    pub channel: String,
    pub timestamp: f64,
    pub payload: Payload,
}

impl Message {
    pub fn new(channel: impl Into<String>, timestamp: f64, payload: Payload) -> Self {
        Self { channel: channel.into(), timestamp, payload }
    }

    /// Timestamp split into whole seconds and nanoseconds, used by the
    /// `%timestamp` naming token.
    pub fn timestamp_parts(&self) -> (u64, u32) {
        let sec = self.timestamp.max(0.0).trunc();
        let nanos = ((self.timestamp.max(0.0) - sec) * 1e9).round() as u32;
        (sec as u64, nanos.min(999_999_999))
    }
}
