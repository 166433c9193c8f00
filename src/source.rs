//! Channel sources: where messages come from.
//!
//! The core never seeks or re-reads a channel out of order, so a source only
//! needs to hand out lazy ascending-by-timestamp iterators. `JsonlSource`
//! reads the JSON Lines log layout the CLI consumes; `MemorySource` backs
//! tests and embedding.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::message::{Channel, ImageData, Message, Payload, PayloadKind};

/// Supplies, per named channel, a lazy ascending-by-timestamp sequence of
/// messages.
pub trait ChannelSource {
    fn channels(&self) -> Vec<Channel>;

    /// Iterate a single channel, ascending by timestamp.
    fn iter_channel<'a>(&'a self, name: &str) -> Box<dyn Iterator<Item = Message> + 'a>;

    fn channel(&self, name: &str) -> Option<Channel> {
        self.channels().into_iter().find(|c| c.name == name)
    }
}

/// In-memory source. Messages are sorted per channel at construction.
#[derive(Default)]
pub struct MemorySource {
    channels: BTreeMap<String, (PayloadKind, Vec<Message>)>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        let entry = self
            .channels
            .entry(msg.channel.clone())
            .or_insert_with(|| (msg.payload.kind(), Vec::new()));
        entry.1.push(msg);
        entry.1.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    }

    pub fn with_messages(msgs: impl IntoIterator<Item = Message>) -> Self {
        let mut s = Self::new();
        for m in msgs {
            s.push(m);
        }
        s
    }
}

impl ChannelSource for MemorySource {
    fn channels(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .map(|(name, (kind, _))| Channel { name: name.clone(), kind: *kind })
            .collect()
    }

    fn iter_channel<'a>(&'a self, name: &str) -> Box<dyn Iterator<Item = Message> + 'a> {
        match self.channels.get(name) {
            Some((_, msgs)) => Box::new(msgs.iter().cloned()),
            None => Box::new(std::iter::empty()),
        }
    }
}

/// One line of a JSONL log.
#[derive(Deserialize)]
struct JsonlEntry {
    channel: String,
    timestamp: f64,
    #[serde(flatten)]
    body: JsonlBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum JsonlBody {
    Record(serde_json::Value),
    Image { width: u32, height: u32, channels: u8, data: Vec<u8> },
    Points(Vec<[f32; 3]>),
    Blob(Vec<u8>),
}

impl JsonlBody {
    fn into_payload(self) -> Payload {
        match self {
            JsonlBody::Record(v) => Payload::Record(v),
            JsonlBody::Image { width, height, channels, data } => {
                Payload::Image(ImageData { width, height, channels, data })
            }
            JsonlBody::Points(p) => Payload::PointCloud(p),
            JsonlBody::Blob(b) => Payload::Blob(b),
        }
    }
}

/// JSON Lines log source. The whole log is parsed up front; channel
/// iterators then stream from memory in timestamp order.
pub struct JsonlSource {
    inner: MemorySource,
}

impl JsonlSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("failed to open log: {}", path.display()))?;
        let mut inner = MemorySource::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JsonlEntry = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: malformed log entry", path.display(), lineno + 1))?;
            let msg = Message::new(entry.channel, entry.timestamp, entry.body.into_payload());
            if let Some((kind, _)) = inner.channels.get(&msg.channel) {
                if *kind != msg.payload.kind() {
                    return Err(anyhow!(
                        "{}:{}: channel '{}' changes payload kind from {} to {}",
                        path.display(),
                        lineno + 1,
                        msg.channel,
                        kind,
                        msg.payload.kind()
                    ));
                }
            }
            inner.push(msg);
        }
        Ok(Self { inner })
    }
}

impl ChannelSource for JsonlSource {
    fn channels(&self) -> Vec<Channel> {
        self.inner.channels()
    }

    fn iter_channel<'a>(&'a self, name: &str) -> Box<dyn Iterator<Item = Message> + 'a> {
        self.inner.iter_channel(name)
    }
}
