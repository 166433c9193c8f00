//! Time alignment of companion channels against a master channel.
//!
//! The resampler consumes one ascending message stream per channel and emits
//! frames: one master message plus the chosen companion message per other
//! channel. Selection keeps only a small lookahead window per companion, so
//! memory stays constant regardless of log size. Frames are emitted strictly
//! ascending by master timestamp. This is a sequential pre-pass: it runs
//! ahead of the worker pool, never inside it, because correctness depends on
//! global time order across channels.

use std::collections::BTreeMap;
use std::iter::Peekable;

use ordered_float::OrderedFloat;
use smallvec::SmallVec;

use crate::error::ConfigError;
use crate::message::Message;

/// How a companion message is associated with a master timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Association {
    /// Most recent companion message with timestamp <= master.
    Last,
    /// Whichever of the preceding or following companion message is closer
    /// in time. Requires a discard epsilon.
    Nearest,
}

/// A master message with one aligned companion per other selected channel.
/// Incomplete frames are never emitted; a missing or too-distant companion
/// discards the whole frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub master: Message,
    pub companions: SmallVec<[(String, Message); 4]>,
}

impl Frame {
    /// All messages of the frame, master first.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        std::iter::once(&self.master).chain(self.companions.iter().map(|(_, m)| m))
    }
}

/// Boxed lazy message stream, ascending by timestamp.
pub type MessageIter<'a> = Box<dyn Iterator<Item = Message> + 'a>;

struct CompanionCursor<'a> {
    name: String,
    iter: Peekable<MessageIter<'a>>,
    /// Most recent message with timestamp <= the current master timestamp.
    before: Option<Message>,
}

impl CompanionCursor<'_> {
    /// Consume companion messages while their timestamp stays <= t. After
    /// this call `before` holds the last such message and `iter.peek()` is
    /// the first message with timestamp > t.
    fn advance_to(&mut self, t: f64) {
        while let Some(next) = self.iter.peek() {
            if next.timestamp <= t {
                self.before = self.iter.next();
            } else {
                break;
            }
        }
    }
}

/// Streaming LAST/NEAREST frame alignment. Iterate to drain; discard counts
/// are available afterwards via [`Resampler::discarded`].
pub struct Resampler<'a> {
    master: MessageIter<'a>,
    companions: Vec<CompanionCursor<'a>>,
    association: Association,
    discard_eps: Option<f64>,
    discarded: BTreeMap<String, u64>,
}

impl std::fmt::Debug for Resampler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resampler")
            .field("association", &self.association)
            .field("discard_eps", &self.discard_eps)
            .field("discarded", &self.discarded)
            .finish_non_exhaustive()
    }
}

impl<'a> Resampler<'a> {
    /// Build a resampler over a master stream and companion streams. NEAREST
    /// without an epsilon is rejected here as well as in run pre-flight.
    pub fn new(
        master: MessageIter<'a>,
        companions: Vec<(String, MessageIter<'a>)>,
        association: Association,
        discard_eps: Option<f64>,
    ) -> Result<Self, ConfigError> {
        if association == Association::Nearest && discard_eps.is_none() {
            return Err(ConfigError::NearestWithoutEpsilon);
        }
        Ok(Self {
            master,
            companions: companions
                .into_iter()
                .map(|(name, iter)| CompanionCursor { name, iter: iter.peekable(), before: None })
                .collect(),
            association,
            discard_eps,
            discarded: BTreeMap::new(),
        })
    }

    /// Per-channel counts of frames discarded because that channel had no
    /// candidate within the epsilon.
    pub fn discarded(&self) -> &BTreeMap<String, u64> {
        &self.discarded
    }

    pub fn into_discarded(self) -> BTreeMap<String, u64> {
        self.discarded
    }

    /// Pick the companion message for master timestamp t, or None when the
    /// frame must be discarded.
    fn select(cursor: &mut CompanionCursor, t: f64, association: Association, eps: Option<f64>) -> Option<Message> {
        cursor.advance_to(t);
        match association {
            Association::Last => {
                let before = cursor.before.as_ref()?;
                if let Some(eps) = eps {
                    if t - before.timestamp > eps {
                        return None;
                    }
                }
                Some(before.clone())
            }
            Association::Nearest => {
                let eps = eps.unwrap_or(f64::INFINITY);
                let before = cursor.before.as_ref().map(|m| (OrderedFloat(t - m.timestamp), m));
                let after = cursor.iter.peek().map(|m| (OrderedFloat(m.timestamp - t), m));
                let chosen = match (before, after) {
                    (Some((bd, bm)), Some((ad, am))) => {
                        // Tie goes to the preceding message.
                        if bd <= ad { (bd, bm) } else { (ad, am) }
                    }
                    (Some(b), None) => b,
                    (None, Some(a)) => a,
                    (None, None) => return None,
                };
                if chosen.0.into_inner() > eps {
                    return None;
                }
                Some(chosen.1.clone())
            }
        }
    }
}

impl Iterator for Resampler<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        // Master exhaustion ends the stream; leftover companion lookahead is
        // simply dropped.
        'master: loop {
            let master = self.master.next()?;
            let t = master.timestamp;
            let mut companions: SmallVec<[(String, Message); 4]> =
                SmallVec::with_capacity(self.companions.len());
            for cursor in &mut self.companions {
                match Self::select(cursor, t, self.association, self.discard_eps) {
                    Some(msg) => companions.push((cursor.name.clone(), msg)),
                    None => {
                        *self.discarded.entry(cursor.name.clone()).or_insert(0) += 1;
                        continue 'master;
                    }
                }
            }
            return Some(Frame { master, companions });
        }
    }
}
