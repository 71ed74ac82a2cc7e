// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The scaling history of a register.
//!
//! A register receives two kinds of operations: assignments and scalings. Scalings must affect
//! every assignment they are concurrent with, but never one issued after them. The
//! [`CausalLog`] resolves this: it records every delivered scaling with its causal timestamp,
//! and the value of every cell is derived from it as the cell's base value multiplied by each
//! recorded factor that is _not_ in the causal past of the cell's assignment.
//!
//! ## Why exactly once
//!
//! Consider a cell created by assignment `A` and a scaling `S`, at some replica.
//!
//! - If `S` was delivered before `A`, it cannot be causally after `A` (which had not been
//!   delivered yet). Either `S` is in `A`'s causal past, and must not affect the cell, or it is
//!   concurrent with `A` and is folded in when the cell is created.
//! - If `S` is delivered after `A`, the cell is live by then and receives `S` through the
//!   register's delivery of `S`.
//!
//! The two cases are exclusive and exhaustive, so every scaling concurrent with or after `A`
//! reaches the cell exactly once, at every replica, whatever the delivery order.
//!
//! ## Why arbitration order
//!
//! Floating-point multiplication is not associative: once intermediate products overflow or
//! underflow, the order of the factors decides between a finite result and `inf` or `0`. The
//! log therefore keeps its entries in arbitration order, and factors are always multiplied
//! into a cell one at a time in that order. Since every replica eventually holds the same
//! entries in the same order, every replica computes bit-identical values.
use super::Replicated;
use crate::{CausalContext, CausalTimestamp, Dot};

/// A delivered scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct ScaleEntry {
    pub dot: Dot,
    pub lamport: u64,
    pub factor: f64,
}

impl ScaleEntry {
    pub fn new(timestamp: &CausalTimestamp, factor: f64) -> Self {
        Self {
            dot: timestamp.dot(),
            lamport: timestamp.lamport(),
            factor,
        }
    }

    /// The position of this entry in arbitration order.
    fn key(&self) -> (u64, Dot) {
        (self.lamport, self.dot)
    }
}

/// Every scaling delivered to a replica, in arbitration order.
#[derive(Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct CausalLog {
    entries: Vec<ScaleEntry>,
}

impl std::fmt::Debug for CausalLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (e.dot, e.factor)))
            .finish()
    }
}

impl CausalLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a delivered scaling.
    ///
    /// Returns false, and records nothing, if the scaling was already recorded.
    pub fn record(&mut self, entry: ScaleEntry) -> bool {
        match self.entries.binary_search_by(|e| e.key().cmp(&entry.key())) {
            Ok(_) => {
                debug_assert!(false, "scaling {:?} recorded twice", entry.dot);
                false
            }
            Err(at) => {
                self.entries.insert(at, entry);
                true
            }
        }
    }

    /// True if `entry` would be recorded after every entry already in the log.
    ///
    /// Under causal delivery this is the common case, since arbitration order extends causal
    /// order. Cells can then absorb the factor directly instead of being re-folded.
    pub fn is_latest(&self, entry: &ScaleEntry) -> bool {
        self.entries
            .last()
            .is_none_or(|last| last.key() < entry.key())
    }

    /// Multiplies `base` by every recorded factor that is not in `past`, one at a time and in
    /// arbitration order.
    ///
    /// With `past` set to `None`, every recorded factor is multiplied in.
    pub fn fold(&self, base: f64, past: Option<&CausalContext>) -> f64 {
        self.entries
            .iter()
            .filter(|e| past.is_none_or(|past| !past.dot_in(e.dot)))
            .fold(base, |acc, e| acc * e.factor)
    }

    /// Computes the value of a cell created with `value` by the assignment at `timestamp`.
    ///
    /// This folds in every recorded scaling that is not in the causal past of `timestamp`. It
    /// must be called when the assignment is delivered, before any later scaling is recorded.
    pub fn catch_up(&self, value: f64, timestamp: &CausalTimestamp) -> f64 {
        self.fold(value, Some(timestamp.context()))
    }

    /// Removes the longest prefix, in arbitration order, of entries contained in `stable`, and
    /// returns it as a log of its own.
    ///
    /// `stable` must only contain scalings that are in the causal past of every operation this
    /// replica may still deliver, see
    /// [`Broadcaster::stable_frontier`](crate::broadcast::Broadcaster::stable_frontier). Every
    /// later scaling then sorts after the removed ones, so live cells can fold the removed
    /// prefix into their base without changing any future result.
    pub fn truncate_stable(&mut self, stable: &CausalContext) -> CausalLog {
        let upto = self
            .entries
            .iter()
            .position(|e| !stable.dot_in(e.dot))
            .unwrap_or(self.entries.len());
        CausalLog {
            entries: self.entries.drain(..upto).collect(),
        }
    }

    /// Iterator over all retained entries, in arbitration order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &ScaleEntry> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Replicated for CausalLog {
    type Op = ScaleEntry;
    type Snapshot = Vec<ScaleEntry>;

    fn apply(&mut self, entry: ScaleEntry) -> bool {
        self.record(entry)
    }

    fn save(&self) -> Vec<ScaleEntry> {
        self.entries.clone()
    }

    fn load(mut entries: Vec<ScaleEntry>) -> Self {
        entries.sort_by_key(ScaleEntry::key);
        entries.dedup_by_key(|e| e.dot);
        Self { entries }
    }
}
