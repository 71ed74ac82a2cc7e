// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{CausalLog, Replicated};
use crate::{CausalContext, CausalTimestamp};

/// A scalar that accumulates the multiplicative factors it receives.
///
/// A cell is never reassigned after creation; its value only changes by scaling. The value is
/// always the cell's base multiplied by its factors one at a time, in arbitration order. Factors
/// newer than all others are applied directly through [`NumericCell::apply`]. A factor that sorts
/// before some already applied one requires a [`NumericCell::refold`] from the base.
///
/// Cells created by an assignment remember the [`CausalTimestamp`] of that assignment in
/// [`NumericCell::born`]. The register's initial cell has no such timestamp.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct NumericCell {
    base: f64,
    value: f64,
    born: Option<CausalTimestamp>,
}

impl std::fmt::Debug for NumericCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.born {
            Some(born) => write!(f, "{:?}@{born:?}", self.value),
            None => write!(f, "{:?}@initial", self.value),
        }
    }
}

impl NumericCell {
    /// Creates the initial cell of a register, which exists before any assignment.
    pub fn new(value: f64) -> Self {
        Self {
            base: value,
            value,
            born: None,
        }
    }

    /// Creates the cell for the assignment at `born`.
    pub fn born_at(value: f64, born: CausalTimestamp) -> Self {
        Self {
            base: value,
            value,
            born: Some(born),
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// The assignment that created this cell, or `None` for the initial cell.
    pub fn born(&self) -> Option<&CausalTimestamp> {
        self.born.as_ref()
    }

    /// The scalings that must not affect this cell. The initial cell has none.
    fn past(&self) -> Option<&CausalContext> {
        self.born.as_ref().map(CausalTimestamp::context)
    }

    /// Recomputes the value from the base and every scaling in `log` that is not in the causal
    /// past of this cell.
    ///
    /// Returns true if the value changed.
    pub fn refold(&mut self, log: &CausalLog) -> bool {
        let value = log.fold(self.base, self.past());
        let changed = value.to_bits() != self.value.to_bits();
        self.value = value;
        changed
    }

    /// Folds the scalings of `stable` that affect this cell into its base.
    ///
    /// `stable` must be a prefix of the log this cell is folded over, see
    /// [`CausalLog::truncate_stable`]. The value is unchanged.
    pub fn rebase(&mut self, stable: &CausalLog) {
        self.base = stable.fold(self.base, self.past());
    }

    /// Encodes the value as 8 little-endian bytes.
    ///
    /// Only the value is retained. The decoded cell uses it as its base.
    pub fn to_bytes(&self) -> [u8; 8] {
        self.value.to_le_bytes()
    }

    /// Decodes a cell encoded with [`NumericCell::to_bytes`].
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self::new(f64::from_le_bytes(bytes))
    }
}

impl Replicated for NumericCell {
    /// A scaling factor that sorts after every factor the cell has received.
    type Op = f64;
    type Snapshot = f64;

    fn apply(&mut self, factor: f64) -> bool {
        // a factor of 1 is legal and must not disturb the value, not even a NaN payload.
        if factor == 1.0 {
            return false;
        }
        self.value *= factor;
        true
    }

    fn save(&self) -> f64 {
        self.value
    }

    fn load(value: f64) -> Self {
        Self::new(value)
    }
}
