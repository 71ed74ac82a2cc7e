// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Observe changes to a register.
//!
//! Observers are handed to every operation on a [`ScalingRegister`](crate::ScalingRegister) and
//! are told about the effect of that operation. Exactly one [`Change`] is reported per
//! delivered operation that had an effect, no matter how many cells it touched internally.
//!
//! Observers cannot reject a change: delivered operations must take effect at every replica for
//! the replicas to converge.
use crate::Dot;

/// The observable effect of a single delivered operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Change {
    /// True if the operation was issued by this replica.
    pub is_local: bool,
    /// The operation that caused the change.
    pub cause: Dot,
    /// The register's value before the operation.
    pub previous: f64,
    /// The register's value after the operation.
    pub value: f64,
}

impl Change {
    /// True if the visible value is different after the change.
    ///
    /// A change can leave the value as it was, for example when assigning the current value or
    /// when the winning cell stays the same while a conflicting cell is scaled.
    pub fn value_changed(&self) -> bool {
        self.previous.to_bits() != self.value.to_bits()
    }
}

/// Observes the changes applied to a register.
#[expect(unused_variables)]
pub trait Observer {
    /// Called once for every delivered operation that had an effect.
    fn changed(&mut self, change: &Change) {}
}

impl<F> Observer for F
where
    F: FnMut(&Change),
{
    fn changed(&mut self, change: &Change) {
        self(change)
    }
}

/// An Observer that does nothing.
///
/// This is useful when the caller has no interest in change notifications. Using it helps the
/// compiler optimise some code away.
pub struct DummyObserver;

impl Observer for DummyObserver {}

/// An Observer that records every change it is told about.
///
/// This is mostly useful for tests.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub changes_seen: Vec<Change>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Observer for RecordingObserver {
    fn changed(&mut self, change: &Change) {
        self.changes_seen.push(*change);
    }
}
