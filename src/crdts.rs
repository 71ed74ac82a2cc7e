// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The replicated building blocks of a [`ScalingRegister`](crate::ScalingRegister).
//!
//! - [`NumericCell`]: a scalar that only ever receives multiplicative factors.
//! - [`VersionedSlot`]: a last-writer-wins register of [`NumericCell`]s that retains
//!   concurrently assigned cells as conflicts.
//! - [`CausalLog`]: the record of every delivered scaling, used to compute the factor a newly
//!   assigned cell must absorb.
//!
//! Each of them implements [`Replicated`], and the register composes them by exclusive
//! ownership.

pub mod cell;
pub mod log;
pub mod slot;

#[cfg(any(test, feature = "arbitrary"))]
pub mod test_util;

pub use cell::NumericCell;
pub use log::{CausalLog, ScaleEntry};
pub use slot::{SlotOp, VersionedSlot};

/// A component whose state evolves only through delivered operations.
///
/// All replicas that apply the same set of operations, in any causally consistent order, end up
/// in the same state.
pub trait Replicated: Sized {
    /// The operation this component consumes.
    type Op;

    /// The durable representation of this component.
    type Snapshot;

    /// Applies a delivered operation.
    ///
    /// Returns `true` if the state of `self` changed as a result.
    fn apply(&mut self, op: Self::Op) -> bool;

    /// Captures the current state of `self`.
    fn save(&self) -> Self::Snapshot;

    /// Restores a component from a state captured with [`Replicated::save`].
    fn load(snapshot: Self::Snapshot) -> Self;
}
