// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # scalereg: A Replicated Register with Assignment and Scaling
//!
//! This crate provides an operation-based replicated register holding a single number, which
//! every replica may concurrently **assign** (`set`) and **scale** (`multiply`).
//!
//! Assignment and scaling do not commute: applying "set 4" and "multiply by 2" in different
//! orders yields 4 or 8. Rather than letting one operation type silently discard the other, the
//! register follows the _semidirect product_ construction: a scaling affects every assignment it
//! is concurrent with, and assignments issued after a scaling was observed are unaffected by it.
//! Concurrent assignments are resolved by a replica-independent arbitration order.
//!
//! ## Core Concepts
//!
//! The register is built from three replicated components, found in [`crdts`]:
//!
//! - [`NumericCell`]: a scalar that only ever receives multiplicative factors. Every assignment
//!   creates a fresh cell.
//! - [`VersionedSlot`]: a last-writer-wins register of cells. Concurrently assigned cells that
//!   lose arbitration are retained as conflicts, and are scaled like the winner.
//! - [`CausalLog`]: a record of every delivered scaling, in arbitration order. When an
//!   assignment is delivered, the new cell immediately absorbs every logged scaling that is not
//!   in the assignment's causal past.
//!
//! This combination guarantees that every scaling concurrent with or after an assignment reaches
//! that assignment's cell exactly once at every replica, whatever the delivery order.
//!
//! ### Dots and Causality
//!
//! Every operation is identified by a [`Dot`]: the [`Identifier`] of the replica that issued it
//! together with that replica's sequence number. Operations carry a [`CausalTimestamp`], made of
//! their dot, a Lamport clock value and the [`CausalContext`] the sender had delivered when
//! issuing them (ie, their causal past). Two operations are concurrent if neither is in the
//! causal past of the other.
//!
//! ## Scope of this Crate
//!
//! **It does not include any networking protocols.**
//!
//! Operations returned by [`ScalingRegister::set`] and [`ScalingRegister::multiply`] must be
//! broadcast by you to every other replica, and delivered there through
//! [`ScalingRegister::apply`]. The correctness of this crate relies on the transport delivering
//! every operation exactly once, and never before the operations in its causal past.
//! [`ScalingRegister::is_ready`] tells whether an operation may be delivered yet, which makes
//! buffering in a causal broadcast layer straightforward.
//!
//! ## Getting Started
//!
//! ```rust
//! use scalereg::{Identifier, ScalingRegister, observer::RecordingObserver};
//!
//! let mut alice = ScalingRegister::new(Identifier::new(0, 0), 10.0);
//! let mut bob = ScalingRegister::new(Identifier::new(1, 0), 10.0);
//!
//! // bob scales and alice learns about it before assigning
//! let triple = bob.multiply(3.0, &mut RecordingObserver::new()).unwrap();
//! alice.apply(&triple, &mut RecordingObserver::new()).unwrap();
//! assert_eq!(alice.value(), 30.0);
//!
//! let set = alice.set(5.0, &mut RecordingObserver::new());
//! // meanwhile, bob halves
//! let half = bob.multiply(0.5, &mut RecordingObserver::new()).unwrap();
//!
//! let mut changes = RecordingObserver::new();
//! alice.apply(&half, &mut changes).unwrap();
//! bob.apply(&set, &mut changes).unwrap();
//!
//! // the tripling was observed by the assignment, the halving was concurrent with it
//! assert_eq!(alice.value(), 2.5);
//! assert_eq!(bob.value(), 2.5);
//! assert_eq!(changes.changes_seen.len(), 2);
//! ```
//!
//! ## Metadata Growth
//!
//! The [`CausalLog`] grows with every scaling. Once a scaling is in the causal past of every
//! operation a replica can still receive, it is no longer needed; replicas that know the full set
//! of participants can discard such entries with [`ScalingRegister::truncate_stable`].
//!
//! ## Floating Point
//!
//! Multiplication of floating point numbers is not associative: once an intermediate product
//! overflows or underflows, the order of the factors decides the result. Every cell therefore
//! multiplies its factors one at a time in arbitration order, re-folding from its assigned value
//! when a scaling arrives that sorts before one it already received. Replicas that delivered the
//! same operations hold bit-identical values, with or without truncation.
//!
//! ## License
//!
//! This project is licensed under either of
//!
//! - Apache License, Version 2.0, ([LICENSE-APACHE](LICENSE-APACHE) or http://www.apache.org/licenses/LICENSE-2.0)
//! - MIT license ([LICENSE-MIT](LICENSE-MIT) or http://opensource.org/licenses/MIT)
//!
//! at your option.
//!
//! ## Features
//!
//! - `json`: Enables conversion of registers to and from `serde_json::Value`. This feature is
//!   enabled by default.
//! - `serde`: Provides `serde` support for all replicated state and operations.
//! - `arbitrary`: Implements `quickcheck::Arbitrary` for identifiers, dots and distributed
//!   operation traces, useful for property-based testing.
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

pub mod causal_context;
pub use causal_context::{CausalContext, CausalTimestamp, Dot, Identifier};
pub mod broadcast;
pub use broadcast::{DeliveryError, Op, Payload};
pub mod crdts;
pub use crdts::{CausalLog, NumericCell, Replicated, VersionedSlot};
#[cfg(feature = "json")]
mod json;
/// Macros usable for tests and initialization
pub mod macros;
pub mod observer;
pub use observer::{Change, Observer};
pub mod register;
pub use register::{RegisterSnapshot, ScalingRegister};
