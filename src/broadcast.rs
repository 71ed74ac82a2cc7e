// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Causal metadata for disseminated operations.
//!
//! The transport that carries operations between replicas is not part of this crate. It is
//! required to deliver every operation exactly once to every replica, and never before any
//! operation in its causal past. The [`Broadcaster`] is the per-replica half of that contract:
//! it mints the [`CausalTimestamp`] of each local operation, and checks and records the
//! timestamps of delivered operations.
//!
//! Local operations are delivered to the issuing replica through the very same path as remote
//! ones (a loopback delivery), so that sender and receivers run identical logic.
use crate::{CausalContext, CausalTimestamp, Dot, Identifier};
use std::fmt;

/// An operation on a [`ScalingRegister`](crate::ScalingRegister), as exchanged between
/// replicas.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[must_use = "operations should be sent to the other replicas"]
pub struct Op {
    pub timestamp: CausalTimestamp,
    pub payload: Payload,
}

/// What an [`Op`] does.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum Payload {
    /// Assigns an absolute value, superseding every scaling in its causal past.
    Set(f64),
    /// Scales the value by a factor.
    Multiply(f64),
}

/// Error returned when an operation is delivered before it may be.
///
/// This indicates a transport that does not honor causal delivery. The operation has not been
/// applied and may be delivered again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// An earlier operation from the same actor has not been delivered yet.
    OutOfOrder { dot: Dot, expected: Dot },
    /// An operation in the causal past of `dot` has not been delivered yet.
    MissingDependencies { dot: Dot },
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::OutOfOrder { dot, expected } => {
                write!(f, "operation {dot:?} delivered before {expected:?}")
            }
            DeliveryError::MissingDependencies { dot } => {
                write!(f, "operation {dot:?} delivered before its causal past")
            }
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Outcome of a successful [`Broadcaster::receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The operation is new and has been recorded.
    Fresh,
    /// The operation had already been delivered, and should be ignored.
    Duplicate,
}

/// The causal clock of a single replica.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct Broadcaster {
    id: Identifier,
    delivered: CausalContext,
    lamport: u64,
    /// For each remote actor, what it had delivered when it issued the latest of its operations
    /// delivered here, that operation included.
    heard: ahash::HashMap<Identifier, CausalContext>,
}

impl Broadcaster {
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            delivered: CausalContext::new(),
            lamport: 0,
            heard: Default::default(),
        }
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    /// Every operation delivered to this replica so far.
    pub fn delivered(&self) -> &CausalContext {
        &self.delivered
    }

    /// Tags `payload` with a fresh timestamp.
    ///
    /// The returned operation must be delivered locally (through [`Broadcaster::receive`])
    /// before the next call to `send`.
    pub fn send(&self, payload: Payload) -> Op {
        let dot = self.delivered.next_dot_for(self.id);
        Op {
            timestamp: CausalTimestamp::new(
                dot,
                self.lamport.saturating_add(1),
                self.delivered.clone(),
            ),
            payload,
        }
    }

    /// True if the operation at `timestamp` may be delivered now.
    pub fn is_ready(&self, timestamp: &CausalTimestamp) -> bool {
        self.check_ready(timestamp).is_ok()
    }

    fn check_ready(&self, timestamp: &CausalTimestamp) -> Result<(), DeliveryError> {
        let dot = timestamp.dot();
        let expected = self.delivered.next_dot_for(dot.actor());
        if expected != dot {
            return Err(DeliveryError::OutOfOrder { dot, expected });
        }
        let past = timestamp.context();
        if past
            .actors()
            .any(|actor| past.get(actor) > self.delivered.get(actor))
        {
            return Err(DeliveryError::MissingDependencies { dot });
        }
        Ok(())
    }

    /// Records the delivery of the operation at `timestamp`.
    ///
    /// Delivering an operation twice violates the transport contract. In debug builds this
    /// panics; otherwise the repeated delivery is reported as [`Delivery::Duplicate`] and
    /// nothing is recorded.
    pub fn receive(&mut self, timestamp: &CausalTimestamp) -> Result<Delivery, DeliveryError> {
        let dot = timestamp.dot();
        if self.delivered.dot_in(dot) {
            debug_assert!(false, "operation {dot:?} delivered twice");
            tracing::debug!(?dot, "ignoring repeated delivery");
            return Ok(Delivery::Duplicate);
        }
        self.check_ready(timestamp)?;

        self.delivered.insert_next_dot(dot);
        self.lamport = self.lamport.max(timestamp.lamport());
        if dot.actor() != self.id {
            let mut seen = timestamp.context().clone();
            seen.union(&[(dot.actor(), dot.sequence().get())].into_iter().collect());
            self.heard.insert(dot.actor(), seen);
        }
        Ok(Delivery::Fresh)
    }

    /// Computes the operations that are in the causal past of every operation this replica may
    /// still deliver from any of `replicas`.
    ///
    /// `replicas` must list every replica that takes part in the register, this one included or
    /// not. A replica that has never been heard from makes nothing stable, since it may still
    /// issue an operation concurrent with anything.
    pub fn stable_frontier(&self, replicas: &[Identifier]) -> CausalContext {
        let mut frontier: Option<CausalContext> = None;
        for &replica in replicas {
            let known = if replica == self.id {
                &self.delivered
            } else {
                match self.heard.get(&replica) {
                    Some(known) => known,
                    None => return CausalContext::new(),
                }
            };
            frontier = Some(match frontier {
                Some(f) => f.meet(known),
                None => known.meet(&self.delivered),
            });
        }
        frontier.unwrap_or_default()
    }
}
