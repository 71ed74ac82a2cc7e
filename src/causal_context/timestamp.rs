// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{CausalContext, Dot, Identifier};
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

/// The causal metadata attached to every operation.
///
/// A timestamp supports two different comparisons:
///
/// - the _happened-before_ partial order ([`CausalTimestamp::happened_before`]), which is
///   derived from the causal past carried in [`CausalTimestamp::context`], and
/// - the _arbitration_ total order ([`Ord`]), which orders by Lamport clock and breaks ties on
///   the issuing actor. It is identical at every replica and extends happened-before: if `a`
///   happened before `b` then `a < b`.
///
/// Two timestamps are equal iff they denote the same operation, that is, iff their [`Dot`]s
/// are equal.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct CausalTimestamp {
    dot: Dot,
    lamport: u64,
    context: CausalContext,
}

impl fmt::Debug for CausalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.dot, self.lamport)
    }
}

impl CausalTimestamp {
    /// Assembles a timestamp from its parts.
    ///
    /// Timestamps are normally minted by a [`Broadcaster`](crate::broadcast::Broadcaster); this
    /// constructor exists for transports that decode them from the wire, and for tests.
    pub fn new(dot: Dot, lamport: u64, context: CausalContext) -> Self {
        debug_assert!(
            !context.dot_in(dot),
            "an operation cannot be in its own causal past"
        );
        Self {
            dot,
            lamport,
            context,
        }
    }

    pub fn dot(&self) -> Dot {
        self.dot
    }

    pub fn actor(&self) -> Identifier {
        self.dot.actor()
    }

    pub fn lamport(&self) -> u64 {
        self.lamport
    }

    /// The operations the issuer had delivered when it issued this one.
    pub fn context(&self) -> &CausalContext {
        &self.context
    }

    /// True if `self` is in the causal past of `other`.
    pub fn happened_before(&self, other: &CausalTimestamp) -> bool {
        other.context.dot_in(self.dot)
    }

    /// True if neither operation happened before the other.
    pub fn concurrent_with(&self, other: &CausalTimestamp) -> bool {
        self.dot != other.dot && !self.happened_before(other) && !other.happened_before(self)
    }

    /// The key used to order operations during arbitration.
    pub(crate) fn arbitration_key(&self) -> (u64, Dot) {
        (self.lamport, self.dot)
    }
}

impl PartialEq for CausalTimestamp {
    fn eq(&self, other: &Self) -> bool {
        self.dot == other.dot
    }
}

impl Eq for CausalTimestamp {}

impl Hash for CausalTimestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dot.hash(state);
    }
}

impl PartialOrd for CausalTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CausalTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        // lamport first; a given actor never issues two operations with the same lamport
        // value, so the dot only matters for operations from different actors.
        self.arbitration_key().cmp(&other.arbitration_key())
    }
}
