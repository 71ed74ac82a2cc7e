// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Causal Context
//!
//! This module provides the data structures used to track causality between the operations
//! applied to a replicated register.
//!
//! - **[`Identifier`]**: A unique identifier for an actor (replica) in the system. It consists of
//!   a node id and an application id so that several applications on the same node can act as
//!   independent replicas.
//!
//! - **[`Dot`]**: A globally unique identifier for a single operation. It consists of an
//!   `Identifier` and a sequence number that is monotonically increasing for that actor.
//!
//! - **[`CausalContext`]**: The set of operations a replica has delivered. Since the transport
//!   delivers operations in causal order, the delivered operations of every actor always form a
//!   contiguous prefix `1..=n`, so the context is stored as a version vector mapping each actor
//!   to its highest delivered sequence number.
//!
//! - **[`CausalTimestamp`]**: The metadata attached to every operation: its [`Dot`], a Lamport
//!   clock used for arbitration, and the [`CausalContext`] the sender had delivered when it
//!   issued the operation (ie, the operation's causal past).
use std::{
    cmp::Ordering,
    collections::{BTreeMap, btree_map::Entry},
    fmt,
    num::NonZeroU64,
};

mod timestamp;
pub use timestamp::CausalTimestamp;

/// The identifier we choose to use for actors in the system.
///
/// It is composed of a node identifier and an application identifier, packed into a single
/// `u32` so that it is cheap to copy and serializes as a plain integer (which also lets it be
/// used as a map key in self-describing formats like JSON).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[repr(transparent)]
pub struct Identifier {
    /// ```text
    ///  0      7 8               23 24      31
    /// +--------+------------------+--------+
    /// |   N    |        A         | unused |
    /// +--------+------------------+--------+
    /// ```
    ///
    /// Bit 0 is the most significant bit in the diagram above.
    bits: u32,
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}.{}", self.node(), self.app())
    }
}

impl From<(u8, u16)> for Identifier {
    fn from((node, application): (u8, u16)) -> Self {
        Identifier::new(node, application)
    }
}

impl PartialEq<(u8, u16)> for Identifier {
    fn eq(&self, &(node, application): &(u8, u16)) -> bool {
        self == &Identifier::new(node, application)
    }
}

impl Identifier {
    /// Constructs a new Identifier for the given node-application pair.
    pub const fn new(node: u8, application: u16) -> Self {
        Self {
            bits: ((node as u32) << 24) | ((application as u32) << 8),
        }
    }

    pub const fn node(&self) -> u8 {
        (self.bits >> 24) as u8
    }

    pub const fn app(&self) -> u16 {
        ((self.bits >> 8) & 0xffff) as u16
    }

    pub const fn bits(&self) -> u32 {
        self.bits
    }
}

/// A unique identifier for an operation.
///
/// Every operation on a register is assigned a `Dot`: the identifier of the replica that issued
/// it together with that replica's ever-increasing sequence number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct Dot(Identifier, NonZeroU64);

impl fmt::Debug for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}, {})", self.0, self.1)
    }
}

impl<I> From<(I, NonZeroU64)> for Dot
where
    I: Into<Identifier>,
{
    fn from((id, seq): (I, NonZeroU64)) -> Self {
        Self(id.into(), seq)
    }
}

impl PartialEq<(Identifier, u64)> for Dot {
    fn eq(&self, other: &(Identifier, u64)) -> bool {
        self.0 == other.0 && self.1.get() == other.1
    }
}

impl Dot {
    /// Creates a new [`Dot`] out of thin air.
    ///
    /// All real dots should be made through the use of a [`CausalContext`].
    /// This constructor is mainly useful for tests and documentation examples.
    ///
    /// # Panics
    ///
    /// If `seq == 0`.
    pub const fn mint(id: Identifier, seq: u64) -> Self {
        Self(
            id,
            if let Some(seq) = NonZeroU64::new(seq) {
                seq
            } else {
                panic!("attempted to construct Dot for 0th sequence number");
            },
        )
    }

    /// Returns the [`Identifier`] of the actor that produced this [`Dot`].
    pub fn actor(&self) -> Identifier {
        self.0
    }

    /// Returns the sequence number (ie, per-actor operation index) of this [`Dot`].
    pub fn sequence(&self) -> NonZeroU64 {
        self.1
    }
}

/// Tracks the operations delivered from each actor in the system.
///
/// # Examples
///
/// ```rust
/// # use scalereg::{CausalContext, Dot, Identifier};
/// let id = Identifier::new(0, 0);
/// let mut cause = CausalContext::new();
///
/// // The causal context can be used to produce new dots:
/// let dot1 = cause.next_dot_for(id);
/// // New dots are not implicitly absorbed:
/// assert_eq!(cause.next_dot_for(id), dot1);
/// // You must explicitly add them to generate newer dots:
/// cause.insert_next_dot(dot1);
/// let dot2 = cause.next_dot_for(id);
/// assert_ne!(dot1, dot2);
///
/// assert_eq!(dot1, (id, 1));
/// assert!(cause.dot_in(dot1));
/// assert!(!cause.dot_in(dot2));
/// ```
#[derive(Default, Clone)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct CausalContext {
    dots: BTreeMap<Identifier, NonZeroU64>,
}

impl fmt::Debug for CausalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.dots.iter().map(|(id, seq)| (id, seq.get())))
            .finish()
    }
}

impl CausalContext {
    /// Constructs a new, empty [`CausalContext`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Produces the next unused [`Dot`] for this actor.
    pub fn next_dot_for(&self, id: Identifier) -> Dot {
        let next = self
            .dots
            .get(&id)
            .map_or(NonZeroU64::MIN, |seq| seq.saturating_add(1));
        Dot(id, next)
    }

    /// Returns the highest delivered sequence number for `id`, if any.
    pub fn get(&self, id: Identifier) -> Option<NonZeroU64> {
        self.dots.get(&id).copied()
    }

    /// Determines if the given `dot` is in the current causal context.
    #[must_use]
    pub fn dot_in(&self, dot: Dot) -> bool {
        self.dots
            .get(&dot.actor())
            .is_some_and(|&seq| dot.sequence() <= seq)
    }

    /// True if `dot` is exactly the next operation expected from its actor.
    pub fn is_next(&self, dot: Dot) -> bool {
        self.next_dot_for(dot.actor()) == dot
    }

    /// Records the next [`Dot`] of an actor in the causal context.
    ///
    /// # Panics
    ///
    /// If `dot` is not the successor of the last recorded dot for its actor.
    pub fn insert_next_dot(&mut self, dot: Dot) {
        match self.dots.entry(dot.actor()) {
            Entry::Vacant(v) => {
                assert_eq!(dot.sequence(), NonZeroU64::MIN);
                v.insert(dot.sequence());
            }
            Entry::Occupied(mut o) => {
                assert_eq!(dot.sequence().get(), o.get().get() + 1);
                o.insert(dot.sequence());
            }
        }
    }

    /// Incorporates the observations from another causal context into this one.
    ///
    /// After the `union`, all [`Dot`]s known to `other` will be considered observed by `self`.
    pub fn union(&mut self, other: &CausalContext) {
        for (&id, &seq) in &other.dots {
            self.dots
                .entry(id)
                .and_modify(|ours| *ours = (*ours).max(seq))
                .or_insert(seq);
        }
    }

    /// Returns the dots observed by both `self` and `other`.
    pub fn meet(&self, other: &CausalContext) -> CausalContext {
        let dots = self
            .dots
            .iter()
            .filter_map(|(id, &ours)| other.dots.get(id).map(|&theirs| (*id, ours.min(theirs))))
            .collect();
        Self { dots }
    }

    /// Iterator over all the dots that the context holds.
    pub fn dots(&self) -> impl Iterator<Item = Dot> + '_ {
        self.dots
            .iter()
            .flat_map(|(&id, seq)| (1..=seq.get()).map(move |seq| Dot::mint(id, seq)))
    }

    /// Iterator over the actors with at least one delivered operation.
    pub fn actors(&self) -> impl Iterator<Item = Identifier> + '_ {
        self.dots.keys().copied()
    }

    /// True if there are no dots in this causal context.
    pub fn is_empty(&self) -> bool {
        self.dots.is_empty()
    }

    /// Return the total number of dots.
    #[must_use]
    pub fn dot_count(&self) -> u64 {
        self.dots.values().map(|seq| seq.get()).sum()
    }

    /// Returns the happens-after ordering between `self` and `other`.
    ///
    /// Specifically, returns:
    ///
    /// - `Some(Ordering::Equal)` if `self` == `other`
    /// - `Some(Ordering::Less)` if `other` happens-after `self`
    /// - `Some(Ordering::Greater)` if `self` happens-after `other`
    /// - `None` if there is no happens-after relationship between `self` and `other`
    pub fn partial_cmp_dots(&self, other: &CausalContext) -> Option<Ordering> {
        let mut ours = self.dots.iter().peekable();
        let mut theirs = other.dots.iter().peekable();
        let (mut o_unique, mut t_unique) = (false, false);
        loop {
            if o_unique && t_unique {
                return None;
            }
            match (ours.peek(), theirs.peek()) {
                (None, None) => break,
                (None, Some(_)) => {
                    t_unique = true;
                    break;
                }
                (Some(_), None) => {
                    o_unique = true;
                    break;
                }
                (Some((o_id, o_seq)), Some((t_id, t_seq))) => match o_id.cmp(t_id) {
                    Ordering::Equal => {
                        match o_seq.cmp(t_seq) {
                            Ordering::Equal => (),
                            Ordering::Less => t_unique = true,
                            Ordering::Greater => o_unique = true,
                        }
                        ours.next();
                        theirs.next();
                    }
                    Ordering::Less => {
                        // we have dots for an identifier they don't
                        o_unique = true;
                        ours.next();
                    }
                    Ordering::Greater => {
                        t_unique = true;
                        theirs.next();
                    }
                },
            }
        }
        match (o_unique, t_unique) {
            (true, true) => None,
            (true, false) => Some(Ordering::Greater),
            (false, true) => Some(Ordering::Less),
            (false, false) => Some(Ordering::Equal),
        }
    }

    /// Returns true if `self` _happens-after_ `other`.
    pub fn after(&self, other: &CausalContext) -> bool {
        self.partial_cmp_dots(other) == Some(Ordering::Greater)
    }

    /// Returns true if `self` _happens-before_ `other`.
    pub fn happened_before(&self, other: &CausalContext) -> bool {
        other.partial_cmp_dots(self) == Some(Ordering::Greater)
    }
}

impl PartialEq for CausalContext {
    fn eq(&self, other: &Self) -> bool {
        self.dots == other.dots
    }
}

impl Eq for CausalContext {}

impl PartialOrd for CausalContext {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.partial_cmp_dots(other)
    }
}

impl FromIterator<(Identifier, u64)> for CausalContext {
    /// Builds a version vector from `(actor, highest sequence)` pairs; zero entries are skipped.
    fn from_iter<T: IntoIterator<Item = (Identifier, u64)>>(iter: T) -> Self {
        let mut cc = Self::new();
        for (id, seq) in iter {
            if let Some(seq) = NonZeroU64::new(seq) {
                cc.dots
                    .entry(id)
                    .and_modify(|ours| *ours = (*ours).max(seq))
                    .or_insert(seq);
            }
        }
        cc
    }
}

#[cfg(any(test, feature = "arbitrary"))]
impl quickcheck::Arbitrary for Identifier {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        // a handful of nodes is enough to exercise every interesting interleaving
        Identifier::new(u8::arbitrary(g) % 8, u16::arbitrary(g) % 4)
    }
}

#[cfg(any(test, feature = "arbitrary"))]
impl quickcheck::Arbitrary for Dot {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Dot::mint(Identifier::arbitrary(g), u64::from(u8::arbitrary(g)) + 1)
    }
}
