// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Simulation of replicas exchanging operations over a causal broadcast.
//!
//! [`Network`] models the transport: every operation is queued for every other replica and only
//! handed over once it is ready, in an order chosen by the caller. [`Ops`] is a
//! [`quickcheck::Arbitrary`] distributed trace over such a network, which can be used to check
//! that replicas converge to the value prescribed by the assignment-precedence rule no matter how
//! deliveries interleave.
use crate::{
    CausalTimestamp, Identifier, ScalingRegister,
    broadcast::{Op, Payload},
    crdts::NumericCell,
    observer::DummyObserver,
};
use quickcheck::{Arbitrary, Gen, TestResult};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use std::fmt;

/// A set of replicas of one register, together with their undelivered operations.
#[derive(Debug, Clone)]
pub struct Network {
    replicas: Vec<ScalingRegister>,
    /// Operations issued elsewhere that each replica has not delivered yet.
    inboxes: Vec<Vec<Op>>,
    /// Every operation issued so far, in issue order.
    issued: Vec<Op>,
    initial: f64,
}

impl Network {
    /// Creates `nodes` replicas starting from `initial`.
    pub fn new(nodes: u8, initial: f64) -> Self {
        Self {
            replicas: (0..nodes)
                .map(|node| ScalingRegister::new(Identifier::new(node, 0), initial))
                .collect(),
            inboxes: vec![Vec::new(); usize::from(nodes)],
            issued: Vec::new(),
            initial,
        }
    }

    pub fn ids(&self) -> Vec<Identifier> {
        self.replicas.iter().map(ScalingRegister::id).collect()
    }

    pub fn replicas(&self) -> &[ScalingRegister] {
        &self.replicas
    }

    pub fn replica(&self, at: usize) -> &ScalingRegister {
        &self.replicas[at]
    }

    pub fn set(&mut self, by: usize, value: f64) {
        let op = self.replicas[by].set(value, &mut DummyObserver);
        self.broadcast(by, op);
    }

    pub fn multiply(&mut self, by: usize, factor: f64) {
        if let Some(op) = self.replicas[by].multiply(factor, &mut DummyObserver) {
            self.broadcast(by, op);
        }
    }

    fn broadcast(&mut self, by: usize, op: Op) {
        for (i, inbox) in self.inboxes.iter_mut().enumerate() {
            if i != by {
                inbox.push(op.clone());
            }
        }
        self.issued.push(op);
    }

    fn ready(&self, to: usize) -> Vec<usize> {
        let replica = &self.replicas[to];
        self.inboxes[to]
            .iter()
            .enumerate()
            .filter(|(_, op)| replica.is_ready(op))
            .map(|(i, _)| i)
            .collect()
    }

    /// Delivers the `nth` (modulo the number of ready operations) ready operation to `to`.
    ///
    /// Returns false if `to` has nothing ready.
    pub fn deliver_nth_ready(&mut self, to: usize, nth: usize) -> bool {
        let ready = self.ready(to);
        if ready.is_empty() {
            return false;
        }
        let op = self.inboxes[to].remove(ready[nth % ready.len()]);
        self.replicas[to]
            .apply(&op, &mut DummyObserver)
            .expect("only ready operations are delivered");
        true
    }

    /// Delivers every pending operation, in an order picked by `rng` among those that are ready.
    pub fn flush(&mut self, rng: &mut impl Rng) {
        loop {
            let candidates: Vec<usize> = (0..self.replicas.len())
                .filter(|&to| !self.ready(to).is_empty())
                .collect();
            if candidates.is_empty() {
                break;
            }
            let to = candidates[rng.random_range(0..candidates.len())];
            let nth = rng.random_range(0..self.inboxes[to].len());
            self.deliver_nth_ready(to, nth);
        }
        assert!(
            self.inboxes.iter().all(Vec::is_empty),
            "causal broadcast got stuck: {:?}",
            self.inboxes
        );
    }

    /// Lets every replica discard its causally stable scalings.
    pub fn truncate_all(&mut self) -> usize {
        let ids = self.ids();
        self.replicas
            .iter_mut()
            .map(|replica| replica.truncate_stable(&ids))
            .sum()
    }

    /// The cells every replica must end up with once all issued operations are delivered,
    /// winner first.
    ///
    /// The value of each surviving assignment is scaled by every scaling outside its causal
    /// past, one at a time in arbitration order, regardless of delivery order.
    pub fn expected_cells(&self) -> Vec<f64> {
        let scalings = self.scalings();
        let assignments: Vec<_> = self
            .issued
            .iter()
            .filter_map(|op| match op.payload {
                Payload::Set(value) => Some((&op.timestamp, value)),
                Payload::Multiply(_) => None,
            })
            .collect();
        let mut live: Vec<_> = assignments
            .iter()
            .filter(|(ts, _)| {
                !assignments
                    .iter()
                    .any(|(other, _)| ts.happened_before(other))
            })
            .collect();
        live.sort_by(|a, b| b.0.cmp(a.0));

        live.into_iter()
            .map(|&(ts, value)| {
                scalings
                    .iter()
                    .filter(|(scaling, _)| !ts.context().dot_in(scaling.dot()))
                    .fold(value, |acc, (_, f)| acc * f)
            })
            .collect()
    }

    /// The value every replica must converge to once all issued operations are delivered.
    pub fn expected_value(&self) -> f64 {
        self.expected_cells().first().copied().unwrap_or_else(|| {
            self.scalings()
                .iter()
                .fold(self.initial, |acc, (_, f)| acc * f)
        })
    }

    /// Every issued scaling, in arbitration order.
    fn scalings(&self) -> Vec<(&CausalTimestamp, f64)> {
        let mut scalings: Vec<_> = self
            .issued
            .iter()
            .filter_map(|op| match op.payload {
                Payload::Multiply(f) => Some((&op.timestamp, f)),
                Payload::Set(_) => None,
            })
            .collect();
        scalings.sort_by(|a, b| a.0.cmp(b.0));
        scalings
    }
}

/// An action a replica can take during a trace.
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    /// Assign a small integer.
    Set(i8),
    /// Scale by 2 to the given power.
    Multiply(i8),
    /// Deliver the nth ready operation.
    Deliver(u8),
}

#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Step {
    by: u8,
    action: Action,
}

/// A distributed trace of assignments, scalings and deliveries across a handful of replicas.
///
/// Every step is legal in any prefix of the trace (a delivery with nothing ready does nothing),
/// so shrinking can drop steps freely.
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[derive(Debug, Clone)]
pub struct Ops {
    nodes: u8,
    steps: Vec<Step>,
}

impl Arbitrary for Ops {
    fn arbitrary(g: &mut Gen) -> Self {
        // no need to have more than 4 replicas for most interleavings
        let nodes = u8::arbitrary(g) % 4 + 1;
        let n = g.size().min(64);
        let steps = (0..n)
            .map(|_| {
                let by = u8::arbitrary(g) % nodes;
                let action = match u8::arbitrary(g) % 8 {
                    0 | 1 => Action::Set(i8::arbitrary(g) % 16),
                    2 | 3 => Action::Multiply(i8::arbitrary(g) % 3),
                    _ => Action::Deliver(u8::arbitrary(g)),
                };
                Step { by, action }
            })
            .collect();
        Self { nodes, steps }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        if self.steps.is_empty() {
            return quickcheck::empty_shrinker();
        }
        Box::new(OpsShrinker {
            seed: self.clone(),
            size: 0,
            skip: 0,
        })
    }
}

impl fmt::Display for Ops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} replicas", self.nodes)?;
        for (i, step) in self.steps.iter().enumerate() {
            if i != 0 && i % 10 == 0 {
                writeln!(f, "--- {i} ---")?;
            }
            let by = step.by;
            match step.action {
                Action::Set(v) => writeln!(f, " -> @{by}.0 sets {v}")?,
                Action::Multiply(e) => writeln!(f, " -> @{by}.0 scales by 2^{e}")?,
                Action::Deliver(n) => writeln!(f, " -> @{by}.0 delivers #{n}")?,
            }
        }
        Ok(())
    }
}

impl Ops {
    /// Runs the trace, then delivers everything still pending in an order derived from `seed`,
    /// and checks that every replica converged to the expected state.
    ///
    /// If `truncate` is set, replicas discard their causally stable scalings after every step.
    pub fn check_convergence(&self, seed: u64, truncate: bool) -> TestResult {
        eprintln!("\n:: Running test case:");
        eprint!("{self}");

        let mut net = Network::new(self.nodes, 1.0);
        for step in &self.steps {
            let by = usize::from(step.by);
            match step.action {
                Action::Set(v) => net.set(by, f64::from(v)),
                Action::Multiply(e) => net.multiply(by, 2f64.powi(i32::from(e))),
                Action::Deliver(n) => {
                    net.deliver_nth_ready(by, usize::from(n));
                }
            }
            if truncate {
                net.truncate_all();
            }
        }
        net.flush(&mut SmallRng::seed_from_u64(seed));
        if truncate {
            net.truncate_all();
        }

        let expected_value = net.expected_value();
        let expected_cells = net.expected_cells();
        let reference = net.replica(0);
        for replica in net.replicas() {
            let cells: Vec<f64> = replica
                .winner()
                .into_iter()
                .chain(replica.conflicts())
                .map(NumericCell::value)
                .collect();
            // bitwise, since replicas must agree exactly even on overflow
            let bits = |values: &[f64]| values.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
            if replica.value().to_bits() != expected_value.to_bits()
                || bits(&cells) != bits(&expected_cells)
                || replica.context() != reference.context()
            {
                eprintln!(
                    "replica {:?} has {} ({cells:?}), expected {expected_value} ({expected_cells:?})",
                    replica.id(),
                    replica.value(),
                );
                return TestResult::failed();
            }
        }
        TestResult::passed()
    }
}

/// Produces shorter versions of an [`Ops`]: first every power-of-two prefix, then the trace with
/// each single step left out.
struct OpsShrinker {
    seed: Ops,
    size: usize,
    skip: usize,
}

impl Iterator for OpsShrinker {
    type Item = Ops;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.seed.steps.len();
        if self.size < len {
            let steps = self.seed.steps[..self.size].to_vec();
            self.size = if self.size == 0 { 1 } else { self.size * 2 };
            return Some(Ops {
                nodes: self.seed.nodes,
                steps,
            });
        }
        if self.skip < len {
            let mut steps = self.seed.steps.clone();
            steps.remove(self.skip);
            self.skip += 1;
            return Some(Ops {
                nodes: self.seed.nodes,
                steps,
            });
        }
        None
    }
}
