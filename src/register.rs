// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use crate::{
    CausalContext, Identifier,
    broadcast::{Broadcaster, Delivery, DeliveryError, Op, Payload},
    crdts::{CausalLog, NumericCell, Replicated, ScaleEntry, SlotOp, VersionedSlot},
    observer::{Change, Observer},
};

/// A replicated number that supports both assignment and scaling.
///
/// The register composes three replicated components:
///
/// - an initial [`NumericCell`], representing the value before any assignment,
/// - a [`VersionedSlot`] holding one cell per live assignment, and
/// - a [`CausalLog`] of every delivered scaling.
///
/// An assignment ([`ScalingRegister::set`]) creates a new cell in the slot, which immediately
/// absorbs every already-delivered scaling that is concurrent with the assignment. A scaling
/// ([`ScalingRegister::multiply`]) is recorded in the log and applied to every live cell. As a
/// result, a scaling affects every assignment it is concurrent with, but never an assignment
/// issued after the scaling was observed.
///
/// Every cell multiplies its factors in arbitration order, so replicas that delivered the same
/// operations hold bit-identical values, even when intermediate products overflow.
///
/// ```rust
/// use scalereg::{Identifier, ScalingRegister, observer::DummyObserver};
///
/// let mut alice = ScalingRegister::new(Identifier::new(0, 0), 1.0);
/// let mut bob = ScalingRegister::new(Identifier::new(1, 0), 1.0);
///
/// // alice assigns while bob concurrently doubles
/// let set = alice.set(4.0, &mut DummyObserver);
/// let double = bob.multiply(2.0, &mut DummyObserver).expect("2 is not a unit factor");
///
/// alice.apply(&double, &mut DummyObserver).unwrap();
/// bob.apply(&set, &mut DummyObserver).unwrap();
///
/// // the concurrent doubling applies to the assignment at both replicas
/// assert_eq!(alice.value(), 8.0);
/// assert_eq!(bob.value(), 8.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingRegister {
    clock: Broadcaster,
    initial: NumericCell,
    slot: VersionedSlot,
    log: CausalLog,
}

/// The durable state of a [`ScalingRegister`].
///
/// Restoring a snapshot yields a replica that continues exactly where the original left off,
/// including arbitration against assignments it has not yet delivered and the catch-up of
/// those assignments.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct RegisterSnapshot {
    pub clock: Broadcaster,
    pub initial: NumericCell,
    pub cells: Vec<NumericCell>,
    pub log: Vec<ScaleEntry>,
}

impl ScalingRegister {
    /// Creates the replica `id` of a register whose value is `initial` before any assignment.
    ///
    /// All replicas of a register must agree on `initial`.
    pub fn new(id: Identifier, initial: f64) -> Self {
        Self {
            clock: Broadcaster::new(id),
            initial: NumericCell::new(initial),
            slot: VersionedSlot::new(),
            log: CausalLog::new(),
        }
    }

    pub fn id(&self) -> Identifier {
        self.clock.id()
    }

    /// The current value: that of the winning assignment, or of the scaled initial value if no
    /// assignment has been delivered.
    pub fn value(&self) -> f64 {
        self.slot
            .current_value()
            .unwrap_or_else(|| self.initial.value())
    }

    /// The cell of the winning assignment, if any.
    pub fn winner(&self) -> Option<&NumericCell> {
        self.slot.winner()
    }

    /// The cells of concurrent assignments that lost arbitration, from highest to lowest
    /// arbitration order.
    pub fn conflicts(&self) -> impl ExactSizeIterator<Item = &NumericCell> + '_ {
        self.slot.conflicts()
    }

    /// The cell holding the (scaled) value from before any assignment.
    pub fn initial_cell(&self) -> &NumericCell {
        &self.initial
    }

    /// Every operation delivered to this replica.
    pub fn context(&self) -> &CausalContext {
        self.clock.delivered()
    }

    /// The scalings this replica retains for catching up future assignments.
    pub fn log(&self) -> &CausalLog {
        &self.log
    }

    /// Assigns `value`, returning the operation to send to the other replicas.
    ///
    /// Every call is a distinct assignment, even if `value` equals the current value.
    pub fn set(&mut self, value: f64, observer: &mut impl Observer) -> Op {
        let op = self.clock.send(Payload::Set(value));
        let delivered = self.deliver(&op, observer);
        debug_assert!(delivered.is_ok(), "local operations are always ready");
        op
    }

    /// Scales the value by `factor`, returning the operation to send to the other replicas.
    ///
    /// Returns `None` if `factor` is 1, as such a scaling has no effect anywhere. Any other
    /// factor, including 0, negative numbers, infinities and NaN, is applied as is.
    pub fn multiply(&mut self, factor: f64, observer: &mut impl Observer) -> Option<Op> {
        if factor == 1.0 {
            return None;
        }
        let op = self.clock.send(Payload::Multiply(factor));
        let delivered = self.deliver(&op, observer);
        debug_assert!(delivered.is_ok(), "local operations are always ready");
        Some(op)
    }

    /// Alias for [`ScalingRegister::multiply`].
    pub fn scale(&mut self, factor: f64, observer: &mut impl Observer) -> Option<Op> {
        self.multiply(factor, observer)
    }

    /// True if `op` may be delivered to this replica now.
    pub fn is_ready(&self, op: &Op) -> bool {
        self.clock.is_ready(&op.timestamp)
    }

    /// Delivers an operation issued by another replica.
    ///
    /// Returns the change the operation caused, if any; the same change is reported to
    /// `observer`. If the transport delivers `op` before its causal past, nothing is applied and
    /// an error is returned.
    pub fn apply(
        &mut self,
        op: &Op,
        observer: &mut impl Observer,
    ) -> Result<Option<Change>, DeliveryError> {
        self.deliver(op, observer)
    }

    fn deliver(
        &mut self,
        op: &Op,
        observer: &mut impl Observer,
    ) -> Result<Option<Change>, DeliveryError> {
        let timestamp = &op.timestamp;
        if self.clock.receive(timestamp)? == Delivery::Duplicate {
            return Ok(None);
        }

        let previous = self.value();
        let changed = match op.payload {
            Payload::Set(value) => {
                let mut cell = NumericCell::born_at(value, timestamp.clone());
                cell.refold(&self.log);
                tracing::trace!(
                    dot = ?timestamp.dot(),
                    value,
                    caught_up = cell.value(),
                    "delivering assignment"
                );
                self.slot.apply(SlotOp::Set(cell))
            }
            Payload::Multiply(factor) if factor == 1.0 => {
                // legal, but there is nothing to record or apply
                false
            }
            Payload::Multiply(factor) => {
                let entry = ScaleEntry::new(timestamp, factor);
                let latest = self.log.is_latest(&entry);
                tracing::trace!(dot = ?timestamp.dot(), factor, latest, "delivering scaling");
                if !self.log.apply(entry) {
                    return Ok(None);
                }
                if latest {
                    let initial = self.initial.apply(factor);
                    let cells = self.slot.apply(SlotOp::Scale(factor));
                    initial || cells
                } else {
                    // a concurrent scaling that sorts before some already applied one
                    self.initial.refold(&self.log);
                    self.slot.refold(&self.log);
                    true
                }
            }
        };
        if !changed {
            return Ok(None);
        }

        let change = Change {
            is_local: timestamp.actor() == self.id(),
            cause: timestamp.dot(),
            previous,
            value: self.value(),
        };
        observer.changed(&change);
        Ok(Some(change))
    }

    /// Discards the scalings that can no longer affect any future assignment.
    ///
    /// `replicas` must list every replica of this register. The discarded scalings are folded
    /// into the base of every live cell, so values stay bit-identical to those of replicas that
    /// did not truncate. Returns the number of discarded log entries.
    pub fn truncate_stable(&mut self, replicas: &[Identifier]) -> usize {
        let frontier = self.clock.stable_frontier(replicas);
        let stable = self.log.truncate_stable(&frontier);
        self.initial.rebase(&stable);
        self.slot.rebase(&stable);
        let dropped = stable.len();
        tracing::debug!(
            dropped,
            retained = self.log.len(),
            "truncated causally stable scalings"
        );
        dropped
    }

    /// Captures the durable state of this replica.
    pub fn snapshot(&self) -> RegisterSnapshot {
        RegisterSnapshot {
            clock: self.clock.clone(),
            initial: self.initial.clone(),
            cells: self.slot.save(),
            log: self.log.save(),
        }
    }

    /// Restores a replica from a [`RegisterSnapshot`].
    pub fn from_snapshot(snapshot: RegisterSnapshot) -> Self {
        Self {
            clock: snapshot.clock,
            initial: snapshot.initial,
            slot: VersionedSlot::load(snapshot.cells),
            log: CausalLog::load(snapshot.log),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{DummyObserver, RecordingObserver};

    fn replica(node: u8) -> ScalingRegister {
        ScalingRegister::new(Identifier::new(node, 0), 1.0)
    }

    fn deliver_all(to: &mut ScalingRegister, ops: &[&Op]) {
        for op in ops {
            to.apply(op, &mut DummyObserver).unwrap();
        }
    }

    #[test]
    fn initial_value() {
        let reg = ScalingRegister::new(Identifier::new(0, 0), 2.5);
        assert_eq!(reg.value(), 2.5);
        assert!(reg.winner().is_none());
        assert_eq!(reg.conflicts().len(), 0);
    }

    #[test]
    fn scaling_before_any_assignment_scales_the_initial_value() {
        let mut a = replica(0);
        let mut b = replica(1);
        let m = a.multiply(3.0, &mut DummyObserver).unwrap();
        deliver_all(&mut b, &[&m]);
        assert_eq!(a.value(), 3.0);
        assert_eq!(b.value(), 3.0);
    }

    #[test]
    fn concurrent_scaling_is_folded_into_assignment() {
        let mut a = replica(0);
        let mut b = replica(1);

        let set = a.set(4.0, &mut DummyObserver);
        let m = b.multiply(2.0, &mut DummyObserver).unwrap();
        deliver_all(&mut a, &[&m]);
        deliver_all(&mut b, &[&set]);

        assert_eq!(a.value(), 8.0);
        assert_eq!(b.value(), 8.0);
        assert_eq!(a.winner(), b.winner());
    }

    #[test]
    fn observed_scaling_is_not_reapplied_to_a_later_assignment() {
        let mut a = replica(0);
        let mut b = replica(1);

        let m = a.multiply(3.0, &mut DummyObserver).unwrap();
        assert_eq!(a.value(), 3.0);
        let set = a.set(5.0, &mut DummyObserver);
        assert_eq!(a.value(), 5.0);

        deliver_all(&mut b, &[&m, &set]);
        assert_eq!(b.value(), 5.0);
    }

    #[test]
    fn assignment_precedence_holds_across_replicas() {
        let mut a = replica(0);
        let mut b = replica(1);
        let mut c = replica(2);

        // b scales, a observes it and then assigns; c learns of both
        let m = b.multiply(10.0, &mut DummyObserver).unwrap();
        deliver_all(&mut a, &[&m]);
        let set = a.set(2.0, &mut DummyObserver);
        deliver_all(&mut b, &[&set]);
        deliver_all(&mut c, &[&m, &set]);

        for r in [&a, &b, &c] {
            assert_eq!(r.value(), 2.0);
        }
    }

    #[test]
    fn concurrent_scalings_commute() {
        let mut a = replica(0);
        let mut b = replica(1);
        let mut c = replica(2);

        let set = a.set(2.0, &mut DummyObserver);
        deliver_all(&mut b, &[&set]);
        deliver_all(&mut c, &[&set]);

        let double = b.multiply(2.0, &mut DummyObserver).unwrap();
        let triple = c.multiply(3.0, &mut DummyObserver).unwrap();

        deliver_all(&mut a, &[&double, &triple]);
        deliver_all(&mut b, &[&triple]);
        deliver_all(&mut c, &[&double]);

        for r in [&a, &b, &c] {
            assert_eq!(r.value(), 12.0);
        }
    }

    #[test]
    fn concurrent_assignments_keep_the_loser_as_conflict() {
        let mut a = replica(0);
        let mut b = replica(1);

        let three = a.set(3.0, &mut DummyObserver);
        let seven = b.set(7.0, &mut DummyObserver);
        deliver_all(&mut a, &[&seven]);
        deliver_all(&mut b, &[&three]);

        for r in [&a, &b] {
            assert_eq!(r.value(), 7.0);
            let conflicts: Vec<_> = r.conflicts().map(NumericCell::value).collect();
            assert_eq!(conflicts, [3.0]);
        }
        assert_eq!(a.snapshot().cells, b.snapshot().cells);
    }

    #[test]
    fn conflicts_receive_concurrent_scalings() {
        let mut a = replica(0);
        let mut b = replica(1);
        let mut c = replica(2);

        let three = a.set(3.0, &mut DummyObserver);
        let seven = b.set(7.0, &mut DummyObserver);
        let half = c.multiply(0.5, &mut DummyObserver).unwrap();

        deliver_all(&mut a, &[&half, &seven]);
        deliver_all(&mut b, &[&three, &half]);
        deliver_all(&mut c, &[&seven, &three]);

        for r in [&a, &b, &c] {
            assert_eq!(r.value(), 3.5);
            let conflicts: Vec<_> = r.conflicts().map(NumericCell::value).collect();
            assert_eq!(conflicts, [1.5]);
            assert_eq!(r.initial_cell().value(), 0.5);
        }
    }

    #[test]
    fn later_assignment_clears_conflicts() {
        let mut a = replica(0);
        let mut b = replica(1);

        let three = a.set(3.0, &mut DummyObserver);
        let seven = b.set(7.0, &mut DummyObserver);
        deliver_all(&mut a, &[&seven]);
        let one = a.set(1.0, &mut DummyObserver);
        deliver_all(&mut b, &[&three, &one]);

        for r in [&a, &b] {
            assert_eq!(r.value(), 1.0);
            assert_eq!(r.conflicts().len(), 0);
        }
    }

    #[test]
    fn unit_factor_is_not_sent() {
        let mut a = replica(0);
        let mut observer = RecordingObserver::new();
        assert!(a.multiply(1.0, &mut observer).is_none());
        assert!(observer.changes_seen.is_empty());
        assert!(a.context().is_empty());
    }

    #[test]
    fn unit_factor_from_a_remote_is_harmless() {
        let mut a = replica(0);
        let mut b = replica(1);
        // forge a unit scaling, as a sender without the filter would
        let op = Op {
            timestamp: a.clock.send(Payload::Multiply(1.0)).timestamp,
            payload: Payload::Multiply(1.0),
        };
        let mut observer = RecordingObserver::new();
        assert_eq!(b.apply(&op, &mut observer), Ok(None));
        assert!(observer.changes_seen.is_empty());
        assert_eq!(b.value(), 1.0);
        assert!(b.log().is_empty());
        assert_eq!(b.context().dot_count(), 1);
    }

    #[test]
    fn numeric_edge_cases_are_propagated() {
        let mut a = replica(0);
        let _ = a.set(-2.0, &mut DummyObserver);
        let _ = a.multiply(-3.0, &mut DummyObserver);
        assert_eq!(a.value(), 6.0);
        let _ = a.multiply(0.0, &mut DummyObserver);
        assert_eq!(a.value(), 0.0);
        let _ = a.multiply(f64::INFINITY, &mut DummyObserver);
        assert!(a.value().is_nan());
    }

    #[test]
    fn one_change_per_operation() {
        let mut a = replica(0);
        let mut b = replica(1);
        let three = a.set(3.0, &mut DummyObserver);
        let seven = b.set(7.0, &mut DummyObserver);
        deliver_all(&mut a, &[&seven]);

        // touches the initial cell, the winner and a conflict
        let mut observer = RecordingObserver::new();
        let m = a.multiply(2.0, &mut observer).unwrap();
        assert_eq!(observer.changes_seen.len(), 1);
        let change = observer.changes_seen[0];
        assert!(change.is_local);
        assert_eq!(change.cause, m.timestamp.dot());
        assert_eq!((change.previous, change.value), (7.0, 14.0));

        let mut observer = RecordingObserver::new();
        let remote = b.apply(&three, &mut observer).unwrap().unwrap();
        assert!(!remote.is_local);
        assert!(!remote.value_changed());
        assert_eq!(observer.changes_seen, [remote]);
    }

    #[test]
    fn closures_observe_changes() {
        let mut a = replica(0);
        let mut seen = Vec::new();
        let _ = a.set(5.0, &mut |c: &Change| seen.push(c.value));
        let _ = a.multiply(2.0, &mut |c: &Change| seen.push(c.value));
        assert_eq!(seen, [5.0, 10.0]);
    }

    #[test]
    fn premature_delivery_is_rejected_without_effect() {
        let mut a = replica(0);
        let mut b = replica(1);
        let first = a.multiply(2.0, &mut DummyObserver).unwrap();
        let second = a.set(9.0, &mut DummyObserver);

        assert!(!b.is_ready(&second));
        assert!(matches!(
            b.apply(&second, &mut DummyObserver),
            Err(DeliveryError::OutOfOrder { .. })
        ));
        assert_eq!(b.value(), 1.0);
        deliver_all(&mut b, &[&first, &second]);
        assert_eq!(b.value(), 9.0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic = "delivered twice"]
    fn duplicate_delivery_is_fatal_in_debug() {
        let mut a = replica(0);
        let mut b = replica(1);
        let m = a.multiply(2.0, &mut DummyObserver).unwrap();
        deliver_all(&mut b, &[&m, &m]);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn duplicate_delivery_is_ignored_in_release() {
        let mut a = replica(0);
        let mut b = replica(1);
        let m = a.multiply(2.0, &mut DummyObserver).unwrap();
        deliver_all(&mut b, &[&m]);
        assert_eq!(b.apply(&m, &mut DummyObserver), Ok(None));
        assert_eq!(b.value(), 2.0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic = "delivered twice"]
    fn duplicate_assignment_is_fatal_in_debug() {
        let mut a = replica(0);
        let mut b = replica(1);
        let set = a.set(2.0, &mut DummyObserver);
        deliver_all(&mut b, &[&set, &set]);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn duplicate_assignment_is_ignored_in_release() {
        let mut a = replica(0);
        let mut b = replica(1);
        let set = a.set(2.0, &mut DummyObserver);
        let m = a.multiply(3.0, &mut DummyObserver).unwrap();
        deliver_all(&mut b, &[&set, &m]);
        assert_eq!(b.apply(&set, &mut DummyObserver), Ok(None));
        assert_eq!(b.value(), 6.0);
        assert_eq!(b.conflicts().len(), 0);
    }

    #[test]
    fn overflowing_scalings_converge_exactly() {
        let mut rs: Vec<_> = (0..4).map(replica).collect();
        let set = rs[0].set(1.0, &mut DummyObserver);
        let up = rs[1].multiply(1e200, &mut DummyObserver).unwrap();
        let up_again = rs[2].multiply(1e200, &mut DummyObserver).unwrap();
        let down = rs[3].multiply(1e-300, &mut DummyObserver).unwrap();

        // the assigning replica sees the scalings live, the others partly or fully caught up
        deliver_all(&mut rs[0], &[&up, &down, &up_again]);
        deliver_all(&mut rs[1], &[&up_again, &down, &set]);
        deliver_all(&mut rs[2], &[&set, &down, &up]);
        deliver_all(&mut rs[3], &[&up, &up_again, &set]);

        // every replica multiplies 1e200 * 1e200 first, which overflows
        for r in &rs {
            assert_eq!(r.value(), f64::INFINITY);
            assert_eq!(r.value().to_bits(), rs[0].value().to_bits());
            assert_eq!(r.initial_cell().value(), f64::INFINITY);
        }
    }

    #[test]
    fn out_of_order_scaling_reorders_the_product() {
        let mut a = replica(0);
        let mut b = replica(1);
        let mut c = replica(2);
        let set = a.set(3.0, &mut DummyObserver);
        deliver_all(&mut b, &[&set]);
        deliver_all(&mut c, &[&set]);

        let early = b.multiply(f64::MAX, &mut DummyObserver).unwrap();
        let late = c.multiply(0.25, &mut DummyObserver).unwrap();
        // c applied its quarter first, then learns of b's scaling which sorts before it
        let mut observer = RecordingObserver::new();
        c.apply(&early, &mut observer).unwrap();
        assert_eq!(observer.changes_seen.len(), 1);
        deliver_all(&mut a, &[&late, &early]);
        deliver_all(&mut b, &[&late]);

        for r in [&a, &b, &c] {
            assert_eq!(r.value(), f64::INFINITY);
        }
    }

    #[test]
    fn snapshot_resumes_catch_up_and_arbitration() {
        let mut a = replica(0);
        let mut b = replica(1);

        let m = a.multiply(2.0, &mut DummyObserver).unwrap();
        // b assigns without having seen a's scaling
        let set = b.set(5.0, &mut DummyObserver);

        let restored = ScalingRegister::from_snapshot(a.snapshot());
        assert_eq!(restored, a);
        let mut a = restored;

        deliver_all(&mut a, &[&set]);
        deliver_all(&mut b, &[&m]);
        assert_eq!(a.value(), 10.0);
        assert_eq!(b.value(), 10.0);
    }

    #[test]
    fn truncation_keeps_replicas_convergent() {
        let ids = [Identifier::new(0, 0), Identifier::new(1, 0)];
        let mut a = replica(0);
        let mut b = replica(1);

        let m = a.multiply(2.0, &mut DummyObserver).unwrap();
        deliver_all(&mut b, &[&m]);
        // nothing is stable at a until b has built on m
        assert_eq!(a.truncate_stable(&ids), 0);

        let m2 = b.multiply(3.0, &mut DummyObserver).unwrap();
        deliver_all(&mut a, &[&m2]);
        assert_eq!(a.truncate_stable(&ids), 2);
        assert!(a.log().is_empty());

        // a concurrent scaling from b and a later assignment from a still converge
        let m3 = b.multiply(5.0, &mut DummyObserver).unwrap();
        let set = a.set(7.0, &mut DummyObserver);
        deliver_all(&mut a, &[&m3]);
        deliver_all(&mut b, &[&set]);
        assert_eq!(a.value(), 35.0);
        assert_eq!(b.value(), 35.0);
    }

    #[test]
    fn truncation_waits_for_the_arbitration_prefix() {
        let ids = [0, 1, 2].map(|node| Identifier::new(node, 0));
        let mut a = replica(0);
        let mut b = replica(1);
        let mut c = replica(2);

        let x = a.multiply(1e200, &mut DummyObserver).unwrap();
        let z = c.multiply(1e200, &mut DummyObserver).unwrap();
        deliver_all(&mut b, &[&x]);
        let y = b.multiply(1e-300, &mut DummyObserver).unwrap();
        deliver_all(&mut c, &[&x, &y]);
        let w = c.multiply(2.0, &mut DummyObserver).unwrap();
        deliver_all(&mut a, &[&y, &z, &w]);

        // x and y are stable at a, but z is not and sorts between them
        let mut untruncated = a.clone();
        assert_eq!(a.truncate_stable(&ids), 1);
        let retained: Vec<_> = a.log().iter().map(|e| e.dot).collect();
        assert_eq!(retained, [z.timestamp.dot(), y.timestamp.dot(), w.timestamp.dot()]);

        // sorts before w, so a has to refold from the truncated base
        let v = b.multiply(0.5, &mut DummyObserver).unwrap();
        deliver_all(&mut a, &[&v]);
        deliver_all(&mut untruncated, &[&v]);
        assert_eq!(a.value(), f64::INFINITY);
        assert_eq!(a.value().to_bits(), untruncated.value().to_bits());
    }
}
