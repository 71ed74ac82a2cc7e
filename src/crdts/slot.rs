// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{CausalLog, NumericCell, Replicated};
use crate::CausalTimestamp;
use smallvec::SmallVec;

/// A last-writer-wins register of [`NumericCell`]s.
///
/// Every assignment creates a new cell. The slot holds every cell that has not been causally
/// overwritten: an assignment removes the cells whose birth is in its causal past, while cells
/// assigned concurrently stay around. Among the retained cells the one with the highest birth
/// timestamp in arbitration order is the _winner_, the rest are _conflicts_.
///
/// Conflicts are kept rather than discarded because they are still targets of delivered
/// scalings, and must reflect every scaling they should have received should they become
/// visible again, for example through [`VersionedSlot::conflicts`].
///
/// Since arbitration is replica-independent, all replicas that delivered the same assignments
/// agree on the winner regardless of delivery order.
#[derive(Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct VersionedSlot {
    /// Live cells in ascending arbitration order of their birth; the last one wins.
    cells: SmallVec<[NumericCell; 1]>,
}

impl std::fmt::Debug for VersionedSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.cells.iter().rev()).finish()
    }
}

/// A change to a [`VersionedSlot`].
#[derive(Debug, Clone)]
pub enum SlotOp {
    /// An assignment, delivered locally or remotely.
    ///
    /// The cell must be created by [`NumericCell::born_at`] and already caught up with the
    /// scalings concurrent with its assignment. The catch-up is a local-only effect: every
    /// replica computes it for itself, and it is never broadcast.
    Set(NumericCell),
    /// A delivered scaling that sorts after every other delivered scaling, applied to every
    /// live cell.
    Scale(f64),
}

impl VersionedSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The winning cell, if any assignment has been delivered.
    pub fn winner(&self) -> Option<&NumericCell> {
        self.cells.last()
    }

    /// The value of the winning cell, if any assignment has been delivered.
    pub fn current_value(&self) -> Option<f64> {
        self.winner().map(NumericCell::value)
    }

    /// All live cells that are not the winner, from highest to lowest arbitration order.
    pub fn conflicts(&self) -> impl ExactSizeIterator<Item = &NumericCell> + '_ {
        let n = self.cells.len().saturating_sub(1);
        self.cells[..n].iter().rev()
    }

    /// All live cells, winner first.
    pub fn cells(&self) -> impl ExactSizeIterator<Item = &NumericCell> + '_ {
        self.cells.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Recomputes every live cell from its base over `log`, see [`NumericCell::refold`].
    pub fn refold(&mut self, log: &CausalLog) -> bool {
        let mut changed = false;
        for cell in &mut self.cells {
            changed |= cell.refold(log);
        }
        changed
    }

    /// Folds a truncated prefix of the log into every live cell, see [`NumericCell::rebase`].
    pub fn rebase(&mut self, stable: &CausalLog) {
        for cell in &mut self.cells {
            cell.rebase(stable);
        }
    }

    fn insert(&mut self, cell: NumericCell) -> bool {
        let Some(timestamp) = cell.born().cloned() else {
            debug_assert!(false, "the initial cell cannot be assigned");
            return false;
        };
        if self.cells.iter().any(|c| c.born() == Some(&timestamp)) {
            debug_assert!(false, "assignment {timestamp:?} delivered twice");
            return false;
        }

        // cells in the causal past of this assignment can never win again at any replica.
        self.cells
            .retain(|c| !c.born().is_some_and(|born| born.happened_before(&timestamp)));

        let at = self
            .cells
            .partition_point(|other| other.born() < Some(&timestamp));
        self.cells.insert(at, cell);
        true
    }
}

impl Replicated for VersionedSlot {
    type Op = SlotOp;
    type Snapshot = Vec<NumericCell>;

    fn apply(&mut self, op: SlotOp) -> bool {
        match op {
            SlotOp::Set(cell) => self.insert(cell),
            SlotOp::Scale(factor) => {
                let mut changed = false;
                for cell in &mut self.cells {
                    changed |= cell.apply(factor);
                }
                changed
            }
        }
    }

    fn save(&self) -> Vec<NumericCell> {
        self.cells.to_vec()
    }

    fn load(mut cells: Vec<NumericCell>) -> Self {
        cells.retain(|cell| cell.born().is_some());
        cells.sort_by(|a, b| a.born().cmp(&b.born()));
        Self {
            cells: cells.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdts::ScaleEntry;
    use crate::{CausalContext, causal_context, dot};

    fn set(slot: &mut VersionedSlot, timestamp: CausalTimestamp, value: f64) -> bool {
        slot.apply(SlotOp::Set(NumericCell::born_at(value, timestamp)))
    }

    #[test]
    fn empty() {
        let slot = VersionedSlot::new();
        assert_eq!(slot.current_value(), None);
        assert_eq!(slot.conflicts().len(), 0);
        assert!(slot.is_empty());
    }

    #[test]
    fn causally_later_assignment_replaces() {
        let mut slot = VersionedSlot::new();
        set(&mut slot, CausalTimestamp::new(dot!(0, 1), 1, CausalContext::new()), 3.0);
        set(&mut slot, CausalTimestamp::new(dot!(1, 1), 2, causal_context!({@0.0: 1})), 7.0);
        assert_eq!(slot.current_value(), Some(7.0));
        assert_eq!(slot.len(), 1);
    }

    #[test]
    fn concurrent_assignments_converge() {
        let a = CausalTimestamp::new(dot!(0, 1), 1, CausalContext::new());
        let b = CausalTimestamp::new(dot!(1, 1), 1, CausalContext::new());

        let mut ab = VersionedSlot::new();
        set(&mut ab, a.clone(), 3.0);
        set(&mut ab, b.clone(), 7.0);

        let mut ba = VersionedSlot::new();
        set(&mut ba, b, 7.0);
        set(&mut ba, a, 3.0);

        assert_eq!(ab, ba);
        // same lamport value, so the higher actor wins
        assert_eq!(ab.current_value(), Some(7.0));
        let conflicts: Vec<_> = ab.conflicts().map(NumericCell::value).collect();
        assert_eq!(conflicts, [3.0]);
    }

    #[test]
    fn scale_reaches_winner_and_conflicts() {
        let mut slot = VersionedSlot::new();
        set(&mut slot, CausalTimestamp::new(dot!(0, 1), 1, CausalContext::new()), 3.0);
        set(&mut slot, CausalTimestamp::new(dot!(1, 1), 1, CausalContext::new()), 7.0);
        assert!(slot.apply(SlotOp::Scale(2.0)));
        let values: Vec<_> = slot.cells().map(NumericCell::value).collect();
        assert_eq!(values, [14.0, 6.0]);
        assert!(!slot.apply(SlotOp::Scale(1.0)));
    }

    #[test]
    fn catch_up_is_folded_into_the_new_cell_only() {
        let mut log = CausalLog::new();
        let scaling = CausalTimestamp::new(dot!(2, 1), 1, CausalContext::new());
        log.apply(ScaleEntry::new(&scaling, 4.0));

        let mut slot = VersionedSlot::new();
        set(&mut slot, CausalTimestamp::new(dot!(0, 1), 2, causal_context!({@2.0: 1})), 3.0);
        let mut cell =
            NumericCell::born_at(5.0, CausalTimestamp::new(dot!(1, 1), 1, CausalContext::new()));
        cell.refold(&log);
        slot.apply(SlotOp::Set(cell));

        let values: Vec<_> = slot.cells().map(NumericCell::value).collect();
        assert_eq!(values, [3.0, 20.0]);
        assert!(!slot.refold(&log));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic = "delivered twice"]
    fn duplicate_assignment_is_fatal_in_debug() {
        let mut slot = VersionedSlot::new();
        let ts = CausalTimestamp::new(dot!(0, 1), 1, CausalContext::new());
        set(&mut slot, ts.clone(), 3.0);
        set(&mut slot, ts, 3.0);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn duplicate_assignment_is_ignored_in_release() {
        let mut slot = VersionedSlot::new();
        let ts = CausalTimestamp::new(dot!(0, 1), 1, CausalContext::new());
        assert!(set(&mut slot, ts.clone(), 3.0));
        slot.apply(SlotOp::Scale(2.0));
        assert!(!set(&mut slot, ts, 3.0));
        assert_eq!(slot.len(), 1);
        assert_eq!(slot.current_value(), Some(6.0));
    }

    #[test]
    fn save_and_load() {
        let mut slot = VersionedSlot::new();
        set(&mut slot, CausalTimestamp::new(dot!(2, 1), 4, CausalContext::new()), 1.0);
        set(&mut slot, CausalTimestamp::new(dot!(0, 1), 9, CausalContext::new()), 2.0);
        let mut saved = slot.save();
        saved.reverse();
        assert_eq!(VersionedSlot::load(saved), slot);
    }
}
