// Copyright 2024 the parsat developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! The produced-clause filter: an exact structure remembering every clause
//! successfully exported by a local solver. For each incoming clause it
//! decides whether to discard it (shared before, or too recently) and which
//! subset of local solvers must not re-import it because they produced it
//! themselves. Space is linear in the number of clauses accepted into the
//! clause database.

use fxhash::FxHashMap;
use parking_lot::{Mutex, MutexGuard};

use crate::{
    AdaptiveClauseDatabase, BinaryKey, Clause, LargeKey, ProducedClauseCandidate, UnitKey,
};

/// Upper bound on local solver threads per subprocess; producer sets are
/// bitsets over this range.
pub const MAX_PRODUCERS: usize = 64;

/// Outcome of offering a produced clause to the filter and database.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExportResult {
    /// The clause is new (or improved) and was inserted into the database.
    Admitted,
    /// The clause is a known duplicate; only its producer set was extended.
    Filtered,
    /// The database had no room; nothing was recorded about the LBD.
    Dropped,
}

// ----------------------------------------------------------------------------
// --- CLAUSE INFO ------------------------------------------------------------
// ----------------------------------------------------------------------------
/// Per-clause metadata, bit-packed to keep the maps dense: 5 bits for the
/// best LBD the clause was produced with, 5 bits for the best LBD it was
/// shared with, 22 bits for the epoch of its last sharing, plus the
/// producer bitset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClauseInfo {
    packed: u32,
    producers: u64,
}

impl ClauseInfo {
    const LBD_MASK: u32 = 0x1f;
    const EPOCH_MASK: u32 = 0x3f_ffff;

    fn of_candidate(c: &ProducedClauseCandidate) -> Self {
        let mut info = ClauseInfo::default();
        info.set_min_produced_lbd(c.lbd);
        info.add_producer(c.producer);
        info
    }

    pub fn min_produced_lbd(&self) -> u32 {
        self.packed & Self::LBD_MASK
    }

    pub fn min_shared_lbd(&self) -> u32 {
        (self.packed >> 5) & Self::LBD_MASK
    }

    pub fn last_shared_epoch(&self) -> u32 {
        self.packed >> 10
    }

    pub fn producers(&self) -> u64 {
        self.producers
    }

    fn set_min_produced_lbd(&mut self, lbd: u32) {
        self.packed = (self.packed & !Self::LBD_MASK) | lbd.min(Self::LBD_MASK);
    }

    fn set_min_shared_lbd(&mut self, lbd: u32) {
        self.packed = (self.packed & !(Self::LBD_MASK << 5)) | (lbd.min(Self::LBD_MASK) << 5);
    }

    fn set_last_shared_epoch(&mut self, epoch: u32) {
        self.packed = (self.packed & 0x3ff) | ((epoch & Self::EPOCH_MASK) << 10);
    }

    fn add_producer(&mut self, producer: usize) {
        debug_assert!(producer < MAX_PRODUCERS);
        self.producers |= 1 << (producer % MAX_PRODUCERS);
    }
}

// ----------------------------------------------------------------------------
// --- FILTER -----------------------------------------------------------------
// ----------------------------------------------------------------------------

#[derive(Default)]
struct FilterMaps {
    units: FxHashMap<UnitKey, ClauseInfo>,
    binaries: FxHashMap<BinaryKey, ClauseInfo>,
    large: FxHashMap<LargeKey, ClauseInfo>,
}

/// The three size-class maps live under one mutex; the hot production path
/// prefers the try-lock entry point so that solver threads never block on
/// each other longer than one map operation.
pub struct ProducedClauseFilter {
    maps: Mutex<FilterMaps>,
    epoch_horizon: u32,
    reshare_improved_lbd: bool,
}

impl ProducedClauseFilter {
    pub fn new(epoch_horizon: u32, reshare_improved_lbd: bool) -> Self {
        ProducedClauseFilter {
            maps: Mutex::new(FilterMaps::default()),
            epoch_horizon,
            reshare_improved_lbd,
        }
    }

    /// Production-path variant of [`Self::register_and_insert`]: returns
    /// `None` without touching anything if the filter is contended, so the
    /// caller can buffer the candidate and retry later.
    pub fn try_register_and_insert(
        &self,
        c: ProducedClauseCandidate,
        db: &mut AdaptiveClauseDatabase,
    ) -> Option<ExportResult> {
        let guard = self.maps.try_lock()?;
        Some(self.register_locked(guard, c, db))
    }

    /// Offers a produced clause: consults the filter, inserts novel (or
    /// LBD-improved) clauses into the database, and records the producer.
    /// The producer bit is set before the clause becomes visible to any
    /// importer, both of which happen under the same critical section.
    pub fn register_and_insert(
        &self,
        c: ProducedClauseCandidate,
        db: &mut AdaptiveClauseDatabase,
    ) -> ExportResult {
        let guard = self.maps.lock();
        self.register_locked(guard, c, db)
    }

    fn register_locked(
        &self,
        mut guard: MutexGuard<FilterMaps>,
        c: ProducedClauseCandidate,
        db: &mut AdaptiveClauseDatabase,
    ) -> ExportResult {
        let reshare = self.reshare_improved_lbd;
        match c.size() {
            1 => Self::register(&mut guard.units, UnitKey(c.lits[0]), &c, db, reshare),
            2 => Self::register(
                &mut guard.binaries,
                BinaryKey::new(c.lits[0], c.lits[1]),
                &c,
                db,
                reshare,
            ),
            _ => Self::register(&mut guard.large, LargeKey::new(&c.lits), &c, db, reshare),
        }
    }

    fn register<K: std::hash::Hash + Eq>(
        map: &mut FxHashMap<K, ClauseInfo>,
        key: K,
        c: &ProducedClauseCandidate,
        db: &mut AdaptiveClauseDatabase,
        reshare_improved_lbd: bool,
    ) -> ExportResult {
        if let Some(info) = map.get_mut(&key) {
            let old_lbd = info.min_produced_lbd();
            // No resharing upon improved LBD, or LBD not improved?
            // => Filter the clause, only extend its producer set.
            if !reshare_improved_lbd || (old_lbd > 0 && c.lbd >= old_lbd) {
                info.add_producer(c.producer);
                return ExportResult::Filtered;
            }
        }

        if !db.add_clause(&c.lits, c.lbd) {
            // No space left: never update the LBD, the clause was not
            // actually exported.
            if let Some(info) = map.get_mut(&key) {
                info.add_producer(c.producer);
            }
            return ExportResult::Dropped;
        }

        let info = map.entry(key).or_insert_with(|| ClauseInfo::of_candidate(c));
        if info.min_produced_lbd() == 0 || info.min_produced_lbd() > c.lbd {
            info.set_min_produced_lbd(c.lbd);
        }
        info.add_producer(c.producer);
        ExportResult::Admitted
    }

    /// Decides whether a clause arriving with a broadcast may be passed on
    /// to the local solvers in the given epoch, updating the sharing
    /// metadata if so.
    pub fn admit_sharing(&self, c: &Clause, epoch: u32) -> bool {
        let mut guard = self.maps.lock();
        let horizon = self.epoch_horizon;
        let reshare = self.reshare_improved_lbd;
        match c.size() {
            1 => Self::admit(guard.units.get_mut(&UnitKey(c.lits[0])), c.lbd, epoch, horizon, reshare),
            2 => Self::admit(
                guard.binaries.get_mut(&BinaryKey::new(c.lits[0], c.lits[1])),
                c.lbd,
                epoch,
                horizon,
                reshare,
            ),
            _ => Self::admit(guard.large.get_mut(&LargeKey::new(&c.lits)), c.lbd, epoch, horizon, reshare),
        }
    }

    fn admit(
        info: Option<&mut ClauseInfo>,
        lbd: u32,
        epoch: u32,
        horizon: u32,
        reshare_improved_lbd: bool,
    ) -> bool {
        // Unknown clause: admit trivially.
        let Some(info) = info else { return true };

        if info.min_shared_lbd() > 0 && epoch.saturating_sub(info.last_shared_epoch()) <= horizon {
            // Shared at some recent point in time.
            if !reshare_improved_lbd {
                return false;
            }
            if info.min_shared_lbd() <= lbd {
                return false;
            }
        }

        info.set_min_shared_lbd(lbd);
        info.set_last_shared_epoch(epoch);
        true
    }

    /// The producer bitset of the clause, or 0 if it is unknown.
    pub fn producers(&self, c: &Clause) -> u64 {
        let guard = self.maps.lock();
        let info = match c.size() {
            1 => guard.units.get(&UnitKey(c.lits[0])),
            2 => guard.binaries.get(&BinaryKey::new(c.lits[0], c.lits[1])),
            _ => guard.large.get(&LargeKey::new(&c.lits)),
        };
        info.map(ClauseInfo::producers).unwrap_or(0)
    }

    /// Forgets a clause, e.g. after it fell out of every solver.
    pub fn erase(&self, c: &Clause) {
        let mut guard = self.maps.lock();
        match c.size() {
            1 => {
                guard.units.remove(&UnitKey(c.lits[0]));
            }
            2 => {
                guard.binaries.remove(&BinaryKey::new(c.lits[0], c.lits[1]));
            }
            _ => {
                guard.large.remove(&LargeKey::new(&c.lits));
            }
        }
    }

    /// Number of distinct clauses the filter remembers.
    pub fn len(&self) -> usize {
        let guard = self.maps.lock();
        guard.units.len() + guard.binaries.len() + guard.large.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_clause_info {
    use super::*;

    fn candidate(lits: Vec<i32>, lbd: u32, producer: usize) -> ProducedClauseCandidate {
        ProducedClauseCandidate { lits, lbd, producer, epoch: 0 }
    }

    #[test]
    fn fields_do_not_bleed_into_each_other() {
        let mut info = ClauseInfo::of_candidate(&candidate(vec![1, 2, 3], 7, 3));
        info.set_min_shared_lbd(4);
        info.set_last_shared_epoch(123_456);
        assert_eq!(7, info.min_produced_lbd());
        assert_eq!(4, info.min_shared_lbd());
        assert_eq!(123_456, info.last_shared_epoch());
        assert_eq!(1 << 3, info.producers());
    }

    #[test]
    fn lbd_saturates_at_five_bits() {
        let mut info = ClauseInfo::default();
        info.set_min_produced_lbd(200);
        assert_eq!(31, info.min_produced_lbd());
    }

    #[test]
    fn epoch_wraps_at_twenty_two_bits() {
        let mut info = ClauseInfo::default();
        info.set_last_shared_epoch(0x40_0001);
        assert_eq!(1, info.last_shared_epoch());
    }
}
