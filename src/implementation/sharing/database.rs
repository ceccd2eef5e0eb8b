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

//! The bounded store for clauses awaiting export. Clauses live in slots
//! addressed by (size, LBD) with a fixed literal budget per slot; when a
//! slot overflows, high-quality clauses may steal budget from the worst
//! populated slot instead of being dropped.

use crate::{BufferBuilder, Clause};

struct Slot {
    size: u32,
    lbd: u32,
    clauses: Vec<Clause>,
    used_lits: usize,
    capacity_lits: usize,
}

impl Slot {
    fn has_room_for(&self, lits: usize) -> bool {
        self.used_lits + lits <= self.capacity_lits
    }
}

/// Slot-partitioned clause store with a per-slot byte budget. Units and
/// binaries get dedicated slots; larger clauses are partitioned by
/// (size, LBD), with all LBD values above the partitioning limit folded
/// into their size's last bucket.
pub struct AdaptiveClauseDatabase {
    slots: Vec<Slot>,
    max_clause_length: usize,
    max_lbd_partition: u32,
    quality_length_limit: usize,
    quality_lbd_limit: u32,
}

impl AdaptiveClauseDatabase {
    pub fn new(
        max_clause_length: usize,
        max_lbd_partition: u32,
        quality_length_limit: usize,
        quality_lbd_limit: u32,
        slot_capacity_lits: usize,
    ) -> Self {
        let mut slots = Vec::new();
        slots.push(Slot { size: 1, lbd: 1, clauses: vec![], used_lits: 0, capacity_lits: slot_capacity_lits });
        slots.push(Slot { size: 2, lbd: 2, clauses: vec![], used_lits: 0, capacity_lits: slot_capacity_lits });
        for size in 3..=max_clause_length as u32 {
            for lbd in 2..=size.min(max_lbd_partition) {
                slots.push(Slot {
                    size,
                    lbd,
                    clauses: vec![],
                    used_lits: 0,
                    capacity_lits: slot_capacity_lits,
                });
            }
        }
        AdaptiveClauseDatabase {
            slots,
            max_clause_length,
            max_lbd_partition,
            quality_length_limit,
            quality_lbd_limit,
        }
    }

    fn slot_index(&self, size: usize, lbd: u32) -> Option<usize> {
        if size == 0 || size > self.max_clause_length {
            return None;
        }
        if size == 1 {
            return Some(0);
        }
        if size == 2 {
            return Some(1);
        }
        let lbd = lbd.clamp(2, (size as u32).min(self.max_lbd_partition));
        self.slots
            .iter()
            .position(|s| s.size == size as u32 && s.lbd == lbd)
    }

    fn is_quality(&self, size: usize, lbd: u32) -> bool {
        size <= self.quality_length_limit && lbd <= self.quality_lbd_limit
    }

    /// Tries to store a clause for export. Returns false when the clause's
    /// slot is full and no budget could be stolen, in which case the clause
    /// is dropped by the caller.
    pub fn add_clause(&mut self, lits: &[i32], lbd: u32) -> bool {
        let size = lits.len();
        let Some(idx) = self.slot_index(size, lbd) else { return false };

        if !self.slots[idx].has_room_for(size) {
            if !self.is_quality(size, lbd) || !self.steal_budget_for(idx, size) {
                return false;
            }
        }

        let slot = &mut self.slots[idx];
        slot.clauses.push(Clause::new(lits.to_vec(), lbd));
        slot.used_lits += size;
        true
    }

    /// Evicts clauses from the worst populated slot behind `idx` until the
    /// slot at `idx` has room for `needed` more literals, moving the freed
    /// budget over. Fails if only better slots hold clauses.
    fn steal_budget_for(&mut self, idx: usize, needed: usize) -> bool {
        while !self.slots[idx].has_room_for(needed) {
            let Some(victim) = self
                .slots
                .iter()
                .rposition(|s| !s.clauses.is_empty())
                .filter(|v| *v > idx)
            else {
                return false;
            };
            let Some(evicted) = self.slots[victim].clauses.pop() else { return false };
            let freed = evicted.size();
            self.slots[victim].used_lits -= freed;
            self.slots[victim].capacity_lits = self.slots[victim].capacity_lits.saturating_sub(freed);
            self.slots[idx].capacity_lits += freed;
        }
        true
    }

    /// Drains clauses in quality order (small sizes and LBD values first)
    /// into the given buffer builder. Clauses the builder has no budget for
    /// stay in the database for the next epoch.
    pub fn flush_into(&mut self, builder: &mut BufferBuilder) {
        let mut stopped = false;
        for slot in self.slots.iter_mut() {
            if stopped || slot.clauses.is_empty() {
                continue;
            }
            // Deterministic emission order within one slot.
            slot.clauses.sort_unstable_by(|a, b| a.lits.cmp(&b.lits));
            let mut kept = Vec::new();
            for clause in slot.clauses.drain(..) {
                if !stopped && builder.add(&clause) {
                    slot.used_lits -= clause.size();
                } else {
                    stopped = true;
                    kept.push(clause);
                }
            }
            slot.clauses = kept;
        }
    }

    pub fn num_clauses(&self) -> usize {
        self.slots.iter().map(|s| s.clauses.len()).sum()
    }

    pub fn used_lits(&self) -> usize {
        self.slots.iter().map(|s| s.used_lits).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.num_clauses() == 0
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
