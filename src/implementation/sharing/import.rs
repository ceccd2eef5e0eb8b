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

//! Per-solver intake of broadcast clauses. The import manager buffers what
//! a solver should digest, within a literal budget derived from the buffer
//! configuration, and gates imports on the solver's revision so that
//! clauses from a newer revision never pollute an older search.

use std::collections::VecDeque;

use log::debug;
use parking_lot::Mutex;

use crate::{BufferReader, Clause, SolverSetup};

/// Number of initial sharings skipped per diversification block unit.
const DIVERSIFICATION_MODULUS: usize = 11;

pub struct ImportManager {
    max_clause_length: usize,
    reset_lbd: bool,
    increment_lbd: bool,

    budget_lits: usize,
    used_lits: usize,
    units: Vec<i32>,
    clauses: VecDeque<Clause>,

    /// (imported revision, solver revision), under one small mutex since
    /// the main thread advances the former while the solver thread reports
    /// the latter.
    revisions: Mutex<(i32, i32)>,

    /// Remaining sharings to skip for early portfolio diversity.
    diversification_blocks: usize,
    global_id: usize,

    pub discarded_lits: u64,
}

impl ImportManager {
    pub fn new(setup: &SolverSetup) -> Self {
        let diversification_blocks = if setup.diversify_initial_imports {
            setup.global_id % DIVERSIFICATION_MODULUS
        } else {
            0
        };
        ImportManager {
            max_clause_length: setup.strict_clause_length_limit,
            reset_lbd: setup.reset_lbd_before_import,
            increment_lbd: setup.increment_lbd_before_import,
            budget_lits: Self::literal_budget(setup),
            used_lits: 0,
            units: Vec::new(),
            clauses: VecDeque::new(),
            revisions: Mutex::new((0, 0)),
            diversification_blocks,
            global_id: setup.global_id,
            discarded_lits: 0,
        }
    }

    /// The literal budget of one solver:
    /// `base * max(min_chunks, ceil(generations * anticipated / base))`.
    pub fn literal_budget(setup: &SolverSetup) -> usize {
        let base = setup.clause_base_buffer_size.max(1);
        let generations = setup.num_buffered_cls_generations as f32
            * setup.anticipated_lits_to_import_per_cycle
            / base as f32;
        base * (setup.min_num_chunks_per_solver).max(generations.ceil() as usize)
    }

    // ------------------------------------------------------------------------
    // --- FILL SIDE (main thread) --------------------------------------------
    // ------------------------------------------------------------------------

    /// Buffers one clause for the solver, applying the configured LBD
    /// transformation. Oldest buffered clauses give way when the budget
    /// is exceeded; units are never discarded.
    pub fn add_single_clause(&mut self, clause: Clause) {
        if clause.size() > self.max_clause_length {
            self.discarded_lits += clause.size() as u64;
            return;
        }
        let clause = self.transformed(clause);
        if clause.is_unit() {
            self.units.push(clause.lits[0]);
            self.used_lits += 1;
            return;
        }
        self.used_lits += clause.size();
        self.clauses.push_back(clause);
        while self.used_lits > self.budget_lits {
            let Some(evicted) = self.clauses.pop_front() else { break };
            self.used_lits -= evicted.size();
            self.discarded_lits += evicted.size() as u64;
        }
    }

    /// Digests a whole broadcast buffer.
    pub fn perform_import(&mut self, reader: BufferReader) {
        for clause in reader {
            self.add_single_clause(clause);
        }
    }

    fn transformed(&self, mut clause: Clause) -> Clause {
        if self.reset_lbd {
            clause.lbd = clause.size() as u32;
        } else if self.increment_lbd {
            clause.lbd = (clause.lbd + 1).min(clause.size() as u32).max(1);
        }
        clause
    }

    /// The broadcast that is about to be imported belongs to `revision`.
    pub fn set_imported_revision(&self, revision: i32) {
        self.revisions.lock().0 = revision;
    }

    // ------------------------------------------------------------------------
    // --- DRAIN SIDE (solver thread) -----------------------------------------
    // ------------------------------------------------------------------------

    /// The solver finished loading `revision` of the formula.
    pub fn update_solver_revision(&self, solver_revision: i32) {
        self.revisions.lock().1 = solver_revision;
    }

    /// The revision the solver last reported having loaded.
    pub fn solver_revision(&self) -> i32 {
        self.revisions.lock().1
    }

    /// Whether the solver may digest buffered clauses right now. False
    /// while the solver's revision lags behind the imported one, and
    /// during the initial diversification blocks.
    pub fn can_import(&mut self) -> bool {
        if self.diversification_blocks > 0 && !self.is_empty() {
            self.diversification_blocks -= 1;
            if self.diversification_blocks == 0 {
                debug!("S{} not import-blocked any longer", self.global_id);
            }
            return false;
        }
        let (imported, solver) = *self.revisions.lock();
        solver >= imported
    }

    /// Drains the buffered unit literals.
    pub fn take_units(&mut self) -> Vec<i32> {
        self.used_lits -= self.units.len();
        std::mem::take(&mut self.units)
    }

    /// Pops the next buffered clause, best quality first is not guaranteed;
    /// clauses come out in arrival order.
    pub fn next_clause(&mut self) -> Option<Clause> {
        let clause = self.clauses.pop_front()?;
        self.used_lits -= clause.size();
        Some(clause)
    }

    pub fn size_lits(&self) -> usize {
        self.used_lits
    }

    pub fn is_empty(&self) -> bool {
        self.used_lits == 0
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
