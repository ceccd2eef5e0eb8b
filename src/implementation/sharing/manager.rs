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

//! The per-subprocess sharing manager: solvers push produced clauses in,
//! the adapter pulls one serialized export buffer out per epoch, and
//! broadcast buffers are digested back into the per-solver import managers
//! with duplicate and self-import suppression.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::{
    AdaptiveClauseDatabase, BufferBuilder, BufferReader, Clause, ExportResult, ImportManager,
    Parameters, ProducedClauseCandidate, ProducedClauseFilter, SolverSetup,
};

/// Counters mirroring the classic sharing statistics line.
#[derive(Debug, Default)]
pub struct SharingStatistics {
    pub exported: AtomicU64,
    pub filtered_at_export: AtomicU64,
    pub dropped_at_export: AtomicU64,
    pub imported: AtomicU64,
    pub filtered_at_import: AtomicU64,
}

pub struct SharingManager {
    filter: ProducedClauseFilter,
    database: Mutex<AdaptiveClauseDatabase>,
    imports: Vec<Mutex<ImportManager>>,

    strict_clause_length_limit: usize,
    strict_lbd_limit: u32,
    epoch: AtomicU32,
    pub stats: SharingStatistics,
}

impl SharingManager {
    pub fn new(params: &Parameters, setups: &[SolverSetup]) -> Self {
        let database = AdaptiveClauseDatabase::new(
            params.strict_clause_length_limit,
            params.max_lbd_partitioning_size,
            params.quality_clause_length_limit,
            params.quality_lbd_limit,
            params.clause_buffer_base_size,
        );
        let imports = setups.iter().map(|s| Mutex::new(ImportManager::new(s))).collect();
        SharingManager {
            filter: ProducedClauseFilter::new(params.epoch_horizon, params.reshare_improved_lbd),
            database: Mutex::new(database),
            imports,
            strict_clause_length_limit: params.strict_clause_length_limit,
            strict_lbd_limit: params.strict_lbd_limit,
            epoch: AtomicU32::new(0),
            stats: SharingStatistics::default(),
        }
    }

    /// The sharing epoch advances with every balancer-triggered exchange.
    pub fn set_epoch(&self, epoch: u32) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }

    pub fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------------
    // --- PRODUCTION ---------------------------------------------------------
    // ------------------------------------------------------------------------

    /// Offers a clause learned by local solver `producer` for export.
    pub fn export_clause(&self, producer: usize, lits: Vec<i32>, lbd: u32) -> ExportResult {
        if lits.is_empty()
            || lits.len() > self.strict_clause_length_limit
            || lbd > self.strict_lbd_limit
        {
            self.stats.dropped_at_export.fetch_add(1, Ordering::Relaxed);
            return ExportResult::Dropped;
        }
        let candidate = ProducedClauseCandidate {
            lits,
            lbd,
            producer,
            epoch: self.epoch(),
        };
        let mut database = self.database.lock();
        let result = self.filter.register_and_insert(candidate, &mut database);
        match result {
            ExportResult::Admitted => self.stats.exported.fetch_add(1, Ordering::Relaxed),
            ExportResult::Filtered => self.stats.filtered_at_export.fetch_add(1, Ordering::Relaxed),
            ExportResult::Dropped => self.stats.dropped_at_export.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    /// Serializes the clauses accumulated since the last call, best first,
    /// up to `max_words` buffer words.
    pub fn prepare_sharing(&self, max_words: usize) -> Vec<i32> {
        let mut builder = BufferBuilder::new(max_words);
        self.database.lock().flush_into(&mut builder);
        builder.take()
    }

    // ------------------------------------------------------------------------
    // --- DIGESTION ----------------------------------------------------------
    // ------------------------------------------------------------------------

    /// Feeds a broadcast buffer to the local solvers. Every clause passes
    /// the admission filter once per epoch horizon; solvers whose producer
    /// bit is set never see their own clause again. Returns the number of
    /// clauses admitted to at least one solver.
    pub fn digest_sharing(&self, buffer: Vec<i32>) -> usize {
        let epoch = self.epoch();
        let mut admitted = 0;
        for clause in BufferReader::new(buffer) {
            if !self.filter.admit_sharing(&clause, epoch) {
                self.stats.filtered_at_import.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let producers = self.filter.producers(&clause);
            let mut delivered = false;
            for (local_id, import) in self.imports.iter().enumerate() {
                if producers & (1 << local_id) != 0 {
                    continue;
                }
                import.lock().add_single_clause(clause.clone());
                delivered = true;
            }
            if delivered {
                admitted += 1;
                self.stats.imported.fetch_add(1, Ordering::Relaxed);
            }
        }
        admitted
    }

    /// Marks the revision the next digested broadcast belongs to.
    pub fn set_imported_revision(&self, revision: i32) {
        for import in &self.imports {
            import.lock().set_imported_revision(revision);
        }
    }

    /// The import manager of local solver `local_id`, for the solver
    /// thread to drain.
    pub fn import_manager(&self, local_id: usize) -> &Mutex<ImportManager> {
        &self.imports[local_id]
    }

    pub fn num_solvers(&self) -> usize {
        self.imports.len()
    }

    /// The producer bitset recorded for a clause (testing and stats aid).
    pub fn producers_of(&self, clause: &Clause) -> u64 {
        self.filter.producers(clause)
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_manager {
    use crate::*;

    fn manager(num_solvers: usize) -> SharingManager {
        let params = Parameters::default();
        let setups: Vec<SolverSetup> = (0..num_solvers)
            .map(|i| SolverSetup {
                local_id: i,
                global_id: i,
                strict_clause_length_limit: params.strict_clause_length_limit,
                strict_lbd_limit: params.strict_lbd_limit,
                clause_base_buffer_size: params.clause_buffer_base_size,
                min_num_chunks_per_solver: params.min_import_chunks_per_solver,
                num_buffered_cls_generations: params.buffered_import_generations,
                anticipated_lits_to_import_per_cycle: 100.0,
                ..Default::default()
            })
            .collect();
        SharingManager::new(&params, &setups)
    }

    #[test]
    fn produced_clauses_come_back_out_of_prepare_sharing() {
        let mgr = manager(2);
        assert_eq!(ExportResult::Admitted, mgr.export_clause(0, vec![1, -2, 3], 2));
        assert_eq!(ExportResult::Admitted, mgr.export_clause(1, vec![4], 1));

        let buffer = mgr.prepare_sharing(1024);
        let clauses: Vec<Clause> = BufferReader::new(buffer).collect();
        assert_eq!(2, clauses.len());
        assert!(clauses[0].is_unit());
    }

    #[test]
    fn commutative_duplicates_only_extend_the_producer_set() {
        let mgr = manager(2);
        assert_eq!(ExportResult::Admitted, mgr.export_clause(0, vec![1, -2, 3], 3));
        assert_eq!(ExportResult::Filtered, mgr.export_clause(1, vec![-2, 3, 1], 3));
        assert_eq!(0b11, mgr.producers_of(&Clause::new(vec![1, -2, 3], 3)));
    }

    #[test]
    fn producers_never_reimport_their_own_clause() {
        let mgr = manager(2);
        mgr.export_clause(0, vec![1, 2, 3], 2);
        let buffer = mgr.prepare_sharing(1024);
        assert!(mgr.digest_sharing(buffer) > 0);

        // Solver 0 produced the clause: nothing to import.
        assert!(mgr.import_manager(0).lock().is_empty());
        // Solver 1 receives it.
        let clause = mgr.import_manager(1).lock().next_clause();
        assert_eq!(Some(Clause::new(vec![1, 2, 3], 2)), clause);
    }

    #[test]
    fn foreign_clauses_reach_every_solver() {
        let mgr = manager(2);
        let mut builder = BufferBuilder::new(64);
        builder.add(&Clause::new(vec![7, 8], 2));
        assert_eq!(1, mgr.digest_sharing(builder.take()));
        assert!(!mgr.import_manager(0).lock().is_empty());
        assert!(!mgr.import_manager(1).lock().is_empty());
    }

    #[test]
    fn limit_violations_are_dropped_at_export() {
        let mgr = manager(1);
        let long: Vec<i32> = (1..=40).collect();
        assert_eq!(ExportResult::Dropped, mgr.export_clause(0, long, 2));
        assert_eq!(ExportResult::Dropped, mgr.export_clause(0, vec![], 1));
    }

    #[test]
    fn redigesting_a_known_clause_within_the_horizon_is_filtered() {
        let mgr = manager(2);
        mgr.set_epoch(5);
        mgr.export_clause(0, vec![1, 2, 3], 2);
        let buffer = mgr.prepare_sharing(1024);
        assert_eq!(1, mgr.digest_sharing(buffer.clone()));
        // Shared moments ago with the same LBD: the filter holds it back.
        assert_eq!(0, mgr.digest_sharing(buffer));
    }

    #[test]
    fn unknown_foreign_clauses_always_admit() {
        let mgr = manager(1);
        let mut builder = BufferBuilder::new(64);
        builder.add(&Clause::new(vec![7, 8], 2));
        let buffer = builder.take();
        assert_eq!(1, mgr.digest_sharing(buffer.clone()));
        assert_eq!(1, mgr.digest_sharing(buffer));
    }
}
