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

//! The child side of the attempt: the solver process image that the
//! adapter forks and execs. It attaches the shared regions by name,
//! installs its portfolio of engines from the configured choice string,
//! runs one solver thread per engine, and services the request flags of
//! the control record from its main loop. An embedding binary does little
//! more than parse its single argument and call [`SolverProcess::attach`]
//! followed by [`SolverProcess::run`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use fxhash::FxHashMap;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::process;
use crate::{
    ControlRecord, DeterministicClauseSynchronizer, Error, Parameters, Result, SatResult,
    SharedMemory, SharingManager, SolverEngine, SolverSetup,
};

// ----------------------------------------------------------------------------
// --- PORTFOLIO DISTRIBUTION -------------------------------------------------
// ----------------------------------------------------------------------------

/// Expands the portfolio choice string into per-solver engine tags with
/// diversification indices, for `num_local` solvers on node `app_rank` of
/// the job tree. The cycle continues across ranks: with choices "llgc" and
/// two solvers per node, node 0 runs `l0 l1`, node 1 runs `g0 c0`, node 2
/// runs `l2 l3`, and so on. The diversification index of a solver counts
/// the same-tag engines instantiated before it anywhere in the job.
pub fn portfolio_distribution(choices: &str, app_rank: usize, num_local: usize) -> Vec<(char, usize)> {
    let tags: Vec<char> = choices.chars().collect();
    if tags.is_empty() {
        return Vec::new();
    }
    let n = tags.len();
    let full_cycles = (app_rank * num_local) / n;
    let begun_cycle_pos = (app_rank * num_local) % n;

    // Count engines of each tag contributed by previous ranks.
    let mut counts: FxHashMap<char, usize> = FxHashMap::default();
    for (i, tag) in tags.iter().enumerate() {
        *counts.entry(*tag).or_insert(0) += full_cycles + usize::from(i < begun_cycle_pos);
    }

    let mut result = Vec::with_capacity(num_local);
    let mut pos = begun_cycle_pos;
    for _ in 0..num_local {
        let tag = tags[pos];
        let div = counts.entry(tag).or_insert(0);
        result.push((tag, *div));
        *div += 1;
        pos = (pos + 1) % n;
    }
    result
}

// ----------------------------------------------------------------------------
// --- ENGINE REGISTRY --------------------------------------------------------
// ----------------------------------------------------------------------------

/// Creates an engine for one portfolio tag.
pub type EngineFactory = Box<dyn Fn(SolverSetup) -> Arc<dyn SolverEngine> + Send + Sync>;

/// Maps portfolio tags (e.g. 'l', 'c', 'g') onto engine factories. The
/// embedding binary registers its native bindings here.
#[derive(Default)]
pub struct EngineRegistry {
    factories: FxHashMap<char, EngineFactory>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: char, factory: EngineFactory) {
        self.factories.insert(tag, factory);
    }

    pub fn create(&self, tag: char, setup: SolverSetup) -> Result<Arc<dyn SolverEngine>> {
        match self.factories.get(&tag) {
            Some(factory) => Ok(factory(setup)),
            None => Err(Error::Fatal(format!("no engine registered for tag {tag:?}"))),
        }
    }
}

// ----------------------------------------------------------------------------
// --- SOLVER PROCESS ---------------------------------------------------------
// ----------------------------------------------------------------------------

struct SolverOutcome {
    local_id: usize,
    revision: i32,
    result: SatResult,
    solution: Vec<i32>,
}

/// One revision's payload as handed to the solver threads.
#[derive(Clone)]
struct RevisionBatch {
    revision: i32,
    formula: Vec<i32>,
    assumptions: Vec<i32>,
}

/// The quiescent-point handoff between the main loop and the solver
/// threads: the main loop publishes every revision it picked up from
/// shared memory, and each solver thread blocks here between solving
/// attempts until formula material it has not loaded yet exists.
struct RevisionFeed {
    batches: Mutex<Vec<RevisionBatch>>,
    monitor: Condvar,
    cancelled: AtomicBool,
}

impl RevisionFeed {
    fn new(initial: RevisionBatch) -> Self {
        RevisionFeed {
            batches: Mutex::new(vec![initial]),
            monitor: Condvar::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    fn publish(&self, batch: RevisionBatch) {
        self.batches.lock().push(batch);
        self.monitor.notify_all();
    }

    /// Blocks until more than `loaded` batches exist, returning the ones
    /// the caller has not seen; `None` once the feed is shut down.
    fn wait_beyond(&self, loaded: usize) -> Option<Vec<RevisionBatch>> {
        let mut batches = self.batches.lock();
        loop {
            if batches.len() > loaded {
                return Some(batches[loaded..].to_vec());
            }
            if self.cancelled.load(Ordering::Acquire) {
                return None;
            }
            self.monitor.wait(&mut batches);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.monitor.notify_all();
    }
}

/// The running child image: regions, engines, sharing machinery, and the
/// main-loop flag servicing.
pub struct SolverProcess {
    shmem_id: String,
    control_region: SharedMemory,
    export_region: SharedMemory,
    import_region: SharedMemory,

    revisions: Arc<RevisionFeed>,
    current_revision: i32,

    engines: Vec<Arc<dyn SolverEngine>>,
    sharing: Arc<SharingManager>,
    synchronizer: Option<Arc<DeterministicClauseSynchronizer>>,

    outcome_tx: Sender<SolverOutcome>,
    outcome_rx: Receiver<SolverOutcome>,
    solver_threads: Vec<std::thread::JoinHandle<()>>,
    solution_region: Option<SharedMemory>,

    sleep: Duration,
}

impl SolverProcess {
    /// Attaches to the attempt identified by `shmem_id` and instantiates
    /// the portfolio. Called as the very first thing in the child image.
    pub fn attach(shmem_id: &str, params: &Parameters, registry: &EngineRegistry) -> Result<Self> {
        let control_region = SharedMemory::attach(shmem_id, ControlRecord::SIZE)?;
        let control = ControlRecord::attach(&control_region);
        let app_rank = control.portfolio_rank.load(Ordering::Relaxed) as usize;
        let cluster_size = control.portfolio_size.load(Ordering::Relaxed).max(1) as usize;
        let first_revision = control.desired_revision.load(Ordering::Relaxed).max(0);

        let export_region = SharedMemory::attach_auto(&format!("{shmem_id}.clauseexport"))?;
        let import_region = SharedMemory::attach_auto(&format!("{shmem_id}.clauseimport"))?;
        let formula = read_payload(&format!("{shmem_id}.formulae.{first_revision}"))?;
        let assumptions = read_payload(&format!("{shmem_id}.assumptions"))?;

        let num_local = params.solver_threads();
        let distribution = portfolio_distribution(&params.portfolio, app_rank, num_local);
        let mut setups = Vec::with_capacity(num_local);
        let mut engines = Vec::with_capacity(num_local);
        for (local_id, (tag, div)) in distribution.iter().enumerate() {
            let setup = SolverSetup {
                local_id,
                global_id: app_rank * num_local + local_id,
                diversification_index: *div,
                is_incremental: first_revision > 0 || control.desired_revision.load(Ordering::Relaxed) > 0,
                strict_clause_length_limit: params.strict_clause_length_limit,
                strict_lbd_limit: params.strict_lbd_limit,
                clause_base_buffer_size: params.clause_buffer_base_size,
                min_num_chunks_per_solver: params.min_import_chunks_per_solver,
                num_buffered_cls_generations: params.buffered_import_generations,
                anticipated_lits_to_import_per_cycle: (params.clause_buffer_base_size
                    * cluster_size) as f32
                    / num_local.max(1) as f32,
                reset_lbd_before_import: params.reset_lbd_on_import,
                increment_lbd_before_import: params.increment_lbd_on_import,
                diversify_initial_imports: params.diversify_initial_imports,
            };
            debug!("S{} : engine {tag}-{div}", setup.global_id);
            engines.push(registry.create(*tag, setup.clone())?);
            setups.push(setup);
        }

        let sharing = Arc::new(SharingManager::new(params, &setups));
        // In deterministic mode, all clause admissions funnel through one
        // synchronizer whose callback performs the actual export.
        let synchronizer = params.deterministic_solving.then(|| {
            let sink = Arc::clone(&sharing);
            Arc::new(DeterministicClauseSynchronizer::new(
                setups.iter().map(|s| s.global_id).collect(),
                params.ops_until_sync(),
                Box::new(move |call| {
                    sink.export_clause(
                        call.solver_id,
                        call.clause.lits.clone(),
                        call.clause.lbd,
                    );
                }),
            ))
        });
        let (outcome_tx, outcome_rx) = channel();
        control.is_spawned.store(true, Ordering::Release);
        info!("{shmem_id}: portfolio of {} engines attached", engines.len());

        Ok(SolverProcess {
            shmem_id: shmem_id.to_string(),
            control_region,
            export_region,
            import_region,
            revisions: Arc::new(RevisionFeed::new(RevisionBatch {
                revision: first_revision,
                formula,
                assumptions,
            })),
            current_revision: first_revision,
            engines,
            sharing,
            synchronizer,
            outcome_tx,
            outcome_rx,
            solver_threads: Vec::new(),
            solution_region: None,
            sleep: Duration::from_micros(params.sleep_microsecs),
        })
    }

    fn control(&self) -> &ControlRecord {
        ControlRecord::attach(&self.control_region)
    }

    /// The admission synchronizer of deterministic mode, if enabled.
    pub fn synchronizer(&self) -> Option<&Arc<DeterministicClauseSynchronizer>> {
        self.synchronizer.as_ref()
    }

    /// The newest revision this image has picked up from shared memory.
    pub fn current_revision(&self) -> i32 {
        self.current_revision
    }

    /// Spawns one solver thread per engine and raises `is_initialized`.
    /// The threads take their formula material from the revision feed, so
    /// they keep serving later revisions without being respawned.
    pub fn start_solving(&mut self) {
        for (local_id, engine) in self.engines.iter().enumerate() {
            let engine = Arc::clone(engine);
            let sharing = Arc::clone(&self.sharing);
            let feed = Arc::clone(&self.revisions);
            let outcome_tx = self.outcome_tx.clone();
            self.solver_threads.push(std::thread::spawn(move || {
                solver_thread(local_id, engine, sharing, feed, outcome_tx);
            }));
        }
        self.control().is_initialized.store(true, Ordering::Release);
    }

    /// One main-loop iteration: answer pending requests, pump learned
    /// clauses out of the engines, publish a result if one arrived.
    pub fn service(&mut self) -> Result<()> {
        self.service_revisions()?;
        self.pump_exports();
        self.service_export_flag()?;
        self.service_import_flag()?;
        self.service_interrupt_flag();
        self.service_role_flag();
        self.service_stats_flag();
        self.publish_outcome()?;
        Ok(())
    }

    /// Picks up every revision the parent has published since the last
    /// cycle: reads the new payload regions, refreshes the import gating,
    /// hands the material to the solver threads, and kicks the running
    /// searches out of the stale revision. Solvers that have not caught up
    /// yet are re-interrupted on every cycle until they have.
    fn service_revisions(&mut self) -> Result<()> {
        let written = self.control().written_revision.load(Ordering::Acquire);
        while self.current_revision < written {
            let revision = self.current_revision + 1;
            let formula = read_payload(&format!("{}.formulae.{revision}", self.shmem_id))?;
            let assumptions = read_payload(&format!("{}.assumptions.{revision}", self.shmem_id))?;
            info!("{}: picking up revision {revision}", self.shmem_id);

            // Whatever result was pending belongs to an older revision.
            {
                let control = self.control();
                control.has_solution.store(false, Ordering::Release);
                control.result.store(SatResult::Unknown.code(), Ordering::Relaxed);
                control.solution_size.store(0, Ordering::Relaxed);
            }
            self.solution_region = None;

            self.sharing.set_imported_revision(revision);
            self.revisions.publish(RevisionBatch { revision, formula, assumptions });
            self.current_revision = revision;
        }
        self.nudge_stale_solvers();
        Ok(())
    }

    /// Interrupts every engine whose solver thread still works on an
    /// older revision, so it reaches its next quiescent point and reloads.
    fn nudge_stale_solvers(&self) {
        for (local_id, engine) in self.engines.iter().enumerate() {
            let lagging = self.sharing.import_manager(local_id).lock().solver_revision()
                < self.current_revision;
            if lagging {
                engine.interrupt();
            }
        }
    }

    /// Drains learned clauses from all engines into the sharing database.
    fn pump_exports(&self) {
        for (local_id, engine) in self.engines.iter().enumerate() {
            while let Some((lits, lbd)) = engine.pop_learned_clause() {
                self.sharing.export_clause(local_id, lits, lbd);
            }
        }
    }

    fn service_export_flag(&self) -> Result<()> {
        let control = self.control();
        if control.do_export.load(Ordering::Acquire) {
            if !control.did_export.load(Ordering::Relaxed) {
                let max_words = (control.export_buffer_max_size.load(Ordering::Relaxed).max(0)
                    as usize)
                    .min(self.export_region.capacity_words());
                let buffer = self.sharing.prepare_sharing(max_words);
                self.export_region.write_ints(0, &buffer)?;
                control.export_buffer_true_size.store(buffer.len() as i32, Ordering::Relaxed);
                control.did_export.store(true, Ordering::Release);
            }
        } else if control.did_export.load(Ordering::Relaxed) {
            control.did_export.store(false, Ordering::Release);
        }
        Ok(())
    }

    fn service_import_flag(&self) -> Result<()> {
        let control = self.control();
        if control.do_import.load(Ordering::Acquire) {
            if !control.did_import.load(Ordering::Relaxed) {
                let words = (control.import_buffer_size.load(Ordering::Relaxed).max(0) as usize)
                    .min(self.import_region.capacity_words());
                let buffer = self.import_region.read_ints(0, words)?;
                self.sharing.digest_sharing(buffer);
                self.deliver_imports();
                control.did_import.store(true, Ordering::Release);
            }
        } else if control.did_import.load(Ordering::Relaxed) {
            control.did_import.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Moves admitted clauses from the import managers into the engines.
    fn deliver_imports(&self) {
        for (local_id, engine) in self.engines.iter().enumerate() {
            let manager = self.sharing.import_manager(local_id);
            let mut manager = manager.lock();
            if !manager.can_import() {
                continue;
            }
            for unit in manager.take_units() {
                engine.add_learned_clause(&[unit], 1);
            }
            while let Some(clause) = manager.next_clause() {
                engine.add_learned_clause(&clause.lits, clause.lbd);
            }
        }
    }

    fn service_interrupt_flag(&self) {
        let control = self.control();
        if control.do_interrupt.load(Ordering::Acquire) {
            if !control.did_interrupt.load(Ordering::Relaxed) {
                for engine in &self.engines {
                    engine.interrupt();
                }
                control.did_interrupt.store(true, Ordering::Release);
            }
        } else if control.did_interrupt.load(Ordering::Relaxed) {
            control.did_interrupt.store(false, Ordering::Release);
        }
    }

    fn service_role_flag(&self) {
        let control = self.control();
        if control.do_update_role.load(Ordering::Acquire) {
            if !control.did_update_role.load(Ordering::Relaxed) {
                debug!(
                    "{}: role update to {}/{}",
                    self.shmem_id,
                    control.portfolio_rank.load(Ordering::Relaxed),
                    control.portfolio_size.load(Ordering::Relaxed)
                );
                control.did_update_role.store(true, Ordering::Release);
            }
        } else if control.did_update_role.load(Ordering::Relaxed) {
            control.did_update_role.store(false, Ordering::Release);
        }
    }

    fn service_stats_flag(&self) {
        let control = self.control();
        if control.do_dump_stats.load(Ordering::Acquire) {
            if !control.did_dump_stats.load(Ordering::Relaxed) {
                for (local_id, engine) in self.engines.iter().enumerate() {
                    let st = engine.statistics();
                    info!(
                        "S{local_id} pps:{} decs:{} cnfs:{} mem:{:.2}",
                        st.propagations, st.decisions, st.conflicts, st.mem_peak_mbs
                    );
                }
                control.did_dump_stats.store(true, Ordering::Release);
            }
        } else if control.did_dump_stats.load(Ordering::Relaxed) {
            control.did_dump_stats.store(false, Ordering::Release);
        }
    }

    /// The first finished solver wins: its result and solution are put
    /// into shared memory and announced through `has_solution`.
    fn publish_outcome(&mut self) -> Result<()> {
        if self.control().has_solution.load(Ordering::Relaxed) {
            return Ok(());
        }
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            if outcome.result == SatResult::Unknown || outcome.revision < self.current_revision {
                // Stale: a solver finished a revision that has since been
                // superseded.
                continue;
            }
            info!(
                "{}: S{} reports {:?} for revision {}",
                self.shmem_id, outcome.local_id, outcome.result, outcome.revision
            );
            if !outcome.solution.is_empty() {
                let region = SharedMemory::create(
                    &format!("{}.solution", self.shmem_id),
                    outcome.solution.len() * 4,
                )?;
                region.write_ints(0, &outcome.solution)?;
                self.solution_region = Some(region);
            }
            let control = self.control();
            control.solution_size.store(outcome.solution.len() as i32, Ordering::Relaxed);
            control.result.store(outcome.result.code(), Ordering::Relaxed);
            control.has_solution.store(true, Ordering::Release);
            return Ok(());
        }
        Ok(())
    }

    /// The child's main loop: service flags until the process is asked to
    /// exit, then interrupt and join the portfolio.
    pub fn run(&mut self) -> Result<()> {
        self.start_solving();
        while process::exit_signal_caught().is_none() {
            self.service()?;
            std::thread::sleep(self.sleep);
        }
        self.shut_down_portfolio();
        Ok(())
    }

    fn shut_down_portfolio(&mut self) {
        self.revisions.cancel();
        for engine in &self.engines {
            engine.interrupt();
        }
        for handle in self.solver_threads.drain(..) {
            if handle.join().is_err() {
                warn!("{}: solver thread panicked", self.shmem_id);
            }
        }
    }
}

impl Drop for SolverProcess {
    fn drop(&mut self) {
        self.shut_down_portfolio();
    }
}

/// One engine's lifetime: load whatever revisions are pending, solve, and
/// go back to the feed. An interrupted solve returns `Unknown` and the
/// loop naturally becomes the quiescent point at which later revisions
/// are appended to the engine, in arrival order.
fn solver_thread(
    local_id: usize,
    engine: Arc<dyn SolverEngine>,
    sharing: Arc<SharingManager>,
    feed: Arc<RevisionFeed>,
    outcome_tx: Sender<SolverOutcome>,
) {
    let mut loaded = 0;
    loop {
        let Some(batches) = feed.wait_beyond(loaded) else { return };
        loaded += batches.len();
        let mut assumptions: Vec<i32> = Vec::new();
        let mut revision = 0;
        for batch in &batches {
            if let Err(e) = engine.load_formula(&batch.formula) {
                warn!("S{local_id}: could not load revision {}: {e}", batch.revision);
                return;
            }
            assumptions = batch.assumptions.clone();
            revision = batch.revision;
        }
        sharing.import_manager(local_id).lock().update_solver_revision(revision);

        match engine.solve(&assumptions) {
            Ok(SatResult::Sat) => {
                let _ = outcome_tx.send(SolverOutcome {
                    local_id,
                    revision,
                    result: SatResult::Sat,
                    solution: engine.model(),
                });
            }
            Ok(SatResult::Unsat) => {
                let _ = outcome_tx.send(SolverOutcome {
                    local_id,
                    revision,
                    result: SatResult::Unsat,
                    solution: engine.failed_assumptions(),
                });
            }
            Ok(SatResult::Unknown) => {}
            Err(e) => {
                warn!("S{local_id}: solve failed: {e}");
                return;
            }
        }
    }
}

fn read_payload(name: &str) -> Result<Vec<i32>> {
    let region = SharedMemory::attach_auto(name)?;
    let header = region.read_ints(0, 1)?;
    let len = header[0].max(0) as usize;
    region.read_ints(1, len)
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_portfolio {
    use super::portfolio_distribution;

    #[test]
    fn the_cycle_continues_across_ranks() {
        // "llgc" with two solvers per node.
        assert_eq!(vec![('l', 0), ('l', 1)], portfolio_distribution("llgc", 0, 2));
        assert_eq!(vec![('g', 0), ('c', 0)], portfolio_distribution("llgc", 1, 2));
        assert_eq!(vec![('l', 2), ('l', 3)], portfolio_distribution("llgc", 2, 2));
        assert_eq!(vec![('g', 1), ('c', 1)], portfolio_distribution("llgc", 3, 2));
    }

    #[test]
    fn a_single_tag_just_counts_up() {
        assert_eq!(vec![('l', 12), ('l', 13), ('l', 14), ('l', 15)],
            portfolio_distribution("l", 3, 4));
    }

    #[test]
    fn diversification_indices_are_unique_per_tag() {
        let mut seen = std::collections::HashSet::new();
        for rank in 0..8 {
            for entry in portfolio_distribution("lcg", rank, 3) {
                assert!(seen.insert(entry), "duplicate {entry:?}");
            }
        }
    }

    #[test]
    fn an_empty_choice_string_yields_no_solvers() {
        assert!(portfolio_distribution("", 0, 4).is_empty());
    }
}

#[cfg(test)]
mod test_solver_process {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        ParametersBuilder, RevisionData, SolverProcessAdapter, SolvingState, SubprocessConfig,
    };

    struct MockEngine {
        setup: SolverSetup,
        scripted: Option<(SatResult, Vec<i32>)>,
        learned: Mutex<VecDeque<(Vec<i32>, u32)>>,
        imported: Mutex<Vec<(Vec<i32>, u32)>>,
        loads: Mutex<Vec<Vec<i32>>>,
        solved_with: Mutex<Vec<Vec<i32>>>,
        interrupts: AtomicUsize,
    }

    impl SolverEngine for MockEngine {
        fn setup(&self) -> &SolverSetup {
            &self.setup
        }
        fn load_formula(&self, lits: &[i32]) -> crate::Result<()> {
            self.loads.lock().push(lits.to_vec());
            Ok(())
        }
        fn solve(&self, assumptions: &[i32]) -> crate::Result<SatResult> {
            self.solved_with.lock().push(assumptions.to_vec());
            if let Some((result, _)) = &self.scripted {
                return Ok(*result);
            }
            // Search until interrupted, like a real engine would.
            let seen = self.interrupts.load(Ordering::Relaxed);
            while self.interrupts.load(Ordering::Relaxed) == seen {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(SatResult::Unknown)
        }
        fn model(&self) -> Vec<i32> {
            self.scripted.as_ref().map(|s| s.1.clone()).unwrap_or_default()
        }
        fn failed_assumptions(&self) -> Vec<i32> {
            Vec::new()
        }
        fn add_learned_clause(&self, lits: &[i32], lbd: u32) {
            self.imported.lock().push((lits.to_vec(), lbd));
        }
        fn pop_learned_clause(&self) -> Option<(Vec<i32>, u32)> {
            self.learned.lock().pop_front()
        }
        fn interrupt(&self) {
            self.interrupts.fetch_add(1, Ordering::Relaxed);
        }
        fn suspend(&self) {}
        fn resume(&self) {}
        fn statistics(&self) -> crate::SolverStatistics {
            crate::SolverStatistics::default()
        }
    }

    type EngineSink = Arc<Mutex<Vec<Arc<MockEngine>>>>;

    fn registry(
        scripted: Option<(SatResult, Vec<i32>)>,
        learned: Vec<(Vec<i32>, u32)>,
    ) -> (EngineRegistry, EngineSink) {
        let sink: EngineSink = Arc::new(Mutex::new(Vec::new()));
        let handle = Arc::clone(&sink);
        let mut registry = EngineRegistry::new();
        registry.register(
            'l',
            Box::new(move |setup| {
                let engine = Arc::new(MockEngine {
                    setup,
                    scripted: scripted.clone(),
                    learned: Mutex::new(learned.clone().into()),
                    imported: Mutex::new(Vec::new()),
                    loads: Mutex::new(Vec::new()),
                    solved_with: Mutex::new(Vec::new()),
                    interrupts: AtomicUsize::new(0),
                });
                handle.lock().push(Arc::clone(&engine));
                engine as Arc<dyn SolverEngine>
            }),
        );
        (registry, sink)
    }

    fn params() -> crate::Parameters {
        ParametersBuilder::default()
            .clause_buffer_base_size(64_usize)
            .threads_per_process(2_usize)
            .build()
            .unwrap()
    }

    fn adapter(job_id: i32, p: &crate::Parameters) -> SolverProcessAdapter {
        let config = SubprocessConfig::new(p, job_id, 0, 0, 2, false, 0, 0);
        SolverProcessAdapter::new(p, config, vec![1, 2, 0, -1, 3, 0], vec![]).unwrap()
    }

    fn wait_for(mut predicate: impl FnMut() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !predicate() {
            assert!(std::time::Instant::now() < deadline, "condition never met");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn export_round_trip_between_adapter_and_child_image() {
        let p = params();
        let mut adapter = adapter(9101, &p);
        let (registry, _) = registry(None, vec![(vec![1, 2, 3], 2)]);
        let mut child = SolverProcess::attach(adapter.shared_memory_id(), &p, &registry).unwrap();
        child.start_solving();
        assert!(adapter.is_fully_initialized());

        adapter.collect_clauses(64);
        child.service().unwrap();
        assert!(adapter.has_collected_clauses());
        let buffer = adapter.get_collected_clauses().unwrap();
        let clauses: Vec<crate::Clause> = crate::BufferReader::new(buffer).collect();
        assert_eq!(1, clauses.len());
        assert_eq!(vec![1, 2, 3], clauses[0].lits);

        // The child notices the lowered request and completes the cycle.
        child.service().unwrap();
        assert!(!adapter.has_collected_clauses());
        adapter.free_shared_memory();
    }

    #[test]
    fn imports_reach_every_engine() {
        let p = params();
        let mut adapter = adapter(9102, &p);
        let (registry, engines) = registry(None, vec![]);
        let mut child = SolverProcess::attach(adapter.shared_memory_id(), &p, &registry).unwrap();
        child.start_solving();

        let mut builder = crate::BufferBuilder::new(64);
        builder.add(&crate::Clause::new(vec![7, 8], 2));
        adapter.digest_clauses(&builder.take()).unwrap();

        // Wait until the solver threads reported their revision, then let
        // the child service the import request.
        wait_for(|| engines.lock().len() == 2);
        child.service().unwrap();
        assert!(adapter.check() || !adapter.has_solution());

        for engine in engines.lock().iter() {
            let imported = engine.imported.lock();
            assert_eq!(vec![(vec![7, 8], 2)], imported.clone());
        }
        adapter.free_shared_memory();
    }

    #[test]
    fn the_first_result_is_published_with_its_model() {
        let p = params();
        let mut adapter = adapter(9103, &p);
        let (registry, _) = registry(Some((SatResult::Sat, vec![0, 1, -2, 3])), vec![]);
        let mut child = SolverProcess::attach(adapter.shared_memory_id(), &p, &registry).unwrap();
        child.start_solving();

        wait_for(|| {
            child.service().unwrap();
            adapter.has_solution()
        });
        let (result, model) = adapter.get_solution().unwrap();
        assert_eq!(SatResult::Sat, result);
        assert_eq!(vec![0, 1, -2, 3], model);
        adapter.free_shared_memory();
    }

    #[test]
    fn interrupts_reach_the_engines_and_are_acknowledged() {
        let p = params();
        let mut adapter = adapter(9104, &p);
        let (registry, engines) = registry(None, vec![]);
        let mut child = SolverProcess::attach(adapter.shared_memory_id(), &p, &registry).unwrap();
        child.start_solving();

        adapter.set_solving_state(SolvingState::Standby);
        child.service().unwrap();
        adapter.check();
        child.service().unwrap();

        for engine in engines.lock().iter() {
            assert!(engine.interrupts.load(Ordering::Relaxed) >= 1);
        }
        adapter.free_shared_memory();
    }

    /// A second revision travels adapter -> background writer -> shared
    /// memory -> running child image: the portfolio is interrupted at its
    /// quiescent point, loads the new material, and resumes on it.
    #[test]
    fn the_child_picks_up_revisions_by_number() {
        let p = params();
        let mut adapter = adapter(9105, &p);
        let (registry, engines) = registry(None, vec![]);
        let mut child = SolverProcess::attach(adapter.shared_memory_id(), &p, &registry).unwrap();
        child.start_solving();
        assert_eq!(0, child.current_revision());

        adapter.append_revisions(
            vec![RevisionData { revision: 1, formula: vec![4, 0], assumptions: vec![4] }],
            1,
        );
        wait_for(|| adapter.written_revision() >= 1);

        // Service cycles pick the revision up and re-interrupt the
        // engines until every solver thread has reloaded.
        wait_for(|| {
            child.service().unwrap();
            engines.lock().iter().all(|e| e.loads.lock().len() == 2)
        });
        assert_eq!(1, child.current_revision());
        for engine in engines.lock().iter() {
            let loads = engine.loads.lock();
            assert_eq!(vec![1, 2, 0, -1, 3, 0], loads[0]);
            assert_eq!(vec![4, 0], loads[1]);
        }

        // The searches resume under the new revision's assumptions.
        wait_for(|| engines.lock().iter().all(|e| e.solved_with.lock().len() >= 2));
        for engine in engines.lock().iter() {
            assert_eq!(vec![4], engine.solved_with.lock()[1]);
        }

        // The import gate reopened: every solver reported revision 1.
        wait_for(|| (0..2).all(|i| child.sharing.import_manager(i).lock().can_import()));
        adapter.free_shared_memory();
    }
}
