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

//! The parent-side adapter around one solver subprocess attempt. It owns
//! the attempt's shared-memory regions, forks and execs the solver image,
//! drives the request/response flag protocol, maps lifecycle transitions
//! onto signals, and hands further revisions of incremental jobs to a
//! background writer thread.

use std::collections::VecDeque;
use std::ffi::CString;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::process;
use crate::{
    BackgroundWorker, ControlRecord, Error, ForkResult, Parameters, Result, SatResult,
    SharedMemory, SolvingState, SubprocessConfig,
};

/// One further revision of an incremental job, to be published to the
/// running subprocess.
#[derive(Debug, Clone)]
pub struct RevisionData {
    pub revision: i32,
    pub formula: Vec<i32>,
    pub assumptions: Vec<i32>,
}

/// State shared with the background revision writer.
struct WriterState {
    shmem_id: String,
    pending: Mutex<VecDeque<RevisionData>>,
    /// Revision regions created after the fork; freed with the attempt.
    dynamic_regions: Mutex<Vec<SharedMemory>>,
    control_region: SharedMemory,
}

impl WriterState {
    fn control(&self) -> &ControlRecord {
        ControlRecord::attach(&self.control_region)
    }
}

pub struct SolverProcessAdapter {
    config: SubprocessConfig,
    binary: String,
    grace_period: Duration,
    shmem_id: String,

    shared: Arc<WriterState>,
    /// Regions of the initial revision plus the clause channels.
    static_regions: Vec<SharedMemory>,
    export_region: SharedMemory,
    import_region: SharedMemory,

    child_pid: Option<libc::pid_t>,
    state: SolvingState,
    bg_writer: BackgroundWorker,
}

impl SolverProcessAdapter {
    /// Sets up all shared memory for the attempt. The subprocess is not
    /// started yet; call [`Self::run`] for that.
    pub fn new(
        params: &Parameters,
        config: SubprocessConfig,
        formula: Vec<i32>,
        assumptions: Vec<i32>,
    ) -> Result<Self> {
        let shmem_id = config.shared_memory_id(&params.shmem_prefix, std::process::id());

        let control_region = SharedMemory::create(&shmem_id, ControlRecord::SIZE)?;
        let control = ControlRecord::attach(&control_region);
        control.init(config.app_rank as i32, config.cluster_size as i32);
        control
            .export_capacity_words
            .store(config.export_buffer_words as i32, Ordering::Relaxed);
        control
            .import_capacity_words
            .store(config.import_buffer_words as i32, Ordering::Relaxed);
        control.desired_revision.store(config.first_revision, Ordering::Relaxed);

        let mut static_regions = Vec::new();
        static_regions.push(Self::payload_region(
            &format!("{shmem_id}.formulae.{}", config.first_revision),
            &formula,
        )?);
        static_regions.push(Self::payload_region(&format!("{shmem_id}.assumptions"), &assumptions)?);

        let export_region =
            SharedMemory::create(&format!("{shmem_id}.clauseexport"), config.export_buffer_words * 4)?;
        let import_region =
            SharedMemory::create(&format!("{shmem_id}.clauseimport"), config.import_buffer_words * 4)?;

        info!("attempt {shmem_id}: shared memory set up");
        Ok(SolverProcessAdapter {
            binary: params.subprocess_binary.clone(),
            grace_period: Duration::from_secs_f32(params.subprocess_grace_period.max(0.0)),
            shmem_id: shmem_id.clone(),
            shared: Arc::new(WriterState {
                shmem_id,
                pending: Mutex::new(VecDeque::new()),
                dynamic_regions: Mutex::new(Vec::new()),
                control_region,
            }),
            static_regions,
            export_region,
            import_region,
            child_pid: None,
            state: SolvingState::Initializing,
            bg_writer: BackgroundWorker::new(),
            config,
        })
    }

    /// A self-describing payload region: word 0 is the literal count.
    fn payload_region(name: &str, lits: &[i32]) -> Result<SharedMemory> {
        let region = SharedMemory::create(name, (lits.len() + 1) * 4)?;
        region.write_ints(0, &[lits.len() as i32])?;
        region.write_ints(1, lits)?;
        Ok(region)
    }

    fn control(&self) -> &ControlRecord {
        self.shared.control()
    }

    pub fn shared_memory_id(&self) -> &str {
        &self.shmem_id
    }

    pub fn config(&self) -> &SubprocessConfig {
        &self.config
    }

    pub fn pid(&self) -> Option<libc::pid_t> {
        self.child_pid
    }

    pub fn state(&self) -> SolvingState {
        self.state
    }

    // ------------------------------------------------------------------------
    // --- LIFECYCLE ----------------------------------------------------------
    // ------------------------------------------------------------------------

    /// Forks and execs the solver image, passing the shared-memory id as
    /// the single argument. In the parent, the attempt becomes `Active`.
    pub fn run(&mut self) -> Result<()> {
        debug!("invoking fork(): {} {}", self.binary, self.shmem_id);
        match process::create_child()? {
            ForkResult::Parent(pid) => {
                self.child_pid = Some(pid);
                self.state = SolvingState::Active;
                Ok(())
            }
            ForkResult::Child => {
                // Forked image: nothing but exec may happen here.
                let argv0 = CString::new(self.binary.as_str()).unwrap_or_default();
                let argv1 = CString::new(self.shmem_id.as_str()).unwrap_or_default();
                let argv = [argv0.as_ptr(), argv1.as_ptr(), std::ptr::null()];
                unsafe {
                    libc::execvp(argv0.as_ptr(), argv.as_ptr());
                    // exec only returns on failure.
                    libc::_exit(1)
                }
            }
        }
    }

    pub fn is_fully_initialized(&self) -> bool {
        self.control().is_initialized.load(Ordering::Acquire)
    }

    /// Maps a requested lifecycle state onto the child: `Aborting` sends
    /// SIGTERM+SIGCONT, `Suspended` SIGTSTP, `Active` SIGCONT, `Standby`
    /// raises the soft-interrupt flag. Requesting the current state again
    /// is a no-op, so repeated identical transitions cannot stack signals.
    pub fn set_solving_state(&mut self, state: SolvingState) {
        if state == self.state {
            return;
        }
        match state {
            SolvingState::Aborting => {
                if let Some(pid) = self.child_pid {
                    process::terminate(pid);
                }
            }
            SolvingState::Suspended => {
                if let Some(pid) = self.child_pid {
                    process::suspend(pid);
                }
            }
            SolvingState::Active => {
                if let Some(pid) = self.child_pid {
                    process::resume(pid);
                }
            }
            SolvingState::Standby => self.control().do_interrupt.store(true, Ordering::Release),
            SolvingState::Initializing => {}
        }
        debug!("attempt {}: state {:?} -> {:?}", self.shmem_id, self.state, state);
        self.state = state;
    }

    /// Whether the subprocess died without being asked to. Detected by a
    /// non-blocking reap; a crash leaves the attempt only good for
    /// [`Self::free_shared_memory`].
    pub fn has_crashed(&self) -> bool {
        match self.child_pid {
            Some(pid) => self.state != SolvingState::Aborting && process::did_child_exit(pid),
            None => false,
        }
    }

    /// The error surfaced to the job when the attempt died underneath it.
    pub fn crash_error(&self) -> Error {
        Error::SubprocessFault(format!("solver subprocess of {} exited unexpectedly", self.shmem_id))
    }

    /// Blocks until the child is reaped, force-killing it if it outlives
    /// the grace period while aborting.
    pub fn wait_until_child_exited(&mut self) {
        let Some(pid) = self.child_pid else { return };
        let deadline = Instant::now() + self.grace_period;
        loop {
            if process::did_child_exit(pid) {
                self.child_pid = None;
                return;
            }
            if Instant::now() >= deadline {
                warn!("attempt {}: child {pid} unresponsive, killing", self.shmem_id);
                process::hard_kill(pid);
                process::resume(pid);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Releases every shared-memory name of the attempt. The subprocess
    /// must be reaped (or abandoned) first; afterwards no region with the
    /// attempt's prefix remains in the namespace.
    pub fn free_shared_memory(&mut self) {
        self.bg_writer.stop();
        self.shared.pending.lock().clear();
        self.shared.dynamic_regions.lock().clear();
        self.static_regions.clear();
        // The control and clause regions stay mapped until the adapter is
        // dropped, but their names leave the namespace now. The solution
        // region is created by the child and unlinked by name as well.
        SharedMemory::unlink_name(&self.shmem_id);
        SharedMemory::unlink_name(&format!("{}.clauseexport", self.shmem_id));
        SharedMemory::unlink_name(&format!("{}.clauseimport", self.shmem_id));
        SharedMemory::unlink_name(&format!("{}.solution", self.shmem_id));
        debug!("attempt {}: shared memory freed", self.shmem_id);
    }

    // ------------------------------------------------------------------------
    // --- CLAUSE CHANNEL -----------------------------------------------------
    // ------------------------------------------------------------------------

    /// Asks the child to fill the export buffer with up to `max_words`
    /// buffer words of clauses.
    pub fn collect_clauses(&self, max_words: usize) {
        let control = self.control();
        control.export_buffer_max_size.store(max_words as i32, Ordering::Relaxed);
        control.do_export.store(true, Ordering::Release);
        self.wake_child_if_initialized();
    }

    pub fn has_collected_clauses(&self) -> bool {
        self.control().did_export.load(Ordering::Acquire)
    }

    /// Copies the collected clauses out and lowers the request flag.
    pub fn get_collected_clauses(&self) -> Result<Vec<i32>> {
        let control = self.control();
        if !control.did_export.load(Ordering::Acquire) {
            return Ok(Vec::new());
        }
        let words = control.export_buffer_true_size.load(Ordering::Acquire) as usize;
        let words = words.min(self.export_region.capacity_words());
        let clauses = self.export_region.read_ints(0, words)?;
        control.do_export.store(false, Ordering::Release);
        Ok(clauses)
    }

    /// Hands a broadcast buffer to the child for import.
    pub fn digest_clauses(&self, clauses: &[i32]) -> Result<()> {
        let control = self.control();
        if clauses.len() > self.import_region.capacity_words() {
            return Err(Error::ResourceExhaustion("import buffer"));
        }
        self.import_region.write_ints(0, clauses)?;
        control.import_buffer_size.store(clauses.len() as i32, Ordering::Relaxed);
        control.do_import.store(true, Ordering::Release);
        self.wake_child_if_initialized();
        Ok(())
    }

    pub fn dump_stats(&self) {
        self.control().do_dump_stats.store(true, Ordering::Release);
        // No hard need to wake the child immediately.
    }

    /// The job node moved within its tree; tell the portfolio.
    pub fn update_role(&self, app_rank: usize, cluster_size: usize) {
        let control = self.control();
        control.portfolio_rank.store(app_rank as i32, Ordering::Relaxed);
        control.portfolio_size.store(cluster_size as i32, Ordering::Relaxed);
        control.do_update_role.store(true, Ordering::Release);
    }

    /// Acknowledges completed responses (lowering the matching requests)
    /// and reports whether the child published a solution.
    pub fn check(&self) -> bool {
        let control = self.control();
        if control.did_import.load(Ordering::Acquire) {
            control.do_import.store(false, Ordering::Release);
        }
        if control.did_update_role.load(Ordering::Acquire) {
            control.do_update_role.store(false, Ordering::Release);
        }
        if control.did_interrupt.load(Ordering::Acquire) {
            control.do_interrupt.store(false, Ordering::Release);
        }
        if control.did_dump_stats.load(Ordering::Acquire) {
            control.do_dump_stats.store(false, Ordering::Release);
        }
        control.has_solution.load(Ordering::Acquire)
    }

    pub fn has_solution(&self) -> bool {
        self.control().has_solution.load(Ordering::Acquire)
    }

    /// Attaches the solution region and returns the result with its model
    /// (or failed assumptions, depending on the result).
    pub fn get_solution(&self) -> Result<(SatResult, Vec<i32>)> {
        let control = self.control();
        let code = control.result.load(Ordering::Acquire);
        let result = SatResult::from_code(code)
            .ok_or_else(|| Error::ProtocolViolation(format!("result code {code}")))?;
        let words = control.solution_size.load(Ordering::Acquire) as usize;
        if words == 0 {
            return Ok((result, Vec::new()));
        }
        let region = SharedMemory::attach(&format!("{}.solution", self.shmem_id), words * 4)?;
        let solution = region.read_ints(0, words)?;
        Ok((result, solution))
    }

    fn wake_child_if_initialized(&self) {
        if let Some(pid) = self.child_pid {
            if self.control().is_initialized.load(Ordering::Acquire) {
                process::wake_up(pid);
            }
        }
    }

    // ------------------------------------------------------------------------
    // --- REVISIONING --------------------------------------------------------
    // ------------------------------------------------------------------------

    /// Queues further revisions for the background writer, in FIFO order,
    /// and announces the revision the solver should eventually reach. The
    /// child polls `written_revision` and picks regions up at quiescent
    /// points.
    pub fn append_revisions(&mut self, revisions: Vec<RevisionData>, desired_revision: i32) {
        {
            let mut pending = self.shared.pending.lock();
            pending.extend(revisions);
        }
        self.control().desired_revision.store(desired_revision, Ordering::Release);
        self.start_background_writer_if_necessary();
    }

    /// The newest revision fully published to shared memory.
    pub fn written_revision(&self) -> i32 {
        self.control().written_revision.load(Ordering::Acquire)
    }

    fn start_background_writer_if_necessary(&mut self) {
        if self.bg_writer.is_running() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let child_pid = self.child_pid;
        self.bg_writer.run(move |cancellation| {
            while cancellation.continue_running() {
                let item = shared.pending.lock().pop_front();
                let Some(revision) = item else {
                    std::thread::sleep(Duration::from_millis(5));
                    continue;
                };
                if let Err(e) = write_revision(&shared, &revision) {
                    warn!("revision {} could not be written: {e}", revision.revision);
                    continue;
                }
                shared.control().written_revision.store(revision.revision, Ordering::Release);
                if let Some(pid) = child_pid {
                    process::wake_up(pid);
                }
            }
        });
    }
}

fn write_revision(shared: &WriterState, revision: &RevisionData) -> Result<()> {
    let formula = SolverProcessAdapter::payload_region(
        &format!("{}.formulae.{}", shared.shmem_id, revision.revision),
        &revision.formula,
    )?;
    let assumptions = SolverProcessAdapter::payload_region(
        &format!("{}.assumptions.{}", shared.shmem_id, revision.revision),
        &revision.assumptions,
    )?;
    let mut dynamic = shared.dynamic_regions.lock();
    dynamic.push(formula);
    dynamic.push(assumptions);
    Ok(())
}

impl Drop for SolverProcessAdapter {
    fn drop(&mut self) {
        self.bg_writer.stop();
        SharedMemory::unlink_name(&format!("{}.solution", self.shmem_id));
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_adapter {
    use super::*;
    use crate::ParametersBuilder;

    fn params(binary: &str) -> Parameters {
        ParametersBuilder::default()
            .subprocess_binary(binary)
            .clause_buffer_base_size(64_usize)
            .subprocess_grace_period(2.0_f32)
            .build()
            .unwrap()
    }

    fn config(params: &Parameters, job_id: i32) -> SubprocessConfig {
        SubprocessConfig::new(params, job_id, 0, 0, 2, false, 0, 0)
    }

    fn adapter(job_id: i32) -> SolverProcessAdapter {
        let p = params("true");
        let c = config(&p, job_id);
        SolverProcessAdapter::new(&p, c, vec![1, 2, 0, -1, 3, 0], vec![2]).unwrap()
    }

    #[test]
    fn the_regions_of_an_attempt_are_created_and_freed() {
        let mut adapter = adapter(9001);
        let id = adapter.shared_memory_id().to_string();
        for suffix in ["", ".formulae.0", ".assumptions", ".clauseexport", ".clauseimport"] {
            assert!(SharedMemory::exists(&format!("{id}{suffix}")), "missing {suffix:?}");
        }

        adapter.free_shared_memory();
        for suffix in ["", ".formulae.0", ".assumptions", ".clauseexport", ".clauseimport", ".solution"] {
            assert!(!SharedMemory::exists(&format!("{id}{suffix}")), "leftover {suffix:?}");
        }
    }

    #[test]
    fn the_flag_protocol_round_trips_through_a_second_attachment() {
        let mut adapter = adapter(9002);
        let id = adapter.shared_memory_id().to_string();

        // Simulate the child: attach the control and export regions.
        let child_control_region = SharedMemory::attach(&id, ControlRecord::SIZE).unwrap();
        let child_control = ControlRecord::attach(&child_control_region);
        let child_export = SharedMemory::attach_auto(&format!("{id}.clauseexport")).unwrap();

        adapter.collect_clauses(16);
        assert!(child_control.do_export.load(Ordering::Acquire));
        assert!(!adapter.has_collected_clauses());

        // Child answers with three words of clauses.
        child_export.write_ints(0, &[1, 1, 1]).unwrap();
        child_control.export_buffer_true_size.store(3, Ordering::Relaxed);
        child_control.did_export.store(true, Ordering::Release);

        assert!(adapter.has_collected_clauses());
        assert_eq!(vec![1, 1, 1], adapter.get_collected_clauses().unwrap());
        assert!(!child_control.do_export.load(Ordering::Acquire));

        adapter.free_shared_memory();
    }

    #[test]
    fn import_larger_than_the_buffer_is_refused() {
        let mut adapter = adapter(9003);
        let too_big = vec![1_i32; 1_000_000];
        assert!(matches!(
            adapter.digest_clauses(&too_big),
            Err(Error::ResourceExhaustion(_))
        ));
        adapter.free_shared_memory();
    }

    #[test]
    fn repeated_identical_state_transitions_are_noops() {
        let mut adapter = adapter(9004);
        // No child: transitions only move the cached state.
        adapter.set_solving_state(SolvingState::Suspended);
        adapter.set_solving_state(SolvingState::Suspended);
        assert_eq!(SolvingState::Suspended, adapter.state());
        adapter.free_shared_memory();
    }

    #[test]
    fn revisions_are_published_fifo_with_monotonic_written_revision() {
        let mut adapter = adapter(9005);
        let id = adapter.shared_memory_id().to_string();
        adapter.append_revisions(
            vec![
                RevisionData { revision: 1, formula: vec![5, 0], assumptions: vec![] },
                RevisionData { revision: 2, formula: vec![6, 0], assumptions: vec![-6] },
            ],
            2,
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while adapter.written_revision() < 2 {
            assert!(Instant::now() < deadline, "revisions never published");
            std::thread::sleep(Duration::from_millis(5));
        }
        for name in [
            format!("{id}.formulae.1"),
            format!("{id}.assumptions.1"),
            format!("{id}.formulae.2"),
            format!("{id}.assumptions.2"),
        ] {
            assert!(SharedMemory::exists(&name), "missing {name}");
        }
        let rev2 = SharedMemory::attach_auto(&format!("{id}.formulae.2")).unwrap();
        assert_eq!(vec![2, 6, 0], rev2.read_ints(0, 3).unwrap());

        adapter.free_shared_memory();
        assert!(!SharedMemory::exists(&format!("{id}.formulae.2")));
    }

    /// A subprocess exiting right after the exec is the crash scenario:
    /// the adapter notices within one health tick and all names of the
    /// attempt can be reclaimed.
    #[test]
    fn a_crashed_subprocess_is_detected_and_cleaned_up() {
        crate::process::init(0);
        let mut adapter = adapter(9006);
        let id = adapter.shared_memory_id().to_string();
        adapter.run().unwrap();
        assert_eq!(SolvingState::Active, adapter.state());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !adapter.has_crashed() {
            assert!(Instant::now() < deadline, "exit never observed");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(adapter.crash_error(), Error::SubprocessFault(_)));

        adapter.free_shared_memory();
        for suffix in ["", ".formulae.0", ".assumptions", ".clauseexport", ".clauseimport"] {
            assert!(!SharedMemory::exists(&format!("{id}{suffix}")), "leftover {suffix:?}");
        }
    }
}
