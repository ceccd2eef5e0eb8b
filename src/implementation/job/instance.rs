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

//! The single job-instance type. There is no subclass per application:
//! everything application-specific sits behind the [`Application`]
//! capability table, and the instance only owns the lifecycle, the tree
//! position, and the resource accounting.

use std::time::{Duration, Instant};

use log::debug;

use crate::{Application, JobDescription, JobResult, JobState, JobTree, Result};

pub struct JobInstance {
    description: JobDescription,
    app: Box<dyn Application>,
    state: JobState,
    tree: JobTree,
    volume: i32,
    arrival: Instant,
    activation: Option<Instant>,
    /// CPU seconds consumed by past attempts, fed by the health tick.
    cpu_used: Duration,
    result: Option<JobResult>,
}

impl JobInstance {
    pub fn new(description: JobDescription, app: Box<dyn Application>) -> Self {
        JobInstance {
            description,
            app,
            state: JobState::None,
            tree: JobTree::new(0),
            volume: 0,
            arrival: Instant::now(),
            activation: None,
            cpu_used: Duration::ZERO,
            result: None,
        }
    }

    pub fn id(&self) -> crate::JobId {
        self.description.id
    }

    pub fn description(&self) -> &JobDescription {
        &self.description
    }

    pub fn description_mut(&mut self) -> &mut JobDescription {
        &mut self.description
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn tree(&self) -> &JobTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut JobTree {
        &mut self.tree
    }

    pub fn is_root(&self) -> bool {
        self.tree.is_root()
    }

    pub fn volume(&self) -> i32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: i32) {
        self.volume = volume;
    }

    pub fn age(&self) -> Duration {
        self.arrival.elapsed()
    }

    fn switch_state(&mut self, state: JobState) {
        debug!("#{}:{} state {} -> {}", self.id(), self.tree.index(), self.state.as_str(), state.as_str());
        self.state = state;
    }

    // ------------------------------------------------------------------------
    // --- LIFECYCLE ----------------------------------------------------------
    // ------------------------------------------------------------------------

    /// The description arrived and is stored; nothing runs yet.
    pub fn store(&mut self) {
        if self.state == JobState::None {
            self.switch_state(JobState::Stored);
        }
    }

    /// This worker committed to compute on the job at the given tree index.
    pub fn commit(&mut self, index: usize) {
        self.tree = JobTree::new(index);
        self.switch_state(JobState::Committed);
    }

    pub fn uncommit(&mut self) {
        self.switch_state(if self.description.revisions.is_empty() {
            JobState::None
        } else {
            JobState::Stored
        });
    }

    /// Starts computing: spawns the application (and thus the solver
    /// subprocess) and becomes `Active`.
    pub fn start(&mut self) -> Result<()> {
        self.switch_state(JobState::Initializing);
        self.app.start(&self.description)?;
        self.activation = Some(Instant::now());
        self.switch_state(JobState::Active);
        Ok(())
    }

    pub fn suspend(&mut self) -> Result<()> {
        if self.state != JobState::Active {
            return Ok(());
        }
        self.app.suspend()?;
        self.switch_state(JobState::Suspended);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.state != JobState::Suspended {
            return Ok(());
        }
        self.app.resume()?;
        self.switch_state(JobState::Active);
        Ok(())
    }

    /// Soft interrupt: finish the current revision, await the next one.
    pub fn standby(&mut self) {
        if self.state == JobState::Active {
            self.switch_state(JobState::Standby);
        }
    }

    /// Hard stop; the instance only remains for bookkeeping.
    pub fn terminate(&mut self) -> Result<()> {
        let outcome = self.app.terminate();
        self.switch_state(JobState::Past);
        outcome
    }

    /// Polls the application for a result code.
    pub fn solved(&mut self) -> Option<i32> {
        if self.state != JobState::Active {
            return None;
        }
        self.app.solved()
    }

    pub fn result(&mut self) -> Option<JobResult> {
        if self.result.is_none() {
            self.result = self.app.result();
        }
        self.result.clone()
    }

    pub fn communicate(&mut self) {
        self.app.communicate();
    }

    pub fn dump_stats(&self) {
        self.app.dump_stats();
    }

    pub fn is_destructible(&self) -> bool {
        self.state == JobState::Past && self.app.is_destructible()
    }

    pub fn memory_panic(&mut self) {
        self.app.memory_panic();
    }

    // ------------------------------------------------------------------------
    // --- RESOURCES ----------------------------------------------------------
    // ------------------------------------------------------------------------

    /// The number of workers this job would like, given its last volume:
    /// demands grow along full binary trees (1, 3, 7, ...) so the job tree
    /// can always fill up level by level.
    pub fn demand(&self, prev_volume: i32, max_demand: i32) -> i32 {
        let raw = if prev_volume <= 0 { 1 } else { 2 * prev_volume + 1 };
        if max_demand > 0 {
            raw.min(max_demand)
        } else {
            raw
        }
    }

    /// Adds CPU time measured by the worker's health tick.
    pub fn account_cpu(&mut self, used: Duration) {
        self.cpu_used += used;
    }

    /// Whether a configured limit is exhausted. Checked periodically by
    /// the worker; an exceeded limit cancels the job with result unknown.
    pub fn exceeds_resource_limits(&self) -> bool {
        if let (Some(limit), Some(activation)) = (self.description.wallclock_limit, self.activation)
        {
            if activation.elapsed() > limit {
                return true;
            }
        }
        if let Some(limit) = self.description.cpu_limit {
            if self.cpu_used > limit {
                return true;
            }
        }
        false
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_instance {
    use std::time::Duration;

    use super::*;
    use crate::{ApplicationKind, SatResult};

    /// An application that only records which capabilities were invoked.
    #[derive(Default)]
    struct Probe {
        started: bool,
        suspended: usize,
        terminated: bool,
    }

    impl Application for Probe {
        fn start(&mut self, _description: &JobDescription) -> Result<()> {
            self.started = true;
            Ok(())
        }
        fn suspend(&mut self) -> Result<()> {
            self.suspended += 1;
            Ok(())
        }
        fn resume(&mut self) -> Result<()> {
            Ok(())
        }
        fn terminate(&mut self) -> Result<()> {
            self.terminated = true;
            Ok(())
        }
        fn solved(&mut self) -> Option<i32> {
            Some(SatResult::Sat.code())
        }
        fn result(&mut self) -> Option<JobResult> {
            Some(JobResult { id: 1, revision: 0, result: SatResult::Sat, solution: vec![] })
        }
    }

    fn instance() -> JobInstance {
        let description = JobDescription::new(1, ApplicationKind::Sat, 0.5);
        JobInstance::new(description, Box::<Probe>::default())
    }

    #[test]
    fn the_lifecycle_walks_through_its_states() {
        let mut job = instance();
        assert_eq!(JobState::None, job.state());
        job.commit(0);
        assert_eq!(JobState::Committed, job.state());
        job.start().unwrap();
        assert_eq!(JobState::Active, job.state());
        job.suspend().unwrap();
        assert_eq!(JobState::Suspended, job.state());
        job.resume().unwrap();
        job.terminate().unwrap();
        assert_eq!(JobState::Past, job.state());
        assert!(job.is_destructible());
    }

    #[test]
    fn suspending_a_nonactive_job_is_a_noop() {
        let mut job = instance();
        job.suspend().unwrap();
        assert_eq!(JobState::None, job.state());
    }

    #[test]
    fn past_jobs_no_longer_report_results_of_polling() {
        let mut job = instance();
        job.commit(0);
        job.start().unwrap();
        assert!(job.solved().is_some());
        job.terminate().unwrap();
        assert_eq!(None, job.solved());
    }

    #[test]
    fn demands_grow_along_full_binary_trees() {
        let job = instance();
        assert_eq!(1, job.demand(0, 0));
        assert_eq!(3, job.demand(1, 0));
        assert_eq!(7, job.demand(3, 0));
        assert_eq!(15, job.demand(7, 0));
        assert_eq!(5, job.demand(3, 5));
    }

    #[test]
    fn cpu_limits_are_enforced_by_accounting() {
        let mut job = instance();
        job.description_mut().cpu_limit = Some(Duration::from_secs(10));
        job.commit(0);
        job.start().unwrap();
        assert!(!job.exceeds_resource_limits());
        job.account_cpu(Duration::from_secs(11));
        assert!(job.exceeds_resource_limits());
    }
}
