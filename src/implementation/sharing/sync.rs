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

//! Optional deterministic mode: clause admissions of all local solvers are
//! serialized into a reproducible order by buffering one queue per solver
//! and flushing a round-robin "one from each" step whenever every queue
//! holds at least one call. Solvers block on a shared monitor once they
//! spent their operation budget; the synchronizer releases all of them
//! atomically, optionally suspending everyone but a designated winner once
//! a result exists.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::Clause;

/// One buffered admission of a clause by a local solver.
#[derive(Debug, Clone)]
pub struct ClauseInsertionCall {
    pub solver_id: usize,
    pub solver_revision: i32,
    pub clause: Clause,
}

/// Invoked for every admission in the deterministic global order. Must not
/// call back into the synchronizer.
pub type AdmitCallback = Box<dyn Fn(&ClauseInsertionCall) + Send + Sync>;

/// Nominal operation-count advance per conflict for engines without an
/// autonomous performance counter.
pub const NOMINAL_OPS_PER_CONFLICT: u64 = 1000;

struct SolverLane {
    queue: VecDeque<ClauseInsertionCall>,
    ops: u64,
    waiting: bool,
}

struct SyncState {
    lanes: Vec<SolverLane>,
    nonempty_lanes: usize,
    waiting_for_sync: usize,
    min_global_id_with_result: i64,
}

pub struct DeterministicClauseSynchronizer {
    callback: AdmitCallback,
    global_ids: Vec<usize>,
    ops_until_sync: u64,
    state: Mutex<SyncState>,
    monitor: Condvar,
}

impl DeterministicClauseSynchronizer {
    /// `global_ids[i]` is the job-global id of local solver `i`;
    /// `ops_until_sync` is typically `performance_factor * 1e6`.
    pub fn new(global_ids: Vec<usize>, ops_until_sync: u64, callback: AdmitCallback) -> Self {
        let lanes = global_ids
            .iter()
            .map(|_| SolverLane { queue: VecDeque::new(), ops: 0, waiting: false })
            .collect();
        DeterministicClauseSynchronizer {
            callback,
            global_ids,
            ops_until_sync: ops_until_sync.max(1),
            state: Mutex::new(SyncState {
                lanes,
                nonempty_lanes: 0,
                waiting_for_sync: 0,
                min_global_id_with_result: -1,
            }),
            monitor: Condvar::new(),
        }
    }

    /// Called from solver thread `solver_id` for every clause it wants to
    /// admit. Blocks across synchronization points; the clause is handed to
    /// the callback in deterministic global order, possibly much later.
    pub fn insert_blocking(
        &self,
        solver_id: usize,
        solver_revision: i32,
        clause: Clause,
        ops_delta: u64,
    ) {
        self.wait_while_parked(solver_id);

        let mut state = self.state.lock();
        let was_empty = {
            let lane = &mut state.lanes[solver_id];
            let was_empty = lane.queue.is_empty();
            lane.queue.push_back(ClauseInsertionCall { solver_id, solver_revision, clause });
            was_empty
        };
        if was_empty {
            state.nonempty_lanes += 1;
            // Flush one clause from each lane for as long as all of them
            // hold one: this is the deterministic round-robin order.
            while state.nonempty_lanes == state.lanes.len() {
                let mut nonempty_after = 0;
                for lane in state.lanes.iter_mut() {
                    let call = lane
                        .queue
                        .pop_front()
                        .expect("every lane is nonempty inside the flush loop");
                    if !lane.queue.is_empty() {
                        nonempty_after += 1;
                    }
                    (self.callback)(&call);
                }
                state.nonempty_lanes = nonempty_after;
            }
        }

        state.lanes[solver_id].ops += ops_delta;
        let park = state.lanes[solver_id].ops >= self.ops_until_sync;
        if park {
            state.lanes[solver_id].ops = 0;
            state.lanes[solver_id].waiting = true;
            state.waiting_for_sync += 1;
        }
        drop(state);
        if park {
            self.monitor.notify_all();
        }

        self.wait_while_parked(solver_id);
    }

    fn wait_while_parked(&self, solver_id: usize) {
        let mut state = self.state.lock();
        while state.lanes[solver_id].waiting {
            self.monitor.wait(&mut state);
        }
    }

    /// A solver found a result (or exhausted its revision) and will issue
    /// no further admissions; it counts as permanently sync-ready.
    pub fn notify_solver_done(&self, solver_id: usize) {
        {
            let mut state = self.state.lock();
            if !state.lanes[solver_id].waiting {
                state.lanes[solver_id].waiting = true;
                state.waiting_for_sync += 1;
                let global_id = self.global_ids[solver_id] as i64;
                if state.min_global_id_with_result == -1
                    || state.min_global_id_with_result > global_id
                {
                    state.min_global_id_with_result = global_id;
                }
            }
        }
        self.monitor.notify_all();
    }

    /// Whether every solver has reached the synchronization point.
    pub fn all_solvers_sync_ready(&self) -> bool {
        let state = self.state.lock();
        state.waiting_for_sync == state.lanes.len()
    }

    /// Blocks until every solver is sync-ready; returns the smallest global
    /// solver id that reported a result, or -1 if none did.
    pub fn wait_until_sync_ready(&self) -> i64 {
        let mut state = self.state.lock();
        while state.waiting_for_sync != state.lanes.len() {
            self.monitor.wait(&mut state);
        }
        state.min_global_id_with_result
    }

    /// Flushes all remaining admissions in lane order and releases every
    /// parked solver. With `global_winning_id >= 0`, all solvers are
    /// suspended through `suspend` (called with the local id) except the
    /// winner; returns whether the winner is one of ours.
    pub fn sync_and_check_for_local_winner(
        &self,
        global_winning_id: i64,
        suspend: impl Fn(usize),
    ) -> bool {
        let mut has_winning_solver = false;
        {
            let mut state = self.state.lock();
            debug_assert_eq!(state.waiting_for_sync, state.lanes.len());

            for lane in state.lanes.iter_mut() {
                while let Some(call) = lane.queue.pop_front() {
                    (self.callback)(&call);
                }
            }
            state.nonempty_lanes = 0;

            for (local_id, lane) in state.lanes.iter_mut().enumerate() {
                if self.global_ids[local_id] as i64 == global_winning_id {
                    has_winning_solver = true;
                } else if global_winning_id >= 0 {
                    suspend(local_id);
                }
                lane.waiting = false;
            }
            state.waiting_for_sync = 0;
        }
        self.monitor.notify_all();
        has_winning_solver
    }
}

impl Drop for DeterministicClauseSynchronizer {
    fn drop(&mut self) {
        if self.all_solvers_sync_ready() {
            self.sync_and_check_for_local_winner(-1, |_| {});
        }
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_sync {
    use std::sync::{Arc, Mutex};

    use crate::{Clause, DeterministicClauseSynchronizer, NOMINAL_OPS_PER_CONFLICT};

    fn recorder() -> (Arc<Mutex<Vec<(usize, i32)>>>, crate::AdmitCallback) {
        let seen: Arc<Mutex<Vec<(usize, i32)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: crate::AdmitCallback = Box::new(move |call| {
            sink.lock().unwrap().push((call.solver_id, call.clause.lits[0]));
        });
        (seen, cb)
    }

    #[test]
    fn a_flush_takes_one_clause_from_each_lane() {
        let (seen, cb) = recorder();
        let sync = DeterministicClauseSynchronizer::new(vec![0, 1], u64::MAX, cb);

        sync.insert_blocking(0, 0, Clause::new(vec![10], 1), 1);
        assert!(seen.lock().unwrap().is_empty(), "one lane is still empty");
        sync.insert_blocking(0, 0, Clause::new(vec![11], 1), 1);
        sync.insert_blocking(1, 0, Clause::new(vec![20], 1), 1);

        // Both lanes nonempty: two full round-robin steps drain them.
        let calls = seen.lock().unwrap().clone();
        assert_eq!(vec![(0, 10), (1, 20)], calls[..2].to_vec());
    }

    #[test]
    fn the_order_is_reproducible() {
        let run = || {
            let (seen, cb) = recorder();
            let sync = DeterministicClauseSynchronizer::new(vec![0, 1], u64::MAX, cb);
            sync.insert_blocking(1, 0, Clause::new(vec![21], 1), 1);
            sync.insert_blocking(1, 0, Clause::new(vec![22], 1), 1);
            sync.insert_blocking(0, 0, Clause::new(vec![11], 1), 1);
            sync.insert_blocking(0, 0, Clause::new(vec![12], 1), 1);
            let order = seen.lock().unwrap().clone();
            order
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn solvers_park_after_their_operation_budget() {
        let (_, cb) = recorder();
        let sync = Arc::new(DeterministicClauseSynchronizer::new(
            vec![0, 1],
            NOMINAL_OPS_PER_CONFLICT,
            cb,
        ));

        let s = Arc::clone(&sync);
        let worker = std::thread::spawn(move || {
            // First insert exhausts the budget and parks the thread.
            s.insert_blocking(0, 0, Clause::new(vec![1], 1), NOMINAL_OPS_PER_CONFLICT);
        });

        sync.notify_solver_done(1);
        let winner = sync.wait_until_sync_ready();
        assert_eq!(1, winner);
        let has_local = sync.sync_and_check_for_local_winner(winner, |_| {});
        assert!(has_local);
        worker.join().unwrap();
    }

    #[test]
    fn losing_solvers_are_suspended_on_sync() {
        let (_, cb) = recorder();
        let sync = DeterministicClauseSynchronizer::new(vec![4, 5], 1, cb);
        sync.notify_solver_done(0);
        sync.notify_solver_done(1);

        let suspended = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&suspended);
        let has_local = sync.sync_and_check_for_local_winner(4, move |id| {
            sink.lock().unwrap().push(id);
        });
        assert!(has_local);
        assert_eq!(vec![1], suspended.lock().unwrap().clone());
    }
}
