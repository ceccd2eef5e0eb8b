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

//! The event-driven balancer: a gossip-style, tree-reduced protocol that
//! computes per-job process counts from global demand/priority state.
//!
//! Local demand changes enter as events, travel up a static binary
//! reduction tree as diff maps, get stamped with a fresh global epoch at
//! the root, and come back down as a broadcast. Every node then digests
//! the broadcast into its state map and recomputes all volumes locally;
//! no volume values ever travel over the wire. Convergence takes
//! O(tree depth) messages after the last event.

use std::time::Instant;

use fxhash::FxHashMap;
use log::{debug, info};

use crate::{
    calculate_volumes, Error, Event, EventMap, JobId, MessageHandle, Parameters, Result,
    Transport, MSG_BROADCAST_DATA, MSG_REDUCE_DATA,
};

/// Invoked whenever a digest produced a fresh volume for a job:
/// `(job id, volume, seconds since the triggering local event)`. The
/// latency is zero for volume updates this worker did not trigger itself.
pub type VolumeUpdateCallback = Box<dyn FnMut(JobId, i32, f32) + Send>;

pub struct EventDrivenBalancer {
    rank: usize,
    size: usize,
    parent_rank: usize,
    child_ranks: Vec<usize>,

    /// Globally agreed latest event per job.
    states: EventMap,
    /// Local changes not yet covered by any broadcast.
    diffs: EventMap,
    /// Monotonic per-job event counters; only roots of jobs own entries.
    job_root_epochs: FxHashMap<JobId, u32>,

    volumes: FxHashMap<JobId, i32>,
    volume_update_callback: Option<VolumeUpdateCallback>,

    /// The job currently hosted by this worker, if any.
    active_job_id: Option<JobId>,

    load_factor: f32,
    seed: u64,
    balancing_period_secs: f32,
    last_round: Option<Instant>,

    /// When each job's latest local event was pushed, for latency stats.
    pending_since: FxHashMap<JobId, Instant>,
    latencies: FxHashMap<JobId, Vec<f32>>,
}

impl EventDrivenBalancer {
    pub fn new(rank: usize, size: usize, params: &Parameters) -> Self {
        let balancer = EventDrivenBalancer {
            rank,
            size,
            parent_rank: parent_of(rank),
            child_ranks: children_of(rank, size),
            states: EventMap::new(),
            diffs: EventMap::new(),
            job_root_epochs: FxHashMap::default(),
            volumes: FxHashMap::default(),
            volume_update_callback: None,
            active_job_id: None,
            load_factor: params.load_factor,
            seed: params.seed,
            balancing_period_secs: params.balancing_period,
            last_round: None,
            pending_since: FxHashMap::default(),
            latencies: FxHashMap::default(),
        };
        debug!(
            "[{rank}] balancing tree: parent {} children {:?}",
            balancer.parent_rank, balancer.child_ranks
        );
        balancer
    }

    pub fn set_volume_update_callback(&mut self, callback: VolumeUpdateCallback) {
        self.volume_update_callback = Some(callback);
    }

    // ------------------------------------------------------------------------
    // --- LOCAL TRIGGERS -----------------------------------------------------
    // ------------------------------------------------------------------------

    /// A job became active on this worker with the given demand. Only the
    /// job's root node emits a balancing event for it.
    pub fn on_activate(
        &mut self,
        job_id: JobId,
        is_root: bool,
        priority: f32,
        demand: i32,
        transport: &dyn Transport,
    ) -> Result<()> {
        if self.active_job_id == Some(job_id) {
            return self.on_demand_change(job_id, is_root, priority, demand, transport);
        }
        self.active_job_id = Some(job_id);
        if !is_root {
            return Ok(());
        }
        let epoch = self.next_job_epoch(job_id);
        self.push_event(
            Event { job_id, epoch, demand: demand.max(1), priority },
            transport,
        )
    }

    /// The active job's demand changed (e.g. its job tree grew).
    pub fn on_demand_change(
        &mut self,
        job_id: JobId,
        is_root: bool,
        priority: f32,
        demand: i32,
        transport: &dyn Transport,
    ) -> Result<()> {
        if !is_root {
            return Ok(());
        }
        let epoch = self.next_job_epoch(job_id);
        self.push_event(Event { job_id, epoch, demand, priority }, transport)
    }

    /// The job was suspended; its resources are to be released.
    pub fn on_suspend(
        &mut self,
        job_id: JobId,
        is_root: bool,
        priority: f32,
        transport: &dyn Transport,
    ) -> Result<()> {
        if self.active_job_id == Some(job_id) {
            self.active_job_id = None;
        }
        if !is_root {
            return Ok(());
        }
        let epoch = self.next_job_epoch(job_id);
        self.push_event(Event { job_id, epoch, demand: 0, priority }, transport)
    }

    /// The job terminated for good. Emits the final event with the maximum
    /// job epoch and reports the collected balancing latencies.
    pub fn on_terminate(
        &mut self,
        job_id: JobId,
        is_root: bool,
        transport: &dyn Transport,
    ) -> Result<()> {
        if self.active_job_id == Some(job_id) {
            self.active_job_id = None;
            self.pending_since.clear();
        }
        if !is_root {
            return Ok(());
        }
        self.job_root_epochs.remove(&job_id);
        self.report_latencies(job_id);
        self.push_event(
            Event { job_id, epoch: u32::MAX, demand: 0, priority: 0.0 },
            transport,
        )
    }

    fn next_job_epoch(&mut self, job_id: JobId) -> u32 {
        let epoch = self.job_root_epochs.entry(job_id).or_insert(0);
        *epoch += 1;
        *epoch
    }

    fn push_event(&mut self, event: Event, transport: &dyn Transport) -> Result<()> {
        let job_id = event.job_id;
        if self.diffs.insert_if_novel(event) {
            self.pending_since.insert(job_id, Instant::now());
            self.advance(transport)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // --- PROTOCOL -----------------------------------------------------------
    // ------------------------------------------------------------------------

    /// Initiates a balancing round if there are unpropagated diffs and the
    /// periodic gate is open. Called on every main loop tick.
    pub fn advance(&mut self, transport: &dyn Transport) -> Result<()> {
        if self.diffs.is_empty() {
            return Ok(());
        }
        if let Some(last) = self.last_round {
            if last.elapsed().as_secs_f32() < self.balancing_period_secs {
                return Ok(());
            }
        }
        self.last_round = Some(Instant::now());
        debug!("[{}] initiate balancing ({} diffs)", self.rank, self.diffs.len());
        let diffs = self.diffs.clone();
        self.handle_data(diffs, MSG_REDUCE_DATA, transport)
    }

    /// Feeds a received balancing message into the protocol.
    pub fn handle(&mut self, handle: &MessageHandle, transport: &dyn Transport) -> Result<()> {
        if handle.tag != MSG_REDUCE_DATA && handle.tag != MSG_BROADCAST_DATA {
            return Err(Error::ProtocolViolation(format!(
                "balancer got message of tag {}",
                handle.tag
            )));
        }
        let data = EventMap::deserialize(&handle.payload)?;
        self.handle_data(data, handle.tag, transport)
    }

    fn handle_data(
        &mut self,
        data: EventMap,
        tag: crate::Tag,
        transport: &dyn Transport,
    ) -> Result<()> {
        let mut data = data;
        let mut tag = tag;
        if tag == MSG_REDUCE_DATA {
            // Fold the received diffs into the own ones.
            self.diffs.update_by(&data);
            if self.is_root() {
                // Switch to broadcast: stamp a fresh global epoch onto the
                // merged map and push it back down the tree.
                data = self.diffs.clone();
                data.set_global_epoch(self.states.global_epoch());
                data.bump_global_epoch();
                tag = MSG_BROADCAST_DATA;
            } else {
                transport.send(self.parent_rank, MSG_REDUCE_DATA, self.diffs.serialize())?;
            }
        }
        if tag == MSG_BROADCAST_DATA {
            for &child in &self.child_ranks {
                transport.send(child, MSG_BROADCAST_DATA, data.serialize())?;
            }
            self.digest(&data);
        }
        Ok(())
    }

    fn digest(&mut self, data: &EventMap) {
        debug!(
            "[{}] digest epoch={} entries={}",
            self.rank,
            data.global_epoch(),
            data.len()
        );
        self.states.update_by(data);
        self.compute_balancing_result();
        self.diffs.filter_by(&self.states);
        self.states.remove_old_zeros();
    }

    fn compute_balancing_result(&mut self) {
        self.volumes.clear();
        if self.states.is_empty() {
            return;
        }
        let entries = calculate_volumes(&self.states, self.load_factor, self.size, self.seed);
        for entry in &entries {
            self.volumes.insert(entry.job_id, entry.volume);
            let elapsed = match self.pending_since.remove(&entry.job_id) {
                Some(since) => {
                    let elapsed = since.elapsed().as_secs_f32();
                    self.latencies.entry(entry.job_id).or_default().push(elapsed);
                    elapsed
                }
                None => 0.0,
            };
            if let Some(callback) = self.volume_update_callback.as_mut() {
                callback(entry.job_id, entry.volume, elapsed);
            }
        }
        if self.rank == 0 {
            let summary: Vec<String> =
                entries.iter().map(|e| format!("#{}:{}", e.job_id, e.volume)).collect();
            info!("BLC {}", summary.join(" "));
        }
    }

    fn report_latencies(&mut self, job_id: JobId) {
        let Some(mut lat) = self.latencies.remove(&job_id) else { return };
        if lat.is_empty() {
            return;
        }
        lat.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
        let avg: f32 = lat.iter().sum::<f32>() / lat.len() as f32;
        info!(
            "#{job_id} balancing latency={{num:{} min:{:.5} med:{:.5} avg:{avg:.5} max:{:.5}}}",
            lat.len(),
            lat.first().unwrap(),
            lat[lat.len() / 2],
            lat.last().unwrap()
        );
    }

    // ------------------------------------------------------------------------
    // --- QUERIES ------------------------------------------------------------
    // ------------------------------------------------------------------------

    pub fn volume(&self, job_id: JobId) -> Option<i32> {
        self.volumes.get(&job_id).copied()
    }

    pub fn global_epoch(&self) -> u64 {
        self.states.global_epoch()
    }

    /// The latest globally agreed demand of the job, if known.
    pub fn demand(&self, job_id: JobId) -> Option<i32> {
        self.states.get(job_id).map(|e| e.demand)
    }

    pub fn priority(&self, job_id: JobId) -> Option<f32> {
        self.states.get(job_id).map(|e| e.priority)
    }

    fn is_root(&self) -> bool {
        self.rank == 0
    }

    #[cfg(test)]
    pub(crate) fn state_epoch_of(&self, job_id: JobId) -> Option<u32> {
        self.states.get(job_id).map(|e| e.epoch)
    }
}

// ----------------------------------------------------------------------------
// --- TREE TOPOLOGY ----------------------------------------------------------
// ----------------------------------------------------------------------------
// The reduction tree is fixed by rank arithmetic alone: for a worker of
// rank r, the parent sits at the smallest power-of-two offset s such that
// r % s == s/2; children are r + s/2 for decreasing s. Odd ranks are the
// leaves. Rank 0 is its own parent and the root of the tree.

pub fn parent_of(rank: usize) -> usize {
    if rank == 0 {
        return 0;
    }
    let mut exp = 2;
    loop {
        if rank % exp == exp / 2 && rank >= exp / 2 {
            return rank - exp / 2;
        }
        exp *= 2;
    }
}

pub fn children_of(rank: usize, size: usize) -> Vec<usize> {
    let mut children = Vec::new();
    if size <= 1 {
        return children;
    }
    let mut exp = 1;
    while exp < size {
        exp *= 2;
    }
    while exp > 1 {
        if rank % exp == 0 {
            let child = rank + exp / 2;
            if child < size {
                children.push(child);
            }
        }
        exp /= 2;
    }
    children
}

pub fn is_leaf(rank: usize) -> bool {
    rank % 2 == 1
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_tree {
    use super::{children_of, is_leaf, parent_of};

    #[test]
    fn parents_for_a_cluster_of_eight() {
        assert_eq!(0, parent_of(0));
        assert_eq!(0, parent_of(1));
        assert_eq!(0, parent_of(2));
        assert_eq!(2, parent_of(3));
        assert_eq!(0, parent_of(4));
        assert_eq!(4, parent_of(5));
        assert_eq!(4, parent_of(6));
        assert_eq!(6, parent_of(7));
    }

    #[test]
    fn children_for_a_cluster_of_eight() {
        assert_eq!(vec![4, 2, 1], children_of(0, 8));
        assert_eq!(vec![3], children_of(2, 8));
        assert_eq!(vec![6, 5], children_of(4, 8));
        assert_eq!(vec![7], children_of(6, 8));
        assert!(children_of(1, 8).is_empty());
        assert!(children_of(7, 8).is_empty());
    }

    #[test]
    fn parent_and_children_are_mutually_consistent() {
        for size in [1_usize, 2, 3, 5, 8, 13, 16, 32] {
            for rank in 0..size {
                for child in children_of(rank, size) {
                    assert_eq!(rank, parent_of(child), "size {size} child {child}");
                }
            }
        }
    }

    #[test]
    fn every_nonroot_rank_is_reachable_from_the_root() {
        for size in [2_usize, 7, 8, 15, 16] {
            let mut seen = vec![false; size];
            let mut stack = vec![0_usize];
            seen[0] = true;
            while let Some(rank) = stack.pop() {
                for child in children_of(rank, size) {
                    assert!(!seen[child], "rank {child} reached twice in size {size}");
                    seen[child] = true;
                    stack.push(child);
                }
            }
            assert!(seen.iter().all(|s| *s), "unreachable ranks in size {size}");
        }
    }

    #[test]
    fn odd_ranks_are_leaves() {
        for rank in 0..32 {
            assert_eq!(rank % 2 == 1, is_leaf(rank));
            if is_leaf(rank) {
                assert!(children_of(rank, 32).is_empty());
            }
        }
    }
}

#[cfg(test)]
mod test_balancer {
    use crate::*;

    fn params() -> Parameters {
        ParametersBuilder::default().balancing_period(0.0_f32).build().unwrap()
    }

    /// Runs the protocol on a single-rank cluster, where reduction and
    /// broadcast collapse into local operations.
    #[test]
    fn single_rank_cluster_converges_immediately() {
        let cluster = LocalCluster::new(1);
        let endpoint = cluster.endpoint(0);
        let mut balancer = EventDrivenBalancer::new(0, 1, &params());

        balancer.on_activate(1, true, 0.5, 4, &endpoint).unwrap();
        assert_eq!(Some(1), balancer.volume(1));
        assert_eq!(1, balancer.global_epoch());
    }

    #[test]
    fn nonroot_job_nodes_do_not_emit_events() {
        let cluster = LocalCluster::new(1);
        let endpoint = cluster.endpoint(0);
        let mut balancer = EventDrivenBalancer::new(0, 1, &params());

        balancer.on_activate(1, false, 0.5, 4, &endpoint).unwrap();
        assert_eq!(None, balancer.volume(1));
    }

    #[test]
    fn suspension_releases_the_volume() {
        let cluster = LocalCluster::new(1);
        let endpoint = cluster.endpoint(0);
        let mut balancer = EventDrivenBalancer::new(0, 1, &params());

        balancer.on_activate(1, true, 0.5, 4, &endpoint).unwrap();
        balancer.on_suspend(1, true, 0.5, &endpoint).unwrap();
        assert_eq!(None, balancer.volume(1));
    }

    #[test]
    fn job_epochs_observed_in_digests_never_decrease() {
        let cluster = LocalCluster::new(1);
        let endpoint = cluster.endpoint(0);
        let mut balancer = EventDrivenBalancer::new(0, 1, &params());

        let mut last = 0;
        balancer.on_activate(1, true, 0.5, 4, &endpoint).unwrap();
        for demand in [6, 2, 9, 5] {
            balancer.on_demand_change(1, true, 0.5, demand, &endpoint).unwrap();
            let epoch = balancer.state_epoch_of(1).unwrap();
            assert!(epoch >= last);
            last = epoch;
        }
        balancer.on_terminate(1, true, &endpoint).unwrap();
        assert_eq!(u32::MAX, balancer.state_epoch_of(1).unwrap());
    }

    #[test]
    fn unknown_tags_are_a_protocol_violation() {
        let cluster = LocalCluster::new(1);
        let endpoint = cluster.endpoint(0);
        let mut balancer = EventDrivenBalancer::new(0, 1, &params());
        let handle = MessageHandle { source: 0, tag: MSG_DO_EXIT, payload: vec![] };
        assert!(balancer.handle(&handle, &endpoint).is_err());
    }
}
