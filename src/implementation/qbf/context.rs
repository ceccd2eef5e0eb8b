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

//! Per-node bookkeeping of the QBF expansion tree, held in a store keyed
//! by the local job id. Message callbacks may fire after the owning job
//! instance is gone, so they never hold a reference into a job: they carry
//! a plain-data snapshot of its identity and revalidate against the store
//! before acting.

use dashmap::DashMap;

use crate::{JobId, QbfNotification, SatResult};

/// How the children's results combine: an existential branch is an OR
/// node (one satisfiable child suffices), a universal branch an AND node
/// (one unsatisfiable child suffices).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum QbfNodeType {
    And,
    Or,
}

#[derive(Debug, Clone, Default)]
pub struct QbfChildState {
    pub spawned: bool,
    pub ready: bool,
    pub done: bool,
    pub rank: Option<usize>,
    pub job_id: Option<JobId>,
    pub result_code: Option<i32>,
}

/// The context of one QBF job node.
#[derive(Debug, Clone)]
pub struct QbfContext {
    /// Local job id of this node.
    pub node_job_id: JobId,
    pub root_job_id: JobId,
    pub depth: i32,
    /// Which child of its parent this node is.
    pub child_idx: i32,
    pub parent_rank: Option<usize>,
    pub node_type: QbfNodeType,
    pub children: Vec<QbfChildState>,
    pub cancelled: bool,
}

impl QbfContext {
    pub fn new_root(node_job_id: JobId) -> Self {
        QbfContext {
            node_job_id,
            root_job_id: node_job_id,
            depth: 0,
            child_idx: 0,
            parent_rank: None,
            node_type: QbfNodeType::Or,
            children: Vec::new(),
            cancelled: false,
        }
    }

    pub fn is_root_node(&self) -> bool {
        self.depth == 0
    }

    /// Registers an expected child before it is spawned.
    pub fn append_child(&mut self) -> usize {
        self.children.push(QbfChildState::default());
        self.children.len() - 1
    }

    pub fn mark_child_as_spawned(&mut self, child_idx: usize) {
        self.children[child_idx].spawned = true;
    }

    /// A ready message from the child revealed its address.
    pub fn mark_child_as_ready(&mut self, child_idx: usize, rank: usize, job_id: JobId) {
        let child = &mut self.children[child_idx];
        child.ready = true;
        child.rank = Some(rank);
        child.job_id = Some(job_id);
    }

    /// The context a child of this node starts from.
    pub fn derive_child_context(&self, child_idx: i32, my_rank: usize) -> QbfContext {
        QbfContext {
            node_job_id: -1,
            root_job_id: self.root_job_id,
            depth: self.depth + 1,
            child_idx,
            parent_rank: Some(my_rank),
            node_type: self.node_type,
            children: Vec::new(),
            cancelled: false,
        }
    }

    /// Digests a result notification from a child. Returns the combined
    /// result of this node once it is decided, `None` while children are
    /// still outstanding.
    pub fn handle_notification(&mut self, msg: &QbfNotification) -> Option<i32> {
        let idx = msg.child_idx as usize;
        if idx >= self.children.len() || self.children[idx].done {
            return None;
        }
        self.children[idx].done = true;
        self.children[idx].result_code = Some(msg.result_code);

        let decisive = match self.node_type {
            QbfNodeType::Or => SatResult::Sat.code(),
            QbfNodeType::And => SatResult::Unsat.code(),
        };
        if msg.result_code == decisive {
            return Some(decisive);
        }
        if self.children.iter().any(|c| !c.done) {
            return None;
        }
        // All children reported without a short-circuit: the node's own
        // result is the opposite outcome, unless some child gave up.
        if self.children.iter().any(|c| c.result_code == Some(SatResult::Unknown.code())) {
            return Some(SatResult::Unknown.code());
        }
        Some(match self.node_type {
            QbfNodeType::Or => SatResult::Unsat.code(),
            QbfNodeType::And => SatResult::Sat.code(),
        })
    }

    pub fn nb_done_children(&self) -> usize {
        self.children.iter().filter(|c| c.done).count()
    }

    /// The cancellation messages for all children still working, paired
    /// with their ranks. The notification carries the children's depth.
    pub fn cancellation_notifications(&self) -> Vec<(usize, QbfNotification)> {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.spawned && !c.done)
            .filter_map(|(idx, c)| {
                c.rank.map(|rank| {
                    (
                        rank,
                        QbfNotification::new(
                            self.root_job_id,
                            self.depth + 1,
                            idx as i32,
                            SatResult::Unknown.code(),
                        ),
                    )
                })
            })
            .collect()
    }

    /// Whether the context may be dropped from the store.
    pub fn is_destructible(&self) -> bool {
        self.cancelled || self.children.iter().all(|c| c.done)
    }
}

// ----------------------------------------------------------------------------
// --- CONTEXT STORE ----------------------------------------------------------
// ----------------------------------------------------------------------------

/// Live contexts by local job id. Everything a callback needs goes through
/// `has`/`with`, never through captured references.
#[derive(Default)]
pub struct QbfContextStore {
    contexts: DashMap<JobId, QbfContext>,
}

impl QbfContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, job_id: JobId) -> bool {
        self.contexts.contains_key(&job_id)
    }

    pub fn create(&self, job_id: JobId, context: QbfContext) {
        self.contexts.insert(job_id, context);
    }

    /// Runs `action` on the live context, if it still exists.
    pub fn with<R>(&self, job_id: JobId, action: impl FnOnce(&mut QbfContext) -> R) -> Option<R> {
        self.contexts.get_mut(&job_id).map(|mut ctx| action(&mut ctx))
    }

    pub fn erase(&self, job_id: JobId) {
        self.contexts.remove(&job_id);
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
