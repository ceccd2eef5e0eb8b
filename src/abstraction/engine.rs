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

//! The abstraction over the native CDCL engines run by a solver subprocess.
//! Engines are opaque to the platform: they load a formula, solve under
//! assumptions, can be interrupted, and exchange learned clauses with the
//! sharing layer. Concrete bindings (lingeling, cadical, glucose, ...) live
//! in the embedding binary and register themselves by portfolio tag.

use crate::{Result, SatResult};

/// Engine-agnostic options each solver in the portfolio receives when it is
/// instantiated.
#[derive(Debug, Clone, Default)]
pub struct SolverSetup {
    /// Index of this solver among the solvers of its subprocess.
    pub local_id: usize,
    /// Index of this solver across the whole job (apprank * threads + local).
    pub global_id: usize,
    /// How many engines with the same tag precede this one globally; used
    /// by the engine for its native diversification.
    pub diversification_index: usize,
    /// Whether the job may receive further revisions.
    pub is_incremental: bool,
    /// Only clauses up to this length are exported by the engine.
    pub strict_clause_length_limit: usize,
    /// Only clauses with an LBD up to this value are exported.
    pub strict_lbd_limit: u32,
    /// Base size (in literals) of one clause buffer chunk.
    pub clause_base_buffer_size: usize,
    /// Minimum number of chunks in this solver's import budget.
    pub min_num_chunks_per_solver: usize,
    /// Number of full sharings the import buffer is sized to absorb.
    pub num_buffered_cls_generations: usize,
    /// Expected number of literals imported per sharing cycle.
    pub anticipated_lits_to_import_per_cycle: f32,
    /// Reset every imported clause's LBD to its size.
    pub reset_lbd_before_import: bool,
    /// Increment every imported clause's LBD by one.
    pub increment_lbd_before_import: bool,
    /// Skip the first (global id mod 11) sharings of this solver.
    pub diversify_initial_imports: bool,
}

/// Counters an engine exposes for periodic statistics dumps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverStatistics {
    pub propagations: u64,
    pub decisions: u64,
    pub conflicts: u64,
    pub restarts: u64,
    /// Peak resident memory in megabytes, as reported by the engine.
    pub mem_peak_mbs: f64,
}

/// One opaque CDCL engine. Engines are shared between the solver thread
/// that runs `solve` and the subprocess main loop that pumps clauses in and
/// out, so every method takes `&self` and the engine performs its own
/// internal synchronization (the native engines all do).
pub trait SolverEngine: Send + Sync {
    /// The setup this engine was created with.
    fn setup(&self) -> &SolverSetup;

    /// Appends a zero-separated batch of clauses to the engine's formula.
    fn load_formula(&self, lits: &[i32]) -> Result<()>;

    /// Runs the search under the given assumption literals until a result
    /// is found or the engine is interrupted.
    fn solve(&self, assumptions: &[i32]) -> Result<SatResult>;

    /// The satisfying assignment after a `Sat` result, one value per
    /// variable starting at index 1.
    fn model(&self) -> Vec<i32>;

    /// The subset of assumptions found incompatible after an `Unsat` result.
    fn failed_assumptions(&self) -> Vec<i32>;

    /// Hands a clause learned elsewhere to the engine.
    fn add_learned_clause(&self, lits: &[i32], lbd: u32);

    /// Pops one clause the engine learned since the last call, together
    /// with its LBD, or `None` if the engine has nothing to export.
    fn pop_learned_clause(&self) -> Option<(Vec<i32>, u32)>;

    /// Makes a running `solve` return `Unknown` at the next opportunity.
    fn interrupt(&self);
    /// Parks the engine's search thread(s).
    fn suspend(&self);
    /// Unparks the engine's search thread(s).
    fn resume(&self);

    fn statistics(&self) -> SolverStatistics;

    /// Whether the engine maintains its own operation counter usable for
    /// deterministic synchronization; engines without one are advanced by
    /// a nominal constant per conflict.
    fn has_autonomous_perf_counting(&self) -> bool {
        false
    }
}
