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

//! The configuration surface of the platform. Argument parsing is the
//! business of the embedding binary; the library only consumes a fully
//! built [`Parameters`] value. Use the generated [`ParametersBuilder`] to
//! override individual knobs and rely on the defaults for the rest.
//!
//! ```
//! # use parsat::*;
//! let params = ParametersBuilder::default()
//!     .load_factor(0.95)
//!     .threads_per_process(4_usize)
//!     .build()
//!     .unwrap();
//! assert_eq!(1500, params.clause_buffer_base_size);
//! ```

use derive_builder::Builder;

/// All tunables of a worker process in one place. Every field has a default
/// that matches the documented option surface, so partial construction
/// through the builder is the expected way to obtain an instance.
#[derive(Debug, Clone, Builder)]
pub struct Parameters {
    /// Fraction of the cluster that balancing aims to keep busy.
    #[builder(default = "1.0")]
    pub load_factor: f32,
    /// Minimum interval (in seconds) between subsequent balancing rounds.
    #[builder(default = "0.1")]
    pub balancing_period: f32,
    /// Clause buffer base size in integers. The export buffer of a solver
    /// subprocess holds this many literals; the import buffer scales it by
    /// the cluster size.
    #[builder(default = "1500")]
    pub clause_buffer_base_size: usize,
    /// Only clauses up to this length are ever shared.
    #[builder(default = "30")]
    pub strict_clause_length_limit: usize,
    /// Only clauses with an LBD up to this value are ever shared.
    #[builder(default = "30")]
    pub strict_lbd_limit: u32,
    /// Clauses up to this length count as "high quality" for slot stealing.
    #[builder(default = "8")]
    pub quality_clause_length_limit: usize,
    /// Clauses with an LBD up to this value count as "high quality".
    #[builder(default = "2")]
    pub quality_lbd_limit: u32,
    /// Clauses with an LBD up to this value get separate database slots;
    /// larger LBD values all fall into the last bucket of their size.
    #[builder(default = "8")]
    pub max_lbd_partitioning_size: u32,
    /// Number of solver threads per subprocess; 0 means one per core.
    #[builder(default = "1")]
    pub threads_per_process: usize,
    /// Cyclic sequence of solver tags, one character per engine,
    /// e.g. "llgc" repeats lingeling, lingeling, glucose, cadical.
    #[builder(default = "String::from(\"l\")", setter(into))]
    pub portfolio: String,
    /// A clause re-shared within this many sharing epochs of its last
    /// sharing is filtered (unless its LBD improved and resharing on
    /// improvement is enabled).
    #[builder(default = "20")]
    pub epoch_horizon: u32,
    /// Re-admit a known clause when it is produced again with a strictly
    /// better LBD.
    #[builder(default = "true")]
    pub reshare_improved_lbd: bool,
    /// Minimum number of base-size chunks in each solver's import budget.
    #[builder(default = "10")]
    pub min_import_chunks_per_solver: usize,
    /// Number of subsequent full sharings a solver's import buffer is
    /// sized to absorb.
    #[builder(default = "4")]
    pub buffered_import_generations: usize,
    /// Number of base-size chunks for buffering produced clauses.
    #[builder(default = "20")]
    pub export_chunks: usize,
    /// Name of the solver subprocess image, resolved through PATH.
    #[builder(default = "String::from(\"parsat_sat_process\")", setter(into))]
    pub subprocess_binary: String,
    /// Grace period (in seconds) before an unresponsive aborting
    /// subprocess is force-killed.
    #[builder(default = "1.0")]
    pub subprocess_grace_period: f32,
    /// Microseconds the worker main loop sleeps between cycles.
    #[builder(default = "100")]
    pub sleep_microsecs: u64,
    /// Aggregate payload size above which messages are streamed in batches.
    #[builder(default = "1_000_000")]
    pub message_batching_threshold: usize,
    /// Logging verbosity 0-6.
    #[builder(default = "2")]
    pub verbosity: u32,
    /// Random seed shared by the whole cluster.
    #[builder(default = "0")]
    pub seed: u64,
    /// Upper bound on any job's demand; 0 means unbounded.
    #[builder(default = "0")]
    pub max_demand: i32,
    /// Serialize clause admission across local solvers for reproducible runs.
    #[builder(default = "false")]
    pub deterministic_solving: bool,
    /// Scales the operation budget between deterministic sync points.
    #[builder(default = "1.0")]
    pub performance_factor: f32,
    /// Reset the LBD of every imported clause to its size.
    #[builder(default = "false")]
    pub reset_lbd_on_import: bool,
    /// Increment the LBD of every imported clause by one.
    #[builder(default = "false")]
    pub increment_lbd_on_import: bool,
    /// Have each solver skip its first (global id mod 11) sharings to
    /// increase early portfolio diversity.
    #[builder(default = "false")]
    pub diversify_initial_imports: bool,
    /// Compute and verify a checksum for clause buffer transfers.
    #[builder(default = "false")]
    pub use_checksums: bool,
    /// Prefix of all shared-memory names created by this process.
    #[builder(default = "String::from(\"parsat\")", setter(into))]
    pub shmem_prefix: String,
}

impl Parameters {
    /// Resolves the configured thread count, falling back to one solver
    /// thread per available core when the parameter is zero.
    pub fn solver_threads(&self) -> usize {
        if self.threads_per_process == 0 {
            num_cpus::get()
        } else {
            self.threads_per_process
        }
    }

    /// Number of operations a solver may perform between two deterministic
    /// synchronization points.
    pub fn ops_until_sync(&self) -> u64 {
        (self.performance_factor as f64 * 1_000_000.0).floor() as u64
    }
}

impl Default for Parameters {
    fn default() -> Self {
        ParametersBuilder::default()
            .build()
            .expect("every parameter has a default")
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_params {
    use crate::{Parameters, ParametersBuilder};

    #[test]
    fn defaults_follow_the_documented_option_surface() {
        let p = Parameters::default();
        assert_eq!(1.0, p.load_factor);
        assert_eq!(1500, p.clause_buffer_base_size);
        assert_eq!(30, p.strict_clause_length_limit);
        assert_eq!(8, p.quality_clause_length_limit);
        assert_eq!(2, p.quality_lbd_limit);
        assert_eq!("l", p.portfolio);
        assert!(p.reshare_improved_lbd);
    }

    #[test]
    fn builder_overrides_only_what_is_asked() {
        let p = ParametersBuilder::default()
            .load_factor(0.5)
            .portfolio("lcg")
            .build()
            .unwrap();
        assert_eq!(0.5, p.load_factor);
        assert_eq!("lcg", p.portfolio);
        assert_eq!(0.1, p.balancing_period);
    }

    #[test]
    fn zero_threads_resolve_to_the_core_count() {
        let p = ParametersBuilder::default()
            .threads_per_process(0_usize)
            .build()
            .unwrap();
        assert!(p.solver_threads() >= 1);
    }

    #[test]
    fn ops_budget_scales_with_the_performance_factor() {
        let p = ParametersBuilder::default()
            .performance_factor(0.5)
            .build()
            .unwrap();
        assert_eq!(500_000, p.ops_until_sync());
    }
}
