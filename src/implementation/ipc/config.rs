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

//! Per-attempt identity of a solver subprocess and the naming scheme of
//! its shared-memory regions.

use crate::{JobId, Parameters};

/// Everything a subprocess attempt needs to know about itself. One value
/// per (job, revision window, recovery index) attempt.
#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    pub job_id: JobId,
    /// Index of this worker's node within the job tree.
    pub app_rank: usize,
    /// Rank of the hosting worker in the cluster.
    pub cluster_rank: usize,
    pub cluster_size: usize,
    /// Solver threads the subprocess shall run.
    pub threads: usize,
    pub incremental: bool,
    /// First revision the attempt starts on.
    pub first_revision: i32,
    /// Distinguishes re-spawns after a subprocess fault.
    pub recovery_index: usize,
    /// Export buffer capacity in words.
    pub export_buffer_words: usize,
    /// Import buffer capacity in words.
    pub import_buffer_words: usize,
}

impl SubprocessConfig {
    pub fn new(
        params: &Parameters,
        job_id: JobId,
        app_rank: usize,
        cluster_rank: usize,
        cluster_size: usize,
        incremental: bool,
        first_revision: i32,
        recovery_index: usize,
    ) -> Self {
        let export_buffer_words = params.clause_buffer_base_size;
        SubprocessConfig {
            job_id,
            app_rank,
            cluster_rank,
            cluster_size,
            threads: params.solver_threads(),
            incremental,
            first_revision,
            recovery_index,
            export_buffer_words,
            import_buffer_words: export_buffer_words * cluster_size.max(1),
        }
    }

    /// The primary shared-memory name of the attempt:
    /// `/<prefix>.<pid>.<rank>.#<jobid>[~<recovery>]`. Sub-regions append
    /// `.formulae.<k>`, `.assumptions[.<k>]`, `.clauseexport`,
    /// `.clauseimport` and `.solution`.
    pub fn shared_memory_id(&self, prefix: &str, pid: u32) -> String {
        let mut id = format!("/{prefix}.{pid}.{}.#{}", self.cluster_rank, self.job_id);
        if self.recovery_index > 0 {
            id.push_str(&format!("~{}", self.recovery_index));
        }
        id
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_config {
    use crate::{Parameters, SubprocessConfig};

    fn config(recovery: usize) -> SubprocessConfig {
        SubprocessConfig::new(&Parameters::default(), 42, 0, 7, 8, false, 0, recovery)
    }

    #[test]
    fn the_shared_memory_id_follows_the_naming_scheme() {
        assert_eq!("/parsat.1234.7.#42", config(0).shared_memory_id("parsat", 1234));
        assert_eq!("/parsat.1234.7.#42~2", config(2).shared_memory_id("parsat", 1234));
    }

    #[test]
    fn the_import_buffer_scales_with_the_cluster() {
        let c = config(0);
        assert_eq!(1500, c.export_buffer_words);
        assert_eq!(8 * 1500, c.import_buffer_words);
    }
}
