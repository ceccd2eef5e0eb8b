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

//! This module defines the most basic data types that are used throughout all
//! the code of our library: job identities and lifecycle states, solver
//! results, and the crate-wide error taxonomy.

// ----------------------------------------------------------------------------
// --- JOB IDENTITY -----------------------------------------------------------
// ----------------------------------------------------------------------------
/// Every job submitted to the platform is identified by a unique integer.
/// The id is assigned by the client that introduced the job and is never
/// reused during the lifetime of the cluster.
pub type JobId = i32;

/// The rank of a process within the cluster (dense, `0..cluster_size`).
pub type Rank = usize;

// ----------------------------------------------------------------------------
// --- SAT RESULT -------------------------------------------------------------
// ----------------------------------------------------------------------------
/// The outcome of a solving attempt. The discriminants follow the result
/// codes of the job submission interface (and of the SAT competition):
/// 0 = unknown, 10 = satisfiable, 20 = unsatisfiable.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(i32)]
pub enum SatResult {
    Unknown = 0,
    Sat = 10,
    Unsat = 20,
}
impl SatResult {
    /// Decodes a raw result code as it travels through shared memory and
    /// wire messages. Anything that is not a known code maps to `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(SatResult::Unknown),
            10 => Some(SatResult::Sat),
            20 => Some(SatResult::Unsat),
            _ => None,
        }
    }
    /// The raw integer code of this result.
    pub fn code(self) -> i32 {
        self as i32
    }
}

// ----------------------------------------------------------------------------
// --- JOB STATE --------------------------------------------------------------
// ----------------------------------------------------------------------------
/// Lifecycle state of a job's image on one particular worker.
///
/// A job in `Active` state has a solver subprocess spawned and a non-empty
/// assignment; a job in `Past` state no longer accepts messages addressed to
/// its tree index; only the root node of a job may conclude it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum JobState {
    /// The job is known for some reason (e.g. a failed commitment), but no
    /// description is present and the job was never launched here.
    None,
    /// The description is known, but the job was never launched here.
    Stored,
    /// A commitment was made to compute on the job at a certain tree index,
    /// but the description is not necessarily known yet.
    Committed,
    /// The job is currently being initialized (subprocess being set up).
    Initializing,
    /// A solver subprocess is actively computing on the job.
    Active,
    /// The subprocess once computing on the job is suspended. It may or may
    /// not be resumed at a later point.
    Suspended,
    /// The job has been finished or terminated; this image is dead.
    Past,
    /// The job has finished its current revision and awaits a directive
    /// from its parent and/or the external client.
    Standby,
}
impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::None => "none",
            JobState::Stored => "stored",
            JobState::Committed => "committed",
            JobState::Initializing => "initializing",
            JobState::Active => "active",
            JobState::Suspended => "suspended",
            JobState::Past => "past",
            JobState::Standby => "standby",
        }
    }
}

// ----------------------------------------------------------------------------
// --- SOLVING STATE ----------------------------------------------------------
// ----------------------------------------------------------------------------
/// State requested of (or reported by) a solver subprocess attempt. This is
/// the state machine driven by the subprocess adapter:
///
/// ```plain
/// initializing -> active <-> suspended
/// active -> standby (interrupted, awaiting next revision)
/// any -> aborting (child terminated and reaped)
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SolvingState {
    Initializing,
    Active,
    Suspended,
    Standby,
    Aborting,
}

// ----------------------------------------------------------------------------
// --- ERRORS -----------------------------------------------------------------
// ----------------------------------------------------------------------------
/// The error taxonomy of the platform.
///
/// `TransientIo` failures are retryable on the next main-loop tick;
/// `SubprocessFault` abandons the attempt but not the worker;
/// `ProtocolViolation` drops the offending message; `ResourceExhaustion`
/// is an expected back-pressure signal and never fatal. `Fatal` is reserved
/// for the process boundary (uncaught panics, fatal signals).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A message queue or shared-memory operation failed but may succeed
    /// when retried on the next tick.
    #[error("transient i/o failure: {0}")]
    TransientIo(#[from] std::io::Error),
    /// The solver subprocess died unexpectedly or could not be controlled.
    #[error("solver subprocess fault: {0}")]
    SubprocessFault(String),
    /// An unexpected tag, an epoch regression, or a malformed payload.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// A clause buffer or literal budget is full.
    #[error("resource exhausted: {0}")]
    ResourceExhaustion(&'static str),
    /// Unrecoverable condition; the process exits with the signal number.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
