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

//! # PARSAT
//! PARSAT is a malleable platform for massively parallel SAT and QBF
//! solving: formulas are distributed across a cluster of processes,
//! compute resources are continuously rebalanced between concurrently
//! running jobs, and learned clauses flow between all solver instances of
//! a job. The first instance to find a result wins.
//!
//! The crate provides the three core subsystems of such a platform and
//! the plumbing between them:
//!
//! * the **event-driven balancer** (`EventDrivenBalancer`): demand and
//!   priority events are aggregated along a static binary tree and every
//!   worker deterministically computes the same per-job process counts
//!   from the agreed state;
//! * the **solver subprocess layer** (`SolverProcessAdapter` and
//!   `SolverProcess`): native CDCL portfolios run in forked child
//!   processes, isolated from the worker, and communicate through named
//!   shared memory with a single-writer flag protocol;
//! * the **clause exchange** (`SharingManager` and friends): learned
//!   clauses pass an exact duplicate filter into a bounded database, are
//!   merged deterministically across the job tree, and are re-imported
//!   with LBD-aware re-sharing and self-import suppression.
//!
//! The MPI (or other) interconnect stays behind the [`Transport`] trait,
//! and the concrete CDCL engines behind [`SolverEngine`]; an in-memory
//! cluster ([`LocalCluster`]) makes the whole machinery runnable in one
//! process.
//!
//! ## Quick example
//! The balancer's volume computation is a pure function of the agreed
//! state, which makes it easy to see the cutoff-priority allocation at
//! work:
//!
//! ```
//! use parsat::*;
//!
//! let mut states = EventMap::new();
//! states.insert_if_novel(Event { job_id: 1, epoch: 1, demand: 8, priority: 0.9 });
//! states.insert_if_novel(Event { job_id: 2, epoch: 1, demand: 8, priority: 0.1 });
//!
//! // Eight workers at full load: the high-priority job takes seven.
//! let volumes = calculate_volumes(&states, 1.0, 8, 0);
//! let volume_of = |id| volumes.iter().find(|v| v.job_id == id).unwrap().volume;
//! assert_eq!(7, volume_of(1));
//! assert_eq!(1, volume_of(2));
//! ```

mod common;
mod params;
mod abstraction;
mod implementation;

pub use common::*;
pub use params::*;
pub use abstraction::*;
pub use implementation::*;
