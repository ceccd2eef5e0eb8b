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

//! The capability table an application kind exposes to the generic job
//! instance. Instead of a deep inheritance hierarchy there is exactly one
//! job-instance type; everything application-specific is reached through
//! this trait.

use crate::{JobDescription, JobResult, MessageHandle, Result};

/// The operations a job instance may invoke on its application. All calls
/// happen on the worker main thread; long-running work must be delegated
/// to background workers by the implementation.
pub trait Application: Send {
    /// The description is complete; begin computing.
    fn start(&mut self, description: &JobDescription) -> Result<()>;
    /// Pause the computation such that `resume` can continue it seamlessly.
    fn suspend(&mut self) -> Result<()>;
    /// Continue a previously suspended computation.
    fn resume(&mut self) -> Result<()>;
    /// Tear the computation down; the instance will not be reused.
    fn terminate(&mut self) -> Result<()>;
    /// One cycle of polling for a result: the result code if one is
    /// available, `None` otherwise.
    fn solved(&mut self) -> Option<i32>;
    /// The full result once `solved` reported a code.
    fn result(&mut self) -> Option<JobResult>;
    /// Initiative hook: called periodically so the application can start
    /// communication phases of its own.
    fn communicate(&mut self) {}
    /// A message addressed to this job node arrived.
    fn handle_message(&mut self, _handle: &MessageHandle) -> Result<()> {
        Ok(())
    }
    /// Log application-specific statistics.
    fn dump_stats(&self) {}
    /// Whether the instance can be dropped right now without leaking
    /// resources (background workers joined, subprocesses reaped).
    fn is_destructible(&self) -> bool {
        true
    }
    /// The worker is under memory pressure; shed what you can.
    fn memory_panic(&mut self) {}
}
