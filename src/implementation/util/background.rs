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

//! One OS thread per long-running task, cooperatively cancelled. The
//! worker's closure receives a [`Cancellation`] token and is expected to
//! check `continue_running()` between units of work; cancellation is
//! observed within one poll interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::is_terminating;

/// Token a background task polls between units of work.
#[derive(Clone)]
pub struct Cancellation {
    stop: Arc<AtomicBool>,
}

impl Cancellation {
    /// False once the worker was stopped or the whole process is
    /// terminating.
    pub fn continue_running(&self) -> bool {
        !is_terminating() && !self.stop.load(Ordering::Acquire)
    }
}

/// Handle to one background thread.
#[derive(Default)]
pub struct BackgroundWorker {
    stop: Option<Arc<AtomicBool>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the task, stopping a previously running one first.
    pub fn run(&mut self, task: impl FnOnce(Cancellation) + Send + 'static) {
        self.stop();
        let stop = Arc::new(AtomicBool::new(false));
        let token = Cancellation { stop: Arc::clone(&stop) };
        self.stop = Some(stop);
        self.handle = Some(std::thread::spawn(move || task(token)));
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Requests cancellation and joins the thread.
    pub fn stop(&mut self) {
        self.stop_without_waiting();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Requests cancellation without joining; the eventual `stop` or drop
    /// still joins.
    pub fn stop_without_waiting(&mut self) {
        if let Some(stop) = self.stop.as_ref() {
            stop.store(true, Ordering::Release);
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_background {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn a_worker_runs_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut worker = BackgroundWorker::new();
        worker.run(move |cancel| {
            while cancel.continue_running() {
                counter.fetch_add(1, Ordering::Relaxed);
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        assert!(worker.is_running());

        std::thread::sleep(Duration::from_millis(20));
        worker.stop();
        let after_stop = ticks.load(Ordering::Relaxed);
        assert!(after_stop > 0);

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(after_stop, ticks.load(Ordering::Relaxed));
        assert!(!worker.is_running());
    }

    #[test]
    fn stopping_an_idle_worker_is_harmless() {
        let mut worker = BackgroundWorker::new();
        worker.stop();
        assert!(!worker.is_running());
    }

    #[test]
    fn a_finished_worker_is_not_running() {
        let mut worker = BackgroundWorker::new();
        worker.run(|_| {});
        worker.stop();
        assert!(!worker.is_running());
    }
}
