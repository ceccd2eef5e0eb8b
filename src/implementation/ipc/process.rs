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

//! The process supervisor: the one module owning global process state
//! (signal disposition, the set of forked children, the caught-exit-signal
//! flag). Signal handlers only trampoline into atomics here; everything
//! else runs on regular threads. Lifecycle: `init(rank)` once at startup,
//! then fork/signal/reap operations, then `do_exit` at the very end.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use log::{error, warn};
use parking_lot::Mutex;

use crate::{Error, Result};

static EXIT_SIGNAL_CAUGHT: AtomicBool = AtomicBool::new(false);
static EXIT_SIGNAL: AtomicI32 = AtomicI32::new(0);
static RANK: AtomicI32 = AtomicI32::new(0);
static CHILDREN: Mutex<Vec<libc::pid_t>> = Mutex::new(Vec::new());

extern "C" fn on_wakeup(_signum: libc::c_int) {
    // Nothing to do: the signal's only purpose is to interrupt a sleep.
}

extern "C" fn on_exit_signal(signum: libc::c_int) {
    EXIT_SIGNAL.store(signum, Ordering::Relaxed);
    EXIT_SIGNAL_CAUGHT.store(true, Ordering::Release);
}

/// The outcome of a fork, seen from each side.
pub enum ForkResult {
    Parent(libc::pid_t),
    Child,
}

/// Installs the signal dispositions and remembers the process rank.
/// SIGUSR1 becomes a pure wakeup; the fatal and termination signals
/// trampoline into the exit flag polled by the main loop.
pub fn init(rank: usize) {
    RANK.store(rank as i32, Ordering::Relaxed);
    EXIT_SIGNAL_CAUGHT.store(false, Ordering::Relaxed);
    unsafe {
        libc::signal(libc::SIGUSR1, on_wakeup as libc::sighandler_t);
        for sig in [libc::SIGSEGV, libc::SIGABRT, libc::SIGTERM, libc::SIGINT] {
            libc::signal(sig, on_exit_signal as libc::sighandler_t);
        }
    }
}

pub fn rank() -> usize {
    RANK.load(Ordering::Relaxed) as usize
}

/// Forks. The parent registers the child for bookkeeping; the child comes
/// back with an empty children set of its own.
pub fn create_child() -> Result<ForkResult> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(Error::SubprocessFault(format!(
            "fork failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    if pid > 0 {
        CHILDREN.lock().push(pid);
        Ok(ForkResult::Parent(pid))
    } else {
        // Forked state: the parent's children are not ours.
        CHILDREN.lock().clear();
        Ok(ForkResult::Child)
    }
}

fn send_signal(pid: libc::pid_t, signum: libc::c_int) {
    let result = unsafe { libc::kill(pid, signum) };
    if result == -1 {
        warn!("kill -{signum} {pid} returned -1");
    }
}

/// SIGTERM followed by SIGCONT, so that a stopped child still terminates.
pub fn terminate(pid: libc::pid_t) {
    send_signal(pid, libc::SIGTERM);
    send_signal(pid, libc::SIGCONT);
}

pub fn hard_kill(pid: libc::pid_t) {
    send_signal(pid, libc::SIGKILL);
}

pub fn suspend(pid: libc::pid_t) {
    send_signal(pid, libc::SIGTSTP);
}

pub fn resume(pid: libc::pid_t) {
    send_signal(pid, libc::SIGCONT);
}

pub fn wake_up(pid: libc::pid_t) {
    send_signal(pid, libc::SIGUSR1);
}

/// Non-blocking reap: whether the child exited (or was never ours). A
/// child observed as exited is forgotten.
pub fn did_child_exit(pid: libc::pid_t) -> bool {
    let mut children = CHILDREN.lock();
    let Some(at) = children.iter().position(|c| *c == pid) else {
        return true;
    };
    let mut status = 0;
    let result = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    if result != 0 {
        children.swap_remove(at);
        true
    } else {
        false
    }
}

/// Terminate-and-resume every known child, e.g. on worker shutdown.
pub fn forward_terminate_to_children() {
    let children: Vec<libc::pid_t> = CHILDREN.lock().clone();
    for pid in children {
        terminate(pid);
    }
}

/// The signal that asked this process to die, if any. Polled by the main
/// loop; the handler itself does nothing else.
pub fn exit_signal_caught() -> Option<i32> {
    if EXIT_SIGNAL_CAUGHT.load(Ordering::Acquire) {
        Some(EXIT_SIGNAL.load(Ordering::Relaxed))
    } else {
        None
    }
}

/// Writes a stack trace of the given thread through an external debugger
/// call. Best effort: a missing debugger only costs the trace.
pub fn write_trace(tid: i64) {
    let outfile = format!("parsat_thread_trace_{tid}");
    let result = std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("gdb --q --n --ex bt --batch --pid {tid} > {outfile} 2>&1"))
        .status();
    if result.is_err() {
        warn!("could not invoke debugger for thread trace");
    }
}

/// Final exit path: dump a trace for the fatal signals, hand the signal on
/// to all children, and leave with the signal number as exit code.
pub fn do_exit(code: i32) -> ! {
    if code == libc::SIGSEGV || code == libc::SIGABRT {
        error!("rank {} exits on fatal signal {code}", rank());
        let tid = unsafe { libc::syscall(libc::SYS_gettid) };
        write_trace(tid as i64);
    }
    forward_terminate_to_children();
    std::process::exit(code);
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_process {
    use super::*;

    #[test]
    fn unknown_children_count_as_exited() {
        assert!(did_child_exit(999_999_999_i32 as libc::pid_t));
    }

    #[test]
    fn the_exit_flag_starts_clear() {
        init(0);
        assert_eq!(None, exit_signal_caught());
        assert_eq!(0, rank());
    }

    #[test]
    fn forked_children_are_reaped() {
        init(0);
        let child = match create_child().unwrap() {
            ForkResult::Parent(pid) => pid,
            ForkResult::Child => {
                // Child side: vanish immediately without running the
                // test harness any further.
                unsafe { libc::_exit(0) }
            }
        };
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !did_child_exit(child) {
            assert!(std::time::Instant::now() < deadline, "child never exited");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        // Once reaped, the child is forgotten.
        assert!(did_child_exit(child));
    }
}
