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

//! The fixed-layout control record at the start of every attempt's primary
//! shared-memory region. Each request flag `do_x` is written only by the
//! parent and read only by the child; each response flag `did_x` the other
//! way around. This single-writer-single-reader discipline is what lets
//! both sides poll plain atomic bytes without any shared lock.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::{SatResult, SharedMemory};

/// The control record. All fields are process-shared atomics; the struct
/// is only ever accessed through a mapping of the primary region.
#[repr(C)]
pub struct ControlRecord {
    // Role of this subprocess within the job's portfolio.
    pub portfolio_rank: AtomicI32,
    pub portfolio_size: AtomicI32,

    // Buffer bookkeeping, in words (i32s).
    pub export_capacity_words: AtomicI32,
    pub import_capacity_words: AtomicI32,
    pub export_buffer_max_size: AtomicI32,
    pub export_buffer_true_size: AtomicI32,
    pub import_buffer_size: AtomicI32,

    // Revision handoff for incremental jobs.
    pub written_revision: AtomicI32,
    pub desired_revision: AtomicI32,

    // Result reporting.
    pub result: AtomicI32,
    pub solution_size: AtomicI32,

    // Requests: parent writes, child reads.
    pub do_export: AtomicBool,
    pub do_import: AtomicBool,
    pub do_dump_stats: AtomicBool,
    pub do_update_role: AtomicBool,
    pub do_interrupt: AtomicBool,

    // Responses: child writes, parent reads.
    pub did_export: AtomicBool,
    pub did_import: AtomicBool,
    pub did_dump_stats: AtomicBool,
    pub did_update_role: AtomicBool,
    pub did_interrupt: AtomicBool,

    pub is_spawned: AtomicBool,
    pub is_initialized: AtomicBool,
    pub has_solution: AtomicBool,
}

impl ControlRecord {
    pub const SIZE: usize = std::mem::size_of::<ControlRecord>();

    /// A zeroed record with the given portfolio role, as the parent sets
    /// it up before forking.
    pub fn init(&self, portfolio_rank: i32, portfolio_size: i32) {
        self.portfolio_rank.store(portfolio_rank, Ordering::Relaxed);
        self.portfolio_size.store(portfolio_size, Ordering::Relaxed);
        self.export_capacity_words.store(0, Ordering::Relaxed);
        self.import_capacity_words.store(0, Ordering::Relaxed);
        self.export_buffer_max_size.store(0, Ordering::Relaxed);
        self.export_buffer_true_size.store(0, Ordering::Relaxed);
        self.import_buffer_size.store(0, Ordering::Relaxed);
        self.written_revision.store(-1, Ordering::Relaxed);
        self.desired_revision.store(-1, Ordering::Relaxed);
        self.result.store(SatResult::Unknown.code(), Ordering::Relaxed);
        self.solution_size.store(0, Ordering::Relaxed);
        for flag in [
            &self.do_export,
            &self.do_import,
            &self.do_dump_stats,
            &self.do_update_role,
            &self.do_interrupt,
            &self.did_export,
            &self.did_import,
            &self.did_dump_stats,
            &self.did_update_role,
            &self.did_interrupt,
            &self.is_spawned,
            &self.is_initialized,
            &self.has_solution,
        ] {
            flag.store(false, Ordering::Relaxed);
        }
    }

    /// Views the start of a mapped region as the control record.
    ///
    /// # Safety-relevant contract
    /// The region must be at least [`Self::SIZE`] bytes and must stay
    /// mapped for as long as the returned reference is used; page
    /// alignment of the mapping satisfies the record's alignment.
    pub fn attach(region: &SharedMemory) -> &ControlRecord {
        assert!(region.size() >= Self::SIZE, "control region too small");
        unsafe { &*(region.as_ptr() as *const ControlRecord) }
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_control {
    use super::*;

    fn region() -> SharedMemory {
        static NEXT: AtomicI32 = AtomicI32::new(0);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        let name = format!("/parsat.test.control.{}.{id}", std::process::id());
        SharedMemory::create(&name, ControlRecord::SIZE).unwrap()
    }

    #[test]
    fn init_resets_every_field() {
        let region = region();
        let record = ControlRecord::attach(&region);
        record.do_export.store(true, Ordering::Relaxed);
        record.has_solution.store(true, Ordering::Relaxed);

        record.init(3, 8);
        assert_eq!(3, record.portfolio_rank.load(Ordering::Relaxed));
        assert_eq!(8, record.portfolio_size.load(Ordering::Relaxed));
        assert!(!record.do_export.load(Ordering::Relaxed));
        assert!(!record.has_solution.load(Ordering::Relaxed));
        assert_eq!(SatResult::Unknown.code(), record.result.load(Ordering::Relaxed));
        assert_eq!(-1, record.written_revision.load(Ordering::Relaxed));
    }

    #[test]
    fn both_attachments_observe_the_same_flags() {
        let region = region();
        let parent = ControlRecord::attach(&region);
        parent.init(0, 1);

        let other = SharedMemory::attach(region.name(), ControlRecord::SIZE).unwrap();
        let child = ControlRecord::attach(&other);

        parent.do_export.store(true, Ordering::Release);
        assert!(child.do_export.load(Ordering::Acquire));
        child.did_export.store(true, Ordering::Release);
        assert!(parent.did_export.load(Ordering::Acquire));
    }

    #[test]
    fn the_record_fits_its_declared_size() {
        assert!(ControlRecord::SIZE >= 11 * 4 + 13);
        assert!(ControlRecord::SIZE <= 4096, "record must fit one page");
    }
}
