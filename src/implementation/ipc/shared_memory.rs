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

//! Named POSIX shared-memory regions, the data plane between a worker and
//! its solver subprocesses. Creation tolerates leftover names from a
//! crashed predecessor by unlinking first; dropping an owned region
//! removes its name from the filesystem namespace.

use std::ffi::CString;
use std::io;

use crate::{Error, Result};

/// One mapped region. The mapping is valid for the lifetime of the value;
/// whether the *name* outlives it depends on ownership: the creating side
/// unlinks on drop, an attaching side only unmaps.
pub struct SharedMemory {
    name: String,
    ptr: *mut u8,
    mapped_len: usize,
    size: usize,
    owner: bool,
}

// The raw pointer is a process-shared mapping; all concurrent access goes
// through atomics or explicitly synchronized copies.
unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    fn cname(name: &str) -> Result<CString> {
        CString::new(name)
            .map_err(|_| Error::ProtocolViolation(format!("shared memory name {name:?}")))
    }

    fn last_os_error() -> Error {
        Error::TransientIo(io::Error::last_os_error())
    }

    /// Creates (and maps) a region of `size` bytes, zero-initialized. Any
    /// pre-existing object of the same name is unlinked first.
    pub fn create(name: &str, size: usize) -> Result<SharedMemory> {
        let cname = Self::cname(name)?;
        unsafe { libc::shm_unlink(cname.as_ptr()) };
        let fd = unsafe {
            libc::shm_open(cname.as_ptr(), libc::O_CREAT | libc::O_EXCL | libc::O_RDWR, 0o600)
        };
        if fd < 0 {
            return Err(Self::last_os_error());
        }
        let mapped_len = size.max(1);
        if unsafe { libc::ftruncate(fd, mapped_len as libc::off_t) } != 0 {
            let err = Self::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(cname.as_ptr());
            }
            return Err(err);
        }
        Self::map(name, cname, fd, mapped_len, size, true)
    }

    /// Maps an existing region of known payload size.
    pub fn attach(name: &str, size: usize) -> Result<SharedMemory> {
        let cname = Self::cname(name)?;
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(Self::last_os_error());
        }
        Self::map(name, cname, fd, size.max(1), size, false)
    }

    /// Maps an existing region, taking its size from the object itself.
    pub fn attach_auto(name: &str) -> Result<SharedMemory> {
        let cname = Self::cname(name)?;
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(Self::last_os_error());
        }
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } != 0 {
            let err = Self::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        let size = stat.st_size as usize;
        Self::map(name, cname, fd, size.max(1), size, false)
    }

    fn map(
        name: &str,
        cname: CString,
        fd: libc::c_int,
        mapped_len: usize,
        size: usize,
        owner: bool,
    ) -> Result<SharedMemory> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapped_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if ptr == libc::MAP_FAILED {
            let err = Self::last_os_error();
            if owner {
                unsafe { libc::shm_unlink(cname.as_ptr()) };
            }
            return Err(err);
        }
        Ok(SharedMemory {
            name: name.to_string(),
            ptr: ptr as *mut u8,
            mapped_len,
            size,
            owner,
        })
    }

    /// Whether an object of this name currently exists in the namespace.
    pub fn exists(name: &str) -> bool {
        let Ok(cname) = Self::cname(name) else { return false };
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0) };
        if fd >= 0 {
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }

    /// Best-effort removal of a name, e.g. for regions created by the
    /// other side of the channel.
    pub fn unlink_name(name: &str) {
        if let Ok(cname) = Self::cname(name) {
            unsafe { libc::shm_unlink(cname.as_ptr()) };
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Copies `data` into the region starting at the given word offset.
    pub fn write_ints(&self, word_offset: usize, data: &[i32]) -> Result<()> {
        if (word_offset + data.len()) * 4 > self.size {
            return Err(Error::ResourceExhaustion("shared memory region too small"));
        }
        unsafe {
            let base = (self.ptr as *mut i32).add(word_offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), base, data.len());
        }
        Ok(())
    }

    /// Copies `count` words out of the region starting at the word offset.
    pub fn read_ints(&self, word_offset: usize, count: usize) -> Result<Vec<i32>> {
        if (word_offset + count) * 4 > self.size {
            return Err(Error::ProtocolViolation(format!(
                "read of {count} words at offset {word_offset} exceeds region {} ({} bytes)",
                self.name, self.size
            )));
        }
        let mut out = vec![0_i32; count];
        unsafe {
            let base = (self.ptr as *const i32).add(word_offset);
            std::ptr::copy_nonoverlapping(base, out.as_mut_ptr(), count);
        }
        Ok(out)
    }

    /// Words the region can hold.
    pub fn capacity_words(&self) -> usize {
        self.size / 4
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.mapped_len);
        }
        if self.owner {
            Self::unlink_name(&self.name);
        }
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
