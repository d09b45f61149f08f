// Copyright 2026 The VADL Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! POSIX named shared memory and semaphores.
//!
//! This is the only module that touches raw `libc` calls. Everything above
//! it (the client endpoint, the coordinator) works with the safe wrappers
//! defined here. All names are created with exclusive-create semantics
//! (`O_CREAT | O_EXCL`) and unlinked idempotently on teardown.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::unix::io::FromRawFd;
use std::time::Duration;

use memmap2::{MmapMut, MmapOptions};

/// Shared-memory object name for client `i`.
pub fn shm_name(i: u32) -> String {
    format!("/cosim-shm-{i}")
}

/// Coordinator-to-client semaphore name for client `i`.
pub fn sem_release_name(i: u32) -> String {
    format!("/cosim-sem-release-{i}")
}

/// Client-to-coordinator semaphore name for client `i`.
pub fn sem_ack_name(i: u32) -> String {
    format!("/cosim-sem-ack-{i}")
}

fn cname(name: &str) -> io::Result<CString> {
    CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "IPC name contains a NUL byte"))
}

/// An owned, memory-mapped POSIX shared-memory segment.
pub struct ShmSegment {
    name: String,
    mmap: MmapMut,
}

impl ShmSegment {
    /// Create a new segment of `size` bytes. Fails if an object with this
    /// name already exists (exclusive-create, per the external interface
    /// contract).
    pub fn create_exclusive(name: &str, size: usize) -> io::Result<Self> {
        let c_name = cname(name)?;
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: fd is a valid, freshly opened file descriptor we own.
        let file = unsafe { File::from_raw_fd(fd) };
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } == -1 {
            let err = io::Error::last_os_error();
            drop(file);
            let _ = unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(err);
        }

        // SAFETY: `file` refers to a shared-memory object sized above, and we
        // hold exclusive ownership of the name until `unlink` is called.
        let mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        // The mapping keeps the segment alive after `file` is dropped.

        Ok(Self {
            name: name.to_string(),
            mmap,
        })
    }

    /// Pointer to the start of the mapped region.
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    /// Mutable pointer to the start of the mapped region.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    /// Unlink the shared-memory object by name. Idempotent: tolerates the
    /// object already being gone.
    pub fn unlink(name: &str) {
        if let Ok(c_name) = cname(name) {
            unsafe {
                libc::shm_unlink(c_name.as_ptr());
            }
        }
    }

    /// The name this segment was created with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Why a [`Semaphore::timed_wait`] call did not succeed.
#[derive(Debug)]
pub enum WaitError {
    /// The wait exceeded its deadline: the most common case, meaning the
    /// client has not yet posted (and, per the broker's policy, is treated
    /// as finished or crashed).
    TimedOut,
    /// Some other OS-level failure, which indicates a setup problem rather
    /// than a normal client lifecycle event.
    Os(io::Error),
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::TimedOut => write!(f, "semaphore wait timed out"),
            WaitError::Os(e) => write!(f, "semaphore wait failed: {e}"),
        }
    }
}

impl std::error::Error for WaitError {}

/// An owned named POSIX semaphore.
pub struct Semaphore {
    sem: *mut libc::sem_t,
    name: String,
}

// SAFETY: POSIX guarantees named semaphores are safe to use concurrently
// from any thread holding a handle to them.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Create a new named semaphore with the given initial value. Fails if a
    /// semaphore with this name already exists.
    pub fn create_exclusive(name: &str, initial_value: u32) -> io::Result<Self> {
        let c_name = cname(name)?;
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600u32,
                initial_value,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            sem: sem as *mut libc::sem_t,
            name: name.to_string(),
        })
    }

    /// Post (increment) the semaphore, waking one waiter.
    pub fn post(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.sem) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Wait for the semaphore to become available, or until `timeout`
    /// elapses.
    pub fn timed_wait(&self, timeout: Duration) -> Result<(), WaitError> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) } == -1 {
            return Err(WaitError::Os(io::Error::last_os_error()));
        }
        ts.tv_sec += timeout.as_secs() as libc::time_t;
        ts.tv_nsec += i64::from(timeout.subsec_nanos());
        if ts.tv_nsec >= 1_000_000_000 {
            ts.tv_sec += 1;
            ts.tv_nsec -= 1_000_000_000;
        }

        loop {
            if unsafe { libc::sem_timedwait(self.sem, &ts) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Err(WaitError::TimedOut),
                _ => return Err(WaitError::Os(err)),
            }
        }
    }

    /// Unlink the semaphore by name. Idempotent: tolerates it already being
    /// gone.
    pub fn unlink(name: &str) {
        if let Ok(c_name) = cname(name) {
            unsafe {
                libc::sem_unlink(c_name.as_ptr());
            }
        }
    }

    /// The name this semaphore was created with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;

    #[test]
    #[serial]
    fn shm_create_exclusive_then_name_collision_fails() {
        let name = "/cosim-test-shm-collision";
        ShmSegment::unlink(name);
        let _first = ShmSegment::create_exclusive(name, 4096).expect("first create succeeds");
        let second = ShmSegment::create_exclusive(name, 4096);
        assert!(second.is_err());
        ShmSegment::unlink(name);
    }

    #[test]
    #[serial]
    fn semaphore_post_then_wait_succeeds_immediately() {
        let name = "/cosim-test-sem-post-wait";
        Semaphore::unlink(name);
        let sem = Semaphore::create_exclusive(name, 0).expect("create semaphore");
        sem.post().expect("post");
        sem.timed_wait(Duration::from_millis(100))
            .expect("wait should succeed after post");
        Semaphore::unlink(name);
    }

    #[test]
    #[serial]
    fn semaphore_wait_without_post_times_out() {
        let name = "/cosim-test-sem-timeout";
        Semaphore::unlink(name);
        let sem = Semaphore::create_exclusive(name, 0).expect("create semaphore");
        let result = sem.timed_wait(Duration::from_millis(50));
        assert!(matches!(result, Err(WaitError::TimedOut)));
        Semaphore::unlink(name);
    }
}
