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

//! A single client's shared-memory segment, semaphore pair, and `step()`.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::ipc::{sem_ack_name, sem_release_name, shm_name, Semaphore, ShmSegment, WaitError};
use crate::shm::{BrokerShm, BROKER_SHM_SIZE};

/// The broker's 100ms wall-clock deadline for a client's post-step
/// acknowledgement. On timeout the client is treated as finished or crashed.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(100);

/// Owns one client's IPC primitives: its shared-memory segment and its two
/// named semaphores (release: coordinator→client, ack: client→coordinator).
pub struct ClientEndpoint {
    id: u32,
    shm: ShmSegment,
    sem_release: Semaphore,
    sem_ack: Semaphore,
}

impl ClientEndpoint {
    /// Create the three named IPC objects for client `id`. Fails if any name
    /// collides with an existing object (exclusive-create, per the external
    /// interface contract in the configuration/IPC design).
    pub fn create(id: u32) -> Result<Self> {
        let shm = ShmSegment::create_exclusive(&shm_name(id), BROKER_SHM_SIZE)
            .with_context(|| format!("creating shared-memory segment for client {id}"))?;
        let sem_release = Semaphore::create_exclusive(&sem_release_name(id), 0)
            .with_context(|| format!("creating release semaphore for client {id}"))?;
        let sem_ack = Semaphore::create_exclusive(&sem_ack_name(id), 0)
            .with_context(|| format!("creating ack semaphore for client {id}"))?;
        Ok(Self {
            id,
            shm,
            sem_release,
            sem_ack,
        })
    }

    /// Advance this client by exactly one execution step.
    ///
    /// Posts the release semaphore, then waits up to [`ACK_TIMEOUT`] for the
    /// client's acknowledgement. Returns `true` on success, `false` if the
    /// client timed out (interpreted as "finished or crashed", never as an
    /// error propagated to the caller).
    pub fn step(&mut self) -> bool {
        if let Err(e) = self.sem_release.post() {
            warn!(client = self.id, error = %e, "failed to post release semaphore");
            return false;
        }
        match self.sem_ack.timed_wait(ACK_TIMEOUT) {
            Ok(()) => {
                debug!(client = self.id, "step acknowledged");
                true
            }
            Err(WaitError::TimedOut) => {
                debug!(client = self.id, "ack wait timed out; treating client as closed");
                false
            }
            Err(WaitError::Os(e)) => {
                warn!(client = self.id, error = %e, "ack wait failed with an OS error");
                false
            }
        }
    }

    /// Read-only view of the shared snapshot after a successful [`step`].
    ///
    /// # Safety
    /// The caller must only read the union variant matching the run's
    /// configured layer.
    pub unsafe fn snapshot(&self) -> &BrokerShm {
        unsafe { &*(self.shm.as_ptr() as *const BrokerShm) }
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}
