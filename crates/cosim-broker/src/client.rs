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

//! A `Client` record: one emulator process bound to its IPC endpoint.

use std::path::Path;

use anyhow::Result;

use crate::config::{ClientConfig, Layer};
use crate::endpoint::ClientEndpoint;
use crate::ipc::{sem_ack_name, sem_release_name, shm_name, Semaphore, ShmSegment};
use crate::shm::BrokerShm;
use crate::supervisor::ClientProcess;

/// One client bound to its shared-memory endpoint and child process.
pub struct Client {
    pub id: u32,
    pub name: Option<String>,
    pub skip_remaining: u64,
    endpoint: ClientEndpoint,
    process: ClientProcess,
}

impl Client {
    /// Create IPC objects, spawn the process, and assemble the client
    /// record. Order matters: the IPC objects must exist before the child
    /// is spawned so it can attach to them immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        id: u32,
        config: &ClientConfig,
        plugin: &Path,
        layer: Layer,
        test_exec: &Path,
        log_dir: &Path,
        clear_on_rerun: bool,
    ) -> Result<Self> {
        let endpoint = ClientEndpoint::create(id)?;
        let process = ClientProcess::spawn(
            id,
            config,
            plugin,
            layer,
            test_exec,
            log_dir,
            clear_on_rerun,
        )?;
        Ok(Self {
            id,
            name: config.name.clone(),
            skip_remaining: config.skip_n_instructions,
            endpoint,
            process,
        })
    }

    /// Display name: the configured name, or the stringified id.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }

    pub fn is_open(&self) -> bool {
        self.process.is_open()
    }

    /// Advance this client by one step. No-op (returns `false`) if already
    /// closed.
    pub fn step(&mut self) -> bool {
        if !self.is_open() {
            return false;
        }
        let acked = self.endpoint.step();
        if !acked {
            self.process.is_open.store(false, std::sync::atomic::Ordering::SeqCst);
        }
        acked
    }

    /// # Safety
    /// Caller must know which union variant this run's layer writes.
    pub unsafe fn snapshot(&self) -> &BrokerShm {
        unsafe { self.endpoint.snapshot() }
    }

    /// Terminate the process and unlink all three named IPC objects for this
    /// client. Idempotent.
    pub fn teardown(&mut self) {
        self.process.teardown();
        ShmSegment::unlink(&shm_name(self.id));
        Semaphore::unlink(&sem_release_name(self.id));
        Semaphore::unlink(&sem_ack_name(self.id));
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.teardown();
    }
}
