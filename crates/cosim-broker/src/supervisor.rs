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

//! Spawns client processes, redirects their output to per-client log files,
//! and watches for their exit on a dedicated thread per client.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{ClientConfig, Layer};

/// Handle to one spawned client process: a watcher thread owns the actual
/// `Child` (so its blocking `wait()` doesn't race teardown's `kill`), and
/// marks `is_open` false once it reaps the exit status.
pub struct ClientProcess {
    pub id: u32,
    pub is_open: Arc<AtomicBool>,
    pid: i32,
    watcher: Option<JoinHandle<()>>,
}

impl ClientProcess {
    /// Spawn `client.exec` with the cosimulation plugin argument appended,
    /// redirecting stdout/stderr into `log_dir`.
    pub fn spawn(
        id: u32,
        client: &ClientConfig,
        plugin: &Path,
        layer: Layer,
        test_exec: &Path,
        log_dir: &Path,
        clear_on_rerun: bool,
    ) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("creating log directory {}", log_dir.display()))?;

        let mut plugin_arg = format!(
            "{},client-id={},mode={}",
            plugin.display(),
            id,
            layer.plugin_mode()
        );
        if let Some(name) = &client.name {
            plugin_arg.push_str(&format!(",client-name={name}"));
        }

        let mut cmd = Command::new(&client.exec);
        cmd.arg(format!("-{}", client.pass_test_exec_to))
            .arg(test_exec)
            .arg("-plugin")
            .arg(plugin_arg)
            .args(&client.additional_args);

        let stdout_path = log_dir.join(format!("client-{id}.stdout.log"));
        let stderr_path = log_dir.join(format!("client-{id}.stderr.log"));
        cmd.stdout(Stdio::from(open_log_file(&stdout_path, clear_on_rerun)?));
        cmd.stderr(Stdio::from(open_log_file(&stderr_path, clear_on_rerun)?));

        info!(client = id, exec = %client.exec.display(), "spawning client process");
        let child = cmd
            .spawn()
            .with_context(|| format!("spawning client {id} ({})", client.exec.display()))?;
        let pid = child.id() as i32;

        let is_open = Arc::new(AtomicBool::new(true));
        let watcher = {
            let is_open = Arc::clone(&is_open);
            let mut child = child;
            std::thread::spawn(move || {
                match child.wait() {
                    Ok(status) => info!(client = id, ?status, "client process exited"),
                    Err(e) => warn!(client = id, error = %e, "failed to wait for client process"),
                }
                is_open.store(false, Ordering::SeqCst);
            })
        };

        Ok(Self {
            id,
            is_open,
            pid,
            watcher: Some(watcher),
        })
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    /// Terminate the child if still running and join its watcher thread.
    /// Idempotent: safe to call more than once and tolerates a child that
    /// already exited.
    pub fn teardown(&mut self) {
        if self.is_open() {
            unsafe {
                libc::kill(self.pid, libc::SIGTERM);
            }
        }
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.join();
        }
    }
}

impl Drop for ClientProcess {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn open_log_file(path: &PathBuf, clear_on_rerun: bool) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).write(true);
    if clear_on_rerun {
        opts.truncate(true);
    } else {
        opts.append(true);
    }
    opts.open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}

/// Log a warning when clients are still marked open at teardown time; their
/// log files are left on disk for post-mortem inspection either way.
pub fn warn_on_open_clients(open_ids: &[u32]) {
    if !open_ids.is_empty() {
        warn!(?open_ids, "clients still open at teardown; terminating");
    }
}
