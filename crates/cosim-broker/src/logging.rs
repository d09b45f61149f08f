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

//! `tracing-subscriber` setup driven by the configuration's `logging` table.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialize the global `tracing` subscriber.
///
/// The filter is `logging.level` if non-empty, falling back to `RUST_LOG`,
/// falling back to `info`. When `logging.enable` is set, output is also
/// written to `logging.dir/logging.file` (truncated instead of appended when
/// `logging.clear_on_rerun` is set); otherwise only stderr is used.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if config.enable {
        std::fs::create_dir_all(&config.dir)
            .with_context(|| format!("creating logging directory {}", config.dir.display()))?;
        let path = config.dir.join(&config.file);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(config.clear_on_rerun)
            .append(!config.clear_on_rerun)
            .open(&path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        subscriber
            .with_writer(std::sync::Mutex::new(file))
            .try_init()
            .map_err(|e| anyhow::anyhow!("initializing tracing subscriber: {e}"))?;
    } else {
        subscriber
            .try_init()
            .map_err(|e| anyhow::anyhow!("initializing tracing subscriber: {e}"))?;
    }

    Ok(())
}
