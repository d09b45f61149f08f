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

//! `cosim-broker` CLI: loads a configuration, drives one cosimulation run,
//! and translates its result into a process exit code.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use cosim_broker::config::Config;
use cosim_broker::{logging, run, BrokerError};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cosim-broker", about = "Lockstep cosimulation broker")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override `testing.test_exec` from the configuration file.
    #[arg(long)]
    test_exec: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            // Logging isn't initialized yet if parsing itself failed before
            // we can read `logging.level`; fall back to a plain stderr line.
            eprintln!("error: failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("error: failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    if let Some(test_exec) = cli.test_exec {
        config.override_test_exec(test_exec);
    }

    if config.dev.dry_run {
        info!(?config, "dev.dry_run is set; logging configuration and exiting without starting clients");
        return ExitCode::SUCCESS;
    }

    match run(&config) {
        Ok(report) => {
            info!(passed = report.passed, "cosimulation run finished");
            ExitCode::SUCCESS
        }
        Err(BrokerError::Setup(e)) => {
            error!("setup failed: {e:#}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
