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

//! Top-level orchestration: config → clients → coordinator → report → teardown.

use anyhow::Context;
use tracing::{error, info};

use crate::client::Client;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::diff::DiffConfig;
use crate::error::BrokerError;
use crate::report::{Report, Reporter};
use crate::supervisor;

/// Run one cosimulation session end to end.
///
/// Spawns clients, drives the configured protocol to completion, writes the
/// result report, and tears down every IPC object and child process
/// regardless of how the run ended. `dev.dry_run` is handled by the caller
/// (the CLI) before this function is reached.
pub fn run(config: &Config) -> Result<Report, BrokerError> {
    let mut clients = start_clients(config)?;

    let ignore_unset_registers = config.qemu.ignore_unset_registers;
    let cfg = DiffConfig {
        ignore_unset_registers,
        ignore_registers: &config.qemu.ignore_registers,
        gdb_reg_map: &config.qemu.gdb_reg_map,
    };

    let mut coordinator = Coordinator::new(std::mem::take(&mut clients), config);
    coordinator.run_skip_phase();
    let result = coordinator.run_step_loop(&cfg);
    let (mut clients, trace) = coordinator.into_trace();

    let report = match result {
        Ok(report) => report,
        Err(BrokerError::IrrecoverableDivergence {
            client_id,
            target_pc,
            actual_pc,
        }) => {
            // Per the error-handling design, irrecoverable resync is caught
            // here and converted into an ordinary failing report rather than
            // propagated as an error: the operator still gets a result.json.
            error!(client_id, target_pc, actual_pc, "irrecoverable TB resync divergence");
            Report::failing(vec![crate::diff::ClientDiff {
                key: "tb.resync".to_string(),
                expected: format!("{target_pc:#x}"),
                actual: format!("{actual_pc:#x}"),
                description: Some(format!(
                    "client {client_id} overshot the resync target with no jumped client to justify it"
                )),
                ref_expected: None,
                ref_actual: None,
            }])
        }
        Err(e) => {
            teardown_all(&mut clients);
            return Err(e);
        }
    };

    let names = clients.iter().map(|c| c.display_name()).collect();
    let write_result = Reporter::write(&config.testing.protocol.out.dir, &report, &trace, names)
        .context("writing result.json")
        .map_err(BrokerError::Setup);

    teardown_all(&mut clients);
    write_result?;

    info!(passed = report.passed, "run complete");
    Ok(report)
}

fn start_clients(config: &Config) -> Result<Vec<Client>, BrokerError> {
    let mut clients = Vec::with_capacity(config.qemu.clients.len());
    for (id, client_config) in config.qemu.clients.iter().enumerate() {
        let client = Client::start(
            id as u32,
            client_config,
            &config.qemu.plugin,
            config.testing.protocol.layer,
            &config.testing.test_exec,
            &config.logging.dir,
            config.logging.clear_on_rerun,
        )
        .map_err(BrokerError::Setup)?;
        clients.push(client);
    }
    Ok(clients)
}

fn teardown_all(clients: &mut [Client]) {
    let open_ids: Vec<u32> = clients.iter().filter(|c| c.is_open()).map(|c| c.id).collect();
    supervisor::warn_on_open_clients(&open_ids);
    for client in clients {
        client.teardown();
    }
}
