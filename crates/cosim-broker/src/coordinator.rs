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

//! Lockstep coordinator: skip phase, the `insn`/`tb-strict` step loop, and
//! the `tb` loop's PC resynchronization algorithm.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::{Config, Layer};
use crate::diff::{diff_cpus, ClientDiff, DiffConfig};
use crate::error::BrokerError;
use crate::report::Report;
use crate::shm::{Cpu, InsnInfo, MAX_CPU_COUNT};
use crate::trace::{ClientSnapshot, CpuSnapshot, InsnSummary, Trace, TraceEntry};

/// One client's TB alignment state for a single resync round.
#[derive(Debug, Clone, Copy)]
struct ClientSyncInfo {
    client_idx: usize,
    start_pc: u64,
    end_pc: u64,
    tb_size: usize,
}

impl ClientSyncInfo {
    /// Every instruction in the target ISA is 4 bytes; a TB whose end PC
    /// doesn't match a straight-line advance implies a control transfer.
    fn is_jump(&self) -> bool {
        self.start_pc + self.tb_size as u64 * 4 != self.end_pc
    }
}

/// Drives all clients through the configured protocol and produces a report.
pub struct Coordinator {
    clients: Vec<Client>,
    layer: Layer,
    execute_all_remaining_instructions: bool,
    stop_after_n_instructions: i64,
    trace: Trace,
    aligned_pc: Option<u64>,
}

impl Coordinator {
    pub fn new(clients: Vec<Client>, config: &Config) -> Self {
        Self {
            clients,
            layer: config.testing.protocol.layer,
            execute_all_remaining_instructions: config.testing.protocol.execute_all_remaining_instructions,
            stop_after_n_instructions: config.testing.protocol.stop_after_n_instructions,
            trace: Trace::new(config.testing.max_trace_length),
            aligned_pc: None,
        }
    }

    /// Per-client skip budget: step clients with remaining skip budget once
    /// per iteration until all budgets are exhausted. Diffs are not
    /// collected during this phase.
    pub fn run_skip_phase(&mut self) {
        loop {
            let mut any_skipped = false;
            for client in &mut self.clients {
                if client.skip_remaining > 0 && client.is_open() {
                    client.step();
                    client.skip_remaining -= 1;
                    any_skipped = true;
                }
            }
            if !any_skipped {
                break;
            }
        }
    }

    /// Run the step loop until the run finishes, diverges, or is exhausted.
    pub fn run_step_loop(&mut self, cfg: &DiffConfig) -> Result<Report, BrokerError> {
        loop {
            if !self.execute_all_remaining_instructions && self.stop_after_n_instructions == 0 {
                info!("stop_after_n_instructions reached zero; reporting pass");
                return Ok(Report::passing());
            }
            if self.clients.iter().all(|c| !c.is_open()) {
                info!("all clients closed; reporting pass");
                return Ok(Report::passing());
            }

            let diffs = match self.layer {
                Layer::Insn | Layer::TbStrict => self.step_round(cfg)?,
                Layer::Tb => self.resync_round(cfg)?,
            };

            if !self.execute_all_remaining_instructions {
                self.stop_after_n_instructions -= 1;
            }

            if !diffs.is_empty() {
                warn!(diff_count = diffs.len(), "divergence detected");
                return Ok(Report::failing(diffs));
            }
        }
    }

    /// One `insn`/`tb-strict` round: step every open client once, trace it,
    /// diff it.
    fn step_round(&mut self, cfg: &DiffConfig) -> Result<Vec<ClientDiff>, BrokerError> {
        for client in &mut self.clients {
            if client.is_open() {
                client.step();
            }
        }

        let snapshots = self.read_snapshots();
        self.push_trace(&snapshots, cfg.gdb_reg_map);
        diff_all(&snapshots, cfg)
    }

    /// One `tb` round: resynchronize all clients to a common PC, then diff.
    fn resync_round(&mut self, cfg: &DiffConfig) -> Result<Vec<ClientDiff>, BrokerError> {
        let start_pc = self.aligned_pc.unwrap_or(0);

        let mut infos: Vec<ClientSyncInfo> = Vec::new();
        for (idx, client) in self.clients.iter_mut().enumerate() {
            if !client.is_open() {
                continue;
            }
            client.step();
            if !client.is_open() {
                continue;
            }
            let (pc, insn_count) = unsafe {
                let tb = client.snapshot().tb();
                (tb.pc, tb.insn_count)
            };
            infos.push(ClientSyncInfo {
                client_idx: idx,
                start_pc,
                end_pc: pc,
                tb_size: insn_count,
            });
        }

        let target = self.resync_to_target(&mut infos)?;
        self.aligned_pc = Some(target);

        let snapshots = self.read_snapshots();
        self.push_trace(&snapshots, cfg.gdb_reg_map);
        diff_all(&snapshots, cfg)
    }

    /// Run the FIFO catch-up queue until every tracked client reaches the
    /// resync target, per the `tb`-layer algorithm.
    fn resync_to_target(&mut self, infos: &mut Vec<ClientSyncInfo>) -> Result<u64, BrokerError> {
        if infos.is_empty() {
            return Ok(self.aligned_pc.unwrap_or(0));
        }

        let jumped = infos.iter().find(|i| i.is_jump()).copied();
        let target = match jumped {
            Some(j) => j.end_pc,
            // infos is non-empty here (checked above), so this fold always
            // has a starting element.
            None => infos
                .iter()
                .fold(infos[0].end_pc, |max, i| max.max(i.end_pc)),
        };

        let mut queue: VecDeque<ClientSyncInfo> =
            infos.iter().filter(|i| i.end_pc != target).copied().collect();

        while let Some(info) = queue.pop_front() {
            let client = &mut self.clients[info.client_idx];
            if !client.is_open() {
                continue;
            }
            client.step();
            if !client.is_open() {
                continue;
            }
            let (pc, insn_count) = unsafe {
                let tb = client.snapshot().tb();
                (tb.pc, tb.insn_count)
            };
            let updated = ClientSyncInfo {
                client_idx: info.client_idx,
                start_pc: info.end_pc,
                end_pc: pc,
                tb_size: insn_count,
            };

            if updated.end_pc > target {
                return Err(BrokerError::IrrecoverableDivergence {
                    client_id: self.clients[info.client_idx].id,
                    target_pc: target,
                    actual_pc: updated.end_pc,
                });
            }

            if updated.end_pc != target {
                queue.push_back(updated);
            }
        }

        Ok(target)
    }

    fn read_snapshots(&self) -> Vec<StepSnapshot> {
        self.clients
            .iter()
            .filter(|c| c.is_open())
            .map(|c| unsafe {
                match self.layer {
                    Layer::Insn => {
                        let exec = c.snapshot().exec();
                        StepSnapshot {
                            client_id: c.id,
                            init_mask: exec.init_mask,
                            cpus: exec.cpus,
                            current_pc: exec.current_insn.pc,
                            insn_count: None,
                            insns_info: None,
                        }
                    }
                    Layer::Tb | Layer::TbStrict => {
                        let tb = c.snapshot().tb();
                        let count = tb.insns_info_size.min(tb.insns_info.len());
                        StepSnapshot {
                            client_id: c.id,
                            init_mask: tb.init_mask,
                            cpus: tb.cpus,
                            current_pc: tb.pc,
                            insn_count: Some(tb.insn_count),
                            insns_info: Some(tb.insns_info[..count].to_vec()),
                        }
                    }
                }
            })
            .collect()
    }

    fn push_trace(&mut self, snapshots: &[StepSnapshot], gdb_reg_map: &std::collections::HashMap<String, String>) {
        let clients: Vec<ClientSnapshot> = snapshots
            .iter()
            .map(|s| ClientSnapshot {
                client_id: s.client_id,
                init_mask: s.init_mask,
                cpus: (0..MAX_CPU_COUNT)
                    .filter(|i| s.init_mask & (1 << i) != 0)
                    .map(|i| CpuSnapshot::from_cpu(&s.cpus[i], gdb_reg_map))
                    .collect(),
            })
            .collect();

        let pc = snapshots.first().map(|s| s.current_pc).unwrap_or(0);
        let entry = match self.layer {
            Layer::Insn => TraceEntry::InsnEntry { clients, pc },
            Layer::Tb | Layer::TbStrict => {
                let insns = snapshots
                    .first()
                    .and_then(|s| s.insns_info.as_ref())
                    .map(|infos| infos.iter().map(InsnSummary::from_insn_info).collect())
                    .unwrap_or_default();
                let insn_count = snapshots.first().and_then(|s| s.insn_count).unwrap_or(0);
                TraceEntry::TBEntry {
                    clients,
                    pc,
                    insn_count,
                    insns,
                }
            }
        };
        self.trace.push(entry);
        debug!(trace_len = self.trace.len(), "trace entry recorded");
    }

    pub fn into_trace(self) -> (Vec<Client>, Trace) {
        (self.clients, self.trace)
    }
}

struct StepSnapshot {
    client_id: u32,
    init_mask: u32,
    cpus: [Cpu; MAX_CPU_COUNT],
    current_pc: u64,
    insn_count: Option<usize>,
    insns_info: Option<Vec<InsnInfo>>,
}

/// Compare the first pair of snapshots. Per the diff engine's documented
/// (and deliberately preserved) short-circuit behavior, only `(clients[0],
/// clients[1])` is compared even when more clients are present.
fn diff_all(snapshots: &[StepSnapshot], cfg: &DiffConfig) -> Result<Vec<ClientDiff>, BrokerError> {
    if snapshots.len() < 2 {
        return Ok(Vec::new());
    }
    let a = &snapshots[0];
    let b = &snapshots[1];
    diff_cpus(a.init_mask, &a.cpus, b.init_mask, &b.cpus, cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_sync_info_detects_jump() {
        let straight = ClientSyncInfo {
            client_idx: 0,
            start_pc: 0x8000_0000,
            end_pc: 0x8000_0010,
            tb_size: 4,
        };
        assert!(!straight.is_jump());

        let jump = ClientSyncInfo {
            client_idx: 0,
            start_pc: 0x8000_0000,
            end_pc: 0x8000_1000,
            tb_size: 1,
        };
        assert!(jump.is_jump());
    }
}
