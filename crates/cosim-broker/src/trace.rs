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

//! Bounded ring buffer of per-step snapshots.

use serde::Serialize;

use crate::shm::{Cpu, InsnInfo};

/// One client's contribution to a single trace entry.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub client_id: u32,
    pub init_mask: u32,
    pub cpus: Vec<CpuSnapshot>,
}

/// A serializable projection of [`Cpu`]: only the meaningful registers.
#[derive(Debug, Clone, Serialize)]
pub struct CpuSnapshot {
    pub idx: u32,
    pub registers: Vec<RegisterSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterSnapshot {
    pub name: String,
    pub data: String,
}

impl CpuSnapshot {
    pub fn from_cpu(cpu: &Cpu, gdb_reg_map: &std::collections::HashMap<String, String>) -> Self {
        let count = (cpu.registers_size).min(cpu.registers.len());
        let registers = cpu.registers[..count]
            .iter()
            .map(|r| RegisterSnapshot {
                name: r.canonical_name(gdb_reg_map),
                data: r.data_hex(),
            })
            .collect();
        CpuSnapshot {
            idx: cpu.idx,
            registers,
        }
    }
}

/// One entry in the trace, tagged by which layer produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum TraceEntry {
    #[serde(rename = "insn")]
    InsnEntry {
        clients: Vec<ClientSnapshot>,
        pc: u64,
    },
    #[serde(rename = "tb")]
    TBEntry {
        clients: Vec<ClientSnapshot>,
        pc: u64,
        insn_count: usize,
        insns: Vec<InsnSummary>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct InsnSummary {
    pub pc: u64,
    pub disas: String,
}

impl InsnSummary {
    pub fn from_insn_info(info: &InsnInfo) -> Self {
        InsnSummary {
            pc: info.pc,
            disas: info.disas.as_str().into_owned(),
        }
    }
}

/// A ring buffer of [`TraceEntry`] values honoring a configured maximum
/// length; `max_len < 0` means unbounded.
#[derive(Debug, Default)]
pub struct Trace {
    entries: Vec<TraceEntry>,
    max_len: Option<usize>,
}

impl Trace {
    pub fn new(max_len: i64) -> Self {
        Self {
            entries: Vec::new(),
            max_len: if max_len < 0 {
                None
            } else {
                Some(max_len as usize)
            },
        }
    }

    /// Append an entry, dropping the oldest one if the buffer is at capacity.
    pub fn push(&mut self, entry: TraceEntry) {
        match self.max_len {
            Some(0) => {}
            Some(max) => {
                if self.entries.len() >= max {
                    self.entries.remove(0);
                }
                self.entries.push(entry);
            }
            None => self.entries.push(entry),
        }
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_entry(pc: u64) -> TraceEntry {
        TraceEntry::InsnEntry {
            clients: vec![],
            pc,
        }
    }

    #[test]
    fn unbounded_trace_keeps_everything() {
        let mut trace = Trace::new(-1);
        for i in 0..10 {
            trace.push(dummy_entry(i));
        }
        assert_eq!(trace.len(), 10);
    }

    #[test]
    fn bounded_trace_drops_oldest() {
        let mut trace = Trace::new(2);
        trace.push(dummy_entry(1));
        trace.push(dummy_entry(2));
        trace.push(dummy_entry(3));
        assert_eq!(trace.len(), 2);
        match &trace.entries()[0] {
            TraceEntry::InsnEntry { pc, .. } => assert_eq!(*pc, 2),
            _ => panic!("expected insn entry"),
        }
    }

    #[test]
    fn zero_length_trace_records_nothing() {
        let mut trace = Trace::new(0);
        trace.push(dummy_entry(1));
        assert!(trace.is_empty());
    }
}
