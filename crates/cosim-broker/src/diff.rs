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

//! Structural diff engine: compares two (or more) snapshots field by field.
//!
//! Pure with respect to its inputs — a pair of [`Cpu`] arrays plus the
//! register-name/ignore configuration. It never touches IPC or the trace.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::BrokerError;
use crate::shm::{Cpu, Register, MAX_CPU_COUNT};

/// Configuration the diff engine needs, projected out of [`crate::config::QemuConfig`].
pub struct DiffConfig<'a> {
    pub ignore_unset_registers: bool,
    pub ignore_registers: &'a HashSet<String>,
    pub gdb_reg_map: &'a HashMap<String, String>,
}

/// A single structured divergence between two snapshots.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClientDiff {
    pub key: String,
    pub expected: String,
    pub actual: String,
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_expected: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_actual: Option<HashMap<String, String>>,
}

impl ClientDiff {
    fn simple(key: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>, description: &str) -> Self {
        ClientDiff {
            key: key.into(),
            expected: expected.into(),
            actual: actual.into(),
            description: Some(description.to_string()),
            ref_expected: None,
            ref_actual: None,
        }
    }
}

fn canonical_name(reg: &Register, gdb_reg_map: &HashMap<String, String>) -> String {
    reg.canonical_name(gdb_reg_map)
}

fn is_ignored(name: &str, cfg: &DiffConfig) -> bool {
    if cfg.ignore_registers.contains(name) {
        return true;
    }
    if cfg.ignore_unset_registers && !cfg.gdb_reg_map.values().any(|v| v == name) {
        return true;
    }
    false
}

/// Compare two CPU arrays (as found in one step's snapshot for two clients),
/// honoring `init_mask`.
pub fn diff_cpus(
    init_mask_a: u32,
    cpus_a: &[Cpu; MAX_CPU_COUNT],
    init_mask_b: u32,
    cpus_b: &[Cpu; MAX_CPU_COUNT],
    cfg: &DiffConfig,
) -> Result<Vec<ClientDiff>, BrokerError> {
    if init_mask_a != init_mask_b {
        return Ok(vec![ClientDiff::simple(
            "cpu.init_mask",
            format!("{init_mask_a:#010b}"),
            format!("{init_mask_b:#010b}"),
            "CPU init masks differ",
        )]);
    }

    let mut diffs = Vec::new();
    for i in 0..MAX_CPU_COUNT {
        if init_mask_a & (1 << i) == 0 {
            continue;
        }
        diffs.extend(diff_cpu(i, &cpus_a[i], &cpus_b[i], cfg)?);
    }
    Ok(diffs)
}

/// Compare one CPU's register file between two clients.
pub fn diff_cpu(
    idx: usize,
    a: &Cpu,
    b: &Cpu,
    cfg: &DiffConfig,
) -> Result<Vec<ClientDiff>, BrokerError> {
    if !cfg.ignore_unset_registers && a.registers_size != b.registers_size {
        return Ok(vec![ClientDiff::simple(
            format!("cpu[{idx}].registers.size"),
            a.registers_size.to_string(),
            b.registers_size.to_string(),
            "different number of CPU registers",
        )]);
    }

    let (pivot, other, pivot_is_a) = if a.registers_size <= b.registers_size {
        (a, b, true)
    } else {
        (b, a, false)
    };

    let mut diffs = Vec::new();
    let pivot_count = pivot.registers_size.min(pivot.registers.len());
    for j in 0..pivot_count {
        let pivot_reg = &pivot.registers[j];
        let pivot_name = canonical_name(pivot_reg, cfg.gdb_reg_map);
        if is_ignored(&pivot_name, cfg) {
            continue;
        }

        let other_count = other.registers_size.min(other.registers.len());
        let other_reg = other.registers[..other_count]
            .iter()
            .find(|r| canonical_name(r, cfg.gdb_reg_map) == pivot_name);

        let Some(other_reg) = other_reg else {
            return Err(BrokerError::InvariantViolation(format!(
                "cpu[{idx}].registers[{j}]: register {pivot_name:?} present on one side but not found on the other by canonical name"
            )));
        };

        let (reg_a, reg_b) = if pivot_is_a {
            (pivot_reg, other_reg)
        } else {
            (other_reg, pivot_reg)
        };

        diffs.extend(diff_register(idx, j, reg_a, reg_b, cfg));
    }
    Ok(diffs)
}

/// Compare a single register pair. Size, name, and data are independent
/// checks — a register differing in more than one field produces a diff
/// per field, not just the first one found.
pub fn diff_register(cpu_idx: usize, reg_idx: usize, a: &Register, b: &Register, cfg: &DiffConfig) -> Vec<ClientDiff> {
    let name_a = canonical_name(a, cfg.gdb_reg_map);
    let name_b = canonical_name(b, cfg.gdb_reg_map);
    let key_prefix = format!("cpu[{cpu_idx}].registers[{reg_idx}]");

    let mut diffs = Vec::new();

    if a.size != b.size {
        diffs.push(ClientDiff::simple(
            format!("{key_prefix}.size"),
            a.size.to_string(),
            b.size.to_string(),
            "register size differs",
        ));
    }
    if name_a != name_b {
        diffs.push(ClientDiff::simple(
            format!("{key_prefix}.name"),
            name_a.clone(),
            name_b.clone(),
            "register name differs",
        ));
    }

    let hex_a = a.data_hex();
    let hex_b = b.data_hex();
    if hex_a != hex_b {
        let mut ref_expected = HashMap::new();
        ref_expected.insert("size".to_string(), a.size.to_string());
        ref_expected.insert("data".to_string(), hex_a.clone());
        ref_expected.insert("name".to_string(), a.name.as_str().into_owned());
        ref_expected.insert("name-mapped".to_string(), name_a);

        let mut ref_actual = HashMap::new();
        ref_actual.insert("size".to_string(), b.size.to_string());
        ref_actual.insert("data".to_string(), hex_b.clone());
        ref_actual.insert("name".to_string(), b.name.as_str().into_owned());
        ref_actual.insert("name-mapped".to_string(), name_b);

        diffs.push(ClientDiff {
            key: format!("{key_prefix}.data"),
            expected: hex_a,
            actual: hex_b,
            description: Some("reg data differ".to_string()),
            ref_expected: Some(ref_expected),
            ref_actual: Some(ref_actual),
        });
    }

    diffs
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    fn reg(name: &str, size: i32, data: &[u8]) -> Register {
        let mut r = Register::zeroed();
        r.size = size;
        r.data[..data.len()].copy_from_slice(data);
        r.name.value[..name.len()].copy_from_slice(name.as_bytes());
        r.name.len = name.len();
        r
    }

    fn cpu_with(regs: Vec<Register>) -> Cpu {
        let mut cpu = Cpu::zeroed();
        cpu.registers_size = regs.len();
        for (i, r) in regs.into_iter().enumerate() {
            cpu.registers[i] = r;
        }
        cpu
    }

    fn empty_cfg() -> (HashSet<String>, HashMap<String, String>) {
        (HashSet::new(), HashMap::new())
    }

    #[test]
    fn identical_registers_produce_no_diff() {
        let (ignore, map) = empty_cfg();
        let cfg = DiffConfig {
            ignore_unset_registers: false,
            ignore_registers: &ignore,
            gdb_reg_map: &map,
        };
        let a = cpu_with(vec![reg("x1", 4, &[1, 0, 0, 0]), reg("x2", 4, &[2, 0, 0, 0])]);
        let b = a.clone();
        let diffs = diff_cpu(0, &a, &b, &cfg).expect("no invariant failure");
        assert!(diffs.is_empty());
    }

    #[test]
    fn differing_register_data_reports_hex_diff() {
        let (ignore, map) = empty_cfg();
        let cfg = DiffConfig {
            ignore_unset_registers: false,
            ignore_registers: &ignore,
            gdb_reg_map: &map,
        };
        let a = cpu_with(vec![reg("x1", 4, &[1, 0, 0, 0])]);
        let b = cpu_with(vec![reg("x1", 4, &[2, 0, 0, 0])]);
        let diffs = diff_cpu(0, &a, &b, &cfg).expect("no invariant failure");
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].key, "cpu[0].registers[0].data");
        assert_eq!(diffs[0].expected, "00 00 00 01");
        assert_eq!(diffs[0].actual, "00 00 00 02");
    }

    #[test]
    fn ignore_registers_suppresses_named_diff() {
        let mut ignore = HashSet::new();
        ignore.insert("pc_debug".to_string());
        let map = HashMap::new();
        let cfg = DiffConfig {
            ignore_unset_registers: false,
            ignore_registers: &ignore,
            gdb_reg_map: &map,
        };
        let a = cpu_with(vec![reg("pc_debug", 4, &[1, 0, 0, 0])]);
        let b = cpu_with(vec![reg("pc_debug", 4, &[2, 0, 0, 0])]);
        let diffs = diff_cpu(0, &a, &b, &cfg).expect("no invariant failure");
        assert!(diffs.is_empty());
    }

    #[test]
    fn register_differing_in_size_and_data_reports_both() {
        let (ignore, map) = empty_cfg();
        let cfg = DiffConfig {
            ignore_unset_registers: false,
            ignore_registers: &ignore,
            gdb_reg_map: &map,
        };
        let a = reg("x1", 4, &[1, 0, 0, 0]);
        let b = reg("x1", 8, &[2, 0, 0, 0]);
        let diffs = diff_register(0, 0, &a, &b, &cfg);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].key, "cpu[0].registers[0].size");
        assert_eq!(diffs[1].key, "cpu[0].registers[0].data");
    }

    #[test]
    fn init_mask_mismatch_short_circuits() {
        let (ignore, map) = empty_cfg();
        let cfg = DiffConfig {
            ignore_unset_registers: false,
            ignore_registers: &ignore,
            gdb_reg_map: &map,
        };
        let cpus = [Cpu::zeroed(); MAX_CPU_COUNT];
        let diffs = diff_cpus(0b1, &cpus, 0b11, &cpus, &cfg).expect("no invariant failure");
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].key, "cpu.init_mask");
    }
}
