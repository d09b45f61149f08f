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

//! Binary layout shared with each cosimulation client over POSIX shared memory.
//!
//! Every type in this module is `#[repr(C)]` and `Pod`: its byte layout is a
//! contract with the client-side plugin, not an implementation detail we are
//! free to change. Do not reorder fields, change integer widths, or swap a
//! fixed-size array for a `Vec` here.

use bytemuck::{Pod, Zeroable};

/// Maximum number of CPUs tracked in a single snapshot.
pub const MAX_CPU_COUNT: usize = 8;
/// Maximum number of registers per CPU.
pub const MAX_CPU_REGISTERS: usize = 256;
/// Maximum number of meaningful bytes in a register's `data` field.
pub const MAX_REGISTER_DATA_SIZE: usize = 64;
/// Maximum number of instructions recorded for a single translation block.
pub const MAX_TB_INSNS: usize = 32;
/// Maximum number of meaningful bytes in an instruction's raw encoding.
pub const MAX_INSN_DATA_SIZE: usize = 256;
/// Maximum number of meaningful bytes in a [`ShortString`].
pub const MAX_SHORT_STRING: usize = 256;

/// A fixed-capacity string: only `value[..len]` is meaningful.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ShortString {
    pub len: usize,
    pub value: [u8; MAX_SHORT_STRING],
}

impl ShortString {
    /// Decode the meaningful prefix as UTF-8, replacing invalid sequences.
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        let len = self.len.min(MAX_SHORT_STRING);
        String::from_utf8_lossy(&self.value[..len])
    }
}

impl std::fmt::Debug for ShortString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShortString")
            .field("len", &self.len)
            .field("value", &self.as_str())
            .finish()
    }
}

/// A fixed-capacity buffer holding the raw encoding of one instruction.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct InsnData {
    pub size: usize,
    pub buffer: [u8; MAX_INSN_DATA_SIZE],
}

impl InsnData {
    /// The meaningful prefix of `buffer`, reversed (little-endian to
    /// big-endian display convention), formatted as space-separated hex.
    pub fn to_hex(&self) -> String {
        reversed_hex(&self.buffer, self.size)
    }
}

/// Static information about a single decoded instruction.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct InsnInfo {
    pub pc: u64,
    pub size: usize,
    pub symbol: ShortString,
    pub hwaddr: ShortString,
    pub disas: ShortString,
    pub data: InsnData,
}

/// One architectural register as written by a client.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Register {
    /// Meaningful byte count in `data`, capped at [`MAX_REGISTER_DATA_SIZE`].
    pub size: i32,
    pub data: [u8; MAX_REGISTER_DATA_SIZE],
    pub name: ShortString,
}

impl Register {
    /// Canonical name after applying `gdb_reg_map`, falling back to the raw name.
    pub fn canonical_name(&self, gdb_reg_map: &std::collections::HashMap<String, String>) -> String {
        let raw = self.name.as_str();
        gdb_reg_map
            .get(raw.as_ref())
            .cloned()
            .unwrap_or_else(|| raw.into_owned())
    }

    /// The `data` hex string: first `size` bytes, reversed, space-separated hex.
    pub fn data_hex(&self) -> String {
        let size = self.size.max(0) as usize;
        reversed_hex(&self.data, size)
    }
}

fn reversed_hex(bytes: &[u8], size: usize) -> String {
    let size = size.min(bytes.len());
    bytes[..size]
        .iter()
        .rev()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// One CPU's register file. Only `registers[..registers_size]` is meaningful.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Cpu {
    pub idx: u32,
    pub registers_size: usize,
    pub registers: [Register; MAX_CPU_REGISTERS],
}

/// Snapshot variant for the `insn` layer: state after executing one instruction.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct SnapshotExec {
    pub init_mask: u32,
    pub cpus: [Cpu; MAX_CPU_COUNT],
    pub current_insn: InsnInfo,
}

/// Snapshot variant for the `tb`/`tb-strict` layers: state after executing one
/// (or, during resync, several) translation blocks.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct SnapshotTb {
    pub pc: u64,
    pub insn_count: usize,
    pub insns_info_size: usize,
    pub insns_info: [InsnInfo; MAX_TB_INSNS],
    pub init_mask: u32,
    pub cpus: [Cpu; MAX_CPU_COUNT],
}

/// The shared-memory record: a C-style union of the two snapshot variants.
///
/// Which field is valid depends on the configured [`crate::config::Layer`] for
/// this run; the broker and the client plugin must agree on it out of band
/// (it is passed to the client as the `mode=` plugin argument). Reading the
/// wrong variant is not memory-unsafe (both are `Pod`), just semantically
/// meaningless.
#[repr(C)]
#[derive(Clone, Copy)]
pub union BrokerShm {
    pub exec: SnapshotExec,
    pub tb: SnapshotTb,
}

impl BrokerShm {
    /// Read the `insn`-layer view of the union.
    ///
    /// # Safety
    /// The caller must know the run is using the `insn` layer, i.e. the
    /// client last wrote the `exec` variant.
    pub unsafe fn exec(&self) -> &SnapshotExec {
        unsafe { &self.exec }
    }

    /// Read the `tb`/`tb-strict`-layer view of the union.
    ///
    /// # Safety
    /// The caller must know the run is using a TB-based layer, i.e. the
    /// client last wrote the `tb` variant.
    pub unsafe fn tb(&self) -> &SnapshotTb {
        unsafe { &self.tb }
    }
}

/// Byte size of the shared-memory segment each client maps.
pub const BROKER_SHM_SIZE: usize = std::mem::size_of::<BrokerShm>();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_string_roundtrip() {
        let mut s = ShortString::zeroed();
        let text = b"a0";
        s.value[..text.len()].copy_from_slice(text);
        s.len = text.len();
        assert_eq!(s.as_str(), "a0");
    }

    #[test]
    fn register_data_hex_reverses_bytes() {
        let mut reg = Register::zeroed();
        reg.size = 4;
        reg.data[..4].copy_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(reg.data_hex(), "00 00 00 01");
    }

    #[test]
    fn register_canonical_name_uses_gdb_map() {
        let mut reg = Register::zeroed();
        let raw = b"x1";
        reg.name.value[..raw.len()].copy_from_slice(raw);
        reg.name.len = raw.len();

        let mut map = std::collections::HashMap::new();
        map.insert("x1".to_string(), "ra".to_string());
        assert_eq!(reg.canonical_name(&map), "ra");
        assert_eq!(reg.canonical_name(&std::collections::HashMap::new()), "x1");
    }

    #[test]
    fn broker_shm_size_is_max_of_variants() {
        assert_eq!(
            BROKER_SHM_SIZE,
            std::mem::size_of::<SnapshotExec>().max(std::mem::size_of::<SnapshotTb>())
        );
    }
}
