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

//! TOML configuration tree and post-deserialization validation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub qemu: QemuConfig,
    pub testing: TestingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dev: DevConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QemuConfig {
    pub plugin: PathBuf,
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub gdb_reg_map: HashMap<String, String>,
    #[serde(default)]
    pub ignore_registers: HashSet<String>,
    #[serde(default)]
    pub ignore_unset_registers: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub exec: PathBuf,
    #[serde(default)]
    pub additional_args: Vec<String>,
    pub pass_test_exec_to: String,
    pub name: Option<String>,
    #[serde(default)]
    pub skip_n_instructions: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestingConfig {
    pub test_exec: PathBuf,
    #[serde(default = "default_max_trace_length")]
    pub max_trace_length: i64,
    pub protocol: ProtocolConfig,
}

fn default_max_trace_length() -> i64 {
    -1
}

/// Synchronization layer: which slice of the SHM union the clients write and
/// how the coordinator drives each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layer {
    Insn,
    Tb,
    TbStrict,
}

impl Layer {
    /// The `mode=` value passed to the client plugin: `tb` for both
    /// TB-based layers, the layer name itself for `insn`.
    pub fn plugin_mode(&self) -> &'static str {
        match self {
            Layer::Insn => "insn",
            Layer::Tb | Layer::TbStrict => "tb",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    pub layer: Layer,
    #[serde(default)]
    pub execute_all_remaining_instructions: bool,
    #[serde(default)]
    pub stop_after_n_instructions: i64,
    pub out: OutConfig,
}

fn default_mode() -> String {
    "lockstep".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutConfig {
    pub dir: PathBuf,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub enable: bool,
    pub clear_on_rerun: bool,
    pub file: String,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            enable: false,
            clear_on_rerun: false,
            file: "cosim-broker.log".to_string(),
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevConfig {
    #[serde(default)]
    pub dry_run: bool,
}

impl Config {
    /// Load and validate a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Override `testing.test_exec`, as the CLI's `--test-exec` flag does.
    pub fn override_test_exec(&mut self, path: PathBuf) {
        self.testing.test_exec = path;
    }

    fn validate(&mut self) -> Result<()> {
        if self.qemu.clients.is_empty() {
            bail!("qemu.clients must not be empty");
        }
        if self.testing.protocol.out.format != "json" {
            bail!(
                "testing.protocol.out.format: unsupported format {:?} (only \"json\" is supported)",
                self.testing.protocol.out.format
            );
        }
        if self.testing.protocol.mode != "lockstep" {
            bail!(
                "testing.protocol.mode: unsupported mode {:?} (only \"lockstep\" is supported)",
                self.testing.protocol.mode
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().expect("create temp file");
        f.write_all(contents.as_bytes()).expect("write temp file");
        f
    }

    const MINIMAL: &str = r#"
        [qemu]
        plugin = "/plugins/cosim.so"
        [[qemu.clients]]
        exec = "/bin/qemu-a"
        pass_test_exec_to = "kernel"

        [testing]
        test_exec = "/bin/test.elf"
        [testing.protocol]
        layer = "insn"
        [testing.protocol.out]
        dir = "/tmp/out"
        format = "json"
    "#;

    #[test]
    fn loads_minimal_valid_config() {
        let f = write_temp(MINIMAL);
        let config = Config::load(f.path()).expect("minimal config should load");
        assert_eq!(config.qemu.clients.len(), 1);
        assert_eq!(config.testing.max_trace_length, -1);
        assert!(!config.dev.dry_run);
    }

    #[test]
    fn rejects_unsupported_output_format() {
        let contents = MINIMAL.replace(r#"format = "json""#, r#"format = "yaml""#);
        let f = write_temp(&contents);
        let err = Config::load(f.path()).expect_err("yaml format should be rejected");
        assert!(err.to_string().contains("format"));
    }

    #[test]
    fn rejects_empty_client_list() {
        let contents = MINIMAL.replacen(
            "[[qemu.clients]]\nexec = \"/bin/qemu-a\"\npass_test_exec_to = \"kernel\"\n",
            "",
            1,
        );
        let f = write_temp(&contents);
        let err = Config::load(f.path()).expect_err("empty client list should be rejected");
        assert!(err.to_string().contains("clients"));
    }

    #[test]
    fn override_test_exec_replaces_value() {
        let f = write_temp(MINIMAL);
        let mut config = Config::load(f.path()).expect("minimal config should load");
        config.override_test_exec(PathBuf::from("/bin/other.elf"));
        assert_eq!(config.testing.test_exec, PathBuf::from("/bin/other.elf"));
    }
}
