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

//! Final report and JSON serialization to `<out.dir>/result.json`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::diff::ClientDiff;
use crate::trace::{Trace, TraceEntry};

/// The pass/fail verdict plus the diffs that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub passed: bool,
    pub diffs: Vec<ClientDiff>,
}

impl Report {
    pub fn passing() -> Self {
        Report {
            passed: true,
            diffs: Vec::new(),
        }
    }

    pub fn failing(diffs: Vec<ClientDiff>) -> Self {
        Report {
            passed: diffs.is_empty(),
            diffs,
        }
    }
}

#[derive(Serialize)]
struct Traces<'a> {
    names: Vec<String>,
    traces: &'a [TraceEntry],
}

#[derive(Serialize)]
struct ResultDocument<'a> {
    report: &'a Report,
    traces: Traces<'a>,
}

/// Writes the final `result.json` document.
pub struct Reporter;

impl Reporter {
    /// Serialize `report` and `trace` to `<out_dir>/result.json`, creating
    /// parent directories as needed.
    pub fn write(out_dir: &Path, report: &Report, trace: &Trace, names: Vec<String>) -> Result<()> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("creating output directory {}", out_dir.display()))?;
        let path = out_dir.join("result.json");

        let doc = ResultDocument {
            report,
            traces: Traces {
                names,
                traces: trace.entries(),
            },
        };
        let json = serde_json::to_string_pretty(&doc).context("serializing result.json")?;

        let tmp_path = out_dir.join("result.json.tmp");
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("renaming into place: {}", path.display()))?;

        info!(path = %path.display(), passed = report.passed, "result written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passing_report_has_no_diffs() {
        let report = Report::passing();
        assert!(report.passed);
        assert!(report.diffs.is_empty());
    }

    #[test]
    fn write_creates_result_json_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = Report::passing();
        let trace = Trace::new(-1);
        Reporter::write(dir.path(), &report, &trace, vec!["a".to_string(), "b".to_string()])
            .expect("write should succeed");

        let contents = std::fs::read_to_string(dir.path().join("result.json")).expect("read result.json");
        assert!(contents.contains("\"passed\": true"));
        assert!(!dir.path().join("result.json.tmp").exists());
    }
}
