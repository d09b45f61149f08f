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

//! Error taxonomy for the broker.
//!
//! Client termination and detected divergence are deliberately *not*
//! represented here: both are ordinary [`crate::report::Report`] values, per
//! the propagation policy that only setup failures and irrecoverable resync
//! travel as errors.

use std::fmt;

/// Errors the broker can return from [`crate::run::run`].
#[derive(Debug)]
pub enum BrokerError {
    /// Configuration, IPC, or process-spawn failure: fatal, nothing ran.
    Setup(anyhow::Error),
    /// In the `tb` layer, a client's `end_pc` overshot the resync target with
    /// no jumped client to blame it on.
    IrrecoverableDivergence {
        client_id: u32,
        target_pc: u64,
        actual_pc: u64,
    },
    /// An assumed-present invariant did not hold (e.g. a register name the
    /// pivot side expected was absent from the other side).
    InvariantViolation(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Setup(e) => write!(f, "setup failed: {e}"),
            BrokerError::IrrecoverableDivergence {
                client_id,
                target_pc,
                actual_pc,
            } => write!(
                f,
                "client {client_id} diverged irrecoverably during TB resync: expected pc {target_pc:#x}, got {actual_pc:#x}"
            ),
            BrokerError::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrokerError::Setup(e) => e.source(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for BrokerError {
    fn from(e: anyhow::Error) -> Self {
        BrokerError::Setup(e)
    }
}
