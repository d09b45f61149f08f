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

//! Lockstep cosimulation broker.
//!
//! Drives two or more CPU emulator clients through the same program in
//! lockstep over shared memory, diffs their architectural state after every
//! step, and produces a pass/fail report plus a bounded execution trace.
//!
//! The entry point is [`run::run`], which takes a validated [`config::Config`]
//! and returns a [`report::Report`] or a [`error::BrokerError`].

pub mod client;
pub mod config;
pub mod coordinator;
pub mod diff;
pub mod endpoint;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod report;
pub mod run;
pub mod shm;
pub mod supervisor;
pub mod trace;

pub use config::Config;
pub use error::BrokerError;
pub use report::Report;
pub use run::run;
