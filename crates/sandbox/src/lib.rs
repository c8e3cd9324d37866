// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Capability-limited interpreter for generated calculation scripts.
//!
//! Scripts are `evalexpr` chains: statements separated by `;`, float-only
//! arithmetic, and only the helper functions listed in [`HELPER_NAMES`].
//! There are no loops, so every script terminates.

pub mod answer;
pub mod builtins;
pub mod error;
pub mod runner;
pub mod source;

pub use answer::{final_answer, FinalAnswer};
pub use builtins::{format_number, round_to_sf, to_fixed, HELPER_NAMES};
pub use error::{SandboxError, SandboxResult};
pub use runner::{Bindings, CodeRunner, RunOutcome, RunnerLimits};
pub use source::{normalize, strip_code_fences};
