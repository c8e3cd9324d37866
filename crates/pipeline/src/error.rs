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

use llm_contracts::LLMError;
use thiserror::Error;

use crate::model::{AttemptRecord, Parameterization, Run};

#[derive(Debug, Clone)]
pub struct ExhaustedLoop {
    pub attempts: u32,
    pub last_error: String,
    pub history: Vec<AttemptRecord>,
    pub runs: Vec<Run>,
    pub parameterization: Parameterization,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Completion(#[from] LLMError),

    #[error("{0}")]
    Parse(String),

    #[error(
        "Validation loop gave up after {} attempts with {} accepted runs: {}",
        .0.attempts,
        .0.runs.len(),
        .0.last_error
    )]
    Exhausted(Box<ExhaustedLoop>),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
