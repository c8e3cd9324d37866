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

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    #[error("{0}")]
    Evaluation(String),

    #[error("Identifier '{0}' has already been declared")]
    Redeclaration(String),

    #[error("Predicate must return a boolean, got {0}")]
    NonBoolean(String),

    #[error("Input '{name}' did not evaluate to a finite number: {detail}")]
    NonNumeric { name: String, detail: String },

    #[error("Invalid input name '{0}'")]
    InvalidName(String),

    #[error("Script is {size} bytes, limit is {limit}")]
    SourceTooLarge { size: usize, limit: usize },
}

pub type SandboxResult<T> = Result<T, SandboxError>;
