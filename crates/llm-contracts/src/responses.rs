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

use serde::{Deserialize, Serialize};

use crate::types::Backend;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub backend: Backend,
    pub model: String,
    pub usage: Usage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn from_openai(value: &serde_json::Value) -> Self {
        let read = |key: &str| {
            value
                .get(key)
                .and_then(serde_json::Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0)
        };
        Self {
            prompt_tokens: read("prompt_tokens"),
            completion_tokens: read("completion_tokens"),
            total_tokens: read("total_tokens"),
        }
    }

    pub fn add(&mut self, other: &Self) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_from_openai_block() {
        let usage = Usage::from_openai(&json!({
            "prompt_tokens": 120,
            "completion_tokens": 30,
            "total_tokens": 150
        }));
        assert_eq!(usage.total_tokens, 150);
        assert_eq!(usage.prompt_tokens, 120);
    }

    #[test]
    fn test_usage_missing_fields_default_to_zero() {
        let usage = Usage::from_openai(&json!({"prompt_tokens": 5}));
        assert_eq!(usage, Usage { prompt_tokens: 5, completion_tokens: 0, total_tokens: 0 });
    }
}
