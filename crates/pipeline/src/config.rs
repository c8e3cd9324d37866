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

use llm_contracts::{Backend, ModelSelector};
use serde::{Deserialize, Serialize};

/// What the parameterisation stage does with a reply it cannot parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailurePolicy {
    /// Substitute empty inputs with an always-true predicate and flag the
    /// result as degraded.
    #[default]
    FailOpen,
    FailClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_attempts: u32,
    pub target_runs: usize,
    pub samples_per_attempt: usize,
    pub plan_after_failures: u32,
    pub parse_failure_policy: ParseFailurePolicy,
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            target_runs: 4,
            samples_per_attempt: 24,
            plan_after_failures: 1,
            parse_failure_policy: ParseFailurePolicy::FailOpen,
            seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("pipeline.max_attempts must be at least 1".to_string());
        }
        if self.target_runs == 0 {
            return Err("pipeline.target_runs must be at least 1".to_string());
        }
        if self.samples_per_attempt < self.target_runs {
            return Err(format!(
                "pipeline.samples_per_attempt ({}) must be >= pipeline.target_runs ({})",
                self.samples_per_attempt, self.target_runs
            ));
        }
        Ok(())
    }
}

/// Default model per stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub code: ModelSelector,
    pub verify: ModelSelector,
    pub parameterize: ModelSelector,
    pub plan: ModelSelector,
    pub compose: ModelSelector,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let gpt = || ModelSelector::new(Backend::OpenAI, Some("gpt-4.1".to_string()));
        Self {
            code: gpt(),
            verify: gpt(),
            parameterize: gpt(),
            plan: ModelSelector::new(Backend::OpenAI, Some("o3".to_string())),
            compose: ModelSelector::backend(Backend::Groq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.target_runs, 4);
        assert_eq!(config.parse_failure_policy, ParseFailurePolicy::FailOpen);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policy_wire_form() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"parse_failure_policy": "fail_closed", "max_attempts": 5}"#)
                .unwrap();
        assert_eq!(config.parse_failure_policy, ParseFailurePolicy::FailClosed);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.samples_per_attempt, 24);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let config = PipelineConfig {
            max_attempts: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_defaults_differ_between_stages() {
        let models = ModelsConfig::default();
        assert_eq!(models.compose.backend, Backend::Groq);
        assert_eq!(models.parameterize.to_string(), "openai:gpt-4.1");
        assert_eq!(models.plan.model.as_deref(), Some("o3"));
    }
}
