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

use sandbox::{Bindings, FinalAnswer, RunOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The worked problem every stage is prompted with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProblemContext {
    pub question: String,
    pub worked_solution: String,
    pub subject_rules: String,
    pub question_rules: String,
}

impl ProblemContext {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    pub fn require_question(&self) -> Result<(), String> {
        if self.question.trim().is_empty() {
            return Err("Question field is required and cannot be empty".to_string());
        }
        Ok(())
    }
}

pub(crate) fn or_not_provided(text: &str) -> &str {
    if text.trim().is_empty() {
        "Not provided"
    } else {
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameterization {
    pub inputs: BTreeMap<String, String>,
    pub eval: String,
    #[serde(default)]
    pub calculation: String,
    #[serde(default)]
    pub reasons: String,
}

impl Parameterization {
    pub fn accept_all(calculation: impl Into<String>) -> Self {
        Self {
            inputs: BTreeMap::new(),
            eval: "true".to_string(),
            calculation: calculation.into(),
            reasons: "No reasons provided.".to_string(),
        }
    }
}

/// One accepted instantiation of the inputs with the calculation's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub params: Bindings,
    #[serde(alias = "final", default)]
    pub final_value: Option<f64>,
    #[serde(default)]
    pub final_text: String,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl Run {
    pub fn from_outcome(params: Bindings, outcome: RunOutcome) -> Self {
        let answer: Option<FinalAnswer> = outcome.final_answer();
        let final_text = answer
            .as_ref()
            .map(|a| a.text.clone())
            .or_else(|| outcome.last_line().map(ToString::to_string))
            .unwrap_or_default();
        Self {
            params,
            final_value: answer.and_then(|a| a.value),
            final_text,
            logs: outcome.output,
        }
    }

    pub fn final_display(&self) -> String {
        if !self.final_text.is_empty() {
            return self.final_text.clone();
        }
        self.final_value
            .map(sandbox::format_number)
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub attempt: u32,
    pub inputs: BTreeMap<String, String>,
    pub runs_generated: usize,
    pub target_runs: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_accepts_legacy_final_key() {
        let run: Run =
            serde_json::from_str(r#"{"params": {"mass": 3.4}, "final": 45.3, "logs": []}"#)
                .unwrap();
        assert_eq!(run.final_value, Some(45.3));
        assert_eq!(run.final_display(), "45.3");
    }

    #[test]
    fn test_parameterization_wire_names() {
        let value = serde_json::to_value(Parameterization::accept_all("x = 1")).unwrap();
        assert_eq!(value["eval"], "true");
        assert_eq!(value["reasons"], "No reasons provided.");
        assert!(value["inputs"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_problem_requires_question() {
        assert!(ProblemContext::new("  ").require_question().is_err());
        assert!(ProblemContext::new("What is 2+3*4?").require_question().is_ok());
    }
}
