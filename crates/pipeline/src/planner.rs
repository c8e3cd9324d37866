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

use llm_contracts::{CompletionRequest, Message, ModelSelector, ReasoningEffort, Usage};
use providers::CompletionService;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::json::parse_lenient;
use crate::model::{AttemptRecord, Parameterization, ProblemContext};
use crate::prompts::{plan_prompt, plan_schema};

const PLAN_SYSTEM: &str = "You repair random input ranges so that generated values pass an acceptance check.";
const PLAN_MAX_TOKENS: u32 = 8000;

pub struct PlanRequest<'a> {
    pub problem: &'a ProblemContext,
    pub code: &'a str,
    pub current: &'a Parameterization,
    pub previous_attempts: &'a [AttemptRecord],
    pub last_error: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub name: String,
    pub inputs: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct PlanReply {
    #[serde(default)]
    plan: Vec<String>,
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanProposal {
    pub plan: Vec<String>,
    pub alternatives: Vec<Alternative>,
    /// Inputs of the selected alternative.
    pub inputs: BTreeMap<String, String>,
    pub raw: String,
    #[serde(skip)]
    pub usage: Usage,
}

pub struct Planner {
    service: Arc<dyn CompletionService>,
    model: ModelSelector,
}

impl Planner {
    pub fn new(service: Arc<dyn CompletionService>, model: ModelSelector) -> Self {
        Self { service, model }
    }

    /// Asks for revised input expressions. There is no safe default here, so
    /// unparsable replies are errors.
    pub async fn propose(&self, request: PlanRequest<'_>) -> PipelineResult<PlanProposal> {
        if request.current.eval.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "current.inputs and current.eval required".to_string(),
            ));
        }

        let completion = CompletionRequest::new(
            self.model.clone(),
            vec![
                Message::system(PLAN_SYSTEM),
                Message::user(plan_prompt(
                    request.problem,
                    request.code,
                    request.current,
                    request.previous_attempts,
                    request.last_error,
                )),
            ],
        )
        .with_schema(plan_schema())
        .with_reasoning_effort(ReasoningEffort::Medium)
        .with_max_tokens(PLAN_MAX_TOKENS);

        let response = self.service.complete(completion).await?;
        if response.content.trim().is_empty() {
            return Err(PipelineError::Parse(
                "Planning model returned empty response".to_string(),
            ));
        }

        let reply: PlanReply = parse_lenient(&response.content).map_err(|e| {
            PipelineError::Parse(format!("Failed to parse planning response: {e}"))
        })?;

        let inputs = reply
            .alternatives
            .first()
            .map(|alternative| alternative.inputs.clone())
            .ok_or_else(|| {
                PipelineError::Parse("Planning response contained no alternatives".to_string())
            })?;

        info!(
            steps = reply.plan.len(),
            alternatives = reply.alternatives.len(),
            "planner proposed revised inputs"
        );

        Ok(PlanProposal {
            plan: reply.plan,
            alternatives: reply.alternatives,
            inputs,
            raw: response.content,
            usage: response.usage,
        })
    }
}
