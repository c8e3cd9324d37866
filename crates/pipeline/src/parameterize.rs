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

use llm_contracts::{CompletionRequest, Message, ModelSelector, Usage};
use providers::CompletionService;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ParseFailurePolicy;
use crate::error::{PipelineError, PipelineResult};
use crate::json::parse_lenient;
use crate::model::{Parameterization, ProblemContext};
use crate::prompts::{parameterization_prompt, parameterization_schema};

const PARAMETERIZE_SYSTEM: &str =
    "You design randomised inputs and acceptance checks for numerical exam questions. Reply with JSON only.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterizeOutcome {
    pub parameterization: Parameterization,
    /// Set when the reply could not be parsed and the accept-all fallback
    /// was substituted.
    pub degraded: bool,
    pub raw_response: String,
    #[serde(skip)]
    pub usage: Usage,
}

pub struct ParameterizationGenerator {
    service: Arc<dyn CompletionService>,
    model: ModelSelector,
    policy: ParseFailurePolicy,
}

impl ParameterizationGenerator {
    pub fn new(
        service: Arc<dyn CompletionService>,
        model: ModelSelector,
        policy: ParseFailurePolicy,
    ) -> Self {
        Self {
            service,
            model,
            policy,
        }
    }

    pub async fn generate(
        &self,
        problem: &ProblemContext,
        code: &str,
    ) -> PipelineResult<ParameterizeOutcome> {
        if code.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "Generated code is required - please run Build & Verify first".to_string(),
            ));
        }

        let request = CompletionRequest::new(
            self.model.clone(),
            vec![
                Message::system(PARAMETERIZE_SYSTEM),
                Message::user(parameterization_prompt(problem, code)),
            ],
        )
        .with_schema(parameterization_schema())
        .with_temperature(0.0);

        let response = self.service.complete(request).await?;

        let (parameterization, degraded) = match parse_lenient::<Parameterization>(&response.content)
        {
            Ok(mut parsed) => {
                if parsed.calculation.trim().is_empty() {
                    parsed.calculation = code.to_string();
                }
                if parsed.reasons.trim().is_empty() {
                    parsed.reasons = "No reasons provided.".to_string();
                }
                info!(inputs = parsed.inputs.len(), "parameterization generated");
                (parsed, false)
            }
            Err(e) => match self.policy {
                ParseFailurePolicy::FailOpen => {
                    warn!(
                        error = %e,
                        "parameterization reply unparsable, substituting accept-all predicate"
                    );
                    (Parameterization::accept_all(code), true)
                }
                ParseFailurePolicy::FailClosed => {
                    return Err(PipelineError::Parse(format!(
                        "Failed to parse parameterization response: {e}"
                    )));
                }
            },
        };

        Ok(ParameterizeOutcome {
            parameterization,
            degraded,
            raw_response: response.content,
            usage: response.usage,
        })
    }
}
