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
use sandbox::{strip_code_fences, Bindings, CodeRunner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::json::{parse_lenient, truncate_chars};
use crate::model::ProblemContext;
use crate::prompts::{code_prompt, code_schema, verify_prompt, verify_schema};

const CODE_SYSTEM: &str = "You convert worked solutions into calculation scripts. Follow the subject rules exactly.";
const VERIFY_SYSTEM: &str = "You check calculation output against a worked solution.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub verdict: Verdict,
    pub reason: String,
    pub code: String,
    pub logs: Vec<String>,
    pub final_answer: Option<String>,
    pub attempts: u32,
    #[serde(skip)]
    pub usage: Usage,
}

#[derive(Deserialize)]
struct CodeReply {
    code: String,
}

#[derive(Deserialize)]
struct VerdictReply {
    verdict: String,
    #[serde(default)]
    reason: String,
}

/// Turns a worked solution into a script that runs in the sandbox, then asks
/// a model whether the output agrees with the solution.
pub struct CodeBuilder {
    service: Arc<dyn CompletionService>,
    runner: CodeRunner,
    code_model: ModelSelector,
    verify_model: ModelSelector,
    max_attempts: u32,
}

impl CodeBuilder {
    pub fn new(
        service: Arc<dyn CompletionService>,
        runner: CodeRunner,
        code_model: ModelSelector,
        verify_model: ModelSelector,
        max_attempts: u32,
    ) -> Self {
        Self {
            service,
            runner,
            code_model,
            verify_model,
            max_attempts: max_attempts.max(1),
        }
    }

    fn code_from_reply(content: &str) -> String {
        match parse_lenient::<CodeReply>(content) {
            Ok(reply) => strip_code_fences(&reply.code),
            Err(e) => {
                debug!(error = %e, "code reply was not JSON, using raw text");
                strip_code_fences(content)
            }
        }
    }

    pub async fn build_and_verify(&self, problem: &ProblemContext) -> PipelineResult<BuildReport> {
        problem.require_question().map_err(PipelineError::InvalidInput)?;

        let mut usage = Usage::default();
        let mut last_code = String::new();
        let mut last_error = String::new();
        let mut last_logs = Vec::new();

        for attempt in 1..=self.max_attempts {
            let previous = (attempt > 1).then_some((last_code.as_str(), last_error.as_str()));
            let request = CompletionRequest::new(
                self.code_model.clone(),
                vec![
                    Message::system(CODE_SYSTEM),
                    Message::user(code_prompt(problem, previous)),
                ],
            )
            .with_schema(code_schema())
            .with_temperature(0.0);

            let response = self.service.complete(request).await?;
            usage.add(&response.usage);

            let code = Self::code_from_reply(&response.content);
            if code.trim().is_empty() {
                warn!(attempt, "model returned no code");
                last_error = "Model returned empty code".to_string();
                last_code = code;
                continue;
            }

            let outcome = self.runner.run(&code, &Bindings::new(), 0);
            if outcome.success {
                info!(attempt, lines = outcome.output.len(), "generated code executed");
                let (verdict, reason) = self.verify(problem, &code, &outcome.output, &mut usage).await?;
                return Ok(BuildReport {
                    verdict,
                    reason,
                    final_answer: outcome.final_answer().map(|a| a.text),
                    code,
                    logs: outcome.output,
                    attempts: attempt,
                    usage,
                });
            }

            last_error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
            warn!(attempt, error = %last_error, "generated code failed");
            last_code = code;
            last_logs = outcome.output;
        }

        Ok(BuildReport {
            verdict: Verdict::Fail,
            reason: format!(
                "Code execution failed after {} attempts: {last_error}",
                self.max_attempts
            ),
            code: last_code,
            logs: last_logs,
            final_answer: None,
            attempts: self.max_attempts,
            usage,
        })
    }

    async fn verify(
        &self,
        problem: &ProblemContext,
        code: &str,
        output: &[String],
        usage: &mut Usage,
    ) -> PipelineResult<(Verdict, String)> {
        let request = CompletionRequest::new(
            self.verify_model.clone(),
            vec![
                Message::system(VERIFY_SYSTEM),
                Message::user(verify_prompt(problem, code, output)),
            ],
        )
        .with_schema(verify_schema())
        .with_temperature(0.0);

        let response = self.service.complete(request).await?;
        usage.add(&response.usage);
        Ok(parse_verdict(&response.content))
    }
}

fn parse_verdict(content: &str) -> (Verdict, String) {
    if let Ok(reply) = parse_lenient::<VerdictReply>(content) {
        let verdict = if reply.verdict.trim().eq_ignore_ascii_case("pass") {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        return (verdict, reply.reason);
    }

    let verdict = if content.to_lowercase().contains("pass") {
        Verdict::Pass
    } else {
        Verdict::Fail
    };
    (verdict, truncate_chars(content.trim(), 300).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_verdict() {
        let (verdict, reason) = parse_verdict(r#"{"verdict": "pass", "reason": "matches"}"#);
        assert_eq!(verdict, Verdict::Pass);
        assert_eq!(reason, "matches");

        let (verdict, _) = parse_verdict(r#"{"verdict": "FAIL", "reason": "off by 10"}"#);
        assert_eq!(verdict, Verdict::Fail);
    }

    #[test]
    fn test_unstructured_verdict_falls_back_to_keyword() {
        assert_eq!(parse_verdict("Looks right, PASS.").0, Verdict::Pass);
        assert_eq!(parse_verdict("The numbers disagree.").0, Verdict::Fail);
    }

    #[test]
    fn test_code_from_plain_reply() {
        assert_eq!(
            CodeBuilder::code_from_reply("```\nprint(\"Final answer:\", 14)\n```"),
            "print(\"Final answer:\", 14)"
        );
        assert_eq!(
            CodeBuilder::code_from_reply(r#"{"code": "x = 2 + 3 * 4"}"#),
            "x = 2 + 3 * 4"
        );
    }
}
