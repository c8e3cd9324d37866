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

use llm_contracts::Usage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sandbox::CodeRunner;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{ExhaustedLoop, PipelineError, PipelineResult};
use crate::model::{AttemptRecord, Parameterization, ProblemContext, Run};
use crate::planner::{PlanRequest, Planner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Generating,
    Executing,
    Evaluating,
    Accepted,
    Retry,
    Planning,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopOutcome {
    pub runs: Vec<Run>,
    pub attempts: u32,
    /// Parameterisation in force when the target was reached, including any
    /// planner revisions.
    pub parameterization: Parameterization,
    pub history: Vec<AttemptRecord>,
    pub plans: Vec<Vec<String>>,
    pub trace: Vec<LoopState>,
    #[serde(skip)]
    pub usage: Usage,
}

#[derive(Default)]
struct AttemptStats {
    samples: usize,
    rejected: usize,
    execution_error: Option<String>,
    predicate_error: Option<String>,
}

impl AttemptStats {
    fn failure_text(&self) -> String {
        self.execution_error
            .clone()
            .or_else(|| self.predicate_error.clone())
            .unwrap_or_else(|| {
                format!(
                    "parameters failed validation: {}/{} samples rejected",
                    self.rejected, self.samples
                )
            })
    }
}

/// Draws samples until enough runs pass the predicate, consulting the
/// planner between failed attempts.
pub struct ValidationLoop<'a> {
    runner: &'a CodeRunner,
    planner: Option<&'a Planner>,
    config: &'a PipelineConfig,
}

impl<'a> ValidationLoop<'a> {
    pub const fn new(runner: &'a CodeRunner, config: &'a PipelineConfig) -> Self {
        Self {
            runner,
            planner: None,
            config,
        }
    }

    pub const fn with_planner(mut self, planner: &'a Planner) -> Self {
        self.planner = Some(planner);
        self
    }

    fn sample(
        &self,
        calculation: &str,
        current: &Parameterization,
        rng: &mut StdRng,
        runs: &mut Vec<Run>,
        trace: &mut Vec<LoopState>,
    ) -> AttemptStats {
        let mut stats = AttemptStats::default();
        trace.push(LoopState::Executing);

        while stats.samples < self.config.samples_per_attempt && runs.len() < self.config.target_runs {
            stats.samples += 1;
            let seed: u64 = rng.gen();

            let params = match self.runner.instantiate_inputs(&current.inputs, seed) {
                Ok(params) => params,
                Err(e) => {
                    debug!(error = %e, "input instantiation failed");
                    stats.execution_error = Some(e.to_string());
                    stats.rejected += 1;
                    continue;
                }
            };

            let outcome = self.runner.run_calculation(calculation, &params);
            if !outcome.success {
                stats.execution_error = outcome.error.clone();
                stats.rejected += 1;
                continue;
            }

            match self.runner.evaluate_predicate(&current.eval, &params) {
                Ok(true) => runs.push(Run::from_outcome(params, outcome)),
                Ok(false) => stats.rejected += 1,
                Err(e) => {
                    stats.predicate_error = Some(format!("eval failed: {e}"));
                    stats.rejected += 1;
                }
            }
        }

        trace.push(LoopState::Evaluating);
        stats
    }

    pub async fn run(
        &self,
        problem: &ProblemContext,
        code: &str,
        parameterization: Parameterization,
    ) -> PipelineResult<LoopOutcome> {
        let config = self.config;
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);

        let calculation = if parameterization.calculation.trim().is_empty() {
            code.to_string()
        } else {
            parameterization.calculation.clone()
        };
        let mut current = parameterization;
        let mut runs = Vec::new();
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut plans = Vec::new();
        let mut trace = Vec::new();
        let mut usage = Usage::default();
        let mut consecutive_failures = 0u32;
        let mut pending_plan: Option<Vec<String>> = None;

        debug!(seed, target_runs = config.target_runs, "validation loop started");

        for attempt in 1..=config.max_attempts {
            trace.push(LoopState::Generating);
            let stats = self.sample(&calculation, &current, &mut rng, &mut runs, &mut trace);

            if runs.len() >= config.target_runs {
                trace.push(LoopState::Accepted);
                history.push(AttemptRecord {
                    attempt,
                    inputs: current.inputs.clone(),
                    runs_generated: runs.len(),
                    target_runs: config.target_runs,
                    success: true,
                    error: None,
                    plan: pending_plan.take(),
                    planner_error: None,
                });
                info!(attempt, runs = runs.len(), "validation loop accepted");
                return Ok(LoopOutcome {
                    runs,
                    attempts: attempt,
                    parameterization: current,
                    history,
                    plans,
                    trace,
                    usage,
                });
            }

            consecutive_failures += 1;
            let error = stats.failure_text();
            warn!(attempt, runs = runs.len(), error = %error, "attempt fell short");
            history.push(AttemptRecord {
                attempt,
                inputs: current.inputs.clone(),
                runs_generated: runs.len(),
                target_runs: config.target_runs,
                success: false,
                error: Some(error.clone()),
                plan: pending_plan.take(),
                planner_error: None,
            });

            if attempt == config.max_attempts {
                return Err(PipelineError::Exhausted(Box::new(ExhaustedLoop {
                    attempts: attempt,
                    last_error: error,
                    history,
                    runs,
                    parameterization: current,
                })));
            }

            let planner = self
                .planner
                .filter(|_| consecutive_failures >= config.plan_after_failures);
            let Some(planner) = planner else {
                trace.push(LoopState::Retry);
                continue;
            };

            trace.push(LoopState::Planning);
            let proposal = planner
                .propose(PlanRequest {
                    problem,
                    code: &calculation,
                    current: &current,
                    previous_attempts: &history,
                    last_error: Some(&error),
                })
                .await;

            match proposal {
                Ok(proposal) => {
                    usage.add(&proposal.usage);
                    current.inputs = proposal.inputs;
                    pending_plan = Some(proposal.plan.clone());
                    plans.push(proposal.plan);
                    consecutive_failures = 0;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "planner failed, keeping current inputs");
                    if let Some(record) = history.last_mut() {
                        record.planner_error = Some(e.to_string());
                    }
                }
            }
        }

        // max_attempts is at least 1 after config validation; a zero cap
        // still reports instead of returning nothing.
        Err(PipelineError::Exhausted(Box::new(ExhaustedLoop {
            attempts: 0,
            last_error: "no attempts were made".to_string(),
            history,
            runs,
            parameterization: current,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config(seed: u64) -> PipelineConfig {
        PipelineConfig {
            seed: Some(seed),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_always_true_accepts_first_attempt() {
        let runner = CodeRunner::default();
        let config = config(1);
        let outcome = ValidationLoop::new(&runner, &config)
            .run(
                &ProblemContext::new("q"),
                "print(\"Final answer:\", 1)",
                Parameterization::accept_all(""),
            )
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.runs.len(), 4);
        assert_eq!(outcome.trace.last(), Some(&LoopState::Accepted));
    }

    #[tokio::test]
    async fn test_same_seed_same_runs() {
        let runner = CodeRunner::default();
        let config = config(42);
        let parameterization = Parameterization {
            inputs: BTreeMap::from([("x".to_string(), "floor(1 + random() * 100)".to_string())]),
            eval: "x > 0".to_string(),
            calculation: "print(\"Final answer:\", x * 2)".to_string(),
            reasons: String::new(),
        };
        let validation = ValidationLoop::new(&runner, &config);
        let problem = ProblemContext::new("q");
        let first = validation.run(&problem, "", parameterization.clone()).await.unwrap();
        let second = validation.run(&problem, "", parameterization).await.unwrap();
        assert_eq!(first.runs, second.runs);
    }

    #[tokio::test]
    async fn test_execution_error_is_reported() {
        let runner = CodeRunner::default();
        let config = PipelineConfig {
            max_attempts: 2,
            ..config(3)
        };
        let parameterization = Parameterization {
            inputs: BTreeMap::from([("x".to_string(), "random()".to_string())]),
            eval: "true".to_string(),
            calculation: "x = 3".to_string(),
            reasons: String::new(),
        };
        let err = ValidationLoop::new(&runner, &config)
            .run(&ProblemContext::new("q"), "", parameterization)
            .await
            .unwrap_err();
        let PipelineError::Exhausted(exhausted) = err else {
            panic!("expected exhaustion");
        };
        assert_eq!(exhausted.attempts, 2);
        assert_eq!(exhausted.last_error, "Identifier 'x' has already been declared");
        assert_eq!(exhausted.history.len(), 2);
    }
}
