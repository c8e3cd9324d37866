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

pub mod compose;
pub mod config;
pub mod error;
pub mod json;
pub mod model;
pub mod parameterize;
pub mod planner;
pub mod prompts;
pub mod validation;
pub mod verify;

use providers::CompletionService;
use sandbox::CodeRunner;
use std::sync::Arc;

pub use compose::{ComposeOutcome, ComposeRequest, Composer, QaItem};
pub use config::{ModelsConfig, ParseFailurePolicy, PipelineConfig};
pub use error::{ExhaustedLoop, PipelineError, PipelineResult};
pub use model::{AttemptRecord, Parameterization, ProblemContext, Run};
pub use parameterize::{ParameterizationGenerator, ParameterizeOutcome};
pub use planner::{Alternative, PlanProposal, PlanRequest, Planner};
pub use validation::{LoopOutcome, LoopState, ValidationLoop};
pub use verify::{BuildReport, CodeBuilder, Verdict};

/// Shared handles for building each stage against one completion service.
#[derive(Clone)]
pub struct Pipeline {
    service: Arc<dyn CompletionService>,
    runner: CodeRunner,
    models: ModelsConfig,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        service: Arc<dyn CompletionService>,
        runner: CodeRunner,
        models: ModelsConfig,
        config: PipelineConfig,
    ) -> Self {
        Self {
            service,
            runner,
            models,
            config,
        }
    }

    pub const fn runner(&self) -> &CodeRunner {
        &self.runner
    }

    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub const fn models(&self) -> &ModelsConfig {
        &self.models
    }

    pub fn service(&self) -> Arc<dyn CompletionService> {
        Arc::clone(&self.service)
    }

    pub fn code_builder(&self) -> CodeBuilder {
        CodeBuilder::new(
            self.service(),
            self.runner.clone(),
            self.models.code.clone(),
            self.models.verify.clone(),
            self.config.max_attempts,
        )
    }

    pub fn parameterizer(&self) -> ParameterizationGenerator {
        ParameterizationGenerator::new(
            self.service(),
            self.models.parameterize.clone(),
            self.config.parse_failure_policy,
        )
    }

    pub fn planner(&self) -> Planner {
        Planner::new(self.service(), self.models.plan.clone())
    }

    pub fn composer(&self) -> Composer {
        Composer::new(self.service(), self.models.compose.clone())
    }

    /// Runs the validation loop with the planner attached.
    pub async fn generate_runs(
        &self,
        problem: &ProblemContext,
        code: &str,
        parameterization: Parameterization,
    ) -> PipelineResult<LoopOutcome> {
        let planner = self.planner();
        ValidationLoop::new(&self.runner, &self.config)
            .with_planner(&planner)
            .run(problem, code, parameterization)
            .await
    }
}
