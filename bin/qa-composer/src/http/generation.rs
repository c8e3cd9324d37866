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

use axum::extract::State;
use axum::{Extension, Json};
use llm_contracts::{ModelSelector, Usage};
use pipeline::{
    AttemptRecord, BuildReport, CodeBuilder, ComposeRequest, LoopOutcome, Parameterization,
    ParameterizationGenerator, ParameterizeOutcome, PipelineError, PlanProposal, PlanRequest,
    Planner, ProblemContext, QaItem, Run, ValidationLoop,
};
use sandbox::{Bindings, FinalAnswer, RunOutcome};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{ApiJson, Envelope};
use crate::error::{ApiError, ApiResult};
use crate::session::RequestContext;
use crate::state::AppState;
use crate::telemetry::CompletionEvent;

const ALL_TRACED: &str = "All questions appear to use correct parameter values";

/// Optional per-request backend override, e.g. `groq` or `openai:o3`.
fn model_override(raw: Option<&str>) -> ApiResult<Option<ModelSelector>> {
    raw.map(str::trim)
        .filter(|m| !m.is_empty())
        .map(|m| {
            m.parse::<ModelSelector>()
                .map_err(|e| ApiError::bad_request(format!("Invalid model '{m}': {e}")))
        })
        .transpose()
}

fn report<T>(
    event: CompletionEvent<'_>,
    ctx: &RequestContext,
    result: &Result<T, PipelineError>,
    usage: impl FnOnce(&T) -> (Usage, Option<usize>),
) {
    match result {
        Ok(value) => {
            let (usage, generated) = usage(value);
            event.finish(ctx, usage, generated, None);
        }
        Err(e) => event.finish(ctx, Usage::default(), None, Some(&e.to_string())),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExecutePayload {
    code: String,
    params: Bindings,
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Executed {
    #[serde(flatten)]
    outcome: RunOutcome,
    final_answer: Option<FinalAnswer>,
}

pub async fn execute(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ExecutePayload>,
) -> ApiResult<Json<Envelope<Executed>>> {
    if payload.code.trim().is_empty() {
        return Err(ApiError::bad_request("code is required"));
    }
    let seed = payload.seed.unwrap_or_else(rand::random);
    let outcome = state.runner().run(&payload.code, &payload.params, seed);
    if !outcome.success {
        let error = outcome.error.clone().unwrap_or_default();
        return Err(ApiError::unprocessable(format!("Code failed to execute: {error}"))
            .with_details(json!({ "output": outcome.output })));
    }
    let final_answer = outcome.final_answer();
    Ok(Json(Envelope::ok(Executed {
        outcome,
        final_answer,
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildPayload {
    #[serde(flatten)]
    problem: ProblemContext,
    model: Option<String>,
    question_id: Option<String>,
}

pub async fn build_and_verify(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(payload): ApiJson<BuildPayload>,
) -> ApiResult<Json<Envelope<BuildReport>>> {
    let models = state.pipeline.models();
    let code_model =
        model_override(payload.model.as_deref())?.unwrap_or_else(|| models.code.clone());
    let builder = CodeBuilder::new(
        state.pipeline.service(),
        state.runner().clone(),
        code_model.clone(),
        models.verify.clone(),
        state.pipeline.config().max_attempts,
    );

    let event = CompletionEvent::start(
        "/api/build-and-verify",
        code_model.to_string(),
        payload.question_id.as_deref(),
    );
    let result = builder.build_and_verify(&payload.problem).await;
    report(event, &ctx, &result, |r| (r.usage, None));

    let built = result?;
    info!(verdict = ?built.verdict, attempts = built.attempts, "build and verify finished");
    Ok(Json(Envelope::ok(built)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParameterizePayload {
    #[serde(flatten)]
    problem: ProblemContext,
    #[serde(alias = "generatedCode")]
    code: String,
    model: Option<String>,
    question_id: Option<String>,
}

pub async fn parameterize(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(payload): ApiJson<ParameterizePayload>,
) -> ApiResult<Json<Envelope<ParameterizeOutcome>>> {
    let model = model_override(payload.model.as_deref())?
        .unwrap_or_else(|| state.pipeline.models().parameterize.clone());
    let generator = ParameterizationGenerator::new(
        state.pipeline.service(),
        model.clone(),
        state.pipeline.config().parse_failure_policy,
    );

    let event = CompletionEvent::start(
        "/api/parameterize",
        model.to_string(),
        payload.question_id.as_deref(),
    );
    let result = generator.generate(&payload.problem, &payload.code).await;
    report(event, &ctx, &result, |o| (o.usage, None));
    Ok(Json(Envelope::ok(result?)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanPayload {
    #[serde(flatten)]
    problem: ProblemContext,
    code: String,
    current: Option<Parameterization>,
    previous_attempts: Vec<AttemptRecord>,
    last_error: Option<String>,
    model: Option<String>,
    question_id: Option<String>,
}

pub async fn plan_params(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(payload): ApiJson<PlanPayload>,
) -> ApiResult<Json<Envelope<PlanProposal>>> {
    let current = payload
        .current
        .ok_or_else(|| ApiError::bad_request("current.inputs and current.eval required"))?;
    let model = model_override(payload.model.as_deref())?
        .unwrap_or_else(|| state.pipeline.models().plan.clone());
    let planner = Planner::new(state.pipeline.service(), model.clone());

    let event = CompletionEvent::start(
        "/api/plan-params",
        model.to_string(),
        payload.question_id.as_deref(),
    );
    let result = planner
        .propose(PlanRequest {
            problem: &payload.problem,
            code: &payload.code,
            current: &current,
            previous_attempts: &payload.previous_attempts,
            last_error: payload.last_error.as_deref(),
        })
        .await;
    report(event, &ctx, &result, |p| (p.usage, Some(p.alternatives.len())));
    Ok(Json(Envelope::ok(result?)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateRunsPayload {
    #[serde(flatten)]
    problem: ProblemContext,
    code: String,
    parameterization: Option<Parameterization>,
    model: Option<String>,
    question_id: Option<String>,
}

pub async fn generate_runs(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(payload): ApiJson<GenerateRunsPayload>,
) -> ApiResult<Json<Envelope<LoopOutcome>>> {
    let parameterization = payload
        .parameterization
        .ok_or_else(|| ApiError::bad_request("parameterization is required"))?;
    if payload.code.trim().is_empty() && parameterization.calculation.trim().is_empty() {
        return Err(ApiError::bad_request(
            "Generated code is required - please run Build & Verify first",
        ));
    }
    let model = model_override(payload.model.as_deref())?
        .unwrap_or_else(|| state.pipeline.models().plan.clone());
    let planner = Planner::new(state.pipeline.service(), model.clone());

    let event = CompletionEvent::start(
        "/api/generate-runs",
        model.to_string(),
        payload.question_id.as_deref(),
    );
    let result = ValidationLoop::new(state.runner(), state.pipeline.config())
        .with_planner(&planner)
        .run(&payload.problem, &payload.code, parameterization)
        .await;
    report(event, &ctx, &result, |o| (o.usage, Some(o.runs.len())));
    Ok(Json(Envelope::ok(result?)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComposePayload {
    #[serde(flatten)]
    problem: ProblemContext,
    code: String,
    runs: Vec<Run>,
    n: Option<usize>,
    model: Option<String>,
    question_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Composed {
    qa: Vec<QaItem>,
    count: usize,
    runs_used: usize,
    validation: Vec<String>,
    expected_answers: Vec<String>,
}

pub async fn compose_qa(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(payload): ApiJson<ComposePayload>,
) -> ApiResult<Json<Envelope<Composed>>> {
    let model = model_override(payload.model.as_deref())?;
    let label = model
        .as_ref()
        .unwrap_or(&state.pipeline.models().compose)
        .to_string();

    let event = CompletionEvent::start("/api/compose-qa", label, payload.question_id.as_deref());
    let result = state
        .pipeline
        .composer()
        .compose(ComposeRequest {
            problem: &payload.problem,
            code: &payload.code,
            runs: &payload.runs,
            n: payload.n,
            model,
        })
        .await;
    report(event, &ctx, &result, |o| (o.usage, Some(o.items.len())));

    let outcome = result?;
    let validation = if outcome.warnings.is_empty() {
        vec![ALL_TRACED.to_string()]
    } else {
        outcome.warnings
    };
    Ok(Json(Envelope::ok(Composed {
        qa: outcome.items,
        count: outcome.count,
        runs_used: outcome.runs_used,
        validation,
        expected_answers: outcome.expected_answers,
    })))
}
