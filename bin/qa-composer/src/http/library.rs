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

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::{Extension, Json};
use pipeline::Parameterization;
use sandbox::Bindings;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::{parse_id, ApiJson, Envelope};
use crate::error::{ApiError, ApiResult};
use crate::session::RequestContext;
use crate::state::AppState;
use crate::store::{
    deserialize_some, ContextDraft, ContextRecord, Question, QuestionUpsert, Subject,
};
use crate::telemetry;

#[derive(Debug, Serialize)]
pub struct Items<T> {
    items: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct Item<T> {
    item: T,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SessionStartBody {
    client_session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStarted {
    session_id: String,
}

pub async fn start_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Envelope<SessionStarted>> {
    let request: SessionStartBody = serde_json::from_slice(&body).unwrap_or_default();
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    let session_id = state.sessions.start(
        &ctx.user,
        user_agent,
        request.client_session_id.as_deref(),
    );
    Json(Envelope::ok(SessionStarted { session_id }))
}

pub async fn end_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Json<Value> {
    if state.sessions.end(&ctx.user).is_none() {
        debug!(user_id = %ctx.user.id, "no open session to end");
    }
    Json(json!({ "ok": true }))
}

pub async fn list_subjects(
    State(state): State<AppState>,
) -> ApiResult<Json<Envelope<Items<Subject>>>> {
    let items = state.store.list_subjects().await?;
    Ok(Json(Envelope::ok(Items { items })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestionFilter {
    subject_id: Option<String>,
}

pub async fn list_questions(
    State(state): State<AppState>,
    Query(filter): Query<QuestionFilter>,
) -> ApiResult<Json<Envelope<Items<Question>>>> {
    let subject_id = match filter.subject_id.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(
            Uuid::parse_str(raw).map_err(|_| ApiError::bad_request("Invalid subjectId"))?,
        ),
        _ => None,
    };
    let items = state.store.list_questions(subject_id).await?;
    Ok(Json(Envelope::ok(Items { items })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestionPayload {
    id: Option<Uuid>,
    subject_id: Option<Uuid>,
    title: Option<String>,
    question: String,
    worked_solution: String,
    question_rules: String,
    #[serde(deserialize_with = "deserialize_some")]
    verified_code: Option<Option<String>>,
}

/// Saved code must run cleanly first.
fn ensure_code_runs(state: &AppState, code: Option<&str>) -> ApiResult<()> {
    let Some(code) = code.filter(|c| !c.trim().is_empty()) else {
        return Ok(());
    };
    let outcome = state.runner().run(code, &Bindings::new(), 0);
    if outcome.success {
        return Ok(());
    }
    let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
    Err(
        ApiError::unprocessable(format!("Code failed to execute: {error}"))
            .with_details(json!({ "output": outcome.output })),
    )
}

pub async fn upsert_question(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(payload): ApiJson<QuestionPayload>,
) -> ApiResult<Json<Envelope<Item<Question>>>> {
    let subject_id = payload
        .subject_id
        .ok_or_else(|| ApiError::bad_request("subjectId is required"))?;
    let subject = state.store.get_subject(subject_id).await?;

    if let Some(code) = &payload.verified_code {
        ensure_code_runs(&state, code.as_deref())?;
    }

    let existing = match payload.id {
        Some(id) => state.store.get_question(id).await.is_ok(),
        None => false,
    };
    let item = state
        .store
        .upsert_question(QuestionUpsert {
            id: payload.id,
            subject_id,
            title: payload.title.filter(|t| !t.trim().is_empty()),
            question: payload.question,
            worked_solution: payload.worked_solution,
            question_rules: payload.question_rules,
            verified_code: payload.verified_code,
        })
        .await?;

    let action = if existing { "updated" } else { "created" };
    telemetry::question_action(&ctx, action, &item, Some(&subject.name));
    info!(question_id = %item.id, action, "question saved");
    Ok(Json(Envelope::ok(Item { item })))
}

pub async fn delete_question(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id)?;
    let question = state.store.get_question(id).await?;
    state.store.delete_question(id).await?;
    telemetry::question_action(&ctx, "deleted", &question, None);
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SaveCodePayload {
    code: Option<String>,
    parameterization: Option<Parameterization>,
}

pub async fn save_code(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<SaveCodePayload>,
) -> ApiResult<Json<Envelope<Item<Question>>>> {
    let id = parse_id(&id)?;
    ensure_code_runs(&state, payload.code.as_deref())?;

    let item = state
        .store
        .save_verified_code(id, payload.code, payload.parameterization)
        .await?;
    let action = if item.verified_code.is_some() {
        "code_saved"
    } else {
        "code_cleared"
    };
    telemetry::question_action(&ctx, action, &item, None);
    Ok(Json(Envelope::ok(Item { item })))
}

pub async fn list_contexts(
    State(state): State<AppState>,
) -> ApiResult<Json<Envelope<Items<ContextRecord>>>> {
    let items = state.store.list_contexts().await?;
    Ok(Json(Envelope::ok(Items { items })))
}

pub async fn get_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Envelope<Item<ContextRecord>>>> {
    let item = state.store.get_context(parse_id(&id)?).await?;
    Ok(Json(Envelope::ok(Item { item })))
}

pub async fn create_context(
    State(state): State<AppState>,
    ApiJson(draft): ApiJson<ContextDraft>,
) -> ApiResult<Json<Envelope<Item<ContextRecord>>>> {
    let item = state.store.create_context(draft).await?;
    Ok(Json(Envelope::ok(Item { item })))
}

pub async fn update_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(draft): ApiJson<ContextDraft>,
) -> ApiResult<Json<Envelope<Item<ContextRecord>>>> {
    let item = state.store.update_context(parse_id(&id)?, draft).await?;
    Ok(Json(Envelope::ok(Item { item })))
}

pub async fn delete_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.store.delete_context(parse_id(&id)?).await?;
    Ok(Json(json!({ "ok": true })))
}
