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

pub mod generation;
pub mod library;
pub mod pages;

use axum::extract::{DefaultBodyLimit, FromRequest};
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::require_auth;
use crate::error::ApiError;
use crate::state::AppState;

/// JSON body extractor whose rejections use the API error shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `{ok: true, ..body}`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    ok: bool,
    #[serde(flatten)]
    body: T,
}

impl<T> Envelope<T> {
    pub const fn ok(body: T) -> Self {
        Self { ok: true, body }
    }
}

pub(crate) fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::bad_request("Invalid id"))
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;

    let api = Router::new()
        .route("/session/start", post(library::start_session))
        .route("/session/end", post(library::end_session))
        .route("/subjects", get(library::list_subjects))
        .route(
            "/questions",
            get(library::list_questions).post(library::upsert_question),
        )
        .route("/questions/{id}", delete(library::delete_question))
        .route("/questions/{id}/code", post(library::save_code))
        .route(
            "/contexts",
            get(library::list_contexts).post(library::create_context),
        )
        .route(
            "/contexts/{id}",
            get(library::get_context)
                .put(library::update_context)
                .delete(library::delete_context),
        )
        .route("/execute", post(generation::execute))
        .route("/build-and-verify", post(generation::build_and_verify))
        .route("/parameterize", post(generation::parameterize))
        .route("/plan-params", post(generation::plan_params))
        .route("/generate-runs", post(generation::generate_runs))
        .route("/compose-qa", post(generation::compose_qa))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", get(pages::login_page))
        .route("/", get(pages::index_page))
        .nest("/api", api)
        .fallback(pages::index_page)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
