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
use std::time::Instant;
use tracing::info;

use crate::session::{RequestContext, SessionRecord};
use crate::store::Question;

/// One model-backed endpoint call, reported when the handler finishes.
pub struct CompletionEvent<'a> {
    pub endpoint: &'a str,
    pub model: String,
    pub started: Instant,
    pub question_id: Option<&'a str>,
}

impl<'a> CompletionEvent<'a> {
    pub fn start(endpoint: &'a str, model: impl Into<String>, question_id: Option<&'a str>) -> Self {
        Self {
            endpoint,
            model: model.into(),
            started: Instant::now(),
            question_id,
        }
    }

    pub fn finish(
        self,
        ctx: &RequestContext,
        usage: Usage,
        generated: Option<usize>,
        error: Option<&str>,
    ) {
        let duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            target: "analytics",
            event = "ai_interaction",
            user_id = %ctx.user.id,
            session_id = %ctx.session_id,
            endpoint = self.endpoint,
            model = %self.model,
            duration_ms,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            success = error.is_none(),
            error = error.unwrap_or(""),
            question_id = self.question_id.unwrap_or(""),
            generated_count = generated.unwrap_or(0),
            "ai interaction"
        );
    }
}

pub fn question_action(
    ctx: &RequestContext,
    action: &str,
    question: &Question,
    subject_name: Option<&str>,
) {
    info!(
        target: "analytics",
        event = "question_action",
        user_id = %ctx.user.id,
        session_id = %ctx.session_id,
        action,
        question_id = %question.id,
        subject = subject_name.unwrap_or(""),
        title = question.title.as_deref().unwrap_or(""),
        "question {action}"
    );
}

pub fn session_event(event: &str, session: &SessionRecord) {
    info!(
        target: "analytics",
        event,
        session_id = %session.id,
        user_id = %session.user_id,
        email = %session.email,
        device_type = session.device_type.as_str(),
        "{event}"
    );
}
