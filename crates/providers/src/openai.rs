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

use async_trait::async_trait;
use llm_contracts::{
    Backend, CompletionRequest, CompletionResponse, LLMResult, ReasoningEffort, Usage,
};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::chat::{
    build_http_client, extract_content, finish_reason, messages_payload, post_chat,
    DEFAULT_MAX_TOKENS,
};
use super::ApiClient;

pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1";

#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    endpoint: String,
    default_model: String,
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("endpoint", &self.endpoint)
            .field("default_model", &self.default_model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAIClient {
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        default_model: Option<String>,
        timeout_seconds: Option<u64>,
    ) -> LLMResult<Self> {
        let client = build_http_client(Duration::from_secs(timeout_seconds.unwrap_or(120)))?;

        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_OPENAI_ENDPOINT.to_string()),
            default_model: default_model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
        })
    }

    fn is_reasoning_model(model: &str) -> bool {
        model.to_ascii_lowercase().starts_with('o')
    }

    fn build_openai_payload(&self, request: &CompletionRequest) -> (String, Value) {
        let model = request.selector.model_or(&self.default_model).to_string();
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let mut payload = json!({
            "model": model,
            "messages": messages_payload(&request.messages),
        });

        if Self::is_reasoning_model(&model) {
            payload["max_completion_tokens"] = json!(max_tokens);
            payload["reasoning_effort"] = json!(request
                .reasoning_effort
                .unwrap_or(ReasoningEffort::Medium)
                .as_str());
        } else {
            payload["max_tokens"] = json!(max_tokens);
            payload["temperature"] = json!(request.temperature.unwrap_or(0.0));
        }

        if let Some(schema) = &request.response_schema {
            payload["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": schema.strict
                }
            });
        }

        (model, payload)
    }
}

#[async_trait]
impl ApiClient for OpenAIClient {
    async fn send_request(&self, request: &CompletionRequest) -> LLMResult<CompletionResponse> {
        let (model, payload) = self.build_openai_payload(request);
        let response_data = post_chat(
            &self.client,
            &self.endpoint,
            &self.api_key,
            &payload,
            self.provider_name(),
        )
        .await?;

        Ok(CompletionResponse {
            content: extract_content(&response_data, self.provider_name())?,
            backend: Backend::OpenAI,
            model,
            usage: Usage::from_openai(&response_data["usage"]),
            finish_reason: finish_reason(&response_data),
        })
    }

    fn provider_name(&self) -> &'static str {
        "OpenAI"
    }

    fn backend(&self) -> Backend {
        Backend::OpenAI
    }
}
