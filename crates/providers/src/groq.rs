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
use tracing::debug;

use super::chat::{
    build_http_client, extract_content, finish_reason, messages_payload, post_chat,
    DEFAULT_MAX_TOKENS,
};
use super::ApiClient;

pub const DEFAULT_GROQ_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_GROQ_MODEL: &str = "openai/gpt-oss-120b";

#[derive(Clone)]
pub struct GroqClient {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl std::fmt::Debug for GroqClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl GroqClient {
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        model: Option<String>,
        timeout_seconds: Option<u64>,
    ) -> LLMResult<Self> {
        let client = build_http_client(Duration::from_secs(timeout_seconds.unwrap_or(120)))?;

        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_GROQ_ENDPOINT.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string()),
        })
    }

    fn build_groq_payload(&self, request: &CompletionRequest) -> (String, Value) {
        let model = request.selector.model_or(&self.model).to_string();

        if request.response_schema.is_some() {
            debug!("Groq backend ignores response schemas; caller parses leniently");
        }

        let payload = json!({
            "model": model,
            "messages": messages_payload(&request.messages),
            "max_completion_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature.unwrap_or(1.0),
            "top_p": 1,
            "reasoning_effort": request
                .reasoning_effort
                .unwrap_or(ReasoningEffort::Medium)
                .as_str(),
            "stream": false
        });

        (model, payload)
    }
}

#[async_trait]
impl ApiClient for GroqClient {
    async fn send_request(&self, request: &CompletionRequest) -> LLMResult<CompletionResponse> {
        let (model, payload) = self.build_groq_payload(request);
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
            backend: Backend::Groq,
            model,
            usage: Usage::from_openai(&response_data["usage"]),
            finish_reason: finish_reason(&response_data),
        })
    }

    fn provider_name(&self) -> &'static str {
        "Groq"
    }

    fn backend(&self) -> Backend {
        Backend::Groq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_contracts::{Message, ModelSelector, ResponseSchema};

    #[test]
    fn test_groq_payload_defaults() {
        let client = GroqClient::new("gsk".to_string(), None, None, None).unwrap();
        let request = CompletionRequest::new(
            ModelSelector::backend(Backend::Groq),
            vec![Message::user("compose")],
        )
        .with_schema(ResponseSchema::new("items", json!({"type": "object"})));

        let (model, payload) = client.build_groq_payload(&request);
        assert_eq!(model, DEFAULT_GROQ_MODEL);
        assert_eq!(payload["temperature"], 1.0);
        assert_eq!(payload["top_p"], 1);
        assert_eq!(payload["reasoning_effort"], "medium");
        assert!(payload.get("response_format").is_none());
    }

    #[test]
    fn test_configured_model_is_used() {
        let client = GroqClient::new(
            "gsk".to_string(),
            None,
            Some("llama-3.3-70b-versatile".to_string()),
            None,
        )
        .unwrap();
        let request = CompletionRequest::new(
            ModelSelector::backend(Backend::Groq),
            vec![Message::user("x")],
        );
        assert_eq!(client.build_groq_payload(&request).0, "llama-3.3-70b-versatile");
    }
}
