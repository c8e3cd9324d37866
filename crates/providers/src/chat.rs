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

use llm_contracts::{LLMError, LLMResult, Message};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4000;

pub(crate) fn build_http_client(timeout: Duration) -> LLMResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LLMError::Configuration(format!("Failed to create HTTP client: {e}")))
}

pub(crate) fn messages_payload(messages: &[Message]) -> Value {
    Value::Array(
        messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.as_str(),
                    "content": msg.content
                })
            })
            .collect(),
    )
}

/// Single POST to an OpenAI-compatible chat endpoint. Failures are mapped
/// once and returned; nothing here retries.
pub(crate) async fn post_chat(
    client: &Client,
    endpoint: &str,
    api_key: &str,
    payload: &Value,
    provider: &str,
) -> LLMResult<Value> {
    debug!(provider, endpoint, "sending chat completion request");

    let response = client
        .post(endpoint)
        .header("Authorization", format!("Bearer {api_key}"))
        .header("Content-Type", "application/json")
        .json(payload)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                LLMError::Timeout
            } else {
                LLMError::Network(format!("Request failed: {e}"))
            }
        })?;

    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| LLMError::Serialisation(format!("Failed to parse response: {e}")));
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LLMError::Authentication(format!("{provider} API error {status}: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS => LLMError::RateLimit,
        _ => LLMError::Provider(format!("{provider} API error {status}: {body}")),
    })
}

pub(crate) fn extract_content(response_data: &Value, provider: &str) -> LLMResult<String> {
    let message = &response_data["choices"][0]["message"];

    let content = match &message["content"] {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(text) => text.as_str(),
                other => other["text"]
                    .as_str()
                    .or_else(|| other["text"]["value"].as_str())
                    .unwrap_or(""),
            })
            .collect::<String>(),
        Value::Null if !message["parsed"].is_null() => message["parsed"].to_string(),
        _ => {
            return Err(LLMError::Provider(format!(
                "Failed to extract content from {provider} response"
            )))
        }
    };

    Ok(content.trim().to_string())
}

pub(crate) fn finish_reason(response_data: &Value) -> Option<String> {
    response_data["choices"][0]["finish_reason"]
        .as_str()
        .map(ToString::to_string)
}
