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
use llm_contracts::{Backend, CompletionRequest, CompletionResponse, LLMError, LLMResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::groq::{GroqClient, DEFAULT_GROQ_ENDPOINT, DEFAULT_GROQ_MODEL};
use crate::openai::{OpenAIClient, DEFAULT_OPENAI_ENDPOINT, DEFAULT_OPENAI_MODEL};
use crate::ApiClient;

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> LLMResult<CompletionResponse>;

    fn is_available(&self, backend: Backend) -> bool;
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai_api_key: Option<String>,
    pub openai_endpoint: String,
    pub openai_model: String,
    pub groq_api_key: Option<String>,
    pub groq_endpoint: String,
    pub groq_model: String,
    pub timeout_seconds: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_endpoint: DEFAULT_OPENAI_ENDPOINT.to_string(),
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            groq_api_key: None,
            groq_endpoint: DEFAULT_GROQ_ENDPOINT.to_string(),
            groq_model: DEFAULT_GROQ_MODEL.to_string(),
            timeout_seconds: 120,
        }
    }
}

impl std::fmt::Debug for ProvidersConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |key: &Option<String>| key.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("ProvidersConfig")
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("openai_endpoint", &self.openai_endpoint)
            .field("openai_model", &self.openai_model)
            .field("groq_api_key", &redact(&self.groq_api_key))
            .field("groq_endpoint", &self.groq_endpoint)
            .field("groq_model", &self.groq_model)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

fn configured(key: Option<&String>) -> Option<String> {
    key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

/// Routes completion requests to whichever backend the selector names.
#[derive(Clone, Default)]
pub struct CompletionClient {
    clients: HashMap<Backend, Arc<dyn ApiClient>>,
}

impl CompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ProvidersConfig) -> LLMResult<Self> {
        let mut client = Self::new();

        if let Some(key) = configured(config.openai_api_key.as_ref()) {
            let openai = OpenAIClient::new(
                key,
                Some(config.openai_endpoint.clone()),
                Some(config.openai_model.clone()),
                Some(config.timeout_seconds),
            )?;
            client = client.with_client(Arc::new(openai));
            info!("OpenAI completion backend initialised");
        } else {
            warn!("OPENAI_API_KEY not set - OpenAI backend unavailable");
        }

        if let Some(key) = configured(config.groq_api_key.as_ref()) {
            let groq = GroqClient::new(
                key,
                Some(config.groq_endpoint.clone()),
                Some(config.groq_model.clone()),
                Some(config.timeout_seconds),
            )?;
            client = client.with_client(Arc::new(groq));
            info!(model = %config.groq_model, "Groq completion backend initialised");
        } else {
            warn!("GROQ_API_KEY not set - Groq backend unavailable");
        }

        if client.clients.is_empty() {
            warn!("No LLM configured. Set OPENAI_API_KEY or GROQ_API_KEY");
        }

        Ok(client)
    }

    pub fn with_client(mut self, client: Arc<dyn ApiClient>) -> Self {
        self.clients.insert(client.backend(), client);
        self
    }

    pub fn backends(&self) -> Vec<Backend> {
        let mut backends: Vec<Backend> = self.clients.keys().copied().collect();
        backends.sort_by_key(|b| b.as_str());
        backends
    }
}

#[async_trait]
impl CompletionService for CompletionClient {
    async fn complete(&self, request: CompletionRequest) -> LLMResult<CompletionResponse> {
        let backend = request.selector.backend;
        let client = self.clients.get(&backend).ok_or_else(|| {
            LLMError::Configuration(match backend {
                Backend::OpenAI => {
                    "OpenAI API not configured. Set OPENAI_API_KEY".to_string()
                }
                Backend::Groq => "Groq API not configured. Set GROQ_API_KEY".to_string(),
            })
        })?;

        debug!(
            provider = client.provider_name(),
            selector = %request.selector,
            messages = request.messages.len(),
            structured = request.response_schema.is_some(),
            "AI request"
        );

        let started = Instant::now();
        let result = client.send_request(&request).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &result {
            Ok(response) => info!(
                provider = client.provider_name(),
                model = %response.model,
                chars = response.content.len(),
                total_tokens = response.usage.total_tokens,
                elapsed_ms,
                "AI response received"
            ),
            Err(e) => warn!(
                provider = client.provider_name(),
                elapsed_ms,
                error = %e,
                "AI request failed"
            ),
        }

        result
    }

    fn is_available(&self, backend: Backend) -> bool {
        self.clients.contains_key(&backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_contracts::{Message, ModelSelector};

    #[test]
    fn test_from_config_without_keys_has_no_backends() {
        let client = CompletionClient::from_config(&ProvidersConfig::default()).unwrap();
        assert!(client.backends().is_empty());
        assert!(!client.is_available(Backend::OpenAI));
    }

    #[test]
    fn test_blank_keys_are_ignored() {
        let config = ProvidersConfig {
            groq_api_key: Some("   ".to_string()),
            openai_api_key: Some("sk-live".to_string()),
            ..ProvidersConfig::default()
        };
        let client = CompletionClient::from_config(&config).unwrap();
        assert_eq!(client.backends(), vec![Backend::OpenAI]);
    }

    #[tokio::test]
    async fn test_unavailable_backend_is_configuration_error() {
        let client = CompletionClient::new();
        let err = client
            .complete(CompletionRequest::new(
                ModelSelector::backend(Backend::Groq),
                vec![Message::user("hello")],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::Configuration(msg) if msg.contains("GROQ_API_KEY")));
    }

    #[test]
    fn test_config_debug_redacts_keys() {
        let config = ProvidersConfig {
            openai_api_key: Some("sk-secret".to_string()),
            ..ProvidersConfig::default()
        };
        assert!(!format!("{config:?}").contains("sk-secret"));
    }
}
