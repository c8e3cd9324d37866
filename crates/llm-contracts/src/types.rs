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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    OpenAI,
    Groq,
}

impl Backend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Backend::OpenAI => "openai",
            Backend::Groq => "groq",
        }
    }

    pub const fn supports_response_schema(self) -> bool {
        matches!(self, Backend::OpenAI)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed form of the backend flag callers pass around as a string.
///
/// Accepted forms: `groq`, `openai`, `groq:<model>`, `openai:<model>`, or a
/// bare model name such as `gpt-4.1` or `o3`, which always means OpenAI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelSelector {
    pub backend: Backend,
    pub model: Option<String>,
}

impl ModelSelector {
    pub const fn new(backend: Backend, model: Option<String>) -> Self {
        Self { backend, model }
    }

    pub const fn backend(backend: Backend) -> Self {
        Self {
            backend,
            model: None,
        }
    }

    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(default)
    }
}

impl FromStr for ModelSelector {
    type Err = LLMError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(LLMError::Configuration(
                "empty model selector".to_string(),
            ));
        }

        let lowered = raw.to_ascii_lowercase();
        match lowered.as_str() {
            "groq" => return Ok(Self::backend(Backend::Groq)),
            "openai" => return Ok(Self::backend(Backend::OpenAI)),
            _ => {}
        }

        if let Some((prefix, model)) = raw.split_once(':') {
            let backend = match prefix.to_ascii_lowercase().as_str() {
                "groq" => Some(Backend::Groq),
                "openai" => Some(Backend::OpenAI),
                _ => None,
            };
            if let Some(backend) = backend {
                let model = model.trim();
                if model.is_empty() {
                    return Err(LLMError::Configuration(format!(
                        "model selector '{raw}' names no model"
                    )));
                }
                return Ok(Self::new(backend, Some(model.to_string())));
            }
        }

        Ok(Self::new(Backend::OpenAI, Some(raw.to_string())))
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{}:{model}", self.backend),
            None => write!(f, "{}", self.backend),
        }
    }
}

impl Serialize for ModelSelector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModelSelector {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialisation error: {0}")]
    Serialisation(String),

    #[error("Timeout error")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LLMError {
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            LLMError::RateLimit | LLMError::Network(_) | LLMError::Timeout
        )
    }
}

pub type LLMResult<T> = Result<T, LLMError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_backend_names() {
        let groq: ModelSelector = "groq".parse().unwrap();
        assert_eq!(groq, ModelSelector::backend(Backend::Groq));

        let openai: ModelSelector = "OpenAI".parse().unwrap();
        assert_eq!(openai.backend, Backend::OpenAI);
        assert!(openai.model.is_none());
    }

    #[test]
    fn test_bare_model_name_implies_openai() {
        let selector: ModelSelector = "gpt-4.1".parse().unwrap();
        assert_eq!(selector.backend, Backend::OpenAI);
        assert_eq!(selector.model.as_deref(), Some("gpt-4.1"));

        let reasoning: ModelSelector = "o3".parse().unwrap();
        assert_eq!(reasoning.model_or("gpt-4.1"), "o3");
    }

    #[test]
    fn test_prefixed_selector_keeps_model_case() {
        let selector: ModelSelector = "groq:openai/gpt-oss-120b".parse().unwrap();
        assert_eq!(selector.backend, Backend::Groq);
        assert_eq!(selector.model.as_deref(), Some("openai/gpt-oss-120b"));
        assert_eq!(selector.to_string(), "groq:openai/gpt-oss-120b");
    }

    #[test]
    fn test_empty_selector_is_configuration_error() {
        assert!(matches!(
            "  ".parse::<ModelSelector>(),
            Err(LLMError::Configuration(_))
        ));
        assert!(matches!(
            "openai:".parse::<ModelSelector>(),
            Err(LLMError::Configuration(_))
        ));
    }

    #[test]
    fn test_selector_serde_as_string() {
        let selector: ModelSelector = serde_json::from_str("\"groq\"").unwrap();
        assert_eq!(selector.backend, Backend::Groq);
        assert_eq!(serde_json::to_string(&selector).unwrap(), "\"groq\"");
    }
}
