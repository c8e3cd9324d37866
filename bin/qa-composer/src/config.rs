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

use anyhow::{Context, Result};
use config::{Config, Environment, File, Map};
use pipeline::{ModelsConfig, PipelineConfig};
use providers::ProvidersConfig;
use sandbox::RunnerLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_NAME: &str = "qa-composer";
const REDACTED: &str = "[REDACTED]";

/// Pre-prefix environment names still honoured for existing deployments.
const LEGACY_OVERRIDES: &[(&str, &str)] = &[
    ("OPENAI_API_KEY", "providers.openai_api_key"),
    ("GROQ_API_KEY", "providers.groq_api_key"),
    ("GROQ_MODEL", "providers.groq_model"),
    ("PARAM_MODEL", "models.parameterize"),
    ("PLAN_MODEL", "models.plan"),
    ("QA_MODEL", "models.compose"),
    ("AUTH_JWT_SECRET", "auth.jwt_secret"),
    ("QAC_HTTP_ADDR", "server.http_addr"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_addr: String,
    pub body_limit_bytes: usize,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:4000".to_string(),
            body_limit_bytes: 2 * 1024 * 1024,
            static_dir: PathBuf::from("static"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    pub issuer: Option<String>,
    pub audience: String,
    pub allowed_email_domains: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            issuer: None,
            audience: "authenticated".to_string(),
            allowed_email_domains: Vec::new(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| REDACTED))
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("allowed_email_domains", &self.allowed_email_domains)
            .finish()
    }
}

impl AuthConfig {
    /// An empty allow-list admits every domain.
    pub fn domain_allowed(&self, email: &str) -> bool {
        if self.allowed_email_domains.is_empty() {
            return true;
        }
        let email = email.to_ascii_lowercase();
        email
            .rsplit_once('@')
            .is_some_and(|(_, domain)| self.allowed_email_domains.iter().any(|d| d == domain))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectSeed {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub subject_rules: String,
}

fn default_subjects() -> Vec<SubjectSeed> {
    let seed = |name: &str, display: &str, rules: &str| SubjectSeed {
        name: name.to_string(),
        display_name: display.to_string(),
        description: format!("{display} calculation questions"),
        subject_rules: rules.to_string(),
    };
    vec![
        seed(
            "chemistry",
            "Chemistry",
            "Use Ar values to 1 d.p. Give intermediate values to 5 s.f. and final answers to 3 s.f. with units.",
        ),
        seed(
            "physics",
            "Physics",
            "Use g = 9.81 m s^-2. Give final answers to 3 s.f. in SI units.",
        ),
        seed(
            "mathematics",
            "Mathematics",
            "Give exact values where possible, otherwise 3 s.f.",
        ),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub providers: ProvidersConfig,
    pub models: ModelsConfig,
    pub pipeline: PipelineConfig,
    pub sandbox: RunnerLimits,
    pub subjects: Vec<SubjectSeed>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            providers: ProvidersConfig::default(),
            models: ModelsConfig::default(),
            pipeline: PipelineConfig::default(),
            sandbox: RunnerLimits::default(),
            subjects: default_subjects(),
        }
    }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars().collect())
    }

    /// Layers defaults, the TOML file, `QAC__SECTION__KEY` variables and the
    /// legacy variable names, in that order.
    pub fn load_with_env(path: Option<&Path>, env: Map<String, String>) -> Result<Self> {
        let mut builder = Config::builder();
        builder = match path {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };
        builder = builder.add_source(
            Environment::with_prefix("QAC")
                .prefix_separator("__")
                .separator("__")
                .source(Some(env.clone())),
        );
        for (variable, key) in LEGACY_OVERRIDES {
            builder = builder.set_override_option(*key, non_blank(env.get(*variable)))?;
        }

        let mut config: Self = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        if let Some(domains) = non_blank(env.get("ALLOWED_EMAIL_DOMAINS")) {
            config.auth.allowed_email_domains = domains.split(',').map(str::to_string).collect();
        }
        config.auth.allowed_email_domains = config
            .auth
            .allowed_email_domains
            .iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        if config.subjects.is_empty() {
            config.subjects = default_subjects();
        }

        config.pipeline.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Copy safe to print: secrets replaced by a marker.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let mask = |secret: &mut Option<String>| {
            if secret.is_some() {
                *secret = Some(REDACTED.to_string());
            }
        };
        mask(&mut copy.auth.jwt_secret);
        mask(&mut copy.providers.openai_api_key);
        mask(&mut copy.providers.groq_api_key);
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_sources() {
        let missing = Path::new("does-not-exist.toml");
        assert!(AppConfig::load_with_env(Some(missing), Map::new()).is_err());

        let config = AppConfig::load_with_env(None, Map::new()).unwrap();
        assert_eq!(config.server.http_addr, "127.0.0.1:4000");
        assert_eq!(config.auth.audience, "authenticated");
        assert_eq!(config.pipeline.max_attempts, 3);
        assert!(!config.subjects.is_empty());
    }

    #[test]
    fn test_file_then_env_then_legacy() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nhttp_addr = \"0.0.0.0:9000\"\n\n[pipeline]\nmax_attempts = 5\n\n[models]\ncompose = \"openai:gpt-4.1\""
        )
        .unwrap();

        let config = AppConfig::load_with_env(
            Some(file.path()),
            env(&[
                ("QAC__PIPELINE__TARGET_RUNS", "6"),
                ("QA_MODEL", "groq"),
                ("OPENAI_API_KEY", "sk-test"),
                ("ALLOWED_EMAIL_DOMAINS", "School.org, example.com"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.http_addr, "0.0.0.0:9000");
        assert_eq!(config.pipeline.max_attempts, 5);
        assert_eq!(config.pipeline.target_runs, 6);
        assert_eq!(config.models.compose.to_string(), "groq");
        assert_eq!(config.providers.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(
            config.auth.allowed_email_domains,
            vec!["school.org", "example.com"]
        );
    }

    #[test]
    fn test_blank_legacy_values_are_ignored() {
        let config =
            AppConfig::load_with_env(None, env(&[("OPENAI_API_KEY", "  ")])).unwrap();
        assert!(config.providers.openai_api_key.is_none());
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = Some("super-secret".to_string());
        config.providers.groq_api_key = Some("gsk-live".to_string());
        let printed = toml::to_string(&config.redacted()).unwrap();
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("gsk-live"));
        assert!(printed.contains(REDACTED));
    }

    #[test]
    fn test_domain_allow_list() {
        let auth = AuthConfig {
            allowed_email_domains: vec!["school.org".to_string()],
            ..AuthConfig::default()
        };
        assert!(auth.domain_allowed("Teacher@School.org"));
        assert!(!auth.domain_allowed("someone@gmail.com"));
        assert!(!auth.domain_allowed("no-at-sign"));
        assert!(AuthConfig::default().domain_allowed("anyone@anywhere.net"));
    }
}
