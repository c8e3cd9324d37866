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

use anyhow::Result;
use pipeline::Pipeline;
use providers::{CompletionClient, CompletionService};
use sandbox::CodeRunner;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{IdentityVerifier, JwtVerifier};
use crate::config::AppConfig;
use crate::http::pages::PageRenderer;
use crate::session::SessionRegistry;
use crate::store::{DocumentStore, MemoryStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Pipeline,
    pub store: Arc<dyn DocumentStore>,
    pub sessions: Arc<SessionRegistry>,
    pub verifier: Option<Arc<dyn IdentityVerifier>>,
    pub pages: Arc<PageRenderer>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        service: Arc<dyn CompletionService>,
        store: Arc<dyn DocumentStore>,
        verifier: Option<Arc<dyn IdentityVerifier>>,
    ) -> Self {
        let pipeline = Pipeline::new(
            service,
            CodeRunner::new(config.sandbox),
            config.models.clone(),
            config.pipeline.clone(),
        );
        let pages = PageRenderer::new(&config);
        Self {
            config: Arc::new(config),
            pipeline,
            store,
            sessions: Arc::new(SessionRegistry::new()),
            verifier,
            pages: Arc::new(pages),
        }
    }

    /// Wires the real completion backends, the in-memory store seeded with
    /// the configured subjects and the JWT verifier.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let service = Arc::new(CompletionClient::from_config(&config.providers)?);

        let store = Arc::new(MemoryStore::new());
        for subject in &config.subjects {
            store.seed_subject(subject).await?;
        }
        info!(subjects = config.subjects.len(), "subjects seeded");

        let verifier: Option<Arc<dyn IdentityVerifier>> = match &config.auth.jwt_secret {
            Some(secret) if !secret.trim().is_empty() => Some(Arc::new(JwtVerifier::new(
                secret,
                config.auth.issuer.clone(),
                config.auth.audience.clone(),
            ))),
            _ => {
                warn!("auth.jwt_secret not set - API routes will answer 503");
                None
            }
        };

        Ok(Self::new(config, service, store, verifier))
    }

    pub fn runner(&self) -> &CodeRunner {
        self.pipeline.runner()
    }
}
