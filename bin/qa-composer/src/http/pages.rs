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

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use std::path::PathBuf;
use tracing::warn;

use crate::config::AppConfig;
use crate::state::AppState;

/// Serves the static HTML shells with deployment values filled in.
#[derive(Debug, Clone)]
pub struct PageRenderer {
    static_dir: PathBuf,
    allowed_domains: String,
    issuer: String,
}

impl PageRenderer {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            static_dir: config.server.static_dir.clone(),
            allowed_domains: config.auth.allowed_email_domains.join(","),
            issuer: config.auth.issuer.clone().unwrap_or_default(),
        }
    }

    pub fn substitute(&self, html: &str) -> String {
        html.replace("__ALLOWED_DOMAINS__", &self.allowed_domains)
            .replace("__AUTH_ISSUER__", &self.issuer)
    }

    pub async fn render(&self, file: &str) -> Option<String> {
        let path = self.static_dir.join(file);
        match tokio::fs::read_to_string(&path).await {
            Ok(html) => Some(self.substitute(&html)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "page not readable");
                None
            }
        }
    }
}

async fn page(state: &AppState, file: &str, missing: &'static str) -> Response {
    match state.pages.render(file).await {
        Some(html) => Html(html).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, missing).into_response(),
    }
}

pub async fn login_page(State(state): State<AppState>) -> Response {
    page(&state, "login.html", "Login page not found").await
}

pub async fn index_page(State(state): State<AppState>) -> Response {
    page(&state, "index.html", "Index page not found").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_substituted() {
        let mut config = AppConfig::default();
        config.auth.allowed_email_domains = vec!["school.org".to_string(), "example.com".to_string()];
        config.auth.issuer = Some("https://auth.example.com".to_string());
        let pages = PageRenderer::new(&config);

        let html = pages.substitute("<meta data-domains=\"__ALLOWED_DOMAINS__\" data-issuer=\"__AUTH_ISSUER__\">");
        assert_eq!(
            html,
            "<meta data-domains=\"school.org,example.com\" data-issuer=\"https://auth.example.com\">"
        );
    }

    #[tokio::test]
    async fn test_missing_page_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.server.static_dir = dir.path().to_path_buf();
        let pages = PageRenderer::new(&config);
        assert!(pages.render("index.html").await.is_none());

        std::fs::write(dir.path().join("index.html"), "<p>__ALLOWED_DOMAINS__</p>").unwrap();
        assert_eq!(pages.render("index.html").await.as_deref(), Some("<p></p>"));
    }
}
