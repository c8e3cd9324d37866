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
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::ApiError;
use crate::session::RequestContext;
use crate::state::AppState;

pub const SESSION_HEADER: &str = "x-analytics-session";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken,
        }
    }
}

/// Resolves a bearer token to the user it was issued for.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthUser, AuthError>;
}

#[derive(Clone)]
pub struct JwtVerifier {
    secret: String,
    issuer: Option<String>,
    audience: String,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl JwtVerifier {
    pub fn new(secret: &str, issuer: Option<String>, audience: String) -> Self {
        Self {
            secret: secret.to_string(),
            issuer,
            audience,
        }
    }

    pub fn create_token(
        &self,
        user_id: &str,
        email: &str,
        expires_in_hours: i64,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let exp = now + Duration::hours(expires_in_hours);

        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            aud: self.audience.clone(),
            iss: self.issuer.clone(),
        };

        let header = Header::new(Algorithm::HS256);
        let encoding_key = EncodingKey::from_secret(self.secret.as_ref());
        encode(&header, &claims, &encoding_key)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation.set_audience(&[&self.audience]);

        let decoding_key = DecodingKey::from_secret(self.secret.as_ref());
        let token_data = decode::<Claims>(token, &decoding_key, &validation)?;
        Ok(token_data.claims)
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let claims = self.verify_token(token)?;
        Ok(AuthUser {
            id: claims.sub,
            email: claims.email.to_ascii_lowercase(),
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Verifies the bearer token, applies the domain allow-list and attaches a
/// [`RequestContext`] for handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers();
    let token = bearer_token(headers).ok_or_else(|| ApiError::unauthorized("Unauthorized"))?;
    let verifier = state
        .verifier
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("Authentication not configured"))?;

    let user = verifier.verify(token).await.map_err(|e| {
        debug!(error = %e, "token rejected");
        ApiError::unauthorized("Invalid token")
    })?;
    if !state.config.auth.domain_allowed(&user.email) {
        return Err(ApiError::forbidden("Forbidden: domain not allowed"));
    }

    let session_id = state.sessions.resolve(
        &user,
        header_str(headers, SESSION_HEADER),
        header_str(headers, header::USER_AGENT.as_str()),
    );
    request
        .extensions_mut()
        .insert(RequestContext { user, session_id });
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> JwtVerifier {
        JwtVerifier::new("test-secret", None, "authenticated".to_string())
    }

    #[tokio::test]
    async fn test_round_trip_lowercases_email() {
        let jwt = verifier();
        let token = jwt.create_token("user-1", "Teacher@School.org", 1).unwrap();
        let user = jwt.verify(&token).await.unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(user.email, "teacher@school.org");
    }

    #[test]
    fn test_wrong_audience_is_rejected() {
        let issued = JwtVerifier::new("test-secret", None, "other".to_string())
            .create_token("user-1", "a@b.c", 1)
            .unwrap();
        assert!(matches!(
            verifier().verify_token(&issued),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_token() {
        let token = verifier().create_token("user-1", "a@b.c", -2).unwrap();
        assert!(matches!(
            verifier().verify_token(&token),
            Err(AuthError::ExpiredToken)
        ));
    }

    #[test]
    fn test_issuer_enforced_when_configured() {
        let strict = JwtVerifier::new(
            "test-secret",
            Some("https://auth.example.com".to_string()),
            "authenticated".to_string(),
        );
        let unissued = verifier().create_token("user-1", "a@b.c", 1).unwrap();
        assert!(strict.verify_token(&unissued).is_err());

        let issued = strict.create_token("user-1", "a@b.c", 1).unwrap();
        assert!(strict.verify_token(&issued).is_ok());
    }

    #[test]
    fn test_bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        assert!(!format!("{:?}", verifier()).contains("test-secret"));
    }
}
