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

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::telemetry;

/// Identity and analytics session of the caller, set by the auth layer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user: AuthUser,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    Unknown,
}

impl DeviceType {
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        let Some(agent) = user_agent else {
            return Self::Unknown;
        };
        let agent = agent.to_ascii_lowercase();
        if ["mobile", "android", "iphone"].iter().any(|k| agent.contains(k)) {
            Self::Mobile
        } else if ["tablet", "ipad"].iter().any(|k| agent.contains(k)) {
            Self::Tablet
        } else {
            Self::Desktop
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Desktop => "desktop",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub email: String,
    pub device_type: DeviceType,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Open analytics sessions, one per user, held in application state.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: DashMap<String, String>,
    sessions: DashMap<String, SessionRecord>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn reusable(&self, user: &AuthUser, candidate: Option<&str>) -> Option<String> {
        let candidate = candidate?;
        self.sessions
            .get(candidate)
            .filter(|s| s.user_id == user.id && s.ended_at.is_none())
            .map(|s| s.id.clone())
    }

    fn open(&self, user: &AuthUser, user_agent: Option<&str>) -> String {
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            email: user.email.clone(),
            device_type: DeviceType::from_user_agent(user_agent),
            started_at: Utc::now(),
            ended_at: None,
        };
        telemetry::session_event("session_start", &record);
        let id = record.id.clone();
        self.sessions.insert(id.clone(), record);
        id
    }

    /// Returns the user's open session, reusing `client_session_id` when it
    /// names one of theirs, and opening a new one otherwise.
    pub fn start(
        &self,
        user: &AuthUser,
        user_agent: Option<&str>,
        client_session_id: Option<&str>,
    ) -> String {
        self.active
            .entry(user.id.clone())
            .or_insert_with(|| {
                self.reusable(user, client_session_id)
                    .unwrap_or_else(|| self.open(user, user_agent))
            })
            .value()
            .clone()
    }

    /// Closes the user's open session and forgets it.
    pub fn end(&self, user: &AuthUser) -> Option<String> {
        let (_, id) = self.active.remove(&user.id)?;
        if let Some((_, mut record)) = self.sessions.remove(&id) {
            record.ended_at = Some(Utc::now());
            telemetry::session_event("session_end", &record);
        }
        Some(id)
    }

    /// Session for a request: the client header when it names an open
    /// session of this user, else the user's open session, else a new one.
    pub fn resolve(
        &self,
        user: &AuthUser,
        header_session: Option<&str>,
        user_agent: Option<&str>,
    ) -> String {
        self.reusable(user, header_session)
            .unwrap_or_else(|| self.start(user, user_agent, None))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<SessionRecord> {
        self.sessions.get(id).map(|s| s.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> AuthUser {
        AuthUser {
            id: id.to_string(),
            email: format!("{id}@school.org"),
        }
    }

    #[test]
    fn test_device_type_from_user_agent() {
        assert_eq!(
            DeviceType::from_user_agent(Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)")),
            DeviceType::Mobile
        );
        assert_eq!(DeviceType::from_user_agent(Some("Mozilla/5.0 (iPad)")), DeviceType::Tablet);
        assert_eq!(DeviceType::from_user_agent(Some("curl/8.0")), DeviceType::Desktop);
        assert_eq!(DeviceType::from_user_agent(None), DeviceType::Unknown);
    }

    #[test]
    fn test_start_reuses_open_session() {
        let registry = SessionRegistry::new();
        let alice = user("alice");
        let first = registry.start(&alice, None, None);
        assert_eq!(registry.start(&alice, None, None), first);
        assert_ne!(registry.start(&user("bob"), None, None), first);
    }

    #[test]
    fn test_end_then_start_opens_new_session() {
        let registry = SessionRegistry::new();
        let alice = user("alice");
        let first = registry.start(&alice, Some("curl/8.0"), None);
        assert_eq!(registry.end(&alice), Some(first.clone()));
        assert!(registry.get(&first).is_none());
        assert!(registry.is_empty());

        let ended_reuse = registry.start(&alice, None, Some(&first));
        assert_ne!(ended_reuse, first);
        assert_eq!(registry.len(), 1);
        assert!(registry.end(&user("nobody")).is_none());
    }

    #[test]
    fn test_repeated_start_keeps_one_record() {
        let registry = std::sync::Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = std::sync::Arc::clone(&registry);
                std::thread::spawn(move || registry.start(&user("alice"), None, None))
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_client_session_reused_only_for_owner() {
        let registry = SessionRegistry::new();
        let alice = user("alice");
        let first = registry.start(&alice, None, None);
        registry.active.remove(&alice.id);

        assert_eq!(registry.start(&alice, None, Some(&first)), first);
        assert_ne!(registry.start(&user("mallory"), None, Some(&first)), first);
    }

    #[test]
    fn test_header_session_must_belong_to_caller() {
        let registry = SessionRegistry::new();
        let alice = user("alice");
        let bob = user("bob");
        let alices = registry.start(&alice, None, None);

        assert_eq!(registry.resolve(&alice, Some(&alices), None), alices);
        let bobs = registry.resolve(&bob, Some(&alices), None);
        assert_ne!(bobs, alices);
        assert_eq!(registry.resolve(&bob, None, None), bobs);

        assert_eq!(registry.resolve(&alice, Some("made-up"), None), alices);
        assert!(registry.get("made-up").is_none());
    }
}
