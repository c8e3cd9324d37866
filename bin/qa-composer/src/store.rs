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
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pipeline::Parameterization;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use uuid::Uuid;

use crate::config::SubjectSeed;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionState {
    #[default]
    Draft,
    Verified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub subject_rules: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub title: Option<String>,
    pub question: String,
    pub worked_solution: String,
    pub question_rules: String,
    pub verified_code: Option<String>,
    pub code_verified_at: Option<DateTime<Utc>>,
    pub saved_parameterization: Option<Parameterization>,
    pub state: QuestionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Question {
    fn set_code(&mut self, code: Option<String>, now: DateTime<Utc>) {
        match code.filter(|c| !c.trim().is_empty()) {
            Some(code) => {
                self.verified_code = Some(code);
                self.code_verified_at = Some(now);
                self.state = QuestionState::Verified;
            }
            None => {
                self.verified_code = None;
                self.code_verified_at = None;
                self.state = QuestionState::Draft;
                self.saved_parameterization = None;
            }
        }
    }
}

/// Distinguishes an absent field from an explicit `null`.
pub fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default)]
pub struct QuestionUpsert {
    pub id: Option<Uuid>,
    pub subject_id: Uuid,
    pub title: Option<String>,
    pub question: String,
    pub worked_solution: String,
    pub question_rules: String,
    /// `None` leaves stored code alone; `Some(None)` clears it.
    pub verified_code: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRecord {
    pub id: Uuid,
    pub name: String,
    pub question: String,
    pub context: String,
    pub tags: Vec<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextDraft {
    pub name: String,
    pub question: String,
    pub context: String,
    pub tags: Vec<String>,
    pub description: String,
}

impl ContextDraft {
    fn validate(&self) -> StoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::Invalid("name is required".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_subjects(&self) -> StoreResult<Vec<Subject>>;
    async fn get_subject(&self, id: Uuid) -> StoreResult<Subject>;
    async fn seed_subject(&self, seed: &SubjectSeed) -> StoreResult<Subject>;

    async fn list_questions(&self, subject_id: Option<Uuid>) -> StoreResult<Vec<Question>>;
    async fn get_question(&self, id: Uuid) -> StoreResult<Question>;
    async fn upsert_question(&self, upsert: QuestionUpsert) -> StoreResult<Question>;
    async fn delete_question(&self, id: Uuid) -> StoreResult<()>;
    async fn save_verified_code(
        &self,
        id: Uuid,
        code: Option<String>,
        parameterization: Option<Parameterization>,
    ) -> StoreResult<Question>;

    async fn list_contexts(&self) -> StoreResult<Vec<ContextRecord>>;
    async fn get_context(&self, id: Uuid) -> StoreResult<ContextRecord>;
    async fn create_context(&self, draft: ContextDraft) -> StoreResult<ContextRecord>;
    async fn update_context(&self, id: Uuid, draft: ContextDraft) -> StoreResult<ContextRecord>;
    async fn delete_context(&self, id: Uuid) -> StoreResult<()>;
}

/// In-process store. Each document sits behind its own map shard lock, so
/// updates by id are atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    subjects: DashMap<Uuid, Subject>,
    questions: DashMap<Uuid, (u64, Question)>,
    contexts: DashMap<Uuid, (u64, ContextRecord)>,
    sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_subjects(&self) -> StoreResult<Vec<Subject>> {
        let mut subjects: Vec<Subject> = self.subjects.iter().map(|s| s.value().clone()).collect();
        subjects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(subjects)
    }

    async fn get_subject(&self, id: Uuid) -> StoreResult<Subject> {
        self.subjects
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("Subject {id}")))
    }

    async fn seed_subject(&self, seed: &SubjectSeed) -> StoreResult<Subject> {
        if seed.name.trim().is_empty() {
            return Err(StoreError::Invalid("subject name is required".to_string()));
        }
        let existing = self
            .subjects
            .iter()
            .find(|s| s.name == seed.name)
            .map(|s| *s.key());
        let subject = Subject {
            id: existing.unwrap_or_else(Uuid::new_v4),
            name: seed.name.clone(),
            display_name: if seed.display_name.is_empty() {
                seed.name.clone()
            } else {
                seed.display_name.clone()
            },
            description: seed.description.clone(),
            subject_rules: seed.subject_rules.clone(),
        };
        self.subjects.insert(subject.id, subject.clone());
        Ok(subject)
    }

    async fn list_questions(&self, subject_id: Option<Uuid>) -> StoreResult<Vec<Question>> {
        let mut entries: Vec<(u64, Question)> = self
            .questions
            .iter()
            .filter(|entry| subject_id.map_or(true, |id| entry.value().1.subject_id == id))
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().map(|(_, q)| q).collect())
    }

    async fn get_question(&self, id: Uuid) -> StoreResult<Question> {
        self.questions
            .get(&id)
            .map(|entry| entry.value().1.clone())
            .ok_or_else(|| StoreError::NotFound(format!("Question {id}")))
    }

    async fn upsert_question(&self, upsert: QuestionUpsert) -> StoreResult<Question> {
        let now = Utc::now();
        let id = upsert.id.unwrap_or_else(Uuid::new_v4);

        match self.questions.entry(id) {
            Entry::Occupied(mut entry) => {
                let question = &mut entry.get_mut().1;
                question.subject_id = upsert.subject_id;
                question.title = upsert.title;
                question.question = upsert.question;
                question.worked_solution = upsert.worked_solution;
                question.question_rules = upsert.question_rules;
                if let Some(code) = upsert.verified_code {
                    question.set_code(code, now);
                }
                question.updated_at = now;
                Ok(question.clone())
            }
            Entry::Vacant(slot) => {
                let mut question = Question {
                    id,
                    subject_id: upsert.subject_id,
                    title: upsert.title,
                    question: upsert.question,
                    worked_solution: upsert.worked_solution,
                    question_rules: upsert.question_rules,
                    verified_code: None,
                    code_verified_at: None,
                    saved_parameterization: None,
                    state: QuestionState::Draft,
                    created_at: now,
                    updated_at: now,
                };
                question.set_code(upsert.verified_code.flatten(), now);
                slot.insert((self.next_sequence(), question.clone()));
                Ok(question)
            }
        }
    }

    async fn delete_question(&self, id: Uuid) -> StoreResult<()> {
        self.questions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("Question {id}")))
    }

    async fn save_verified_code(
        &self,
        id: Uuid,
        code: Option<String>,
        parameterization: Option<Parameterization>,
    ) -> StoreResult<Question> {
        let mut entry = self
            .questions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Question {id}")))?;
        let question = &mut entry.value_mut().1;
        let now = Utc::now();
        question.set_code(code, now);
        if question.verified_code.is_some() {
            if let Some(parameterization) = parameterization {
                question.saved_parameterization = Some(parameterization);
            }
        }
        question.updated_at = now;
        Ok(question.clone())
    }

    async fn list_contexts(&self) -> StoreResult<Vec<ContextRecord>> {
        let mut entries: Vec<(u64, ContextRecord)> =
            self.contexts.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().map(|(_, c)| c).collect())
    }

    async fn get_context(&self, id: Uuid) -> StoreResult<ContextRecord> {
        self.contexts
            .get(&id)
            .map(|e| e.value().1.clone())
            .ok_or_else(|| StoreError::NotFound(format!("Context {id}")))
    }

    async fn create_context(&self, draft: ContextDraft) -> StoreResult<ContextRecord> {
        draft.validate()?;
        let now = Utc::now();
        let record = ContextRecord {
            id: Uuid::new_v4(),
            name: draft.name.trim().to_string(),
            question: draft.question,
            context: draft.context,
            tags: draft.tags,
            description: draft.description,
            created_at: now,
            updated_at: now,
        };
        self.contexts
            .insert(record.id, (self.next_sequence(), record.clone()));
        Ok(record)
    }

    async fn update_context(&self, id: Uuid, draft: ContextDraft) -> StoreResult<ContextRecord> {
        draft.validate()?;
        let mut entry = self
            .contexts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Context {id}")))?;
        let record = &mut entry.value_mut().1;
        record.name = draft.name.trim().to_string();
        record.question = draft.question;
        record.context = draft.context;
        record.tags = draft.tags;
        record.description = draft.description;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete_context(&self, id: Uuid) -> StoreResult<()> {
        self.contexts
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("Context {id}")))
    }
}
