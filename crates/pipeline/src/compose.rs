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

use llm_contracts::{Backend, CompletionRequest, Message, ModelSelector, Usage};
use once_cell::sync::Lazy;
use providers::CompletionService;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::json::parse_lenient;
use crate::model::{ProblemContext, Run};
use crate::prompts::{compose_prompt, compose_schema};

static QUESTION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)(?:^\s*\**\s*question\s+\d+\s*[:.)]?|^\s*\**\s*q\d+\s*[:.)]|^\s*\d+[.)]\s)")
        .expect("valid regex")
});
static SOLUTION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\**\s*(?:worked\s+)?(?:solution|answer)\s*\**\s*:").expect("valid regex")
});
static NUMBER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?").expect("valid regex"));

const COMPOSE_SYSTEM: &str =
    "You write exam questions with worked solutions from supplied calculation runs. Never invent numbers.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaItem {
    pub question: String,
    #[serde(alias = "worked_solution", alias = "solution", default)]
    pub worked_solution: String,
}

pub struct ComposeRequest<'a> {
    pub problem: &'a ProblemContext,
    pub code: &'a str,
    pub runs: &'a [Run],
    pub n: Option<usize>,
    pub model: Option<ModelSelector>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeOutcome {
    pub items: Vec<QaItem>,
    pub count: usize,
    pub runs_used: usize,
    pub warnings: Vec<String>,
    pub expected_answers: Vec<String>,
    pub raw: String,
    #[serde(skip)]
    pub usage: Usage,
}

pub struct Composer {
    service: Arc<dyn CompletionService>,
    default_model: ModelSelector,
}

impl Composer {
    pub fn new(service: Arc<dyn CompletionService>, default_model: ModelSelector) -> Self {
        Self {
            service,
            default_model,
        }
    }

    pub async fn compose(&self, request: ComposeRequest<'_>) -> PipelineResult<ComposeOutcome> {
        request
            .problem
            .require_question()
            .map_err(PipelineError::InvalidInput)?;
        if request.runs.is_empty() {
            return Err(PipelineError::InvalidInput(
                "At least one validated run is required".to_string(),
            ));
        }

        let count = request
            .n
            .filter(|n| *n > 0)
            .map_or(request.runs.len(), |n| n.min(request.runs.len()));
        let runs = &request.runs[..count];
        let selector = request.model.unwrap_or_else(|| self.default_model.clone());
        let backend = selector.backend;

        let (max_tokens, temperature) = match backend {
            Backend::Groq => (8192, 1.0),
            Backend::OpenAI => (4000, 0.7),
        };
        let completion = CompletionRequest::new(
            selector,
            vec![
                Message::system(COMPOSE_SYSTEM),
                Message::user(compose_prompt(request.problem, request.code, runs)),
            ],
        )
        .with_schema(compose_schema())
        .with_max_tokens(max_tokens)
        .with_temperature(temperature);

        let response = self.service.complete(completion).await?;

        let mut items = match parse_items(&response.content) {
            Some(items) if !items.is_empty() => items,
            _ if !backend.supports_response_schema() => {
                debug!("compose reply was not JSON, splitting plain text");
                parse_questions_from_text(&response.content)
            }
            _ => Vec::new(),
        };
        if items.is_empty() {
            return Err(PipelineError::Parse(
                "Failed to parse generated questions".to_string(),
            ));
        }
        if items.len() > count {
            debug!(received = items.len(), count, "truncating extra items");
            items.truncate(count);
        }

        let mut warnings = trace_warnings(&items, runs);
        if items.len() < count {
            warnings.push(format!(
                "Expected {count} questions but received {}",
                items.len()
            ));
        }

        let expected_answers = runs
            .iter()
            .take(items.len())
            .enumerate()
            .map(|(i, run)| format!("Question {} should have final answer: {}", i + 1, run.final_display()))
            .collect();

        info!(
            items = items.len(),
            count,
            warnings = warnings.len(),
            "questions composed"
        );

        Ok(ComposeOutcome {
            count: items.len(),
            runs_used: count,
            items,
            warnings,
            expected_answers,
            raw: response.content,
            usage: response.usage,
        })
    }
}

fn parse_items(content: &str) -> Option<Vec<QaItem>> {
    let value: Value = parse_lenient(content).ok()?;
    let list = match value {
        Value::Object(mut map) => map.remove("items")?,
        array @ Value::Array(_) => array,
        _ => return None,
    };
    let items: Vec<QaItem> = serde_json::from_value(list).ok()?;
    Some(
        items
            .into_iter()
            .filter(|item| !item.question.trim().is_empty())
            .collect(),
    )
}

fn split_at_char(text: &str, chars: usize) -> (&str, &str) {
    let idx = text.char_indices().nth(chars).map_or(text.len(), |(i, _)| i);
    text.split_at(idx)
}

/// Recovers question/solution pairs from prose that uses "Question N" style
/// headings.
pub fn parse_questions_from_text(text: &str) -> Vec<QaItem> {
    let starts: Vec<(usize, usize)> = QUESTION_MARKER
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();

    let mut items = Vec::new();
    for (i, (_, body_start)) in starts.iter().enumerate() {
        let body_end = starts.get(i + 1).map_or(text.len(), |(start, _)| *start);
        let chunk = text[*body_start..body_end].trim();
        if chunk.is_empty() {
            continue;
        }

        let (question, solution) = match SOLUTION_MARKER.find(chunk) {
            Some(marker) => (&chunk[..marker.start()], &chunk[marker.end()..]),
            None if chunk.chars().count() > 50 => split_at_char(chunk, chunk.chars().count() / 2),
            None => (chunk, ""),
        };

        let question = question.trim().trim_matches('*').trim();
        if question.is_empty() {
            continue;
        }
        items.push(QaItem {
            question: question.to_string(),
            worked_solution: solution.trim().to_string(),
        });
    }
    items
}

fn mentions_value(text: &str, tokens: &[f64], value: f64) -> bool {
    let tolerance = 1e-9 * value.abs().max(1.0);
    if tokens.iter().any(|t| (t - value).abs() <= tolerance) {
        return true;
    }
    (1..=2).any(|digits: usize| text.contains(&format!("{value:.digits$}")))
}

/// Item i must mention at least one parameter of run i.
pub fn trace_warnings(items: &[QaItem], runs: &[Run]) -> Vec<String> {
    let mut warnings = Vec::new();
    for (i, (item, run)) in items.iter().zip(runs).enumerate() {
        if run.params.is_empty() {
            continue;
        }
        let tokens: Vec<f64> = NUMBER_TOKEN
            .find_iter(&item.question)
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        let traced = run
            .params
            .values()
            .any(|value| mentions_value(&item.question, &tokens, *value));
        if !traced {
            warn!(question = i + 1, "question does not mention its run's parameters");
            warnings.push(format!(
                "Question {} may not be using the correct parameter values from Run {}",
                i + 1,
                i + 1
            ));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn run(mass: f64, final_value: f64) -> Run {
        Run {
            params: BTreeMap::from([("mass".to_string(), mass)]),
            final_value: Some(final_value),
            final_text: String::new(),
            logs: Vec::new(),
        }
    }

    #[test]
    fn test_items_key_or_bare_array() {
        let wrapped = parse_items(r#"{"items": [{"question": "Q1", "workedSolution": "S1"}]}"#);
        assert_eq!(wrapped.unwrap()[0].worked_solution, "S1");

        let bare = parse_items(r#"[{"question": "Q1", "worked_solution": "S1"}]"#);
        assert_eq!(bare.unwrap().len(), 1);
    }

    #[test]
    fn test_trace_is_tolerant_to_trailing_zeros() {
        let items = vec![QaItem {
            question: "A sample of 45.30 g is heated.".to_string(),
            worked_solution: String::new(),
        }];
        assert!(trace_warnings(&items, &[run(45.3, 1.0)]).is_empty());
    }

    #[test]
    fn test_trace_accepts_rounded_values() {
        let items = vec![QaItem {
            question: "A sample of 3.46 g is heated.".to_string(),
            worked_solution: String::new(),
        }];
        assert!(trace_warnings(&items, &[run(3.4567, 1.0)]).is_empty());
    }

    #[test]
    fn test_trace_checks_each_item_against_its_own_run() {
        let items = vec![
            QaItem {
                question: "Use 52.1 g.".to_string(),
                worked_solution: String::new(),
            },
            QaItem {
                question: "Use 45.3 g.".to_string(),
                worked_solution: String::new(),
            },
        ];
        let warnings = trace_warnings(&items, &[run(45.3, 1.0), run(52.1, 2.0)]);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("Question 1"));
    }

    #[test]
    fn test_plain_text_questions() {
        let text = "Question 1: What mass of salt forms from 4.2 g of acid?\nSolution: Step 1 ...\n\nQuestion 2: How many moles are in 10 g?\nSolution: 10 / 40 = 0.25";
        let items = parse_questions_from_text(text);
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].question, "How many moles are in 10 g?");
        assert_eq!(items[1].worked_solution, "10 / 40 = 0.25");
    }
}
