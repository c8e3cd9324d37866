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

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

static COMMENT_KEYS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#",\s*"//[^"]*":\s*"[^"]*""#).expect("valid regex"));
static TRAILING_COMMAS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("valid regex"));

pub fn extract_code_blocks(text: &str) -> Vec<(Option<String>, String)> {
    let mut code_blocks = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        if let Some(lang_str) = line.trim().strip_prefix("```") {
            let language = Some(lang_str.trim().to_string()).filter(|l| !l.is_empty());

            let mut code_content = String::new();
            for code_line in lines.by_ref() {
                if code_line.trim().starts_with("```") {
                    break;
                }
                if !code_content.is_empty() {
                    code_content.push('\n');
                }
                code_content.push_str(code_line);
            }
            code_blocks.push((language, code_content));
        }
    }
    code_blocks
}

fn find_json_delimiters(text: &str, start_char: char, end_char: char) -> Option<&str> {
    let mut balance = 0usize;
    let mut start_index = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch == '"' && start_index.is_some() {
            in_string = true;
        } else if ch == start_char {
            if balance == 0 {
                start_index = Some(i);
            }
            balance += 1;
        } else if ch == end_char && balance > 0 {
            balance -= 1;
            if balance == 0 {
                if let Some(start) = start_index {
                    return Some(&text[start..=i]);
                }
            }
        }
    }
    None
}

/// Finds a JSON document in model output: the whole text, a fenced block,
/// or the first balanced object/array embedded in prose.
pub fn extract_json_from_text(text: &str) -> Option<Value> {
    if let Ok(json_val) = serde_json::from_str::<Value>(text.trim()) {
        return Some(json_val);
    }

    for (language, code_content) in extract_code_blocks(text) {
        if language.as_deref() == Some("json") || language.is_none() {
            if let Ok(json_val) = serde_json::from_str::<Value>(&code_content) {
                debug!("Extracted JSON from markdown code fence");
                return Some(json_val);
            }
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(candidate) = find_json_delimiters(text, open, close) {
            if let Ok(val) = serde_json::from_str(candidate) {
                debug!("Extracted embedded JSON from text");
                return Some(val);
            }
            warn!("Found JSON-like substring, but it failed to parse");
        }
    }

    None
}

/// Strips `"//...": "..."` comment entries and trailing commas.
pub fn repair_json(text: &str) -> String {
    let without_comments = COMMENT_KEYS.replace_all(text, "");
    TRAILING_COMMAS.replace_all(&without_comments, "$1").into_owned()
}

/// Strict parse, then a single repair pass, then extraction from prose.
pub fn parse_lenient<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let first_error = match serde_json::from_str::<T>(text.trim()) {
        Ok(parsed) => return Ok(parsed),
        Err(e) => e.to_string(),
    };

    let repaired = repair_json(text);
    if let Ok(parsed) = serde_json::from_str::<T>(repaired.trim()) {
        debug!("Parsed JSON after repair");
        return Ok(parsed);
    }

    extract_json_from_text(&repaired)
        .and_then(|value| serde_json::from_value(value).ok())
        .ok_or(first_error)
}

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_json_object_from_prose() {
        let text = r#"Here you go {"key": "value", "note": "a } brace"} thanks"#;
        assert_eq!(
            extract_json_from_text(text),
            Some(json!({"key": "value", "note": "a } brace"}))
        );
    }

    #[test]
    fn test_extract_json_from_fence() {
        let text = "```json\n{\"code\": \"x = 1\"}\n```";
        assert_eq!(extract_json_from_text(text), Some(json!({"code": "x = 1"})));
    }

    #[test]
    fn test_plain_text_has_no_json() {
        assert_eq!(extract_json_from_text("just words"), None);
    }

    #[test]
    fn test_repair_removes_comment_keys_and_trailing_commas() {
        let broken = r#"{"inputs": {"mass": "10", "// note": "ignore me",}, "eval": "true",}"#;
        let repaired = repair_json(broken);
        assert_eq!(
            serde_json::from_str::<Value>(&repaired).unwrap(),
            json!({"inputs": {"mass": "10"}, "eval": "true"})
        );
    }

    #[test]
    fn test_parse_lenient_reports_original_error() {
        let result = parse_lenient::<Value>("not json at all");
        assert!(result.unwrap_err().contains("expected"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("cm³ of acid", 3), "cm³");
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
