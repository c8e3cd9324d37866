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

const PREFIX: &str = "final answer:";

/// The `Final answer: <value> <units>` line every calculation ends with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub text: String,
    pub value: Option<f64>,
    pub units: String,
}

impl FinalAnswer {
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        let head = trimmed.get(..PREFIX.len())?;
        if !head.eq_ignore_ascii_case(PREFIX) {
            return None;
        }

        let text = trimmed[PREFIX.len()..].trim().to_string();
        let (first, rest) = text
            .split_once(char::is_whitespace)
            .map_or((text.as_str(), ""), |(a, b)| (a, b));
        let value = first
            .trim_end_matches(',')
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite());
        let units = if value.is_some() {
            rest.trim().to_string()
        } else {
            String::new()
        };

        Some(Self { text, value, units })
    }
}

/// Scans output from the end for the last final-answer line.
pub fn final_answer(output: &[String]) -> Option<FinalAnswer> {
    output.iter().rev().find_map(|line| FinalAnswer::parse(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_and_units() {
        let answer = FinalAnswer::parse("Final answer: 45.3 g").unwrap();
        assert_eq!(answer.value, Some(45.3));
        assert_eq!(answer.units, "g");
        assert_eq!(answer.text, "45.3 g");
    }

    #[test]
    fn test_parse_without_units() {
        let answer = FinalAnswer::parse("Final answer: 14").unwrap();
        assert_eq!(answer.value, Some(14.0));
        assert!(answer.units.is_empty());
    }

    #[test]
    fn test_parse_multiword_units_and_case() {
        let answer = FinalAnswer::parse("  FINAL ANSWER: 0.125 mol dm-3").unwrap();
        assert_eq!(answer.value, Some(0.125));
        assert_eq!(answer.units, "mol dm-3");
    }

    #[test]
    fn test_non_numeric_answer_keeps_text() {
        let answer = FinalAnswer::parse("Final answer: undefined").unwrap();
        assert_eq!(answer.value, None);
        assert_eq!(answer.text, "undefined");
    }

    #[test]
    fn test_last_final_answer_wins() {
        let output = vec![
            "Final answer: 1 g".to_string(),
            "Step 2".to_string(),
            "Final answer: 2 g".to_string(),
            "done".to_string(),
        ];
        assert_eq!(final_answer(&output).unwrap().value, Some(2.0));
        assert!(final_answer(&["nothing".to_string()]).is_none());
    }
}
