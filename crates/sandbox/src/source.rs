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

use crate::error::{SandboxError, SandboxResult};

static DECLARATION_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(^|;)[ \t]*(?:let|const|var)[ \t]+").expect("valid regex"));
static ASSIGNMENT_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:^|;)\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:[-+*/%^]|&&|\|\|)?=([^=]|$)")
        .expect("valid regex")
});
static EMPTY_STATEMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r";(\s*;)+").expect("valid regex"));

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Drops Markdown fence lines such as "```js" and the closing "```".
pub fn strip_code_fences(code: &str) -> String {
    code.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scans `\d*(\.\d+)?([eE][+-]?\d+)?` from `start`. Returns the end index and
/// whether the literal already has a fraction or an exponent.
fn scan_number(chars: &[char], start: usize) -> (usize, bool) {
    let digits = |mut i: usize| {
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        i
    };

    let mut end = digits(start);
    let mut is_float = false;
    if chars.get(end) == Some(&'.') && chars.get(end + 1).is_some_and(char::is_ascii_digit) {
        end = digits(end + 1);
        is_float = true;
    }
    if matches!(chars.get(end), Some('e' | 'E')) {
        let mut exp = end + 1;
        if matches!(chars.get(exp), Some('+' | '-')) {
            exp += 1;
        }
        if chars.get(exp).is_some_and(char::is_ascii_digit) {
            end = digits(exp);
            is_float = true;
        }
    }
    (end, is_float)
}

/// Removes comments and rewrites numeric literals so every number is a float.
fn rewrite_tokens(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '"' {
            out.push(c);
            i += 1;
            while i < chars.len() {
                let s = chars[i];
                out.push(s);
                i += 1;
                if s == '\\' {
                    if let Some(&escaped) = chars.get(i) {
                        out.push(escaped);
                        i += 1;
                    }
                } else if s == '"' {
                    break;
                }
            }
            continue;
        }

        if c == '/' && next == Some('/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '/' && next == Some('*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            out.push(' ');
            continue;
        }

        let prev_is_word = out
            .chars()
            .last()
            .is_some_and(|p| p.is_ascii_alphanumeric() || p == '_' || p == '.');

        if c == '.' && !prev_is_word && next.is_some_and(|n| n.is_ascii_digit()) {
            let (end, _) = scan_number(&chars, i);
            out.push('0');
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }

        if c.is_ascii_digit() && !prev_is_word {
            let (end, is_float) = scan_number(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
            let follows_literal = chars
                .get(i)
                .is_some_and(|n| *n == '.' || n.is_ascii_alphabetic() || *n == '_');
            if !is_float && !follows_literal {
                out.push_str(".0");
            }
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

fn ends_statement(line: &str) -> bool {
    line.chars()
        .last()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == ')' || c == '"')
}

fn starts_statement(line: &str) -> bool {
    line.chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

/// Turns generated calculation text into a single evaluable chain.
///
/// Lines that end one statement and begin another without a `;` between
/// them are joined with one, `let`/`const`/`var` prefixes are dropped and
/// trailing separators are trimmed so the chain yields its last value.
pub fn normalize(code: &str) -> String {
    let rewritten = rewrite_tokens(&strip_code_fences(code));
    let rewritten = DECLARATION_KEYWORD.replace_all(&rewritten, "${1} ");

    let lines: Vec<&str> = rewritten
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let mut joined = String::with_capacity(rewritten.len());
    for (idx, line) in lines.iter().enumerate() {
        joined.push_str(line);
        if let Some(next) = lines.get(idx + 1) {
            if ends_statement(line) && starts_statement(next) {
                joined.push(';');
            }
            joined.push('\n');
        }
    }

    let collapsed = EMPTY_STATEMENTS.replace_all(&joined, ";");
    collapsed
        .trim()
        .trim_start_matches(';')
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}

fn blank_strings(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in code.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                out.push('"');
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    out
}

/// Fails if the script assigns to any of the bound input names.
pub fn check_reassignment<'a, I>(normalized: &str, bound: I) -> SandboxResult<()>
where
    I: IntoIterator<Item = &'a String>,
{
    let bound: Vec<&String> = bound.into_iter().collect();
    if bound.is_empty() {
        return Ok(());
    }

    let code = blank_strings(normalized);
    for caps in ASSIGNMENT_TARGET.captures_iter(&code) {
        let name = &caps[1];
        if bound.iter().any(|b| b.as_str() == name) {
            return Err(SandboxError::Redeclaration(name.to_string()));
        }
    }
    Ok(())
}
