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

use llm_contracts::ResponseSchema;
use serde_json::json;
use std::fmt::Write as _;

use crate::json::truncate_chars;
use crate::model::{or_not_provided, AttemptRecord, Parameterization, ProblemContext, Run};

pub const RUN_LOG_CHARS: usize = 2000;
pub const COMPOSE_CODE_CHARS: usize = 12000;
pub const COMPOSE_SOLUTION_CHARS: usize = 8000;

const SCRIPT_DIALECT: &str = r#"CALCULATION SCRIPT DIALECT
- Statements are separated by ";". Assign with name = expression. No loops, no function definitions, no "let"/"const".
- All numbers are floating point. Operators: + - * / % ^ (power), comparisons, && || !.
- Strings use double quotes. print(a, b, ...) writes one output line, arguments joined by a space.
- Available helpers ONLY: round5(x), round3(x), round_sf(x, n), to_fixed(x, k), random() in [0,1),
  floor, ceil, round, abs, sqrt, pow(x, y), exp, ln, log (natural), log10, sin, cos, tan, asin, acos, atan,
  min(...), max(...), is_finite(x), if(condition, a, b). Constants PI and E."#;

fn rules_block(problem: &ProblemContext) -> String {
    format!(
        "QUESTION:\n{}\n\nWORKED SOLUTION:\n{}\n\nSUBJECT RULES:\n{}\n\nQUESTION RULES:\n{}",
        problem.question,
        or_not_provided(&problem.worked_solution),
        or_not_provided(&problem.subject_rules),
        or_not_provided(&problem.question_rules),
    )
}

pub fn code_schema() -> ResponseSchema {
    ResponseSchema::new(
        "code_generation_response",
        json!({
            "type": "object",
            "properties": { "code": { "type": "string" } },
            "required": ["code"],
            "additionalProperties": false
        }),
    )
}

pub fn code_prompt(problem: &ProblemContext, previous_failure: Option<(&str, &str)>) -> String {
    let mut prompt = format!(
        "Convert this worked solution into a calculation script that performs the same calculations.\n\n{}\n\n{SCRIPT_DIALECT}\n\n\
REQUIREMENTS (STRICT ADHERENCE TO RULES):\n\
1. print() every calculation step.\n\
2. Every intermediate value printed MUST come from round5() (five significant figures).\n\
3. The final result MUST come from round3() and be printed exactly as: print(\"Final answer:\", finalResult, \"<units>\")\n\
   - <units> must match the worked solution or subject rules; use \"\" when the answer has no units.\n\
4. STRICTLY follow the SUBJECT RULES for constants, units, precision and formatting.\n\
5. Use variable names consistent with the worked solution.\n\n\
Return STRICT JSON with this exact shape (no markdown): {{ \"code\": string }}",
        rules_block(problem)
    );

    if let Some((code, error)) = previous_failure {
        let _ = write!(
            prompt,
            "\n\nThe previous script failed with error: {error}\nPREVIOUS SCRIPT:\n{code}\nGenerate corrected code."
        );
    }
    prompt
}

pub fn verify_schema() -> ResponseSchema {
    ResponseSchema::new(
        "verification_response",
        json!({
            "type": "object",
            "properties": {
                "verdict": { "type": "string", "enum": ["pass", "fail"] },
                "reason": { "type": "string" }
            },
            "required": ["verdict", "reason"],
            "additionalProperties": false
        }),
    )
}

pub fn verify_prompt(problem: &ProblemContext, code: &str, output: &[String]) -> String {
    format!(
        "Verify if this code execution matches the expected worked solution.\n\n\
ORIGINAL WORKED SOLUTION:\n{}\n\nGENERATED CODE:\n{code}\n\nCODE OUTPUT:\n{}\n\nSUBJECT RULES: {}\n\n\
Compare the code output with the worked solution and determine if the calculation is correct and follows the subject rules.\n\n\
Respond STRICTLY in JSON with this shape (no markdown): {{ \"verdict\": \"pass\" | \"fail\", \"reason\": \"one sentence reason\" }}",
        or_not_provided(&problem.worked_solution),
        output.join("\n"),
        or_not_provided(&problem.subject_rules),
    )
}

pub fn parameterization_schema() -> ResponseSchema {
    ResponseSchema::new(
        "parameterization_response",
        json!({
            "type": "object",
            "properties": {
                "inputs": { "type": "object", "additionalProperties": { "type": "string" } },
                "eval": { "type": "string" },
                "calculation": { "type": "string" },
                "reasons": { "type": "string" }
            },
            "required": ["inputs", "eval", "calculation", "reasons"],
            "additionalProperties": false
        }),
    )
}

pub fn parameterization_prompt(problem: &ProblemContext, code: &str) -> String {
    format!(
        "Analyze ORIGINAL CODE and return STRICT JSON:\n\
{{\n  \"inputs\": {{ \"<name>\": \"<expression using random()>\" }},\n  \"eval\": \"<predicate script whose last expression is true or false>\",\n  \
\"calculation\": \"<ORIGINAL CODE adapted to reference the inputs by name, never assigning to them>\",\n  \
\"reasons\": \"<bullet list, one line per check, each starting with '- '>\"\n}}\n\n{SCRIPT_DIALECT}\n\n\
CONSTRAINTS\n\
- Numeric values assigned in ORIGINAL CODE become randomized inputs, using their EXACT variable names.\n\
- Keep constants from SUBJECT RULES fixed inside the calculation.\n\
- Ranges: real in [a,b] is (a + random()*(b - a)); integer in [a,b] is floor(a + random()*(b - a + 1)); use to_fixed(x, k) only to match recorded precision.\n\
- eval sees every input bound by name and must recompute the final value from them; it cannot read printed output.\n\
- If QUESTION RULES give an acceptance band, test the recomputed value against it; otherwise return is_finite(<recomputed value>).\n\
- Do not invent thresholds that the rules do not state.\n\n\
ORIGINAL CODE:\n{code}\n\n{}",
        rules_block(problem)
    )
}

pub fn plan_schema() -> ResponseSchema {
    ResponseSchema::new(
        "planning_response",
        json!({
            "type": "object",
            "properties": {
                "plan": { "type": "array", "items": { "type": "string" }, "minItems": 1 },
                "alternatives": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "inputs": { "type": "object", "additionalProperties": { "type": "string" } }
                        },
                        "required": ["name", "inputs"],
                        "additionalProperties": false
                    },
                    "minItems": 3,
                    "maxItems": 3
                }
            },
            "required": ["plan", "alternatives"],
            "additionalProperties": false
        }),
    )
}

fn error_analysis(last_error: &str) -> &'static str {
    if last_error.contains("parameters failed validation") {
        "VALIDATION FAILURE: generated values do not satisfy the eval predicate. Work out which relationships eval \
enforces (ranges, ratios, derived bounds) and target them instead of simply widening ranges."
    } else if last_error.contains("already been declared") {
        "NAMING CONFLICT: the calculation assigns to a name that is also an input. Inputs must use the exact names the \
calculation reads but never writes."
    } else {
        "UNKNOWN ERROR: analyse the error message and determine the root cause."
    }
}

pub fn plan_prompt(
    problem: &ProblemContext,
    code: &str,
    current: &Parameterization,
    previous_attempts: &[AttemptRecord],
    last_error: Option<&str>,
) -> String {
    let inputs = serde_json::to_string_pretty(&current.inputs).unwrap_or_default();
    let mut prompt = format!(
        "You are improving random input expressions for a numerical question generator.\n\n{}\n\n\
ORIGINAL CODE:\n{code}\n\nCURRENT PARAMETERIZATION:\n- inputs:\n{inputs}\n- eval:\n{}\n- reasons:\n{}\n\n{SCRIPT_DIALECT}\n",
        rules_block(problem),
        current.eval,
        current.reasons,
    );

    if let Some(error) = last_error {
        let _ = write!(
            prompt,
            "\nLAST ERROR ENCOUNTERED:\n{error}\n\nERROR ANALYSIS:\n{}\n",
            error_analysis(error)
        );
    }

    if !previous_attempts.is_empty() {
        prompt.push_str("\nPREVIOUS ATTEMPTS:\n");
        for attempt in previous_attempts {
            let _ = writeln!(
                prompt,
                "Attempt {}: generated {}/{} runs, {}",
                attempt.attempt,
                attempt.runs_generated,
                attempt.target_runs,
                if attempt.success { "succeeded" } else { "failed" }
            );
            let _ = writeln!(
                prompt,
                "- inputs: {}",
                serde_json::to_string(&attempt.inputs).unwrap_or_default()
            );
            if let Some(plan) = &attempt.plan {
                let _ = writeln!(prompt, "- plan: {}", plan.join("; "));
            }
            if let Some(error) = &attempt.error {
                let _ = writeln!(prompt, "- error: {error}");
            }
            if let Some(error) = &attempt.planner_error {
                let _ = writeln!(prompt, "- planner failed: {error}");
            }
        }
        let _ = writeln!(
            prompt,
            "This is planning round {}. Learn from the history instead of repeating ranges that failed.",
            previous_attempts.len() + 1
        );
    }

    prompt.push_str(
        "\nTASK:\n\
1) Analyse what makes eval return true.\n\
2) Identify why the current ranges fail.\n\
3) Propose 3 alternative input sets that satisfy eval, using the EXACT names the calculation and eval reference (no prefixes).\n\
4) Include every variable eval references, even when it is a fixed constant.\n\n\
OUTPUT (STRICT JSON only):\n\
{ \"plan\": [string], \"alternatives\": [ { \"name\": string, \"inputs\": { \"<name>\": \"<expression>\" } } ] }",
    );
    prompt
}

pub fn compose_schema() -> ResponseSchema {
    ResponseSchema::new(
        "qa_generation_response",
        json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "question": { "type": "string" },
                            "workedSolution": { "type": "string" }
                        },
                        "required": ["question", "workedSolution"],
                        "additionalProperties": false
                    },
                    "minItems": 1
                }
            },
            "required": ["items"],
            "additionalProperties": false
        }),
    )
}

pub fn runs_block(runs: &[Run]) -> String {
    runs.iter()
        .enumerate()
        .map(|(i, run)| {
            let logs = run.logs.join("\n");
            format!(
                "Run {}: {} → Final: {}\nLogs (truncated):\n{}",
                i + 1,
                serde_json::to_string(&run.params).unwrap_or_default(),
                run.final_display(),
                truncate_chars(&logs, RUN_LOG_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn compose_prompt(problem: &ProblemContext, code: &str, runs: &[Run]) -> String {
    let count = runs.len();
    format!(
        "Generate {count} different exam questions and answers based on these calculation runs.\n\n\
CRITICAL DATA USAGE RULES:\n\
- Item i MUST use the EXACT parameter values of Run i and nothing else.\n\
- The final answer of item i MUST match the Final value of Run i.\n\
- Do NOT create new numbers.\n\n\
VERIFIED CALCULATION CODE (reference this logic; do not invent a new method):\n--- BEGIN CODE ---\n{}\n--- END CODE ---\n\n\
AUTHORITATIVE WORKED SOLUTION STYLE (mirror its structure, adapt numbers per run):\n--- BEGIN WORKED SOLUTION ---\n{}\n--- END WORKED SOLUTION ---\n\n\
BASE QUESTION: {}\nSUBJECT RULES (MUST FOLLOW): {}\nQUESTION RULES (MUST FOLLOW): {}\n\n\
CALCULATION RUNS:\n{}\n\n\
FORMAT:\n\
- Vary context and wording between questions but keep the calculation method.\n\
- Worked solutions start with \"Data provided:\", use numbered steps, keep intermediates to 5 s.f. and finals to 3 s.f., and end with a line starting \"Answer:\".\n\
- ASCII math only (cm^3, mol dm^-3); use \"\\n\" between steps; no LaTeX or HTML.\n\n\
OUTPUT FORMAT (STRICT JSON ONLY):\n{{ \"items\": [ {{ \"question\": string, \"workedSolution\": string }} ] }}\n\n\
Generate exactly {count} items.",
        truncate_chars(code, COMPOSE_CODE_CHARS),
        truncate_chars(&problem.worked_solution, COMPOSE_SOLUTION_CHARS),
        problem.question,
        or_not_provided(&problem.subject_rules),
        or_not_provided(&problem.question_rules),
        runs_block(runs),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_missing_context_is_marked_not_provided() {
        let prompt = code_prompt(&ProblemContext::new("What is 2+3*4?"), None);
        assert!(prompt.contains("What is 2+3*4?"));
        assert!(prompt.contains("WORKED SOLUTION:\nNot provided"));
        assert!(!prompt.contains("previous script failed"));
    }

    #[test]
    fn test_retry_prompt_carries_error() {
        let prompt = code_prompt(
            &ProblemContext::new("q"),
            Some(("x = y", "Variable identifier is not bound")),
        );
        assert!(prompt.contains("Variable identifier is not bound"));
        assert!(prompt.contains("PREVIOUS SCRIPT:\nx = y"));
    }

    #[test]
    fn test_plan_prompt_branches_on_error_kind() {
        let current = Parameterization {
            inputs: BTreeMap::from([("mass".to_string(), "1 + random()".to_string())]),
            eval: "mass > 5".to_string(),
            calculation: String::new(),
            reasons: String::new(),
        };
        let validation = plan_prompt(
            &ProblemContext::new("q"),
            "print(mass)",
            &current,
            &[],
            Some("parameters failed validation: 24/24 samples rejected"),
        );
        assert!(validation.contains("VALIDATION FAILURE"));

        let naming = plan_prompt(
            &ProblemContext::new("q"),
            "print(mass)",
            &current,
            &[],
            Some("Identifier 'mass' has already been declared"),
        );
        assert!(naming.contains("NAMING CONFLICT"));
    }

    #[test]
    fn test_runs_block_truncates_logs() {
        let run = Run {
            params: BTreeMap::from([("mass".to_string(), 3.4)]),
            final_value: Some(45.3),
            final_text: "45.3 %".to_string(),
            logs: vec!["x".repeat(RUN_LOG_CHARS + 500)],
        };
        let block = runs_block(&[run]);
        assert!(block.starts_with("Run 1: {\"mass\":3.4} → Final: 45.3 %"));
        assert!(block.len() < RUN_LOG_CHARS + 200);
    }
}
