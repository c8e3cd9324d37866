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

use evalexpr::{eval_with_context_mut, Value};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::answer::{final_answer, FinalAnswer};
use crate::builtins::{display_value, scope, OutputSink, HELPER_NAMES};
use crate::error::{SandboxError, SandboxResult};
use crate::source::{check_reassignment, is_identifier, normalize};

pub type Bindings = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerLimits {
    pub max_source_bytes: usize,
}

impl Default for RunnerLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub success: bool,
    pub output: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutcome {
    fn succeeded(output: Vec<String>) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    fn failed(error: &SandboxError, output: Vec<String>) -> Self {
        Self {
            success: false,
            output,
            error: Some(error.to_string()),
        }
    }

    pub fn final_answer(&self) -> Option<FinalAnswer> {
        final_answer(&self.output)
    }

    pub fn last_line(&self) -> Option<&str> {
        self.output.last().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CodeRunner {
    limits: RunnerLimits,
}

impl CodeRunner {
    pub const fn new(limits: RunnerLimits) -> Self {
        Self { limits }
    }

    pub const fn limits(&self) -> RunnerLimits {
        self.limits
    }

    fn check_size(&self, code: &str) -> SandboxResult<()> {
        if code.len() > self.limits.max_source_bytes {
            return Err(SandboxError::SourceTooLarge {
                size: code.len(),
                limit: self.limits.max_source_bytes,
            });
        }
        Ok(())
    }

    /// Input names must be identifiers that shadow neither a helper nor a constant.
    fn check_names<'a, I>(names: I) -> SandboxResult<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for name in names {
            if !is_identifier(name)
                || HELPER_NAMES.contains(&name.as_str())
                || name == "PI"
                || name == "E"
            {
                return Err(SandboxError::InvalidName(name.clone()));
            }
        }
        Ok(())
    }

    fn evaluate(
        &self,
        code: &str,
        bindings: &Bindings,
        seed: u64,
        sink: &OutputSink,
    ) -> SandboxResult<Value> {
        self.check_size(code)?;
        Self::check_names(bindings.keys())?;

        let source = normalize(code);
        if source.is_empty() {
            return Ok(Value::Empty);
        }

        let random = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        let mut context = scope(Arc::clone(sink), random, bindings)?;
        eval_with_context_mut(&source, &mut context)
            .map_err(|e| SandboxError::Evaluation(e.to_string()))
    }

    fn collect(sink: &OutputSink) -> Vec<String> {
        sink.lock().map(|lines| lines.clone()).unwrap_or_default()
    }

    /// Runs a script with printed lines captured for this call only.
    pub fn run(&self, code: &str, bindings: &Bindings, seed: u64) -> RunOutcome {
        let sink: OutputSink = Arc::new(Mutex::new(Vec::new()));
        let result = self.evaluate(code, bindings, seed, &sink);
        let output = Self::collect(&sink);

        match result {
            Ok(_) => {
                debug!(lines = output.len(), "script completed");
                RunOutcome::succeeded(output)
            }
            Err(e) => {
                debug!(error = %e, lines = output.len(), "script failed");
                RunOutcome::failed(&e, output)
            }
        }
    }

    /// Runs an adapted calculation with inputs bound, refusing scripts that
    /// overwrite any of them.
    pub fn run_calculation(&self, code: &str, bindings: &Bindings) -> RunOutcome {
        if let Err(e) = check_reassignment(&normalize(code), bindings.keys()) {
            debug!(error = %e, "calculation rejected before execution");
            return RunOutcome::failed(&e, Vec::new());
        }
        self.run(code, bindings, 0)
    }

    /// Evaluates an acceptance predicate against bound inputs. Printed output
    /// is discarded and any `random()` call sees a fixed stream.
    pub fn evaluate_predicate(&self, script: &str, bindings: &Bindings) -> SandboxResult<bool> {
        let sink: OutputSink = Arc::new(Mutex::new(Vec::new()));
        match self.evaluate(script, bindings, 0, &sink)? {
            Value::Boolean(accepted) => Ok(accepted),
            other => Err(SandboxError::NonBoolean(if matches!(other, Value::Empty) {
                "nothing".to_string()
            } else {
                display_value(&other)
            })),
        }
    }

    /// Draws one value per input expression, in name order, from a stream
    /// seeded with `seed`.
    pub fn instantiate_inputs(
        &self,
        inputs: &BTreeMap<String, String>,
        seed: u64,
    ) -> SandboxResult<Bindings> {
        Self::check_names(inputs.keys())?;

        let random = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        let sink: OutputSink = Arc::new(Mutex::new(Vec::new()));
        let empty = Bindings::new();
        let mut values = Bindings::new();

        for (name, expression) in inputs {
            self.check_size(expression)?;
            let source = normalize(expression);
            let mut context = scope(Arc::clone(&sink), Arc::clone(&random), &empty)?;
            let value = eval_with_context_mut(&source, &mut context).map_err(|e| {
                SandboxError::NonNumeric {
                    name: name.clone(),
                    detail: e.to_string(),
                }
            })?;

            let number = match value {
                Value::Float(f) => f,
                #[allow(clippy::cast_precision_loss)]
                Value::Int(i) => i as f64,
                other => {
                    return Err(SandboxError::NonNumeric {
                        name: name.clone(),
                        detail: format!("got '{}'", display_value(&other)),
                    })
                }
            };
            if !number.is_finite() {
                return Err(SandboxError::NonNumeric {
                    name: name.clone(),
                    detail: format!("got {number}"),
                });
            }
            values.insert(name.clone(), number);
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, f64)]) -> Bindings {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn test_output_is_captured_in_order() {
        let runner = CodeRunner::default();
        let outcome = runner.run("print(\"a\"); print(\"b\", 2)", &Bindings::new(), 0);
        assert!(outcome.success);
        assert_eq!(outcome.output, vec!["a", "b 2"]);
    }

    #[test]
    fn test_failure_keeps_output_so_far() {
        let runner = CodeRunner::default();
        let outcome = runner.run("print(\"step 1\"); y = missing * 2", &Bindings::new(), 0);
        assert!(!outcome.success);
        assert_eq!(outcome.output, vec!["step 1"]);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn test_builtins_outside_allow_list_are_unavailable() {
        let runner = CodeRunner::default();
        let outcome = runner.run("str::len(\"abc\")", &Bindings::new(), 0);
        assert!(!outcome.success);
    }

    #[test]
    fn test_source_limit() {
        let runner = CodeRunner::new(RunnerLimits { max_source_bytes: 8 });
        let outcome = runner.run("print(\"too long\")", &Bindings::new(), 0);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("limit is 8"));
    }

    #[test]
    fn test_predicate_must_be_boolean() {
        let runner = CodeRunner::default();
        let values = bindings(&[("mass", 4.0)]);
        assert_eq!(runner.evaluate_predicate("mass > 2", &values), Ok(true));
        assert_eq!(runner.evaluate_predicate("mass > 2 && mass < 3;", &values), Ok(false));
        assert!(matches!(
            runner.evaluate_predicate("mass * 2", &values),
            Err(SandboxError::NonBoolean(_))
        ));
    }

    #[test]
    fn test_calculation_cannot_overwrite_inputs() {
        let runner = CodeRunner::default();
        let values = bindings(&[("mass", 4.0)]);
        let outcome = runner.run_calculation("mass = 10\nprint(mass)", &values);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Identifier 'mass' has already been declared")
        );
    }

    #[test]
    fn test_helper_names_cannot_be_inputs() {
        let runner = CodeRunner::default();
        let inputs = BTreeMap::from([("round3".to_string(), "1".to_string())]);
        assert!(matches!(
            runner.instantiate_inputs(&inputs, 1),
            Err(SandboxError::InvalidName(_))
        ));
    }
}
