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

use sandbox::{Bindings, CodeRunner, SandboxError};
use std::collections::BTreeMap;

fn inputs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn test_simple_arithmetic_prints_final_answer() {
    let runner = CodeRunner::default();
    let code = "```js\n// What is 2+3*4?\nresult = round3(2 + 3 * 4)\nprint(\"Final answer:\", result, \"\")\n```";

    let outcome = runner.run(code, &Bindings::new(), 7);

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.last_line(), Some("Final answer: 14"));
    let answer = outcome.final_answer().unwrap();
    assert_eq!(answer.value, Some(14.0));
    assert!(answer.units.is_empty());
}

#[test]
fn test_chemistry_calculation_with_bound_inputs() {
    let runner = CodeRunner::default();
    let code = r#"
        // moles of NaCl
        moles = round5(mass / 58.44)
        print("Moles:", moles)
        conc = round3(moles / (volume / 1000))
        print("Final answer:", conc, "mol dm-3")
    "#;
    let values: Bindings = [("mass".to_string(), 5.844), ("volume".to_string(), 250.0)]
        .into_iter()
        .collect();

    let outcome = runner.run_calculation(code, &values);

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.output, vec!["Moles: 0.1", "Final answer: 0.4 mol dm-3"]);
}

#[test]
fn test_division_is_floating_point() {
    let runner = CodeRunner::default();
    let outcome = runner.run("print(1/4, 7 % 4, 2^10)", &Bindings::new(), 0);
    assert_eq!(outcome.output, vec!["0.25 3 1024"]);
}

#[test]
fn test_small_constants_in_scientific_notation() {
    let runner = CodeRunner::default();
    let code = "dose = 2.5e-3 * 4\nka = 1.8e-5\nprint(\"Final answer:\", round3(dose + ka), \"g\")";

    let outcome = runner.run(code, &Bindings::new(), 0);

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.last_line(), Some("Final answer: 0.01 g"));
    assert_eq!(outcome.final_answer().unwrap().value, Some(0.01));

    let values = runner
        .instantiate_inputs(&inputs(&[("ka", "1.8e-5 * 2")]), 3)
        .unwrap();
    assert!((values["ka"] - 3.6e-5).abs() < 1e-12);
}

#[test]
fn test_constant_names_cannot_be_inputs() {
    let runner = CodeRunner::default();
    for name in ["E", "PI", "round3"] {
        let err = runner
            .instantiate_inputs(&inputs(&[(name, "1")]), 1)
            .unwrap_err();
        assert_eq!(err, SandboxError::InvalidName(name.to_string()));
    }
}

#[test]
fn test_instantiation_and_predicate_are_pure_for_a_seed() {
    let runner = CodeRunner::default();
    let exprs = inputs(&[
        ("mass", "round3(10 + random() * 40)"),
        ("volume", "round(100 + random() * 400)"),
        ("temp", "25"),
    ]);
    let predicate = "mass / volume < 0.2 && volume >= 100";

    let first = runner.instantiate_inputs(&exprs, 42).unwrap();
    let second = runner.instantiate_inputs(&exprs, 42).unwrap();
    assert_eq!(first, second);
    assert_eq!(first["temp"], 25.0);
    assert!((10.0..=50.0).contains(&first["mass"]));

    let verdict = runner.evaluate_predicate(predicate, &first).unwrap();
    for _ in 0..5 {
        assert_eq!(runner.evaluate_predicate(predicate, &first).unwrap(), verdict);
    }

    let other = runner.instantiate_inputs(&exprs, 43).unwrap();
    assert_ne!(first, other);
}

#[test]
fn test_non_numeric_input_is_rejected() {
    let runner = CodeRunner::default();
    let err = runner
        .instantiate_inputs(&inputs(&[("label", "\"ten\"")]), 1)
        .unwrap_err();
    assert!(matches!(err, SandboxError::NonNumeric { name, .. } if name == "label"));

    let err = runner
        .instantiate_inputs(&inputs(&[("ratio", "1 / 0")]), 1)
        .unwrap_err();
    assert!(matches!(err, SandboxError::NonNumeric { .. }));
}

#[test]
fn test_runs_do_not_share_state() {
    let runner = CodeRunner::default();
    let first = runner.run("x = 3; print(x)", &Bindings::new(), 0);
    let second = runner.run("print(x)", &Bindings::new(), 0);
    assert!(first.success);
    assert!(!second.success);
    assert!(second.output.is_empty());
}

#[test]
fn test_degenerate_predicate() {
    let runner = CodeRunner::default();
    assert_eq!(runner.evaluate_predicate("true", &Bindings::new()), Ok(true));
    assert_eq!(runner.evaluate_predicate("false", &Bindings::new()), Ok(false));
}
