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

use evalexpr::{
    Context, ContextWithMutableFunctions, ContextWithMutableVariables, DefaultNumericTypes,
    EvalexprError, Function,
    HashMapContext, Value,
};
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::{Arc, Mutex};

use crate::error::{SandboxError, SandboxResult};

pub type OutputSink = Arc<Mutex<Vec<String>>>;
pub type RandomSource = Arc<Mutex<StdRng>>;

pub const HELPER_NAMES: &[&str] = &[
    "print", "round3", "round5", "round_sf", "to_fixed", "random", "floor", "ceil", "round",
    "abs", "sqrt", "pow", "exp", "ln", "log", "log10", "sin", "cos", "tan", "asin", "acos",
    "atan", "min", "max", "is_finite", "if",
];

/// Rounds to `sf` significant figures, half away from zero, with float noise
/// removed by reparsing an `sf`-digit scientific rendering.
pub fn round_to_sf(value: f64, sf: u32) -> f64 {
    if !value.is_finite() || value == 0.0 {
        return 0.0;
    }
    let sf = sf.clamp(1, 17);
    let magnitude = value.abs().log10().floor();
    let factor = 10f64.powf(f64::from(sf) - magnitude - 1.0);
    let rounded = (value.abs() * factor).round() / factor;
    let cleaned = format!("{:.*e}", (sf - 1) as usize, rounded)
        .parse::<f64>()
        .unwrap_or(rounded);
    cleaned.copysign(value)
}

pub fn to_fixed(value: f64, digits: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{:.*}", digits.min(20) as usize, value)
        .parse::<f64>()
        .unwrap_or(value)
}

/// Renders a number the way a JavaScript console would for the common cases.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        (if value > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
    } else if value == 0.0 {
        "0".to_string()
    } else {
        format!("{value}")
    }
}

pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Float(f) => format_number(*f),
        Value::Int(i) => i.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Tuple(items) => items.iter().map(display_value).collect::<Vec<_>>().join(","),
        Value::Empty => String::new(),
    }
}

fn number(value: &Value) -> Result<f64, EvalexprError> {
    match value {
        Value::Float(f) => Ok(*f),
        #[allow(clippy::cast_precision_loss)]
        Value::Int(i) => Ok(*i as f64),
        other => Err(EvalexprError::CustomMessage(format!(
            "expected a number, found {other}"
        ))),
    }
}

fn arguments(value: &Value) -> Vec<Value> {
    match value {
        Value::Tuple(items) => items.clone(),
        Value::Empty => Vec::new(),
        other => vec![other.clone()],
    }
}

fn numbers(name: &str, value: &Value, arity: usize) -> Result<Vec<f64>, EvalexprError> {
    let args = arguments(value);
    if args.len() != arity {
        return Err(EvalexprError::CustomMessage(format!(
            "{name}() takes {arity} argument(s), got {}",
            args.len()
        )));
    }
    args.iter().map(number).collect()
}

fn digits(name: &str, value: f64, max: u32) -> Result<u32, EvalexprError> {
    if !value.is_finite() || value < 0.0 || value > f64::from(max) {
        return Err(EvalexprError::CustomMessage(format!(
            "{name}() digit count must be between 0 and {max}"
        )));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(value.round() as u32)
}

fn unary(name: &'static str, f: fn(f64) -> f64) -> Function<DefaultNumericTypes> {
    Function::new(move |argument: &Value| {
        let args = numbers(name, argument, 1)?;
        Ok(Value::Float(f(args[0])))
    })
}

fn binary(name: &'static str, f: fn(f64, f64) -> f64) -> Function<DefaultNumericTypes> {
    Function::new(move |argument: &Value| {
        let args = numbers(name, argument, 2)?;
        Ok(Value::Float(f(args[0], args[1])))
    })
}

fn fold(name: &'static str, f: fn(f64, f64) -> f64) -> Function<DefaultNumericTypes> {
    Function::new(move |argument: &Value| {
        let args = arguments(argument)
            .iter()
            .map(number)
            .collect::<Result<Vec<_>, _>>()?;
        args.into_iter()
            .reduce(f)
            .map(Value::Float)
            .ok_or_else(|| EvalexprError::CustomMessage(format!("{name}() needs arguments")))
    })
}

fn js_round(x: f64) -> f64 {
    (x + 0.5).floor()
}

fn print_function(sink: OutputSink) -> Function<DefaultNumericTypes> {
    Function::new(move |argument: &Value| {
        let line = arguments(argument)
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(" ");
        sink.lock()
            .map_err(|_| EvalexprError::CustomMessage("output buffer poisoned".to_string()))?
            .push(line.trim_end().to_string());
        Ok(Value::Empty)
    })
}

fn random_function(source: RandomSource) -> Function<DefaultNumericTypes> {
    Function::new(move |argument: &Value| {
        if !arguments(argument).is_empty() {
            return Err(EvalexprError::CustomMessage(
                "random() takes no arguments".to_string(),
            ));
        }
        let mut rng = source
            .lock()
            .map_err(|_| EvalexprError::CustomMessage("random source poisoned".to_string()))?;
        Ok(Value::Float(rng.gen::<f64>()))
    })
}

fn if_function() -> Function<DefaultNumericTypes> {
    Function::new(|argument: &Value| {
        let args = arguments(argument);
        match args.as_slice() {
            [Value::Boolean(cond), then, otherwise] => Ok(if *cond {
                then.clone()
            } else {
                otherwise.clone()
            }),
            _ => Err(EvalexprError::CustomMessage(
                "if() takes (boolean, value, value)".to_string(),
            )),
        }
    })
}

fn helper_functions(sink: OutputSink, random: RandomSource) -> Vec<(&'static str, Function<DefaultNumericTypes>)> {
    vec![
        ("print", print_function(sink)),
        ("random", random_function(random)),
        ("if", if_function()),
        ("round3", unary("round3", |x| round_to_sf(x, 3))),
        ("round5", unary("round5", |x| round_to_sf(x, 5))),
        (
            "round_sf",
            Function::new(|argument: &Value| {
                let args = numbers("round_sf", argument, 2)?;
                let sf = digits("round_sf", args[1], 17)?;
                Ok(Value::Float(round_to_sf(args[0], sf)))
            }),
        ),
        (
            "to_fixed",
            Function::new(|argument: &Value| {
                let args = numbers("to_fixed", argument, 2)?;
                let places = digits("to_fixed", args[1], 20)?;
                Ok(Value::Float(to_fixed(args[0], places)))
            }),
        ),
        (
            "is_finite",
            Function::new(|argument: &Value| {
                let args = numbers("is_finite", argument, 1)?;
                Ok(Value::Boolean(args[0].is_finite()))
            }),
        ),
        ("floor", unary("floor", f64::floor)),
        ("ceil", unary("ceil", f64::ceil)),
        ("round", unary("round", js_round)),
        ("abs", unary("abs", f64::abs)),
        ("sqrt", unary("sqrt", f64::sqrt)),
        ("exp", unary("exp", f64::exp)),
        ("ln", unary("ln", f64::ln)),
        ("log", unary("log", f64::ln)),
        ("log10", unary("log10", f64::log10)),
        ("sin", unary("sin", f64::sin)),
        ("cos", unary("cos", f64::cos)),
        ("tan", unary("tan", f64::tan)),
        ("asin", unary("asin", f64::asin)),
        ("acos", unary("acos", f64::acos)),
        ("atan", unary("atan", f64::atan)),
        ("pow", binary("pow", f64::powf)),
        ("min", fold("min", f64::min)),
        ("max", fold("max", f64::max)),
    ]
}

fn evaluation_error(e: &EvalexprError) -> SandboxError {
    SandboxError::Evaluation(e.to_string())
}

/// Builds an isolated evaluation scope holding only the allow-listed helpers,
/// the `PI`/`E` constants and the given bindings.
pub fn scope<'a, I>(sink: OutputSink, random: RandomSource, bindings: I) -> SandboxResult<HashMapContext>
where
    I: IntoIterator<Item = (&'a String, &'a f64)>,
{
    let mut context: HashMapContext = HashMapContext::new();
    context
        .set_builtin_functions_disabled(true)
        .map_err(|e| evaluation_error(&e))?;

    for (name, function) in helper_functions(sink, random) {
        context
            .set_function(name.to_string(), function)
            .map_err(|e| evaluation_error(&e))?;
    }

    context
        .set_value("PI".to_string(), Value::Float(std::f64::consts::PI))
        .map_err(|e| evaluation_error(&e))?;
    context
        .set_value("E".to_string(), Value::Float(std::f64::consts::E))
        .map_err(|e| evaluation_error(&e))?;

    for (name, value) in bindings {
        context
            .set_value(name.clone(), Value::Float(*value))
            .map_err(|e| evaluation_error(&e))?;
    }

    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_sf_matches_reference_values() {
        assert_eq!(round_to_sf(14.0, 3), 14.0);
        assert_eq!(round_to_sf(0.012_345, 3), 0.0123);
        assert_eq!(round_to_sf(123_456.0, 3), 123_000.0);
        assert_eq!(round_to_sf(2.6751, 3), 2.68);
        assert_eq!(round_to_sf(-45.349, 3), -45.3);
        assert_eq!(round_to_sf(1.234_567_89, 5), 1.2346);
    }

    #[test]
    fn test_round_to_sf_degenerate_inputs() {
        assert_eq!(round_to_sf(0.0, 3), 0.0);
        assert_eq!(round_to_sf(f64::NAN, 3), 0.0);
        assert_eq!(round_to_sf(f64::INFINITY, 3), 0.0);
    }

    #[test]
    fn test_to_fixed() {
        assert_eq!(to_fixed(45.349, 1), 45.3);
        assert_eq!(to_fixed(52.0, 2), 52.0);
    }

    #[test]
    fn test_format_number_like_console() {
        assert_eq!(format_number(14.0), "14");
        assert_eq!(format_number(45.3), "45.3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_display_tuple_joins_with_commas() {
        let value = Value::Tuple(vec![Value::Float(1.0), Value::String("g".to_string())]);
        assert_eq!(display_value(&value), "1,g");
    }
}
