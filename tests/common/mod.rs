//! Shared fixtures for integration tests.

#![allow(dead_code)]

use serde_json::{Value, json};

use loomflow::step::{Step, StepOutcome};

pub fn number_schema() -> Value {
    json!({"type": "number"})
}

pub fn number_array_schema() -> Value {
    json!({"type": "array", "items": {"type": "number"}})
}

pub fn pair_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
        "required": ["a", "b"],
    })
}

/// `{a, b} -> a + b`
pub fn add_step() -> Step {
    Step::builder("add")
        .input_schema(pair_schema())
        .output_schema(number_schema())
        .handler(|ctx| async move {
            let a = ctx.input_data["a"].as_f64().unwrap_or_default();
            let b = ctx.input_data["b"].as_f64().unwrap_or_default();
            Ok(StepOutcome::Complete(json!(a + b)))
        })
        .build()
        .unwrap()
}

/// `sum -> sum * init.a * init.b`
pub fn multiply_by_init_step() -> Step {
    Step::builder("multiply")
        .input_schema(number_schema())
        .output_schema(number_schema())
        .handler(|ctx| async move {
            let sum = ctx.input_data.as_f64().unwrap_or_default();
            let init = ctx.init_data();
            let a = init["a"].as_f64().unwrap_or_default();
            let b = init["b"].as_f64().unwrap_or_default();
            Ok(StepOutcome::Complete(json!(sum * a * b)))
        })
        .build()
        .unwrap()
}

/// `x -> x * factor`
pub fn scale_step(id: &str, factor: f64) -> Step {
    Step::builder(id)
        .input_schema(number_schema())
        .output_schema(number_schema())
        .handler(move |ctx| async move {
            let x = ctx.input_data.as_f64().unwrap_or_default();
            Ok(StepOutcome::Complete(json!(x * factor)))
        })
        .build()
        .unwrap()
}

/// Sums the outputs of the named peer steps.
pub fn sum_of_steps(id: &str, sources: &[&str]) -> Step {
    let sources: Vec<String> = sources.iter().map(|s| (*s).to_string()).collect();
    Step::builder(id)
        .output_schema(number_schema())
        .handler(move |ctx| {
            let sources = sources.clone();
            async move {
                let total: f64 = sources
                    .iter()
                    .filter_map(|source| ctx.get_step_result(source))
                    .filter_map(|value| value.as_f64().or_else(|| value["result"].as_f64()))
                    .sum();
                Ok(StepOutcome::Complete(json!(total)))
            }
        })
        .build()
        .unwrap()
}

/// Suspends with `{reason: "negative_value"}` when `value < 0`; on resume
/// with `{continue: true, value}` completes with `{result: value * factor}`.
pub fn suspendable_step(id: &str, factor: f64) -> Step {
    Step::builder(id)
        .input_schema(json!({
            "type": "object",
            "properties": {"value": {"type": "number"}},
            "required": ["value"],
        }))
        .resume_schema(json!({
            "type": "object",
            "properties": {"continue": {"type": "boolean"}, "value": {"type": "number"}},
            "required": ["continue"],
        }))
        .suspend_schema(json!({
            "type": "object",
            "properties": {"reason": {"type": "string"}},
            "required": ["reason"],
        }))
        .handler(move |ctx| async move {
            if ctx.is_resuming() {
                let resume = ctx.resume_data().cloned().unwrap_or_default();
                let value = resume["value"].as_f64().unwrap_or_default();
                return Ok(StepOutcome::Complete(json!({"result": value * factor})));
            }
            let value = ctx.input_data["value"].as_f64().unwrap_or_default();
            if value < 0.0 {
                return ctx.suspend(json!({"reason": "negative_value"}));
            }
            Ok(StepOutcome::Complete(json!({"result": value * factor})))
        })
        .build()
        .unwrap()
}
