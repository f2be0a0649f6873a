//! Input and output normalization for function steps.
//!
//! A function step sees exactly one of two shapes: a text value (blocking
//! functions) or a structured value (suspending functions). Whatever it
//! returns comes back as text so any downstream step can consume it.

use serde_json::{Map, Value};
use tracing::debug;

use scholarflow_shared::StepResult;

use crate::step::NamedInputs;

/// What the adapter derived from the predecessor and named inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum AdaptedInput {
    Structured(Value),
    Text(String),
    Absent,
}

/// Named inputs win over the predecessor. One named input stands in for the
/// predecessor; several are combined into an object keyed by name.
pub fn derive_input(step: &str, previous: &StepResult, named: &NamedInputs) -> AdaptedInput {
    match named.len() {
        0 => from_result(step, previous),
        1 => named
            .values()
            .next()
            .map(|result| from_result(step, result))
            .unwrap_or(AdaptedInput::Absent),
        _ => {
            let object: Map<String, Value> = named
                .iter()
                .map(|(name, result)| (name.clone(), to_value(step, result)))
                .collect();
            AdaptedInput::Structured(Value::Object(object))
        }
    }
}

fn from_result(step: &str, result: &StepResult) -> AdaptedInput {
    match result {
        StepResult::Data(Value::Null) => AdaptedInput::Absent,
        StepResult::Data(value) => AdaptedInput::Structured(value.clone()),
        StepResult::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return AdaptedInput::Absent;
            }
            if !trimmed.starts_with('{') {
                return AdaptedInput::Text(text.clone());
            }
            match serde_json::from_str(trimmed) {
                Ok(value) => AdaptedInput::Structured(value),
                Err(e) => {
                    debug!(step, error = %e, "object-like text did not parse, passing as text");
                    AdaptedInput::Text(text.clone())
                }
            }
        }
    }
}

fn to_value(step: &str, result: &StepResult) -> Value {
    match from_result(step, result) {
        AdaptedInput::Structured(value) => value,
        AdaptedInput::Text(text) => Value::String(text),
        AdaptedInput::Absent => Value::Null,
    }
}

/// Shape for a blocking function: structured values are serialized.
pub fn text_input(input: AdaptedInput) -> String {
    match input {
        AdaptedInput::Structured(Value::String(text)) | AdaptedInput::Text(text) => text,
        AdaptedInput::Structured(value) => value.to_string(),
        AdaptedInput::Absent => String::new(),
    }
}

/// Shape for a suspending function: anything that is not structured becomes `{}`.
pub fn structured_input(step: &str, input: AdaptedInput) -> Value {
    match input {
        AdaptedInput::Structured(value) => value,
        AdaptedInput::Text(_) => {
            debug!(step, "free-text input replaced by empty object");
            Value::Object(Map::new())
        }
        AdaptedInput::Absent => Value::Object(Map::new()),
    }
}

/// Strings pass through; everything else is serialized to compact JSON.
pub fn wrap_output(value: Value) -> StepResult {
    match value {
        Value::String(text) => StepResult::Text(text),
        other => StepResult::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn named(pairs: &[(&str, StepResult)]) -> NamedInputs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn plain_text_passes_through() {
        let input = derive_input("s", &StepResult::text("just words"), &NamedInputs::new());
        assert_eq!(input, AdaptedInput::Text("just words".into()));
    }

    #[test]
    fn object_literal_text_is_parsed() {
        let input = derive_input(
            "s",
            &StepResult::text("  {\"url_links\": [\"https://a\"]} "),
            &NamedInputs::new(),
        );
        assert_eq!(input, AdaptedInput::Structured(json!({"url_links": ["https://a"]})));
    }

    #[test]
    fn arrays_are_not_object_literals() {
        let input = derive_input("s", &StepResult::text("[1, 2]"), &NamedInputs::new());
        assert_eq!(input, AdaptedInput::Text("[1, 2]".into()));
    }

    #[test]
    fn broken_object_degrades_to_text() {
        let input = derive_input("s", &StepResult::text("{not json"), &NamedInputs::new());
        assert_eq!(input, AdaptedInput::Text("{not json".into()));
        assert_eq!(structured_input("s", input), json!({}));
    }

    #[test]
    fn single_named_input_wins_over_previous() {
        let inputs = named(&[("links", StepResult::data(json!({"url_links": []})))]);
        let input = derive_input("s", &StepResult::text("ignored"), &inputs);
        assert_eq!(input, AdaptedInput::Structured(json!({"url_links": []})));
    }

    #[test]
    fn several_named_inputs_combine_by_name() {
        let inputs = named(&[
            ("framing", StepResult::text("# Introduction\nhi")),
            ("fragments", StepResult::text("{\"fragments\": []}")),
        ]);
        let input = derive_input("s", &StepResult::empty(), &inputs);
        assert_eq!(
            input,
            AdaptedInput::Structured(json!({
                "framing": "# Introduction\nhi",
                "fragments": {"fragments": []}
            }))
        );
    }

    #[test]
    fn blocking_functions_get_text() {
        assert_eq!(text_input(AdaptedInput::Structured(json!({"a": 1}))), r#"{"a":1}"#);
        assert_eq!(text_input(AdaptedInput::Structured(json!("raw"))), "raw");
        assert_eq!(text_input(AdaptedInput::Absent), "");
    }

    #[test]
    fn suspending_functions_get_structure() {
        assert_eq!(structured_input("s", AdaptedInput::Absent), json!({}));
        assert_eq!(
            structured_input("s", AdaptedInput::Text("words".into())),
            json!({})
        );
        assert_eq!(
            structured_input("s", AdaptedInput::Structured(json!({"k": true}))),
            json!({"k": true})
        );
    }

    #[test]
    fn output_is_always_text() {
        assert_eq!(wrap_output(json!("done")), StepResult::text("done"));
        assert_eq!(
            wrap_output(json!({"report": "r"})),
            StepResult::text(r#"{"report":"r"}"#)
        );
        assert_eq!(wrap_output(json!(null)), StepResult::text("null"));
    }
}
