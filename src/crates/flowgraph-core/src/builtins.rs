//! Built-in units used by the CLI and tests
//!
//! These are not a component library. They give flow files something to run:
//! pass-through units for input/output plumbing and a conditional router that
//! exercises branch stopping and the context store.

use crate::definition::VertexDefinition;
use crate::error::Result;
use crate::unit::{FieldSpec, ProcessingUnit, StepContext, UnitInputs, UnitOutcome, UnitRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Input field that receives the run's initial input on input vertices
pub const INPUT_VALUE: &str = "input_value";

/// Copies `input_value` to one named output
#[derive(Debug, Clone)]
pub struct PassthroughUnit {
    output: String,
}

impl PassthroughUnit {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

#[async_trait]
impl ProcessingUnit for PassthroughUnit {
    fn input_fields(&self) -> Vec<FieldSpec> {
        vec![FieldSpec::new(INPUT_VALUE).with_default(Value::String(String::new()))]
    }

    fn output_fields(&self) -> Vec<FieldSpec> {
        vec![FieldSpec::new(&self.output)]
    }

    async fn execute(&self, inputs: &UnitInputs, _ctx: &mut StepContext) -> Result<UnitOutcome> {
        let value = inputs.get(INPUT_VALUE).cloned().unwrap_or(Value::Null);
        Ok(UnitOutcome::outputs([(self.output.clone(), value)]))
    }
}

/// Comparison used by [`ConditionalRouter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOperator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl RouteOperator {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "equals" => Self::Equals,
            "not equals" => Self::NotEquals,
            "contains" => Self::Contains,
            "starts with" => Self::StartsWith,
            "ends with" => Self::EndsWith,
            "regex" => Self::Regex,
            "greater than" => Self::GreaterThan,
            "greater than or equal" => Self::GreaterThanOrEqual,
            "less than" => Self::LessThan,
            "less than or equal" => Self::LessThanOrEqual,
            _ => return None,
        })
    }
}

/// Evaluate `input <operator> match_text`.
///
/// `case_sensitive` applies to the text operators and to regex matching.
/// Numeric operators are false when either side does not parse as a number,
/// and an invalid pattern never matches.
pub fn evaluate_condition(
    input: &str,
    match_text: &str,
    operator: RouteOperator,
    case_sensitive: bool,
) -> bool {
    use RouteOperator::*;

    match operator {
        Regex => regex::RegexBuilder::new(match_text)
            .case_insensitive(!case_sensitive)
            .build()
            .map(|re| re.is_match(input))
            .unwrap_or(false),
        GreaterThan | GreaterThanOrEqual | LessThan | LessThanOrEqual => {
            let (Ok(left), Ok(right)) = (input.trim().parse::<f64>(), match_text.trim().parse::<f64>()) else {
                return false;
            };
            match operator {
                GreaterThan => left > right,
                GreaterThanOrEqual => left >= right,
                LessThan => left < right,
                _ => left <= right,
            }
        }
        _ => {
            let (input, match_text) = if case_sensitive {
                (input.to_string(), match_text.to_string())
            } else {
                (input.to_lowercase(), match_text.to_lowercase())
            };
            match operator {
                Equals => input == match_text,
                NotEquals => input != match_text,
                Contains => input.contains(&match_text),
                StartsWith => input.starts_with(&match_text),
                _ => input.ends_with(&match_text),
            }
        }
    }
}

/// Routes `input_value` to `true_result` or `false_result` and stops the other
/// output.
///
/// Each execution bumps `<vertex>_iteration` in the run context. Once the count
/// passes `max_iterations`, the router takes `default_route` and stops the
/// opposite one, which breaks feedback loops driven by dynamic mutation.
#[derive(Debug, Clone, Default)]
pub struct ConditionalRouter;

impl ConditionalRouter {
    pub const TRUE_RESULT: &'static str = "true_result";
    pub const FALSE_RESULT: &'static str = "false_result";
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl ProcessingUnit for ConditionalRouter {
    fn input_fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::new(INPUT_VALUE).with_type("text"),
            FieldSpec::new("match_text").with_type("text"),
            FieldSpec::new("operator").with_default(Value::from("equals")),
            FieldSpec::new("case_sensitive").with_default(Value::Bool(true)),
            FieldSpec::new("message").optional(),
            FieldSpec::new("max_iterations").with_default(Value::from(10)),
            FieldSpec::new("default_route").with_default(Value::from(Self::FALSE_RESULT)),
        ]
    }

    fn output_fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::new(Self::TRUE_RESULT),
            FieldSpec::new(Self::FALSE_RESULT),
        ]
    }

    async fn execute(&self, inputs: &UnitInputs, ctx: &mut StepContext) -> Result<UnitOutcome> {
        let input = text_of(inputs.get(INPUT_VALUE));
        let match_text = text_of(inputs.get("match_text"));
        let case_sensitive = inputs
            .get("case_sensitive")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let matched = inputs
            .get("operator")
            .and_then(Value::as_str)
            .and_then(RouteOperator::parse)
            .map(|op| evaluate_condition(&input, &match_text, op, case_sensitive))
            .unwrap_or(false);

        let iteration_key = format!("{}_iteration", ctx.vertex_id());
        let iteration = ctx.increment(&iteration_key, 1)?;
        let max_iterations = inputs
            .get("max_iterations")
            .and_then(Value::as_i64)
            .unwrap_or(10);

        let route = if iteration > max_iterations {
            match inputs.get("default_route").and_then(Value::as_str) {
                Some(Self::TRUE_RESULT) => Self::TRUE_RESULT,
                _ => Self::FALSE_RESULT,
            }
        } else if matched {
            Self::TRUE_RESULT
        } else {
            Self::FALSE_RESULT
        };
        let stopped = if route == Self::TRUE_RESULT {
            Self::FALSE_RESULT
        } else {
            Self::TRUE_RESULT
        };

        let payload = inputs
            .get("message")
            .filter(|m| !m.is_null())
            .cloned()
            .unwrap_or_else(|| Value::String(input));

        tracing::debug!(vertex = %ctx.vertex_id(), route, iteration, "conditional router decided");
        Ok(UnitOutcome::stop_branch(stopped, [(route, payload)]))
    }
}

/// Registry with the built-in unit types.
///
/// | type | inputs | outputs |
/// |------|--------|---------|
/// | `passthrough` | `input_value` | `output` |
/// | `chat_input` | `input_value` | `message` |
/// | `text_input` | `input_value` | `text` |
/// | `text_output` | `input_value` | `text` |
/// | `chat_output` | `input_value` | `message` |
/// | `conditional_router` | see [`ConditionalRouter`] | `true_result`, `false_result` |
pub fn builtin_registry() -> UnitRegistry {
    let mut registry = UnitRegistry::new();
    for (unit_type, output) in [
        ("passthrough", "output"),
        ("chat_input", "message"),
        ("text_input", "text"),
        ("text_output", "text"),
        ("chat_output", "message"),
    ] {
        registry.register_unit(unit_type, Arc::new(PassthroughUnit::new(output)));
    }
    registry.register("conditional_router", |_: &VertexDefinition| {
        Ok(Arc::new(ConditionalRouter) as Arc<dyn ProcessingUnit>)
    });
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextStore;
    use serde_json::json;

    #[test]
    fn test_evaluate_condition_table() {
        use RouteOperator::*;
        let cases = [
            ("hello", "hello", Equals, true, true),
            ("hello", "Hello", Equals, true, false),
            ("hello", "Hello", Equals, false, true),
            ("hello", "world", NotEquals, true, true),
            ("Hello", "hello", NotEquals, false, false),
            ("hello world", "World", Contains, false, true),
            ("hello world", "World", Contains, true, false),
            ("hello world", "Hello", StartsWith, false, true),
            ("hello world", "world", EndsWith, true, true),
            ("hello123", r"hello\d+", Regex, true, true),
            ("hello123", r"Hello\d+", Regex, true, false),
            ("hello123", r"Hello\d+", Regex, false, true),
            ("hello", r"invalid[regex", Regex, true, false),
            ("10", "5", GreaterThan, true, true),
            ("10", "10", GreaterThanOrEqual, true, true),
            ("5", "10", LessThan, true, true),
            ("15", "10", LessThanOrEqual, true, false),
            ("abc", "10", GreaterThan, true, false),
        ];
        for (input, match_text, op, case_sensitive, expected) in cases {
            assert_eq!(
                evaluate_condition(input, match_text, op, case_sensitive),
                expected,
                "{input:?} {op:?} {match_text:?}"
            );
        }
        assert!(RouteOperator::parse("unknown_operator").is_none());
    }

    #[test]
    fn test_regex_honours_case_sensitivity() {
        assert!(!evaluate_condition("ERROR: disk full", "^error", RouteOperator::Regex, true));
        assert!(evaluate_condition("ERROR: disk full", "^error", RouteOperator::Regex, false));
        assert!(evaluate_condition("error: disk full", "^error", RouteOperator::Regex, true));
    }

    fn router_inputs(input: &str, match_text: &str) -> UnitInputs {
        let mut inputs = UnitInputs::new();
        inputs.insert(INPUT_VALUE.to_string(), json!(input));
        inputs.insert("match_text".to_string(), json!(match_text));
        inputs.insert("operator".to_string(), json!("equals"));
        inputs.insert("case_sensitive".to_string(), json!(true));
        inputs.insert("max_iterations".to_string(), json!(2));
        inputs.insert("default_route".to_string(), json!("false_result"));
        inputs
    }

    #[tokio::test]
    async fn test_router_stops_untaken_route() {
        let mut ctx = StepContext::new("router", 1, "run", ContextStore::new());
        let outcome = ConditionalRouter
            .execute(&router_inputs("yes", "yes"), &mut ctx)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UnitOutcome::stop_branch("false_result", [("true_result", json!("yes"))])
        );
    }

    #[tokio::test]
    async fn test_router_falls_back_after_max_iterations() {
        let mut base = ContextStore::new();
        base.set("router_iteration", json!(2));
        let mut ctx = StepContext::new("router", 5, "run", base);

        let outcome = ConditionalRouter
            .execute(&router_inputs("yes", "yes"), &mut ctx)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UnitOutcome::stop_branch("true_result", [("false_result", json!("yes"))])
        );
        assert_eq!(ctx.get("router_iteration"), Some(&json!(3)));
    }

    #[test]
    fn test_builtin_registry_types() {
        let registry = builtin_registry();
        for unit_type in ["passthrough", "chat_input", "text_output", "chat_output", "conditional_router"] {
            assert!(registry.contains(unit_type), "{unit_type}");
        }
    }
}
