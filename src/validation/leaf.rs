//! Value-level checks.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::warn;

use super::{Evaluation, ValidationState, Validator};
use crate::config::CORE_BASE_URL;
use crate::instance::ElementNode;
use crate::terminology::BindingStrength;
use crate::types::schema::{
    BindingCheck, BoundKind, Cardinality, InvariantCheck, RegexCheck, ValueBound,
};
use crate::types::validation::{Issue, IssueKind, IssueSeverity, ResultState};

pub(crate) fn check_cardinality(cardinality: &Cardinality, count: usize, location: &str) -> Evaluation {
    if count < cardinality.min as usize {
        return Evaluation::failure(Issue::error(
            IssueKind::CardinalityViolation,
            format!(
                "Expected at least {} value(s) ({cardinality}), found {count}",
                cardinality.min
            ),
            location,
        ));
    }
    match cardinality.max {
        Some(max) if count > max as usize => Evaluation::failure(Issue::error(
            IssueKind::CardinalityViolation,
            format!("Expected at most {max} value(s) ({cardinality}), found {count}"),
            location,
        )),
        _ => Evaluation::success(),
    }
}

pub(crate) fn check_max_length(max: usize, node: &ElementNode) -> Evaluation {
    let Some(text) = node.primitive_string() else {
        return Evaluation::success();
    };
    let length = text.chars().count();
    if length > max {
        return Evaluation::failure(Issue::error(
            IssueKind::MaxLengthExceeded,
            format!("Value is {length} characters long, the maximum is {max}"),
            node.location.as_str(),
        ));
    }
    Evaluation::success()
}

pub(crate) fn check_fixed(expected: &Value, node: &ElementNode) -> Evaluation {
    if node.to_json() == *expected {
        return Evaluation::success();
    }
    Evaluation::failure(Issue::error(
        IssueKind::FixedValueMismatch,
        format!("Value does not equal the fixed value {expected}"),
        node.location.as_str(),
    ))
}

pub(crate) fn check_pattern(pattern: &Value, node: &ElementNode) -> Evaluation {
    if deep_partial_match(&node.to_json(), pattern) {
        return Evaluation::success();
    }
    Evaluation::failure(Issue::error(
        IssueKind::PatternMismatch,
        format!("Value does not match the pattern {pattern}"),
        node.location.as_str(),
    ))
}

pub(crate) fn check_regex(check: &RegexCheck, node: &ElementNode) -> Evaluation {
    let Some(text) = node.primitive_string() else {
        return Evaluation::failure(Issue::error(
            IssueKind::RegexMismatch,
            format!("Expected a primitive value matching '{}'", check.pattern),
            node.location.as_str(),
        ));
    };
    if check.is_match(&text) {
        return Evaluation::success();
    }
    Evaluation::failure(Issue::error(
        IssueKind::RegexMismatch,
        format!("Value '{text}' does not match '{}'", check.pattern),
        node.location.as_str(),
    ))
}

pub(crate) fn check_bound(bound: &ValueBound, node: &ElementNode) -> Evaluation {
    let value = node.to_json();
    let Some(ordering) = compare(&value, &bound.limit, &bound.value_type) else {
        return Evaluation::with_issue(
            ResultState::Undecided,
            Issue::warning(
                IssueKind::NotComparable,
                format!(
                    "Cannot compare {value} with the {} bound {}",
                    bound.value_type, bound.limit
                ),
                node.location.as_str(),
            ),
        );
    };

    let violated = match bound.kind {
        BoundKind::Min => ordering == Ordering::Less,
        BoundKind::Max => ordering == Ordering::Greater,
    };
    if !violated {
        return Evaluation::success();
    }
    let relation = match bound.kind {
        BoundKind::Min => "below the minimum",
        BoundKind::Max => "above the maximum",
    };
    Evaluation::failure(Issue::error(
        IssueKind::ValueOutOfRange,
        format!("Value {value} is {relation} {}", bound.limit),
        node.location.as_str(),
    ))
}

/// Order of `value` relative to `limit`, when the two are comparable
fn compare(value: &Value, limit: &Value, value_type: &str) -> Option<Ordering> {
    match (numeric(value), numeric(limit)) {
        (Some(a), Some(b)) => return a.partial_cmp(&b),
        (None, None) => {}
        _ => return None,
    }

    let (a, b) = (value.as_str()?, limit.as_str()?);
    match value_type {
        "Time" => NaiveTime::parse_from_str(a, "%H:%M:%S%.f")
            .ok()
            .zip(NaiveTime::parse_from_str(b, "%H:%M:%S%.f").ok())
            .map(|(a, b)| a.cmp(&b)),
        "Date" | "DateTime" | "Instant" => temporal(a)
            .zip(temporal(b))
            .map(|(a, b)| a.cmp(&b)),
        _ => Some(a.cmp(b)),
    }
}

/// Number, or the `value` of a quantity
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(map) => map.get("value").and_then(Value::as_f64),
        _ => None,
    }
}

/// Dates with reduced precision compare as their earliest instant
fn temporal(text: &str) -> Option<NaiveDateTime> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.naive_utc());
    }
    if let Ok(local) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(local);
    }
    let padded = match text.len() {
        4 => format!("{text}-01-01"),
        7 => format!("{text}-01"),
        _ => text.to_string(),
    };
    NaiveDate::parse_from_str(&padded, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

pub(crate) fn check_type_label(codes: &[String], node: &ElementNode) -> Evaluation {
    let Some(label) = node.instance_type.as_deref() else {
        return Evaluation::with_issue(
            ResultState::Undecided,
            Issue::warning(
                IssueKind::TypeUnknown,
                format!("Type of the value is unknown; expected one of {}", codes.join(", ")),
                node.location.as_str(),
            ),
        );
    };

    let matches = codes.iter().any(|code| {
        code == label
            || code
                .strip_prefix(CORE_BASE_URL)
                .is_some_and(|name| name == label)
    });
    if matches {
        return Evaluation::success();
    }
    Evaluation::failure(Issue::error(
        IssueKind::TypeMismatch,
        format!("Type '{label}' is not one of {}", codes.join(", ")),
        node.location.as_str(),
    ))
}

/// Check if an item matches a pattern using partial matching.
///
/// - Objects: every key of the pattern must be present with a matching value
/// - Arrays: every pattern element must match some item element
/// - Scalars: strict equality
pub fn deep_partial_match(item: &Value, pattern: &Value) -> bool {
    match pattern {
        Value::Null => true,
        Value::Object(pattern_map) => {
            let Some(item_map) = item.as_object() else {
                return pattern_map.is_empty();
            };
            pattern_map.iter().all(|(key, pattern_value)| {
                item_map
                    .get(key)
                    .is_some_and(|item_value| deep_partial_match(item_value, pattern_value))
            })
        }
        Value::Array(pattern_items) => {
            if pattern_items.is_empty() {
                return true;
            }
            let Some(items) = item.as_array() else {
                // A single value may satisfy a one-element array pattern
                return pattern_items.len() == 1 && deep_partial_match(item, &pattern_items[0]);
            };
            pattern_items
                .iter()
                .all(|p| items.iter().any(|i| deep_partial_match(i, p)))
        }
        scalar => item == scalar,
    }
}

/// Codes carried by a code, Coding or CodeableConcept value, as
/// `(code, system)` pairs.
pub fn extract_codes(value: &Value) -> Vec<(String, Option<String>)> {
    let mut codes = Vec::new();
    match value {
        Value::String(code) => codes.push((code.clone(), None)),
        Value::Object(obj) => {
            if let Some(code) = obj.get("code").and_then(Value::as_str) {
                let system = obj.get("system").and_then(Value::as_str).map(String::from);
                codes.push((code.to_string(), system));
            }
            if let Some(codings) = obj.get("coding").and_then(Value::as_array) {
                for coding in codings {
                    if let Some(code) = coding.get("code").and_then(Value::as_str) {
                        let system = coding
                            .get("system")
                            .and_then(Value::as_str)
                            .map(String::from);
                        codes.push((code.to_string(), system));
                    }
                }
            }
            // CodeableReference
            if let Some(concept) = obj.get("concept") {
                codes.extend(extract_codes(concept));
            }
        }
        _ => {}
    }
    codes
}

impl Validator {
    pub(crate) async fn check_binding(
        &self,
        binding: &BindingCheck,
        group: &[Arc<ElementNode>],
    ) -> Evaluation {
        let Some(terminology) = &self.terminology else {
            return Evaluation::success();
        };
        if binding.strength == BindingStrength::Example {
            return Evaluation::success();
        }

        let mut evaluation = Evaluation::success();
        for node in group {
            let codes = extract_codes(&node.to_json());
            if codes.is_empty() {
                continue;
            }

            let mut valid = false;
            let mut failure = None;
            let mut messages = Vec::new();
            for (code, system) in &codes {
                match terminology
                    .validate_code(
                        &binding.value_set,
                        code,
                        system.as_deref(),
                        binding.abstract_allowed,
                    )
                    .await
                {
                    Ok(result) if result.valid => {
                        valid = true;
                        break;
                    }
                    Ok(result) => messages.push(result.message.unwrap_or_else(|| {
                        format!(
                            "Code '{code}' (system: {}) is not in value set '{}'",
                            system.as_deref().unwrap_or("none"),
                            binding.value_set
                        )
                    })),
                    Err(err) => failure = Some(err),
                }
            }
            if valid {
                continue;
            }

            if let Some(err) = failure {
                warn!(value_set = %binding.value_set, error = %err, "terminology lookup failed");
                evaluation = evaluation.and(Evaluation::with_issue(
                    ResultState::Undecided,
                    Issue::warning(
                        IssueKind::TerminologyUnavailable,
                        format!("Failed to validate code against value set: {err}"),
                        node.location.as_str(),
                    ),
                ));
                continue;
            }

            let message = messages.join("; ");
            let next = if binding.strength.is_error_on_failure() {
                Evaluation::failure(Issue::error(
                    IssueKind::BindingViolation,
                    message,
                    node.location.clone(),
                ))
            } else {
                Evaluation::new(
                    ResultState::Success,
                    vec![Issue::warning(
                        IssueKind::BindingViolation,
                        message,
                        node.location.clone(),
                    )],
                )
            };
            evaluation = evaluation.and(next);
        }
        evaluation
    }

    pub(crate) async fn check_invariant(
        &self,
        state: &ValidationState,
        invariant: &InvariantCheck,
        group: &[Arc<ElementNode>],
    ) -> Evaluation {
        let Some(evaluator) = &self.invariants else {
            return Evaluation::success();
        };
        let resource = state.current_resource().cloned();

        let mut evaluation = Evaluation::success();
        for node in group {
            let next = match evaluator
                .evaluate(&invariant.expression, node, resource.as_deref())
                .await
            {
                Ok(true) => Evaluation::success(),
                Ok(false) => {
                    let issue = Issue::new(
                        invariant.severity,
                        IssueKind::InvariantFailed,
                        format!("Constraint '{}' failed: {}", invariant.key, invariant.human),
                        node.location.clone(),
                    );
                    let result = if invariant.severity == IssueSeverity::Error {
                        ResultState::Failure
                    } else {
                        ResultState::Success
                    };
                    Evaluation::with_issue(result, issue)
                }
                Err(err) => {
                    warn!(key = %invariant.key, error = %err, "invariant evaluation failed");
                    Evaluation::with_issue(
                        ResultState::Undecided,
                        Issue::warning(
                            IssueKind::InvariantUnavailable,
                            format!("Constraint '{}' could not be evaluated: {err}", invariant.key),
                            node.location.clone(),
                        ),
                    )
                }
            };
            evaluation = evaluation.and(next);
        }
        evaluation
    }
}
