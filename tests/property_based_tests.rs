//! Property-based tests for compilation and validation.
//!
//! Uses proptest to check that:
//! - cardinality assertions accept exactly the counts in range
//! - type lists compile to type slices in declaration order
//! - validation is deterministic and reports one issue per missing value
//! - tri-state results combine as a lattice

mod common;

use common::*;
use futures::executor::block_on;
use octofhir_profileschema::*;
use proptest::prelude::*;
use serde_json::{Value, json};

// =============================================================================
// Strategies
// =============================================================================

fn type_code() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("string"),
        Just("boolean"),
        Just("integer"),
        Just("Quantity"),
        Just("CodeableConcept"),
        Just("Period"),
        Just("Reference"),
        Just("dateTime"),
    ]
}

fn distinct_type_codes() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(type_code(), 2..6).prop_map(|codes| {
        let mut seen = std::collections::HashSet::new();
        codes.into_iter().filter(|c| seen.insert(*c)).collect()
    })
}

fn result_state() -> impl Strategy<Value = ResultState> {
    prop_oneof![
        Just(ResultState::Success),
        Just(ResultState::Failure),
        Just(ResultState::Undecided),
    ]
}

/// Tree nodes, `true` where the label is present
fn tree_nodes() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(prop::bool::ANY, 0..12)
}

fn tree_instance(labels: &[bool]) -> Value {
    let nodes: Vec<Value> = labels
        .iter()
        .enumerate()
        .map(|(i, labeled)| {
            if *labeled {
                json!({"label": format!("node-{i}")})
            } else {
                json!({"child": [{"label": "inner"}]})
            }
        })
        .collect();
    json!({"resourceType": "Tree", "node": nodes})
}

fn choice_profile(codes: &[&str]) -> StructureDefinition {
    let element = codes.iter().fold(
        el("Observation.value[x]").with_cardinality(0, "1"),
        |element, code| element.with_type(TypeReference::new(*code)),
    );
    profile(
        "http://example.org/StructureDefinition/choice",
        "Observation",
        "specialization",
        vec![el("Observation"), element],
    )
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn cardinality_allows_exactly_the_range(min in 0u32..5, span in prop::option::of(0u32..5), count in 0usize..12) {
        let max = span.map(|s| min + s);
        let max_text = max.map(|m| m.to_string()).unwrap_or_else(|| "*".to_string());
        let cardinality = Cardinality::from_definition(Some(min), Some(max_text.as_str()));

        let in_range = count >= min as usize && max.is_none_or(|m| count <= m as usize);
        match cardinality {
            Some(c) => prop_assert_eq!(c.allows(count), in_range),
            // Only 0..* compiles to nothing, and it allows everything
            None => {
                prop_assert_eq!(min, 0);
                prop_assert!(max.is_none());
            }
        }
    }

    #[test]
    fn type_lists_compile_to_ordered_type_slices(codes in distinct_type_codes()) {
        let schema = block_on(converter_for(vec![]).convert(&choice_profile(&codes)));
        let schema = schema.expect("distinct codes compile");

        let Assertion::Children(set) = &schema.assertions[0] else {
            panic!("expected children");
        };
        let value = &set.children["value[x]"].schema;
        let single = codes.len() == 1;
        let slice = value.assertions.iter().find_map(|a| match a {
            Assertion::Slice(slice_spec) => Some(slice_spec),
            _ => None,
        });

        if single {
            prop_assert!(slice.is_none());
        } else {
            let slice_spec = slice.expect("type slice");
            let names: Vec<&str> = slice_spec.cases.iter().map(|c| c.name.as_str()).collect();
            prop_assert_eq!(names, codes.clone());
            prop_assert_eq!(slice_spec.rules, SlicingRules::Closed);
        }
    }

    #[test]
    fn repeated_type_code_never_compiles(codes in distinct_type_codes(), pick in 0usize..6) {
        let mut codes = codes;
        let repeated = codes[pick % codes.len()];
        codes.push(repeated);

        let result = block_on(converter_for(vec![]).convert(&choice_profile(&codes)));
        let err = result.expect_err("repeated code is a fault");
        prop_assert_eq!(err.root_cause().code(), CompileErrorCode::IncorrectElementDefinition);
    }

    #[test]
    fn validation_is_deterministic(labels in tree_nodes()) {
        let validator = validator_for(vec![tree_profile()]);
        let instance = ElementNode::from_json(&tree_instance(&labels));

        let first = block_on(validator.validate(&instance, "http://example.org/StructureDefinition/Tree"));
        let second = block_on(validator.validate(&instance, "http://example.org/StructureDefinition/Tree"));
        prop_assert_eq!(&first, &second);

        let missing = labels.iter().filter(|l| !**l).count();
        prop_assert_eq!(first.issues_of(IssueKind::CardinalityViolation).count(), missing);
        prop_assert_eq!(first.is_valid(), missing == 0);
        for issue in first.errors() {
            prop_assert!(issue.location.starts_with("Tree.node["));
            prop_assert!(issue.location.ends_with("].label"));
        }
    }

    #[test]
    fn result_states_form_a_lattice(a in result_state(), b in result_state(), c in result_state()) {
        prop_assert_eq!(a.and(b), b.and(a));
        prop_assert_eq!(a.or(b), b.or(a));
        prop_assert_eq!(a.and(b).and(c), a.and(b.and(c)));
        prop_assert_eq!(a.and(ResultState::Success), a);
        prop_assert_eq!(a.or(ResultState::Failure), a);
        prop_assert_eq!(a.and(ResultState::Failure), ResultState::Failure);
        prop_assert_eq!(a.or(ResultState::Success), ResultState::Success);
    }
}
