mod common;

use async_trait::async_trait;
use common::*;
use octofhir_profileschema::*;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;

const TELECOM: &str = "http://example.org/StructureDefinition/telecom-patient";
const TREE: &str = "http://example.org/StructureDefinition/Tree";

fn node(value: Value) -> ElementNode {
    ElementNode::from_json(&value)
}

#[tokio::test]
async fn test_closed_slice_group_rejects_unmatched_value() {
    let validator = validator_for(vec![telecom_profile()]);
    let patient = node(json!({
        "resourceType": "Patient",
        "telecom": [{"system": "phone"}, {"system": "email"}]
    }));

    let outcome = validator.validate(&patient, TELECOM).await;

    assert_eq!(outcome.result, ResultState::Failure);
    let unmatched: Vec<_> = outcome.issues_of(IssueKind::SliceNoMatch).collect();
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0].location, "Patient.telecom[1]");
    assert_eq!(outcome.errors().count(), 1);
}

#[tokio::test]
async fn test_slice_body_is_checked_on_its_members() {
    let validator = validator_for(vec![telecom_profile()]);
    let patient = node(json!({
        "resourceType": "Patient",
        "telecom": [{"system": "other"}, {"system": "phone", "rank": 1}]
    }));

    let outcome = validator.validate(&patient, TELECOM).await;

    // Slice bodies define only `system`
    let unknown: Vec<_> = outcome.issues_of(IssueKind::UnknownChild).collect();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].location, "Patient.telecom[1].rank");
    assert!(outcome.issues_of(IssueKind::SliceNoMatch).next().is_none());
}

#[tokio::test]
async fn test_unresolved_type_schema_is_a_warning() {
    let validator = validator_for(vec![telecom_profile()]);
    let patient = node(json!({
        "resourceType": "Patient",
        "telecom": [{"system": "phone"}]
    }));

    let outcome = validator.validate(&patient, TELECOM).await;

    assert_eq!(outcome.result, ResultState::Undecided);
    assert!(outcome.is_valid());
    let warning = outcome
        .issues_of(IssueKind::SchemaUnresolved)
        .next()
        .expect("ContactPoint is not known");
    assert!(warning.message.contains("ContactPoint"));
    assert_eq!(warning.severity, IssueSeverity::Warning);
}

#[tokio::test]
async fn test_unresolved_schema_severity_is_configurable() {
    let validator = validator_for(vec![]).with_settings(ValidationSettings {
        unresolved_schema_severity: IssueSeverity::Error,
        ..Default::default()
    });
    let outcome = validator
        .validate(&node(json!({"resourceType": "Patient"})), TELECOM)
        .await;

    assert_eq!(outcome.result, ResultState::Failure);
    assert_eq!(kinds(&outcome), vec![IssueKind::SchemaUnresolved]);
}

#[tokio::test]
async fn test_discriminator_less_slices_match_on_full_constraints() {
    let identifier_slice = |name: &str, system: &str| {
        vec![
            slice_entry("Basic.identifier", name),
            el("Basic.identifier.system")
                .with_id(format!("Basic.identifier:{name}.system"))
                .with_value_field("fixedUri", json!(system)),
        ]
    };
    let mut elements = vec![
        el("Basic"),
        el("Basic.identifier").with_slicing(slicing(&[], "closed")),
    ];
    elements.extend(identifier_slice("a", "urn:a"));
    elements.extend(identifier_slice("b", "urn:b"));
    let sd = profile(
        "http://example.org/StructureDefinition/identified-basic",
        "Basic",
        "constraint",
        elements,
    );
    let validator = validator_for(vec![sd]);

    let outcome = validator
        .validate(
            &node(json!({
                "resourceType": "Basic",
                "identifier": [{"system": "urn:b"}, {"system": "urn:a"}, {"system": "urn:z"}]
            })),
            "http://example.org/StructureDefinition/identified-basic",
        )
        .await;

    assert_eq!(outcome.result, ResultState::Failure);
    let locations: Vec<_> = outcome.issues.iter().map(|i| i.location.as_str()).collect();
    assert_eq!(locations, vec!["Basic.identifier[2]"]);
}

#[tokio::test]
async fn test_shared_backbone_validates_recursively() {
    let validator = validator_for(vec![tree_profile()]);
    let valid = node(json!({
        "resourceType": "Tree",
        "node": [{
            "label": "root",
            "child": [{"label": "a", "sibling": [{"label": "b"}]}]
        }]
    }));
    let outcome = validator.validate(&valid, TREE).await;
    assert_eq!(outcome.result, ResultState::Success, "{:?}", outcome.issues);

    let invalid = node(json!({
        "resourceType": "Tree",
        "node": [{
            "label": "root",
            "child": [{"sibling": [{"label": ""}]}]
        }]
    }));
    let outcome = validator.validate(&invalid, TREE).await;
    assert_eq!(outcome.result, ResultState::Failure);

    let missing = outcome
        .issues_of(IssueKind::CardinalityViolation)
        .next()
        .expect("missing label");
    assert_eq!(missing.location, "Tree.node[0].child[0].label");
    // Empty strings do not match the string pattern
    let empty = outcome
        .issues_of(IssueKind::RegexMismatch)
        .next()
        .expect("empty label");
    assert_eq!(empty.location, "Tree.node[0].child[0].sibling[0].label");
}

#[tokio::test]
async fn test_recursion_limit() {
    let validator = validator_for(vec![tree_profile()]).with_settings(ValidationSettings {
        max_depth: 3,
        ..Default::default()
    });
    let deep = node(json!({
        "resourceType": "Tree",
        "node": [{"label": "1", "child": [{"label": "2", "child": [{"label": "3", "child": [{"label": "4"}]}]}]}]
    }));

    let outcome = validator.validate(&deep, TREE).await;
    assert_eq!(outcome.result, ResultState::Failure);
    assert!(outcome.issues_of(IssueKind::RecursionLimit).next().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_are_independent() {
    init_tracing();
    let validator = Arc::new(validator_for(vec![tree_profile()]));

    let handles: Vec<_> = (0..8usize)
        .map(|unlabeled| {
            let validator = validator.clone();
            tokio::spawn(async move {
                let nodes: Vec<Value> = (0..8usize)
                    .map(|i| {
                        if i < unlabeled {
                            json!({})
                        } else {
                            json!({"label": format!("n{i}")})
                        }
                    })
                    .collect();
                let tree = node(json!({"resourceType": "Tree", "node": nodes}));
                (unlabeled, validator.validate(&tree, TREE).await)
            })
        })
        .collect();

    for handle in handles {
        let (unlabeled, outcome) = handle.await.unwrap();
        assert_eq!(
            outcome.issues_of(IssueKind::CardinalityViolation).count(),
            unlabeled
        );
        assert_eq!(outcome.is_valid(), unlabeled == 0);
    }
}

#[tokio::test]
async fn test_validate_batch_keeps_input_order() {
    let validator = validator_for(vec![tree_profile()]);
    let instances = vec![
        node(json!({"resourceType": "Tree", "node": [{}]})),
        node(json!({"resourceType": "Tree", "node": [{"label": "x"}]})),
    ];

    let outcomes = validator.validate_batch(&instances, TREE).await;
    assert_eq!(outcomes.len(), 2);
    assert!(!outcomes[0].is_valid());
    assert!(outcomes[1].is_valid());
}

#[tokio::test]
async fn test_circular_bundle_references_terminate() {
    init_tracing();
    let validator = validator_for(reference_profiles());
    let bundle = node(json!({
        "resourceType": "Bundle",
        "entry": [
            {
                "fullUrl": "http://example.org/fhir/Patient/a",
                "resource": {"resourceType": "Patient", "id": "a", "link": [{"reference": "Patient/b"}]}
            },
            {
                "fullUrl": "http://example.org/fhir/Patient/b",
                "resource": {"resourceType": "Patient", "id": "b", "link": [{"reference": "Patient/a"}]}
            }
        ]
    }));

    let outcome = validator
        .validate(&bundle, &core("Bundle"))
        .await;

    assert_eq!(outcome.result, ResultState::Success, "{:?}", outcome.issues);
    let circular: Vec<_> = outcome.issues_of(IssueKind::CircularReference).collect();
    assert!(!circular.is_empty());
    assert!(circular.iter().all(|i| i.severity == IssueSeverity::Warning));
}

#[tokio::test]
async fn test_bundled_reference_target_is_validated() {
    let validator = validator_for(reference_profiles());
    let bundle = node(json!({
        "resourceType": "Bundle",
        "entry": [
            {
                "fullUrl": "http://example.org/fhir/Patient/a",
                "resource": {"resourceType": "Patient", "id": "a", "managingOrganization": {"reference": "Organization/o"}}
            },
            {
                "fullUrl": "http://example.org/fhir/Organization/o",
                "resource": {"resourceType": "Organization", "id": "o"}
            }
        ]
    }));

    let outcome = validator.validate(&bundle, &core("Bundle")).await;

    assert_eq!(outcome.result, ResultState::Failure);
    assert!(
        outcome
            .issues_of(IssueKind::CardinalityViolation)
            .all(|i| i.location == "Bundle.entry[1].resource.name")
    );
}

#[tokio::test]
async fn test_contained_references() {
    let validator = validator_for(reference_profiles());
    let patient = |reference: &str| {
        node(json!({
            "resourceType": "Patient",
            "id": "p",
            "contained": [{"resourceType": "Organization", "id": "org1", "name": "Acme"}],
            "managingOrganization": {"reference": reference}
        }))
    };

    let outcome = validator.validate(&patient("#org1"), &core("Patient")).await;
    assert_eq!(outcome.result, ResultState::Success, "{:?}", outcome.issues);

    let outcome = validator.validate(&patient("#missing"), &core("Patient")).await;
    assert_eq!(outcome.result, ResultState::Undecided);
    assert_eq!(kinds(&outcome), vec![IssueKind::ReferenceUnresolved]);
}

#[tokio::test]
async fn test_external_references() {
    let patient = node(json!({
        "resourceType": "Patient",
        "managingOrganization": {"reference": "Organization/o1"}
    }));

    // Without a resolver external references are not followed
    let outcome = validator_for(reference_profiles())
        .validate(&patient, &core("Patient"))
        .await;
    assert_eq!(outcome.result, ResultState::Success);
    assert!(outcome.issues.is_empty());

    let empty = Arc::new(InMemoryReferenceResolver::new());
    let outcome = validator_for(reference_profiles())
        .with_reference_resolver(empty)
        .validate(&patient, &core("Patient"))
        .await;
    assert_eq!(kinds(&outcome), vec![IssueKind::ReferenceUnresolved]);

    let resolver = Arc::new(InMemoryReferenceResolver::new().with_resource(
        "Organization/o1",
        node(json!({"resourceType": "Organization", "id": "o1"})),
    ));
    let outcome = validator_for(reference_profiles())
        .with_reference_resolver(resolver)
        .validate(&patient, &core("Patient"))
        .await;
    assert_eq!(outcome.result, ResultState::Failure);
    assert_eq!(
        outcome.issues_of(IssueKind::CardinalityViolation).next().map(|i| i.location.as_str()),
        Some("Organization.name")
    );
}

fn coded_profile(strength: &str) -> StructureDefinition {
    profile(
        "http://example.org/StructureDefinition/coded",
        "Basic",
        "specialization",
        vec![
            el("Basic"),
            typed("Basic.code", "code")
                .with_cardinality(1, "1")
                .with_binding(strength, "http://example.org/ValueSet/codes"),
        ],
    )
}

fn terminology() -> Arc<dyn TerminologyService> {
    Arc::new(
        InMemoryTerminologyService::new()
            .with_codes("http://example.org/ValueSet/codes", &[("A", None), ("B", None)]),
    )
}

#[tokio::test]
async fn test_required_binding() {
    let validator = validator_for(vec![coded_profile("required")]).with_terminology_service(terminology());
    let url = "http://example.org/StructureDefinition/coded";

    let outcome = validator
        .validate(&node(json!({"resourceType": "Basic", "code": "A"})), url)
        .await;
    assert_eq!(outcome.result, ResultState::Success);

    let outcome = validator
        .validate(&node(json!({"resourceType": "Basic", "code": "Z"})), url)
        .await;
    assert_eq!(outcome.result, ResultState::Failure);
    assert_eq!(kinds(&outcome), vec![IssueKind::BindingViolation]);
    assert_eq!(outcome.issues[0].location, "Basic.code");
}

#[tokio::test]
async fn test_extensible_binding_only_warns() {
    let validator =
        validator_for(vec![coded_profile("extensible")]).with_terminology_service(terminology());
    let outcome = validator
        .validate(
            &node(json!({"resourceType": "Basic", "code": "Z"})),
            "http://example.org/StructureDefinition/coded",
        )
        .await;

    assert!(outcome.is_valid());
    assert_eq!(outcome.warnings().count(), 1);
    assert_eq!(outcome.issues[0].kind, IssueKind::BindingViolation);
}

#[tokio::test]
async fn test_unknown_value_set_is_undecided() {
    let mut sd = coded_profile("required");
    sd.snapshot.as_mut().unwrap().element[1] = typed("Basic.code", "code")
        .with_binding("required", "http://example.org/ValueSet/unknown");
    let validator = validator_for(vec![sd]).with_terminology_service(terminology());

    let outcome = validator
        .validate(
            &node(json!({"resourceType": "Basic", "code": "A"})),
            "http://example.org/StructureDefinition/coded",
        )
        .await;
    assert_eq!(outcome.result, ResultState::Undecided);
    assert_eq!(kinds(&outcome), vec![IssueKind::TerminologyUnavailable]);
}

/// Evaluates two toy expressions over primitive values
struct ToyEvaluator;

#[async_trait]
impl InvariantEvaluator for ToyEvaluator {
    async fn evaluate(
        &self,
        expression: &str,
        node: &ElementNode,
        resource: Option<&ElementNode>,
    ) -> std::result::Result<bool, InvariantError> {
        match expression {
            "upper" => Ok(node
                .primitive_string()
                .is_some_and(|s| s.chars().all(|c| c.is_ascii_uppercase()))),
            "in-resource" => Ok(resource.and_then(|r| r.resource_type()) == Some("Basic")),
            other => Err(InvariantError::unsupported(other, "unknown expression")),
        }
    }
}

fn constrained_profile(expression: &str, severity: &str) -> StructureDefinition {
    let mut code = typed("Basic.code", "code");
    code.constraint.push(ElementConstraint {
        key: "bas-1".to_string(),
        severity: severity.to_string(),
        human: "Code must satisfy the rule".to_string(),
        expression: Some(expression.to_string()),
    });
    profile(
        "http://example.org/StructureDefinition/constrained",
        "Basic",
        "specialization",
        vec![el("Basic"), code],
    )
}

async fn run_invariant(expression: &str, severity: &str, code: &str) -> ValidationOutcome {
    validator_for(vec![constrained_profile(expression, severity)])
        .with_invariant_evaluator(Arc::new(ToyEvaluator))
        .validate(
            &node(json!({"resourceType": "Basic", "code": code})),
            "http://example.org/StructureDefinition/constrained",
        )
        .await
}

#[tokio::test]
async fn test_invariants() {
    assert_eq!(run_invariant("upper", "error", "ABC").await.result, ResultState::Success);
    assert_eq!(run_invariant("in-resource", "error", "abc").await.result, ResultState::Success);

    let outcome = run_invariant("upper", "error", "abc").await;
    assert_eq!(outcome.result, ResultState::Failure);
    assert_eq!(kinds(&outcome), vec![IssueKind::InvariantFailed]);
    assert!(outcome.issues[0].message.contains("bas-1"));

    let outcome = run_invariant("upper", "warning", "abc").await;
    assert_eq!(outcome.result, ResultState::Success);
    assert_eq!(outcome.warnings().count(), 1);

    let outcome = run_invariant("exists()", "error", "abc").await;
    assert_eq!(outcome.result, ResultState::Undecided);
    assert_eq!(kinds(&outcome), vec![IssueKind::InvariantUnavailable]);
}

#[tokio::test]
async fn test_validate_against_compiled_schema() {
    let schema = converter_for(vec![]).convert(&tree_profile()).await.unwrap();
    // The resolver knows nothing; local anchors come from the schema itself
    let validator = Validator::new(Arc::new(ProfileSourceSchemaResolver::new(Arc::new(
        InMemoryProfileSource::new(),
    ))));
    let outcome = validator
        .validate_against(&node(json!({"resourceType": "Tree", "node": [{"label": "x"}]})), &schema)
        .await;

    // `string` is not resolvable here
    assert!(outcome.is_valid());
    assert!(outcome.issues_of(IssueKind::CardinalityViolation).next().is_none());
}

#[tokio::test]
async fn test_type_discriminated_slice_rejects_other_types() {
    let quantity = core_type(
        "Quantity",
        vec![el("Quantity"), typed("Quantity.unit", "string").with_cardinality(0, "1")],
    );
    let validator = validator_for(vec![typed_value_profile(), quantity]);
    let profile_url = "http://example.org/StructureDefinition/quantity-observation";

    let measured = node(json!({"resourceType": "Observation", "valueQuantity": {"unit": "mg"}}));
    let outcome = validator.validate(&measured, profile_url).await;
    assert_eq!(outcome.result, ResultState::Success, "{:?}", outcome.issues);

    let described = node(json!({"resourceType": "Observation", "valueString": "high"}));
    let outcome = validator.validate(&described, profile_url).await;
    let unmatched: Vec<_> = outcome.issues_of(IssueKind::SliceNoMatch).collect();
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0].location, "Observation.valueString");
    assert_eq!(outcome.errors().count(), 1);
}

#[tokio::test]
async fn test_sliced_extension_is_checked_once() {
    let validator = validator_for(vec![core_extension(), race_extension(), race_patient()]);
    let patient = node(json!({
        "resourceType": "Patient",
        "extension": [{"url": RACE}]
    }));

    let outcome = validator
        .validate(&patient, "http://example.org/StructureDefinition/race-patient")
        .await;

    let missing: Vec<_> = outcome.issues_of(IssueKind::CardinalityViolation).collect();
    assert_eq!(missing.len(), 1, "{:?}", outcome.issues);
    assert_eq!(missing[0].location, "Patient.extension[0].value");
    assert_eq!(outcome.errors().count(), 1);
}

#[tokio::test]
async fn test_resolve_discriminator_follows_contained_reference() {
    let mut profiles = reference_profiles();
    profiles.extend([acme_organization(), gp_patient()]);
    let validator = validator_for(profiles);
    let patient = |practitioners: Value| {
        node(json!({
            "resourceType": "Patient",
            "contained": [
                {"resourceType": "Organization", "id": "o1", "name": "Acme"},
                {"resourceType": "Organization", "id": "o2", "name": "Other"}
            ],
            "generalPractitioner": practitioners
        }))
    };
    let profile_url = "http://example.org/StructureDefinition/gp-patient";

    let outcome = validator
        .validate(&patient(json!([{"reference": "#o1"}])), profile_url)
        .await;
    assert_eq!(outcome.result, ResultState::Success, "{:?}", outcome.issues);

    let outcome = validator
        .validate(
            &patient(json!([{"reference": "#o1"}, {"reference": "#o2"}])),
            profile_url,
        )
        .await;
    assert_eq!(outcome.result, ResultState::Failure);
    let unmatched: Vec<_> = outcome.issues_of(IssueKind::SliceNoMatch).collect();
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0].location, "Patient.generalPractitioner[1]");
}

#[tokio::test]
async fn test_named_default_slice_takes_unmatched_values() {
    let contact_point = core_type(
        "ContactPoint",
        vec![
            el("ContactPoint"),
            typed("ContactPoint.system", "code").with_cardinality(0, "1"),
        ],
    );
    let validator = validator_for(vec![telecom_default_profile(), contact_point]);
    let patient = node(json!({
        "resourceType": "Patient",
        "telecom": [{"system": "phone"}, {"system": "email"}]
    }));

    let outcome = validator
        .validate(&patient, "http://example.org/StructureDefinition/telecom-default")
        .await;
    // Without the default slice the closed group would reject `email`
    assert_eq!(outcome.result, ResultState::Success, "{:?}", outcome.issues);
    assert!(outcome.issues.is_empty());
}
