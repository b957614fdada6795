//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use octofhir_profileschema::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Route library logs to the test output; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub const CORE: &str = "http://hl7.org/fhir/StructureDefinition/";

pub fn core(name: &str) -> String {
    format!("{CORE}{name}")
}

pub fn profile(
    url: &str,
    type_name: &str,
    derivation: &str,
    elements: Vec<ElementDefinition>,
) -> StructureDefinition {
    StructureDefinition {
        url: url.to_string(),
        name: type_name.to_string(),
        kind: "resource".to_string(),
        type_name: type_name.to_string(),
        derivation: Some(derivation.to_string()),
        snapshot: Some(ElementList { element: elements }),
        ..Default::default()
    }
}

/// Core definition of a type, compiled as a specialization
pub fn core_type(type_name: &str, elements: Vec<ElementDefinition>) -> StructureDefinition {
    profile(&core(type_name), type_name, "specialization", elements)
}

pub fn el(path: &str) -> ElementDefinition {
    ElementDefinition::new(path)
}

pub fn typed(path: &str, code: &str) -> ElementDefinition {
    ElementDefinition::new(path).with_type(TypeReference::new(code))
}

pub fn slice_entry(path: &str, name: &str) -> ElementDefinition {
    ElementDefinition::new(path)
        .with_id(format!("{path}:{name}"))
        .with_slice_name(name)
}

pub fn slicing(discriminators: &[(&str, &str)], rules: &str) -> ElementSlicing {
    ElementSlicing {
        discriminator: discriminators
            .iter()
            .map(|(kind, path)| Discriminator::new(*kind, *path))
            .collect(),
        rules: Some(rules.to_string()),
        ordered: None,
    }
}

/// Patient constraint with a closed telecom group of `phone` and `other`
/// slices, discriminated by the fixed `system`.
pub fn telecom_profile() -> StructureDefinition {
    let system_slice = |name: &str| {
        vec![
            slice_entry("Patient.telecom", name).with_type(TypeReference::new("ContactPoint")),
            el("Patient.telecom.system")
                .with_id(format!("Patient.telecom:{name}.system"))
                .with_value_field("fixedCode", json!(name)),
        ]
    };

    let mut elements = vec![
        el("Patient"),
        typed("Patient.telecom", "ContactPoint")
            .with_cardinality(0, "*")
            .with_slicing(slicing(&[("value", "system")], "closed")),
    ];
    elements.extend(system_slice("phone"));
    elements.extend(system_slice("other"));

    profile(
        "http://example.org/StructureDefinition/telecom-patient",
        "Patient",
        "constraint",
        elements,
    )
}

/// Closed telecom group with a `phone` slice and an explicit `@default`
/// slice taking every other contact point
pub fn telecom_default_profile() -> StructureDefinition {
    profile(
        "http://example.org/StructureDefinition/telecom-default",
        "Patient",
        "constraint",
        vec![
            el("Patient"),
            typed("Patient.telecom", "ContactPoint")
                .with_cardinality(0, "*")
                .with_slicing(slicing(&[("value", "system")], "closed")),
            slice_entry("Patient.telecom", "phone").with_type(TypeReference::new("ContactPoint")),
            el("Patient.telecom.system")
                .with_id("Patient.telecom:phone.system")
                .with_value_field("fixedCode", json!("phone")),
            slice_entry("Patient.telecom", "@default").with_type(TypeReference::new("ContactPoint")),
        ],
    )
}

/// Recursive tree whose `child` and `sibling` reuse the `node` backbone
pub fn tree_profile() -> StructureDefinition {
    profile(
        "http://example.org/StructureDefinition/Tree",
        "Tree",
        "specialization",
        vec![
            el("Tree"),
            typed("Tree.node", "BackboneElement").with_cardinality(0, "*"),
            typed("Tree.node.label", "string").with_cardinality(1, "1"),
            el("Tree.node.child")
                .with_cardinality(0, "*")
                .with_content_reference("#Tree.node"),
            el("Tree.node.sibling")
                .with_cardinality(0, "*")
                .with_content_reference("#Tree.node"),
        ],
    )
}

/// Observation constraint whose `value[x]` admits a Quantity or a string but
/// closes its type slicing over the Quantity form only.
pub fn typed_value_profile() -> StructureDefinition {
    profile(
        "http://example.org/StructureDefinition/quantity-observation",
        "Observation",
        "constraint",
        vec![
            el("Observation"),
            el("Observation.value[x]")
                .with_cardinality(0, "1")
                .with_type(TypeReference::new("Quantity"))
                .with_type(TypeReference::new("string"))
                .with_slicing(slicing(&[("type", "$this")], "closed")),
            slice_entry("Observation.value[x]", "valueQuantity")
                .with_type(TypeReference::new("Quantity")),
        ],
    )
}

pub const RACE: &str = "http://example.org/StructureDefinition/race";

/// Core extension definition: a url and an optional string value
pub fn core_extension() -> StructureDefinition {
    core_type(
        "Extension",
        vec![
            el("Extension"),
            typed("Extension.url", "uri").with_cardinality(1, "1"),
            typed("Extension.value[x]", "string").with_cardinality(0, "1"),
        ],
    )
}

/// Extension that requires a coded value
pub fn race_extension() -> StructureDefinition {
    profile(
        RACE,
        "Extension",
        "constraint",
        vec![
            el("Extension"),
            typed("Extension.url", "uri")
                .with_cardinality(1, "1")
                .with_value_field("fixedUri", json!(RACE)),
            typed("Extension.value[x]", "Coding").with_cardinality(1, "1"),
        ],
    )
}

/// Patient constraint slicing `extension` by url, with a `race` slice
pub fn race_patient() -> StructureDefinition {
    profile(
        "http://example.org/StructureDefinition/race-patient",
        "Patient",
        "constraint",
        vec![
            el("Patient"),
            typed("Patient.extension", "Extension")
                .with_cardinality(0, "*")
                .with_slicing(slicing(&[("value", "url")], "open")),
            slice_entry("Patient.extension", "race")
                .with_cardinality(0, "1")
                .with_type(TypeReference::new("Extension").with_profile(RACE)),
        ],
    )
}

pub const ACME: &str = "http://example.org/StructureDefinition/acme";

/// Organization constraint fixing the name to "Acme"
pub fn acme_organization() -> StructureDefinition {
    profile(
        ACME,
        "Organization",
        "constraint",
        vec![
            el("Organization"),
            typed("Organization.id", "id").with_cardinality(0, "1"),
            typed("Organization.name", "string")
                .with_cardinality(1, "1")
                .with_value_field("fixedString", json!("Acme")),
        ],
    )
}

/// Patient constraint whose closed practitioner group admits only references
/// to the Acme organization, discriminated through `resolve()`
pub fn gp_patient() -> StructureDefinition {
    profile(
        "http://example.org/StructureDefinition/gp-patient",
        "Patient",
        "constraint",
        vec![
            el("Patient"),
            typed("Patient.contained", "Resource").with_cardinality(0, "*"),
            el("Patient.generalPractitioner")
                .with_cardinality(0, "*")
                .with_type(TypeReference::new("Reference").with_target_profile(core("Organization")))
                .with_slicing(slicing(&[("value", "resolve().name")], "closed")),
            slice_entry("Patient.generalPractitioner", "acme")
                .with_type(TypeReference::new("Reference").with_target_profile(ACME)),
        ],
    )
}

/// Minimal core definitions needed to validate references between patients
pub fn reference_profiles() -> Vec<StructureDefinition> {
    let mut resource = core_type(
        "Resource",
        vec![el("Resource"), typed("Resource.id", "id").with_cardinality(0, "1")],
    );
    resource.is_abstract = true;

    vec![
        resource,
        core_type(
            "Reference",
            vec![
                el("Reference"),
                typed("Reference.reference", "string").with_cardinality(0, "1"),
            ],
        ),
        core_type(
            "Patient",
            vec![
                el("Patient"),
                typed("Patient.id", "id").with_cardinality(0, "1"),
                typed("Patient.contained", "Resource").with_cardinality(0, "*"),
                el("Patient.managingOrganization")
                    .with_cardinality(0, "1")
                    .with_type(
                        TypeReference::new("Reference").with_target_profile(core("Organization")),
                    ),
                el("Patient.link")
                    .with_cardinality(0, "*")
                    .with_type(TypeReference::new("Reference").with_target_profile(core("Patient"))),
            ],
        ),
        core_type(
            "Organization",
            vec![
                el("Organization"),
                typed("Organization.id", "id").with_cardinality(0, "1"),
                typed("Organization.name", "string").with_cardinality(1, "1"),
            ],
        ),
        core_type(
            "Bundle",
            vec![
                el("Bundle"),
                typed("Bundle.entry", "BackboneElement").with_cardinality(0, "*"),
                typed("Bundle.entry.fullUrl", "uri").with_cardinality(0, "1"),
                typed("Bundle.entry.resource", "Resource").with_cardinality(0, "1"),
            ],
        ),
    ]
}

/// Profile source that counts how often it is asked
pub struct CountingSource {
    inner: InMemoryProfileSource,
    calls: AtomicUsize,
}

impl CountingSource {
    pub fn new(profiles: Vec<StructureDefinition>) -> Self {
        Self {
            inner: InMemoryProfileSource::new().with_profiles(profiles),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileSource for CountingSource {
    async fn resolve(
        &self,
        url: &str,
        version: Option<&str>,
    ) -> ResolverResult<Option<Arc<StructureDefinition>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(url, version).await
    }
}

/// Builtin primitives first, then the profiles, behind a cache
pub fn resolver_for(profiles: Vec<StructureDefinition>) -> Arc<CachedSchemaResolver> {
    let source = Arc::new(InMemoryProfileSource::new().with_profiles(profiles));
    Arc::new(CachedSchemaResolver::new(Arc::new(MultiSchemaResolver::new(
        vec![
            Arc::new(BuiltinSchemaResolver::new()) as Arc<dyn SchemaResolver>,
            Arc::new(ProfileSourceSchemaResolver::new(source)),
        ],
    ))))
}

pub fn validator_for(profiles: Vec<StructureDefinition>) -> Validator {
    Validator::new(resolver_for(profiles))
}

pub fn converter_for(profiles: Vec<StructureDefinition>) -> SchemaConverter {
    SchemaConverter::new(Arc::new(InMemoryProfileSource::new().with_profiles(profiles)))
}

pub fn kinds(outcome: &ValidationOutcome) -> Vec<IssueKind> {
    outcome.issues.iter().map(|i| i.kind).collect()
}
