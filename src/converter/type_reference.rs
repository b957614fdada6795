//! Conversion of an element's type references into assertions.

use std::collections::HashSet;

use super::Compilation;
use crate::error::Result;
use crate::types::schema::{
    Assertion, CanonicalId, ReferencedInstance, SchemaTarget, SliceCase, SliceSpec, SlicingRules,
};
use crate::types::structure_definition::{ElementDefinition, TypeReference};
use crate::types::validation::IssueKind;

/// Convert the type references of `element`.
///
/// One distinct code yields a single-type conversion; several codes yield a
/// slice over the instance's type label, in declaration order, whose default
/// rejects every other type.
pub(crate) fn convert_type_references(
    ctx: &Compilation<'_>,
    element: &ElementDefinition,
) -> Result<Assertion> {
    let types = &element.types;
    if types.is_empty() {
        return Ok(Assertion::success());
    }

    let codes = types
        .iter()
        .map(|t| resolve_code(ctx, element, t))
        .collect::<Result<Vec<_>>>()?;

    let mut seen = HashSet::new();
    if let Some(duplicate) = codes.iter().find(|code| !seen.insert(code.as_str())) {
        return Err(ctx.fault(
            element,
            format!("type code '{duplicate}' is listed more than once"),
        ));
    }

    if let [single] = types.as_slice() {
        return Ok(convert_single(ctx, single, &codes[0]));
    }

    let cases = types
        .iter()
        .zip(&codes)
        .map(|(type_ref, code)| SliceCase {
            name: code.clone(),
            condition: Assertion::TypeLabel(vec![code.clone()]),
            cardinality: None,
            body: convert_single(ctx, type_ref, code),
        })
        .collect();

    Ok(Assertion::Slice(SliceSpec {
        ordered: false,
        rules: SlicingRules::Closed,
        cases,
        default: Box::new(Assertion::failure(
            IssueKind::TypeMismatch,
            format!("Element type is not one of the allowed types: {}", codes.join(", ")),
        )),
    }))
}

/// Extension profiles the member slices of the slice intro at `intro` check
/// their values against.
pub(crate) fn claimed_extension_profiles(ctx: &Compilation<'_>, intro: usize) -> Vec<String> {
    ctx.nav
        .member_slices(intro)
        .into_iter()
        .flat_map(|slice| ctx.nav.element(slice).types.iter())
        .filter(|t| t.code.as_deref() == Some("Extension"))
        .flat_map(|t| t.profile.iter())
        .map(|profile| CanonicalId::parse(profile).url)
        .collect()
}

/// Skip the url-named schema for extensions a slice body already checks.
pub(crate) fn exclude_extension_urls(assertion: &mut Assertion, urls: &[String]) {
    match assertion {
        Assertion::SchemaReference(SchemaTarget::ExtensionUrl { exclude }) => {
            for url in urls {
                if !exclude.contains(url) {
                    exclude.push(url.clone());
                }
            }
        }
        Assertion::AllOf(parts) => {
            for part in parts {
                exclude_extension_urls(part, urls);
            }
        }
        _ => {}
    }
}

/// Type code, or a system type derived from the legacy type markers
fn resolve_code(
    ctx: &Compilation<'_>,
    element: &ElementDefinition,
    type_ref: &TypeReference,
) -> Result<String> {
    if let Some(code) = &type_ref.code {
        return Ok(code.clone());
    }
    let marker = type_ref
        .json_type_marker()
        .or_else(|| type_ref.fhir_type_marker())
        .ok_or_else(|| ctx.fault(element, "type reference has no code"))?;
    Ok(format!(
        "{}{}",
        ctx.settings.system_base_url,
        system_type_for(marker)
    ))
}

fn system_type_for(marker: &str) -> &'static str {
    match marker {
        "boolean" => "Boolean",
        "number" | "decimal" => "Decimal",
        "integer" | "positiveInt" | "unsignedInt" | "integer64" => "Integer",
        "date" => "Date",
        "dateTime" | "instant" => "DateTime",
        "time" => "Time",
        _ => "String",
    }
}

fn convert_single(ctx: &Compilation<'_>, type_ref: &TypeReference, code: &str) -> Assertion {
    let profile_assertion = profile_assertion(ctx, type_ref, code);

    match code {
        "Reference" => Assertion::all_of(vec![
            profile_assertion,
            Assertion::ReferencedInstance(ReferencedInstance {
                schema: Box::new(Assertion::all_of(vec![
                    reference_targets(ctx, type_ref),
                    Assertion::SchemaReference(SchemaTarget::DeclaredProfiles),
                ])),
                aggregation: type_ref.aggregation.clone(),
                versioning: type_ref.versioning,
            }),
        ]),
        "Extension" => Assertion::all_of(vec![
            profile_assertion,
            Assertion::SchemaReference(SchemaTarget::ExtensionUrl {
                exclude: type_ref
                    .profile
                    .iter()
                    .map(|profile| CanonicalId::parse(profile).url)
                    .collect(),
            }),
        ]),
        "Resource" | "DomainResource" => Assertion::all_of(vec![
            profile_assertion,
            Assertion::SchemaReference(SchemaTarget::DeclaredOrRuntime {
                fallback: CanonicalId::new(ctx.settings.type_canonical(code)),
            }),
        ]),
        _ => profile_assertion,
    }
}

/// The code's default schema, or the declared profiles
fn profile_assertion(ctx: &Compilation<'_>, type_ref: &TypeReference, code: &str) -> Assertion {
    match type_ref.profile.as_slice() {
        [] => Assertion::reference(CanonicalId::new(ctx.settings.type_canonical(code))),
        [single] => Assertion::reference(CanonicalId::parse(single)),
        profiles => Assertion::Slice(SliceSpec {
            ordered: false,
            rules: SlicingRules::Closed,
            cases: profiles
                .iter()
                .map(|profile| SliceCase {
                    name: sanitize_name(profile),
                    condition: Assertion::reference(CanonicalId::parse(profile)),
                    cardinality: None,
                    body: Assertion::success(),
                })
                .collect(),
            default: Box::new(Assertion::failure(
                IssueKind::TypeMismatch,
                format!(
                    "Element does not conform to any of the profiles: {}",
                    profiles.join(", ")
                ),
            )),
        }),
    }
}

/// Schema a referenced instance must conform to
fn reference_targets(ctx: &Compilation<'_>, type_ref: &TypeReference) -> Assertion {
    let generic = ctx.settings.type_canonical("Resource");
    if type_ref.target_profile.iter().all(|p| *p == generic) {
        return Assertion::SchemaReference(SchemaTarget::RuntimeType {
            fallback: CanonicalId::new(generic),
        });
    }
    Assertion::any_of(
        type_ref
            .target_profile
            .iter()
            .map(|p| Assertion::reference(CanonicalId::parse(p)))
            .collect(),
    )
}

/// Case name derived from a profile url
fn sanitize_name(profile: &str) -> String {
    let tail = profile
        .split('|')
        .next()
        .unwrap_or(profile)
        .rsplit('/')
        .next()
        .unwrap_or(profile);
    tail.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
