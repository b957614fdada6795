//! StructureDefinition types consumed by the schema converter.
//!
//! Only the parts of a profile that influence validation are modelled; the
//! polymorphic `fixed[x]`, `pattern[x]`, `minValue[x]` and `maxValue[x]`
//! properties are captured through a flattened map and exposed through
//! typed accessors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Legacy type marker carrying the FHIR type of a system-typed element
pub const FHIR_TYPE_EXTENSION: &str =
    "http://hl7.org/fhir/StructureDefinition/structuredefinition-fhir-type";
/// Legacy type marker carrying the JSON type of a primitive value
pub const JSON_TYPE_EXTENSION: &str =
    "http://hl7.org/fhir/StructureDefinition/structuredefinition-json-type";
/// Regular expression constraint on a primitive type
pub const REGEX_EXTENSION: &str = "http://hl7.org/fhir/StructureDefinition/regex";

/// Extension within a StructureDefinition.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Extension {
    pub url: String,
    #[serde(rename = "valueString", skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
    #[serde(rename = "valueCanonical", skip_serializing_if = "Option::is_none")]
    pub value_canonical: Option<String>,
    #[serde(rename = "valueUrl", skip_serializing_if = "Option::is_none")]
    pub value_url: Option<String>,
    #[serde(rename = "valueUri", skip_serializing_if = "Option::is_none")]
    pub value_uri: Option<String>,
    #[serde(rename = "valueBoolean", skip_serializing_if = "Option::is_none")]
    pub value_boolean: Option<bool>,
}

impl Extension {
    /// First string-like value carried by the extension
    pub fn string_value(&self) -> Option<&str> {
        self.value_string
            .as_deref()
            .or(self.value_url.as_deref())
            .or(self.value_uri.as_deref())
            .or(self.value_canonical.as_deref())
    }
}

fn find_extension<'a>(extensions: &'a Option<Vec<Extension>>, url: &str) -> Option<&'a Extension> {
    extensions
        .as_ref()
        .and_then(|list| list.iter().find(|e| e.url == url))
}

/// Aggregation modes allowed for a reference
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    Contained,
    Referenced,
    Bundled,
}

/// Versioning rule for a reference
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VersioningRule {
    Either,
    Independent,
    Specific,
}

/// Type reference of an element definition.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TypeReference {
    /// Type code; absent on some legacy system-typed elements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profile: Vec<String>,
    #[serde(rename = "targetProfile", default, skip_serializing_if = "Vec::is_empty")]
    pub target_profile: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregation: Vec<AggregationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versioning: Option<VersioningRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<Vec<Extension>>,
}

impl TypeReference {
    pub fn new<S: Into<String>>(code: S) -> Self {
        Self {
            code: Some(code.into()),
            ..Default::default()
        }
    }

    pub fn with_profile<S: Into<String>>(mut self, profile: S) -> Self {
        self.profile.push(profile.into());
        self
    }

    pub fn with_target_profile<S: Into<String>>(mut self, profile: S) -> Self {
        self.target_profile.push(profile.into());
        self
    }

    /// Regex declared on the type through the regex extension
    pub fn regex(&self) -> Option<&str> {
        find_extension(&self.extension, REGEX_EXTENSION).and_then(Extension::string_value)
    }

    pub fn fhir_type_marker(&self) -> Option<&str> {
        find_extension(&self.extension, FHIR_TYPE_EXTENSION).and_then(Extension::string_value)
    }

    pub fn json_type_marker(&self) -> Option<&str> {
        find_extension(&self.extension, JSON_TYPE_EXTENSION).and_then(Extension::string_value)
    }
}

/// Invariant declared on an element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementConstraint {
    pub key: String,
    /// error | warning
    pub severity: String,
    #[serde(default)]
    pub human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

/// Value set binding of an element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementBinding {
    /// required | extensible | preferred | example
    pub strength: String,
    #[serde(rename = "valueSet", skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
}

/// Slicing discriminator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Discriminator {
    /// value | exists | pattern | type | profile
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
}

impl Discriminator {
    pub fn new<S: Into<String>>(kind: S, path: S) -> Self {
        Self {
            kind: kind.into(),
            path: path.into(),
        }
    }
}

/// Slicing declared on a slice intro element.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ElementSlicing {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discriminator: Vec<Discriminator>,
    /// closed | open | openAtEnd
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,
}

/// One constrained node of a profile's element tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ElementDefinition {
    /// Element id (path with slice names)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub path: String,
    #[serde(rename = "sliceName", skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slicing: Option<ElementSlicing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    /// Maximum cardinality ("*" for unbounded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(rename = "contentReference", skip_serializing_if = "Option::is_none")]
    pub content_reference: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<TypeReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraint: Vec<ElementConstraint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<ElementBinding>,
    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<Vec<Extension>>,

    /// fixed\[x\], pattern\[x\], minValue\[x\] and maxValue\[x\] fields
    #[serde(flatten)]
    pub value_fields: HashMap<String, Value>,
}

impl ElementDefinition {
    pub fn new<S: Into<String>>(path: S) -> Self {
        let path = path.into();
        Self {
            id: Some(path.clone()),
            path,
            ..Default::default()
        }
    }

    /// Element id, falling back to the path
    pub fn id_or_path(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.path)
    }

    /// Last segment of the path
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    pub fn depth(&self) -> usize {
        self.path.split('.').count()
    }

    pub fn is_choice(&self) -> bool {
        self.path.ends_with("[x]")
    }

    pub fn type_codes(&self) -> Vec<&str> {
        self.types.iter().filter_map(|t| t.code.as_deref()).collect()
    }

    /// Inline composite element: its structure is defined by its own children
    pub fn is_backbone_kind(&self) -> bool {
        matches!(
            self.type_codes().as_slice(),
            ["BackboneElement"] | ["Element"]
        )
    }

    /// Element typed as an arbitrary (possibly contained) resource
    pub fn is_resource_placeholder(&self) -> bool {
        self.type_codes()
            .iter()
            .any(|c| matches!(*c, "Resource" | "DomainResource"))
    }

    fn prefixed_value(&self, prefix: &str) -> Option<(&str, &Value)> {
        self.value_fields.iter().find_map(|(key, value)| {
            let suffix = key.strip_prefix(prefix)?;
            suffix
                .starts_with(|c: char| c.is_ascii_uppercase())
                .then_some((suffix, value))
        })
    }

    /// fixed\[x\] as (type suffix, value)
    pub fn fixed(&self) -> Option<(&str, &Value)> {
        self.prefixed_value("fixed")
    }

    /// pattern\[x\] as (type suffix, value)
    pub fn pattern(&self) -> Option<(&str, &Value)> {
        self.prefixed_value("pattern")
    }

    pub fn min_value(&self) -> Option<(&str, &Value)> {
        self.prefixed_value("minValue")
    }

    pub fn max_value(&self) -> Option<(&str, &Value)> {
        self.prefixed_value("maxValue")
    }

    // Builder helpers, mostly useful for constructing profiles in code

    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_slice_name<S: Into<String>>(mut self, name: S) -> Self {
        self.slice_name = Some(name.into());
        self
    }

    pub fn with_cardinality(mut self, min: u32, max: &str) -> Self {
        self.min = Some(min);
        self.max = Some(max.to_string());
        self
    }

    pub fn with_type(mut self, type_ref: TypeReference) -> Self {
        self.types.push(type_ref);
        self
    }

    pub fn with_slicing(mut self, slicing: ElementSlicing) -> Self {
        self.slicing = Some(slicing);
        self
    }

    pub fn with_content_reference<S: Into<String>>(mut self, reference: S) -> Self {
        self.content_reference = Some(reference.into());
        self
    }

    pub fn with_value_field<S: Into<String>>(mut self, key: S, value: Value) -> Self {
        self.value_fields.insert(key.into(), value);
        self
    }

    pub fn with_binding<S: Into<String>>(mut self, strength: S, value_set: S) -> Self {
        self.binding = Some(ElementBinding {
            strength: strength.into(),
            value_set: Some(value_set.into()),
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ElementList {
    pub element: Vec<ElementDefinition>,
}

/// A profile: the unit of compilation.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StructureDefinition {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub name: String,
    /// resource | complex-type | primitive-type | logical
    #[serde(default)]
    pub kind: String,
    #[serde(rename = "abstract", default)]
    pub is_abstract: bool,
    /// Type being defined or constrained
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "baseDefinition", skip_serializing_if = "Option::is_none")]
    pub base_definition: Option<String>,
    /// specialization | constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ElementList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub differential: Option<ElementList>,
}

impl StructureDefinition {
    pub fn is_constraint(&self) -> bool {
        self.derivation.as_deref() == Some("constraint")
    }

    /// Snapshot elements, falling back to the differential
    pub fn elements(&self) -> &[ElementDefinition] {
        self.snapshot
            .as_ref()
            .or(self.differential.as_ref())
            .map(|list| list.element.as_slice())
            .unwrap_or(&[])
    }
}
