//! Compiled schema types.
//!
//! A [`CompiledSchema`] is an immutable tree of [`Assertion`]s identified by a
//! [`CanonicalId`]. Subschemas shared through content references live in the
//! root schema's `definitions` and are addressed by anchor, never embedded twice.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::terminology::BindingStrength;
use crate::types::structure_definition::{AggregationMode, VersioningRule};
use crate::types::validation::{IssueKind, IssueSeverity};

/// Canonical identifier of a schema or subschema: `url|version#anchor`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CanonicalId {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Anchor including the leading `#`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
}

impl CanonicalId {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            version: None,
            anchor: None,
        }
    }

    /// Identifier of an inline schema, local to its enclosing profile
    pub fn local<S: Into<String>>(anchor: S) -> Self {
        Self {
            url: String::new(),
            version: None,
            anchor: Some(anchor.into()),
        }
    }

    /// Parse `url|version#anchor`; every part except the url is optional
    pub fn parse(text: &str) -> Self {
        let (rest, anchor) = match text.find('#') {
            Some(pos) => (&text[..pos], Some(text[pos..].to_string())),
            None => (text, None),
        };
        let (url, version) = match rest.split_once('|') {
            Some((url, version)) => (url, Some(version.to_string())),
            None => (rest, None),
        };
        Self {
            url: url.to_string(),
            version,
            anchor,
        }
    }

    pub fn with_version<S: Into<String>>(mut self, version: Option<S>) -> Self {
        self.version = version.map(Into::into);
        self
    }

    pub fn with_anchor<S: Into<String>>(mut self, anchor: S) -> Self {
        self.anchor = Some(anchor.into());
        self
    }

    /// Same identifier with the anchor removed
    pub fn base(&self) -> CanonicalId {
        Self {
            url: self.url.clone(),
            version: self.version.clone(),
            anchor: None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.url.is_empty()
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)?;
        if let Some(version) = &self.version {
            write!(f, "|{version}")?;
        }
        if let Some(anchor) = &self.anchor {
            write!(f, "{anchor}")?;
        }
        Ok(())
    }
}

/// A compiled, immutable validation schema.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledSchema {
    pub id: CanonicalId,
    pub assertions: Vec<Assertion>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub definitions: IndexMap<String, Arc<CompiledSchema>>,
}

impl CompiledSchema {
    pub fn new(id: CanonicalId, assertions: Vec<Assertion>) -> Self {
        Self {
            id,
            assertions,
            definitions: IndexMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.assertions.is_empty()
    }

    /// Named subschema registered under `anchor`
    pub fn definition(&self, anchor: &str) -> Option<&Arc<CompiledSchema>> {
        self.definitions.get(anchor)
    }

    /// All assertions folded into one
    pub fn as_assertion(&self) -> Assertion {
        Assertion::all_of(self.assertions.clone())
    }
}

/// Allowed number of values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cardinality {
    pub min: u32,
    /// `None` when unbounded
    pub max: Option<u32>,
}

impl Cardinality {
    pub fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }

    /// Parse a profile's `min`/`max` pair; `None` when the pair allows anything
    pub fn from_definition(min: Option<u32>, max: Option<&str>) -> Option<Self> {
        let max = match max {
            None | Some("*") => None,
            Some(text) => Some(text.parse::<u32>().ok()?),
        };
        let min = min.unwrap_or(0);
        (min > 0 || max.is_some()).then_some(Self { min, max })
    }

    pub fn allows(&self, count: usize) -> bool {
        let count = count as u64;
        count >= self.min as u64 && self.max.is_none_or(|max| count <= max as u64)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}..{}", self.min, max),
            None => write!(f, "{}..*", self.min),
        }
    }
}

/// Anchored regular expression over a primitive's string form
#[derive(Debug, Clone)]
pub struct RegexCheck {
    pub pattern: String,
    compiled: Regex,
}

impl RegexCheck {
    pub fn new(pattern: &str) -> std::result::Result<Self, regex::Error> {
        let compiled = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Self {
            pattern: pattern.to_string(),
            compiled,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.compiled.is_match(text)
    }
}

impl Serialize for RegexCheck {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.pattern)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundKind {
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueBound {
    pub kind: BoundKind,
    /// Type suffix of the bound, e.g. `Integer` or `Date`
    pub value_type: String,
    pub limit: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingCheck {
    pub strength: BindingStrength,
    pub value_set: String,
    pub abstract_allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvariantCheck {
    pub key: String,
    pub expression: String,
    pub human: String,
    pub severity: IssueSeverity,
}

/// Where a schema reference finds its target
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "target", rename_all = "camelCase")]
pub enum SchemaTarget {
    /// A schema known at compile time
    Canonical { id: CanonicalId },
    /// The schema named by the instance's own `url` child (extensions)
    ExtensionUrl { exclude: Vec<String> },
    /// The core schema of the instance's runtime resource type
    RuntimeType { fallback: CanonicalId },
    /// Every profile the instance declares in `meta.profile`
    DeclaredProfiles,
    /// Declared profiles if any non-generic ones are present, else the runtime type
    DeclaredOrRuntime { fallback: CanonicalId },
}

/// Child schema with its position in the profile
#[derive(Debug, Clone, Serialize)]
pub struct ChildSchema {
    pub order: usize,
    pub schema: CompiledSchema,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildrenSet {
    /// Keyed by element name; choice elements keep their `[x]` suffix
    pub children: IndexMap<String, ChildSchema>,
    pub allow_additional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SlicingRules {
    Closed,
    Open,
    OpenAtEnd,
}

impl SlicingRules {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "closed" => Some(SlicingRules::Closed),
            "open" => Some(SlicingRules::Open),
            "openAtEnd" => Some(SlicingRules::OpenAtEnd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SliceCase {
    pub name: String,
    /// Decides membership of a single value
    pub condition: Assertion,
    /// Applied to the group of values assigned to this case
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<Cardinality>,
    pub body: Assertion,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceSpec {
    pub ordered: bool,
    pub rules: SlicingRules,
    pub cases: Vec<SliceCase>,
    /// Applied to values no case claims
    pub default: Box<Assertion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferencedInstance {
    pub schema: Box<Assertion>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aggregation: Vec<AggregationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versioning: Option<VersioningRule>,
}

/// One step of a discriminator path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", content = "arg", rename_all = "camelCase")]
pub enum PathStep {
    This,
    Child(String),
    Resolve,
    Extension(String),
    OfType(String),
}

/// Assertion applied to the values reached by following a path
#[derive(Debug, Clone, Serialize)]
pub struct PathSelector {
    pub steps: Vec<PathStep>,
    pub assertion: Box<Assertion>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum ResultLiteral {
    Success,
    Undecided,
    Failure { kind: IssueKind, message: String },
}

/// Closed vocabulary of validation assertions.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Assertion {
    Cardinality(Cardinality),
    MaxLength(usize),
    Fixed(Value),
    Pattern(Value),
    Binding(BindingCheck),
    Regex(RegexCheck),
    MinMaxValue(ValueBound),
    TypeLabel(Vec<String>),
    SchemaReference(SchemaTarget),
    Children(ChildrenSet),
    AllOf(Vec<Assertion>),
    AnyOf(Vec<Assertion>),
    Slice(SliceSpec),
    ReferencedInstance(ReferencedInstance),
    Invariant(InvariantCheck),
    PathSelector(PathSelector),
    Result(ResultLiteral),
}

impl Assertion {
    pub fn success() -> Self {
        Assertion::Result(ResultLiteral::Success)
    }

    pub fn failure<S: Into<String>>(kind: IssueKind, message: S) -> Self {
        Assertion::Result(ResultLiteral::Failure {
            kind,
            message: message.into(),
        })
    }

    pub fn reference(id: CanonicalId) -> Self {
        Assertion::SchemaReference(SchemaTarget::Canonical { id })
    }

    /// Conjunction, collapsing the empty and singleton cases
    pub fn all_of(mut members: Vec<Assertion>) -> Self {
        members.retain(|m| !m.is_success());
        match members.len() {
            0 => Assertion::success(),
            1 => members.remove(0),
            _ => Assertion::AllOf(members),
        }
    }

    /// Disjunction, collapsing the empty and singleton cases
    pub fn any_of(mut members: Vec<Assertion>) -> Self {
        if members.is_empty() || members.iter().any(Assertion::is_success) {
            return Assertion::success();
        }
        match members.len() {
            1 => members.remove(0),
            _ => Assertion::AnyOf(members),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Assertion::Result(ResultLiteral::Success))
    }
}
