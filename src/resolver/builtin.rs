//! Built-in schemas for FHIR primitive types and FHIRPath system types.
//!
//! Placing [`BuiltinSchemaResolver`] first in a [`super::MultiSchemaResolver`]
//! lets primitive values be checked without compiling the core primitive
//! profiles.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::SchemaResolver;
use crate::config::{CORE_BASE_URL, SYSTEM_BASE_URL};
use crate::error::ResolverResult;
use crate::types::schema::{Assertion, CanonicalId, CompiledSchema, RegexCheck};

const DATE: &str = r"([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1]))?)?";
const DATE_TIME: &str = r"([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1])(T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00)))?)?)?";
const INSTANT: &str = r"([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)-(0[1-9]|1[0-2])-(0[1-9]|[1-2][0-9]|3[0-1])T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00))";
const TIME: &str = r"([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?";
const DECIMAL: &str = r"-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?";
const INTEGER: &str = r"[0]|[-+]?[1-9][0-9]*";

/// FHIR primitive type patterns
const FHIR_PRIMITIVES: &[(&str, &str)] = &[
    ("boolean", "true|false"),
    ("integer", INTEGER),
    ("integer64", INTEGER),
    ("decimal", DECIMAL),
    ("string", r"[ \r\n\t\S]+"),
    ("markdown", r"\s*(\S|\s)*"),
    ("uri", r"\S*"),
    ("url", r"\S*"),
    ("canonical", r"\S*"),
    ("code", r"[^\s]+(\s[^\s]+)*"),
    ("id", r"[A-Za-z0-9\-\.]{1,64}"),
    ("oid", r"urn:oid:[0-2](\.(0|[1-9][0-9]*))+"),
    (
        "uuid",
        r"urn:uuid:[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
    ),
    ("base64Binary", r"(\s*([0-9a-zA-Z\+/=]){4}\s*)+"),
    ("unsignedInt", r"[0]|([1-9][0-9]*)"),
    ("positiveInt", r"\+?[1-9][0-9]*"),
    ("date", DATE),
    ("dateTime", DATE_TIME),
    ("instant", INSTANT),
    ("time", TIME),
];

/// FHIRPath system type patterns
const SYSTEM_TYPES: &[(&str, &str)] = &[
    ("String", r"(?s).*"),
    ("Boolean", "true|false"),
    ("Integer", r"[-+]?[0-9]+"),
    ("Decimal", DECIMAL),
    ("Date", DATE),
    ("DateTime", DATE_TIME),
    ("Time", TIME),
];

/// Resolver for primitive types that need no compiled profile.
pub struct BuiltinSchemaResolver {
    schemas: HashMap<String, Arc<CompiledSchema>>,
}

impl BuiltinSchemaResolver {
    pub fn new() -> Self {
        let fhir = FHIR_PRIMITIVES
            .iter()
            .map(|(name, pattern)| (format!("{CORE_BASE_URL}{name}"), *pattern));
        let system = SYSTEM_TYPES
            .iter()
            .map(|(name, pattern)| (format!("{SYSTEM_BASE_URL}{name}"), *pattern));

        let schemas = fhir
            .chain(system)
            .filter_map(|(url, pattern)| match RegexCheck::new(pattern) {
                Ok(check) => {
                    let schema =
                        CompiledSchema::new(CanonicalId::new(url.clone()), vec![Assertion::Regex(check)]);
                    Some((url, Arc::new(schema)))
                }
                Err(err) => {
                    warn!(url = %url, error = %err, "skipping builtin schema with invalid pattern");
                    None
                }
            })
            .collect();

        Self { schemas }
    }

    pub fn knows(&self, url: &str) -> bool {
        self.schemas.contains_key(url)
    }
}

impl Default for BuiltinSchemaResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaResolver for BuiltinSchemaResolver {
    async fn get_schema(
        &self,
        canonical: &CanonicalId,
    ) -> ResolverResult<Option<Arc<CompiledSchema>>> {
        Ok(self.schemas.get(&canonical.url).cloned())
    }
}
