use serde::{Deserialize, Serialize};

use crate::types::validation::IssueSeverity;

/// Canonical base of the core type definitions
pub const CORE_BASE_URL: &str = "http://hl7.org/fhir/StructureDefinition/";
/// Canonical prefix of the system primitive types
pub const SYSTEM_BASE_URL: &str = "http://hl7.org/fhirpath/System.";
/// Slice name that marks the explicit default case of a slice group
pub const DEFAULT_SLICE_NAME: &str = "@default";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ConverterSettings {
    pub core_base_url: String,
    pub system_base_url: String,
    pub default_slice_name: String,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            core_base_url: CORE_BASE_URL.to_string(),
            system_base_url: SYSTEM_BASE_URL.to_string(),
            default_slice_name: DEFAULT_SLICE_NAME.to_string(),
        }
    }
}

impl ConverterSettings {
    /// Canonical url of a type code, leaving absolute codes untouched
    pub fn type_canonical(&self, code: &str) -> String {
        if code.contains("://") {
            code.to_string()
        } else {
            format!("{}{}", self.core_base_url, code)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationSettings {
    /// Maximum nesting of schema and instance references followed in one run
    pub max_depth: usize,
    /// Whether references outside the instance are handed to the external resolver
    pub resolve_external_references: bool,
    /// Severity reported when a referenced schema cannot be resolved
    pub unresolved_schema_severity: IssueSeverity,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            max_depth: 64,
            resolve_external_references: true,
            unresolved_schema_severity: IssueSeverity::Warning,
        }
    }
}
