//! Extraction of content-referenced backbone elements into named subschemas.

use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::types::schema::CompiledSchema;
use crate::types::structure_definition::ElementDefinition;

/// Per-compilation registry of shared subschemas, keyed by `#path` anchors.
///
/// Only anchors requested by some element's content reference are ever
/// registered, and each at most once.
#[derive(Debug, Default)]
pub struct SubschemaCollector {
    requested: HashSet<String>,
    definitions: IndexMap<String, Arc<CompiledSchema>>,
}

impl SubschemaCollector {
    /// Scan a profile's elements for content references pointing into it.
    pub fn new(profile_url: &str, elements: &[ElementDefinition]) -> Self {
        let requested = elements
            .iter()
            .filter_map(|e| e.content_reference.as_deref())
            .filter_map(|reference| local_anchor(profile_url, reference))
            .collect();
        Self {
            requested,
            definitions: IndexMap::new(),
        }
    }

    /// Anchor that a backbone element at `path` would be registered under
    pub fn anchor_for(path: &str) -> String {
        format!("#{path}")
    }

    pub fn is_requested(&self, anchor: &str) -> bool {
        self.requested.contains(anchor)
    }

    /// Requested and not yet registered
    pub fn needs_schema_for(&self, anchor: &str) -> bool {
        self.is_requested(anchor) && !self.definitions.contains_key(anchor)
    }

    /// Register a subschema; the first registration for an anchor wins
    pub fn add(&mut self, anchor: String, schema: CompiledSchema) {
        self.definitions
            .entry(anchor)
            .or_insert_with(|| Arc::new(schema));
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn into_definitions(self) -> IndexMap<String, Arc<CompiledSchema>> {
        self.definitions
    }
}

/// `#anchor` part of a content reference that targets the given profile
fn local_anchor(profile_url: &str, reference: &str) -> Option<String> {
    if reference.starts_with('#') {
        return Some(reference.to_string());
    }
    let (url, fragment) = reference.split_once('#')?;
    let url = url.split('|').next().unwrap_or(url);
    (url == profile_url).then(|| format!("#{fragment}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::schema::CanonicalId;

    #[test]
    fn test_collects_requested_anchors() {
        let elements = vec![
            ElementDefinition::new("Questionnaire"),
            ElementDefinition::new("Questionnaire.item"),
            ElementDefinition::new("Questionnaire.item.item")
                .with_content_reference("#Questionnaire.item"),
            ElementDefinition::new("Questionnaire.other")
                .with_content_reference("http://x.org/Q#Questionnaire.other"),
            ElementDefinition::new("Questionnaire.foreign")
                .with_content_reference("http://elsewhere/Q#Questionnaire.foreign"),
        ];
        let collector = SubschemaCollector::new("http://x.org/Q", &elements);

        assert!(collector.needs_schema_for("#Questionnaire.item"));
        assert!(collector.needs_schema_for("#Questionnaire.other"));
        assert!(!collector.needs_schema_for("#Questionnaire.foreign"));
    }

    #[test]
    fn test_add_is_insert_if_absent() {
        let elements = vec![
            ElementDefinition::new("Q.item").with_content_reference("#Q.item"),
        ];
        let mut collector = SubschemaCollector::new("http://x.org/Q", &elements);
        let anchor = SubschemaCollector::anchor_for("Q.item");

        collector.add(anchor.clone(), CompiledSchema::new(CanonicalId::local("#first"), vec![]));
        assert!(!collector.needs_schema_for(&anchor));
        collector.add(anchor.clone(), CompiledSchema::new(CanonicalId::local("#second"), vec![]));

        let definitions = collector.into_definitions();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[&anchor].id.anchor.as_deref(), Some("#first"));
    }
}
