//! Profile to schema compilation.
//!
//! [`SchemaConverter`] walks a profile's flat element list through an
//! [`ElementNavigator`] and produces one [`CompiledSchema`] per profile:
//!
//! - value constraints become leaf assertions
//! - children become a [`ChildrenSet`]
//! - type references are handled by [`type_reference`]
//! - slice groups are handled by [`slicing`] and [`discriminator`]
//! - backbone elements requested through content references are extracted
//!   into named subschemas by the [`SubschemaCollector`]
//!
//! Compilation is a pure function of the profile and the profiles reachable
//! through the [`ProfileSource`]; no state outlives a single `convert` call.
//!
//! # Example
//!
//! ```ignore
//! let converter = SchemaConverter::new(source.clone());
//! let schema = converter.convert(&profile).await?;
//! assert_eq!(schema.id.url, profile.url);
//! ```

pub mod discriminator;
pub mod slicing;
pub mod subschema;
pub mod type_reference;

pub use subschema::SubschemaCollector;

use async_recursion::async_recursion;
use futures::future::try_join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::ConverterSettings;
use crate::error::{CompileError, Result};
use crate::navigator::ElementNavigator;
use crate::resolver::ProfileSource;
use crate::terminology::BindingStrength;
use crate::types::schema::{
    Assertion, BindingCheck, BoundKind, CanonicalId, Cardinality, ChildSchema, ChildrenSet,
    CompiledSchema, InvariantCheck, RegexCheck, ValueBound,
};
use crate::types::structure_definition::{ElementDefinition, REGEX_EXTENSION, StructureDefinition};
use crate::types::validation::IssueSeverity;

/// How much of an element a conversion produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
    /// Everything the element constrains
    Full,
    /// The shareable definition of an inline backbone type, without the
    /// cardinality of the element that declares it
    BackboneType,
    /// Only what the declaring element adds on top of a shared backbone type
    ContentReference,
}

/// Compiles profiles into schemas.
#[derive(Clone)]
pub struct SchemaConverter {
    source: Arc<dyn ProfileSource>,
    settings: ConverterSettings,
}

impl SchemaConverter {
    pub fn new(source: Arc<dyn ProfileSource>) -> Self {
        Self {
            source,
            settings: ConverterSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ConverterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ConverterSettings {
        &self.settings
    }

    /// Compile a whole profile. Any fault aborts the compilation.
    #[instrument(skip_all, fields(profile = %profile.url))]
    pub async fn convert(&self, profile: &StructureDefinition) -> Result<CompiledSchema> {
        let elements = profile.elements();
        if elements.is_empty() {
            return Err(CompileError::empty_profile(profile.url.as_str()));
        }

        let compilation = Compilation {
            profile,
            nav: ElementNavigator::new(elements),
            settings: &self.settings,
            source: self.source.as_ref(),
        };
        let mut collector = SubschemaCollector::new(&profile.url, elements);

        let mut schema = compilation
            .convert_element(0, ConversionMode::Full, &mut collector)
            .await?;
        schema.id = compilation.own_canonical();
        schema.definitions = collector.into_definitions();

        debug!(
            assertions = schema.assertions.len(),
            definitions = schema.definitions.len(),
            "compiled profile"
        );
        Ok(schema)
    }
}

impl SchemaConverter {
    /// Compile several profiles concurrently; the first fault aborts the batch.
    pub async fn convert_all(&self, profiles: &[StructureDefinition]) -> Result<Vec<CompiledSchema>> {
        try_join_all(profiles.iter().map(|profile| self.convert(profile))).await
    }
}

/// State of one `convert` call
pub(crate) struct Compilation<'a> {
    pub(crate) profile: &'a StructureDefinition,
    pub(crate) nav: ElementNavigator<'a>,
    pub(crate) settings: &'a ConverterSettings,
    pub(crate) source: &'a dyn ProfileSource,
}

impl<'a> Compilation<'a> {
    pub(crate) fn own_canonical(&self) -> CanonicalId {
        CanonicalId::new(self.profile.url.as_str()).with_version(self.profile.version.as_deref())
    }

    pub(crate) fn fault(&self, element: &ElementDefinition, message: impl Into<String>) -> CompileError {
        CompileError::incorrect_element(
            element.id_or_path().to_string(),
            self.profile.url.clone(),
            message.into(),
        )
    }

    /// Convert the element at `index`; failures are tagged with the element.
    #[async_recursion]
    pub(crate) async fn convert_element(
        &self,
        index: usize,
        mode: ConversionMode,
        collector: &mut SubschemaCollector,
    ) -> Result<CompiledSchema> {
        let element = self.nav.element(index);
        self.convert_element_inner(index, mode, collector)
            .await
            .map_err(|err| {
                err.in_element(
                    element.id_or_path(),
                    element.path.as_str(),
                    self.profile.url.as_str(),
                )
            })
    }

    async fn convert_element_inner(
        &self,
        index: usize,
        mode: ConversionMode,
        collector: &mut SubschemaCollector,
    ) -> Result<CompiledSchema> {
        let element = self.nav.element(index);
        let id = CanonicalId::local(format!("#{}", element.id_or_path()));
        let children = self.nav.children(index);
        let anchor = SubschemaCollector::anchor_for(&element.path);

        if mode == ConversionMode::Full
            && index != 0
            && !children.is_empty()
            && element.is_backbone_kind()
            && !self.profile.is_constraint()
            && collector.needs_schema_for(&anchor)
        {
            let mut shared = self
                .convert_element(index, ConversionMode::BackboneType, collector)
                .await?;
            shared.id = self.own_canonical().with_anchor(anchor.as_str());
            debug!(anchor = %anchor, "registered backbone subschema");
            collector.add(anchor.clone(), shared);

            let mut thin = self
                .convert_element(index, ConversionMode::ContentReference, collector)
                .await?;
            thin.assertions
                .push(Assertion::reference(self.own_canonical().with_anchor(anchor)));
            return Ok(thin);
        }

        let mut assertions = Vec::new();
        if mode != ConversionMode::ContentReference {
            assertions.extend(self.value_assertions(element)?);
        }
        if mode != ConversionMode::BackboneType {
            assertions.extend(self.cardinality(element));
        }
        if mode == ConversionMode::ContentReference {
            return Ok(CompiledSchema::new(id, assertions));
        }

        if children.is_empty() {
            if let Some(reference) = &element.content_reference {
                assertions.push(Assertion::reference(self.content_reference_target(reference)));
            } else {
                let mut types = type_reference::convert_type_references(self, element)?;
                if element.slicing.is_some() {
                    let claimed = type_reference::claimed_extension_profiles(self, index);
                    type_reference::exclude_extension_urls(&mut types, &claimed);
                }
                if !types.is_success() {
                    assertions.push(types);
                }
            }
        } else {
            assertions.push(self.children_set(index, &children, collector).await?);
        }

        if element.slicing.is_some() {
            assertions.push(slicing::build_slice(self, index, collector).await?);
        }

        Ok(CompiledSchema::new(id, assertions))
    }

    async fn children_set(
        &self,
        index: usize,
        children: &[usize],
        collector: &mut SubschemaCollector,
    ) -> Result<Assertion> {
        let element = self.nav.element(index);
        let mut set = IndexMap::new();
        for (order, &child) in children.iter().enumerate() {
            let schema = self
                .convert_element(child, ConversionMode::Full, collector)
                .await?;
            // Differential entries that constrain nothing
            if schema.is_empty() {
                continue;
            }
            set.insert(
                self.nav.element(child).name().to_string(),
                ChildSchema { order, schema },
            );
        }

        let at_root = index == 0;
        let allow_additional = (!at_root && element.is_resource_placeholder())
            || (at_root && self.profile.is_abstract);

        Ok(Assertion::Children(ChildrenSet {
            children: set,
            allow_additional,
        }))
    }

    pub(crate) fn cardinality(&self, element: &ElementDefinition) -> Option<Assertion> {
        Cardinality::from_definition(element.min, element.max.as_deref()).map(Assertion::Cardinality)
    }

    /// Max-length, fixed, pattern, binding, min/max value, regex and invariants
    pub(crate) fn value_assertions(&self, element: &ElementDefinition) -> Result<Vec<Assertion>> {
        let mut assertions = Vec::new();

        if let Some(max_length) = element.max_length {
            assertions.push(Assertion::MaxLength(max_length));
        }
        if let Some((_, value)) = element.fixed() {
            assertions.push(Assertion::Fixed(value.clone()));
        }
        if let Some((_, value)) = element.pattern() {
            assertions.push(Assertion::Pattern(value.clone()));
        }
        if let Some(binding) = self.binding(element) {
            assertions.push(binding);
        }
        for (kind, bound) in [
            (BoundKind::Min, element.min_value()),
            (BoundKind::Max, element.max_value()),
        ] {
            if let Some((value_type, limit)) = bound {
                assertions.push(Assertion::MinMaxValue(ValueBound {
                    kind,
                    value_type: value_type.to_string(),
                    limit: limit.clone(),
                }));
            }
        }

        let element_regex = element
            .extension
            .iter()
            .flatten()
            .filter(|e| e.url == REGEX_EXTENSION)
            .filter_map(|e| e.string_value());
        let type_regex = element.types.iter().filter_map(|t| t.regex());
        for pattern in element_regex.chain(type_regex) {
            let check = RegexCheck::new(pattern)
                .map_err(|err| self.fault(element, format!("invalid regex '{pattern}': {err}")))?;
            assertions.push(Assertion::Regex(check));
        }

        for constraint in &element.constraint {
            let Some(expression) = &constraint.expression else {
                continue;
            };
            assertions.push(Assertion::Invariant(InvariantCheck {
                key: constraint.key.clone(),
                expression: expression.clone(),
                human: constraint.human.clone(),
                severity: IssueSeverity::from_constraint(&constraint.severity),
            }));
        }

        Ok(assertions)
    }

    pub(crate) fn binding(&self, element: &ElementDefinition) -> Option<Assertion> {
        let binding = element.binding.as_ref()?;
        let value_set = binding.value_set.as_ref()?;
        let strength = BindingStrength::parse_str(&binding.strength)?;
        let abstract_allowed = element
            .type_codes()
            .iter()
            .any(|c| matches!(*c, "CodeableConcept" | "Coding" | "CodeableReference"));
        Some(Assertion::Binding(BindingCheck {
            strength,
            value_set: value_set.clone(),
            abstract_allowed,
        }))
    }

    /// Target of a content reference; local anchors of constraining profiles
    /// point into the base type they constrain.
    pub(crate) fn content_reference_target(&self, reference: &str) -> CanonicalId {
        match reference.split_once('#') {
            Some(("", fragment)) if self.profile.is_constraint() => {
                CanonicalId::new(self.settings.type_canonical(&self.profile.type_name))
                    .with_anchor(format!("#{fragment}"))
            }
            Some(("", fragment)) => self.own_canonical().with_anchor(format!("#{fragment}")),
            _ => CanonicalId::parse(reference),
        }
    }
}
