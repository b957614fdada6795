//! # OctoFHIR Profile Schema
//!
//! Compiles FHIR profiles (StructureDefinitions) into immutable validation
//! schemas and validates instances against them.
//!
//! ## Features
//!
//! - **Compilation**: element constraints, slicing, type references and
//!   content-referenced backbones become a tree of [`Assertion`]s
//! - **Resolution**: composable schema resolvers with a lock-free,
//!   insert-if-absent cache and built-in primitive type schemas
//! - **Validation**: tri-state evaluation with structured issues, bundled,
//!   contained and external references, and circular-reference detection
//! - **Pluggable services**: terminology, external references and invariant
//!   evaluation are injected through async traits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use octofhir_profileschema::*;
//! use std::sync::Arc;
//!
//! # async fn example(profiles: Vec<StructureDefinition>, patient: serde_json::Value) {
//! let source = Arc::new(InMemoryProfileSource::new().with_profiles(profiles));
//! let resolver = Arc::new(CachedSchemaResolver::new(Arc::new(MultiSchemaResolver::new(vec![
//!     Arc::new(BuiltinSchemaResolver::new()) as Arc<dyn SchemaResolver>,
//!     Arc::new(ProfileSourceSchemaResolver::new(source)),
//! ]))));
//!
//! let validator = Validator::new(resolver);
//! let outcome = validator
//!     .validate(
//!         &ElementNode::from_json(&patient),
//!         "http://hl7.org/fhir/StructureDefinition/Patient",
//!     )
//!     .await;
//! assert!(outcome.is_valid());
//! # }
//! ```

pub mod config;
pub mod converter;
pub mod error;
pub mod instance;
pub mod invariant;
pub mod navigator;
pub mod reference;
pub mod resolver;
pub mod terminology;
pub mod types;
pub mod validation;

pub use config::{ConverterSettings, ValidationSettings};
pub use converter::{ConversionMode, SchemaConverter};
pub use error::{CompileError, CompileErrorCode, ResolverError, ResolverResult, Result};
pub use instance::ElementNode;
pub use invariant::{InvariantError, InvariantEvaluator};
pub use navigator::ElementNavigator;
pub use reference::{ExternalReferenceResolver, InMemoryReferenceResolver, ReferenceError};
pub use resolver::{
    BuiltinSchemaResolver, CachedSchemaResolver, InMemoryProfileSource, MultiSchemaResolver,
    ProfileSource, ProfileSourceSchemaResolver, SchemaLookup, SchemaResolver, lookup_schema,
};
pub use terminology::{
    BindingStrength, CacheConfig, CachedTerminologyService, InMemoryTerminologyService,
    TerminologyError, TerminologyService,
};
pub use types::*;
pub use validation::Validator;
