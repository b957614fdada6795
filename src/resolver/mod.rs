//! Schema resolution chain.
//!
//! Resolvers turn canonical identifiers into compiled schemas and compose:
//!
//! - [`ProfileSourceSchemaResolver`] compiles profiles fetched from a [`ProfileSource`]
//! - [`CachedSchemaResolver`] memoizes any resolver (insert-if-absent, lock-free)
//! - [`MultiSchemaResolver`] tries several resolvers in order
//! - [`BuiltinSchemaResolver`] serves primitive type schemas
//!
//! # Example
//!
//! ```ignore
//! let source = Arc::new(InMemoryProfileSource::new().with_profiles(profiles));
//! let resolver = CachedSchemaResolver::new(Arc::new(MultiSchemaResolver::new(vec![
//!     Arc::new(BuiltinSchemaResolver::new()) as Arc<dyn SchemaResolver>,
//!     Arc::new(ProfileSourceSchemaResolver::new(source)),
//! ])));
//!
//! let schema = lookup_schema(&resolver, &CanonicalId::parse(url)).await;
//! ```

pub mod builtin;
pub mod cache;
pub mod memory;
pub mod multi;
pub mod source;

pub use builtin::BuiltinSchemaResolver;
pub use cache::CachedSchemaResolver;
pub use memory::InMemoryProfileSource;
pub use multi::MultiSchemaResolver;
pub use source::ProfileSourceSchemaResolver;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::ResolverResult;
use crate::types::schema::{CanonicalId, CompiledSchema};
use crate::types::structure_definition::StructureDefinition;

/// Supplies profiles by canonical url.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Fetch a profile; `Ok(None)` when the source does not know it.
    async fn resolve(
        &self,
        url: &str,
        version: Option<&str>,
    ) -> ResolverResult<Option<Arc<StructureDefinition>>>;
}

/// Resolves canonical identifiers (without anchor) to compiled schemas.
#[async_trait]
pub trait SchemaResolver: Send + Sync {
    async fn get_schema(
        &self,
        canonical: &CanonicalId,
    ) -> ResolverResult<Option<Arc<CompiledSchema>>>;
}

/// Reportable outcome of an anchored lookup
#[derive(Debug, Clone)]
pub enum SchemaLookup {
    Found(Arc<CompiledSchema>),
    /// No resolver knows the base canonical
    NotFound(CanonicalId),
    /// The base schema exists but has no subschema under the anchor
    AnchorNotFound { canonical: CanonicalId, anchor: String },
    /// A resolver failed, e.g. the profile does not compile
    Failed { canonical: CanonicalId, message: String },
}

impl fmt::Display for SchemaLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaLookup::Found(schema) => write!(f, "found {}", schema.id),
            SchemaLookup::NotFound(canonical) => {
                write!(f, "Unable to resolve schema '{canonical}'")
            }
            SchemaLookup::AnchorNotFound { canonical, anchor } => write!(
                f,
                "Schema '{}' has no definition for anchor '{anchor}'",
                canonical.base()
            ),
            SchemaLookup::Failed { canonical, message } => {
                write!(f, "Failed to resolve schema '{canonical}': {message}")
            }
        }
    }
}

/// Resolve a possibly anchored canonical in two independent steps:
/// the base url and version first, then the anchor within the result.
pub async fn lookup_schema(resolver: &dyn SchemaResolver, canonical: &CanonicalId) -> SchemaLookup {
    let base = canonical.base();
    let schema = match resolver.get_schema(&base).await {
        Ok(Some(schema)) => schema,
        Ok(None) => return SchemaLookup::NotFound(canonical.clone()),
        Err(err) => {
            return SchemaLookup::Failed {
                canonical: canonical.clone(),
                message: err.to_string(),
            };
        }
    };

    match &canonical.anchor {
        None => SchemaLookup::Found(schema),
        Some(anchor) => match schema.definition(anchor) {
            Some(sub) => SchemaLookup::Found(sub.clone()),
            None => SchemaLookup::AnchorNotFound {
                canonical: canonical.clone(),
                anchor: anchor.clone(),
            },
        },
    }
}
