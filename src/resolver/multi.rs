use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::SchemaResolver;
use crate::error::{ResolverError, ResolverResult};
use crate::types::schema::{CanonicalId, CompiledSchema};

/// Tries resolvers in declaration order and returns the first schema found.
///
/// A failing resolver does not stop the search; its error is returned only
/// when no later resolver produces a schema.
pub struct MultiSchemaResolver {
    resolvers: Vec<Arc<dyn SchemaResolver>>,
}

impl MultiSchemaResolver {
    pub fn new(resolvers: Vec<Arc<dyn SchemaResolver>>) -> Self {
        Self { resolvers }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SchemaResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }
}

#[async_trait]
impl SchemaResolver for MultiSchemaResolver {
    async fn get_schema(
        &self,
        canonical: &CanonicalId,
    ) -> ResolverResult<Option<Arc<CompiledSchema>>> {
        let mut first_error: Option<ResolverError> = None;
        for resolver in &self.resolvers {
            match resolver.get_schema(canonical).await {
                Ok(Some(schema)) => return Ok(Some(schema)),
                Ok(None) => {}
                Err(err) => {
                    warn!(canonical = %canonical, error = %err, "schema resolver failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}
