use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{ProfileSource, SchemaResolver};
use crate::config::ConverterSettings;
use crate::converter::SchemaConverter;
use crate::error::ResolverResult;
use crate::types::schema::{CanonicalId, CompiledSchema};

/// Compiles profiles fetched from a [`ProfileSource`] on request.
///
/// Every call compiles afresh; wrap it in a [`super::CachedSchemaResolver`]
/// to compile each canonical once.
pub struct ProfileSourceSchemaResolver {
    source: Arc<dyn ProfileSource>,
    converter: SchemaConverter,
}

impl ProfileSourceSchemaResolver {
    pub fn new(source: Arc<dyn ProfileSource>) -> Self {
        let converter = SchemaConverter::new(source.clone());
        Self { source, converter }
    }

    pub fn with_settings(mut self, settings: ConverterSettings) -> Self {
        self.converter = self.converter.with_settings(settings);
        self
    }
}

#[async_trait]
impl SchemaResolver for ProfileSourceSchemaResolver {
    async fn get_schema(
        &self,
        canonical: &CanonicalId,
    ) -> ResolverResult<Option<Arc<CompiledSchema>>> {
        let Some(profile) = self
            .source
            .resolve(&canonical.url, canonical.version.as_deref())
            .await?
        else {
            debug!(canonical = %canonical, "profile not found in source");
            return Ok(None);
        };

        let schema = self.converter.convert(&profile).await?;
        Ok(Some(Arc::new(schema)))
    }
}
