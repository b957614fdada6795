use async_trait::async_trait;
use papaya::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use super::SchemaResolver;
use crate::error::ResolverResult;
use crate::types::schema::{CanonicalId, CompiledSchema};

/// Memoizing decorator over any [`SchemaResolver`].
///
/// Lookups are lock-free. Concurrent first requests for the same canonical may
/// both reach the inner resolver; the first result inserted is kept and
/// returned to every caller. Absent results are cached as well, errors are not.
pub struct CachedSchemaResolver {
    inner: Arc<dyn SchemaResolver>,
    cache: HashMap<CanonicalId, Option<Arc<CompiledSchema>>>,
}

impl CachedSchemaResolver {
    pub fn new(inner: Arc<dyn SchemaResolver>) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached schema
    pub fn clear(&self) {
        self.cache.pin().clear();
    }
}

#[async_trait]
impl SchemaResolver for CachedSchemaResolver {
    async fn get_schema(
        &self,
        canonical: &CanonicalId,
    ) -> ResolverResult<Option<Arc<CompiledSchema>>> {
        let cached = self.cache.pin().get(canonical).cloned();
        if let Some(hit) = cached {
            trace!(canonical = %canonical, "schema cache hit");
            return Ok(hit);
        }

        debug!(canonical = %canonical, "schema cache miss");
        let resolved = self.inner.get_schema(canonical).await?;
        let kept = self
            .cache
            .pin()
            .get_or_insert(canonical.clone(), resolved)
            .clone();
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SchemaResolver for CountingResolver {
        async fn get_schema(
            &self,
            canonical: &CanonicalId,
        ) -> ResolverResult<Option<Arc<CompiledSchema>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if canonical.url.ends_with("missing") {
                return Ok(None);
            }
            Ok(Some(Arc::new(CompiledSchema::new(canonical.clone(), vec![]))))
        }
    }

    #[tokio::test]
    async fn test_second_lookup_returns_cached_instance() {
        let inner = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let cache = CachedSchemaResolver::new(inner.clone());
        let id = CanonicalId::new("http://x.org/p");

        let first = cache.get_schema(&id).await.unwrap().unwrap();
        let second = cache.get_schema(&id).await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_absent_results_are_cached_and_clear_resets() {
        let inner = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let cache = CachedSchemaResolver::new(inner.clone());
        let id = CanonicalId::new("http://x.org/missing");

        assert!(cache.get_schema(&id).await.unwrap().is_none());
        assert!(cache.get_schema(&id).await.unwrap().is_none());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get_schema(&id).await.unwrap().is_none());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
