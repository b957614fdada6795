use async_trait::async_trait;
use papaya::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::ProfileSource;
use crate::error::ResolverResult;
use crate::types::structure_definition::StructureDefinition;

/// Profile source over profiles held in memory, keyed by url and version.
#[derive(Debug, Default)]
pub struct InMemoryProfileSource {
    profiles: HashMap<String, Vec<Arc<StructureDefinition>>>,
}

impl InMemoryProfileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(self, profiles: impl IntoIterator<Item = StructureDefinition>) -> Self {
        for profile in profiles {
            self.add(profile);
        }
        self
    }

    /// Register a profile; later registrations of the same url win unversioned lookups
    pub fn add(&self, profile: StructureDefinition) {
        let profile = Arc::new(profile);
        debug!(url = %profile.url, version = ?profile.version, "registering profile");
        self.profiles.pin().update_or_insert_with(
            profile.url.clone(),
            |existing| {
                let mut versions = existing.clone();
                versions.push(profile.clone());
                versions
            },
            || vec![profile.clone()],
        );
    }

    pub fn len(&self) -> usize {
        self.profiles.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProfileSource for InMemoryProfileSource {
    async fn resolve(
        &self,
        url: &str,
        version: Option<&str>,
    ) -> ResolverResult<Option<Arc<StructureDefinition>>> {
        let profiles = self.profiles.pin();
        let Some(versions) = profiles.get(url) else {
            return Ok(None);
        };
        let found = match version {
            Some(wanted) => versions
                .iter()
                .rev()
                .find(|p| p.version.as_deref() == Some(wanted)),
            None => versions.last(),
        };
        Ok(found.cloned())
    }
}
