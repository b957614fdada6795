//! Terminology services consumed by binding assertions.
//!
//! Code validation is delegated to an injected [`TerminologyService`]. The
//! validator works without one; bindings are then skipped.
//!
//! # Example
//!
//! ```ignore
//! use octofhir_profileschema::terminology::{CacheConfig, CachedTerminologyService};
//! use std::sync::Arc;
//!
//! let service: Arc<dyn TerminologyService> = Arc::new(MyTerminologyServer::new());
//! let cached = CachedTerminologyService::new(service, CacheConfig::default());
//!
//! let validator = Validator::new(resolver).with_terminology_service(Arc::new(cached));
//! ```

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error codes for terminology lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminologyErrorCode {
    /// VS1001: Value set not found
    ValueSetNotFound = 1001,
    /// VS1002: Terminology service unavailable
    ServiceUnavailable = 1002,
    /// VS1003: Internal service error
    Internal = 1003,
}

impl std::fmt::Display for TerminologyErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VS{:04}", *self as u32)
    }
}

#[derive(Debug, Clone, Error)]
pub enum TerminologyError {
    #[error("Value set not found: {url}")]
    ValueSetNotFound { url: String },

    #[error("Terminology service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TerminologyError {
    pub fn code(&self) -> TerminologyErrorCode {
        match self {
            TerminologyError::ValueSetNotFound { .. } => TerminologyErrorCode::ValueSetNotFound,
            TerminologyError::ServiceUnavailable { .. } => TerminologyErrorCode::ServiceUnavailable,
            TerminologyError::Internal(_) => TerminologyErrorCode::Internal,
        }
    }
}

pub type TerminologyResult<T> = Result<T, TerminologyError>;

/// Result of validating a code against a value set
#[derive(Debug, Clone, PartialEq)]
pub struct CodeValidationResult {
    pub valid: bool,
    pub message: Option<String>,
}

impl CodeValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            message: None,
        }
    }

    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
        }
    }
}

/// Code validation against value sets.
///
/// Implementations may call a terminology server; the trait is async so
/// network-backed services fit without blocking.
#[async_trait]
pub trait TerminologyService: Send + Sync {
    /// Validate `code` (optionally qualified by `system`) against a value set.
    async fn validate_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
        abstract_allowed: bool,
    ) -> TerminologyResult<CodeValidationResult>;
}

/// Configuration for the terminology cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_size: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn new(ttl: Duration, max_size: u64) -> Self {
        Self { ttl, max_size }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    value_set_url: String,
    code: String,
    system: Option<String>,
    abstract_allowed: bool,
}

/// Caching wrapper around a [`TerminologyService`], backed by a moka TTL cache.
///
/// Only successful lookups are cached; service errors are retried on the next call.
pub struct CachedTerminologyService {
    inner: Arc<dyn TerminologyService>,
    cache: Cache<CacheKey, CodeValidationResult>,
}

impl CachedTerminologyService {
    pub fn new(inner: Arc<dyn TerminologyService>, config: CacheConfig) -> Self {
        let cache = Cache::builder()
            .time_to_live(config.ttl)
            .max_capacity(config.max_size)
            .build();

        Self { inner, cache }
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.cache.entry_count(),
            weighted_size: self.cache.weighted_size(),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entry_count: u64,
    pub weighted_size: u64,
}

#[async_trait]
impl TerminologyService for CachedTerminologyService {
    async fn validate_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
        abstract_allowed: bool,
    ) -> TerminologyResult<CodeValidationResult> {
        let key = CacheKey {
            value_set_url: value_set_url.to_string(),
            code: code.to_string(),
            system: system.map(str::to_string),
            abstract_allowed,
        };

        if let Some(result) = self.cache.get(&key).await {
            return Ok(result);
        }

        let result = self
            .inner
            .validate_code(value_set_url, code, system, abstract_allowed)
            .await?;
        self.cache.insert(key, result.clone()).await;

        Ok(result)
    }
}

/// FHIR binding strength levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    Required,
    Extensible,
    Preferred,
    Example,
}

impl BindingStrength {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "required" => Some(BindingStrength::Required),
            "extensible" => Some(BindingStrength::Extensible),
            "preferred" => Some(BindingStrength::Preferred),
            "example" => Some(BindingStrength::Example),
            _ => None,
        }
    }

    /// Whether validation failure at this strength is an error
    pub fn is_error_on_failure(&self) -> bool {
        matches!(self, BindingStrength::Required)
    }

    /// Whether validation failure at this strength should produce a warning
    pub fn is_warning_on_failure(&self) -> bool {
        matches!(
            self,
            BindingStrength::Extensible | BindingStrength::Preferred
        )
    }
}

/// (code, system) pairs of one value set
type CodeSet = std::collections::HashSet<(String, Option<String>)>;

/// In-memory terminology service for tests and small deployments.
#[derive(Debug, Default)]
pub struct InMemoryTerminologyService {
    value_sets: HashMap<String, CodeSet>,
}

impl InMemoryTerminologyService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_code(&mut self, value_set_url: &str, code: &str, system: Option<&str>) {
        self.value_sets
            .entry(value_set_url.to_string())
            .or_default()
            .insert((code.to_string(), system.map(str::to_string)));
    }

    pub fn with_codes(mut self, value_set_url: &str, codes: &[(&str, Option<&str>)]) -> Self {
        for (code, system) in codes {
            self.add_code(value_set_url, code, *system);
        }
        self
    }
}

#[async_trait]
impl TerminologyService for InMemoryTerminologyService {
    async fn validate_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
        _abstract_allowed: bool,
    ) -> TerminologyResult<CodeValidationResult> {
        // Value set urls may carry a version suffix
        let url = value_set_url.split('|').next().unwrap_or(value_set_url);
        let Some(codes) = self.value_sets.get(url) else {
            return Err(TerminologyError::ValueSetNotFound {
                url: value_set_url.to_string(),
            });
        };

        let found = codes.iter().any(|(c, s)| {
            c == code
                && match (system, s) {
                    (Some(wanted), Some(known)) => wanted == known,
                    _ => true,
                }
        });

        Ok(if found {
            CodeValidationResult::valid()
        } else {
            CodeValidationResult::invalid(format!(
                "Code '{code}' is not in value set '{value_set_url}'"
            ))
        })
    }
}
