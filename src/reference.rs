//! Reference resolution for referenced-instance validation.
//!
//! References are followed in three ways:
//! - contained (`#id`), looked up in the enclosing resource
//! - bundled, looked up among the entries of an enclosing Bundle
//! - external, handed to an injected [`ExternalReferenceResolver`]
//!
//! # Example
//!
//! ```ignore
//! let resolver = InMemoryReferenceResolver::new()
//!     .with_resource("Organization/1", ElementNode::from_json(&org_json));
//!
//! let validator = Validator::new(schemas).with_reference_resolver(Arc::new(resolver));
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

use crate::instance::ElementNode;
use crate::types::structure_definition::AggregationMode;

/// Error codes for reference resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceErrorCode {
    /// REF1001: Reference resolution service unavailable
    ServiceUnavailable = 1001,
    /// REF1002: Invalid reference format
    InvalidReferenceFormat = 1002,
}

impl std::fmt::Display for ReferenceErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "REF{:04}", *self as u32)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ReferenceError {
    #[error("Reference resolution service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Invalid reference format: {reference}")]
    InvalidReferenceFormat { reference: String },
}

impl ReferenceError {
    pub fn code(&self) -> ReferenceErrorCode {
        match self {
            ReferenceError::ServiceUnavailable { .. } => ReferenceErrorCode::ServiceUnavailable,
            ReferenceError::InvalidReferenceFormat { .. } => {
                ReferenceErrorCode::InvalidReferenceFormat
            }
        }
    }
}

pub type ReferenceResult<T> = Result<T, ReferenceError>;

/// Fetches instances that live outside the instance being validated.
#[async_trait]
pub trait ExternalReferenceResolver: Send + Sync {
    /// Resolve a reference string; `Ok(None)` when nothing is found.
    async fn resolve(&self, reference: &str) -> ReferenceResult<Option<ElementNode>>;
}

/// In-memory resolver keyed by reference text (`Type/id` or absolute url).
#[derive(Debug, Default)]
pub struct InMemoryReferenceResolver {
    resources: RwLock<HashMap<String, ElementNode>>,
}

impl InMemoryReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource<S: Into<String>>(mut self, reference: S, resource: ElementNode) -> Self {
        self.resources.get_mut().insert(reference.into(), resource);
        self
    }

    /// Register a resource while the resolver is shared
    pub async fn insert<S: Into<String>>(&self, reference: S, resource: ElementNode) {
        self.resources.write().await.insert(reference.into(), resource);
    }
}

#[async_trait]
impl ExternalReferenceResolver for InMemoryReferenceResolver {
    async fn resolve(&self, reference: &str) -> ReferenceResult<Option<ElementNode>> {
        let resources = self.resources.read().await;
        Ok(resources
            .get(reference)
            .or_else(|| resources.get(strip_version(reference)))
            .cloned())
    }
}

/// How a reference was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Contained,
    Bundled,
    External,
}

impl ReferenceKind {
    pub fn aggregation(&self) -> AggregationMode {
        match self {
            ReferenceKind::Contained => AggregationMode::Contained,
            ReferenceKind::Bundled => AggregationMode::Bundled,
            ReferenceKind::External => AggregationMode::Referenced,
        }
    }
}

pub fn is_contained(reference: &str) -> bool {
    reference.starts_with('#')
}

/// Does the reference pin a specific version (`.../_history/n`)?
pub fn has_version(reference: &str) -> bool {
    reference.contains("/_history/")
}

pub fn strip_version(reference: &str) -> &str {
    match reference.find("/_history/") {
        Some(pos) => &reference[..pos],
        None => reference,
    }
}

/// Server base of a bundle entry `fullUrl` such as `http://x.org/fhir/Patient/1`
fn service_base(full_url: &str) -> Option<Url> {
    let url = Url::parse(full_url).ok()?;
    let segments: Vec<&str> = url.path_segments()?.collect();
    if segments.len() < 2 {
        return None;
    }
    let mut base = url.clone();
    {
        let mut path = base.path_segments_mut().ok()?;
        path.pop().pop();
        path.push("");
    }
    Some(base)
}

/// Absolute identity of a reference, resolved against the `fullUrl` of the
/// resource that contains it when the reference is relative.
pub fn absolute_identity(reference: &str, full_url: Option<&str>) -> String {
    let reference = strip_version(reference);
    if let Ok(url) = Url::parse(reference) {
        return url.to_string();
    }
    full_url
        .and_then(service_base)
        .and_then(|base| base.join(reference).ok())
        .map(|url| url.to_string())
        .unwrap_or_else(|| reference.to_string())
}

/// `Type/id` of a resource node
pub fn resource_key(resource: &ElementNode) -> Option<String> {
    Some(format!("{}/{}", resource.resource_type()?, resource.resource_id()?))
}
