//! Invariant evaluation seam.
//!
//! Element constraints carry expressions in an external constraint language.
//! The validator hands them to an injected [`InvariantEvaluator`]; without one
//! invariants are skipped.

use async_trait::async_trait;
use thiserror::Error;

use crate::instance::ElementNode;

#[derive(Debug, Clone, Error)]
pub enum InvariantError {
    #[error("Unsupported expression '{expression}': {message}")]
    Unsupported { expression: String, message: String },

    #[error("Evaluation of '{expression}' failed: {message}")]
    Evaluation { expression: String, message: String },
}

impl InvariantError {
    pub fn unsupported<S: Into<String>>(expression: S, message: S) -> Self {
        Self::Unsupported {
            expression: expression.into(),
            message: message.into(),
        }
    }

    pub fn evaluation<S: Into<String>>(expression: S, message: S) -> Self {
        Self::Evaluation {
            expression: expression.into(),
            message: message.into(),
        }
    }
}

/// Evaluates constraint expressions against instance nodes.
#[async_trait]
pub trait InvariantEvaluator: Send + Sync {
    /// Evaluate `expression` with `node` as focus; `resource` is the
    /// enclosing resource when there is one.
    async fn evaluate(
        &self,
        expression: &str,
        node: &ElementNode,
        resource: Option<&ElementNode>,
    ) -> Result<bool, InvariantError>;
}
