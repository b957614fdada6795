use std::sync::Arc;
use tracing::trace;

use super::{Evaluation, ValidationState, Validator};
use crate::instance::ElementNode;
use crate::types::schema::Assertion;
use crate::types::validation::ResultState;

impl Validator {
    /// Conjunction over `members`; every member is evaluated so that all
    /// independent problems are reported.
    pub(crate) async fn evaluate_all(
        &self,
        state: &mut ValidationState,
        members: &[Assertion],
        group: &[Arc<ElementNode>],
        location: &str,
    ) -> Evaluation {
        let mut evaluation = Evaluation::success();
        for member in members {
            let next = self.evaluate(state, member, group, location).await;
            evaluation = evaluation.and(next);
        }
        evaluation
    }

    /// Disjunction over `members`.
    ///
    /// A successful branch contributes only its own issues; without one,
    /// the evidence of every branch is kept.
    pub(crate) async fn evaluate_any(
        &self,
        state: &mut ValidationState,
        members: &[Assertion],
        group: &[Arc<ElementNode>],
        location: &str,
    ) -> Evaluation {
        if members.is_empty() {
            return Evaluation::success();
        }

        let mut result = ResultState::Failure;
        let mut evidence = Vec::new();
        for (index, member) in members.iter().enumerate() {
            let branch = self.evaluate(state, member, group, location).await;
            if branch.result.is_success() {
                trace!(location, branch = index, "any-of branch succeeded");
                return branch;
            }
            result = result.or(branch.result);
            evidence.extend(branch.issues);
        }
        Evaluation::new(result, evidence)
    }
}
