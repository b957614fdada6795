//! Slice group evaluation.

use std::sync::Arc;
use tracing::trace;

use super::{Evaluation, ValidationState, Validator, leaf};
use crate::instance::ElementNode;
use crate::types::schema::{SliceSpec, SlicingRules};
use crate::types::validation::{Issue, IssueKind};

impl Validator {
    /// Assign each value to the first case whose condition it satisfies,
    /// then check every case's cardinality and body on its values and the
    /// default on the values no case claimed.
    pub(crate) async fn evaluate_slice(
        &self,
        state: &mut ValidationState,
        slicing: &SliceSpec,
        group: &[Arc<ElementNode>],
        location: &str,
    ) -> Evaluation {
        let mut assignment: Vec<Option<usize>> = Vec::with_capacity(group.len());
        for value in group {
            let mut matched = None;
            for (index, case) in slicing.cases.iter().enumerate() {
                let condition = self
                    .evaluate(state, &case.condition, std::slice::from_ref(value), location)
                    .await;
                if condition.result.is_success() {
                    matched = Some(index);
                    break;
                }
            }
            trace!(location = %value.location, case = ?matched, "slice assignment");
            assignment.push(matched);
        }

        let mut evaluation = self.check_order(slicing, group, &assignment);

        for (index, case) in slicing.cases.iter().enumerate() {
            let members: Vec<Arc<ElementNode>> = group
                .iter()
                .zip(&assignment)
                .filter(|(_, assigned)| **assigned == Some(index))
                .map(|(value, _)| value.clone())
                .collect();
            let case_location = format!("{location}:{}", case.name);

            if let Some(cardinality) = &case.cardinality {
                evaluation =
                    evaluation.and(leaf::check_cardinality(cardinality, members.len(), &case_location));
            }
            if !members.is_empty() {
                let body = self
                    .evaluate(state, &case.body, &members, &case_location)
                    .await;
                evaluation = evaluation.and(body);
            }
        }

        let unmatched: Vec<Arc<ElementNode>> = group
            .iter()
            .zip(&assignment)
            .filter(|(_, assigned)| assigned.is_none())
            .map(|(value, _)| value.clone())
            .collect();
        if !unmatched.is_empty() {
            let default = self
                .evaluate(state, &slicing.default, &unmatched, location)
                .await;
            evaluation = evaluation.and(default);
        }

        evaluation
    }

    /// Ordering constraints of ordered and open-at-end groups
    fn check_order(
        &self,
        slicing: &SliceSpec,
        group: &[Arc<ElementNode>],
        assignment: &[Option<usize>],
    ) -> Evaluation {
        let mut evaluation = Evaluation::success();

        if slicing.ordered {
            let mut highest = 0;
            for (value, assigned) in group.iter().zip(assignment) {
                let Some(case) = *assigned else { continue };
                if case < highest {
                    evaluation = evaluation.and(Evaluation::failure(Issue::error(
                        IssueKind::SliceOrder,
                        format!(
                            "Value matches slice '{}' but appears after values of slice '{}'",
                            slicing.cases[case].name, slicing.cases[highest].name
                        ),
                        value.location.as_str(),
                    )));
                } else {
                    highest = case;
                }
            }
        }

        if slicing.rules == SlicingRules::OpenAtEnd {
            let last_matched = assignment.iter().rposition(Option::is_some);
            let every_case_matched = (0..slicing.cases.len())
                .all(|case| assignment.contains(&Some(case)));

            for (position, (value, assigned)) in group.iter().zip(assignment).enumerate() {
                if assigned.is_some() {
                    continue;
                }
                let trailing = last_matched.is_none_or(|last| position > last);
                if !(trailing && every_case_matched) {
                    evaluation = evaluation.and(Evaluation::failure(Issue::error(
                        IssueKind::SliceOrder,
                        "Values that match no slice may only appear at the end, after every slice",
                        value.location.as_str(),
                    )));
                }
            }
        }

        evaluation
    }
}
