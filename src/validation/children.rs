use std::sync::Arc;
use tracing::trace;

use super::{Evaluation, ValidationState, Validator};
use crate::instance::{ElementNode, matches_element_name};
use crate::types::schema::ChildrenSet;
use crate::types::validation::{Issue, IssueKind};

impl Validator {
    /// Match each value's children against the per-name schemas.
    ///
    /// Every named schema is evaluated, also when no child carries the name,
    /// so minimum cardinalities are enforced.
    pub(crate) async fn evaluate_children(
        &self,
        state: &mut ValidationState,
        set: &ChildrenSet,
        group: &[Arc<ElementNode>],
    ) -> Evaluation {
        let mut evaluation = Evaluation::success();
        for item in group {
            let entered = item.is_resource && {
                let full_url = state.full_url_of(item);
                state.enter(item, full_url)
            };

            for (name, child) in &set.children {
                let matched: Vec<Arc<ElementNode>> =
                    item.children_matching(name).collect();
                let location = format!("{}.{}", item.location, name.trim_end_matches("[x]"));
                trace!(location = %location, values = matched.len(), "evaluating child");
                let next = self
                    .evaluate_all(state, &child.schema.assertions, &matched, &location)
                    .await;
                evaluation = evaluation.and(next);
            }

            if !set.allow_additional {
                for unknown in item.children.iter().filter(|c| {
                    !set.children
                        .keys()
                        .any(|name| matches_element_name(name, &c.name))
                }) {
                    evaluation = evaluation.and(Evaluation::failure(Issue::error(
                        IssueKind::UnknownChild,
                        format!("Element '{}' is not defined by the profile", unknown.name),
                        unknown.location.as_str(),
                    )));
                }
            }

            if entered {
                state.leave();
            }
        }
        evaluation
    }
}
