//! Schema references, path selectors and referenced instances.

use std::sync::Arc;
use tracing::{debug, warn};

use super::{Evaluation, ValidationState, Validator};
use crate::config::CORE_BASE_URL;
use crate::instance::ElementNode;
use crate::reference::{
    ReferenceError, ReferenceKind, absolute_identity, has_version, is_contained, resource_key,
    strip_version,
};
use crate::resolver::{SchemaLookup, lookup_schema};
use crate::types::schema::{CanonicalId, PathSelector, PathStep, ReferencedInstance, SchemaTarget};
use crate::types::structure_definition::VersioningRule;
use crate::types::validation::{Issue, IssueKind, ResultState};

/// A reference followed to its target
struct Resolved {
    target: Arc<ElementNode>,
    kind: ReferenceKind,
    identity: String,
    full_url: Option<String>,
}

impl Validator {
    pub(crate) async fn evaluate_schema_reference(
        &self,
        state: &mut ValidationState,
        target: &SchemaTarget,
        group: &[Arc<ElementNode>],
        location: &str,
    ) -> Evaluation {
        match target {
            SchemaTarget::Canonical { id } => {
                self.evaluate_canonical(state, id, group, location).await
            }
            dynamic => {
                let mut evaluation = Evaluation::success();
                for node in group {
                    let next = self.evaluate_dynamic(state, dynamic, node).await;
                    evaluation = evaluation.and(next);
                }
                evaluation
            }
        }
    }

    /// Schema named at runtime by the value itself
    async fn evaluate_dynamic(
        &self,
        state: &mut ValidationState,
        target: &SchemaTarget,
        node: &Arc<ElementNode>,
    ) -> Evaluation {
        let canonicals: Vec<CanonicalId> = match target {
            SchemaTarget::Canonical { id } => vec![id.clone()],
            SchemaTarget::ExtensionUrl { exclude } => {
                let Some(url) = node.child("url").and_then(|u| u.primitive_string()) else {
                    return Evaluation::success();
                };
                if exclude.contains(&url) {
                    return Evaluation::success();
                }
                vec![CanonicalId::parse(&url)]
            }
            SchemaTarget::RuntimeType { fallback } => vec![runtime_type(node, fallback)],
            SchemaTarget::DeclaredProfiles => node
                .declared_profiles()
                .iter()
                .map(|p| CanonicalId::parse(p))
                .collect(),
            SchemaTarget::DeclaredOrRuntime { fallback } => {
                let declared: Vec<CanonicalId> = node
                    .declared_profiles()
                    .iter()
                    .map(|p| CanonicalId::parse(p))
                    .filter(|c| c.base() != fallback.base() && !is_generic(c))
                    .collect();
                if declared.is_empty() {
                    vec![runtime_type(node, fallback)]
                } else {
                    declared
                }
            }
        };

        let group = std::slice::from_ref(node);
        let mut evaluation = Evaluation::success();
        for canonical in &canonicals {
            let next = self
                .evaluate_canonical(state, canonical, group, &node.location)
                .await;
            evaluation = evaluation.and(next);
        }
        evaluation
    }

    async fn evaluate_canonical(
        &self,
        state: &mut ValidationState,
        canonical: &CanonicalId,
        group: &[Arc<ElementNode>],
        location: &str,
    ) -> Evaluation {
        if group.is_empty() {
            return Evaluation::success();
        }

        let schema = match state.local_schema(canonical) {
            Some(schema) => schema,
            None => match lookup_schema(self.resolver.as_ref(), canonical).await {
                SchemaLookup::Found(schema) => schema,
                unresolved => {
                    warn!(canonical = %canonical, "{unresolved}");
                    return self.unresolved_schema(&unresolved, location);
                }
            },
        };

        if state.depth >= self.settings.max_depth {
            return Evaluation::failure(Issue::error(
                IssueKind::RecursionLimit,
                format!(
                    "Nesting limit of {} reached while entering '{canonical}'",
                    self.settings.max_depth
                ),
                location,
            ));
        }

        state.depth += 1;
        let entered_root = canonical.anchor.is_none() && !schema.definitions.is_empty();
        if entered_root {
            state.schemas.push(schema.clone());
        }
        let evaluation = self
            .evaluate_all(state, &schema.assertions, group, location)
            .await;
        if entered_root {
            state.schemas.pop();
        }
        state.depth -= 1;
        evaluation
    }

    /// Apply the selector's assertion to the values reached by its path;
    /// a path that reaches nothing fails.
    pub(crate) async fn evaluate_path_selector(
        &self,
        state: &mut ValidationState,
        selector: &PathSelector,
        group: &[Arc<ElementNode>],
    ) -> Evaluation {
        let mut evaluation = Evaluation::success();
        for node in group {
            let selected = self.select(state, node, &selector.steps).await;
            let next = if selected.is_empty() {
                Evaluation::failure(Issue::error(
                    IssueKind::SliceNoMatch,
                    "Discriminator path selects no value",
                    node.location.as_str(),
                ))
            } else {
                self.evaluate(state, &selector.assertion, &selected, &node.location)
                    .await
            };
            evaluation = evaluation.and(next);
        }
        evaluation
    }

    async fn select(
        &self,
        state: &ValidationState,
        node: &Arc<ElementNode>,
        steps: &[PathStep],
    ) -> Vec<Arc<ElementNode>> {
        let mut current = vec![node.clone()];
        for step in steps {
            let mut next = Vec::new();
            for item in &current {
                match step {
                    PathStep::This => next.push(item.clone()),
                    PathStep::Child(name) => {
                        let choice = format!("{name}[x]");
                        next.extend(item.children_named(name).cloned());
                        next.extend(item.children_matching(&choice));
                    }
                    PathStep::Resolve => {
                        let Some(text) = reference_text(item) else {
                            continue;
                        };
                        if let Ok(Some(resolved)) = self.resolve_reference(state, &text).await {
                            next.push(resolved.target);
                        }
                    }
                    PathStep::Extension(url) => next.extend(
                        item.children_named("extension")
                            .filter(|e| {
                                e.child("url")
                                    .and_then(|u| u.primitive_string())
                                    .is_some_and(|u| u == *url)
                            })
                            .cloned(),
                    ),
                    PathStep::OfType(code) => {
                        if item.instance_type.as_deref() == Some(code.as_str()) {
                            next.push(item.clone());
                        }
                    }
                }
            }
            current = next;
        }
        current
    }

    /// Follow each value's `reference` and validate the target.
    pub(crate) async fn evaluate_referenced_instance(
        &self,
        state: &mut ValidationState,
        nested: &ReferencedInstance,
        group: &[Arc<ElementNode>],
    ) -> Evaluation {
        let mut evaluation = Evaluation::success();
        for node in group {
            let next = self.evaluate_reference(state, nested, node).await;
            evaluation = evaluation.and(next);
        }
        evaluation
    }

    async fn evaluate_reference(
        &self,
        state: &mut ValidationState,
        nested: &ReferencedInstance,
        node: &ElementNode,
    ) -> Evaluation {
        let Some(text) = reference_text(node) else {
            return Evaluation::success();
        };
        let location = node.location.as_str();

        let mut evaluation = Evaluation::success();
        match nested.versioning {
            Some(VersioningRule::Specific) if !has_version(&text) => {
                evaluation = evaluation.and(Evaluation::failure(Issue::error(
                    IssueKind::ReferenceVersioning,
                    format!("Reference '{text}' must point to a specific version"),
                    location,
                )));
            }
            Some(VersioningRule::Independent) if has_version(&text) => {
                evaluation = evaluation.and(Evaluation::failure(Issue::error(
                    IssueKind::ReferenceVersioning,
                    format!("Reference '{text}' must not point to a specific version"),
                    location,
                )));
            }
            _ => {}
        }

        let resolved = match self.resolve_reference(state, &text).await {
            Ok(Some(resolved)) => resolved,
            Ok(None) => {
                let kind = if is_contained(&text) {
                    ReferenceKind::Contained
                } else {
                    ReferenceKind::External
                };
                if let Some(issue) = aggregation_issue(nested, kind, &text, location) {
                    return evaluation.and(Evaluation::failure(issue));
                }
                if kind == ReferenceKind::External && !self.resolves_externally() {
                    return evaluation;
                }
                return evaluation.and(Evaluation::with_issue(
                    ResultState::Undecided,
                    Issue::warning(
                        IssueKind::ReferenceUnresolved,
                        format!("Cannot resolve reference '{text}'"),
                        location,
                    ),
                ));
            }
            Err(err) => {
                warn!(reference = %text, error = %err, "external reference resolution failed");
                return evaluation.and(Evaluation::with_issue(
                    ResultState::Undecided,
                    Issue::warning(
                        IssueKind::ReferenceUnresolved,
                        format!("Cannot resolve reference '{text}': {err}"),
                        location,
                    ),
                ));
            }
        };

        if let Some(issue) = aggregation_issue(nested, resolved.kind, &text, location) {
            evaluation = evaluation.and(Evaluation::failure(issue));
        }

        if state.chain.contains(&resolved.identity) {
            debug!(identity = %resolved.identity, "circular reference");
            return evaluation.and(Evaluation::new(
                ResultState::Success,
                vec![Issue::warning(
                    IssueKind::CircularReference,
                    format!(
                        "Reference '{text}' leads back to '{}', which is already being validated",
                        resolved.identity
                    ),
                    location,
                )],
            ));
        }

        debug!(reference = %text, identity = %resolved.identity, "following reference");
        state.chain.push(resolved.identity.clone());
        state.scopes.push(super::Scope {
            resource: resolved.target.clone(),
            full_url: resolved.full_url,
        });
        let target = self
            .evaluate(
                state,
                &nested.schema,
                std::slice::from_ref(&resolved.target),
                &resolved.target.location,
            )
            .await;
        state.scopes.pop();
        state.chain.pop();

        evaluation.and(target)
    }

    fn resolves_externally(&self) -> bool {
        self.settings.resolve_external_references && self.references.is_some()
    }

    /// Find the target of a reference: contained, bundled, then external.
    async fn resolve_reference(
        &self,
        state: &ValidationState,
        text: &str,
    ) -> Result<Option<Resolved>, ReferenceError> {
        if let Some(id) = text.strip_prefix('#') {
            return Ok(resolve_contained(state, id));
        }
        if let Some(resolved) = resolve_bundled(state, text) {
            return Ok(Some(resolved));
        }
        if !self.resolves_externally() {
            return Ok(None);
        }
        let Some(references) = &self.references else {
            return Ok(None);
        };

        let found = references.resolve(text).await?;
        Ok(found.map(|target| Resolved {
            identity: absolute_identity(text, state.current_full_url()),
            target: Arc::new(target),
            kind: ReferenceKind::External,
            full_url: None,
        }))
    }
}

fn reference_text(node: &ElementNode) -> Option<String> {
    node.child("reference").and_then(|r| r.primitive_string())
}

fn runtime_type(node: &ElementNode, fallback: &CanonicalId) -> CanonicalId {
    node.resource_type()
        .map(|rt| CanonicalId::new(format!("{CORE_BASE_URL}{rt}")))
        .unwrap_or_else(|| fallback.clone())
}

fn is_generic(canonical: &CanonicalId) -> bool {
    matches!(
        canonical.url.strip_prefix(CORE_BASE_URL),
        Some("Resource" | "DomainResource")
    )
}

fn aggregation_issue(
    nested: &ReferencedInstance,
    kind: ReferenceKind,
    text: &str,
    location: &str,
) -> Option<Issue> {
    if nested.aggregation.is_empty() || nested.aggregation.contains(&kind.aggregation()) {
        return None;
    }
    Some(Issue::error(
        IssueKind::ReferenceAggregation,
        format!("Reference '{text}' is {:?}, which the profile does not allow", kind.aggregation()),
        location,
    ))
}

/// `#id` in the innermost resource that contains it; `#` is the container itself
fn resolve_contained(state: &ValidationState, id: &str) -> Option<Resolved> {
    for scope in state.scopes.iter().rev() {
        let target = if id.is_empty() {
            Some(scope.resource.clone())
        } else {
            scope
                .resource
                .children_named("contained")
                .find(|c| c.resource_id().as_deref() == Some(id))
                .cloned()
        };
        if let Some(target) = target {
            return Some(Resolved {
                identity: format!("{}#{id}", scope.identity()),
                target,
                kind: ReferenceKind::Contained,
                full_url: None,
            });
        }
    }
    None
}

/// Entry of an enclosing Bundle identified by `fullUrl` or `Type/id`
fn resolve_bundled(state: &ValidationState, text: &str) -> Option<Resolved> {
    let identity = absolute_identity(text, state.current_full_url());
    let key = strip_version(text);

    for scope in state.scopes.iter().rev() {
        if scope.resource.resource_type() != Some("Bundle") {
            continue;
        }
        for entry in scope.resource.children_named("entry") {
            let Some(resource) = entry.child("resource") else {
                continue;
            };
            let full_url = entry.child("fullUrl").and_then(|u| u.primitive_string());
            let by_url = full_url.as_deref() == Some(identity.as_str());
            let by_key = resource_key(resource)
                .is_some_and(|k| k == key || identity.ends_with(&format!("/{k}")));
            // Relative references without a base match entries by type and id
            if by_url || (by_key && (full_url.is_none() || identity == key)) {
                return Some(Resolved {
                    identity: full_url.clone().unwrap_or_else(|| identity.clone()),
                    target: resource.clone(),
                    kind: ReferenceKind::Bundled,
                    full_url,
                });
            }
        }
    }
    None
}
