//! Validation of instance trees against compiled schemas.
//!
//! [`Validator`] interprets the [`Assertion`] vocabulary over groups of
//! [`ElementNode`]s. A group is the set of values found under one element
//! name, so cardinality and slicing see every repetition at once while value
//! checks apply to each member.
//!
//! Problems never abort a run: each assertion yields a [`ResultState`] and
//! the issues that explain it, and combinators merge them. Every call owns
//! its [`ValidationState`], so one validator can serve concurrent runs.
//!
//! # Example
//!
//! ```ignore
//! let validator = Validator::new(resolver)
//!     .with_terminology_service(terminology)
//!     .with_reference_resolver(references);
//!
//! let outcome = validator
//!     .validate(&ElementNode::from_json(&patient), "http://example.org/StructureDefinition/my-patient")
//!     .await;
//! for issue in outcome.errors() {
//!     println!("{issue}");
//! }
//! ```

mod children;
mod combinators;
mod leaf;
mod reference;
mod slice;

pub use leaf::{deep_partial_match, extract_codes};

use async_recursion::async_recursion;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::ValidationSettings;
use crate::instance::ElementNode;
use crate::invariant::InvariantEvaluator;
use crate::reference::{ExternalReferenceResolver, resource_key};
use crate::resolver::{SchemaLookup, SchemaResolver, lookup_schema};
use crate::terminology::TerminologyService;
use crate::types::schema::{Assertion, CanonicalId, CompiledSchema, ResultLiteral};
use crate::types::validation::{Issue, IssueKind, IssueSeverity, ResultState, ValidationOutcome};

/// Validates instances against schemas obtained from a [`SchemaResolver`].
#[derive(Clone)]
pub struct Validator {
    resolver: Arc<dyn SchemaResolver>,
    terminology: Option<Arc<dyn TerminologyService>>,
    references: Option<Arc<dyn ExternalReferenceResolver>>,
    invariants: Option<Arc<dyn InvariantEvaluator>>,
    settings: ValidationSettings,
}

impl Validator {
    pub fn new(resolver: Arc<dyn SchemaResolver>) -> Self {
        Self {
            resolver,
            terminology: None,
            references: None,
            invariants: None,
            settings: ValidationSettings::default(),
        }
    }

    pub fn with_terminology_service(mut self, service: Arc<dyn TerminologyService>) -> Self {
        self.terminology = Some(service);
        self
    }

    pub fn with_reference_resolver(mut self, resolver: Arc<dyn ExternalReferenceResolver>) -> Self {
        self.references = Some(resolver);
        self
    }

    pub fn with_invariant_evaluator(mut self, evaluator: Arc<dyn InvariantEvaluator>) -> Self {
        self.invariants = Some(evaluator);
        self
    }

    pub fn with_settings(mut self, settings: ValidationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    /// Validate `instance` against the profile with canonical `profile`
    /// (`url`, `url|version` or an anchored canonical).
    #[instrument(skip_all, fields(profile = %profile, location = %instance.location))]
    pub async fn validate(&self, instance: &ElementNode, profile: &str) -> ValidationOutcome {
        let canonical = CanonicalId::parse(profile);
        match lookup_schema(self.resolver.as_ref(), &canonical).await {
            SchemaLookup::Found(schema) => self.run(instance, schema).await,
            unresolved => {
                let evaluation = self.unresolved_schema(&unresolved, &instance.location);
                ValidationOutcome::new(evaluation.result, evaluation.issues)
            }
        }
    }

    /// Validate `instance` against an already compiled schema.
    pub async fn validate_against(
        &self,
        instance: &ElementNode,
        schema: &CompiledSchema,
    ) -> ValidationOutcome {
        self.run(instance, Arc::new(schema.clone())).await
    }

    /// Validate several instances concurrently. Each run has its own state,
    /// so outcomes are returned in input order and never influence each other.
    pub async fn validate_batch(
        &self,
        instances: &[ElementNode],
        profile: &str,
    ) -> Vec<ValidationOutcome> {
        join_all(instances.iter().map(|instance| self.validate(instance, profile))).await
    }

    async fn run(&self, instance: &ElementNode, schema: Arc<CompiledSchema>) -> ValidationOutcome {
        let root = Arc::new(instance.clone());
        let mut state = ValidationState::default();
        state.schemas.push(schema.clone());

        let evaluation = self
            .evaluate_all(
                &mut state,
                &schema.assertions,
                std::slice::from_ref(&root),
                &root.location,
            )
            .await;

        debug!(
            schema = %schema.id,
            result = ?evaluation.result,
            issues = evaluation.issues.len(),
            "validation finished"
        );
        ValidationOutcome::new(evaluation.result, evaluation.issues)
    }

    /// Evaluate one assertion against a group of values.
    ///
    /// `location` names the group; issues about single values carry the
    /// value's own location.
    #[async_recursion]
    pub(crate) async fn evaluate(
        &self,
        state: &mut ValidationState,
        assertion: &Assertion,
        group: &[Arc<ElementNode>],
        location: &str,
    ) -> Evaluation {
        match assertion {
            Assertion::Cardinality(cardinality) => {
                leaf::check_cardinality(cardinality, group.len(), location)
            }
            Assertion::MaxLength(max) => each(group, |node| leaf::check_max_length(*max, node)),
            Assertion::Fixed(expected) => each(group, |node| leaf::check_fixed(expected, node)),
            Assertion::Pattern(pattern) => each(group, |node| leaf::check_pattern(pattern, node)),
            Assertion::Regex(check) => each(group, |node| leaf::check_regex(check, node)),
            Assertion::MinMaxValue(bound) => each(group, |node| leaf::check_bound(bound, node)),
            Assertion::TypeLabel(codes) => each(group, |node| leaf::check_type_label(codes, node)),
            Assertion::Binding(binding) => self.check_binding(binding, group).await,
            Assertion::Invariant(invariant) => self.check_invariant(state, invariant, group).await,
            Assertion::Children(set) => self.evaluate_children(state, set, group).await,
            Assertion::AllOf(members) => self.evaluate_all(state, members, group, location).await,
            Assertion::AnyOf(members) => self.evaluate_any(state, members, group, location).await,
            Assertion::Slice(slicing) => self.evaluate_slice(state, slicing, group, location).await,
            Assertion::SchemaReference(target) => {
                self.evaluate_schema_reference(state, target, group, location)
                    .await
            }
            Assertion::ReferencedInstance(nested) => {
                self.evaluate_referenced_instance(state, nested, group).await
            }
            Assertion::PathSelector(selector) => {
                self.evaluate_path_selector(state, selector, group).await
            }
            Assertion::Result(literal) => each(group, |node| result_literal(literal, node)),
        }
    }

    /// Issue for a schema that could not be resolved
    pub(crate) fn unresolved_schema(&self, lookup: &SchemaLookup, location: &str) -> Evaluation {
        let severity = self.settings.unresolved_schema_severity;
        let result = if severity == IssueSeverity::Error {
            ResultState::Failure
        } else {
            ResultState::Undecided
        };
        Evaluation::with_issue(
            result,
            Issue::new(severity, IssueKind::SchemaUnresolved, lookup.to_string(), location),
        )
    }
}

/// Evaluate a per-value check over every member of a group
fn each(group: &[Arc<ElementNode>], check: impl Fn(&ElementNode) -> Evaluation) -> Evaluation {
    group
        .iter()
        .fold(Evaluation::success(), |acc, node| acc.and(check(&**node)))
}

fn result_literal(literal: &ResultLiteral, node: &ElementNode) -> Evaluation {
    match literal {
        ResultLiteral::Success => Evaluation::success(),
        ResultLiteral::Undecided => Evaluation::new(ResultState::Undecided, Vec::new()),
        ResultLiteral::Failure { kind, message } => Evaluation::with_issue(
            ResultState::Failure,
            Issue::error(*kind, message.as_str(), node.location.as_str()),
        ),
    }
}

/// Result of evaluating one assertion
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Evaluation {
    pub(crate) result: ResultState,
    pub(crate) issues: Vec<Issue>,
}

impl Evaluation {
    pub(crate) fn new(result: ResultState, issues: Vec<Issue>) -> Self {
        Self { result, issues }
    }

    pub(crate) fn success() -> Self {
        Self::new(ResultState::Success, Vec::new())
    }

    pub(crate) fn with_issue(result: ResultState, issue: Issue) -> Self {
        Self::new(result, vec![issue])
    }

    pub(crate) fn failure(issue: Issue) -> Self {
        Self::with_issue(ResultState::Failure, issue)
    }

    /// Conjunction keeping the issues of both sides
    pub(crate) fn and(mut self, other: Evaluation) -> Self {
        self.result = self.result.and(other.result);
        self.issues.extend(other.issues);
        self
    }
}

/// Per-run mutable state; never shared between runs.
#[derive(Debug, Default)]
pub struct ValidationState {
    /// Identities of the resources currently being validated, outermost first
    pub(crate) chain: Vec<String>,
    /// Enclosing resources, innermost last
    pub(crate) scopes: Vec<Scope>,
    /// Root schemas entered so far, for anchors into their definitions
    pub(crate) schemas: Vec<Arc<CompiledSchema>>,
    pub(crate) depth: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Scope {
    pub(crate) resource: Arc<ElementNode>,
    /// `fullUrl` of the Bundle entry holding the resource
    pub(crate) full_url: Option<String>,
}

impl Scope {
    pub(crate) fn identity(&self) -> String {
        self.full_url
            .clone()
            .or_else(|| resource_key(&self.resource))
            .unwrap_or_else(|| self.resource.location.clone())
    }
}

impl ValidationState {
    pub(crate) fn current_resource(&self) -> Option<&Arc<ElementNode>> {
        self.scopes.last().map(|s| &s.resource)
    }

    pub(crate) fn current_full_url(&self) -> Option<&str> {
        self.scopes.iter().rev().find_map(|s| s.full_url.as_deref())
    }

    /// Local schema registered under the base of `canonical`
    pub(crate) fn local_schema(&self, canonical: &CanonicalId) -> Option<Arc<CompiledSchema>> {
        let base = canonical.base();
        let root = self.schemas.iter().rev().find(|s| s.id == base)?;
        match &canonical.anchor {
            None => Some(root.clone()),
            Some(anchor) => root.definition(anchor).cloned(),
        }
    }

    /// `fullUrl` of the Bundle entry that holds `resource`, if any
    pub(crate) fn full_url_of(&self, resource: &Arc<ElementNode>) -> Option<String> {
        self.scopes
            .iter()
            .rev()
            .filter(|s| s.resource.resource_type() == Some("Bundle"))
            .flat_map(|s| s.resource.children_named("entry"))
            .find(|entry| {
                entry
                    .child("resource")
                    .is_some_and(|r| Arc::ptr_eq(r, resource))
            })
            .and_then(|entry| entry.child("fullUrl"))
            .and_then(|url| url.primitive_string())
    }

    /// Enter a resource; returns whether a scope was pushed
    pub(crate) fn enter(&mut self, resource: &Arc<ElementNode>, full_url: Option<String>) -> bool {
        if self
            .scopes
            .last()
            .is_some_and(|s| Arc::ptr_eq(&s.resource, resource))
        {
            return false;
        }
        let scope = Scope {
            resource: resource.clone(),
            full_url,
        };
        self.chain.push(scope.identity());
        self.scopes.push(scope);
        true
    }

    pub(crate) fn leave(&mut self) {
        self.scopes.pop();
        self.chain.pop();
    }
}
