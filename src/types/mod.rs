//! Data model shared by the converter and the validation engine.

pub mod schema;
pub mod structure_definition;
pub mod validation;

pub use schema::{
    Assertion, BindingCheck, BoundKind, CanonicalId, Cardinality, ChildSchema, ChildrenSet,
    CompiledSchema, InvariantCheck, PathSelector, PathStep, ReferencedInstance, RegexCheck,
    ResultLiteral, SchemaTarget, SliceCase, SliceSpec, SlicingRules, ValueBound,
};
pub use structure_definition::{
    AggregationMode, Discriminator, ElementBinding, ElementConstraint, ElementDefinition,
    ElementList, ElementSlicing, Extension, StructureDefinition, TypeReference, VersioningRule,
};
pub use validation::{Issue, IssueKind, IssueSeverity, ResultState, ValidationOutcome};
