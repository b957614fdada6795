//! Validation result types.
//!
//! - [`Issue`] - a single problem found in an instance
//! - [`ResultState`] - tri-state outcome of evaluating one assertion
//! - [`ValidationOutcome`] - overall result of a validation run

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Information,
    Warning,
    Error,
}

impl IssueSeverity {
    /// Severity of an invariant as declared on an element constraint
    pub fn from_constraint(severity: &str) -> Self {
        match severity {
            "warning" => IssueSeverity::Warning,
            "information" => IssueSeverity::Information,
            _ => IssueSeverity::Error,
        }
    }
}

/// Issue kinds with stable codes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum IssueKind {
    /// PS1001: Number of values outside the allowed range
    CardinalityViolation = 1001,
    /// PS1002: Value differs from the fixed value
    FixedValueMismatch = 1002,
    /// PS1003: Value does not contain the pattern
    PatternMismatch = 1003,
    /// PS1004: Primitive does not match the regular expression
    RegexMismatch = 1004,
    /// PS1005: Value below the minimum or above the maximum
    ValueOutOfRange = 1005,
    /// PS1006: Primitive longer than allowed
    MaxLengthExceeded = 1006,
    /// PS1007: Instance type not among the allowed types
    TypeMismatch = 1007,
    /// PS1008: Code not in the bound value set
    BindingViolation = 1008,
    /// PS1009: Invariant evaluated to false
    InvariantFailed = 1009,
    /// PS1010: Child element not defined by the schema
    UnknownChild = 1010,
    /// PS1011: Value does not match any slice of a closed group
    SliceNoMatch = 1011,
    /// PS1012: Values appear out of slice order
    SliceOrder = 1012,
    /// PS1013: Referenced schema could not be resolved
    SchemaUnresolved = 1013,
    /// PS1014: Referenced instance could not be found
    ReferenceUnresolved = 1014,
    /// PS1015: Reference violates the allowed aggregation modes
    ReferenceAggregation = 1015,
    /// PS1016: Reference violates the versioning rule
    ReferenceVersioning = 1016,
    /// PS1017: Reference chain returns to an instance already being validated
    CircularReference = 1017,
    /// PS1018: Terminology service could not validate a code
    TerminologyUnavailable = 1018,
    /// PS1019: Invariant could not be evaluated
    InvariantUnavailable = 1019,
    /// PS1020: Nesting limit reached
    RecursionLimit = 1020,
    /// PS1021: Values cannot be compared
    NotComparable = 1021,
    /// PS1022: Instance type is unknown
    TypeUnknown = 1022,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PS{:04}", *self as u32)
    }
}

/// A single validation issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub severity: IssueSeverity,
    pub kind: IssueKind,
    pub message: String,
    /// Location of the offending value in the instance, e.g. `Patient.telecom[1]`
    pub location: String,
}

impl Issue {
    pub fn new<M: Into<String>, L: Into<String>>(
        severity: IssueSeverity,
        kind: IssueKind,
        message: M,
        location: L,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location: location.into(),
        }
    }

    pub fn error<M: Into<String>, L: Into<String>>(kind: IssueKind, message: M, location: L) -> Self {
        Self::new(IssueSeverity::Error, kind, message, location)
    }

    pub fn warning<M: Into<String>, L: Into<String>>(
        kind: IssueKind,
        message: M,
        location: L,
    ) -> Self {
        Self::new(IssueSeverity::Warning, kind, message, location)
    }

    pub fn code(&self) -> String {
        self.kind.to_string()
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.location, self.message)
    }
}

/// Tri-state result of evaluating an assertion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultState {
    Success,
    Failure,
    Undecided,
}

impl ResultState {
    /// Conjunction: any failure fails, otherwise any undecided stays undecided
    pub fn and(self, other: ResultState) -> ResultState {
        match (self, other) {
            (ResultState::Failure, _) | (_, ResultState::Failure) => ResultState::Failure,
            (ResultState::Undecided, _) | (_, ResultState::Undecided) => ResultState::Undecided,
            _ => ResultState::Success,
        }
    }

    /// Disjunction: any success succeeds, otherwise any undecided stays undecided
    pub fn or(self, other: ResultState) -> ResultState {
        match (self, other) {
            (ResultState::Success, _) | (_, ResultState::Success) => ResultState::Success,
            (ResultState::Undecided, _) | (_, ResultState::Undecided) => ResultState::Undecided,
            _ => ResultState::Failure,
        }
    }

    pub fn is_success(self) -> bool {
        self == ResultState::Success
    }
}

/// Result of a validation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationOutcome {
    pub result: ResultState,
    pub issues: Vec<Issue>,
}

impl ValidationOutcome {
    pub fn new(result: ResultState, issues: Vec<Issue>) -> Self {
        Self { result, issues }
    }

    /// Valid when no assertion failed; undecided parts are reported as warnings
    pub fn is_valid(&self) -> bool {
        self.result != ResultState::Failure
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
    }

    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
}
