use thiserror::Error;

/// Stable codes for compile-time faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorCode {
    /// CMP1001: Element definition cannot be compiled
    IncorrectElementDefinition = 1001,
    /// CMP1002: Failure while converting a specific element
    ElementConversion = 1002,
    /// CMP1003: Referenced profile could not be found
    ProfileNotFound = 1003,
    /// CMP1004: Profile has neither snapshot nor differential
    EmptyProfile = 1004,
    /// CMP1005: Profile source failed
    Source = 1005,
}

impl std::fmt::Display for CompileErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CMP{:04}", *self as u32)
    }
}

/// Faults raised while compiling a profile into a schema.
///
/// Compilation is atomic: the first fault aborts the whole profile.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Incorrect element definition '{element_id}' in profile '{profile_url}': {message}")]
    IncorrectElementDefinition {
        element_id: String,
        profile_url: String,
        message: String,
    },

    #[error("Failed to convert element '{element_id}' (path {path}) of profile '{profile_url}': {source}")]
    ElementConversion {
        element_id: String,
        path: String,
        profile_url: String,
        #[source]
        source: Box<CompileError>,
    },

    #[error("Profile not found: {canonical}")]
    ProfileNotFound { canonical: String },

    #[error("Profile '{profile_url}' has no element definitions")]
    EmptyProfile { profile_url: String },

    #[error("Profile source error: {0}")]
    Source(String),
}

pub type Result<T> = std::result::Result<T, CompileError>;

impl CompileError {
    pub fn incorrect_element<S: Into<String>>(element_id: S, profile_url: S, message: S) -> Self {
        Self::IncorrectElementDefinition {
            element_id: element_id.into(),
            profile_url: profile_url.into(),
            message: message.into(),
        }
    }

    pub fn profile_not_found<S: Into<String>>(canonical: S) -> Self {
        Self::ProfileNotFound {
            canonical: canonical.into(),
        }
    }

    pub fn empty_profile<S: Into<String>>(profile_url: S) -> Self {
        Self::EmptyProfile {
            profile_url: profile_url.into(),
        }
    }

    /// Attach the failing element to this error. Already attached errors
    /// are returned untouched so the innermost element is reported.
    pub fn in_element<S: Into<String>>(self, element_id: S, path: S, profile_url: S) -> Self {
        match self {
            wrapped @ Self::ElementConversion { .. } => wrapped,
            other => Self::ElementConversion {
                element_id: element_id.into(),
                path: path.into(),
                profile_url: profile_url.into(),
                source: Box::new(other),
            },
        }
    }

    /// Innermost fault, skipping element wrappers
    pub fn root_cause(&self) -> &CompileError {
        match self {
            Self::ElementConversion { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn code(&self) -> CompileErrorCode {
        match self {
            Self::IncorrectElementDefinition { .. } => {
                CompileErrorCode::IncorrectElementDefinition
            }
            Self::ElementConversion { .. } => CompileErrorCode::ElementConversion,
            Self::ProfileNotFound { .. } => CompileErrorCode::ProfileNotFound,
            Self::EmptyProfile { .. } => CompileErrorCode::EmptyProfile,
            Self::Source(_) => CompileErrorCode::Source,
        }
    }
}

/// Errors surfaced by schema resolvers and profile sources
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Failed to load '{canonical}': {message}")]
    Source { canonical: String, message: String },
}

impl ResolverError {
    pub fn source<S: Into<String>>(canonical: S, message: S) -> Self {
        Self::Source {
            canonical: canonical.into(),
            message: message.into(),
        }
    }
}

pub type ResolverResult<T> = std::result::Result<T, ResolverError>;
