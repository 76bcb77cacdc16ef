//! Error types for hotswap-context.

use std::fmt;

/// Result type alias for reloadable service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors surfaced by a reloadable service.
///
/// Reload failures are returned to whoever triggered the reload and recorded
/// as the service's failure cause. They never reach callers of
/// `get_handle()`, which keep seeing the last good component.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Building the child container failed.
    #[error("Failed to build container: {0}")]
    Build(#[from] BuildError),

    /// The built component is not of the type the service exposes.
    #[error("Component '{component}' has type {found}, expected {expected}")]
    WrongType {
        /// Name of the offending component
        component: String,
        /// Type the service was declared with
        expected: &'static str,
        /// Type the container actually produced
        found: &'static str,
    },

    /// The built component was rejected by the service's validator.
    #[error("Component validation failed: {0}")]
    Validation(String),

    /// A container failed to close during teardown.
    #[error(transparent)]
    Close(#[from] CloseError),

    /// The service has not been started yet.
    #[error("Service '{0}' has not been started")]
    NotStarted(String),

    /// The service was already started.
    #[error("Service '{0}' is already started")]
    AlreadyStarted(String),

    /// The service has been stopped and can no longer reload.
    #[error("Service '{0}' has been stopped")]
    Stopped(String),

    /// Service settings could not be loaded.
    #[error("Invalid service settings: {0}")]
    Settings(String),

    /// File watching failed to initialize.
    #[error("File watching error: {0}")]
    Watch(String),
}

/// Errors raised while building a child container.
///
/// A builder that returns one of these has already released anything it
/// constructed before the failure.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A configured resource does not exist.
    #[error("Resource not found: {0}")]
    MissingResource(String),

    /// A resource exists but could not be read.
    #[error("Failed to read resource '{resource}': {source}")]
    Read {
        /// Resource description
        resource: String,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
    },

    /// The resource format cannot be determined from its name.
    #[error("Unsupported resource format: {0}. Supported: .yaml, .yml, .toml, .json")]
    UnsupportedFormat(String),

    /// Merged resource content could not be parsed.
    #[error("Failed to parse definitions: {0}")]
    Parse(String),

    /// A component definition is malformed.
    #[error("Invalid definition for component '{component}': {reason}")]
    Definition {
        /// Component name
        component: String,
        /// What is wrong with it
        reason: String,
    },

    /// No factory is registered for a component's kind.
    #[error("Component '{component}' has unknown kind '{kind}'")]
    UnknownKind {
        /// Component name
        component: String,
        /// Requested kind
        kind: String,
    },

    /// A component factory failed.
    #[error("Failed to construct component '{component}': {reason}")]
    Construction {
        /// Component name
        component: String,
        /// Failure reported by the factory
        reason: String,
    },

    /// The requested component is not present in the container.
    #[error("No component named '{0}'")]
    NoComponent(String),

    /// A definition or component post-processor failed.
    #[error("Post-processing failed: {0}")]
    PostProcess(String),

    /// The conversion service rejected a setting.
    #[error("Failed to convert setting '{key}': {reason}")]
    Conversion {
        /// Setting path
        key: String,
        /// Conversion failure
        reason: String,
    },
}

impl BuildError {
    /// Create a construction error for a component.
    pub fn construction(component: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Construction {
            component: component.into(),
            reason: reason.to_string(),
        }
    }
}

/// A container failed to release its resources.
#[derive(Debug, thiserror::Error)]
#[error("Failed to close container '{container}': {reason}")]
pub struct CloseError {
    /// Identifier of the container
    pub container: String,
    /// Why closing failed
    pub reason: String,
}

/// Validation error for built components.
#[derive(Debug)]
pub enum ValidationError {
    /// Custom validation error with a message.
    Custom(String),

    /// A specific field has an invalid value.
    InvalidField {
        /// The field name/path
        field: String,
        /// The reason why it's invalid
        reason: String,
    },

    /// Multiple validation errors occurred.
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Create a custom validation error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Create an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(msg) => write!(f, "{}", msg),
            Self::InvalidField { field, reason } => {
                write!(f, "Field '{}' is invalid: {}", field, reason)
            }
            Self::Multiple(errors) => {
                writeln!(f, "Multiple validation errors:")?;
                for (i, err) in errors.iter().enumerate() {
                    writeln!(f, "  {}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        ServiceError::Validation(err.to_string())
    }
}
