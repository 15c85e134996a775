//! Registry error types.
//!
//! Defines the error taxonomy for registration, resolution, composition and
//! invocation. Execution failures are split into *declared* errors, whose
//! message is user-facing and passed through unchanged, and *masked* errors,
//! whose message is replaced with a generic notice.

use std::{fmt, time::Duration};

use rmcp::model::{ErrorCode, ErrorData};
use serde_json::json;
use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

/// The kind of capability an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Tool,
    Resource,
    ResourceTemplate,
    Prompt,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CapabilityKind::Tool => "Tool",
            CapabilityKind::Resource => "Resource",
            CapabilityKind::ResourceTemplate => "Resource template",
            CapabilityKind::Prompt => "Prompt",
        })
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    #[error("Unknown resource: {0}")]
    ResourceNotFound(String),

    #[error("Unknown prompt: {0}")]
    PromptNotFound(String),

    #[error("{kind} already exists: {key}")]
    Duplicate { kind: CapabilityKind, key: String },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid URI template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Invalid resource prefix '{prefix}': {reason}")]
    InvalidPrefix { prefix: String, reason: String },

    #[error("No server mounted with prefix '{0}'")]
    MountNotFound(String),

    #[error("A server is already mounted with prefix '{0}'")]
    DuplicateMount(String),

    #[error("Mounting '{0}' would create a cycle")]
    MountCycle(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Lifespan error: {0}")]
    Lifespan(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Service(#[from] Box<rmcp::ServiceError>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    pub fn not_found(kind: CapabilityKind, key: impl Into<String>) -> Self {
        let key = key.into();
        match kind {
            CapabilityKind::Tool => RegistryError::ToolNotFound(key),
            CapabilityKind::Resource | CapabilityKind::ResourceTemplate => {
                RegistryError::ResourceNotFound(key)
            }
            CapabilityKind::Prompt => RegistryError::PromptNotFound(key),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RegistryError::ToolNotFound(_)
                | RegistryError::ResourceNotFound(_)
                | RegistryError::PromptNotFound(_)
        )
    }

    /// Map to a JSON-RPC error for the wire.
    ///
    /// Unknown tools and prompts have no dedicated JSON-RPC code; they go out
    /// as invalid params carrying a `notFound` marker in `data`.
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            RegistryError::ResourceNotFound(uri) => ErrorData::resource_not_found(
                self.to_string(),
                Some(json!({ NOT_FOUND_MARKER: uri })),
            ),
            RegistryError::ToolNotFound(key) | RegistryError::PromptNotFound(key) => {
                ErrorData::invalid_params(self.to_string(), Some(json!({ NOT_FOUND_MARKER: key })))
            }
            RegistryError::InvalidArguments(_) => ErrorData::invalid_params(self.to_string(), None),
            _ => ErrorData::internal_error(self.to_string(), None),
        }
    }
}

pub(crate) const NOT_FOUND_MARKER: &str = "notFound";

/// Whether a wire error reports an unknown capability.
pub(crate) fn is_not_found_data(data: &ErrorData) -> bool {
    data.code == ErrorCode::RESOURCE_NOT_FOUND
        || data
            .data
            .as_ref()
            .is_some_and(|d| d.get(NOT_FOUND_MARKER).is_some())
}

impl From<rmcp::ServiceError> for RegistryError {
    fn from(err: rmcp::ServiceError) -> Self {
        RegistryError::Service(Box::new(err))
    }
}

/// A capability handle failed while executing.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub kind: CapabilityKind,
    pub key: String,
    message: String,
    declared: bool,
}

impl ExecutionError {
    /// A user-facing failure whose message is passed through unchanged.
    pub fn declared(
        kind: CapabilityKind,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            message: message.into(),
            declared: true,
        }
    }

    /// A generic failure. The detail is only appended when masking is off.
    pub fn masked(kind: CapabilityKind, key: impl Into<String>, detail: Option<&str>) -> Self {
        let key = key.into();
        let verb = match kind {
            CapabilityKind::Tool => "calling tool",
            CapabilityKind::Resource | CapabilityKind::ResourceTemplate => "reading resource",
            CapabilityKind::Prompt => "rendering prompt",
        };
        let message = match detail {
            Some(detail) => format!("Error {verb} '{key}': {detail}"),
            None => format!("Error {verb} '{key}'"),
        };
        Self {
            kind,
            key,
            message,
            declared: false,
        }
    }

    /// Classify a handler failure. Declared error types found anywhere in the
    /// chain keep their message; anything else is masked.
    pub fn from_failure(
        kind: CapabilityKind,
        key: impl Into<String>,
        err: &anyhow::Error,
        mask_details: bool,
    ) -> Self {
        let key = key.into();
        if let Some(message) = declared_message(err) {
            return Self::declared(kind, key, message);
        }
        let detail = err.to_string();
        Self::masked(kind, key, (!mask_details).then_some(detail.as_str()))
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_declared(&self) -> bool {
        self.declared
    }
}

fn declared_message(err: &anyhow::Error) -> Option<String> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<ToolError>() {
            Some(e.0.clone())
        } else if let Some(e) = cause.downcast_ref::<ResourceError>() {
            Some(e.0.clone())
        } else if let Some(e) = cause.downcast_ref::<PromptError>() {
            Some(e.0.clone())
        } else if let Some(RegistryError::Execution(e)) = cause.downcast_ref::<RegistryError>() {
            Some(e.message.clone())
        } else {
            cause.downcast_ref::<ExecutionError>().map(|e| e.message.clone())
        }
    })
}

/// Raised by a tool handler to report a failure the caller may see verbatim.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ToolError(pub String);

/// Raised by a resource reader or template factory with a user-facing message.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ResourceError(pub String);

/// Raised by a prompt renderer with a user-facing message.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PromptError(pub String);
