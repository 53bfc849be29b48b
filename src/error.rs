//! Error types for request handling

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Boxed cause attached to an unclassified failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error code reported for unknown commands (`CommandNotFound`)
pub const NO_SUCH_COMMAND_CODE: i32 = 59;

/// Error code reported when the host name cannot be resolved (`HostNotFound`)
pub const HOST_RESOLUTION_CODE: i32 = 7;

/// Every failure the backend or this layer can raise on the request path.
///
/// The set is closed: each variant has exactly one wire shape, see
/// [`crate::translate::error_document`].
#[derive(Error, Debug)]
pub enum ServerError {
    /// A `$cmd` command name with no handler
    #[error("no such cmd: {command}")]
    NoSuchCommand { command: String },

    /// A well-defined backend fault carrying a numeric code
    #[error("{message}")]
    Classified { code: i32, message: String },

    /// An expected condition that must not be logged as an error
    #[error("{0}")]
    Silent(String),

    /// Anything else; logged with its full cause chain
    #[error("{message}")]
    Unclassified {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The local host name could not be determined
    #[error("failed to get hostname")]
    HostResolution,
}

impl ServerError {
    pub fn no_such_command(command: impl Into<String>) -> Self {
        ServerError::NoSuchCommand { command: command.into() }
    }

    pub fn classified(code: i32, message: impl Into<String>) -> Self {
        ServerError::Classified { code, message: message.into() }
    }

    pub fn silent(message: impl Into<String>) -> Self {
        ServerError::Silent(message.into())
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        ServerError::Unclassified { message: message.into(), source: None }
    }

    /// Unclassified failure wrapping an underlying cause
    pub fn unclassified_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        ServerError::Unclassified { message: message.into(), source: Some(source.into()) }
    }

    /// Numeric code exposed to clients, if this kind carries one.
    ///
    /// Drivers probe for the presence of `code`, so Silent and Unclassified
    /// must keep returning `None`.
    pub fn code(&self) -> Option<i32> {
        match self {
            ServerError::NoSuchCommand { .. } => Some(NO_SUCH_COMMAND_CODE),
            ServerError::Classified { code, .. } => Some(*code),
            ServerError::HostResolution => Some(HOST_RESOLUTION_CODE),
            ServerError::Silent(_) | ServerError::Unclassified { .. } => None,
        }
    }

    /// Short kind name used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::NoSuchCommand { .. } => "NO_SUCH_COMMAND",
            ServerError::Classified { .. } => "CLASSIFIED",
            ServerError::Silent(_) => "SILENT",
            ServerError::Unclassified { .. } => "UNCLASSIFIED",
            ServerError::HostResolution => "HOST_RESOLUTION",
        }
    }
}
