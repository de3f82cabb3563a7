//! Unified error handling for the router
//!
//! Every collaborator in the navigation pipeline reports failures through
//! [`RouterError`], so the orchestrator can classify any failure into the
//! page it should display.

use std::fmt;

use http::StatusCode;

/// Unified error types for the navigation pipeline
#[derive(Debug)]
pub enum RouterError {
    /// Configuration-related errors
    Configuration(String),

    /// Missing view module or unresolvable import
    NotFound(String),

    /// Fetch or transport failures
    Network(String),

    /// 403-class failures
    Permission(String),

    /// Rejected parameters or invalid descriptors
    Validation(String),

    /// Gated route without a valid credential
    AuthRequired(String),

    /// Layout/template merge or unit assembly failures
    Build(String),

    /// Non-success HTTP responses
    Http { status: StatusCode, message: String },

    /// JSON encoding or decoding errors
    Serialization(serde_json::Error),

    /// Internal system errors
    Internal(String),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            RouterError::NotFound(msg) => write!(f, "{msg}"),
            RouterError::Network(msg) => write!(f, "Network error: {msg}"),
            RouterError::Permission(msg) => write!(f, "Permission denied: {msg}"),
            RouterError::Validation(msg) => write!(f, "Validation error: {msg}"),
            RouterError::AuthRequired(msg) => write!(f, "Authentication required: {msg}"),
            RouterError::Build(msg) => write!(f, "Build error: {msg}"),
            RouterError::Http { message, .. } => write!(f, "{message}"),
            RouterError::Serialization(err) => write!(f, "Serialization error: {err}"),
            RouterError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for RouterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RouterError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

// Error conversions
impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::Serialization(err)
    }
}

impl From<serde_yaml::Error> for RouterError {
    fn from(err: serde_yaml::Error) -> Self {
        RouterError::Configuration(format!("Unable to parse yaml conf: {err}"))
    }
}

impl From<validator::ValidationErrors> for RouterError {
    fn from(err: validator::ValidationErrors) -> Self {
        RouterError::Configuration(format!("Conf validation failed: {err}"))
    }
}

impl From<jsonwebtoken::errors::Error> for RouterError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        RouterError::Validation(format!("Invalid token: {err}"))
    }
}

impl RouterError {
    /// Builds the error raised for a non-success HTTP response.
    pub fn http(status: StatusCode) -> Self {
        RouterError::Http {
            status,
            message: format!("HTTP error! status: {}", status.as_u16()),
        }
    }

    /// Builds an HTTP error carrying a server-supplied message.
    pub fn http_with_message(status: StatusCode, message: impl Into<String>) -> Self {
        RouterError::Http {
            status,
            message: message.into(),
        }
    }

    /// Same failure for another observer of a shared result.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            RouterError::Configuration(msg) => RouterError::Configuration(msg.clone()),
            RouterError::NotFound(msg) => RouterError::NotFound(msg.clone()),
            RouterError::Network(msg) => RouterError::Network(msg.clone()),
            RouterError::Permission(msg) => RouterError::Permission(msg.clone()),
            RouterError::Validation(msg) => RouterError::Validation(msg.clone()),
            RouterError::AuthRequired(msg) => RouterError::AuthRequired(msg.clone()),
            RouterError::Build(msg) => RouterError::Build(msg.clone()),
            RouterError::Http { status, message } => RouterError::Http {
                status: *status,
                message: message.clone(),
            },
            RouterError::Serialization(err) => RouterError::Internal(format!("Serialization error: {err}")),
            RouterError::Internal(msg) => RouterError::Internal(msg.clone()),
        }
    }

    /// Classifies the error into the code of the page that should be displayed.
    ///
    /// Typed variants map directly; everything else falls back to message
    /// heuristics so that errors surfaced by collaborators as plain text are
    /// classified the same way.
    pub fn display_code(&self) -> ErrorCode {
        match self {
            RouterError::NotFound(_) => ErrorCode::NotFound,
            RouterError::Network(_) => ErrorCode::ServiceUnavailable,
            RouterError::Permission(_) => ErrorCode::Forbidden,
            RouterError::Http { status, message } => match ErrorCode::from_status(*status) {
                Some(code) => code,
                None => ErrorCode::classify(message),
            },
            other => ErrorCode::classify(&other.to_string()),
        }
    }
}

/// Display codes for the error page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    Forbidden,
    Internal,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            ErrorCode::Forbidden => 403,
            ErrorCode::Internal => 500,
            ErrorCode::ServiceUnavailable => 503,
        }
    }

    pub fn from_status(status: StatusCode) -> Option<Self> {
        match status {
            StatusCode::NOT_FOUND => Some(ErrorCode::NotFound),
            StatusCode::FORBIDDEN => Some(ErrorCode::Forbidden),
            StatusCode::SERVICE_UNAVAILABLE => Some(ErrorCode::ServiceUnavailable),
            _ => None,
        }
    }

    /// Message heuristics for errors that carry no typed classification.
    pub fn classify(message: &str) -> Self {
        if message.contains("not found")
            || message.contains("404")
            || message.contains("Failed to resolve")
            || message.contains("Failed to fetch")
        {
            ErrorCode::NotFound
        } else if message.contains("network") {
            ErrorCode::ServiceUnavailable
        } else if message.contains("permission") || message.contains("403") {
            ErrorCode::Forbidden
        } else {
            ErrorCode::Internal
        }
    }

    /// Name of the view module rendered for this code.
    pub fn view_route(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "404",
            _ => "error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Result type alias for router operations
pub type RouterResult<T> = std::result::Result<T, RouterError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> RouterResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> RouterResult<T> {
        self.map_err(|e| RouterError::Internal(format!("{context}: {e}")))
    }
}

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::error::RouterError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::RouterError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::core::error::RouterError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::RouterError::Internal(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_variants_map_directly() {
        assert_eq!(
            RouterError::NotFound("Route 'x' not found - 404".into()).display_code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            RouterError::Network("connection reset".into()).display_code(),
            ErrorCode::ServiceUnavailable
        );
        assert_eq!(
            RouterError::Permission("admin only".into()).display_code(),
            ErrorCode::Forbidden
        );
        assert_eq!(
            RouterError::http(StatusCode::FORBIDDEN).display_code(),
            ErrorCode::Forbidden
        );
    }

    #[test]
    fn test_message_heuristics() {
        assert_eq!(
            ErrorCode::classify("Failed to resolve module specifier"),
            ErrorCode::NotFound
        );
        assert_eq!(ErrorCode::classify("Failed to fetch"), ErrorCode::NotFound);
        assert_eq!(
            ErrorCode::classify("network unreachable"),
            ErrorCode::ServiceUnavailable
        );
        assert_eq!(
            ErrorCode::classify("no permission for resource"),
            ErrorCode::Forbidden
        );
        assert_eq!(ErrorCode::classify("boom"), ErrorCode::Internal);
        assert_eq!(
            RouterError::http(StatusCode::INTERNAL_SERVER_ERROR).display_code(),
            ErrorCode::Internal
        );
        assert_eq!(
            RouterError::Internal("status 404 from api".into()).display_code(),
            ErrorCode::NotFound
        );
    }

    #[test]
    fn test_view_route() {
        assert_eq!(ErrorCode::NotFound.view_route(), "404");
        assert_eq!(ErrorCode::Internal.view_route(), "error");
        assert_eq!(ErrorCode::ServiceUnavailable.to_string(), "503");
    }

    #[test]
    fn test_with_context() {
        let res: Result<(), &str> = Err("disk gone");
        let err = res.with_context("Loading layout").unwrap_err();
        assert_eq!(err.to_string(), "Internal error: Loading layout: disk gone");
    }

    #[test]
    fn test_macros() {
        let err = config_error!("bad value {}", 3);
        assert!(matches!(err, RouterError::Configuration(ref m) if m == "bad value 3"));
        let err = internal_error!("oops");
        assert!(matches!(err, RouterError::Internal(ref m) if m == "oops"));
    }
}
