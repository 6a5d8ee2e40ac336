//! Gateway-level error types raised by the query pipeline.

/// Pipeline error conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum GatewayErrorKind {
    /// Workspace membership check failed
    #[display("access denied")]
    AccessDenied,
    /// Session, connection, or provider does not exist
    #[display("{} not found", _0)]
    NotFound(String),
    /// Request body validation failed
    #[display("invalid request: {}", _0)]
    InvalidRequest(String),
    /// Internal failure (adapter construction, introspection, cache)
    #[display("internal error: {}", _0)]
    Internal(String),
}

/// Gateway error with source location tracking.
///
/// # Examples
///
/// ```
/// use sibyl_error::{GatewayError, GatewayErrorKind};
///
/// let err = GatewayError::new(GatewayErrorKind::AccessDenied);
/// assert!(format!("{}", err).contains("access denied"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Gateway error: {} at {}:{}", kind, file, line)]
pub struct GatewayError {
    /// The kind of error that occurred
    pub kind: GatewayErrorKind,
    /// Line number where the error was created
    pub line: u32,
    /// File where the error was created
    pub file: &'static str,
}

impl GatewayError {
    /// Create a new GatewayError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: GatewayErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Shorthand for a not-found error naming the missing entity.
    #[track_caller]
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::NotFound(entity.into()))
    }

    /// Shorthand for an invalid-request error.
    #[track_caller]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::InvalidRequest(reason.into()))
    }
}
