//! LLM provider error types.

/// Provider error conditions.
///
/// Every back-end normalizes its wire failures into one of these kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ProviderErrorKind {
    /// The back-end could not be reached or returned a server error
    #[display("provider unavailable: {}", _0)]
    Unavailable(String),
    /// Credentials were rejected
    #[display("authentication failed: {}", _0)]
    AuthFailed(String),
    /// The request deadline expired
    #[display("provider request timed out")]
    Timeout,
    /// The back-end returned no usable content
    #[display("empty response from provider")]
    EmptyResponse,
    /// The provider exists but carries no credentials
    #[display("provider not configured: {}", _0)]
    NotConfigured(String),
    /// No provider registered under the requested tag
    #[display("provider not found: {}", _0)]
    UnknownProvider(String),
    /// Request or response body failed to serialize
    #[display("wire format error: {}", _0)]
    Wire(String),
}

/// Provider error with source location tracking.
///
/// # Examples
///
/// ```
/// use sibyl_error::{ProviderError, ProviderErrorKind};
///
/// let err = ProviderError::new(ProviderErrorKind::EmptyResponse);
/// assert!(format!("{}", err).contains("empty response"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Provider error: {} at {}:{}", kind, file, line)]
pub struct ProviderError {
    /// The kind of error that occurred
    pub kind: ProviderErrorKind,
    /// Line number where the error was created
    pub line: u32,
    /// File where the error was created
    pub file: &'static str,
}

impl ProviderError {
    /// Create a new ProviderError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: ProviderErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
