//! Database adapter error types.

/// Adapter error conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum AdapterErrorKind {
    /// Connection attempt failed
    #[display("failed to connect: {}", _0)]
    Connect(String),
    /// Operation attempted before connect or after close
    #[display("not connected")]
    NotConnected,
    /// No factory registered for the requested database kind
    #[display("unsupported database kind: {}", _0)]
    UnsupportedDatabase(String),
    /// Query execution failed
    #[display("query failed: {}", _0)]
    Query(String),
    /// Schema introspection failed
    #[display("introspection failed: {}", _0)]
    Introspection(String),
    /// The per-query deadline expired
    #[display("query timed out after {}s", _0)]
    Timeout(u64),
    /// A cell value could not be decoded into a JSON representation
    #[display("failed to decode value: {}", _0)]
    Decode(String),
}

/// Adapter error with source location tracking.
///
/// # Examples
///
/// ```
/// use sibyl_error::{AdapterError, AdapterErrorKind};
///
/// let err = AdapterError::new(AdapterErrorKind::NotConnected);
/// assert!(format!("{}", err).contains("not connected"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Adapter error: {} at {}:{}", kind, file, line)]
pub struct AdapterError {
    /// The kind of error that occurred
    pub kind: AdapterErrorKind,
    /// Line number where the error was created
    pub line: u32,
    /// File where the error was created
    pub file: &'static str,
}

impl AdapterError {
    /// Create a new AdapterError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: AdapterErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// The message without location noise, for the response `error` field.
    pub fn reason(&self) -> String {
        self.kind.to_string()
    }
}
