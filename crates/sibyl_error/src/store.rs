//! Durable store error types.

/// Store error conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum StoreErrorKind {
    /// Record not found
    #[display("{} not found", _0)]
    NotFound(String),
    /// Underlying storage failed
    #[display("storage error: {}", _0)]
    Storage(String),
    /// Value failed to serialize or deserialize
    #[display("serialization error: {}", _0)]
    Serialization(String),
}

/// Store error with source location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Store error: {} at {}:{}", kind, file, line)]
pub struct StoreError {
    /// The kind of error that occurred
    pub kind: StoreErrorKind,
    /// Line number where the error was created
    pub line: u32,
    /// File where the error was created
    pub file: &'static str,
}

impl StoreError {
    /// Create a new StoreError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: StoreErrorKind) -> Self {
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
        Self::new(StoreErrorKind::NotFound(entity.into()))
    }
}
