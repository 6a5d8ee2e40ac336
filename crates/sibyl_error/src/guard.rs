//! SQL safety validator rejections.

/// Reasons the SQL safety validator refuses a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum GuardErrorKind {
    /// Empty or whitespace-only query
    #[display("empty SQL query")]
    Empty,
    /// More than one statement terminator
    #[display("multiple statements not allowed")]
    MultipleStatements,
    /// First keyword is not SELECT or WITH
    #[display("only SELECT statements allowed")]
    NotReadOnly,
    /// A generic or dialect-specific forbidden construct matched
    #[display("blocked SQL pattern detected: {}", _0)]
    BlockedPattern(String),
    /// Command document failed to parse (MongoDB)
    #[display("invalid command document: {}", _0)]
    InvalidCommand(String),
    /// Command name is not on the read-only allowlist (MongoDB)
    #[display("command '{}' is not allowed (read-only mode)", _0)]
    CommandNotAllowed(String),
    /// A write stage appeared in an aggregation pipeline (MongoDB)
    #[display("aggregation stage '{}' is not allowed", _0)]
    StageNotAllowed(String),
}

/// Validator rejection with source location tracking.
///
/// # Examples
///
/// ```
/// use sibyl_error::{GuardError, GuardErrorKind};
///
/// let err = GuardError::new(GuardErrorKind::NotReadOnly);
/// assert!(format!("{}", err).contains("SELECT"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("SQL guard: {} at {}:{}", kind, file, line)]
pub struct GuardError {
    /// The kind of rejection
    pub kind: GuardErrorKind,
    /// Line number where the error was created
    pub line: u32,
    /// File where the error was created
    pub file: &'static str,
}

impl GuardError {
    /// Create a new GuardError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: GuardErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// The human-readable reason, without location noise.
    ///
    /// This is what ends up in the query response's `error` field.
    pub fn reason(&self) -> String {
        self.kind.to_string()
    }
}
