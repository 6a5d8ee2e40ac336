//! Top-level error wrapper types.

use crate::{AdapterError, ConfigError, GatewayError, GuardError, ProviderError, StoreError};

/// The foundation error enum for the Sibyl workspace.
///
/// # Examples
///
/// ```
/// use sibyl_error::{SibylError, ConfigError};
///
/// let cfg_err = ConfigError::new("missing value");
/// let err: SibylError = cfg_err.into();
/// assert!(format!("{}", err).contains("Config error"));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum SibylErrorKind {
    /// SQL safety validator rejection
    #[from(GuardError)]
    Guard(GuardError),
    /// Database adapter error
    #[from(AdapterError)]
    Adapter(AdapterError),
    /// LLM provider error
    #[from(ProviderError)]
    Provider(ProviderError),
    /// Durable store error
    #[from(StoreError)]
    Store(StoreError),
    /// Gateway / pipeline error
    #[from(GatewayError)]
    Gateway(GatewayError),
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
}

/// Sibyl error with kind discrimination.
///
/// # Examples
///
/// ```
/// use sibyl_error::{SibylResult, StoreError};
///
/// fn might_fail() -> SibylResult<()> {
///     Err(StoreError::not_found("session"))?
/// }
///
/// assert!(might_fail().is_err());
/// ```
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Sibyl error: {}", _0)]
pub struct SibylError(Box<SibylErrorKind>);

impl SibylError {
    /// Create a new error from a kind.
    pub fn new(kind: SibylErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &SibylErrorKind {
        &self.0
    }
}

// Generic From implementation for any type that converts to SibylErrorKind
impl<T> From<T> for SibylError
where
    T: Into<SibylErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for Sibyl operations.
pub type SibylResult<T> = std::result::Result<T, SibylError>;
