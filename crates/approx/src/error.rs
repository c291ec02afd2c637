use thiserror::Error as ThisError;

/// Any kind of error raised while constructing or driving a bootstrapped
/// aggregation.
///
/// All errors are reported synchronously to the immediate caller.  Nothing
/// in this crate retries or downgrades an error to a partial result.
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum BootstrapError {
    /// The wrapped aggregation function or the configuration cannot be used
    /// for bootstrapping.  Raised when the wrapper is constructed, before
    /// any input is processed.
    #[error("Invalid bootstrap configuration: {0}")]
    Configuration(String),

    /// A call received an argument that violates its contract.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An internal invariant was broken.  Indicates a bug rather than bad
    /// input.
    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    /// The batch codec failed to pack or unpack replica states.
    #[error("Error encoding or decoding replica states: {0}")]
    Codec(String),
}

impl BootstrapError {
    /// Stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::InternalInvariant(_) => "InternalInvariantViolation",
            Self::Codec(_) => "CodecError",
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

pub type BootstrapResult<T> = Result<T, BootstrapError>;
