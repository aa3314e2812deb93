/// Result alias that carries the custom [`HumSearchError`] type.
pub type Result<T> = std::result::Result<T, HumSearchError>;

/// Coarse grouping of failures. Every class collapses to the same `error`
/// status in the session; the class only decides how loudly it is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Microphone permission or audio device failures.
    Device,
    /// Transport failures talking to the backend.
    Network,
    /// The backend answered but reported no usable result.
    Backend,
    /// Local misuse: bad input, invalid transitions, IO.
    Local,
}

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum HumSearchError {
    /// Access to the microphone was refused by the host.
    #[error("microphone permission denied: {0}")]
    Permission(String),
    /// No usable audio device, or the device failed to start.
    #[error("audio device error: {0}")]
    Device(String),
    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend responded with a non-success status code.
    #[error("backend responded with HTTP {status}")]
    Http { status: u16 },
    /// The backend reported `success: false`.
    #[error("backend reported failure: {0}")]
    Backend(String),
    /// The backend succeeded but returned no candidates.
    #[error("no matching songs found")]
    NoMatch,
    /// The response body did not match the expected shape.
    #[error("malformed backend response: {0}")]
    Malformed(String),
    /// Audio bytes could not be decoded into samples.
    #[error("could not decode audio: {0}")]
    Decode(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    /// An action was requested in a status that does not allow it.
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Free-form message for failures without a dedicated variant.
    #[error("{0}")]
    Message(String),
}

impl HumSearchError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Returns the taxonomy bucket the error belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Permission(_) | Self::Device(_) => ErrorClass::Device,
            Self::Transport(_) | Self::Http { .. } => ErrorClass::Network,
            Self::Backend(_) | Self::NoMatch | Self::Malformed(_) => ErrorClass::Backend,
            Self::Decode(_)
            | Self::Config(_)
            | Self::InvalidTransition { .. }
            | Self::InvalidInput(_)
            | Self::Io(_)
            | Self::Message(_) => ErrorClass::Local,
        }
    }
}

impl From<&str> for HumSearchError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for HumSearchError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<reqwest::Error> for HumSearchError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Malformed(value.to_string())
        } else if let Some(status) = value.status() {
            Self::Http {
                status: status.as_u16(),
            }
        } else {
            Self::Transport(value.to_string())
        }
    }
}

impl From<symphonia::core::errors::Error> for HumSearchError {
    fn from(value: symphonia::core::errors::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<hound::Error> for HumSearchError {
    fn from(value: hound::Error) -> Self {
        match value {
            hound::Error::IoError(err) => Self::Io(err),
            hound::Error::FormatError(reason) => Self::InvalidInput(reason),
            _ => Self::InvalidInput("could not encode wav clip"),
        }
    }
}

impl From<toml::de::Error> for HumSearchError {
    fn from(value: toml::de::Error) -> Self {
        Self::Config(value.to_string())
    }
}
