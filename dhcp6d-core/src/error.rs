//! Error types for the server framework

use thiserror::Error;

use dhcp6d_wire::options::StatusCodeOption;
use dhcp6d_wire::WireError;

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the server framework
#[derive(Error, Debug)]
pub enum Error {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire codec error
    #[error("codec error: {0}")]
    Wire(#[from] WireError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid parameter
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Handler failure while processing a bundle
    #[error("handler error: {0}")]
    Handler(String),

    /// Lease store failure
    #[error("lease store error: {0}")]
    Store(String),

    /// Insufficient privileges
    #[error("insufficient privileges: {0}")]
    Privilege(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Server is shutting down
    #[error("shutting down")]
    ShuttingDown,
}

impl Error {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create a handler error with a custom message
    pub fn handler<S: Into<String>>(msg: S) -> Self {
        Error::Handler(msg.into())
    }

    /// Create a lease store error with a custom message
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Error::Store(msg.into())
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        Error::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Control-flow signals raised by handlers to cut a bundle's processing short.
///
/// These are not failures of the server; they describe what should happen to
/// the transaction instead of a normal reply.
#[derive(Debug)]
pub enum Abort {
    /// Drop the request silently: it is not for us
    Ignore,
    /// Drop silently, but counted apart: the message was truncated junk
    Incomplete,
    /// Drop, recording a structured reason for logs and counters
    CannotRespond(String),
    /// A special case of cannot-respond: the message names another server
    ForOtherServer,
    /// The client used unicast when it shouldn't have; reply with a
    /// UseMulticast status
    UseMulticast,
    /// Reply with only the identification options and this status
    ReplyWithStatus(StatusCodeOption),
    /// A real handler failure: aborts this bundle and feeds the watchdog
    Failure(Error),
}

impl Abort {
    pub fn cannot_respond<S: Into<String>>(reason: S) -> Self {
        Abort::CannotRespond(reason.into())
    }
}

impl From<Error> for Abort {
    fn from(error: Error) -> Self {
        Abort::Failure(error)
    }
}

impl From<WireError> for Abort {
    fn from(error: WireError) -> Self {
        Abort::Failure(Error::Wire(error))
    }
}

/// Result type for handler phases
pub type HandlerResult = std::result::Result<(), Abort>;
