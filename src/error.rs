use thiserror::Error;

/// Errors surfaced by the client runtime.
///
/// Lookup and creation failures are returned synchronously to the
/// administrative caller; connection-level failures are recorded per item or
/// logged from the background context instead of being thrown at call sites.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("no such name: {0}")]
    NotFound(String),
    #[error("name '{0}' already in use")]
    DuplicateName(String),
    #[error("invalid name '{0}'")]
    InvalidName(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("session is not connected")]
    NotConnected,
    #[error("namespace index {0} has no live mapping")]
    UnresolvedNamespace(u16),
    #[error("namespace index {0} exceeds table length {1}")]
    OutOfRange(u16, usize),
    #[error("transport error: {0}")]
    Transport(String),
}

pub type ClientResult<T, E = ClientError> = Result<T, E>;
