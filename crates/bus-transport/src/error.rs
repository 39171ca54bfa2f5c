use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("bus not connected")]
    NotConnected,
    #[error("publish rejected: {0}")]
    Rejected(String),
    #[error("invalid topic: {0}")]
    InvalidTopic(String),
    #[error("I/O error: {0}")]
    Io(String),
}
