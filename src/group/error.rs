use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no module named \"{0}\" found")]
    NoSuchGroupModule(String),

    /// The owning actor system was dropped.
    #[error("actor system is shut down")]
    SystemDown,
}
