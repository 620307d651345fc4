use crate::error::ActorError;
use crate::group::GroupError;
use std::collections::BTreeSet;
use thiserror::Error;

/// Failures of remote operations. Every middleman call returns one of these
/// instead of panicking.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MiddlemanError {
    #[error("cannot connect to node at {0}")]
    CannotConnectToNode(String),

    #[error("no actor published at port {0}")]
    NoActorPublishedAtPort(u16),

    /// The remote actor does not advertise every requested interface.
    #[error("unexpected actor messaging interface: expected {expected:?}, found {found:?}")]
    UnexpectedActorMessagingInterface {
        expected: BTreeSet<String>,
        found: BTreeSet<String>,
    },

    #[error("cannot publish invalid actor")]
    CannotPublishInvalidActor,

    #[error("cannot open port {0}")]
    CannotOpenPort(u16),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("incompatible application identifiers")]
    IncompatibleApplicationIds,

    #[error("remote operation timed out")]
    Timeout,

    /// The multiplexer is gone (stopped or crashed).
    #[error("network backend is down")]
    BackendDown,

    #[error("unknown network backend: {0}")]
    UnknownBackend(String),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Actor(#[from] ActorError),
}
