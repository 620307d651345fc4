//! # Runtime Errors
//!
//! Error types shared by the registry and the actor framework. Group and
//! middleman failures live next to their modules ([`crate::group::GroupError`],
//! [`crate::middleman::MiddlemanError`]) and wrap these where they cross over.

use thiserror::Error;

/// Errors raised while sending to, requesting from, or running an actor.
///
/// `ActorError` is `Clone` because it travels inside reply envelopes: a
/// handler's `Err` is delivered to the requester as-is.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActorError {
    /// The target mailbox is closed (the actor is gone).
    #[error("Actor closed")]
    ActorClosed,

    /// The actor dropped the response channel without answering.
    #[error("Actor dropped response channel")]
    ActorDropped,

    /// No handler in the current behavior matched, and no default handler is set.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// A reply arrived but did not carry the type the requester expected.
    #[error("unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse { expected: &'static str, got: String },

    /// The requester's timeout elapsed before a reply arrived.
    #[error("request timed out")]
    RequestTimeout,

    /// The receiver terminated while the request was still queued.
    #[error("request receiver is down")]
    RequestReceiverDown,

    /// An application-level failure reported by a handler.
    #[error("{0}")]
    Handler(String),
}

impl ActorError {
    /// Wraps any displayable error as a handler failure.
    pub fn handler(e: impl std::fmt::Display) -> Self {
        ActorError::Handler(e.to_string())
    }
}

impl From<String> for ActorError {
    fn from(msg: String) -> Self {
        ActorError::Handler(msg)
    }
}

/// Errors reported by the global type registry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    /// A type id is already bound to a different name.
    #[error("type ID {id} already assigned to {existing} (tried to override with {attempted})")]
    Conflict {
        id: u32,
        existing: String,
        attempted: String,
    },

    /// The block would run past the last representable id.
    #[error("type ID block of {len} starting at {first_id} exceeds the ID space")]
    IdOutOfRange { first_id: u32, len: usize },

    #[error("no type registered under ID {0}")]
    UnknownType(u32),

    #[error("type {0} is not registered")]
    NotRegistered(&'static str),

    /// The message handed to a descriptor holds a different Rust type.
    #[error("descriptor for {expected} cannot encode {got}")]
    TypeMismatch { expected: String, got: &'static str },

    #[error("codec error: {0}")]
    Codec(String),
}
