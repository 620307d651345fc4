//! Actor core: messages, handles, mailboxes, behaviors and the run loop.
//!
//! # Main Components
//!
//! - [`Message`] / [`Envelope`] - Type-erased payloads and their routing metadata
//! - [`ActorHandle`] / [`WeakActorHandle`] - Owning and observing references to an actor
//! - [`Behavior`] - Ordered, typed dispatch table
//! - [`Context`] - What a handler can do besides touching its own state
//! - [`Actor`] - Trait implemented by user actors
//!
//! Actors are spawned through [`ActorSystem::spawn`](crate::lifecycle::ActorSystem::spawn).

pub mod actor;
pub mod behavior;
pub mod context;
pub mod handle;
pub(crate) mod mailbox;
pub mod message;

pub use actor::Actor;
pub(crate) use actor::ActorRunner;
pub use behavior::{Behavior, FallbackFn, Handled};
pub use context::{Context, Pending};
pub use handle::{rejected_messages, ActorAddr, ActorHandle, ActorId, NodeId, WeakActorHandle};
pub use message::{Envelope, Message, MessageId, Payload, Priority};
