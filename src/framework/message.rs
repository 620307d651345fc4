//! # Messages & Envelopes
//!
//! A [`Message`] is a type-erased, cheaply clonable payload. Cloning a message
//! shares the underlying value, which is what makes group fan-out affordable:
//! every subscriber receives the same allocation.
//!
//! An [`Envelope`] wraps a message with its routing metadata: the (weak) sender,
//! the correlation id, the priority, and, for requests, the one-shot channel the
//! reply travels back on.

use crate::error::ActorError;
use crate::framework::handle::WeakActorHandle;
use crate::registry;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Anything that can travel inside a [`Message`].
///
/// Payloads are shared between recipients, so they must be `Sync`; handlers
/// receive owned values, so they must be `Clone`.
pub trait Payload: Any + Send + Sync + Clone + fmt::Debug {}

impl<T> Payload for T where T: Any + Send + Sync + Clone + fmt::Debug {}

/// Channel a request's reply is delivered on.
pub(crate) type Promise = oneshot::Sender<Result<Message, ActorError>>;

type DebugFn = fn(&(dyn Any + Send + Sync), &mut fmt::Formatter<'_>) -> fmt::Result;

fn debug_as<T: fmt::Debug + 'static>(
    value: &(dyn Any + Send + Sync),
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    match value.downcast_ref::<T>() {
        Some(value) => fmt::Debug::fmt(value, f),
        None => f.write_str("<opaque>"),
    }
}

/// A type-erased message payload tagged with its registry type id.
#[derive(Clone)]
pub struct Message {
    value: Arc<dyn Any + Send + Sync>,
    rust_type: TypeId,
    type_name: &'static str,
    type_id: Option<u32>,
    debug: DebugFn,
}

impl Message {
    pub fn new<T: Payload>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            rust_type: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            type_id: registry::id_of::<T>(),
            debug: debug_as::<T>,
        }
    }

    /// The registry id of the payload type, if the type was registered.
    pub fn type_id(&self) -> Option<u32> {
        self.type_id
    }

    pub fn rust_type(&self) -> TypeId {
        self.rust_type
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.rust_type == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Extracts the payload, cloning only if the value is still shared.
    pub fn take<T: Payload>(self) -> Result<T, Message> {
        let Message {
            value,
            rust_type,
            type_name,
            type_id,
            debug,
        } = self;
        match value.downcast::<T>() {
            Ok(value) => Ok(Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone())),
            Err(value) => Err(Message {
                value,
                rust_type,
                type_name,
                type_id,
                debug,
            }),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.debug)(self.value.as_ref(), f)
    }
}

/// Correlation tag of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageId {
    /// Fire-and-forget.
    #[default]
    None,
    /// The n-th request of the sending actor.
    Request(u64),
    /// The answer to request n, routed back to the requester.
    Response(u64),
}

impl MessageId {
    pub fn is_request(&self) -> bool {
        matches!(self, MessageId::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, MessageId::Response(_))
    }
}

/// Mailbox lane. High-priority envelopes are dequeued ahead of normal ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    High,
    #[default]
    Normal,
}

/// Payload of a response envelope delivered to a waiting requester.
#[derive(Debug, Clone)]
pub(crate) struct ResponsePayload(pub(crate) Result<Message, ActorError>);

/// A message plus its routing metadata.
#[derive(Debug)]
pub struct Envelope {
    pub(crate) sender: Option<WeakActorHandle>,
    pub(crate) mid: MessageId,
    pub(crate) priority: Priority,
    pub(crate) payload: Message,
    pub(crate) promise: Option<Promise>,
}

impl Envelope {
    pub fn new(sender: Option<WeakActorHandle>, payload: Message) -> Self {
        Self {
            sender,
            mid: MessageId::None,
            priority: Priority::Normal,
            payload,
            promise: None,
        }
    }

    pub(crate) fn request(
        sender: Option<WeakActorHandle>,
        id: u64,
        payload: Message,
        promise: Promise,
    ) -> Self {
        Self {
            sender,
            mid: MessageId::Request(id),
            priority: Priority::Normal,
            payload,
            promise: Some(promise),
        }
    }

    pub(crate) fn response(id: u64, result: Result<Message, ActorError>) -> Self {
        Self {
            sender: None,
            mid: MessageId::Response(id),
            priority: Priority::High,
            payload: Message::new(ResponsePayload(result)),
            promise: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn sender(&self) -> Option<&WeakActorHandle> {
        self.sender.as_ref()
    }

    pub fn mid(&self) -> MessageId {
        self.mid
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn payload(&self) -> &Message {
        &self.payload
    }

    /// Answers a pending request with an error. Used when an envelope is
    /// rejected or bounced from a terminating mailbox.
    pub(crate) fn bounce(self, error: ActorError) {
        if let Some(promise) = self.promise {
            let _ = promise.send(Err(error));
        }
    }
}
