//! # Groups
//!
//! Publish/subscribe fan-out. A [`Group`] is a named set of subscribers; a
//! message sent to the group reaches every subscriber once.
//!
//! Every group owns a *dispatcher* actor. Local groups use it to relay traffic
//! to remote acquaintances (proxy dispatchers of other nodes that joined);
//! [`GroupProxy`] instances stand in for a group hosted elsewhere and turn local
//! subscription changes into `JoinGroup`/`LeaveGroup` traffic towards the
//! remote dispatcher.
//!
//! ```text
//!        node A                                node B
//!  sender ─► LocalGroup ─► subscribers A
//!               │
//!               └─► dispatcher ─────────────► proxy dispatcher ─► subscribers B
//! ```
//!
//! Groups are singletons per `(module, identifier)` and are obtained through
//! the [`GroupManager`].

mod error;
pub mod local;
pub mod manager;
pub mod module;
pub mod proxy;

pub use error::GroupError;
pub use local::LocalGroup;
pub use manager::GroupManager;
pub use module::{GroupModule, LocalGroupModule};
pub use proxy::GroupProxy;

use crate::framework::{ActorAddr, ActorHandle, Message, Payload, WeakActorHandle};
use std::fmt;
use std::sync::Arc;

/// Behavior shared by local groups and remote proxies.
pub trait AbstractGroup: Send + Sync + 'static {
    fn module(&self) -> &str;

    fn identifier(&self) -> &str;

    /// The actor that relays traffic for this group.
    fn dispatcher(&self) -> &ActorHandle;

    /// Adds `who`. Returns `false` if it already is a subscriber or is down.
    fn subscribe(&self, who: &ActorHandle) -> bool;

    /// Removes `who`; a no-op for non-members.
    fn unsubscribe(&self, who: &ActorAddr);

    fn enqueue(&self, sender: Option<WeakActorHandle>, msg: Message);

    fn subscriber_count(&self) -> usize;

    fn stop(&self);
}

/// Shared reference to a group.
#[derive(Clone)]
pub struct Group(Arc<dyn AbstractGroup>);

impl Group {
    pub fn new(group: Arc<dyn AbstractGroup>) -> Self {
        Group(group)
    }

    pub fn module(&self) -> &str {
        self.0.module()
    }

    pub fn identifier(&self) -> &str {
        self.0.identifier()
    }

    pub fn dispatcher(&self) -> &ActorHandle {
        self.0.dispatcher()
    }

    pub fn subscribe(&self, who: &ActorHandle) -> bool {
        self.0.subscribe(who)
    }

    pub fn unsubscribe(&self, who: &ActorAddr) {
        self.0.unsubscribe(who)
    }

    /// Anonymous broadcast.
    pub fn send<M: Payload>(&self, msg: M) {
        self.0.enqueue(None, Message::new(msg))
    }

    pub fn enqueue(&self, sender: Option<WeakActorHandle>, msg: Message) {
        self.0.enqueue(sender, msg)
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.subscriber_count()
    }

    pub fn stop(&self) {
        self.0.stop()
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}

impl Eq for Group {}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Group({}:{})", self.module(), self.identifier())
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module(), self.identifier())
    }
}

/// Asks a dispatcher to add `who` as an acquaintance.
#[derive(Debug, Clone)]
pub struct JoinGroup {
    pub who: ActorHandle,
}

#[derive(Debug, Clone)]
pub struct LeaveGroup {
    pub who: ActorHandle,
}

/// Asks a dispatcher to broadcast `payload` on its group.
#[derive(Debug, Clone)]
pub struct ForwardToGroup {
    pub payload: Message,
}

/// Delivered to proxy subscribers when the remote dispatcher goes down.
#[derive(Debug, Clone)]
pub struct GroupDown {
    pub group: Group,
}

/// Fans `msg` out to every handle in `subscribers`.
pub(crate) fn broadcast<'a>(
    subscribers: impl Iterator<Item = &'a ActorHandle>,
    sender: &Option<WeakActorHandle>,
    msg: &Message,
) -> usize {
    subscribers
        .map(|subscriber| {
            subscriber.enqueue(crate::framework::Envelope::new(sender.clone(), msg.clone()))
        })
        .filter(|delivered| *delivered)
        .count()
}
