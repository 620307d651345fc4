//! # Actor Handles
//!
//! An actor is reached through its control block: identity, mailbox producers
//! and the shared [`ActorCell`] holding lifecycle state and attachments (links
//! and monitors).
//!
//! - [`ActorHandle`] is the owning reference. While at least one exists, the
//!   mailbox stays open.
//! - [`WeakActorHandle`] only observes. Subscriber-side bookkeeping, envelope
//!   senders and link tables use it so they never extend an actor's lifetime.
//!
//! When the last `ActorHandle` is dropped the mailbox closes; the actor drains
//! what is queued and terminates with [`ExitReason::Normal`].

use crate::error::ActorError;
use crate::framework::mailbox::{self, Mailbox, MailboxSender};
use crate::framework::message::{Envelope, Message, Payload, Priority};
use crate::supervision::{ExitReason, Lifecycle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::trace;
use uuid::Uuid;

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_ASK_ID: AtomicU64 = AtomicU64::new(1);
static REJECTED: AtomicU64 = AtomicU64::new(0);

/// Number of envelopes dropped because their target was gone, process-wide.
pub fn rejected_messages() -> u64 {
    REJECTED.load(Ordering::Relaxed)
}

fn reject(target: &ActorAddr, envelope: Envelope) {
    REJECTED.fetch_add(1, Ordering::Relaxed);
    trace!(target = %target, payload = envelope.payload.type_name(), "Message rejected");
    envelope.bounce(ActorError::RequestReceiverDown);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub u64);

impl ActorId {
    pub(crate) fn next() -> Self {
        ActorId(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque identifier of an actor system (a node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn random() -> Self {
        NodeId(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// Hashable identity of an actor: unique id within its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorAddr {
    pub id: ActorId,
    pub node: NodeId,
}

impl fmt::Display for ActorAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.node)
    }
}

#[derive(Debug)]
struct CellState {
    lifecycle: Lifecycle,
    /// Set when the attachments are taken. Later attaches see this reason.
    exit_reason: Option<ExitReason>,
    links: HashMap<ActorAddr, WeakActorHandle>,
    monitors: Vec<WeakActorHandle>,
}

/// Links and monitors taken from a cell when it is sealed.
#[derive(Debug)]
pub(crate) struct Attachments {
    pub(crate) links: Vec<WeakActorHandle>,
    pub(crate) monitors: Vec<WeakActorHandle>,
}

/// Lifecycle state and attachments, shared between the control block and the
/// running actor. Other actors mutate the attachment tables only through
/// `attach_*`/`detach_*`, under the cell's lock.
#[derive(Debug)]
pub(crate) struct ActorCell {
    state: Mutex<CellState>,
}

impl ActorCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(CellState {
                lifecycle: Lifecycle::Spawned,
                exit_reason: None,
                links: HashMap::new(),
                monitors: Vec::new(),
            }),
        }
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle.clone()
    }

    pub(crate) fn set_running(&self) {
        let mut state = self.state.lock();
        if state.lifecycle == Lifecycle::Spawned {
            state.lifecycle = Lifecycle::Running;
        }
    }

    pub(crate) fn begin_termination(&self) {
        let mut state = self.state.lock();
        if !matches!(state.lifecycle, Lifecycle::Down(_)) {
            state.lifecycle = Lifecycle::Terminating;
        }
    }

    /// Registers `watcher` for a down notification. Returns the exit reason
    /// instead if the actor is already down.
    pub(crate) fn attach_monitor(&self, watcher: WeakActorHandle) -> Option<ExitReason> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.exit_reason {
            return Some(reason.clone());
        }
        state.monitors.push(watcher);
        None
    }

    /// Removes one monitor registration of `watcher`.
    pub(crate) fn detach_monitor(&self, watcher: &ActorAddr) -> bool {
        let mut state = self.state.lock();
        match state.monitors.iter().position(|m| m.addr() == *watcher) {
            Some(pos) => {
                state.monitors.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn attach_link(&self, other: WeakActorHandle) -> Option<ExitReason> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.exit_reason {
            return Some(reason.clone());
        }
        state.links.insert(other.addr(), other);
        None
    }

    pub(crate) fn detach_link(&self, other: &ActorAddr) -> bool {
        self.state.lock().links.remove(other).is_some()
    }

    /// Records the exit reason and takes the attachments. Any attach after this
    /// point observes the reason instead, so each watcher is notified once.
    /// The lifecycle stays `Terminating` until [`ActorCell::mark_down`].
    pub(crate) fn seal(&self, reason: ExitReason) -> Attachments {
        let mut state = self.state.lock();
        state.lifecycle = Lifecycle::Terminating;
        state.exit_reason = Some(reason);
        Attachments {
            links: state.links.drain().map(|(_, link)| link).collect(),
            monitors: std::mem::take(&mut state.monitors),
        }
    }

    /// Called once every link and monitor has been notified.
    pub(crate) fn mark_down(&self) {
        let mut state = self.state.lock();
        if let Some(reason) = state.exit_reason.clone() {
            state.lifecycle = Lifecycle::Down(reason);
        }
    }
}

#[derive(Debug)]
struct ControlBlock {
    addr: ActorAddr,
    name: &'static str,
    mailbox: MailboxSender,
    cell: Arc<ActorCell>,
}

/// Owning reference to an actor.
#[derive(Clone)]
pub struct ActorHandle {
    inner: Arc<ControlBlock>,
}

impl ActorHandle {
    /// Allocates a control block and returns the consumer side for the run loop.
    pub(crate) fn allocate(node: NodeId, name: &'static str) -> (Self, Mailbox, Arc<ActorCell>) {
        let (sender, mailbox) = mailbox::channel();
        let cell = Arc::new(ActorCell::new());
        let handle = ActorHandle {
            inner: Arc::new(ControlBlock {
                addr: ActorAddr {
                    id: ActorId::next(),
                    node,
                },
                name,
                mailbox: sender,
                cell: cell.clone(),
            }),
        };
        (handle, mailbox, cell)
    }

    pub fn addr(&self) -> ActorAddr {
        self.inner.addr
    }

    pub fn id(&self) -> ActorId {
        self.inner.addr.id
    }

    pub fn node(&self) -> NodeId {
        self.inner.addr.node
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.cell.lifecycle()
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.lifecycle(), Lifecycle::Down(_))
    }

    pub fn downgrade(&self) -> WeakActorHandle {
        WeakActorHandle {
            addr: self.inner.addr,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn cell(&self) -> &ActorCell {
        &self.inner.cell
    }

    /// Enqueues an envelope. Never blocks; a closed mailbox drops the envelope,
    /// bumps [`rejected_messages`] and returns `false`.
    pub fn enqueue(&self, envelope: Envelope) -> bool {
        match self.inner.mailbox.push(envelope) {
            Ok(()) => true,
            Err(envelope) => {
                reject(&self.inner.addr, envelope);
                false
            }
        }
    }

    /// Anonymous, normal-priority send.
    pub fn send<M: Payload>(&self, msg: M) -> bool {
        self.enqueue(Envelope::new(None, Message::new(msg)))
    }

    pub fn send_with<M: Payload>(
        &self,
        sender: Option<&ActorHandle>,
        priority: Priority,
        msg: M,
    ) -> bool {
        let envelope = Envelope::new(sender.map(ActorHandle::downgrade), Message::new(msg))
            .with_priority(priority);
        self.enqueue(envelope)
    }

    /// Sends a request from outside any actor and waits for the typed reply.
    pub async fn ask<R: Payload>(
        &self,
        msg: impl Payload,
        timeout: Duration,
    ) -> Result<R, ActorError> {
        let (respond_to, response) = oneshot::channel();
        let id = NEXT_ASK_ID.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::request(None, id, Message::new(msg), respond_to);
        if !self.enqueue(envelope) {
            return Err(ActorError::ActorClosed);
        }
        let reply = tokio::time::timeout(timeout, response)
            .await
            .map_err(|_| ActorError::RequestTimeout)?
            .map_err(|_| ActorError::ActorDropped)??;
        reply.take::<R>().map_err(|other| ActorError::UnexpectedResponse {
            expected: type_name::<R>(),
            got: other.type_name().to_string(),
        })
    }
}

impl PartialEq for ActorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.addr == other.inner.addr
    }
}

impl Eq for ActorHandle {}

impl Hash for ActorHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.addr.hash(state);
    }
}

impl fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorHandle({}{})", self.inner.name, self.inner.addr)
    }
}

impl fmt::Display for ActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.inner.name, self.inner.addr)
    }
}

/// Observing reference to an actor. Keeps its address after the actor is gone.
#[derive(Clone)]
pub struct WeakActorHandle {
    addr: ActorAddr,
    inner: Weak<ControlBlock>,
}

impl WeakActorHandle {
    pub fn addr(&self) -> ActorAddr {
        self.addr
    }

    pub fn upgrade(&self) -> Option<ActorHandle> {
        self.inner.upgrade().map(|inner| ActorHandle { inner })
    }

    /// Enqueues if the actor is still referenced, otherwise counts the drop.
    pub fn enqueue(&self, envelope: Envelope) -> bool {
        match self.upgrade() {
            Some(handle) => handle.enqueue(envelope),
            None => {
                reject(&self.addr, envelope);
                false
            }
        }
    }

    pub fn send<M: Payload>(&self, msg: M) -> bool {
        self.enqueue(Envelope::new(None, Message::new(msg)))
    }
}

impl PartialEq for WeakActorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for WeakActorHandle {}

impl Hash for WeakActorHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl fmt::Debug for WeakActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakActorHandle({})", self.addr)
    }
}
