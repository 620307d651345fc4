//! Groups hosted on this node and their dispatchers.

use crate::framework::{
    Actor, ActorAddr, ActorHandle, Behavior, Context, Envelope, Message, WeakActorHandle,
};
use crate::group::{broadcast, AbstractGroup, ForwardToGroup, JoinGroup, LeaveGroup};
use crate::lifecycle::ActorSystem;
use crate::supervision::{send_exit, ExitReason};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// A group whose subscriber set lives on this node.
///
/// The group owns its dispatcher; the dispatcher only holds a `Weak`
/// back-reference, so dropping the group terminates the dispatcher.
pub struct LocalGroup {
    module: String,
    identifier: String,
    dispatcher: ActorHandle,
    subscribers: RwLock<HashMap<ActorAddr, ActorHandle>>,
}

impl LocalGroup {
    pub(crate) fn new(system: &ActorSystem, module: &str, identifier: &str) -> Arc<Self> {
        Arc::new_cyclic(|weak| LocalGroup {
            module: module.to_string(),
            identifier: identifier.to_string(),
            dispatcher: system.spawn_hidden(LocalDispatcher::new(weak.clone())),
            subscribers: RwLock::new(HashMap::new()),
        })
    }

    /// Returns whether `who` was inserted and the resulting size.
    pub fn add_subscriber(&self, who: &ActorHandle) -> (bool, usize) {
        let mut subscribers = self.subscribers.write();
        let inserted = !subscribers.contains_key(&who.addr());
        if inserted {
            subscribers.insert(who.addr(), who.clone());
        }
        (inserted, subscribers.len())
    }

    /// Returns whether `who` was removed and the resulting size.
    pub fn erase_subscriber(&self, who: &ActorAddr) -> (bool, usize) {
        let mut subscribers = self.subscribers.write();
        let removed = subscribers.remove(who).is_some();
        (removed, subscribers.len())
    }

    /// Delivers `msg` to every local subscriber under the shared lock.
    pub fn send_all_subscribers(&self, sender: &Option<WeakActorHandle>, msg: &Message) -> usize {
        broadcast(self.subscribers.read().values(), sender, msg)
    }
}

impl AbstractGroup for LocalGroup {
    fn module(&self) -> &str {
        &self.module
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn dispatcher(&self) -> &ActorHandle {
        &self.dispatcher
    }

    fn subscribe(&self, who: &ActorHandle) -> bool {
        if !who.is_alive() {
            return false;
        }
        let (inserted, size) = self.add_subscriber(who);
        debug!(group = %self.identifier, subscriber = %who.addr(), inserted, size, "subscribe");
        inserted
    }

    fn unsubscribe(&self, who: &ActorAddr) {
        let (removed, size) = self.erase_subscriber(who);
        debug!(group = %self.identifier, subscriber = %who, removed, size, "unsubscribe");
    }

    fn enqueue(&self, sender: Option<WeakActorHandle>, msg: Message) {
        self.send_all_subscribers(&sender, &msg);
        self.dispatcher.enqueue(Envelope::new(sender, msg));
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn stop(&self) {
        info!(module = %self.module, group = %self.identifier, "Stopping group");
        self.subscribers.write().clear();
        send_exit(&self.dispatcher, ExitReason::UserShutdown);
    }
}

/// Relays group traffic to acquaintances (proxy dispatchers of other nodes).
pub(crate) struct LocalDispatcher {
    group: Weak<LocalGroup>,
    acquaintances: HashMap<ActorAddr, ActorHandle>,
}

impl LocalDispatcher {
    fn new(group: Weak<LocalGroup>) -> Self {
        Self {
            group,
            acquaintances: HashMap::new(),
        }
    }

    fn relay(&self, sender: &Option<WeakActorHandle>, msg: &Message) {
        broadcast(self.acquaintances.values(), sender, msg);
    }
}

impl Actor for LocalDispatcher {
    fn make_behavior(&mut self, ctx: &mut Context<Self>) -> Behavior<Self> {
        ctx.set_down_handler(|state, ctx, down| {
            if state.acquaintances.remove(&down.source).is_some() {
                debug!(dispatcher = %ctx.addr(), acquaintance = %down.source, "Acquaintance down");
            }
        });

        Behavior::new()
            .on(|state: &mut Self, ctx, JoinGroup { who }: JoinGroup| {
                if !state.acquaintances.contains_key(&who.addr()) {
                    ctx.monitor(&who);
                    info!(dispatcher = %ctx.addr(), acquaintance = %who.addr(), "Acquaintance joined");
                    state.acquaintances.insert(who.addr(), who);
                }
                Ok(())
            })
            .on(|state: &mut Self, ctx, LeaveGroup { who }: LeaveGroup| {
                if let Some(acquaintance) = state.acquaintances.remove(&who.addr()) {
                    ctx.demonitor(&acquaintance);
                    info!(dispatcher = %ctx.addr(), acquaintance = %who.addr(), "Acquaintance left");
                }
                Ok(())
            })
            .on(|state: &mut Self, ctx, ForwardToGroup { payload }: ForwardToGroup| {
                let sender = ctx.sender().cloned();
                if let Some(group) = state.group.upgrade() {
                    group.send_all_subscribers(&sender, &payload);
                }
                state.relay(&sender, &payload);
                Ok(())
            })
            .or_else(|state: &mut Self, ctx, msg| {
                state.relay(&ctx.sender().cloned(), msg);
                Ok(None)
            })
    }
}
