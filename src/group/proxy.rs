//! Local stand-in for a group hosted on another node.
//!
//! The proxy keeps its own subscriber set and a pair of helper actors:
//!
//! - the **proxy dispatcher** is what the remote dispatcher knows as an
//!   acquaintance; everything it receives is fanned out to local subscribers
//! - the **dispatcher monitor** watches the remote dispatcher and tells local
//!   subscribers with a [`GroupDown`] when it goes away, then drops the proxy
//!   from its module's cache
//!
//! Exactly one `JoinGroup` is sent per 0→1 transition of the local subscriber
//! count and one `LeaveGroup` per 1→0 transition. Both are sent while the
//! write lock is held, so the remote side always sees them alternate.

use crate::framework::{Actor, ActorAddr, ActorHandle, Behavior, Context, Message, WeakActorHandle};
use crate::group::{
    broadcast, AbstractGroup, ForwardToGroup, Group, GroupDown, JoinGroup, LeaveGroup,
};
use crate::lifecycle::ActorSystem;
use crate::supervision::{send_exit, ExitReason};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

pub struct GroupProxy {
    module: String,
    identifier: String,
    remote_dispatcher: ActorHandle,
    proxy_dispatcher: ActorHandle,
    monitor: ActorHandle,
    subscribers: RwLock<HashMap<ActorAddr, ActorHandle>>,
}

impl GroupProxy {
    pub(crate) fn new(
        system: &ActorSystem,
        module: &str,
        identifier: &str,
        remote_dispatcher: ActorHandle,
    ) -> Arc<Self> {
        let proxy = Arc::new_cyclic(|weak: &Weak<GroupProxy>| GroupProxy {
            module: module.to_string(),
            identifier: identifier.to_string(),
            proxy_dispatcher: system.spawn_hidden(ProxyDispatcher {
                group: weak.clone(),
            }),
            monitor: system.spawn_hidden(DispatcherMonitor {
                group: weak.clone(),
                remote: Some(remote_dispatcher.clone()),
            }),
            remote_dispatcher,
            subscribers: RwLock::new(HashMap::new()),
        });
        info!(
            module,
            group = identifier,
            remote = %proxy.remote_dispatcher.addr(),
            "Group proxy created"
        );
        proxy
    }

    pub fn remote_dispatcher(&self) -> &ActorHandle {
        &self.remote_dispatcher
    }

    fn send_all_subscribers(&self, sender: &Option<WeakActorHandle>, msg: &Message) -> usize {
        broadcast(self.subscribers.read().values(), sender, msg)
    }
}

impl AbstractGroup for GroupProxy {
    fn module(&self) -> &str {
        &self.module
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn dispatcher(&self) -> &ActorHandle {
        &self.proxy_dispatcher
    }

    fn subscribe(&self, who: &ActorHandle) -> bool {
        if !who.is_alive() {
            return false;
        }
        let mut subscribers = self.subscribers.write();
        if subscribers.contains_key(&who.addr()) {
            return false;
        }
        subscribers.insert(who.addr(), who.clone());
        if subscribers.len() == 1 {
            debug!(group = %self.identifier, remote = %self.remote_dispatcher.addr(), "Join remote group");
            self.remote_dispatcher.send(JoinGroup {
                who: self.proxy_dispatcher.clone(),
            });
        }
        true
    }

    fn unsubscribe(&self, who: &ActorAddr) {
        let mut subscribers = self.subscribers.write();
        if subscribers.remove(who).is_some() && subscribers.is_empty() {
            debug!(group = %self.identifier, remote = %self.remote_dispatcher.addr(), "Leave remote group");
            self.remote_dispatcher.send(LeaveGroup {
                who: self.proxy_dispatcher.clone(),
            });
        }
    }

    fn enqueue(&self, sender: Option<WeakActorHandle>, msg: Message) {
        self.remote_dispatcher.enqueue(crate::framework::Envelope::new(
            sender,
            Message::new(ForwardToGroup { payload: msg }),
        ));
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn stop(&self) {
        info!(module = %self.module, group = %self.identifier, "Stopping group proxy");
        send_exit(&self.proxy_dispatcher, ExitReason::Kill);
        send_exit(&self.monitor, ExitReason::Kill);
    }
}

/// Receives relays from the remote dispatcher.
struct ProxyDispatcher {
    group: Weak<GroupProxy>,
}

impl Actor for ProxyDispatcher {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        Behavior::new().or_else(|state: &mut Self, ctx, msg| {
            if let Some(group) = state.group.upgrade() {
                group.send_all_subscribers(&ctx.sender().cloned(), msg);
            }
            Ok(None)
        })
    }
}

struct DispatcherMonitor {
    group: Weak<GroupProxy>,
    remote: Option<ActorHandle>,
}

impl Actor for DispatcherMonitor {
    fn make_behavior(&mut self, ctx: &mut Context<Self>) -> Behavior<Self> {
        if let Some(remote) = self.remote.take() {
            ctx.monitor(&remote);
        }
        ctx.set_down_handler(|state, ctx, down| {
            info!(remote = %down.source, reason = %down.reason, "Remote group dispatcher down");
            if let Some(group) = state.group.upgrade() {
                let notice = Message::new(GroupDown {
                    group: Group::new(group.clone()),
                });
                group.send_all_subscribers(&None, &notice);
                ctx.system().groups().forget_proxy(&group.module, &down.source);
                send_exit(&group.proxy_dispatcher, ExitReason::Kill);
            }
            ctx.quit(down.reason);
        });
        Behavior::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use crate::framework::NodeId;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(usize),
        Unsubscribe(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize).prop_map(Op::Subscribe),
            (0..4usize).prop_map(Op::Unsubscribe),
        ]
    }

    proptest! {
        #[test]
        fn join_and_leave_follow_subscriber_count(ops in prop::collection::vec(op(), 0..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let (joins, leaves, expected_joins, expected_leaves, alternating) = runtime.block_on(async {
                let system = ActorSystem::new(SystemConfig::default());
                let (remote, mut inbox, _cell) = ActorHandle::allocate(NodeId::random(), "remote");
                let proxy = GroupProxy::new(&system, "local", "g", remote.clone());
                let subscribers: Vec<ActorHandle> = (0..4)
                    .map(|i| ActorHandle::allocate(system.node(), ["a", "b", "c", "d"][i]).0)
                    .collect();

                let mut members = std::collections::HashSet::new();
                let (mut expected_joins, mut expected_leaves) = (0, 0);
                for op in &ops {
                    match op {
                        Op::Subscribe(i) => {
                            let was_empty = members.is_empty();
                            if members.insert(*i) && was_empty {
                                expected_joins += 1;
                            }
                            proxy.subscribe(&subscribers[*i]);
                        }
                        Op::Unsubscribe(i) => {
                            if members.remove(i) && members.is_empty() {
                                expected_leaves += 1;
                            }
                            proxy.unsubscribe(&subscribers[*i].addr());
                        }
                    }
                }

                let (mut joins, mut leaves, mut alternating, mut joined) = (0, 0, true, false);
                while let Some(envelope) = inbox.try_next() {
                    if envelope.payload().is::<JoinGroup>() {
                        alternating &= !joined;
                        joined = true;
                        joins += 1;
                    } else if envelope.payload().is::<LeaveGroup>() {
                        alternating &= joined;
                        joined = false;
                        leaves += 1;
                    }
                }
                proxy.stop();
                (joins, leaves, expected_joins, expected_leaves, alternating)
            });
            prop_assert_eq!(joins, expected_joins);
            prop_assert_eq!(leaves, expected_leaves);
            prop_assert!(alternating);
        }
    }
}
