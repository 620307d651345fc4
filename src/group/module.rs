use crate::framework::{ActorAddr, ActorHandle};
use crate::group::{AbstractGroup, Group, GroupError, GroupProxy, LocalGroup};
use crate::lifecycle::WeakActorSystem;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A namespace of groups, addressed as `module:identifier`.
pub trait GroupModule: Send + Sync {
    fn name(&self) -> &str;

    /// The group named `identifier`, created on first use.
    fn get(&self, identifier: &str) -> Result<Group, GroupError>;

    /// A group hosted behind `dispatcher`, possibly on another node.
    fn get_proxy(
        &self,
        identifier: &str,
        dispatcher: Option<ActorHandle>,
    ) -> Result<Group, GroupError>;

    /// Drops the cached proxy for a remote dispatcher that went down.
    fn forget_proxy(&self, _dispatcher: &ActorAddr) {}

    fn stop(&self);
}

/// The `local` module: groups hosted on this node plus proxies for groups of
/// other nodes, cached by remote dispatcher.
pub struct LocalGroupModule {
    name: String,
    system: WeakActorSystem,
    instances: RwLock<HashMap<String, Arc<LocalGroup>>>,
    proxies: RwLock<HashMap<ActorAddr, Arc<GroupProxy>>>,
}

impl LocalGroupModule {
    pub(crate) fn new(system: WeakActorSystem) -> Self {
        Self {
            name: "local".to_string(),
            system,
            instances: RwLock::new(HashMap::new()),
            proxies: RwLock::new(HashMap::new()),
        }
    }
}

impl GroupModule for LocalGroupModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, identifier: &str) -> Result<Group, GroupError> {
        if let Some(group) = self.instances.read().get(identifier) {
            return Ok(Group::new(group.clone()));
        }
        let system = self.system.upgrade().ok_or(GroupError::SystemDown)?;
        let speculative = LocalGroup::new(&system, &self.name, identifier);
        let mut instances = self.instances.write();
        match instances.entry(identifier.to_string()) {
            Entry::Occupied(existing) => {
                speculative.stop();
                Ok(Group::new(existing.get().clone()))
            }
            Entry::Vacant(slot) => {
                info!(module = %self.name, group = identifier, dispatcher = %speculative.dispatcher().addr(), "Group created");
                slot.insert(speculative.clone());
                Ok(Group::new(speculative))
            }
        }
    }

    fn get_proxy(
        &self,
        identifier: &str,
        dispatcher: Option<ActorHandle>,
    ) -> Result<Group, GroupError> {
        let dispatcher = dispatcher.ok_or_else(|| {
            GroupError::InvalidArgument(format!("no dispatcher for group {identifier}"))
        })?;
        let system = self.system.upgrade().ok_or(GroupError::SystemDown)?;
        if dispatcher.node() == system.node() {
            return self.get(identifier);
        }
        if let Some(proxy) = self.proxies.read().get(&dispatcher.addr()) {
            return Ok(Group::new(proxy.clone()));
        }
        let speculative = GroupProxy::new(&system, &self.name, identifier, dispatcher.clone());
        let mut proxies = self.proxies.write();
        match proxies.entry(dispatcher.addr()) {
            Entry::Occupied(existing) => {
                speculative.stop();
                Ok(Group::new(existing.get().clone()))
            }
            Entry::Vacant(slot) => {
                slot.insert(speculative.clone());
                Ok(Group::new(speculative))
            }
        }
    }

    fn forget_proxy(&self, dispatcher: &ActorAddr) {
        if self.proxies.write().remove(dispatcher).is_some() {
            info!(module = %self.name, remote = %dispatcher, "Group proxy evicted");
        }
    }

    fn stop(&self) {
        let instances = std::mem::take(&mut *self.instances.write());
        let proxies = std::mem::take(&mut *self.proxies.write());
        info!(module = %self.name, groups = instances.len(), proxies = proxies.len(), "Stopping group module");
        for group in instances.values() {
            group.stop();
        }
        for proxy in proxies.values() {
            proxy.stop();
        }
    }
}
