use crate::framework::{ActorAddr, ActorHandle};
use crate::group::{Group, GroupError, GroupModule, LocalGroupModule};
use crate::lifecycle::WeakActorSystem;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Registry of group modules. Always contains the `local` module.
pub struct GroupManager {
    modules: RwLock<HashMap<String, Arc<dyn GroupModule>>>,
    next_anonymous: AtomicU64,
}

impl GroupManager {
    pub(crate) fn new(system: WeakActorSystem) -> Self {
        let local: Arc<dyn GroupModule> = Arc::new(LocalGroupModule::new(system));
        let mut modules = HashMap::new();
        modules.insert(local.name().to_string(), local);
        Self {
            modules: RwLock::new(modules),
            next_anonymous: AtomicU64::new(1),
        }
    }

    fn module(&self, name: &str) -> Result<Arc<dyn GroupModule>, GroupError> {
        self.modules
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| GroupError::NoSuchGroupModule(name.to_string()))
    }

    pub fn get(&self, module: &str, identifier: &str) -> Result<Group, GroupError> {
        self.module(module)?.get(identifier)
    }

    pub fn get_proxy(
        &self,
        module: &str,
        identifier: &str,
        dispatcher: Option<ActorHandle>,
    ) -> Result<Group, GroupError> {
        self.module(module)?.get_proxy(identifier, dispatcher)
    }

    pub(crate) fn forget_proxy(&self, module: &str, dispatcher: &ActorAddr) {
        if let Ok(module) = self.module(module) {
            module.forget_proxy(dispatcher);
        }
    }

    /// Resolves `module:identifier`. Only the first `:` separates.
    pub fn get_uri(&self, uri: &str) -> Result<Group, GroupError> {
        let (module, identifier) = uri
            .split_once(':')
            .ok_or_else(|| GroupError::InvalidArgument(format!("malformed group URI: {uri}")))?;
        self.get(module, identifier)
    }

    /// A fresh local group named `__#N`.
    pub fn anonymous(&self) -> Result<Group, GroupError> {
        let n = self.next_anonymous.fetch_add(1, Ordering::Relaxed);
        self.get("local", &format!("__#{n}"))
    }

    /// Adds `module` unless one with the same name exists.
    pub fn add_module(&self, module: Arc<dyn GroupModule>) -> bool {
        let mut modules = self.modules.write();
        if modules.contains_key(module.name()) {
            return false;
        }
        info!(module = module.name(), "Group module added");
        modules.insert(module.name().to_string(), module);
        true
    }

    pub fn stop(&self) {
        let modules: Vec<Arc<dyn GroupModule>> = self.modules.read().values().cloned().collect();
        for module in modules {
            module.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SystemConfig;
    use crate::group::GroupError;
    use crate::lifecycle::ActorSystem;

    #[tokio::test]
    async fn groups_are_singletons_per_identifier() {
        let system = ActorSystem::new(SystemConfig::default());
        let a = system.groups().get("local", "g1").unwrap();
        let b = system.groups().get_uri("local:g1").unwrap();
        let c = system.groups().get("local", "g2").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "local:g1");
        system.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_module_and_malformed_uri() {
        let system = ActorSystem::new(SystemConfig::default());
        let err = system.groups().get("remote", "g1").unwrap_err();
        assert_eq!(err.to_string(), "no module named \"remote\" found");
        assert!(matches!(
            system.groups().get_uri("nocolon"),
            Err(GroupError::InvalidArgument(_))
        ));
        system.shutdown().await;
    }

    #[tokio::test]
    async fn anonymous_groups_are_distinct() {
        let system = ActorSystem::new(SystemConfig::default());
        let a = system.groups().anonymous().unwrap();
        let b = system.groups().anonymous().unwrap();
        assert_ne!(a, b);
        assert!(a.identifier().starts_with("__#"));
        system.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn proxy_is_evicted_once_remote_dispatcher_is_down() {
        let home = ActorSystem::new(SystemConfig::default());
        let away = ActorSystem::new(SystemConfig::default());
        let dispatcher = home.groups().get("local", "g1").unwrap().dispatcher().clone();
        let proxy = away
            .groups()
            .get_proxy("local", "g1", Some(dispatcher.clone()))
            .unwrap();
        let cached = away
            .groups()
            .get_proxy("local", "g1", Some(dispatcher.clone()))
            .unwrap();
        assert_eq!(proxy, cached);

        home.shutdown().await;
        let mut evicted = false;
        for _ in 0..200 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let current = away
                .groups()
                .get_proxy("local", "g1", Some(dispatcher.clone()))
                .unwrap();
            if current != proxy {
                evicted = true;
                break;
            }
        }
        assert!(evicted);
        away.shutdown().await;
    }

    #[tokio::test]
    async fn proxy_without_dispatcher_is_invalid() {
        let system = ActorSystem::new(SystemConfig::default());
        assert!(matches!(
            system.groups().get_proxy("local", "g1", None),
            Err(GroupError::InvalidArgument(_))
        ));
        system.shutdown().await;
    }
}
