use crate::config::SystemConfig;
use crate::framework::{Actor, ActorAddr, ActorHandle, ActorRunner, Context, NodeId, WeakActorHandle};
use crate::group::GroupManager;
use crate::middleman::{Middleman, MiddlemanError};
use crate::supervision::{send_exit, ExitReason};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Live actors, split into user actors and runtime-internal ones (group
/// dispatchers, brokers).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Census {
    total: usize,
    user: usize,
}

#[derive(Debug)]
struct Entry {
    handle: WeakActorHandle,
    hidden: bool,
}

struct SystemInner {
    node: NodeId,
    config: SystemConfig,
    runtime: Handle,
    actors: DashMap<ActorAddr, Entry>,
    census: watch::Sender<Census>,
    groups: GroupManager,
    middleman: Mutex<Option<Middleman>>,
}

/// The runtime orchestrator: one node.
///
/// `ActorSystem` is responsible for:
/// - **Spawning**: every actor runs in its own Tokio task on the runtime the
///   system was created on
/// - **Bookkeeping**: a table of live actors, used for lookups and shutdown
/// - **Groups**: the [`GroupManager`] with the `local` module
/// - **Distribution**: the lazily started [`Middleman`]
///
/// # Example
///
/// ```ignore
/// let system = ActorSystem::new(SystemConfig::default());
/// let adder = system.spawn(Adder::default());
/// adder.send(Add(7));
/// let total: i64 = adder.ask(GetTotal, Duration::from_secs(1)).await?;
/// system.shutdown().await;
/// ```
///
/// Group dispatchers keep the system alive; call [`ActorSystem::shutdown`]
/// when done.
#[derive(Clone)]
pub struct ActorSystem {
    inner: Arc<SystemInner>,
}

/// Non-owning reference held by the group modules and the middleman.
#[derive(Clone)]
pub(crate) struct WeakActorSystem(Weak<SystemInner>);

impl WeakActorSystem {
    pub(crate) fn upgrade(&self) -> Option<ActorSystem> {
        self.0.upgrade().map(|inner| ActorSystem { inner })
    }
}

impl ActorSystem {
    /// Creates a node on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, like `tokio::spawn`.
    pub fn new(config: SystemConfig) -> Self {
        let node = NodeId::random();
        let (census, _) = watch::channel(Census::default());
        let inner = Arc::new_cyclic(|weak| SystemInner {
            node,
            config,
            runtime: Handle::current(),
            actors: DashMap::new(),
            census,
            groups: GroupManager::new(WeakActorSystem(weak.clone())),
            middleman: Mutex::new(None),
        });
        info!(%node, "Actor system started");
        ActorSystem { inner }
    }

    pub fn node(&self) -> NodeId {
        self.inner.node
    }

    pub fn config(&self) -> &SystemConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> WeakActorSystem {
        WeakActorSystem(Arc::downgrade(&self.inner))
    }

    /// Spawns `actor` in its own task and returns the owning handle.
    pub fn spawn<A: Actor>(&self, actor: A) -> ActorHandle {
        self.spawn_inner(actor, false)
    }

    /// Spawns a runtime-internal actor. It is excluded from
    /// [`ActorSystem::await_all_actors_done`] but still stopped on shutdown.
    pub(crate) fn spawn_hidden<A: Actor>(&self, actor: A) -> ActorHandle {
        self.spawn_inner(actor, true)
    }

    fn spawn_inner<A: Actor>(&self, actor: A, hidden: bool) -> ActorHandle {
        let (handle, mailbox, cell) = ActorHandle::allocate(self.inner.node, actor.name());
        let ctx = Context::new(handle.downgrade(), cell, self.clone());
        self.inner.actors.insert(
            handle.addr(),
            Entry {
                handle: handle.downgrade(),
                hidden,
            },
        );
        self.inner.census.send_modify(|census| {
            census.total += 1;
            if !hidden {
                census.user += 1;
            }
        });
        debug!(actor = %handle, hidden, "Spawn");
        self.inner
            .runtime
            .spawn(ActorRunner::new(actor, ctx, mailbox).run());
        handle
    }

    pub(crate) fn deregister(&self, addr: &ActorAddr) {
        if let Some((_, entry)) = self.inner.actors.remove(addr) {
            self.inner.census.send_modify(|census| {
                census.total -= 1;
                if !entry.hidden {
                    census.user -= 1;
                }
            });
        }
    }

    /// A strong handle to a live actor of this node, if anyone still owns one.
    pub fn find(&self, addr: &ActorAddr) -> Option<ActorHandle> {
        self.inner.actors.get(addr)?.handle.upgrade()
    }

    /// Number of running user actors.
    pub fn live_actors(&self) -> usize {
        self.inner.census.borrow().user
    }

    /// Waits until every user actor has terminated.
    pub async fn await_all_actors_done(&self) {
        let mut census = self.inner.census.subscribe();
        let _ = census.wait_for(|census| census.user == 0).await;
    }

    pub fn groups(&self) -> &GroupManager {
        &self.inner.groups
    }

    /// The node's middleman, started on first use.
    pub fn middleman(&self) -> Result<Middleman, MiddlemanError> {
        let mut slot = self.inner.middleman.lock();
        if let Some(middleman) = slot.as_ref() {
            return Ok(middleman.clone());
        }
        let middleman = Middleman::start(self, self.inner.config.middleman.clone())?;
        *slot = Some(middleman.clone());
        Ok(middleman)
    }

    /// Gracefully shuts down the node.
    ///
    /// 1. Stops the middleman (brokers, published ports, multiplexer thread)
    /// 2. Stops every group module, which terminates the dispatchers
    /// 3. Sends `UserShutdown` to every remaining actor
    /// 4. Kills whatever is still alive after the grace period
    pub async fn shutdown(self) {
        info!(node = %self.inner.node, "Shutting down actor system...");

        let middleman = self.inner.middleman.lock().take();
        if let Some(middleman) = middleman {
            if let Err(e) = tokio::task::spawn_blocking(move || middleman.stop()).await {
                error!(error = %e, "Middleman shutdown failed");
            }
        }

        self.inner.groups.stop();

        let targets: Vec<ActorHandle> = self
            .inner
            .actors
            .iter()
            .filter_map(|entry| entry.handle.upgrade())
            .collect();
        for target in &targets {
            send_exit(target, ExitReason::UserShutdown);
        }

        let grace = self.inner.config.scheduler.shutdown_grace();
        let mut census = self.inner.census.subscribe();
        let drained = tokio::time::timeout(grace, census.wait_for(|census| census.total == 0))
            .await
            .is_ok();
        if !drained {
            let stragglers: Vec<ActorHandle> = self
                .inner
                .actors
                .iter()
                .filter_map(|entry| entry.handle.upgrade())
                .collect();
            warn!(count = stragglers.len(), "Killing actors still alive after grace period");
            for target in &stragglers {
                send_exit(target, ExitReason::Kill);
            }
        }
        drop(targets);

        info!(node = %self.inner.node, "Actor system shutdown complete.");
    }
}

impl std::fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorSystem")
            .field("node", &self.inner.node)
            .field("actors", &self.inner.actors.len())
            .finish()
    }
}
