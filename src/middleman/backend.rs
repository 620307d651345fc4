//! Network backends.
//!
//! A backend maps `host:port` endpoints to published actors. The only backend
//! shipped is [`LoopbackBackend`]: an in-process "network" shared by every
//! actor system of the process, which is enough to run several nodes side by
//! side and exercise the distributed control plane without sockets.

use crate::config::MiddlemanConfig;
use crate::framework::{ActorAddr, ActorHandle, NodeId};
use crate::middleman::MiddlemanError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU16, Ordering};
use tracing::{debug, trace};

/// What a node exposes at an open port.
#[derive(Debug, Clone)]
pub struct Listener {
    pub node: NodeId,
    /// `None` for ports opened without a published actor.
    pub actor: Option<ActorHandle>,
    pub interfaces: BTreeSet<String>,
    pub app_identifiers: Vec<String>,
}

/// Result of a successful connect.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub node: NodeId,
    pub actor: Option<ActorHandle>,
    pub interfaces: BTreeSet<String>,
    pub app_identifiers: Vec<String>,
}

#[async_trait]
pub trait NetworkBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Opens `port` (0 picks an ephemeral one) and returns the bound port.
    async fn open(&self, port: u16, listener: Listener, reuse_addr: bool)
        -> Result<u16, MiddlemanError>;

    async fn close(&self, port: u16) -> Result<(), MiddlemanError>;

    /// Closes the ports `actor` is published at; port 0 means all of them.
    async fn unpublish(&self, actor: ActorAddr, port: u16) -> Result<Vec<u16>, MiddlemanError>;

    async fn connect(&self, host: &str, port: u16) -> Result<Endpoint, MiddlemanError>;

    /// Closes those of `ports` whose published actor is down.
    async fn prune(&self, ports: &[u16]) -> Vec<u16>;
}

const EPHEMERAL_START: u16 = 49152;

static NETWORK: Lazy<DashMap<(String, u16), Listener>> = Lazy::new(DashMap::new);
static NEXT_EPHEMERAL: AtomicU16 = AtomicU16::new(EPHEMERAL_START);

fn normalize(host: &str) -> String {
    match host {
        "127.0.0.1" | "::1" | "[::1]" | "" => "localhost".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

fn next_ephemeral() -> u16 {
    let port = NEXT_EPHEMERAL.fetch_add(1, Ordering::Relaxed);
    if port == u16::MAX {
        NEXT_EPHEMERAL.store(EPHEMERAL_START, Ordering::Relaxed);
    }
    port.max(EPHEMERAL_START)
}

/// In-process backend. Each instance binds ports on its configured host.
pub struct LoopbackBackend {
    host: String,
    app_identifiers: Vec<String>,
}

impl LoopbackBackend {
    pub fn new(config: &MiddlemanConfig) -> Self {
        Self {
            host: normalize(&config.host),
            app_identifiers: config.app_identifiers.clone(),
        }
    }

    fn key(&self, port: u16) -> (String, u16) {
        (self.host.clone(), port)
    }
}

#[async_trait]
impl NetworkBackend for LoopbackBackend {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn open(
        &self,
        port: u16,
        listener: Listener,
        reuse_addr: bool,
    ) -> Result<u16, MiddlemanError> {
        if port == 0 {
            for _ in 0..=(u16::MAX - EPHEMERAL_START) {
                let candidate = next_ephemeral();
                if let Entry::Vacant(slot) = NETWORK.entry(self.key(candidate)) {
                    slot.insert(listener);
                    debug!(host = %self.host, port = candidate, "Ephemeral port opened");
                    return Ok(candidate);
                }
            }
            return Err(MiddlemanError::CannotOpenPort(0));
        }
        match NETWORK.entry(self.key(port)) {
            Entry::Occupied(mut slot) if reuse_addr => {
                slot.insert(listener);
            }
            Entry::Occupied(_) => return Err(MiddlemanError::CannotOpenPort(port)),
            Entry::Vacant(slot) => {
                slot.insert(listener);
            }
        }
        debug!(host = %self.host, port, "Port opened");
        Ok(port)
    }

    async fn close(&self, port: u16) -> Result<(), MiddlemanError> {
        NETWORK
            .remove(&self.key(port))
            .map(|_| ())
            .ok_or_else(|| MiddlemanError::InvalidArgument(format!("port {port} is not open")))
    }

    async fn unpublish(&self, actor: ActorAddr, port: u16) -> Result<Vec<u16>, MiddlemanError> {
        let publishes = |listener: &Listener| {
            listener.actor.as_ref().map(ActorHandle::addr) == Some(actor)
        };
        let closed: Vec<u16> = if port == 0 {
            let ports: Vec<u16> = NETWORK
                .iter()
                .filter(|entry| entry.key().0 == self.host && publishes(entry.value()))
                .map(|entry| entry.key().1)
                .collect();
            ports
                .into_iter()
                .filter(|port| NETWORK.remove_if(&self.key(*port), |_, l| publishes(l)).is_some())
                .collect()
        } else {
            NETWORK
                .remove_if(&self.key(port), |_, l| publishes(l))
                .map(|_| vec![port])
                .unwrap_or_default()
        };
        if closed.is_empty() {
            return Err(MiddlemanError::NoActorPublishedAtPort(port));
        }
        Ok(closed)
    }

    async fn connect(&self, host: &str, port: u16) -> Result<Endpoint, MiddlemanError> {
        let listener = NETWORK
            .get(&(normalize(host), port))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MiddlemanError::CannotConnectToNode(format!("{host}:{port}")))?;
        let compatible = listener
            .app_identifiers
            .iter()
            .any(|id| self.app_identifiers.contains(id));
        if !compatible {
            return Err(MiddlemanError::IncompatibleApplicationIds);
        }
        Ok(Endpoint {
            node: listener.node,
            actor: listener.actor.filter(ActorHandle::is_alive),
            interfaces: listener.interfaces,
            app_identifiers: listener.app_identifiers,
        })
    }

    async fn prune(&self, ports: &[u16]) -> Vec<u16> {
        let stale = |listener: &Listener| {
            listener
                .actor
                .as_ref()
                .is_some_and(|actor| !actor.is_alive())
        };
        let pruned: Vec<u16> = ports
            .iter()
            .copied()
            .filter(|port| NETWORK.remove_if(&self.key(*port), |_, l| stale(l)).is_some())
            .collect();
        trace!(host = %self.host, pruned = pruned.len(), "Pruned stale ports");
        pruned
    }
}
