//! # Middleman
//!
//! The distributed control plane of a node: publishing actors at ports,
//! connecting to other nodes, and looking up groups they host.
//!
//! ## Architecture
//!
//! - The [`Middleman`] handle is what user code calls. Every operation is a
//!   request to the multiplexer and returns `Result<_, MiddlemanError>`.
//! - The multiplexer owns the [`NetworkBackend`] and serves requests one at a
//!   time, on its own thread unless `manual_multiplexing` is set.
//! - Remote group lookups run in short-lived worker actors
//!   ([`PendingLookup`](lookup::PendingLookup)) so the two-step
//!   connect/resolve exchange uses ordinary request continuations.
//!
//! ```ignore
//! // node A
//! let port = system_a.middleman()?.publish_local_groups(0, false).await?;
//! // node B
//! let group = system_b.middleman()?.remote_group("news", "localhost", port).await?;
//! group.subscribe(&reader);
//! ```

pub mod backend;
mod error;
mod lookup;
mod multiplexer;
pub mod nameserver;

pub use backend::{Endpoint, Listener, LoopbackBackend, NetworkBackend};
pub use error::MiddlemanError;
pub use nameserver::{GetGroup, GroupInfo};

use crate::config::MiddlemanConfig;
use crate::framework::{ActorAddr, ActorHandle};
use crate::group::Group;
use crate::lifecycle::{ActorSystem, WeakActorSystem};
use crate::supervision::{send_exit, ExitReason};
use lookup::PendingLookup;
use multiplexer::{BackendRequest, Multiplexer, Response};
use nameserver::GroupNameserver;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

struct MiddlemanInner {
    system: WeakActorSystem,
    config: MiddlemanConfig,
    requests: mpsc::UnboundedSender<BackendRequest>,
    /// The multiplexer, when requests are served by `poll_backend`.
    manual: Mutex<Option<Multiplexer>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    /// Helper actors owned by the middleman: nameservers and lookup workers.
    brokers: Mutex<Vec<ActorHandle>>,
    stopped: AtomicBool,
}

/// Handle to a node's middleman. Cheap to clone.
#[derive(Clone)]
pub struct Middleman {
    inner: Arc<MiddlemanInner>,
}

fn build_backend(config: &MiddlemanConfig) -> Result<Arc<dyn NetworkBackend>, MiddlemanError> {
    match config.network_backend.as_str() {
        "loopback" => Ok(Arc::new(LoopbackBackend::new(config))),
        other => Err(MiddlemanError::UnknownBackend(other.to_string())),
    }
}

fn run_multiplexer(multiplexer: Multiplexer, workers: usize) {
    let runtime = if workers == 0 {
        tokio::runtime::Builder::new_current_thread().enable_all().build()
    } else {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .enable_all()
            .build()
    };
    match runtime {
        Ok(runtime) => runtime.block_on(multiplexer.run()),
        Err(e) => error!(error = %e, "Failed to build multiplexer runtime"),
    }
}

impl Middleman {
    /// Builds the configured backend and starts the multiplexer.
    pub fn start(system: &ActorSystem, config: MiddlemanConfig) -> Result<Self, MiddlemanError> {
        let backend = build_backend(&config)?;
        let (requests, receiver) = mpsc::unbounded_channel();
        let multiplexer = Multiplexer::new(
            backend,
            receiver,
            config.max_consecutive_reads,
            config.heartbeat_interval(),
        );

        let (manual, thread) = if config.manual_multiplexing {
            (Some(multiplexer), None)
        } else {
            let workers = config.workers;
            let thread = std::thread::Builder::new()
                .name("troupe.multiplexer".to_string())
                .spawn(move || run_multiplexer(multiplexer, workers))
                .map_err(|e| {
                    error!(error = %e, "Failed to spawn multiplexer thread");
                    MiddlemanError::BackendDown
                })?;
            (None, Some(thread))
        };

        info!(
            node = %system.node(),
            backend = %config.network_backend,
            manual = config.manual_multiplexing,
            "Middleman started"
        );
        Ok(Middleman {
            inner: Arc::new(MiddlemanInner {
                system: system.downgrade(),
                config,
                requests,
                manual: Mutex::new(manual),
                thread: Mutex::new(thread),
                brokers: Mutex::new(Vec::new()),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &MiddlemanConfig {
        &self.inner.config
    }

    fn system(&self) -> Result<ActorSystem, MiddlemanError> {
        self.inner.system.upgrade().ok_or(MiddlemanError::BackendDown)
    }

    /// Serves queued backend requests on the calling thread. Only does work in
    /// manual multiplexing mode. Returns how many requests were served.
    pub fn poll_backend(&self) -> usize {
        self.inner
            .manual
            .lock()
            .as_mut()
            .map_or(0, Multiplexer::poll)
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(Response<T>) -> BackendRequest,
    ) -> Result<T, MiddlemanError> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(MiddlemanError::BackendDown);
        }
        let (respond_to, response) = oneshot::channel();
        self.inner
            .requests
            .send(make(respond_to))
            .map_err(|_| MiddlemanError::BackendDown)?;
        self.poll_backend();
        response.await.map_err(|_| MiddlemanError::BackendDown)?
    }

    /// Opens `port` without publishing an actor. Port 0 picks one.
    pub async fn open(&self, port: u16, reuse_addr: bool) -> Result<u16, MiddlemanError> {
        let system = self.system()?;
        let listener = Listener {
            node: system.node(),
            actor: None,
            interfaces: BTreeSet::new(),
            app_identifiers: self.inner.config.app_identifiers.clone(),
        };
        self.call(|respond_to| BackendRequest::Open {
            port,
            listener,
            reuse_addr,
            respond_to,
        })
        .await
    }

    pub async fn close(&self, port: u16) -> Result<(), MiddlemanError> {
        self.call(|respond_to| BackendRequest::Close { port, respond_to })
            .await
    }

    /// Publishes `actor` at `port` (0 picks an ephemeral port), advertising
    /// `interfaces`. Returns the bound port.
    pub async fn publish(
        &self,
        actor: &ActorHandle,
        port: u16,
        interfaces: &[&str],
        reuse_addr: bool,
    ) -> Result<u16, MiddlemanError> {
        if !actor.is_alive() {
            return Err(MiddlemanError::CannotPublishInvalidActor);
        }
        let listener = Listener {
            node: actor.node(),
            actor: Some(actor.clone()),
            interfaces: interfaces.iter().map(|i| i.to_string()).collect(),
            app_identifiers: self.inner.config.app_identifiers.clone(),
        };
        let bound = self
            .call(|respond_to| BackendRequest::Open {
                port,
                listener,
                reuse_addr,
                respond_to,
            })
            .await?;
        info!(actor = %actor.addr(), port = bound, "Actor published");
        Ok(bound)
    }

    /// Port 0 unpublishes `actor` from every port.
    pub async fn unpublish(&self, actor: &ActorAddr, port: u16) -> Result<(), MiddlemanError> {
        let actor = *actor;
        let closed = self
            .call(|respond_to| BackendRequest::Unpublish {
                actor,
                port,
                respond_to,
            })
            .await?;
        info!(%actor, ports = ?closed, "Actor unpublished");
        Ok(())
    }

    /// Publishes a nameserver that hands out this node's `local` groups.
    pub async fn publish_local_groups(
        &self,
        port: u16,
        reuse_addr: bool,
    ) -> Result<u16, MiddlemanError> {
        let nameserver = self.system()?.spawn_hidden(GroupNameserver);
        match self
            .publish(&nameserver, port, &["GetGroup"], reuse_addr)
            .await
        {
            Ok(bound) => {
                self.inner.brokers.lock().push(nameserver);
                Ok(bound)
            }
            Err(e) => {
                send_exit(&nameserver, ExitReason::UserShutdown);
                Err(e)
            }
        }
    }

    /// Resolves what is published at `host:port`, bounded by the connect timeout.
    pub async fn connect(&self, host: &str, port: u16) -> Result<Endpoint, MiddlemanError> {
        let host = host.to_string();
        let request = self.call(|respond_to| BackendRequest::Connect {
            host,
            port,
            respond_to,
        });
        tokio::time::timeout(self.inner.config.connect_timeout(), request)
            .await
            .map_err(|_| MiddlemanError::Timeout)?
    }

    /// The actor published at `host:port`, provided it advertises at least
    /// `interfaces`.
    pub async fn remote_actor(
        &self,
        interfaces: &[&str],
        host: &str,
        port: u16,
    ) -> Result<ActorHandle, MiddlemanError> {
        let endpoint = self.connect(host, port).await?;
        let actor = endpoint
            .actor
            .ok_or(MiddlemanError::NoActorPublishedAtPort(port))?;
        let expected: BTreeSet<String> = interfaces.iter().map(|i| i.to_string()).collect();
        if !expected.is_subset(&endpoint.interfaces) {
            return Err(MiddlemanError::UnexpectedActorMessagingInterface {
                expected,
                found: endpoint.interfaces,
            });
        }
        Ok(actor)
    }

    /// Looks up group `identifier` on the node at `host:port` and returns a
    /// local proxy for it.
    pub async fn remote_group(
        &self,
        identifier: &str,
        host: &str,
        port: u16,
    ) -> Result<Group, MiddlemanError> {
        let system = self.system()?;
        let timeout = self.inner.config.remote_lookup_timeout();
        let (promise, result) = oneshot::channel();
        let worker = system.spawn_hidden(PendingLookup::new(
            self.clone(),
            identifier.to_string(),
            host.to_string(),
            port,
            timeout,
            promise,
        ));
        self.inner.brokers.lock().push(worker.clone());

        let outcome = tokio::time::timeout(timeout, result).await;
        self.inner.brokers.lock().retain(|broker| broker != &worker);
        match outcome {
            Ok(Ok(group)) => group,
            Ok(Err(_)) => Err(MiddlemanError::CannotConnectToNode(format!("{host}:{port}"))),
            Err(_) => {
                warn!(group = identifier, %host, port, "Remote group lookup timed out");
                send_exit(&worker, ExitReason::UserShutdown);
                Err(MiddlemanError::Timeout)
            }
        }
    }

    /// `identifier@host:port`.
    pub async fn remote_group_uri(&self, uri: &str) -> Result<Group, MiddlemanError> {
        let invalid = || MiddlemanError::InvalidArgument(format!("invalid URI format: {uri}"));
        let (identifier, address) = uri.split_once('@').ok_or_else(invalid)?;
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if identifier.is_empty() || host.is_empty() {
            return Err(invalid());
        }
        self.remote_group(identifier, host, port).await
    }

    /// Stops brokers, closes every published port and joins the multiplexer
    /// thread. Blocks; idempotent.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let brokers = std::mem::take(&mut *self.inner.brokers.lock());
        for broker in &brokers {
            send_exit(broker, ExitReason::UserShutdown);
        }
        if self.inner.requests.send(BackendRequest::Shutdown).is_ok() {
            self.poll_backend();
        }
        let thread = self.inner.thread.lock().take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("Multiplexer thread panicked");
            }
        }
        info!(brokers = brokers.len(), "Middleman stopped");
    }
}

impl std::fmt::Debug for Middleman {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleman")
            .field("backend", &self.inner.config.network_backend)
            .field("stopped", &self.inner.stopped.load(Ordering::Relaxed))
            .finish()
    }
}
