//! # Multiplexer
//!
//! The multiplexer is the single owner of the network backend. Every other
//! thread talks to it with [`BackendRequest`] messages carrying a `oneshot`
//! channel for the answer: the same request/response shape an actor client
//! uses, with the backend as the actor's state.
//!
//! It normally runs on its own thread (`troupe.multiplexer`) with a private
//! Tokio runtime. In manual mode nobody runs the loop; instead
//! [`Multiplexer::poll`] serves whatever is queued on the caller's thread.

use crate::framework::ActorAddr;
use crate::middleman::backend::{Endpoint, Listener, NetworkBackend};
use crate::middleman::MiddlemanError;
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

pub(crate) type Response<T> = oneshot::Sender<Result<T, MiddlemanError>>;

#[derive(Debug)]
pub(crate) enum BackendRequest {
    Open {
        port: u16,
        listener: Listener,
        reuse_addr: bool,
        respond_to: Response<u16>,
    },
    Close {
        port: u16,
        respond_to: Response<()>,
    },
    Unpublish {
        actor: ActorAddr,
        port: u16,
        respond_to: Response<Vec<u16>>,
    },
    Connect {
        host: String,
        port: u16,
        respond_to: Response<Endpoint>,
    },
    Shutdown,
}

pub(crate) struct Multiplexer {
    backend: Arc<dyn NetworkBackend>,
    receiver: mpsc::UnboundedReceiver<BackendRequest>,
    max_consecutive_reads: usize,
    heartbeat: Option<Duration>,
    open_ports: BTreeSet<u16>,
    stopped: bool,
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(heartbeat) => {
            heartbeat.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Multiplexer {
    pub(crate) fn new(
        backend: Arc<dyn NetworkBackend>,
        receiver: mpsc::UnboundedReceiver<BackendRequest>,
        max_consecutive_reads: usize,
        heartbeat: Option<Duration>,
    ) -> Self {
        Self {
            backend,
            receiver,
            max_consecutive_reads: max_consecutive_reads.max(1),
            heartbeat,
            open_ports: BTreeSet::new(),
            stopped: false,
        }
    }

    /// Runs until a `Shutdown` request arrives or every sender is gone.
    pub(crate) async fn run(mut self) {
        info!(backend = self.backend.name(), "Multiplexer started");
        let mut heartbeat = self.heartbeat.map(|period| {
            let mut heartbeat = interval(period);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            heartbeat
        });

        loop {
            tokio::select! {
                request = self.receiver.recv() => {
                    let Some(request) = request else { break };
                    if self.serve(request).await.is_break() {
                        break;
                    }
                    if self.drain(self.max_consecutive_reads - 1).await.is_break() {
                        break;
                    }
                }
                _ = tick(&mut heartbeat) => self.on_heartbeat().await,
            }
        }

        self.close_all().await;
        info!(backend = self.backend.name(), "Multiplexer stopped");
    }

    /// Serves up to `max_consecutive_reads` queued requests on the calling
    /// thread. Returns how many were served.
    pub(crate) fn poll(&mut self) -> usize {
        if self.stopped {
            return 0;
        }
        let mut served = 0;
        while served < self.max_consecutive_reads {
            let Ok(request) = self.receiver.try_recv() else {
                break;
            };
            served += 1;
            if futures::executor::block_on(self.serve(request)).is_break() {
                futures::executor::block_on(self.close_all());
                self.stopped = true;
                break;
            }
        }
        served
    }

    async fn drain(&mut self, budget: usize) -> ControlFlow<()> {
        for _ in 0..budget {
            let Ok(request) = self.receiver.try_recv() else {
                break;
            };
            self.serve(request).await?;
        }
        ControlFlow::Continue(())
    }

    async fn serve(&mut self, request: BackendRequest) -> ControlFlow<()> {
        match request {
            BackendRequest::Open {
                port,
                listener,
                reuse_addr,
                respond_to,
            } => {
                let result = self.backend.open(port, listener, reuse_addr).await;
                if let Ok(bound) = result {
                    self.open_ports.insert(bound);
                }
                let _ = respond_to.send(result);
            }
            BackendRequest::Close { port, respond_to } => {
                let result = self.backend.close(port).await;
                self.open_ports.remove(&port);
                let _ = respond_to.send(result);
            }
            BackendRequest::Unpublish {
                actor,
                port,
                respond_to,
            } => {
                let result = self.backend.unpublish(actor, port).await;
                if let Ok(closed) = &result {
                    for port in closed {
                        self.open_ports.remove(port);
                    }
                }
                let _ = respond_to.send(result);
            }
            BackendRequest::Connect {
                host,
                port,
                respond_to,
            } => {
                debug!(%host, port, "Connect");
                let _ = respond_to.send(self.backend.connect(&host, port).await);
            }
            BackendRequest::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    async fn on_heartbeat(&mut self) {
        let ports: Vec<u16> = self.open_ports.iter().copied().collect();
        let pruned = self.backend.prune(&ports).await;
        for port in &pruned {
            self.open_ports.remove(port);
        }
        trace!(open = self.open_ports.len(), pruned = pruned.len(), "Heartbeat");
    }

    async fn close_all(&mut self) {
        for port in std::mem::take(&mut self.open_ports) {
            if let Err(e) = self.backend.close(port).await {
                warn!(port, error = %e, "Failed to close port");
            }
        }
    }
}
