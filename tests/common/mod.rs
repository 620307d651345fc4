//! Shared test helpers.

#![allow(dead_code)]

use std::time::Duration;
use tokio::sync::mpsc;
use troupe::framework::Payload;
use troupe::{Actor, ActorHandle, Behavior, Context, DownMsg, ExitMsg, FaultPolicy, Message};

pub const WAIT: Duration = Duration::from_secs(2);

/// Forwards every message it receives, including down and exit signals, to a
/// channel the test reads from.
pub struct Probe {
    tx: mpsc::UnboundedSender<Message>,
    trap_exit: bool,
    monitor: Option<ActorHandle>,
    link: Option<ActorHandle>,
}

impl Probe {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let probe = Probe {
            tx,
            trap_exit: false,
            monitor: None,
            link: None,
        };
        (probe, rx)
    }

    /// A probe that survives exit signals from links.
    pub fn trapping() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (mut probe, rx) = Self::new();
        probe.trap_exit = true;
        (probe, rx)
    }

    /// Monitors `target` as soon as the probe starts.
    pub fn monitoring(mut self, target: &ActorHandle) -> Self {
        self.monitor = Some(target.clone());
        self
    }

    /// Links to `target` as soon as the probe starts.
    pub fn linked_to(mut self, target: &ActorHandle) -> Self {
        self.link = Some(target.clone());
        self
    }
}

impl Actor for Probe {
    fn make_behavior(&mut self, ctx: &mut Context<Self>) -> Behavior<Self> {
        ctx.set_down_handler(|probe: &mut Self, _ctx, down: DownMsg| {
            let _ = probe.tx.send(Message::new(down));
        });
        if self.trap_exit {
            ctx.set_exit_handler(|probe: &mut Self, _ctx, exit: ExitMsg| {
                let _ = probe.tx.send(Message::new(exit));
                FaultPolicy::Resume
            });
        }
        if let Some(target) = self.monitor.take() {
            ctx.monitor(&target);
        }
        if let Some(target) = self.link.take() {
            ctx.link(&target);
        }
        Behavior::new().or_else(|probe: &mut Self, _ctx, msg: &Message| {
            let _ = probe.tx.send(msg.clone());
            Ok(None)
        })
    }
}

/// Next message of type `T`, failing the test after [`WAIT`].
pub async fn next<T: Payload>(rx: &mut mpsc::UnboundedReceiver<Message>) -> T {
    let msg = tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("probe stopped");
    msg.take::<T>()
        .unwrap_or_else(|other| panic!("expected {}, got {other:?}", std::any::type_name::<T>()))
}

/// Asserts nothing arrives within a short quiet period.
pub async fn quiet(rx: &mut mpsc::UnboundedReceiver<Message>) {
    let idle = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(idle.is_err(), "unexpected message: {:?}", idle.ok().flatten());
}
