//! # Troupe demo
//!
//! Walks through the main features on two nodes of the same process:
//!
//! 1. An adder actor queried with `ask`.
//! 2. A supervisor restarting a child that was shut down.
//! 3. A local group broadcast.
//! 4. The same group looked up from a second node through the middleman.
//!
//! Configuration comes from `troupe.toml` (if present) and `TROUPE__*`
//! variables; logging from `RUST_LOG`.

use std::path::Path;
use std::time::Duration;
use tracing::{error, info, Instrument};
use troupe::lifecycle::{build_runtime, setup_tracing};
use troupe::supervision::RestartPolicy;
use troupe::{
    send_exit, Actor, ActorHandle, ActorSystem, Behavior, Context, ExitReason, Supervisor,
    SystemConfig,
};

const TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct Add(i64);

#[derive(Debug, Clone)]
struct GetTotal;

#[derive(Default)]
struct Adder {
    total: i64,
}

impl Actor for Adder {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        Behavior::new()
            .on(|adder: &mut Self, _ctx, Add(x): Add| {
                adder.total += x;
                Ok(())
            })
            .on(|adder: &mut Self, _ctx, _: GetTotal| Ok(adder.total))
    }
}

#[derive(Debug, Clone)]
struct Ping;

struct Worker;

impl Actor for Worker {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        Behavior::new().on(|_: &mut Self, ctx, _: Ping| Ok(ctx.addr().to_string()))
    }
}

#[derive(Debug, Clone)]
struct GetWorker;

/// Keeps one [`Worker`] alive, restarting it after abnormal exits.
struct Overseer {
    children: Supervisor,
    restarts: usize,
}

impl Actor for Overseer {
    fn make_behavior(&mut self, ctx: &mut Context<Self>) -> Behavior<Self> {
        self.children.spawn_child(ctx, Worker, RestartPolicy::Transient);
        ctx.set_down_handler(|overseer: &mut Self, ctx, down| {
            let Some(child) = overseer.children.on_down(&down) else {
                return;
            };
            if child.policy.should_restart(&down.reason) {
                overseer.restarts += 1;
                overseer.children.spawn_child(ctx, Worker, child.policy);
            }
        });
        Behavior::new().on(|overseer: &mut Self, _ctx, _: GetWorker| {
            Ok(overseer.children.children().next().cloned())
        })
    }

    fn on_exit(&mut self, _ctx: &mut Context<Self>, reason: &ExitReason) {
        info!(restarts = self.restarts, %reason, "Overseer stopping");
        self.children.shutdown_children(ExitReason::UserShutdown);
    }
}

/// Logs every string it receives.
struct Reader {
    label: &'static str,
}

impl Actor for Reader {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        Behavior::new().on(|reader: &mut Self, _ctx, line: String| {
            info!(reader = reader.label, %line, "Received");
            Ok(())
        })
    }
}

async fn adder_demo(system: &ActorSystem) -> Result<(), String> {
    let adder = system.spawn(Adder::default());
    for x in [7, 4, 9] {
        adder.send(Add(x));
    }
    let total: i64 = adder.ask(GetTotal, TIMEOUT).await.map_err(|e| e.to_string())?;
    info!(total, "Adder answered");
    Ok(())
}

async fn supervision_demo(system: &ActorSystem) -> Result<(), String> {
    let overseer = system.spawn(Overseer {
        children: Supervisor::new(),
        restarts: 0,
    });
    let worker: Option<ActorHandle> = overseer
        .ask(GetWorker, TIMEOUT)
        .await
        .map_err(|e| e.to_string())?;
    let worker = worker.ok_or("overseer has no worker")?;
    info!(worker = %worker, "Shutting worker down");
    send_exit(&worker, ExitReason::UserShutdown);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let replacement: Option<ActorHandle> = overseer
        .ask(GetWorker, TIMEOUT)
        .await
        .map_err(|e| e.to_string())?;
    if let Some(replacement) = replacement {
        let reply: String = replacement.ask(Ping, TIMEOUT).await.map_err(|e| e.to_string())?;
        info!(replacement = %reply, "Worker restarted");
    }
    Ok(())
}

async fn group_demo(system: &ActorSystem) -> Result<(), String> {
    let group = system
        .groups()
        .get("local", "g1")
        .map_err(|e| e.to_string())?;
    let x = system.spawn(Reader { label: "x" });
    let y = system.spawn(Reader { label: "y" });
    group.subscribe(&x);
    group.subscribe(&y);
    group.send("hi".to_string());

    group.unsubscribe(&x.addr());
    group.send("only y".to_string());
    info!(group = %group, subscribers = group.subscriber_count(), "Broadcast done");
    Ok(())
}

async fn remote_demo(home: &ActorSystem, config: &SystemConfig) -> Result<(), String> {
    let port = home
        .middleman()
        .map_err(|e| e.to_string())?
        .publish_local_groups(0, false)
        .await
        .map_err(|e| e.to_string())?;

    let away = ActorSystem::new(config.clone());
    let proxy = away
        .middleman()
        .map_err(|e| e.to_string())?
        .remote_group("news", "localhost", port)
        .await
        .map_err(|e| e.to_string())?;
    let reader = away.spawn(Reader { label: "remote" });
    proxy.subscribe(&reader);

    tokio::time::sleep(Duration::from_millis(50)).await;
    home.groups()
        .get("local", "news")
        .map_err(|e| e.to_string())?
        .send(format!("published on {}", home.node()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    away.shutdown().await;
    Ok(())
}

fn main() -> Result<(), String> {
    setup_tracing();

    let config = SystemConfig::load(Some(Path::new("troupe.toml")).filter(|p| p.exists()))
        .map_err(|e| e.to_string())?;
    let runtime = build_runtime(&config.scheduler).map_err(|e| e.to_string())?;

    runtime.block_on(async move {
        info!("Starting troupe demo");
        let system = ActorSystem::new(config.clone());

        let outcome = async {
            adder_demo(&system).await?;
            supervision_demo(&system).await?;
            group_demo(&system).await?;
            remote_demo(&system, &config).await
        }
        .instrument(tracing::info_span!("demo"))
        .await;

        if let Err(e) = &outcome {
            error!(error = %e, "Demo failed");
        }
        system.shutdown().await;
        info!("Demo completed");
        outcome
    })
}
