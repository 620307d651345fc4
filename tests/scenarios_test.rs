mod common;

use common::{next, quiet, Probe, WAIT};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use troupe::middleman::MiddlemanError;
use troupe::supervision::RestartPolicy;
use troupe::{
    send_exit, Actor, ActorHandle, ActorSystem, Behavior, Context, DownMsg, ExitReason,
    Supervisor, SystemConfig,
};

#[derive(Debug, Clone)]
struct Add(i64);

#[derive(Debug, Clone)]
struct Get;

#[derive(Default)]
struct Adder(i64);

impl Actor for Adder {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        Behavior::new()
            .on(|adder: &mut Self, _ctx, Add(x): Add| {
                adder.0 += x;
                Ok(())
            })
            .on(|adder: &mut Self, _ctx, _: Get| Ok(adder.0))
    }
}

#[tokio::test]
async fn adder_sums_messages_in_order() {
    let system = ActorSystem::new(SystemConfig::default());
    let adder = system.spawn(Adder::default());
    adder.send(Add(7));
    adder.send(Add(4));
    adder.send(Add(9));

    let total: i64 = adder.ask(Get, WAIT).await.unwrap();
    assert_eq!(total, 20);
    system.shutdown().await;
}

#[tokio::test]
async fn group_broadcast_reaches_current_subscribers_once() {
    let system = ActorSystem::new(SystemConfig::default());
    let group = system.groups().get("local", "g1").unwrap();
    let (probe_x, mut rx_x) = Probe::new();
    let (probe_y, mut rx_y) = Probe::new();
    let x = system.spawn(probe_x);
    let y = system.spawn(probe_y);

    assert!(group.subscribe(&x));
    assert!(group.subscribe(&y));
    assert!(!group.subscribe(&y));

    group.send("hi".to_string());
    assert_eq!(next::<String>(&mut rx_x).await, "hi");
    assert_eq!(next::<String>(&mut rx_y).await, "hi");
    quiet(&mut rx_x).await;
    quiet(&mut rx_y).await;

    group.unsubscribe(&x.addr());
    group.unsubscribe(&x.addr());
    group.send("hi".to_string());
    assert_eq!(next::<String>(&mut rx_y).await, "hi");
    quiet(&mut rx_x).await;
    assert_eq!(group.subscriber_count(), 1);

    system.shutdown().await;
}

#[derive(Debug, Clone)]
struct GetChild;

struct Idle;

impl Actor for Idle {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        Behavior::new()
    }
}

/// Supervises one child and reports each down message with the size of the
/// supervised set after handling it.
struct Boss {
    children: Supervisor,
    report: mpsc::UnboundedSender<(DownMsg, bool, usize)>,
}

impl Actor for Boss {
    fn make_behavior(&mut self, ctx: &mut Context<Self>) -> Behavior<Self> {
        self.children.spawn_child(ctx, Idle, RestartPolicy::Temporary);
        ctx.set_down_handler(|boss: &mut Self, _ctx, down| {
            let removed = boss.children.on_down(&down).is_some();
            let _ = boss.report.send((down, removed, boss.children.len()));
        });
        Behavior::new().on(|boss: &mut Self, _ctx, _: GetChild| {
            Ok(boss.children.children().next().cloned())
        })
    }
}

#[tokio::test]
async fn supervisor_observes_child_shutdown() {
    let system = ActorSystem::new(SystemConfig::default());
    let (report, mut reports) = mpsc::unbounded_channel();
    let boss = system.spawn(Boss {
        children: Supervisor::new(),
        report,
    });

    let child: Option<ActorHandle> = boss.ask(GetChild, WAIT).await.unwrap();
    let child = child.unwrap();
    assert!(send_exit(&child, ExitReason::UserShutdown));

    let (down, removed, remaining) = tokio::time::timeout(WAIT, reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(down.source, child.addr());
    assert_eq!(down.reason, ExitReason::UserShutdown);
    assert!(removed);
    assert_eq!(remaining, 0);

    let child: Option<ActorHandle> = boss.ask(GetChild, WAIT).await.unwrap();
    assert!(child.is_none());
    system.shutdown().await;
}

#[tokio::test]
async fn remote_group_on_unreachable_host_fails_fast() {
    let system = ActorSystem::new(SystemConfig::default());
    let started = Instant::now();
    let middleman = system.middleman().unwrap();
    let lookup = middleman.remote_group("g1", "unreachable.invalid", 4242);
    let result = tokio::time::timeout(Duration::from_secs(10), lookup)
        .await
        .expect("lookup hung");

    assert!(matches!(result, Err(MiddlemanError::CannotConnectToNode(_))));
    assert!(started.elapsed() < Duration::from_secs(10));
    system.shutdown().await;
}
