mod common;

use common::{next, Probe, WAIT};
use std::time::Duration;
use troupe::config::MiddlemanConfig;
use troupe::group::GroupDown;
use troupe::middleman::nameserver::GetGroup;
use troupe::middleman::MiddlemanError;
use troupe::{send_exit, Actor, ActorSystem, Behavior, Context, ExitReason, SystemConfig};

#[derive(Debug, Clone)]
struct Echo(u32);

struct Doubler;

impl Actor for Doubler {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        Behavior::new().on(|_: &mut Self, _ctx, Echo(n): Echo| Ok(n * 2))
    }
}

struct QuitsAtOnce;

impl Actor for QuitsAtOnce {
    fn make_behavior(&mut self, ctx: &mut Context<Self>) -> Behavior<Self> {
        ctx.quit(ExitReason::Normal);
        Behavior::new()
    }
}

/// Accepts group lookups but answers far too late.
struct Mute;

impl Actor for Mute {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        Behavior::new().on(|_: &mut Self, _ctx, _: GetGroup| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
    }
}

fn config_with(middleman: MiddlemanConfig) -> SystemConfig {
    SystemConfig {
        middleman,
        ..SystemConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn published_actor_is_reachable_from_another_node() {
    let server = ActorSystem::new(SystemConfig::default());
    let client = ActorSystem::new(SystemConfig::default());
    let doubler = server.spawn(Doubler);

    let port = server
        .middleman()
        .unwrap()
        .publish(&doubler, 0, &["Echo"], false)
        .await
        .unwrap();

    let remote = client
        .middleman()
        .unwrap()
        .remote_actor(&["Echo"], "127.0.0.1", port)
        .await
        .unwrap();
    assert_eq!(remote.addr(), doubler.addr());
    let reply: u32 = remote.ask(Echo(21), WAIT).await.unwrap();
    assert_eq!(reply, 42);

    let mismatch = client
        .middleman()
        .unwrap()
        .remote_actor(&["Echo", "Shout"], "localhost", port)
        .await
        .unwrap_err();
    assert!(matches!(
        mismatch,
        MiddlemanError::UnexpectedActorMessagingInterface { .. }
    ));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unpublish_closes_every_port_of_the_actor() {
    let system = ActorSystem::new(SystemConfig::default());
    let middleman = system.middleman().unwrap();
    let doubler = system.spawn(Doubler);

    let first = middleman.publish(&doubler, 0, &[], false).await.unwrap();
    let second = middleman.publish(&doubler, 0, &[], false).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(
        middleman.publish(&doubler, first, &[], false).await,
        Err(MiddlemanError::CannotOpenPort(first))
    );

    middleman.unpublish(&doubler.addr(), 0).await.unwrap();
    for port in [first, second] {
        assert!(matches!(
            middleman.connect("localhost", port).await,
            Err(MiddlemanError::CannotConnectToNode(_))
        ));
    }
    assert_eq!(
        middleman.unpublish(&doubler.addr(), 0).await,
        Err(MiddlemanError::NoActorPublishedAtPort(0))
    );

    system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dead_actors_cannot_be_published() {
    let system = ActorSystem::new(SystemConfig::default());
    let gone = system.spawn(QuitsAtOnce);
    while gone.is_alive() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let result = system.middleman().unwrap().publish(&gone, 0, &[], false).await;
    assert_eq!(result, Err(MiddlemanError::CannotPublishInvalidActor));
    system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn foreign_application_ids_are_rejected() {
    let server = ActorSystem::new(SystemConfig::default());
    let stranger = ActorSystem::new(config_with(MiddlemanConfig {
        app_identifiers: vec!["someone-else".into()],
        ..MiddlemanConfig::default()
    }));
    let doubler = server.spawn(Doubler);
    let port = server
        .middleman()
        .unwrap()
        .publish(&doubler, 0, &["Echo"], false)
        .await
        .unwrap();

    let result = stranger
        .middleman()
        .unwrap()
        .remote_actor(&["Echo"], "localhost", port)
        .await;
    assert_eq!(result.unwrap_err(), MiddlemanError::IncompatibleApplicationIds);

    stranger.shutdown().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_group_bridges_both_directions() {
    let home = ActorSystem::new(SystemConfig::default());
    let away = ActorSystem::new(SystemConfig::default());
    let port = home
        .middleman()
        .unwrap()
        .publish_local_groups(0, false)
        .await
        .unwrap();

    let proxy = away
        .middleman()
        .unwrap()
        .remote_group("news", "localhost", port)
        .await
        .unwrap();
    assert_eq!(proxy.to_string(), "local:news");
    let again = away
        .middleman()
        .unwrap()
        .remote_group_uri(&format!("news@localhost:{port}"))
        .await
        .unwrap();
    assert_eq!(proxy, again);

    let news = home.groups().get("local", "news").unwrap();
    let (local, mut local_rx) = Probe::new();
    let local = home.spawn(local);
    news.subscribe(&local);
    let (remote, mut remote_rx) = Probe::new();
    let remote = away.spawn(remote);
    assert!(proxy.subscribe(&remote));
    tokio::time::sleep(Duration::from_millis(50)).await;

    news.send("from home".to_string());
    assert_eq!(next::<String>(&mut local_rx).await, "from home");
    assert_eq!(next::<String>(&mut remote_rx).await, "from home");

    proxy.send("from away".to_string());
    assert_eq!(next::<String>(&mut local_rx).await, "from away");
    assert_eq!(next::<String>(&mut remote_rx).await, "from away");

    home.shutdown().await;
    let down = next::<GroupDown>(&mut remote_rx).await;
    assert_eq!(down.group, proxy);

    away.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_group_lookup_times_out() {
    let quick = || {
        config_with(MiddlemanConfig {
            remote_lookup_timeout_ms: 50,
            ..MiddlemanConfig::default()
        })
    };
    let home = ActorSystem::new(quick());
    let away = ActorSystem::new(quick());
    let mute = home.spawn(Mute);
    let port = home
        .middleman()
        .unwrap()
        .publish(&mute, 0, &["GetGroup"], false)
        .await
        .unwrap();

    let middleman = away.middleman().unwrap();
    let lookup = middleman.remote_group("news", "localhost", port);
    let result = tokio::time::timeout(WAIT, lookup).await.unwrap();
    assert_eq!(result.unwrap_err(), MiddlemanError::Timeout);

    away.shutdown().await;
    home.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeat_closes_ports_of_dead_actors() {
    let system = ActorSystem::new(config_with(MiddlemanConfig {
        heartbeat_interval_ms: 20,
        ..MiddlemanConfig::default()
    }));
    let middleman = system.middleman().unwrap();
    let doubler = system.spawn(Doubler);
    let port = middleman.publish(&doubler, 0, &["Echo"], false).await.unwrap();
    assert!(middleman.connect("localhost", port).await.is_ok());

    send_exit(&doubler, ExitReason::Kill);
    while doubler.is_alive() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(
        middleman.connect("localhost", port).await,
        Err(MiddlemanError::CannotConnectToNode(_))
    ));
    system.shutdown().await;
}

#[tokio::test]
async fn malformed_group_uri_is_rejected() {
    let system = ActorSystem::new(SystemConfig::default());
    let middleman = system.middleman().unwrap();
    for uri in ["news", "news@localhost", "news@localhost:http", "@localhost:80"] {
        assert!(matches!(
            middleman.remote_group_uri(uri).await,
            Err(MiddlemanError::InvalidArgument(_))
        ));
    }
    system.shutdown().await;
}

#[tokio::test]
async fn manual_multiplexing_serves_on_the_caller() {
    let system = ActorSystem::new(config_with(MiddlemanConfig {
        manual_multiplexing: true,
        ..MiddlemanConfig::default()
    }));
    let middleman = system.middleman().unwrap();

    let port = middleman.open(0, false).await.unwrap();
    assert_eq!(middleman.poll_backend(), 0);
    let endpoint = middleman.connect("localhost", port).await.unwrap();
    assert_eq!(endpoint.node, system.node());
    assert!(endpoint.actor.is_none());
    middleman.close(port).await.unwrap();

    system.shutdown().await;
}

#[tokio::test]
async fn stopped_middleman_reports_backend_down() {
    let system = ActorSystem::new(SystemConfig::default());
    let middleman = system.middleman().unwrap();
    let stopper = middleman.clone();
    tokio::task::spawn_blocking(move || {
        stopper.stop();
        stopper.stop();
    })
    .await
    .unwrap();

    assert_eq!(
        middleman.open(0, false).await,
        Err(MiddlemanError::BackendDown)
    );
    system.shutdown().await;
}

#[tokio::test]
async fn unknown_backend_is_an_error() {
    let system = ActorSystem::new(config_with(MiddlemanConfig {
        network_backend: "carrier-pigeon".into(),
        ..MiddlemanConfig::default()
    }));
    assert_eq!(
        system.middleman().unwrap_err(),
        MiddlemanError::UnknownBackend("carrier-pigeon".into())
    );
    system.shutdown().await;
}
