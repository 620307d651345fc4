mod common;

use common::WAIT;
use proptest::prelude::*;
use std::time::Duration;
use tokio::sync::mpsc;
use troupe::framework::Priority;
use troupe::{
    Actor, ActorError, ActorHandle, ActorSystem, Behavior, Context, Handled, SystemConfig,
};

#[derive(Debug, Clone)]
struct Tagged {
    sender: u8,
    seq: u32,
}

#[derive(Debug, Clone)]
struct Block(u64);

#[derive(Debug, Clone)]
struct GetLog;

/// Records every `Tagged` message in arrival order.
#[derive(Default)]
struct Recorder {
    log: Vec<(u8, u32)>,
}

impl Actor for Recorder {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        Behavior::new()
            .on(|recorder: &mut Self, _ctx, t: Tagged| {
                recorder.log.push((t.sender, t.seq));
                Ok(())
            })
            .on(|_: &mut Self, _ctx, Block(ms): Block| {
                std::thread::sleep(Duration::from_millis(ms));
                Ok(())
            })
            .on(|recorder: &mut Self, _ctx, _: GetLog| Ok(recorder.log.clone()))
    }
}

fn ordered_per_sender(log: &[(u8, u32)], sender: u8, count: u32) -> bool {
    let seen: Vec<u32> = log
        .iter()
        .filter(|(s, _)| *s == sender)
        .map(|(_, seq)| *seq)
        .collect();
    seen == (0..count).collect::<Vec<_>>()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn per_sender_order_survives_interleaving(
        counts in prop::collection::vec(1u32..40, 2..5),
        yields in prop::collection::vec(any::<bool>(), 0..40),
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(3)
            .enable_all()
            .build()
            .unwrap();
        let log = runtime.block_on(async {
            let system = ActorSystem::new(SystemConfig::default());
            let recorder = system.spawn(Recorder::default());

            let senders: Vec<_> = counts
                .iter()
                .enumerate()
                .map(|(sender, &count)| {
                    let recorder = recorder.clone();
                    let yields = yields.clone();
                    tokio::spawn(async move {
                        for seq in 0..count {
                            recorder.send(Tagged { sender: sender as u8, seq });
                            if yields.get(seq as usize).copied().unwrap_or(false) {
                                tokio::task::yield_now().await;
                            }
                        }
                    })
                })
                .collect();
            for sender in senders {
                sender.await.unwrap();
            }

            let log: Vec<(u8, u32)> = recorder.ask(GetLog, WAIT).await.unwrap();
            system.shutdown().await;
            log
        });

        prop_assert_eq!(log.len() as u32, counts.iter().sum::<u32>());
        for (sender, &count) in counts.iter().enumerate() {
            prop_assert!(ordered_per_sender(&log, sender as u8, count));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn high_priority_overtakes_queued_messages() {
    let system = ActorSystem::new(SystemConfig::default());
    let recorder = system.spawn(Recorder::default());

    recorder.send(Block(100));
    for seq in 0..3 {
        recorder.send(Tagged { sender: 0, seq });
    }
    recorder.send_with(None, Priority::High, Tagged { sender: 1, seq: 0 });

    let log: Vec<(u8, u32)> = recorder.ask(GetLog, WAIT).await.unwrap();
    assert_eq!(log, vec![(1, 0), (0, 0), (0, 1), (0, 2)]);
    system.shutdown().await;
}

#[derive(Debug, Clone)]
struct Echo(u32);

/// Replies `Echo(n)` with `n * 10`, optionally after blocking.
struct Back {
    delay: Duration,
}

impl Actor for Back {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        Behavior::new().on(|back: &mut Self, _ctx, Echo(n): Echo| {
            if !back.delay.is_zero() {
                std::thread::sleep(back.delay);
            }
            Ok(n * 10)
        })
    }
}

#[derive(Debug, Clone)]
struct Start {
    target: ActorHandle,
    n: u32,
    timeout: Duration,
}

#[derive(Debug, Clone)]
struct StartFuture(u32);

/// Issues requests from inside an actor and reports how they resolved.
struct Client {
    report: mpsc::UnboundedSender<Result<u32, ActorError>>,
}

impl Actor for Client {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        Behavior::new()
            .on(|_: &mut Self, ctx, start: Start| {
                ctx.request::<u32>(&start.target, start.timeout, Echo(start.n))
                    .then(
                        |client: &mut Self, _ctx, reply| {
                            let _ = client.report.send(Ok(reply));
                        },
                        |client: &mut Self, _ctx, error| {
                            let _ = client.report.send(Err(error));
                        },
                    );
                Ok(())
            })
            .on(|_: &mut Self, ctx, StartFuture(n): StartFuture| {
                ctx.await_future(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(n + 1)
                })
                .then(
                    |client: &mut Self, _ctx, value: u32| {
                        let _ = client.report.send(Ok(value));
                    },
                    |client: &mut Self, _ctx, error| {
                        let _ = client.report.send(Err(error));
                    },
                );
                Ok(())
            })
    }
}

async fn outcome(rx: &mut mpsc::UnboundedReceiver<Result<u32, ActorError>>) -> Result<u32, ActorError> {
    tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn request_continuation_receives_reply() {
    let system = ActorSystem::new(SystemConfig::default());
    let back = system.spawn(Back {
        delay: Duration::ZERO,
    });
    let (report, mut rx) = mpsc::unbounded_channel();
    let client = system.spawn(Client { report });

    client.send(Start {
        target: back.clone(),
        n: 4,
        timeout: WAIT,
    });
    assert_eq!(outcome(&mut rx).await, Ok(40));

    client.send(StartFuture(41));
    assert_eq!(outcome(&mut rx).await, Ok(42));
    system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_continuation_receives_timeout() {
    let system = ActorSystem::new(SystemConfig::default());
    let back = system.spawn(Back {
        delay: Duration::from_millis(300),
    });
    let (report, mut rx) = mpsc::unbounded_channel();
    let client = system.spawn(Client { report });

    client.send(Start {
        target: back.clone(),
        n: 1,
        timeout: Duration::from_millis(50),
    });
    assert_eq!(outcome(&mut rx).await, Err(ActorError::RequestTimeout));
    system.shutdown().await;
}

#[derive(Debug, Clone)]
struct Flip;

#[derive(Debug, Clone)]
struct State;

struct Switch;

fn on_behavior() -> Behavior<Switch> {
    Behavior::new()
        .on(|_: &mut Switch, _ctx, _: State| Ok("on"))
        .on(|_: &mut Switch, ctx, _: Flip| {
            ctx.become_(off_behavior());
            Ok(())
        })
}

fn off_behavior() -> Behavior<Switch> {
    Behavior::new()
        .on(|_: &mut Switch, _ctx, _: State| Ok("off"))
        .on(|_: &mut Switch, ctx, _: Flip| {
            ctx.become_(on_behavior());
            Ok(())
        })
}

impl Actor for Switch {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        on_behavior()
    }
}

#[tokio::test]
async fn become_replaces_behavior_for_later_messages() {
    let system = ActorSystem::new(SystemConfig::default());
    let switch = system.spawn(Switch);

    assert_eq!(switch.ask::<&'static str>(State, WAIT).await.unwrap(), "on");
    switch.send(Flip);
    assert_eq!(switch.ask::<&'static str>(State, WAIT).await.unwrap(), "off");
    switch.send(Flip);
    assert_eq!(switch.ask::<&'static str>(State, WAIT).await.unwrap(), "on");
    system.shutdown().await;
}

/// Hands every `Echo` to `back`, which answers the original requester.
struct Front {
    back: ActorHandle,
}

impl Actor for Front {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        Behavior::new().on(|front: &mut Self, ctx, echo: Echo| -> Handled<()> {
            let back = front.back.clone();
            ctx.delegate(&back, echo);
            Ok(())
        })
    }
}

#[tokio::test]
async fn delegated_request_is_answered_by_delegate() {
    let system = ActorSystem::new(SystemConfig::default());
    let back = system.spawn(Back {
        delay: Duration::ZERO,
    });
    let front = system.spawn(Front { back });

    let reply: u32 = front.ask(Echo(7), WAIT).await.unwrap();
    assert_eq!(reply, 70);
    system.shutdown().await;
}
