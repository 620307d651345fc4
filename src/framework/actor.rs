//! # Actor Run Loop
//!
//! The [`Actor`] trait is what user code implements; [`ActorRunner`] is the
//! server half that owns the actor's state and mailbox and processes envelopes
//! one at a time in its own Tokio task.
//!
//! ## Dispatch order
//!
//! For each dequeued envelope:
//!
//! 1. `Response(n)` envelopes resume the continuation registered for request `n`.
//! 2. [`ExitMsg`] goes to exit handling (links and `send_exit`).
//! 3. [`DownMsg`] goes to the down handler.
//! 4. Everything else is matched against the current [`Behavior`]; unmatched
//!    messages reach the behavior's fallback, then the context's default
//!    handler, and finally surface as [`ActorError::UnexpectedMessage`].
//!
//! Handler faults are routed exception handler → error handler → default
//! handling. Only a handler verdict of [`FaultPolicy::Terminate`] (or a quit,
//! a kill or an untrapped exit) ends the loop.

use crate::error::ActorError;
use crate::framework::behavior::Behavior;
use crate::framework::context::{Context, Current};
use crate::framework::handle::ActorAddr;
use crate::framework::mailbox::Mailbox;
use crate::framework::message::{Envelope, Message, MessageId, Priority, Promise, ResponsePayload};
use crate::supervision::{DownMsg, ExitMsg, ExitReason, Fault, FaultPolicy};
use std::any::type_name;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};

/// A unit of state with a message-driven behavior.
///
/// # Provided Methods (Hooks)
/// - [`Actor::name`] defaults to the short type name.
/// - [`Actor::on_exit`] runs once while the actor is terminating.
pub trait Actor: Send + Sized + 'static {
    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }

    /// Builds the initial behavior. Handlers (down, exit, error, ...) are
    /// usually installed on `ctx` here as well.
    fn make_behavior(&mut self, ctx: &mut Context<Self>) -> Behavior<Self>;

    fn on_exit(&mut self, _ctx: &mut Context<Self>, _reason: &ExitReason) {}
}

pub(crate) fn short_type_name<T>() -> &'static str {
    type_name::<T>().split("::").last().unwrap_or("Unknown")
}

enum Outcome {
    Reply(Option<Message>),
    Failed(ActorError),
    Unexpected(ActorError),
    Fault(Fault),
}

fn default_error_policy(addr: &ActorAddr, error: &ActorError) -> FaultPolicy {
    match error {
        ActorError::UnexpectedMessage(msg) => {
            warn!(actor = %addr, %msg, "unexpected message");
            FaultPolicy::Resume
        }
        other => {
            warn!(actor = %addr, error = %other, "Unhandled error");
            FaultPolicy::Terminate(ExitReason::UnhandledError(other.to_string()))
        }
    }
}

/// Owns one actor's state, context and mailbox.
pub(crate) struct ActorRunner<A: Actor> {
    actor: A,
    ctx: Context<A>,
    mailbox: Mailbox,
}

impl<A: Actor> ActorRunner<A> {
    pub(crate) fn new(actor: A, ctx: Context<A>, mailbox: Mailbox) -> Self {
        Self {
            actor,
            ctx,
            mailbox,
        }
    }

    pub(crate) async fn run(mut self) {
        let addr = self.ctx.addr();
        let name = self.actor.name();
        self.ctx.cell.set_running();
        info!(actor = %addr, name, "Actor started");

        let reason = match self.guarded(|actor, ctx| actor.make_behavior(ctx)) {
            Ok(behavior) => {
                self.ctx.behavior = behavior;
                self.event_loop().await
            }
            Err(fault) => {
                warn!(actor = %addr, %fault, "make_behavior panicked");
                ExitReason::UnhandledException
            }
        };

        self.terminate(name, reason);
    }

    async fn event_loop(&mut self) -> ExitReason {
        loop {
            if let Some(reason) = self.ctx.quit.take() {
                return reason;
            }
            let Some(envelope) = self.mailbox.recv().await else {
                return ExitReason::Normal;
            };
            if let Some(reason) = self.dispatch(envelope) {
                return reason;
            }
        }
    }

    fn guarded<T>(&mut self, f: impl FnOnce(&mut A, &mut Context<A>) -> T) -> Result<T, Fault> {
        let actor = &mut self.actor;
        let ctx = &mut self.ctx;
        panic::catch_unwind(AssertUnwindSafe(move || f(actor, ctx))).map_err(Fault::from_panic)
    }

    fn dispatch(&mut self, envelope: Envelope) -> Option<ExitReason> {
        let Envelope {
            sender,
            mid,
            payload,
            promise,
            ..
        } = envelope;

        if let MessageId::Response(id) = mid {
            return self.handle_response(id, payload);
        }
        let payload = match payload.take::<ExitMsg>() {
            Ok(exit) => return self.handle_exit(exit),
            Err(other) => other,
        };
        let payload = match payload.take::<DownMsg>() {
            Ok(down) => return self.handle_down(down),
            Err(other) => other,
        };

        debug!(actor = %self.ctx.addr(), payload = payload.type_name(), ?mid, "Dispatch");
        self.ctx.current = Current {
            sender,
            mid,
            promise,
        };
        let outcome = self.invoke(payload);
        let promise = self.ctx.current.promise.take();
        self.ctx.current = Current::default();
        self.settle(promise, outcome)
    }

    fn invoke(&mut self, payload: Message) -> Outcome {
        if let Some(case) = self.ctx.behavior.find(&payload) {
            return match self.guarded(|actor, ctx| case(actor, ctx, payload)) {
                Ok(Ok(reply)) => Outcome::Reply(Some(reply)),
                Ok(Err(error)) => Outcome::Failed(error),
                Err(fault) => Outcome::Fault(fault),
            };
        }
        let fallback = self
            .ctx
            .behavior
            .fallback()
            .or_else(|| self.ctx.handlers.default.clone());
        match fallback {
            Some(fallback) => match self.guarded(|actor, ctx| fallback(actor, ctx, &payload)) {
                Ok(Ok(reply)) => Outcome::Reply(reply),
                Ok(Err(error)) => Outcome::Failed(error),
                Err(fault) => Outcome::Fault(fault),
            },
            None => Outcome::Unexpected(ActorError::UnexpectedMessage(format!("{payload:?}"))),
        }
    }

    fn settle(&mut self, promise: Option<Promise>, outcome: Outcome) -> Option<ExitReason> {
        match outcome {
            Outcome::Reply(reply) => {
                if let (Some(promise), Some(reply)) = (promise, reply) {
                    let _ = promise.send(Ok(reply));
                }
                None
            }
            Outcome::Failed(error) => match promise {
                Some(promise) => {
                    debug!(actor = %self.ctx.addr(), %error, "Request failed");
                    let _ = promise.send(Err(error));
                    None
                }
                None => self.on_error(error),
            },
            Outcome::Unexpected(error) => {
                if let Some(promise) = promise {
                    let _ = promise.send(Err(error.clone()));
                }
                self.on_error(error)
            }
            Outcome::Fault(fault) => {
                if let Some(promise) = promise {
                    let _ = promise.send(Err(ActorError::Handler(fault.to_string())));
                }
                self.on_fault(fault)
            }
        }
    }

    fn on_error(&mut self, error: ActorError) -> Option<ExitReason> {
        let policy = match self.ctx.handlers.error.clone() {
            Some(handler) => match self.guarded(|actor, ctx| handler(actor, ctx, &error)) {
                Ok(policy) => policy,
                Err(fault) => return self.on_fault(fault),
            },
            None => default_error_policy(&self.ctx.addr(), &error),
        };
        policy.into_exit()
    }

    fn on_fault(&mut self, fault: Fault) -> Option<ExitReason> {
        warn!(actor = %self.ctx.addr(), %fault, "Handler panicked");
        let policy = match self.ctx.handlers.exception.clone() {
            Some(handler) => self
                .guarded(|actor, ctx| handler(actor, ctx, &fault))
                .unwrap_or(FaultPolicy::Terminate(ExitReason::UnhandledException)),
            None => FaultPolicy::Terminate(ExitReason::UnhandledException),
        };
        policy.into_exit()
    }

    fn handle_exit(&mut self, exit: ExitMsg) -> Option<ExitReason> {
        debug!(actor = %self.ctx.addr(), source = ?exit.source, reason = %exit.reason, "Exit signal");
        if let Some(source) = &exit.source {
            self.ctx.cell.detach_link(source);
        }
        if exit.reason == ExitReason::Kill {
            return Some(ExitReason::Kill);
        }
        match self.ctx.handlers.exit.clone() {
            Some(handler) => match self.guarded(|actor, ctx| handler(actor, ctx, exit)) {
                Ok(policy) => policy.into_exit(),
                Err(fault) => self.on_fault(fault),
            },
            None if exit.reason.is_normal() => None,
            None => Some(exit.reason),
        }
    }

    fn handle_down(&mut self, down: DownMsg) -> Option<ExitReason> {
        match self.ctx.handlers.down.clone() {
            Some(handler) => match self.guarded(|actor, ctx| handler(actor, ctx, down)) {
                Ok(()) => None,
                Err(fault) => self.on_fault(fault),
            },
            None => {
                debug!(actor = %self.ctx.addr(), source = %down.source, reason = %down.reason, "Unhandled down message");
                None
            }
        }
    }

    fn handle_response(&mut self, id: u64, payload: Message) -> Option<ExitReason> {
        let Some(continuation) = self.ctx.pending.remove(&id) else {
            debug!(actor = %self.ctx.addr(), id, "Response without continuation dropped");
            return None;
        };
        let result = match payload.take::<ResponsePayload>() {
            Ok(ResponsePayload(result)) => result,
            Err(other) => Err(ActorError::UnexpectedResponse {
                expected: "response",
                got: other.type_name().to_string(),
            }),
        };
        match self.guarded(|actor, ctx| continuation(actor, ctx, result)) {
            Ok(()) => None,
            Err(fault) => self.on_fault(fault),
        }
    }

    /// `Terminating → Down(reason)`: runs the exit hook, leaves groups, bounces
    /// queued requests, then notifies links and monitors exactly once.
    fn terminate(mut self, name: &'static str, reason: ExitReason) {
        let addr = self.ctx.addr();
        self.ctx.cell.begin_termination();

        if let Err(fault) = self.guarded(|actor, ctx| actor.on_exit(ctx, &reason)) {
            warn!(actor = %addr, %fault, "on_exit panicked");
        }
        for group in std::mem::take(&mut self.ctx.groups) {
            group.unsubscribe(&addr);
        }

        self.mailbox.close();
        let mut bounced = 0usize;
        while let Some(envelope) = self.mailbox.try_next() {
            if envelope.promise.is_some() {
                bounced += 1;
            }
            envelope.bounce(ActorError::RequestReceiverDown);
        }
        self.ctx.pending.clear();

        let attached = self.ctx.cell.seal(reason.clone());
        let (links, monitors) = (attached.links.len(), attached.monitors.len());
        for link in attached.links {
            if let Some(peer) = link.upgrade() {
                peer.cell().detach_link(&addr);
                let exit = ExitMsg {
                    source: Some(addr),
                    reason: reason.clone(),
                };
                peer.enqueue(
                    Envelope::new(Some(self.ctx.myself().clone()), Message::new(exit))
                        .with_priority(Priority::High),
                );
            }
        }
        for watcher in attached.monitors {
            let down = DownMsg {
                source: addr,
                reason: reason.clone(),
            };
            watcher.enqueue(Envelope::new(
                Some(self.ctx.myself().clone()),
                Message::new(down),
            ));
        }

        self.ctx.cell.mark_down();

        self.ctx.system().deregister(&addr);
        info!(actor = %addr, name, %reason, links, monitors, bounced, "Actor terminated");
    }
}
