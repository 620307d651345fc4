//! # Actor Context
//!
//! The [`Context`] is everything an actor can do besides mutating its own
//! state: send, request, spawn, link, monitor, join groups, replace its
//! behavior and install supervision handlers. It is passed as `&mut` to every
//! handler, next to the actor's state.
//!
//! Requests are asynchronous. [`Context::request`] returns a [`Pending`]; the
//! continuation registered with [`Pending::then`] runs later, on this actor,
//! when the reply (or an error such as a timeout) comes back.

use crate::error::ActorError;
use crate::framework::actor::Actor;
use crate::framework::behavior::{Behavior, FallbackFn};
use crate::framework::handle::{ActorAddr, ActorCell, ActorHandle, WeakActorHandle};
use crate::framework::message::{Envelope, Message, MessageId, Payload, Priority, Promise};
use crate::group::Group;
use crate::lifecycle::ActorSystem;
use crate::supervision::{send_exit, DownMsg, ExitMsg, ExitReason, Fault, FaultPolicy};
use std::any::type_name;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

pub type ErrorHandler<S> =
    Arc<dyn Fn(&mut S, &mut Context<S>, &ActorError) -> FaultPolicy + Send + Sync>;
pub type ExceptionHandler<S> =
    Arc<dyn Fn(&mut S, &mut Context<S>, &Fault) -> FaultPolicy + Send + Sync>;
pub type DownHandler<S> = Arc<dyn Fn(&mut S, &mut Context<S>, DownMsg) + Send + Sync>;
pub type ExitHandler<S> = Arc<dyn Fn(&mut S, &mut Context<S>, ExitMsg) -> FaultPolicy + Send + Sync>;

pub(crate) type Continuation<S> =
    Box<dyn FnOnce(&mut S, &mut Context<S>, Result<Message, ActorError>) + Send>;

pub(crate) struct Handlers<S> {
    pub(crate) error: Option<ErrorHandler<S>>,
    pub(crate) exception: Option<ExceptionHandler<S>>,
    pub(crate) down: Option<DownHandler<S>>,
    pub(crate) exit: Option<ExitHandler<S>>,
    pub(crate) default: Option<FallbackFn<S>>,
}

impl<S> Default for Handlers<S> {
    fn default() -> Self {
        Self {
            error: None,
            exception: None,
            down: None,
            exit: None,
            default: None,
        }
    }
}

/// Routing metadata of the envelope being handled.
#[derive(Default)]
pub(crate) struct Current {
    pub(crate) sender: Option<WeakActorHandle>,
    pub(crate) mid: MessageId,
    pub(crate) promise: Option<Promise>,
}

/// Per-actor execution context.
pub struct Context<S> {
    myself: WeakActorHandle,
    pub(crate) cell: Arc<ActorCell>,
    system: ActorSystem,
    pub(crate) behavior: Behavior<S>,
    pub(crate) handlers: Handlers<S>,
    pub(crate) current: Current,
    pub(crate) pending: HashMap<u64, Continuation<S>>,
    next_request: u64,
    pub(crate) quit: Option<ExitReason>,
    pub(crate) groups: Vec<Group>,
}

impl<S: 'static> Context<S> {
    pub(crate) fn new(myself: WeakActorHandle, cell: Arc<ActorCell>, system: ActorSystem) -> Self {
        Self {
            myself,
            cell,
            system,
            behavior: Behavior::new(),
            handlers: Handlers::default(),
            current: Current::default(),
            pending: HashMap::new(),
            next_request: 1,
            quit: None,
            groups: Vec::new(),
        }
    }

    pub fn addr(&self) -> ActorAddr {
        self.myself.addr()
    }

    pub fn myself(&self) -> &WeakActorHandle {
        &self.myself
    }

    /// A strong handle to this actor, unless every owner already dropped theirs.
    pub fn handle(&self) -> Option<ActorHandle> {
        self.myself.upgrade()
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Sender of the envelope being handled, if it was not anonymous.
    pub fn sender(&self) -> Option<&WeakActorHandle> {
        self.current.sender.as_ref()
    }

    pub fn current_mid(&self) -> MessageId {
        self.current.mid
    }

    pub fn send<M: Payload>(&self, target: &ActorHandle, msg: M) -> bool {
        target.enqueue(Envelope::new(Some(self.myself.clone()), Message::new(msg)))
    }

    pub fn send_high<M: Payload>(&self, target: &ActorHandle, msg: M) -> bool {
        target.enqueue(
            Envelope::new(Some(self.myself.clone()), Message::new(msg))
                .with_priority(Priority::High),
        )
    }

    /// Forwards `msg` in place of the current message. The receiver answers the
    /// original requester directly, so this actor sends no reply.
    pub fn delegate<M: Payload>(&mut self, target: &ActorHandle, msg: M) -> bool {
        let envelope = Envelope {
            sender: self.current.sender.clone(),
            mid: self.current.mid,
            priority: Priority::Normal,
            payload: Message::new(msg),
            promise: self.current.promise.take(),
        };
        target.enqueue(envelope)
    }

    /// Replaces the behavior for all subsequent messages.
    pub fn become_(&mut self, behavior: Behavior<S>) {
        self.behavior = behavior;
    }

    /// Terminates after the current handler returns.
    pub fn quit(&mut self, reason: ExitReason) {
        self.quit = Some(reason);
    }

    pub fn spawn<A: Actor>(&self, actor: A) -> ActorHandle {
        self.system.spawn(actor)
    }

    pub fn spawn_monitored<A: Actor>(&mut self, actor: A) -> ActorHandle {
        let handle = self.system.spawn(actor);
        self.monitor(&handle);
        handle
    }

    pub fn spawn_linked<A: Actor>(&mut self, actor: A) -> ActorHandle {
        let handle = self.system.spawn(actor);
        self.link(&handle);
        handle
    }

    /// Requests a [`DownMsg`] when `target` terminates. If it already has, the
    /// notification is delivered right away.
    pub fn monitor(&mut self, target: &ActorHandle) {
        if let Some(reason) = target.cell().attach_monitor(self.myself.clone()) {
            let down = DownMsg {
                source: target.addr(),
                reason,
            };
            self.myself
                .enqueue(Envelope::new(Some(target.downgrade()), Message::new(down)));
        }
    }

    pub fn demonitor(&mut self, target: &ActorHandle) {
        target.cell().detach_monitor(&self.addr());
    }

    /// Links both actors. Linking to an actor that is already down delivers its
    /// exit signal immediately.
    pub fn link(&mut self, other: &ActorHandle) {
        if other.addr() == self.addr() {
            return;
        }
        match other.cell().attach_link(self.myself.clone()) {
            Some(reason) => {
                let exit = ExitMsg {
                    source: Some(other.addr()),
                    reason,
                };
                self.myself.enqueue(
                    Envelope::new(Some(other.downgrade()), Message::new(exit))
                        .with_priority(Priority::High),
                );
            }
            None => {
                self.cell.attach_link(other.downgrade());
            }
        }
    }

    pub fn unlink(&mut self, other: &ActorHandle) {
        other.cell().detach_link(&self.addr());
        self.cell.detach_link(&other.addr());
    }

    pub fn send_exit(&self, target: &ActorHandle, reason: ExitReason) -> bool {
        send_exit(target, reason)
    }

    /// Subscribes this actor to `group`; it leaves automatically on termination.
    pub fn join(&mut self, group: &Group) -> bool {
        let Some(me) = self.myself.upgrade() else {
            return false;
        };
        let joined = group.subscribe(&me);
        if joined {
            self.groups.push(group.clone());
        }
        joined
    }

    pub fn leave(&mut self, group: &Group) {
        group.unsubscribe(&self.addr());
        self.groups.retain(|g| g != group);
    }

    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut S, &mut Context<S>, &ActorError) -> FaultPolicy + Send + Sync + 'static,
    {
        self.handlers.error = Some(Arc::new(handler));
    }

    pub fn set_exception_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut S, &mut Context<S>, &Fault) -> FaultPolicy + Send + Sync + 'static,
    {
        self.handlers.exception = Some(Arc::new(handler));
    }

    pub fn set_down_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut S, &mut Context<S>, DownMsg) + Send + Sync + 'static,
    {
        self.handlers.down = Some(Arc::new(handler));
    }

    /// Traps exit signals. Without an exit handler, abnormal exits from links
    /// terminate this actor with the same reason.
    pub fn set_exit_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut S, &mut Context<S>, ExitMsg) -> FaultPolicy + Send + Sync + 'static,
    {
        self.handlers.exit = Some(Arc::new(handler));
    }

    /// Handler for messages the current behavior does not match. A fallback set
    /// on the behavior itself takes precedence.
    pub fn set_default_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut S, &mut Context<S>, &Message) -> Result<Option<Message>, ActorError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.default = Some(Arc::new(handler));
    }

    /// Sends a request; the reply is handled by the continuation registered on
    /// the returned [`Pending`]. `timeout` bounds the wait.
    pub fn request<R: Payload>(
        &mut self,
        target: &ActorHandle,
        timeout: Duration,
        msg: impl Payload,
    ) -> Pending<'_, S, R> {
        let id = self.next_request_id();
        let (respond_to, response) = oneshot::channel();
        debug!(actor = %self.addr(), target = %target.addr(), id, "request");
        target.enqueue(Envelope::request(
            Some(self.myself.clone()),
            id,
            Message::new(msg),
            respond_to,
        ));
        self.spawn_continuation(id, async move {
            match tokio::time::timeout(timeout, response).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(ActorError::ActorDropped),
                Err(_) => Err(ActorError::RequestTimeout),
            }
        });
        Pending::new(self, id)
    }

    /// Runs `fut` outside the actor and hands its output to a continuation.
    pub fn await_future<T, F>(&mut self, fut: F) -> Pending<'_, S, T>
    where
        T: Payload,
        F: Future<Output = Result<T, ActorError>> + Send + 'static,
    {
        let id = self.next_request_id();
        self.spawn_continuation(id, async move { fut.await.map(Message::new) });
        Pending::new(self, id)
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_request;
        self.next_request += 1;
        id
    }

    fn spawn_continuation<F>(&self, id: u64, fut: F)
    where
        F: Future<Output = Result<Message, ActorError>> + Send + 'static,
    {
        // A strong handle keeps the mailbox open until the result is delivered.
        let keep_alive = self.myself.upgrade();
        let myself = self.myself.clone();
        tokio::spawn(async move {
            let envelope = Envelope::response(id, fut.await);
            match keep_alive {
                Some(handle) => handle.enqueue(envelope),
                None => myself.enqueue(envelope),
            };
        });
    }
}

/// An outstanding request or future awaiting its continuation.
#[must_use = "register a continuation with `then`"]
pub struct Pending<'a, S, R> {
    ctx: &'a mut Context<S>,
    id: u64,
    _reply: PhantomData<fn() -> R>,
}

impl<'a, S: 'static, R: Payload> Pending<'a, S, R> {
    fn new(ctx: &'a mut Context<S>, id: u64) -> Self {
        Self {
            ctx,
            id,
            _reply: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Registers the continuation. Exactly one of `on_reply` and `on_error` runs.
    pub fn then<F, E>(self, on_reply: F, on_error: E)
    where
        F: FnOnce(&mut S, &mut Context<S>, R) + Send + 'static,
        E: FnOnce(&mut S, &mut Context<S>, ActorError) + Send + 'static,
    {
        let continuation: Continuation<S> = Box::new(move |state, ctx, result| {
            let typed = result.and_then(|msg| {
                msg.take::<R>().map_err(|other| ActorError::UnexpectedResponse {
                    expected: type_name::<R>(),
                    got: other.type_name().to_string(),
                })
            });
            match typed {
                Ok(reply) => on_reply(state, ctx, reply),
                Err(error) => on_error(state, ctx, error),
            }
        });
        self.ctx.pending.insert(self.id, continuation);
    }
}
