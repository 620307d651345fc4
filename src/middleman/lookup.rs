use crate::error::ActorError;
use crate::framework::{Actor, Behavior, Context};
use crate::group::Group;
use crate::middleman::nameserver::{GetGroup, GroupInfo};
use crate::middleman::{Endpoint, Middleman, MiddlemanError};
use crate::supervision::ExitReason;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

pub(crate) type LookupResult = Result<Group, MiddlemanError>;

/// A nameserver that does not answer in time is reported like an expired lookup.
fn lookup_error(error: ActorError) -> MiddlemanError {
    match error {
        ActorError::RequestTimeout => MiddlemanError::Timeout,
        other => MiddlemanError::from(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LookupStep {
    Connect,
    Resolve,
    Done,
}

/// Two-step remote group lookup: connect to `host:port`, then ask the
/// nameserver published there for the group and wrap the answer in a proxy.
///
/// The worker fulfils its promise exactly once and quits. If it dies first,
/// the dropped promise tells the caller the node was unreachable.
pub(crate) struct PendingLookup {
    middleman: Middleman,
    identifier: String,
    host: String,
    port: u16,
    timeout: Duration,
    step: LookupStep,
    promise: Option<oneshot::Sender<LookupResult>>,
}

impl PendingLookup {
    pub(crate) fn new(
        middleman: Middleman,
        identifier: String,
        host: String,
        port: u16,
        timeout: Duration,
        promise: oneshot::Sender<LookupResult>,
    ) -> Self {
        Self {
            middleman,
            identifier,
            host,
            port,
            timeout,
            step: LookupStep::Connect,
            promise: Some(promise),
        }
    }

    fn finish(&mut self, ctx: &mut Context<Self>, result: LookupResult) {
        debug!(group = %self.identifier, host = %self.host, port = self.port, ok = result.is_ok(), "Lookup finished");
        if let Some(promise) = self.promise.take() {
            let _ = promise.send(result);
        }
        self.step = LookupStep::Done;
        ctx.quit(ExitReason::Normal);
    }

    fn resolve(&mut self, ctx: &mut Context<Self>, endpoint: Endpoint) {
        let Some(nameserver) = endpoint.actor else {
            self.finish(ctx, Err(MiddlemanError::NoActorPublishedAtPort(self.port)));
            return;
        };
        self.step = LookupStep::Resolve;
        let request = GetGroup {
            identifier: self.identifier.clone(),
        };
        ctx.request::<GroupInfo>(&nameserver, self.timeout, request).then(
            |state, ctx, info| {
                let proxy = ctx
                    .system()
                    .groups()
                    .get_proxy(&info.module, &info.identifier, Some(info.dispatcher))
                    .map_err(MiddlemanError::from);
                state.finish(ctx, proxy);
            },
            |state, ctx, error: ActorError| state.finish(ctx, Err(lookup_error(error))),
        );
    }
}

impl Actor for PendingLookup {
    fn make_behavior(&mut self, ctx: &mut Context<Self>) -> Behavior<Self> {
        let middleman = self.middleman.clone();
        let (host, port) = (self.host.clone(), self.port);
        ctx.await_future(async move { Ok(middleman.connect(&host, port).await) })
            .then(
                |state: &mut Self, ctx, connected: Result<Endpoint, MiddlemanError>| {
                    match connected {
                        Ok(endpoint) => state.resolve(ctx, endpoint),
                        Err(error) => state.finish(ctx, Err(error)),
                    }
                },
                |state: &mut Self, ctx, error: ActorError| {
                    state.finish(ctx, Err(lookup_error(error)))
                },
            );
        Behavior::new()
    }

    fn on_exit(&mut self, _ctx: &mut Context<Self>, reason: &ExitReason) {
        if self.step != LookupStep::Done {
            debug!(group = %self.identifier, step = ?self.step, %reason, "Lookup abandoned");
        }
    }
}
