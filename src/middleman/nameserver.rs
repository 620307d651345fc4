use crate::error::ActorError;
use crate::framework::{Actor, ActorHandle, Behavior, Context};

/// Asks a group nameserver for the local group `identifier`.
#[derive(Debug, Clone)]
pub struct GetGroup {
    pub identifier: String,
}

/// Everything a remote node needs to build a proxy.
#[derive(Debug, Clone)]
pub struct GroupInfo {
    pub module: String,
    pub identifier: String,
    pub dispatcher: ActorHandle,
}

/// Answers [`GetGroup`] with the [`GroupInfo`] of the node's `local` groups.
/// Published by `Middleman::publish_local_groups`.
pub(crate) struct GroupNameserver;

impl Actor for GroupNameserver {
    fn make_behavior(&mut self, _ctx: &mut Context<Self>) -> Behavior<Self> {
        Behavior::new().on(|_: &mut Self, ctx, GetGroup { identifier }: GetGroup| {
            let group = ctx
                .system()
                .groups()
                .get("local", &identifier)
                .map_err(ActorError::handler)?;
            Ok(GroupInfo {
                module: group.module().to_string(),
                identifier,
                dispatcher: group.dispatcher().clone(),
            })
        })
    }
}
