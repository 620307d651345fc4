//! # Behaviors
//!
//! A [`Behavior`] is the ordered dispatch table an actor consults for each
//! message: typed cases tried in declaration order, then an optional fallback.
//!
//! Behaviors are immutable once handed to the runtime. The table is shared
//! behind an `Arc`; [`Context::become_`] swaps in a new one, and the swap only
//! affects envelopes dequeued after the running handler returns.
//!
//! ```rust,ignore
//! Behavior::new()
//!     .on(|total: &mut Adder, _ctx, Add(x): Add| {
//!         total.0 += x;
//!         Ok(())
//!     })
//!     .on(|total, _ctx, _: GetTotal| Ok(total.0))
//! ```

use crate::error::ActorError;
use crate::framework::context::Context;
use crate::framework::message::{Message, Payload};
use std::any::{type_name, TypeId};
use std::sync::Arc;

/// Result type of behavior cases. `Ok` values become the reply to a request.
pub type Handled<R> = Result<R, ActorError>;

pub(crate) type CaseFn<S> =
    Arc<dyn Fn(&mut S, &mut Context<S>, Message) -> Result<Message, ActorError> + Send + Sync>;

/// Handler for messages no case matched. `Ok(Some(reply))` answers a request,
/// `Ok(None)` drops the message.
pub type FallbackFn<S> = Arc<
    dyn Fn(&mut S, &mut Context<S>, &Message) -> Result<Option<Message>, ActorError> + Send + Sync,
>;

struct Case<S> {
    rust_type: TypeId,
    type_name: &'static str,
    handler: CaseFn<S>,
}

impl<S> Clone for Case<S> {
    fn clone(&self) -> Self {
        Self {
            rust_type: self.rust_type,
            type_name: self.type_name,
            handler: self.handler.clone(),
        }
    }
}

struct Table<S> {
    cases: Vec<Case<S>>,
    fallback: Option<FallbackFn<S>>,
}

impl<S> Clone for Table<S> {
    fn clone(&self) -> Self {
        Self {
            cases: self.cases.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

/// Ordered set of typed message handlers for actor state `S`.
pub struct Behavior<S> {
    table: Arc<Table<S>>,
}

impl<S> Clone for Behavior<S> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<S: 'static> Default for Behavior<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: 'static> Behavior<S> {
    /// An empty behavior: every message falls through to the default handling.
    pub fn new() -> Self {
        Self {
            table: Arc::new(Table {
                cases: Vec::new(),
                fallback: None,
            }),
        }
    }

    /// Appends a case for payload type `M`. Earlier cases win.
    pub fn on<M, R, F>(mut self, handler: F) -> Self
    where
        M: Payload,
        R: Payload,
        F: Fn(&mut S, &mut Context<S>, M) -> Handled<R> + Send + Sync + 'static,
    {
        let handler: CaseFn<S> = Arc::new(move |state, ctx, msg| {
            let value = msg
                .take::<M>()
                .map_err(|other| ActorError::UnexpectedMessage(format!("{other:?}")))?;
            handler(state, ctx, value).map(Message::new)
        });
        Arc::make_mut(&mut self.table).cases.push(Case {
            rust_type: TypeId::of::<M>(),
            type_name: type_name::<M>(),
            handler,
        });
        self
    }

    /// Sets the fallback consulted when no case matches.
    pub fn or_else<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&mut S, &mut Context<S>, &Message) -> Result<Option<Message>, ActorError>
            + Send
            + Sync
            + 'static,
    {
        Arc::make_mut(&mut self.table).fallback = Some(Arc::new(fallback));
        self
    }

    pub(crate) fn find(&self, msg: &Message) -> Option<CaseFn<S>> {
        self.table
            .cases
            .iter()
            .find(|case| case.rust_type == msg.rust_type())
            .map(|case| case.handler.clone())
    }

    pub(crate) fn fallback(&self) -> Option<FallbackFn<S>> {
        self.table.fallback.clone()
    }

    /// Payload type names handled by this behavior, in declaration order.
    pub fn signature(&self) -> Vec<&'static str> {
        self.table.cases.iter().map(|case| case.type_name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.table.cases.is_empty() && self.table.fallback.is_none()
    }
}
