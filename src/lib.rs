//! # Troupe
//!
//! > **Typed actors, groups and a loopback middleman on Tokio.**
//!
//! Every actor owns its state, runs in its own Tokio task and talks to the
//! rest of the world only through messages. The runtime supplies the plumbing
//! around that: mailboxes with a high-priority lane, request/response
//! correlation, links and monitors for failure propagation, publish/subscribe
//! groups and a middleman that lets several nodes of the same process find
//! each other.
//!
//! ## Core Concepts
//!
//! ### Behaviors
//! An actor implements [`Actor`] and returns a [`Behavior`]: an ordered list
//! of typed cases. The first case whose payload type matches runs; its `Ok`
//! value is the reply when the message was a request.
//!
//! ### Failure is a message
//! A handler that panics or returns an error never takes the runtime down.
//! The fault is routed through the actor's exception and error handlers; if
//! the actor terminates, linked actors receive an [`ExitMsg`] and monitoring
//! actors a [`DownMsg`]. A [`Supervisor`] turns the latter into restarts.
//!
//! ### Type ids
//! Message types that cross node boundaries are registered in blocks with
//! [`type_id_block!`]. The [`registry`] checks that no two types ever share an
//! id and serializes registered payloads with `bincode`.
//!
//! ## Module Tour
//!
//! ### 1. The Engine ([`framework`])
//! - **Role**: messages, envelopes, mailboxes, behaviors and the run loop.
//! - **Key items**: [`Actor`], [`ActorHandle`], [`Context`], [`Behavior`].
//!
//! ### 2. Supervision ([`supervision`])
//! - **Role**: exit reasons, link/monitor signals, fault policies, restarts.
//! - **Key items**: [`ExitReason`], [`send_exit`], [`Supervisor`].
//!
//! ### 3. Groups ([`group`])
//! - **Role**: named fan-out with local groups and proxies for remote ones.
//! - **Key items**: [`Group`], [`GroupManager`](group::GroupManager).
//!
//! ### 4. Distribution ([`middleman`])
//! - **Role**: publishing actors at ports, connecting, remote group lookup.
//! - **Key items**: [`Middleman`], [`MiddlemanError`](middleman::MiddlemanError).
//!
//! ### 5. The Orchestrator ([`lifecycle`])
//! - **Role**: the [`ActorSystem`] (one node), runtime construction, tracing.
//!
//! ### 6. Configuration ([`config`])
//! - **Role**: layered settings from a TOML file and `TROUPE__*` variables.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the demo with lifecycle logs
//! RUST_LOG=info cargo run
//!
//! # Run the tests
//! cargo test
//! ```

pub mod config;
pub mod error;
pub mod framework;
pub mod group;
pub mod lifecycle;
pub mod middleman;
pub mod registry;
pub mod supervision;

#[doc(hidden)]
pub mod __private {
    pub use paste::paste;
}

pub use config::SystemConfig;
pub use error::{ActorError, RegistryError};
pub use framework::{
    Actor, ActorAddr, ActorHandle, Behavior, Context, Handled, Message, NodeId, WeakActorHandle,
};
pub use group::Group;
pub use lifecycle::ActorSystem;
pub use middleman::Middleman;
pub use supervision::{send_exit, DownMsg, ExitMsg, ExitReason, FaultPolicy, Supervisor};
