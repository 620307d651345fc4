//! Runtime orchestration and lifecycle management.
//!
//! This module contains the infrastructure that hosts actors:
//!
//! - **Actor system**: Spawning, bookkeeping and graceful shutdown of one node
//! - **Runtime**: Building the Tokio runtime from [`SchedulerConfig`](crate::config::SchedulerConfig)
//! - **Observability setup**: Initializing tracing and logging
//!
//! # Main Components
//!
//! - [`ActorSystem`] - The orchestrator every actor, group and middleman hangs off
//! - [`build_runtime`] - Runtime construction for binaries
//! - [`setup_tracing`] - Initializes the tracing/logging infrastructure

pub mod runtime;
pub mod system;
pub mod tracing;

pub use runtime::build_runtime;
pub use system::ActorSystem;
pub(crate) use system::WeakActorSystem;
pub use self::tracing::setup_tracing;
