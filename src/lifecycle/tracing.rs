//! # Observability & Tracing
//!
//! [`setup_tracing`] installs a compact `tracing_subscriber` formatter filtered
//! through `RUST_LOG`.
//!
//! ## What Gets Traced
//!
//! - **Actor Lifecycle** (`info`): `Actor started`, `Actor terminated` with the
//!   exit reason and how many links and monitors were notified
//! - **Groups** (`info`/`debug`): group creation, joins and leaves relayed to
//!   remote dispatchers
//! - **Middleman** (`info`): publish, unpublish, connect and shutdown
//! - **Message Flow** (`debug`): dispatch of each envelope, requests, exit signals
//! - **Drops & Heartbeats** (`trace`): rejected envelopes, multiplexer ticks
//! - **Faults** (`warn`): panicking handlers, unhandled errors
//!
//! ## Usage Examples
//!
//! ```bash
//! # Lifecycle only
//! RUST_LOG=info cargo run
//!
//! # Every dispatched message
//! RUST_LOG=debug cargo run
//!
//! # Only the middleman, verbosely
//! RUST_LOG=troupe::middleman=trace cargo run
//! ```
//!
//! With `RUST_LOG=info` the demo prints lines like:
//!
//! ```text
//! INFO Actor started actor=#3@1f0c2a9e name="Adder"
//! INFO Actor terminated actor=#3@1f0c2a9e name="Adder" reason=user_shutdown links=0 monitors=1 bounced=0
//! ```
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false) // actor addresses identify the source
        .compact()
        .init();
}
