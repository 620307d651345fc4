//! # Supervision
//!
//! Exit reasons, the actor lifecycle, and the two supervision relationships:
//!
//! - **Links** are bidirectional. When either side goes down, the other receives
//!   an [`ExitMsg`] and terminates with the same reason unless it installed an
//!   exit handler. `Normal` exits are ignored, `Kill` is never trappable.
//! - **Monitors** are unidirectional. The watcher receives exactly one
//!   [`DownMsg`] per `monitor` call and keeps running.
//!
//! Faults inside handlers (panics) are caught by the run loop and handed to the
//! actor's exception handler as a [`Fault`]; its [`FaultPolicy`] decides between
//! resuming and terminating.
//!
//! [`Supervisor`] implements the spawn-and-monitor pattern used by top-level
//! supervisors: children are monitored on spawn and tracked until their down
//! notification arrives. Whether to restart is left to the caller.

use crate::framework::{Actor, ActorAddr, ActorHandle, Context, Envelope, Message, Priority};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Why an actor terminated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    /// Regular shutdown, including "all handles dropped".
    Normal,
    /// A handler panicked and the exception handler did not resume.
    UnhandledException,
    /// A handler failed and the error handler did not resume.
    UnhandledError(String),
    Unknown,
    OutOfWorkers,
    /// Shut down on request of the user or the runtime.
    UserShutdown,
    /// Unconditional termination; cannot be trapped.
    Kill,
    RemoteLinkUnreachable,
    Unreachable,
}

impl ExitReason {
    pub fn is_normal(&self) -> bool {
        matches!(self, ExitReason::Normal)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => f.write_str("normal"),
            ExitReason::UnhandledException => f.write_str("unhandled_exception"),
            ExitReason::UnhandledError(e) => write!(f, "unhandled_error({e})"),
            ExitReason::Unknown => f.write_str("unknown"),
            ExitReason::OutOfWorkers => f.write_str("out_of_workers"),
            ExitReason::UserShutdown => f.write_str("user_shutdown"),
            ExitReason::Kill => f.write_str("kill"),
            ExitReason::RemoteLinkUnreachable => f.write_str("remote_link_unreachable"),
            ExitReason::Unreachable => f.write_str("unreachable"),
        }
    }
}

/// `Spawned → Running → Terminating → Down(reason)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Spawned,
    Running,
    Terminating,
    Down(ExitReason),
}

/// Exit signal delivered to linked actors and by [`send_exit`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExitMsg {
    /// `None` for anonymous exits sent from outside any actor.
    pub source: Option<ActorAddr>,
    pub reason: ExitReason,
}

/// Down notification delivered to monitoring actors.
#[derive(Debug, Clone, PartialEq)]
pub struct DownMsg {
    pub source: ActorAddr,
    pub reason: ExitReason,
}

/// A panic caught inside a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub message: String,
}

impl Fault {
    pub(crate) fn from_panic(panic: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = panic.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Fault { message }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault: {}", self.message)
    }
}

/// Verdict of an error, exception or exit handler.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultPolicy {
    Resume,
    Terminate(ExitReason),
}

impl FaultPolicy {
    pub(crate) fn into_exit(self) -> Option<ExitReason> {
        match self {
            FaultPolicy::Resume => None,
            FaultPolicy::Terminate(reason) => Some(reason),
        }
    }
}

/// Sends an anonymous exit signal. High priority, so it overtakes queued work.
pub fn send_exit(target: &ActorHandle, reason: ExitReason) -> bool {
    debug!(target = %target.addr(), %reason, "send_exit");
    target.enqueue(
        Envelope::new(None, Message::new(ExitMsg { source: None, reason }))
            .with_priority(Priority::High),
    )
}

/// Restart decision attached to a supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RestartPolicy {
    /// Always restart.
    Permanent,
    /// Restart only after an abnormal exit.
    #[default]
    Transient,
    /// Never restart.
    Temporary,
}

impl RestartPolicy {
    pub fn should_restart(&self, reason: &ExitReason) -> bool {
        match self {
            RestartPolicy::Permanent => true,
            RestartPolicy::Transient => !reason.is_normal(),
            RestartPolicy::Temporary => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisedChild {
    pub handle: ActorHandle,
    pub policy: RestartPolicy,
}

/// Supervised-children set for the spawn-and-monitor pattern.
///
/// The supervisor actor owns one of these in its state and forwards its down
/// notifications to [`Supervisor::on_down`].
#[derive(Debug, Default)]
pub struct Supervisor {
    children: HashMap<ActorAddr, SupervisedChild>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `child`, monitors it, and records it.
    pub fn spawn_child<S: 'static, A: Actor>(
        &mut self,
        ctx: &mut Context<S>,
        child: A,
        policy: RestartPolicy,
    ) -> ActorHandle {
        let handle = ctx.spawn_monitored(child);
        info!(supervisor = %ctx.addr(), child = %handle.addr(), ?policy, "Child spawned");
        self.children.insert(
            handle.addr(),
            SupervisedChild {
                handle: handle.clone(),
                policy,
            },
        );
        handle
    }

    /// Removes the child a down notification refers to. Returns `None` if the
    /// source was not supervised here.
    pub fn on_down(&mut self, down: &DownMsg) -> Option<SupervisedChild> {
        let child = self.children.remove(&down.source)?;
        info!(
            child = %down.source,
            reason = %down.reason,
            restart = child.policy.should_restart(&down.reason),
            remaining = self.children.len(),
            "Child down"
        );
        Some(child)
    }

    pub fn contains(&self, addr: &ActorAddr) -> bool {
        self.children.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> impl Iterator<Item = &ActorHandle> {
        self.children.values().map(|child| &child.handle)
    }

    /// Sends `reason` to every child. Their down notifications still arrive.
    pub fn shutdown_children(&self, reason: ExitReason) {
        for child in self.children.values() {
            send_exit(&child.handle, reason.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_policies() {
        assert!(RestartPolicy::Permanent.should_restart(&ExitReason::Normal));
        assert!(!RestartPolicy::Transient.should_restart(&ExitReason::Normal));
        assert!(RestartPolicy::Transient.should_restart(&ExitReason::UserShutdown));
        assert!(!RestartPolicy::Temporary.should_restart(&ExitReason::Kill));
    }

    #[test]
    fn fault_from_panic_payloads() {
        assert_eq!(Fault::from_panic(Box::new("boom")).message, "boom");
        assert_eq!(Fault::from_panic(Box::new(String::from("bang"))).message, "bang");
        assert_eq!(Fault::from_panic(Box::new(42)).message, "unknown panic");
    }

    #[test]
    fn exit_reason_display() {
        assert_eq!(ExitReason::UserShutdown.to_string(), "user_shutdown");
        assert_eq!(
            ExitReason::UnhandledError("x".into()).to_string(),
            "unhandled_error(x)"
        );
    }
}
