//! # Troupe Errors
//!
//! Structured error conditions surfaced by the runtime. Lease contention and
//! mailbox backpressure are deliberately absent: both are normal outcomes
//! (`Ok(None)` from a lease acquire, a suspended enqueue) rather than failures.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::actor::ActorFault;
use crate::id::ResourceIdentifier;

/// Result alias used across the runtime.
pub type Result<T, E = TroupeError> = std::result::Result<T, E>;

/// # Remote Exception
///
/// Fault metadata carried across a transport when a remote handler fails.
/// It reconstructs the original fault's identity on the calling side so a
/// remote failure can be told apart from a failure to reach the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteException {
    pub message: String,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl From<ActorFault> for RemoteException {
    fn from(fault: ActorFault) -> Self {
        Self {
            message: fault.message,
            type_name: fault.type_name,
            log: fault.log,
        }
    }
}

impl From<RemoteException> for ActorFault {
    fn from(exception: RemoteException) -> Self {
        ActorFault {
            message: exception.message,
            type_name: exception.type_name,
            log: exception.log,
        }
    }
}

/// # Troupe Error
///
/// Errors that can occur while resolving, transporting or executing an
/// invocation, or while managing the runtime's lifecycle.
#[derive(Debug, Error)]
pub enum TroupeError {
    /// No instance could be resolved for a name/key, even after waiting for
    /// the routing table to populate.
    #[error("No route to {target}")]
    Routing { target: String },

    /// The resolved address uses a scheme nobody registered a transport for.
    #[error("No transport registered for scheme '{0}'")]
    NoProviderForScheme(String),

    /// The remote instance could not be reached or its reply could not be read.
    #[error("Transport error calling {address}: {message}")]
    Transport {
        address: ResourceIdentifier,
        message: String,
    },

    /// The remote handler itself failed.
    #[error("Remote fault: {0}")]
    RemoteFault(RemoteException),

    /// The target actor, service or method is unknown at the destination.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No actor type is registered under this name on the local host.
    #[error("Actor type not registered: {0}")]
    ActorNotRegistered(String),

    /// The actor could not be constructed or its activation hook failed.
    #[error("Activation of {actor} failed: {message}")]
    ActivationFailed { actor: String, message: String },

    /// Deactivating an actor failed; the instance is gone either way.
    #[error("Stopping {actor} failed: {message}")]
    StopFailed { actor: String, message: String },

    /// The host has already been shut down.
    #[error("Host has been disposed")]
    HostDisposed,

    /// The actor's inbox no longer accepts messages.
    #[error("Mailbox closed for {0}")]
    MailboxClosed(String),

    /// The message was queued but the activation went away without replying.
    /// The handler may or may not have run, so this is never retried.
    #[error("Activation {0} stopped before replying")]
    Unanswered(String),

    /// The caller's cancellation signal fired before the call completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Arguments or results could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid resource identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The lease storage collaborator failed.
    #[error("Lease store error: {0}")]
    Lease(String),
}

impl TroupeError {
    pub fn routing(target: impl Into<String>) -> Self {
        Self::Routing {
            target: target.into(),
        }
    }

    pub fn transport(address: &ResourceIdentifier, message: impl fmt::Display) -> Self {
        Self::Transport {
            address: address.clone(),
            message: message.to_string(),
        }
    }

    /// Returns true for failures a caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Routing { .. })
    }
}

impl From<serde_json::Error> for TroupeError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<ActorFault> for TroupeError {
    fn from(fault: ActorFault) -> Self {
        Self::RemoteFault(fault.into())
    }
}
