//! # Transports
//!
//! A transport turns a resolved invocation into a request to the instance at
//! a [`ResourceIdentifier`] and maps the reply back. Transports are selected
//! by the address scheme through a [`TransportRegistry`]; the runtime never
//! hardcodes a backend.
//!
//! The receiving side is an [`InvocationSink`]: whatever accepts inbound
//! calls for the local hosts (the HTTP endpoint, or an in-process network
//! binding in tests).

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::actor::Args;
use crate::errors::Result;
use crate::id::ResourceIdentifier;

pub mod http;
pub mod local;
pub mod registry;
pub mod wire;

pub use http::HttpTransport;
pub use local::{InProcessNetwork, InProcessTransport, LOCAL_SCHEME};
pub use registry::TransportRegistry;

/// What an invocation is addressed to, independent of where it runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvocationTarget {
    Actor { actor_name: String, id: String },
    Service { service_name: String },
}

impl InvocationTarget {
    pub fn actor(actor_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Actor {
            actor_name: actor_name.into(),
            id: id.into(),
        }
    }

    pub fn service(service_name: impl Into<String>) -> Self {
        Self::Service {
            service_name: service_name.into(),
        }
    }
}

impl fmt::Display for InvocationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actor { actor_name, id } => write!(f, "{}#{}", actor_name, id),
            Self::Service { service_name } => f.write_str(service_name),
        }
    }
}

/// A resolved outbound call.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub address: ResourceIdentifier,
    pub target: InvocationTarget,
    pub method: String,
    pub args: Args,
    pub wait_for_completion: bool,
    /// Overrides the transport's default request timeout.
    pub timeout: Option<Duration>,
}

/// Scheme-specific strategy for executing a resolved remote invocation.
///
/// Implementations return `Ok(None)` for no-content replies and map remote
/// handler failures to [`TroupeError::RemoteFault`](crate::errors::TroupeError::RemoteFault),
/// keeping them distinct from failures to reach the remote.
pub trait Transport: Send + Sync {
    fn invoke(
        &self,
        request: InvocationRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Option<Value>>>;
}

/// An inbound call arriving from a transport.
#[derive(Debug, Clone)]
pub struct InboundCall {
    pub target: InvocationTarget,
    pub method: String,
    pub args: Args,
    pub sender: Option<ResourceIdentifier>,
    pub wait_for_completion: bool,
}

/// Accepts inbound calls on behalf of this process's hosts.
pub trait InvocationSink: Send + Sync {
    fn deliver(
        &self,
        call: InboundCall,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Option<Value>>>;
}
