//! # In-process transport
//!
//! Addresses of the form `local://{resource}` resolve to sinks bound in an
//! [`InProcessNetwork`]. Several runtimes sharing one network behave like a
//! cluster: calls between them take the full remote path (routing, transport
//! lookup, inbound dispatch) without opening sockets.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{InboundCall, InvocationRequest, InvocationSink, Transport};
use crate::errors::{Result, TroupeError};

pub const LOCAL_SCHEME: &str = "local";

/// Resource name to sink bindings shared by every runtime in a process.
#[derive(Default)]
pub struct InProcessNetwork {
    sinks: RwLock<HashMap<String, Arc<dyn InvocationSink>>>,
}

impl InProcessNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bind(&self, resource: impl Into<String>, sink: Arc<dyn InvocationSink>) {
        let resource = resource.into();
        debug!("Binding in-process endpoint {}", resource);
        self.sinks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(resource, sink);
    }

    pub fn unbind(&self, resource: &str) -> bool {
        self.sinks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(resource)
            .is_some()
    }

    pub fn lookup(&self, resource: &str) -> Option<Arc<dyn InvocationSink>> {
        self.sinks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(resource)
            .cloned()
    }
}

impl std::fmt::Debug for InProcessNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sinks = self
            .sinks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut bound: Vec<&String> = sinks.keys().collect();
        bound.sort();
        f.debug_struct("InProcessNetwork").field("bound", &bound).finish()
    }
}

#[derive(Debug, Clone)]
pub struct InProcessTransport {
    network: Arc<InProcessNetwork>,
    default_timeout: Duration,
}

impl InProcessTransport {
    pub fn new(network: Arc<InProcessNetwork>, default_timeout: Duration) -> Self {
        Self {
            network,
            default_timeout,
        }
    }
}

impl Transport for InProcessTransport {
    fn invoke(
        &self,
        request: InvocationRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Option<Value>>> {
        Box::pin(async move {
            let address = request.address;
            let sink = self
                .network
                .lookup(address.resource())
                .ok_or_else(|| TroupeError::transport(&address, "no endpoint bound"))?;

            let call = InboundCall {
                target: request.target,
                method: request.method,
                args: request.args,
                sender: None,
                wait_for_completion: request.wait_for_completion,
            };
            let timeout = request.timeout.unwrap_or(self.default_timeout);

            match tokio::time::timeout(timeout, sink.deliver(call, cancel)).await {
                Ok(result) => result,
                Err(_) => Err(TroupeError::transport(
                    &address,
                    format!("no reply within {:?}", timeout),
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Args;
    use crate::id::ResourceIdentifier;
    use crate::transport::InvocationTarget;
    use serde_json::json;

    struct Greeter;

    impl InvocationSink for Greeter {
        fn deliver(
            &self,
            call: InboundCall,
            _cancel: CancellationToken,
        ) -> BoxFuture<'_, Result<Option<Value>>> {
            Box::pin(async move {
                match call.method.as_str() {
                    "Hello" => Ok(Some(json!(format!("hello {}", call.target)))),
                    "Slow" => {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(None)
                    }
                    other => Err(TroupeError::NotFound(other.to_string())),
                }
            })
        }
    }

    fn request(resource: &str, method: &str) -> InvocationRequest {
        InvocationRequest {
            address: ResourceIdentifier::new(LOCAL_SCHEME, resource).unwrap(),
            target: InvocationTarget::actor("Cart", "1"),
            method: method.into(),
            args: Args::empty(),
            wait_for_completion: true,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_routes_to_bound_sink() {
        let network = InProcessNetwork::new();
        network.bind("node-a", Arc::new(Greeter));
        let transport = InProcessTransport::new(network.clone(), Duration::from_secs(1));

        let reply = transport
            .invoke(request("node-a", "Hello"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, Some(json!("hello Cart#1")));

        let err = transport
            .invoke(request("node-b", "Hello"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TroupeError::Transport { .. }));

        assert!(network.unbind("node-a"));
        assert!(network.lookup("node-a").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_is_a_transport_error() {
        let network = InProcessNetwork::new();
        network.bind("node-a", Arc::new(Greeter));
        let transport = InProcessTransport::new(network, Duration::from_secs(2));

        let err = transport
            .invoke(request("node-a", "Slow"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TroupeError::Transport { .. }));
    }
}
