use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ActorHost, ServiceHost};
use crate::errors::Result;
use crate::id::ResourceIdentifier;
use crate::transport::{InboundCall, InvocationSink, InvocationTarget};

/// Routes calls arriving over a transport into this process's hosts.
#[derive(Debug, Clone)]
pub struct HostedEndpoint {
    actors: Arc<ActorHost>,
    services: Arc<ServiceHost>,
    local_address: ResourceIdentifier,
}

impl HostedEndpoint {
    pub fn new(
        actors: Arc<ActorHost>,
        services: Arc<ServiceHost>,
        local_address: ResourceIdentifier,
    ) -> Self {
        Self {
            actors,
            services,
            local_address,
        }
    }

    pub fn local_address(&self) -> &ResourceIdentifier {
        &self.local_address
    }

    pub async fn handle(&self, call: InboundCall, cancel: &CancellationToken) -> Result<Option<Value>> {
        debug!("Inbound {}.{}", call.target, call.method);
        match call.target {
            InvocationTarget::Actor { actor_name, id } => {
                let sender = call.sender.unwrap_or_else(|| self.local_address.clone());
                self.actors
                    .invoke(
                        &actor_name,
                        &id,
                        &call.method,
                        call.args,
                        sender,
                        call.wait_for_completion,
                        cancel,
                    )
                    .await
            }
            InvocationTarget::Service { service_name } => {
                self.services
                    .invoke(&service_name, &call.method, call.args, cancel)
                    .await
            }
        }
    }
}

impl InvocationSink for HostedEndpoint {
    fn deliver(
        &self,
        call: InboundCall,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Option<Value>>> {
        Box::pin(async move { self.handle(call, &cancel).await })
    }
}
