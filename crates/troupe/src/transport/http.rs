//! # HTTP Transport
//!
//! Sends invocations to a remote endpoint as
//! `PUT {scheme}://{resource}/actors/{actor}/{id}/{method}` or
//! `PUT {scheme}://{resource}/services/{service}/{method}` with the
//! arguments as a JSON array body. See [`wire`](super::wire) for the reply
//! shapes.

use futures::future::BoxFuture;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::wire::{
    FaultEnvelope, ReturnEnvelope, ACTORS_SEGMENT, BAD_REQUEST_FAULT, NOT_FOUND_FAULT, ONEWAY_PARAM,
    SERVICES_SEGMENT,
};
use super::{InvocationRequest, InvocationTarget, Transport};
use crate::errors::{Result, TroupeError};
use crate::id::ResourceIdentifier;

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpTransport {
    pub fn new(default_timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), default_timeout)
    }

    pub fn with_client(client: reqwest::Client, default_timeout: Duration) -> Self {
        Self {
            client,
            default_timeout,
        }
    }

    /// Build the endpoint URL for `request`. Path segments are percent-encoded.
    pub fn url_for(request: &InvocationRequest) -> Result<Url> {
        let address = &request.address;
        let mut url = Url::parse(&address.to_string())
            .map_err(|e| TroupeError::transport(address, format!("invalid address: {}", e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| TroupeError::transport(address, "address cannot carry a path"))?;
            segments.pop_if_empty();
            match &request.target {
                InvocationTarget::Actor { actor_name, id } => {
                    segments.extend([ACTORS_SEGMENT, actor_name.as_str(), id.as_str(), request.method.as_str()]);
                }
                InvocationTarget::Service { service_name } => {
                    segments.extend([SERVICES_SEGMENT, service_name.as_str(), request.method.as_str()]);
                }
            }
        }
        if !request.wait_for_completion {
            url.query_pairs_mut().append_pair(ONEWAY_PARAM, "true");
        }
        Ok(url)
    }

    async fn send(&self, request: InvocationRequest) -> Result<Option<Value>> {
        let url = Self::url_for(&request)?;
        let address = request.address.clone();
        debug!("PUT {} ({})", url, request.target);

        let response = self
            .client
            .put(url)
            .timeout(request.timeout.unwrap_or(self.default_timeout))
            .json(&request.args)
            .send()
            .await
            .map_err(|e| TroupeError::transport(&address, e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TroupeError::transport(&address, e))?;

        decode_reply(&address, status, &body)
    }
}

/// Map an endpoint reply onto the invocation result.
fn decode_reply(address: &ResourceIdentifier, status: StatusCode, body: &[u8]) -> Result<Option<Value>> {
    match status {
        StatusCode::NO_CONTENT => Ok(None),
        StatusCode::OK | StatusCode::ACCEPTED if body.is_empty() => Ok(None),
        StatusCode::OK => {
            let envelope: ReturnEnvelope = serde_json::from_slice(body)
                .map_err(|e| TroupeError::transport(address, format!("invalid reply body: {}", e)))?;
            Ok(match envelope.ret {
                Value::Null => None,
                value => Some(value),
            })
        }
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
            match serde_json::from_slice::<FaultEnvelope>(body) {
                Ok(FaultEnvelope { exception })
                    if exception.type_name != NOT_FOUND_FAULT
                        && exception.type_name != BAD_REQUEST_FAULT =>
                {
                    // Raised by the handler side, e.g. an unknown method.
                    Err(TroupeError::RemoteFault(exception))
                }
                Ok(FaultEnvelope { exception }) => Err(TroupeError::NotFound(exception.message)),
                Err(_) => Err(TroupeError::NotFound(format!("{} returned {}", address, status))),
            }
        }
        StatusCode::SERVICE_UNAVAILABLE => {
            let message = match serde_json::from_slice::<FaultEnvelope>(body) {
                Ok(fault) => fault.exception.message,
                Err(_) => "endpoint unavailable".to_string(),
            };
            Err(TroupeError::transport(address, message))
        }
        _ => match serde_json::from_slice::<FaultEnvelope>(body) {
            Ok(fault) => Err(TroupeError::RemoteFault(fault.exception)),
            Err(_) => Err(TroupeError::transport(
                address,
                format!("unexpected status {}", status),
            )),
        },
    }
}

impl Transport for HttpTransport {
    fn invoke(
        &self,
        request: InvocationRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Option<Value>>> {
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TroupeError::Cancelled),
                result = self.send(request) => result,
            }
        })
    }
}
