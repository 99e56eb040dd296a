use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::put,
    Json, Router,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use troupe::transport::wire::{
    FaultEnvelope, InvokeQuery, ReturnEnvelope, BAD_REQUEST_FAULT, NOT_FOUND_FAULT, UNAVAILABLE_FAULT,
};
use troupe::{
    Args, InboundCall, InvocationSink, InvocationTarget, RemoteException, ResourceIdentifier,
    TroupeError,
};

#[derive(Clone)]
struct ServerState {
    sink: Arc<dyn InvocationSink>,
}

/// Routes for the invocation endpoint, bound to `sink`.
pub fn router(sink: Arc<dyn InvocationSink>) -> Router {
    Router::new()
        .route("/actors/{actor}/{id}/{method}", put(invoke_actor))
        .route("/services/{service}/{method}", put(invoke_service))
        .with_state(ServerState { sink })
}

/// Serve the endpoint on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    sink: Arc<dyn InvocationSink>,
    shutdown: CancellationToken,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    info!("Invocation endpoint listening on {}", local_addr);
    axum::serve(listener, router(sink))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Invocation endpoint on {} stopped", local_addr);
    Ok(())
}

/// A running endpoint on its own task.
#[derive(Debug)]
pub struct InvocationServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl InvocationServer {
    /// Bind `addr` (port 0 picks a free port) and start serving.
    pub async fn bind(addr: &str, sink: Arc<dyn InvocationSink>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Self::from_listener(listener, sink)
    }

    /// Serve on an already bound listener, e.g. one whose port had to be
    /// known before the runtime was built.
    pub fn from_listener(listener: TcpListener, sink: Arc<dyn InvocationSink>) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = serve(listener, sink, token).await {
                error!("Invocation endpoint error: {}", e);
            }
        });
        Ok(Self {
            local_addr,
            shutdown,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The address peers should advertise for this endpoint.
    pub fn address(&self) -> Result<ResourceIdentifier> {
        Ok(ResourceIdentifier::new("http", self.local_addr.to_string())?)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.handle.await?;
        Ok(())
    }
}

async fn invoke_actor(
    State(state): State<ServerState>,
    Path((actor, id, method)): Path<(String, String, String)>,
    Query(query): Query<InvokeQuery>,
    body: Bytes,
) -> Response {
    dispatch(state, InvocationTarget::actor(actor, id), method, query, body).await
}

async fn invoke_service(
    State(state): State<ServerState>,
    Path((service, method)): Path<(String, String)>,
    Query(query): Query<InvokeQuery>,
    body: Bytes,
) -> Response {
    dispatch(state, InvocationTarget::service(service), method, query, body).await
}

async fn dispatch(
    state: ServerState,
    target: InvocationTarget,
    method: String,
    query: InvokeQuery,
    body: Bytes,
) -> Response {
    let args = match parse_args(&body) {
        Ok(args) => args,
        Err(e) => {
            debug!("Rejecting {}.{}: {}", target, method, e);
            return fault(StatusCode::BAD_REQUEST, BAD_REQUEST_FAULT, e.to_string());
        }
    };

    let oneway = query.oneway;
    let call = InboundCall {
        target: target.clone(),
        method: method.clone(),
        args,
        sender: None,
        wait_for_completion: !oneway,
    };
    // A client disconnect drops this future and abandons the call.
    match state.sink.deliver(call, CancellationToken::new()).await {
        Ok(_) if oneway => StatusCode::ACCEPTED.into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Ok(Some(ret)) => (StatusCode::OK, Json(ReturnEnvelope { ret })).into_response(),
        Err(e) => error_response(&target, &method, e),
    }
}

fn parse_args(body: &[u8]) -> serde_json::Result<Args> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Args::empty());
    }
    serde_json::from_slice(body)
}

fn fault(status: StatusCode, type_name: &str, message: String) -> Response {
    let envelope = FaultEnvelope::new(RemoteException {
        message,
        type_name: type_name.to_string(),
        log: None,
    });
    (status, Json(envelope)).into_response()
}

fn error_response(target: &InvocationTarget, method: &str, error: TroupeError) -> Response {
    match error {
        TroupeError::RemoteFault(exception) => {
            let status = if exception.type_name == "MethodNotFound" {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(FaultEnvelope::new(exception))).into_response()
        }
        e @ (TroupeError::NotFound(_) | TroupeError::ActorNotRegistered(_)) => {
            fault(StatusCode::NOT_FOUND, NOT_FOUND_FAULT, e.to_string())
        }
        e @ (TroupeError::HostDisposed | TroupeError::MailboxClosed(_) | TroupeError::Cancelled) => {
            fault(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_FAULT, e.to_string())
        }
        e => {
            warn!("{}.{} failed: {}", target, method, e);
            fault(StatusCode::INTERNAL_SERVER_ERROR, "TroupeError", e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_means_no_arguments() {
        assert_eq!(parse_args(b"").unwrap(), Args::empty());
        assert_eq!(parse_args(b" \n").unwrap(), Args::empty());
        assert_eq!(parse_args(br#"["a", 1]"#).unwrap().len(), 2);
        assert!(parse_args(br#"{"not": "an array"}"#).is_err());
    }

    #[test]
    fn test_error_statuses() {
        let target = InvocationTarget::actor("Cart", "1");
        let status = |e: TroupeError| error_response(&target, "AddProduct", e).status();

        assert_eq!(status(TroupeError::ActorNotRegistered("Cart".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(TroupeError::RemoteFault(RemoteException {
                message: "Cart has no method named 'Nope'".into(),
                type_name: "MethodNotFound".into(),
                log: None,
            })),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(TroupeError::RemoteFault(RemoteException {
                message: "sku must not be empty".into(),
                type_name: "InvalidSku".into(),
                log: None,
            })),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status(TroupeError::HostDisposed), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(TroupeError::ActivationFailed {
                actor: "Cart#1".into(),
                message: "boom".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
