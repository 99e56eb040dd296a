//! # Dispatch
//!
//! The client side of location transparency. A [`Dispatcher`] resolves a
//! logical actor or service to an instance through the router, then either
//! calls straight into the local host (no serialization) or hands the call
//! to the transport registered for the instance address's scheme.
//!
//! ```rust,no_run
//! # async fn demo(dispatcher: troupe::Dispatcher) -> troupe::Result<()> {
//! let cart = dispatcher.actor("shop", "Cart", "1");
//! let status: String = cart.call("AddProduct", troupe::args!["sku-1", 2]).await?;
//! cart.send("Touch", troupe::args![]).await?;
//! # Ok(())
//! # }
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::actor::Args;
use crate::errors::{Result, TroupeError};
use crate::host::{ActorHost, ServiceHost};
use crate::metrics::RuntimeMetrics;
use crate::routing::{ConsistentHashRouter, ResourceInstance};
use crate::transport::{InvocationRequest, InvocationTarget, TransportRegistry};

/// Per-call knobs. Neither field ever leaves the process.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub cancel: Option<CancellationToken>,
    /// Overrides the transport's request timeout for remote calls.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct DispatcherInner {
    router: ConsistentHashRouter,
    transports: Arc<TransportRegistry>,
    actors: Arc<ActorHost>,
    services: Arc<ServiceHost>,
    metrics: Arc<RuntimeMetrics>,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

/// A non-owning handle to a [`Dispatcher`], held by activations so they do
/// not keep the runtime alive.
#[derive(Debug, Clone)]
pub struct WeakDispatcher {
    inner: Weak<DispatcherInner>,
}

impl WeakDispatcher {
    pub fn upgrade(&self) -> Option<Dispatcher> {
        self.inner.upgrade().map(|inner| Dispatcher { inner })
    }
}

impl Dispatcher {
    pub fn new(
        router: ConsistentHashRouter,
        transports: Arc<TransportRegistry>,
        actors: Arc<ActorHost>,
        services: Arc<ServiceHost>,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                router,
                transports,
                actors,
                services,
                metrics,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn router(&self) -> &ConsistentHashRouter {
        &self.inner.router
    }

    pub fn actor(
        &self,
        service_name: impl Into<String>,
        actor_name: impl Into<String>,
        id: impl Into<String>,
    ) -> ActorProxy {
        ActorProxy {
            dispatcher: self.clone(),
            service_name: service_name.into(),
            actor_name: actor_name.into(),
            id: id.into(),
        }
    }

    pub fn service(&self, service_name: impl Into<String>) -> ServiceProxy {
        ServiceProxy {
            dispatcher: self.clone(),
            service_name: service_name.into(),
        }
    }

    /// Build a typed client for actor `id`.
    pub fn actor_client<C: ActorInterface>(&self, id: impl Into<String>) -> C {
        C::from_proxy(self.actor(C::SERVICE, C::ACTOR, id))
    }

    /// Invoke a method on an actor. `Ok(None)` means the call completed
    /// without a value, or was fire-and-forget.
    #[allow(clippy::too_many_arguments)]
    pub async fn invoke_actor(
        &self,
        service_name: &str,
        actor_name: &str,
        id: &str,
        method: &str,
        args: Args,
        wait_for_completion: bool,
        options: CallOptions,
    ) -> Result<Option<Value>> {
        let instance = self.inner.router.resolve(service_name, actor_name, id).await?;
        let cancel = options.cancel.clone().unwrap_or_else(CancellationToken::new);

        if instance.is_local && self.inner.actors.hosts_actor_type(actor_name) {
            self.inner.metrics.record_local_dispatch();
            debug!("{}#{}.{} dispatched locally", actor_name, id, method);
            let sender = self.inner.actors.settings().address.clone();
            return self
                .inner
                .actors
                .invoke(actor_name, id, method, args, sender, wait_for_completion, &cancel)
                .await;
        }

        let target = InvocationTarget::actor(actor_name, id);
        self.invoke_remote(instance, target, method, args, wait_for_completion, options, cancel)
            .await
    }

    /// Invoke a method on a stateless service.
    pub async fn invoke_service(
        &self,
        service_name: &str,
        method: &str,
        args: Args,
        wait_for_completion: bool,
        options: CallOptions,
    ) -> Result<Option<Value>> {
        let instance = self.inner.router.resolve_service(service_name).await?;
        let cancel = options.cancel.clone().unwrap_or_else(CancellationToken::new);

        if instance.is_local && self.inner.services.hosts_service(service_name) {
            self.inner.metrics.record_local_dispatch();
            debug!("{}.{} dispatched locally", service_name, method);
            if !wait_for_completion {
                let services = self.inner.services.clone();
                let (service_name, method) = (service_name.to_string(), method.to_string());
                tokio::spawn(async move {
                    if let Err(e) = services.invoke(&service_name, &method, args, &cancel).await {
                        debug!("Fire-and-forget {}.{} failed: {}", service_name, method, e);
                    }
                });
                return Ok(None);
            }
            return self
                .inner
                .services
                .invoke(service_name, method, args, &cancel)
                .await;
        }

        let target = InvocationTarget::service(service_name);
        self.invoke_remote(instance, target, method, args, wait_for_completion, options, cancel)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn invoke_remote(
        &self,
        instance: ResourceInstance,
        target: InvocationTarget,
        method: &str,
        args: Args,
        wait_for_completion: bool,
        options: CallOptions,
        cancel: CancellationToken,
    ) -> Result<Option<Value>> {
        let transport = self.inner.transports.get(instance.address.scheme())?;
        self.inner.metrics.record_remote_dispatch();
        debug!(
            "{}.{} dispatched to {} at {}",
            target, method, instance.instance_id, instance.address
        );

        let request = InvocationRequest {
            address: instance.address,
            target,
            method: method.to_string(),
            args,
            wait_for_completion,
            timeout: options.timeout,
        };
        transport.invoke(request, cancel).await
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("router", &self.inner.router)
            .field("transports", &self.inner.transports)
            .finish()
    }
}

fn decode<R: DeserializeOwned>(value: Option<Value>) -> Result<R> {
    serde_json::from_value(value.unwrap_or(Value::Null)).map_err(TroupeError::from)
}

/// A logical handle on one actor, valid whether or not it is currently
/// activated anywhere.
#[derive(Debug, Clone)]
pub struct ActorProxy {
    dispatcher: Dispatcher,
    service_name: String,
    actor_name: String,
    id: String,
}

impl ActorProxy {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn actor_name(&self) -> &str {
        &self.actor_name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Call `method` and decode its result.
    pub async fn call<R: DeserializeOwned>(&self, method: &str, args: Args) -> Result<R> {
        self.call_with(method, args, CallOptions::default()).await
    }

    pub async fn call_with<R: DeserializeOwned>(
        &self,
        method: &str,
        args: Args,
        options: CallOptions,
    ) -> Result<R> {
        decode(self.invoke_raw(method, args, true, options).await?)
    }

    /// Call `method` and wait for it to finish, ignoring any value.
    pub async fn call_void(&self, method: &str, args: Args) -> Result<()> {
        self.invoke_raw(method, args, true, CallOptions::default())
            .await
            .map(|_| ())
    }

    /// Enqueue `method` without waiting for it to run.
    pub async fn send(&self, method: &str, args: Args) -> Result<()> {
        self.invoke_raw(method, args, false, CallOptions::default())
            .await
            .map(|_| ())
    }

    pub async fn invoke_raw(
        &self,
        method: &str,
        args: Args,
        wait_for_completion: bool,
        options: CallOptions,
    ) -> Result<Option<Value>> {
        self.dispatcher
            .invoke_actor(
                &self.service_name,
                &self.actor_name,
                &self.id,
                method,
                args,
                wait_for_completion,
                options,
            )
            .await
    }
}

#[derive(Debug, Clone)]
pub struct ServiceProxy {
    dispatcher: Dispatcher,
    service_name: String,
}

impl ServiceProxy {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub async fn call<R: DeserializeOwned>(&self, method: &str, args: Args) -> Result<R> {
        self.call_with(method, args, CallOptions::default()).await
    }

    pub async fn call_with<R: DeserializeOwned>(
        &self,
        method: &str,
        args: Args,
        options: CallOptions,
    ) -> Result<R> {
        decode(self.invoke_raw(method, args, true, options).await?)
    }

    pub async fn call_void(&self, method: &str, args: Args) -> Result<()> {
        self.invoke_raw(method, args, true, CallOptions::default())
            .await
            .map(|_| ())
    }

    pub async fn send(&self, method: &str, args: Args) -> Result<()> {
        self.invoke_raw(method, args, false, CallOptions::default())
            .await
            .map(|_| ())
    }

    pub async fn invoke_raw(
        &self,
        method: &str,
        args: Args,
        wait_for_completion: bool,
        options: CallOptions,
    ) -> Result<Option<Value>> {
        self.dispatcher
            .invoke_service(&self.service_name, method, args, wait_for_completion, options)
            .await
    }
}

/// A typed client for one actor type.
///
/// ```rust
/// use troupe::{ActorInterface, ActorProxy, Result};
///
/// pub struct CartClient(ActorProxy);
///
/// impl ActorInterface for CartClient {
///     const SERVICE: &'static str = "shop";
///     const ACTOR: &'static str = "Cart";
///
///     fn from_proxy(proxy: ActorProxy) -> Self {
///         Self(proxy)
///     }
/// }
///
/// impl CartClient {
///     pub async fn add_product(&self, sku: &str, quantity: u32) -> Result<String> {
///         self.0.call("AddProduct", troupe::args![sku, quantity]).await
///     }
/// }
/// ```
pub trait ActorInterface: Sized {
    const SERVICE: &'static str;
    const ACTOR: &'static str;

    fn from_proxy(proxy: ActorProxy) -> Self;
}
