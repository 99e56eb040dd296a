//! # Service Host
//!
//! Stateless services addressed by name only. Unlike actors, a service has
//! no mailbox: invocations run concurrently against a shared instance.

use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::actor::{ActorFault, Args, MethodFuture};
use crate::errors::{Result, TroupeError};
use crate::metrics::RuntimeMetrics;

/// A service method: a plain function over `&S`.
pub type ServiceMethod<S> = for<'a> fn(&'a S, Args) -> MethodFuture<'a>;

pub trait Service: Send + Sync + 'static {
    fn register_methods(table: &mut ServiceTable<Self>)
    where
        Self: Sized;
}

pub struct ServiceTable<S> {
    methods: HashMap<String, ServiceMethod<S>>,
}

impl<S> ServiceTable<S> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, method: ServiceMethod<S>) -> &mut Self {
        self.methods.insert(name.into(), method);
        self
    }

    pub fn get(&self, name: &str) -> Option<ServiceMethod<S>> {
        self.methods.get(name).copied()
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

impl<S> Default for ServiceTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

trait ServiceInvoker: Send + Sync {
    fn call<'a>(&'a self, method: &str, args: Args) -> Option<MethodFuture<'a>>;
}

struct Registration<S: Service> {
    service: S,
    table: ServiceTable<S>,
}

impl<S: Service> ServiceInvoker for Registration<S> {
    fn call<'a>(&'a self, method: &str, args: Args) -> Option<MethodFuture<'a>> {
        self.table.get(method).map(|handler| handler(&self.service, args))
    }
}

pub struct ServiceHost {
    services: RwLock<HashMap<String, Arc<dyn ServiceInvoker>>>,
    metrics: Arc<RuntimeMetrics>,
}

impl ServiceHost {
    pub fn new(metrics: Arc<RuntimeMetrics>) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    pub fn register<S: Service>(&self, service_name: impl Into<String>, service: S) -> Result<()> {
        let service_name = service_name.into();
        let mut table = ServiceTable::new();
        S::register_methods(&mut table);

        let mut services = self
            .services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if services.contains_key(&service_name) {
            return Err(TroupeError::Config(format!(
                "service '{}' is already registered",
                service_name
            )));
        }
        info!(
            "Registered service {} with methods {:?}",
            service_name,
            table.method_names()
        );
        services.insert(service_name, Arc::new(Registration { service, table }));
        Ok(())
    }

    pub fn hosts_service(&self, service_name: &str) -> bool {
        self.services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(service_name)
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Run `method` on the named service. A `null` result is reported as
    /// `None`.
    pub async fn invoke(
        &self,
        service_name: &str,
        method: &str,
        args: Args,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let service = self
            .services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(service_name)
            .cloned()
            .ok_or_else(|| TroupeError::NotFound(format!("service '{}'", service_name)))?;

        self.metrics.record_invocation();
        let Some(call) = service.call(method, args) else {
            self.metrics.record_fault();
            return Err(ActorFault::method_not_found(service_name, method).into());
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TroupeError::Cancelled),
            result = AssertUnwindSafe(call).catch_unwind() => {
                result.unwrap_or_else(|panic| Err(ActorFault::from_panic(panic)))
            }
        };

        match result {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(fault) => {
                self.metrics.record_fault();
                debug!("Service {}.{} faulted: {}", service_name, method, fault);
                Err(fault.into())
            }
        }
    }
}

impl fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHost")
            .field("services", &self.service_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Pricing {
        quotes: AtomicU64,
    }

    fn quote<'a>(pricing: &'a Pricing, args: Args) -> MethodFuture<'a> {
        Box::pin(async move {
            let sku: String = args.get(0)?;
            pricing.quotes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!({ "sku": sku, "cents": 499 }))
        })
    }

    fn ping<'a>(_pricing: &'a Pricing, _args: Args) -> MethodFuture<'a> {
        Box::pin(async move { Ok(Value::Null) })
    }

    fn crash<'a>(_pricing: &'a Pricing, _args: Args) -> MethodFuture<'a> {
        Box::pin(async move { panic!("price feed down") })
    }

    impl Service for Pricing {
        fn register_methods(table: &mut ServiceTable<Self>) {
            table
                .register("Quote", quote)
                .register("Ping", ping)
                .register("Crash", crash);
        }
    }

    fn host() -> ServiceHost {
        let host = ServiceHost::new(Arc::new(RuntimeMetrics::new()));
        host.register("pricing", Pricing::default()).unwrap();
        host
    }

    #[tokio::test(start_paused = true)]
    async fn test_invocations_run_concurrently() {
        let host = host();
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let (a, b) = tokio::join!(
            host.invoke("pricing", "Quote", crate::args!["a"], &cancel),
            host.invoke("pricing", "Quote", crate::args!["b"], &cancel)
        );
        assert_eq!(a.unwrap(), Some(json!({ "sku": "a", "cents": 499 })));
        assert_eq!(b.unwrap(), Some(json!({ "sku": "b", "cents": 499 })));
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_null_result_is_none() {
        let host = host();
        let result = host
            .invoke("pricing", "Ping", Args::empty(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_unknown_service_and_method() {
        let host = host();
        let cancel = CancellationToken::new();

        assert!(matches!(
            host.invoke("billing", "Quote", Args::empty(), &cancel).await,
            Err(TroupeError::NotFound(_))
        ));
        match host.invoke("pricing", "Refund", Args::empty(), &cancel).await {
            Err(TroupeError::RemoteFault(exception)) => {
                assert_eq!(exception.type_name, "MethodNotFound")
            }
            other => panic!("expected method-not-found fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_fault() {
        let host = host();
        let cancel = CancellationToken::new();
        match host.invoke("pricing", "Crash", Args::empty(), &cancel).await {
            Err(TroupeError::RemoteFault(exception)) => {
                assert_eq!(exception.type_name, "Panic");
                assert_eq!(exception.message, "price feed down");
            }
            other => panic!("expected panic fault, got {:?}", other),
        }
        assert!(host
            .invoke("pricing", "Ping", Args::empty(), &cancel)
            .await
            .is_ok());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let host = host();
        assert!(host.register("pricing", Pricing::default()).is_err());
        assert!(host.hosts_service("pricing"));
        assert!(!host.hosts_service("billing"));
    }
}
