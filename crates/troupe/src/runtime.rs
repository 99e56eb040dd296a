//! # Troupe Runtime
//!
//! The context object tying one process instance together: its hosts, the
//! routing table and its refresher, the transports, the dispatcher, leasing,
//! and the background loops that need stopping on the way out.
//!
//! ```rust,no_run
//! use troupe::{RuntimeConfig, TroupeRuntime};
//! # use troupe::{Actor, ActorContext, DispatchTable};
//! # #[derive(Default)] struct Cart;
//! # impl Actor for Cart { fn register_methods(_: &mut DispatchTable<Self>) {} }
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let runtime = TroupeRuntime::builder(RuntimeConfig::default())
//!     .actor("Cart", |_ctx: &ActorContext| Ok(Cart::default()))
//!     .build()?;
//! runtime.start().await?;
//!
//! let cart = runtime.dispatcher().actor("default", "Cart", "1");
//! cart.call_void("Clear", troupe::args![]).await?;
//!
//! runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::actor::{Actor, ActorContext, ActorFault, LifecycleEvent};
use crate::clock::{Clock, SystemClock};
use crate::config::RuntimeConfig;
use crate::dispatch::Dispatcher;
use crate::errors::{Result, TroupeError};
use crate::host::{ActorHost, ActorHostSettings, HostedEndpoint, Service, ServiceHost};
use crate::id::{InstanceId, ResourceIdentifier};
use crate::lease::{LeaseHeartbeat, LeaseManager, LeaseStore, MemoryLeaseStore, NetworkMutex};
use crate::metrics::RuntimeMetrics;
use crate::routing::{
    ConsistentHashRouter, DiscoveryProvider, HashStrategy, LocalAdvertisement, RoutingTable,
    RoutingTableRefresher,
};
use crate::scheduler::Scheduler;
use crate::shutdown::BackgroundTask;
use crate::transport::{
    HttpTransport, InProcessNetwork, InProcessTransport, Transport, TransportRegistry, LOCAL_SCHEME,
};

type ActorRegistration = Box<dyn FnOnce(&ActorHost) -> Result<()> + Send>;
type ServiceRegistration = Box<dyn FnOnce(&ServiceHost) -> Result<()> + Send>;

/// Collects registrations and collaborators, then assembles a
/// [`TroupeRuntime`].
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    actors: Vec<ActorRegistration>,
    services: Vec<ServiceRegistration>,
    discovery: Vec<Arc<dyn DiscoveryProvider>>,
    transports: Vec<(String, Arc<dyn Transport>)>,
    lease_store: Option<Arc<dyn LeaseStore>>,
    clock: Option<Arc<dyn Clock>>,
    hash_strategy: HashStrategy,
    network: Option<Arc<InProcessNetwork>>,
}

impl RuntimeBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            actors: Vec::new(),
            services: Vec::new(),
            discovery: Vec::new(),
            transports: Vec::new(),
            lease_store: None,
            clock: None,
            hash_strategy: HashStrategy::default(),
            network: None,
        }
    }

    /// Host actor type `A` under `actor_name`. The type is advertised for
    /// this instance's service.
    pub fn actor<A, F>(mut self, actor_name: impl Into<String>, factory: F) -> Self
    where
        A: Actor,
        F: Fn(&ActorContext) -> std::result::Result<A, ActorFault> + Send + Sync + 'static,
    {
        let actor_name = actor_name.into();
        self.actors
            .push(Box::new(move |host: &ActorHost| host.register(actor_name, factory)));
        self
    }

    pub fn service<S: Service>(mut self, service_name: impl Into<String>, service: S) -> Self {
        let service_name = service_name.into();
        self.services
            .push(Box::new(move |host: &ServiceHost| host.register(service_name, service)));
        self
    }

    /// Add a source of routing entries for other instances.
    pub fn discovery(mut self, provider: Arc<dyn DiscoveryProvider>) -> Self {
        self.discovery.push(provider);
        self
    }

    /// Register (or replace) the transport for `scheme`.
    pub fn transport(mut self, scheme: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        self.transports.push((scheme.into(), transport));
        self
    }

    pub fn lease_store(mut self, store: Arc<dyn LeaseStore>) -> Self {
        self.lease_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn hash_strategy(mut self, strategy: HashStrategy) -> Self {
        self.hash_strategy = strategy;
        self
    }

    /// Join an in-process network: this instance becomes reachable at
    /// `local://{resource}` and can reach every other member.
    pub fn network(mut self, network: Arc<InProcessNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn build(self) -> Result<TroupeRuntime> {
        let config = self.config;
        config.validate()?;
        let instance_id = config.instance_id();
        let local_address = config.local_address()?;
        let metrics = Arc::new(RuntimeMetrics::new());
        let scheduler = Scheduler::new();

        let actors = ActorHost::new(
            ActorHostSettings {
                address: local_address.clone(),
                mailbox_capacity: config.mailbox_capacity,
                default_idle_timeout: config.default_idle_timeout(),
                sweep_interval: config.sweep_interval(),
            },
            scheduler.clone(),
            metrics.clone(),
        );
        for register in self.actors {
            register(&actors)?;
        }
        let services = Arc::new(ServiceHost::new(metrics.clone()));
        for register in self.services {
            register(&services)?;
        }
        let endpoint = Arc::new(HostedEndpoint::new(
            actors.clone(),
            services.clone(),
            local_address.clone(),
        ));

        let transports = Arc::new(TransportRegistry::new());
        let http: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.request_timeout()));
        transports.register("http", http.clone());
        transports.register("https", http);
        if let Some(network) = &self.network {
            transports.register(
                LOCAL_SCHEME,
                Arc::new(InProcessTransport::new(network.clone(), config.request_timeout())),
            );
        }
        for (scheme, transport) in self.transports {
            transports.register(scheme, transport);
        }

        let table = RoutingTable::new();
        let router = ConsistentHashRouter::new(
            table.clone(),
            self.hash_strategy,
            instance_id.clone(),
            config.route_wait_timeout(),
        );
        let dispatcher = Dispatcher::new(
            router,
            transports.clone(),
            actors.clone(),
            services.clone(),
            metrics.clone(),
        );
        actors.bind_dispatcher(dispatcher.downgrade());

        let mut providers: Vec<Arc<dyn DiscoveryProvider>> = vec![Arc::new(LocalAdvertisement::new(
            config.service_name.clone(),
            instance_id.clone(),
            local_address.clone(),
            actors.actor_types(),
            services.service_names(),
        ))];
        providers.extend(self.discovery);
        let refresher = Arc::new(RoutingTableRefresher::new(
            providers,
            table.clone(),
            instance_id.clone(),
        ));

        let leases = LeaseManager::with_clock(
            self.lease_store
                .unwrap_or_else(|| Arc::new(MemoryLeaseStore::new())),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        );

        info!(
            "Built runtime {} for service {} at {} (transports: {:?})",
            instance_id,
            config.service_name,
            local_address,
            transports.schemes()
        );

        Ok(TroupeRuntime {
            config,
            instance_id,
            local_address,
            metrics,
            scheduler,
            table,
            actors,
            services,
            endpoint,
            transports,
            dispatcher,
            leases,
            refresher,
            network: self.network,
            discovery_task: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }
}

/// One running process instance.
pub struct TroupeRuntime {
    config: RuntimeConfig,
    instance_id: InstanceId,
    local_address: ResourceIdentifier,
    metrics: Arc<RuntimeMetrics>,
    scheduler: Scheduler,
    table: RoutingTable,
    actors: Arc<ActorHost>,
    services: Arc<ServiceHost>,
    endpoint: Arc<HostedEndpoint>,
    transports: Arc<TransportRegistry>,
    dispatcher: Dispatcher,
    leases: LeaseManager,
    refresher: Arc<RoutingTableRefresher>,
    network: Option<Arc<InProcessNetwork>>,
    discovery_task: Mutex<Option<BackgroundTask>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl TroupeRuntime {
    pub fn builder(config: RuntimeConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// Start the idle sweep and discovery, and bind to the in-process
    /// network if one was configured. Starting twice is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TroupeError::HostDisposed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Runtime {} already started", self.instance_id);
            return Ok(());
        }

        if let Some(network) = &self.network {
            if self.local_address.scheme() == LOCAL_SCHEME {
                network.bind(self.local_address.resource(), self.endpoint.clone());
            } else {
                warn!(
                    "In-process network configured but local address {} is not local://, not binding",
                    self.local_address
                );
            }
        }

        self.actors.start_sweep().await;
        if let Err(e) = self.refresher.refresh().await {
            warn!("Initial routing refresh failed: {}", e);
        }
        *self.discovery_task.lock().await = Some(
            self.refresher
                .clone()
                .spawn(self.config.discovery_interval()),
        );

        info!("Runtime {} started at {}", self.instance_id, self.local_address);
        Ok(())
    }

    /// Stop discovery, leave the network, stop every activation and cancel
    /// outstanding schedules. A second call fails with
    /// [`TroupeError::HostDisposed`].
    pub async fn shutdown(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(TroupeError::HostDisposed);
        }
        info!("Shutting down runtime {}", self.instance_id);

        if let Some(task) = self.discovery_task.lock().await.take() {
            task.stop().await;
        }
        if let Some(network) = &self.network {
            network.unbind(self.local_address.resource());
        }
        self.actors.shutdown().await?;
        self.scheduler.shutdown().await;

        info!("Runtime {} stopped", self.instance_id);
        Ok(())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn local_address(&self) -> &ResourceIdentifier {
        &self.local_address
    }

    pub fn metrics(&self) -> &Arc<RuntimeMetrics> {
        &self.metrics
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn actors(&self) -> &Arc<ActorHost> {
        &self.actors
    }

    pub fn services(&self) -> &Arc<ServiceHost> {
        &self.services
    }

    /// The sink transports deliver inbound calls to.
    pub fn endpoint(&self) -> Arc<HostedEndpoint> {
        self.endpoint.clone()
    }

    pub fn transports(&self) -> &Arc<TransportRegistry> {
        &self.transports
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    /// Poll discovery now instead of waiting for the next interval.
    pub async fn refresh_routes(&self) -> Result<u64> {
        self.refresher.refresh().await
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.actors.subscribe_lifecycle()
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    /// A mutex whose locks are owned by this instance.
    pub fn network_mutex(&self) -> NetworkMutex {
        NetworkMutex::new(self.leases.clone(), self.instance_id.clone())
    }

    /// Take the singleton lease `name` and keep it renewed. Returns `None`
    /// when another instance holds it.
    pub async fn acquire_singleton(
        &self,
        name: &str,
        duration: Duration,
        user_data: Option<String>,
    ) -> Result<Option<LeaseHeartbeat>> {
        let Some(_) = self
            .leases
            .try_acquire_with(name, duration, &self.instance_id, user_data.clone())
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(LeaseHeartbeat::start(
            self.leases.clone(),
            name,
            duration,
            self.instance_id.clone(),
            user_data,
        )))
    }
}

impl std::fmt::Debug for TroupeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TroupeRuntime")
            .field("instance_id", &self.instance_id)
            .field("local_address", &self.local_address)
            .field("actors", &self.actors)
            .field("services", &self.services)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Args, DispatchTable, MethodFuture};
    use crate::routing::ResourceInstance;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    #[derive(Default)]
    struct Greeter;

    fn greet<'a>(_greeter: &'a mut Greeter, ctx: &'a ActorContext, args: Args) -> MethodFuture<'a> {
        Box::pin(async move {
            let name: String = args.get(0)?;
            Ok(json!(format!("hello {} from {}", name, ctx.id())))
        })
    }

    impl Actor for Greeter {
        fn register_methods(table: &mut DispatchTable<Self>) {
            table.register("Greet", greet);
        }
    }

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            instance_id: Some("node-a".into()),
            service_name: "greetings".into(),
            local_address: "local://node-a".into(),
            ..RuntimeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_advertises_hosted_types() {
        let runtime = TroupeRuntime::builder(config())
            .actor("Greeter", |_ctx: &ActorContext| Ok(Greeter))
            .build()
            .unwrap();
        assert!(runtime.routing_table().snapshot().is_empty());

        runtime.start().await.unwrap();
        let snapshot = runtime.routing_table().snapshot();
        assert_eq!(
            snapshot.entries,
            vec![ResourceInstance::actor(
                "greetings",
                "Greeter",
                InstanceId::from("node-a"),
                ResourceIdentifier::parse("local://node-a").unwrap(),
            )
            .local(true)]
        );

        let greeting: Value = runtime
            .dispatcher()
            .actor("greetings", "Greeter", "7")
            .call("Greet", crate::args!["ada"])
            .await
            .unwrap();
        assert_eq!(greeting, json!("hello ada from 7"));
        assert_eq!(runtime.metrics().snapshot().local_dispatches, 1);

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_once_only() {
        let runtime = TroupeRuntime::builder(config()).build().unwrap();
        runtime.start().await.unwrap();
        runtime.shutdown().await.unwrap();
        assert!(matches!(runtime.shutdown().await, Err(TroupeError::HostDisposed)));
        assert!(matches!(runtime.start().await, Err(TroupeError::HostDisposed)));
    }

    #[test]
    fn test_build_rejects_bad_setup() {
        let invalid = RuntimeConfig {
            mailbox_capacity: 0,
            ..config()
        };
        assert!(matches!(
            TroupeRuntime::builder(invalid).build(),
            Err(TroupeError::Config(_))
        ));

        let duplicate = TroupeRuntime::builder(config())
            .actor("Greeter", |_ctx: &ActorContext| Ok(Greeter))
            .actor("Greeter", |_ctx: &ActorContext| Ok(Greeter))
            .build();
        assert!(matches!(duplicate, Err(TroupeError::Config(_))));
    }

    #[tokio::test]
    async fn test_singleton_lease_is_exclusive_across_runtimes() {
        let store: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());
        let a = TroupeRuntime::builder(config())
            .lease_store(store.clone())
            .build()
            .unwrap();
        let b = TroupeRuntime::builder(RuntimeConfig {
            instance_id: Some("node-b".into()),
            local_address: "local://node-b".into(),
            ..config()
        })
        .lease_store(store)
        .build()
        .unwrap();

        let held = a
            .acquire_singleton("scheduler", Duration::from_secs(30), Some("epoch-1".into()))
            .await
            .unwrap()
            .unwrap();
        assert!(held.is_held());
        let stored = a.leases().get("scheduler").await.unwrap().unwrap();
        assert_eq!(stored.user_data.as_deref(), Some("epoch-1"));
        assert!(b
            .acquire_singleton("scheduler", Duration::from_secs(30), None)
            .await
            .unwrap()
            .is_none());

        held.stop().await.unwrap();
        assert!(b
            .acquire_singleton("scheduler", Duration::from_secs(30), None)
            .await
            .unwrap()
            .is_some());
    }
}
