//! # Troupe Actor Runtime
//!
//! Troupe is a location-transparent actor runtime. Callers invoke methods on
//! logical actors and services by name and key; the runtime works out which
//! process instance hosts them and delivers the call there.
//!
//! ## Core Features
//!
//! * **Virtual Actors**: Activated on first use, evicted when idle, one live
//!   activation per `(actor_name, id)` per host
//! * **Serialized Execution**: Each actor drains a bounded mailbox one
//!   message at a time, so its state needs no locks
//! * **Consistent-Hash Routing**: Keys map to instances through an atomically
//!   replaced routing table fed by discovery
//! * **Leases**: Time-bounded singleton ownership and network mutexes over a
//!   conditional-write store
//! * **Pluggable Transports**: Selected by address scheme; HTTP and
//!   in-process transports ship with the crate
//!
//! ## Architecture
//!
//! * `TroupeRuntime`: The context object owning everything below
//! * `ActorHost` / `ServiceHost`: In-process registries of activations and services
//! * `Dispatcher`: Resolves a call and picks the local host or a transport
//! * `ConsistentHashRouter`: Maps keys to instances over the `RoutingTable`
//! * `LeaseManager`: Acquire, renew and release named leases

pub mod actor;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod host;
pub mod id;
pub mod lease;
pub mod logging;
pub mod metrics;
pub mod routing;
pub mod runtime;
pub mod scheduler;
pub mod shutdown;
pub mod transport;

pub use serde_json;

pub use actor::{
    Actor, ActorContext, ActorFault, ActorRef, Args, DispatchTable, LifecycleEvent, MethodFuture,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LogOutput, LoggingConfig, RuntimeConfig};
pub use dispatch::{ActorInterface, ActorProxy, CallOptions, Dispatcher, ServiceProxy};
pub use errors::{RemoteException, Result, TroupeError};
pub use host::{ActorHost, HostedEndpoint, Service, ServiceHost, ServiceTable};
pub use id::{InstanceId, ResourceIdentifier};
pub use lease::{LeaseHeartbeat, LeaseManager, LeaseStore, MemoryLeaseStore, MutexGuard, NetworkMutex, SingletonLease};
pub use metrics::{MetricsSnapshot, RuntimeMetrics};
pub use routing::{
    ConsistentHashRouter, DiscoveryProvider, HashStrategy, ResourceInstance, RoutingTable,
    StaticDiscovery,
};
pub use runtime::{RuntimeBuilder, TroupeRuntime};
pub use scheduler::{ScheduleHandle, Scheduler};
pub use shutdown::{ShutdownController, ShutdownReceiver, ShutdownSignal};
pub use transport::{
    HttpTransport, InProcessNetwork, InProcessTransport, InboundCall, InvocationRequest,
    InvocationSink, InvocationTarget, Transport, TransportRegistry,
};
