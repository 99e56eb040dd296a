//! # Hosts
//!
//! The in-process side of the runtime: [`ActorHost`] owns activations,
//! [`ServiceHost`] owns stateless services, and [`HostedEndpoint`] feeds
//! calls arriving from transports into both.

pub mod actor_host;
pub mod endpoint;
pub mod service_host;

pub use actor_host::{ActorHost, ActorHostSettings};
pub use endpoint::HostedEndpoint;
pub use service_host::{Service, ServiceHost, ServiceMethod, ServiceTable};
