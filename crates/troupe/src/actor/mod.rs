//! # Actor Runtime
//!
//! Per-activation machinery: the bounded mailbox, the single processing loop
//! that owns an actor's state, and the context handed to handlers.
//!
//! ## Execution model
//!
//! * Each activation has exactly one processing task. It dequeues envelopes
//!   in arrival order and runs one handler at a time, so actor state needs no
//!   locking.
//! * The inbox is bounded (capacity 1 by default). A caller that finds it full
//!   suspends until the loop frees a slot; that wait is the backpressure
//!   signal and is counted in [`RuntimeMetrics`](crate::metrics::RuntimeMetrics).
//! * A handler error or panic faults only its own envelope. The loop keeps
//!   going.

pub mod behavior;
pub mod context;
pub mod hosted;
pub mod mailbox;
pub mod types;

pub use behavior::{Actor, ActorFactory, DispatchTable, MethodFuture, MethodHandler};
pub use context::ActorContext;
pub use hosted::{ActivationRequest, ActorWatcher, HostedActor};
pub use mailbox::{ActorRef, Mailbox};
pub use types::{next_message_id, ActorFault, Args, Completion, Envelope, LifecycleEvent};
