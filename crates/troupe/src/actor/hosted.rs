//! # Hosted Actor
//!
//! One live activation: the mailbox, the processing loop draining it, and
//! the stop protocol.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::behavior::{Actor, ActorFactory, DispatchTable};
use super::context::{actor_key, ActorContext};
use super::mailbox::{Delivery, Mailbox};
use super::types::{ActorFault, Args, Envelope};
use crate::dispatch::WeakDispatcher;
use crate::errors::{Result, TroupeError};
use crate::id::ResourceIdentifier;
use crate::metrics::RuntimeMetrics;
use crate::scheduler::Scheduler;

/// Notified once an activation has fully stopped.
pub trait ActorWatcher: Send + Sync {
    fn on_deactivated(&self, actor: &HostedActor);
}

/// Everything an activation needs from its host.
#[derive(Debug, Clone)]
pub struct ActivationRequest {
    pub actor_name: String,
    pub id: String,
    pub activation_id: u64,
    pub address: ResourceIdentifier,
    pub mailbox_capacity: usize,
    pub idle_timeout: Duration,
    pub scheduler: Scheduler,
    pub dispatcher: Option<WeakDispatcher>,
    pub metrics: Arc<RuntimeMetrics>,
}

pub struct HostedActor {
    actor_name: String,
    id: String,
    key: String,
    activation_id: u64,
    mailbox: Arc<Mailbox>,
    scheduler: Scheduler,
    watchers: Mutex<Vec<Arc<dyn ActorWatcher>>>,
    processing: Mutex<Option<JoinHandle<()>>>,
    stopped: OnceCell<std::result::Result<(), String>>,
    metrics: Arc<RuntimeMetrics>,
}

impl HostedActor {
    /// Construct the actor, run its activation hook and start its loop.
    ///
    /// A failing factory or `on_activate` aborts the activation: nothing is
    /// spawned and the error is returned to the caller.
    pub async fn activate<A: Actor>(
        request: ActivationRequest,
        factory: &ActorFactory<A>,
        table: Arc<DispatchTable<A>>,
    ) -> Result<Arc<Self>> {
        let ActivationRequest {
            actor_name,
            id,
            activation_id,
            address,
            mailbox_capacity,
            idle_timeout,
            scheduler,
            dispatcher,
            metrics,
        } = request;

        let key = actor_key(&actor_name, &id);
        let (sender, receiver) = mpsc::channel(mailbox_capacity.max(1));
        let mailbox = Arc::new(Mailbox::new(
            key.clone(),
            sender,
            idle_timeout,
            metrics.clone(),
        ));
        let scheduler = scheduler.child();
        let context = ActorContext::new(
            actor_name.clone(),
            id.clone(),
            address,
            Arc::downgrade(&mailbox),
            scheduler.clone(),
            dispatcher,
        );

        let activation_failed = |fault: ActorFault| TroupeError::ActivationFailed {
            actor: key.clone(),
            message: fault.to_string(),
        };

        let span = info_span!("actor", actor = %key);
        let mut actor = factory(&context).map_err(activation_failed)?;
        actor
            .on_activate(&context)
            .instrument(span.clone())
            .await
            .map_err(activation_failed)?;

        let processing = tokio::spawn(
            run_actor_loop(actor, context, table, receiver, mailbox.clone(), metrics.clone())
                .instrument(span),
        );

        debug!("Actor {} activated (activation {})", key, activation_id);
        Ok(Arc::new(Self {
            actor_name,
            id,
            key,
            activation_id,
            mailbox,
            scheduler,
            watchers: Mutex::new(Vec::new()),
            processing: Mutex::new(Some(processing)),
            stopped: OnceCell::new(),
            metrics,
        }))
    }

    pub fn actor_name(&self) -> &str {
        &self.actor_name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Distinguishes successive activations of the same `(actor_name, id)`.
    pub fn activation_id(&self) -> u64 {
        self.activation_id
    }

    pub fn idle_timeout(&self) -> Duration {
        self.mailbox.idle_timeout()
    }

    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.mailbox.set_idle_timeout(timeout);
    }

    pub fn last_invocation_utc(&self) -> DateTime<Utc> {
        self.mailbox.last_invocation_utc()
    }

    pub fn is_idle(&self, now: Instant) -> bool {
        self.mailbox.is_idle(now)
    }

    /// True once `stop` has closed the inbox.
    pub fn is_stopping(&self) -> bool {
        self.mailbox.is_closed()
    }

    pub fn add_watcher(&self, watcher: Arc<dyn ActorWatcher>) {
        self.watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(watcher);
    }

    /// Enqueue `method` and, if `wait_for_completion`, wait for its result.
    pub async fn invoke(
        &self,
        method: &str,
        args: Args,
        sender: ResourceIdentifier,
        wait_for_completion: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        self.mailbox
            .deliver(method, args, sender, wait_for_completion, cancel, Delivery::Caller)
            .await
    }

    /// Stop the activation: refuse new messages, let queued ones finish, run
    /// `on_deactivate`, cancel timers and notify watchers. Later calls return
    /// the outcome of the first.
    pub async fn stop(&self) -> Result<()> {
        let outcome = self.stopped.get_or_init(|| self.stop_once()).await;
        outcome.clone().map_err(|message| TroupeError::StopFailed {
            actor: self.key.clone(),
            message,
        })
    }

    async fn stop_once(&self) -> std::result::Result<(), String> {
        debug!("Stopping actor {}", self.key);
        self.scheduler.cancel_all();
        self.mailbox.close();

        let processing = self
            .processing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let joined = match processing {
            Some(handle) => handle.await.map_err(|e| e.to_string()),
            None => Ok(()),
        };
        self.scheduler.shutdown().await;

        let watchers = std::mem::take(
            &mut *self
                .watchers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for watcher in watchers {
            watcher.on_deactivated(self);
        }

        self.metrics.record_deactivation();
        match &joined {
            Ok(()) => info!("Actor {} deactivated", self.key),
            Err(e) => warn!("Actor {} stopped abnormally: {}", self.key, e),
        }
        joined
    }
}

impl std::fmt::Debug for HostedActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedActor")
            .field("key", &self.key)
            .field("activation_id", &self.activation_id)
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

/// Drains the inbox one envelope at a time until every sender is gone.
async fn run_actor_loop<A: Actor>(
    mut actor: A,
    context: ActorContext,
    table: Arc<DispatchTable<A>>,
    mut inbox: mpsc::Receiver<Envelope>,
    mailbox: Arc<Mailbox>,
    metrics: Arc<RuntimeMetrics>,
) {
    while let Some(envelope) = inbox.recv().await {
        let Envelope {
            message_id,
            method_name,
            args,
            sender,
            completion,
            slot,
        } = envelope;
        debug!("Processing message {} ({}) from {}", message_id, method_name, sender);
        metrics.record_invocation();

        let result = match table.get(&method_name) {
            Some(handler) => AssertUnwindSafe(handler(&mut actor, &context, args))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ActorFault::from_panic(panic))),
            None => Err(ActorFault::method_not_found(context.actor_name(), &method_name)),
        };
        mailbox.touch();

        if let Err(fault) = &result {
            metrics.record_fault();
            debug!("Message {} ({}) faulted: {}", message_id, method_name, fault);
        }

        if let Some(completion) = completion {
            if completion.send(result).is_err() {
                debug!("Caller for message {} went away before completion", message_id);
            }
        }
        drop(slot);
    }

    actor.on_deactivate(&context).await;
    debug!("Processing loop for {} exited", context.key());
}
