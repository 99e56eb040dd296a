//! # Actor Host
//!
//! Registry of live activations keyed by `(actor_name, id)`. Activations are
//! created on first use, evicted by the idle sweep, and all stopped when the
//! host shuts down.

use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, OnceCell};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actor::{
    ActivationRequest, Actor, ActorContext, ActorFactory, ActorFault, ActorWatcher, Args,
    DispatchTable, HostedActor, LifecycleEvent,
};
use crate::dispatch::WeakDispatcher;
use crate::errors::{Result, TroupeError};
use crate::id::ResourceIdentifier;
use crate::metrics::RuntimeMetrics;
use crate::scheduler::Scheduler;
use crate::shutdown::BackgroundTask;

const LIFECYCLE_CHANNEL_CAPACITY: usize = 256;

/// Host-wide activation settings.
#[derive(Debug, Clone)]
pub struct ActorHostSettings {
    pub address: ResourceIdentifier,
    pub mailbox_capacity: usize,
    pub default_idle_timeout: Duration,
    pub sweep_interval: Duration,
}

/// Type-erased activation for one registered actor type.
trait ActorActivator: Send + Sync {
    fn activate(&self, request: ActivationRequest) -> BoxFuture<'_, Result<Arc<HostedActor>>>;
}

struct Registration<A: Actor> {
    factory: Box<ActorFactory<A>>,
    table: Arc<DispatchTable<A>>,
}

impl<A: Actor> ActorActivator for Registration<A> {
    fn activate(&self, request: ActivationRequest) -> BoxFuture<'_, Result<Arc<HostedActor>>> {
        Box::pin(HostedActor::activate(request, &*self.factory, self.table.clone()))
    }
}

type ActorKey = (String, String);
type ActivationCell = Arc<OnceCell<Arc<HostedActor>>>;

pub struct ActorHost {
    this: Weak<ActorHost>,
    settings: ActorHostSettings,
    registrations: RwLock<HashMap<String, Arc<dyn ActorActivator>>>,
    actors: Mutex<HashMap<ActorKey, ActivationCell>>,
    scheduler: Scheduler,
    dispatcher: OnceLock<WeakDispatcher>,
    metrics: Arc<RuntimeMetrics>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    sweep: tokio::sync::Mutex<Option<BackgroundTask>>,
    next_activation: AtomicU64,
    disposed: AtomicBool,
}

impl ActorHost {
    pub fn new(settings: ActorHostSettings, scheduler: Scheduler, metrics: Arc<RuntimeMetrics>) -> Arc<Self> {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            settings,
            registrations: RwLock::new(HashMap::new()),
            actors: Mutex::new(HashMap::new()),
            scheduler,
            dispatcher: OnceLock::new(),
            metrics,
            lifecycle,
            sweep: tokio::sync::Mutex::new(None),
            next_activation: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &ActorHostSettings {
        &self.settings
    }

    /// Give activations access to the runtime's dispatcher. Only the first
    /// binding takes effect.
    pub fn bind_dispatcher(&self, dispatcher: WeakDispatcher) {
        if self.dispatcher.set(dispatcher).is_err() {
            debug!("Dispatcher already bound to actor host");
        }
    }

    /// Register actor type `A` under `actor_name`.
    pub fn register<A, F>(&self, actor_name: impl Into<String>, factory: F) -> Result<()>
    where
        A: Actor,
        F: Fn(&ActorContext) -> std::result::Result<A, ActorFault> + Send + Sync + 'static,
    {
        let actor_name = actor_name.into();
        let mut table = DispatchTable::new();
        A::register_methods(&mut table);

        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if registrations.contains_key(&actor_name) {
            return Err(TroupeError::Config(format!(
                "actor type '{}' is already registered",
                actor_name
            )));
        }
        info!(
            "Registered actor type {} with methods {:?}",
            actor_name,
            table.method_names()
        );
        registrations.insert(
            actor_name,
            Arc::new(Registration {
                factory: Box::new(factory),
                table: Arc::new(table),
            }),
        );
        Ok(())
    }

    pub fn hosts_actor_type(&self, actor_name: &str) -> bool {
        self.registrations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(actor_name)
    }

    pub fn actor_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registrations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn lock_actors(&self) -> std::sync::MutexGuard<'_, HashMap<ActorKey, ActivationCell>> {
        self.actors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a live activation exists for `(actor_name, id)`.
    pub fn is_hosted(&self, actor_name: &str, id: &str) -> bool {
        self.lock_actors()
            .get(&(actor_name.to_string(), id.to_string()))
            .and_then(|cell| cell.get())
            .map(|actor| !actor.is_stopping())
            .unwrap_or(false)
    }

    /// Snapshot of every live activation.
    pub fn hosted_actors(&self) -> Vec<Arc<HostedActor>> {
        self.lock_actors()
            .values()
            .filter_map(|cell| cell.get().cloned())
            .collect()
    }

    /// Return the live activation for `(actor_name, id)`, creating it if
    /// needed. Concurrent callers for the same pair share one activation.
    pub async fn try_get_hosted_actor(&self, actor_name: &str, id: &str) -> Result<Arc<HostedActor>> {
        if self.is_disposed() {
            return Err(TroupeError::HostDisposed);
        }
        let activator = self
            .registrations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(actor_name)
            .cloned()
            .ok_or_else(|| TroupeError::ActorNotRegistered(actor_name.to_string()))?;

        let key = (actor_name.to_string(), id.to_string());
        let cell = self.lock_actors().entry(key.clone()).or_default().clone();

        let activated = cell
            .get_or_try_init(|| self.activate(activator, actor_name, id))
            .await
            .cloned();

        if activated.is_err() {
            let mut actors = self.lock_actors();
            if actors
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &cell) && current.get().is_none())
            {
                actors.remove(&key);
            }
        }
        activated
    }

    async fn activate(
        &self,
        activator: Arc<dyn ActorActivator>,
        actor_name: &str,
        id: &str,
    ) -> Result<Arc<HostedActor>> {
        let request = ActivationRequest {
            actor_name: actor_name.to_string(),
            id: id.to_string(),
            activation_id: self.next_activation.fetch_add(1, Ordering::Relaxed),
            address: self.settings.address.clone(),
            mailbox_capacity: self.settings.mailbox_capacity,
            idle_timeout: self.settings.default_idle_timeout,
            scheduler: self.scheduler.clone(),
            dispatcher: self.dispatcher.get().cloned(),
            metrics: self.metrics.clone(),
        };

        let actor = activator.activate(request).await?;
        actor.add_watcher(Arc::new(Unregister {
            host: self.this.clone(),
        }));
        self.metrics.record_activation();
        let _ = self.lifecycle.send(LifecycleEvent::Activated {
            actor_name: actor_name.to_string(),
            id: id.to_string(),
        });
        info!("Activated {}", actor.key());
        Ok(actor)
    }

    /// Drop the registry entry for `actor` if it still refers to that
    /// activation.
    fn forget(&self, actor: &HostedActor) {
        let key = (actor.actor_name().to_string(), actor.id().to_string());
        let mut actors = self.lock_actors();
        let is_same = actors
            .get(&key)
            .and_then(|cell| cell.get())
            .is_some_and(|current| current.activation_id() == actor.activation_id());
        if is_same {
            actors.remove(&key);
        }
    }

    /// Invoke `method` on `(actor_name, id)`, activating it on first use.
    ///
    /// An activation found mid-stop, before the message could be queued, is
    /// replaced by a fresh one and the call is retried once. A message that
    /// was queued is never retried.
    #[allow(clippy::too_many_arguments)]
    pub async fn invoke(
        &self,
        actor_name: &str,
        id: &str,
        method: &str,
        args: Args,
        sender: ResourceIdentifier,
        wait_for_completion: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let actor = self.try_get_hosted_actor(actor_name, id).await?;
        match actor
            .invoke(method, args.clone(), sender.clone(), wait_for_completion, cancel)
            .await
        {
            Err(TroupeError::MailboxClosed(key)) => {
                debug!("{} was stopping, reactivating for {}", key, method);
                self.forget(&actor);
                let actor = self.try_get_hosted_actor(actor_name, id).await?;
                actor
                    .invoke(method, args, sender, wait_for_completion, cancel)
                    .await
            }
            other => other,
        }
    }

    /// Stop one activation explicitly.
    pub async fn stop_actor(&self, actor_name: &str, id: &str) -> Result<bool> {
        let actor = self
            .lock_actors()
            .get(&(actor_name.to_string(), id.to_string()))
            .and_then(|cell| cell.get().cloned());
        match actor {
            Some(actor) => actor.stop().await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Stop every activation idle longer than its timeout. Returns how many
    /// were stopped; individual failures are logged.
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let idle: Vec<Arc<HostedActor>> = self
            .hosted_actors()
            .into_iter()
            .filter(|actor| actor.is_idle(now))
            .collect();
        if idle.is_empty() {
            return 0;
        }

        debug!("Idle sweep evicting {} actors", idle.len());
        let results = join_all(idle.iter().map(|actor| actor.stop())).await;
        let mut stopped = 0;
        for (actor, result) in idle.iter().zip(results) {
            match result {
                Ok(()) => stopped += 1,
                Err(e) => warn!("Failed to evict idle actor {}: {}", actor.key(), e),
            }
        }
        stopped
    }

    /// Start the periodic idle sweep. Calling it again has no effect.
    pub async fn start_sweep(&self) {
        let mut sweep = self.sweep.lock().await;
        if sweep.is_some() || self.is_disposed() {
            return;
        }

        let host = self.this.clone();
        let interval = self.settings.sweep_interval;
        *sweep = Some(BackgroundTask::spawn("idle-sweep", move |shutdown| async move {
            let shutdown = shutdown.wait_for_shutdown();
            tokio::pin!(shutdown);
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    signal = &mut shutdown => {
                        signal.acknowledge();
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(host) = host.upgrade() else { break };
                        host.sweep_idle().await;
                    }
                }
            }
        }));
        debug!("Idle sweep running every {:?}", interval);
    }

    /// Stop the sweep, then stop every activation concurrently. A second
    /// call fails with [`TroupeError::HostDisposed`].
    pub async fn shutdown(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err(TroupeError::HostDisposed);
        }
        info!("Shutting down actor host");

        if let Some(sweep) = self.sweep.lock().await.take() {
            sweep.stop().await;
        }

        let actors = self.hosted_actors();
        let results = join_all(actors.iter().map(|actor| actor.stop())).await;
        let failures: Vec<String> = actors
            .iter()
            .zip(results)
            .filter_map(|(actor, result)| result.err().map(|e| format!("{}: {}", actor.key(), e)))
            .collect();
        if !failures.is_empty() {
            warn!(
                "{} of {} actors failed to stop cleanly: {}",
                failures.len(),
                actors.len(),
                failures.join("; ")
            );
        }

        self.lock_actors().clear();
        info!("Actor host stopped ({} actors)", actors.len());
        Ok(())
    }
}

impl std::fmt::Debug for ActorHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHost")
            .field("address", &self.settings.address)
            .field("actor_types", &self.actor_types())
            .field("live", &self.hosted_actors().len())
            .finish()
    }
}

/// Removes a stopped activation from its host and announces it.
struct Unregister {
    host: Weak<ActorHost>,
}

impl ActorWatcher for Unregister {
    fn on_deactivated(&self, actor: &HostedActor) {
        let Some(host) = self.host.upgrade() else {
            return;
        };
        host.forget(actor);
        let _ = host.lifecycle.send(LifecycleEvent::Deactivated {
            actor_name: actor.actor_name().to_string(),
            id: actor.id().to_string(),
        });
    }
}
