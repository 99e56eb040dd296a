//! # Mailbox
//!
//! The bounded inbox in front of one actor instance, plus the bookkeeping the
//! host needs to decide when the actor has gone idle.
//!
//! The inbox is the actor's only synchronization primitive. Every envelope
//! holds one of `capacity` slots from the moment it is queued until its
//! handler completes; callers that find no free slot suspend, which is how
//! backpressure reaches them.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::{Args, Envelope};
use crate::errors::{Result, TroupeError};
use crate::id::ResourceIdentifier;
use crate::metrics::RuntimeMetrics;

#[derive(Debug, Clone, Copy)]
struct Activity {
    at: Instant,
    at_utc: DateTime<Utc>,
}

impl Activity {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            at_utc: Utc::now(),
        }
    }
}

/// Whether a full inbox should be reported as caller-visible backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Caller,
    /// Timer deliveries into the actor's own inbox.
    SelfScheduled,
}

pub struct Mailbox {
    key: String,
    inbox: Mutex<Option<mpsc::Sender<Envelope>>>,
    slots: Arc<Semaphore>,
    idle_timeout_ms: AtomicU64,
    last_activity: Mutex<Activity>,
    metrics: Arc<RuntimeMetrics>,
}

impl Mailbox {
    pub(crate) fn new(
        key: String,
        inbox: mpsc::Sender<Envelope>,
        idle_timeout: Duration,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(inbox.max_capacity()));
        Self {
            key,
            inbox: Mutex::new(Some(inbox)),
            slots,
            idle_timeout_ms: AtomicU64::new(idle_timeout.as_millis() as u64),
            last_activity: Mutex::new(Activity::now()),
            metrics,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.idle_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn last_invocation_utc(&self) -> DateTime<Utc> {
        self.activity().at_utc
    }

    /// Time elapsed since the last completed invocation (or activation).
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.activity().at)
    }

    /// Idle strictly longer than the configured timeout.
    pub fn is_idle(&self, now: Instant) -> bool {
        self.idle_for(now) > self.idle_timeout()
    }

    pub fn is_closed(&self) -> bool {
        self.lock_inbox().is_none()
    }

    pub(crate) fn touch(&self) {
        let mut activity = self
            .last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *activity = Activity::now();
    }

    /// Refuse further writes. Messages already queued are still processed.
    pub(crate) fn close(&self) {
        self.lock_inbox().take();
        self.slots.close();
    }

    fn activity(&self) -> Activity {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_inbox(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<Envelope>>> {
        self.inbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue an invocation and optionally wait for its result.
    ///
    /// Returns `Ok(None)` for fire-and-forget deliveries and for handlers
    /// that produced no value.
    pub(crate) async fn deliver(
        &self,
        method: &str,
        args: Args,
        sender: ResourceIdentifier,
        wait_for_completion: bool,
        cancel: &CancellationToken,
        delivery: Delivery,
    ) -> Result<Option<Value>> {
        // Clone the sender so the lock is not held across the await below;
        // the clone is dropped as soon as the envelope is queued.
        let inbox = self
            .lock_inbox()
            .clone()
            .ok_or_else(|| TroupeError::MailboxClosed(self.key.clone()))?;

        let slot = match self.slots.clone().try_acquire_owned() {
            Ok(slot) => slot,
            Err(TryAcquireError::Closed) => {
                return Err(TroupeError::MailboxClosed(self.key.clone()));
            }
            Err(TryAcquireError::NoPermits) => {
                if delivery == Delivery::Caller {
                    self.metrics.record_backpressure();
                }
                debug!("Mailbox for {} is full, {} waiting for capacity", self.key, method);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TroupeError::Cancelled),
                    acquired = self.slots.clone().acquire_owned() => {
                        acquired.map_err(|_| TroupeError::MailboxClosed(self.key.clone()))?
                    }
                }
            }
        };

        let (mut envelope, completion) = Envelope::new(method, args, sender, wait_for_completion);
        envelope.slot = Some(slot);
        // Never waits: the channel has room for every outstanding slot.
        inbox
            .send(envelope)
            .await
            .map_err(|_| TroupeError::MailboxClosed(self.key.clone()))?;
        drop(inbox);

        let Some(completion) = completion else {
            return Ok(None);
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TroupeError::Cancelled),
            result = completion => result,
        };

        match result {
            Ok(Ok(Value::Null)) => Ok(None),
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(fault)) => Err(fault.into()),
            Err(_) => Err(TroupeError::Unanswered(self.key.clone())),
        }
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("key", &self.key)
            .field("idle_timeout", &self.idle_timeout())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A non-owning handle to an actor's mailbox.
///
/// Holding an `ActorRef` does not keep the inbox open: once the actor stops,
/// deliveries fail with [`TroupeError::MailboxClosed`].
#[derive(Debug, Clone)]
pub struct ActorRef {
    key: String,
    address: ResourceIdentifier,
    mailbox: Weak<Mailbox>,
}

impl ActorRef {
    pub(crate) fn new(key: String, address: ResourceIdentifier, mailbox: Weak<Mailbox>) -> Self {
        Self {
            key,
            address,
            mailbox,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_alive(&self) -> bool {
        self.mailbox
            .upgrade()
            .map(|mailbox| !mailbox.is_closed())
            .unwrap_or(false)
    }

    pub(crate) async fn deliver(
        &self,
        method: &str,
        args: Args,
        wait_for_completion: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let mailbox = self
            .mailbox
            .upgrade()
            .ok_or_else(|| TroupeError::MailboxClosed(self.key.clone()))?;
        mailbox
            .deliver(
                method,
                args,
                self.address.clone(),
                wait_for_completion,
                cancel,
                Delivery::SelfScheduled,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::types::ActorFault;
    use serde_json::json;

    fn sender() -> ResourceIdentifier {
        ResourceIdentifier::new("local", "test").unwrap()
    }

    #[tokio::test]
    async fn test_fire_and_forget_returns_after_enqueue() {
        let (tx, mut rx) = mpsc::channel(1);
        let mailbox = Mailbox::new("Cart#1".into(), tx, Duration::from_secs(1), Default::default());
        let result = mailbox
            .deliver("Ping", Args::empty(), sender(), false, &CancellationToken::new(), Delivery::Caller)
            .await
            .unwrap();
        assert_eq!(result, None);
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.method_name, "Ping");
        assert!(envelope.completion.is_none());
    }

    #[tokio::test]
    async fn test_completion_value_and_fault() {
        let (tx, mut rx) = mpsc::channel::<Envelope>(1);
        let mailbox = Arc::new(Mailbox::new(
            "Cart#1".into(),
            tx,
            Duration::from_secs(1),
            Default::default(),
        ));

        let responder = tokio::spawn(async move {
            let mut first = rx.recv().await.unwrap();
            let completion = first.completion.take().unwrap();
            drop(first);
            completion.send(Ok(json!("OK"))).unwrap();
            let mut second = rx.recv().await.unwrap();
            let completion = second.completion.take().unwrap();
            drop(second);
            completion.send(Err(ActorFault::new("Invalid", "nope"))).unwrap();
        });

        let cancel = CancellationToken::new();
        let ok = mailbox
            .deliver("A", Args::empty(), sender(), true, &cancel, Delivery::Caller)
            .await
            .unwrap();
        assert_eq!(ok, Some(json!("OK")));

        let err = mailbox
            .deliver("B", Args::empty(), sender(), true, &cancel, Delivery::Caller)
            .await
            .unwrap_err();
        assert!(matches!(err, TroupeError::RemoteFault(ref e) if e.type_name == "Invalid"));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_inbox_reports_backpressure_and_honours_cancel() {
        let (tx, _rx) = mpsc::channel(1);
        let metrics = Arc::new(RuntimeMetrics::new());
        let mailbox = Mailbox::new("Cart#1".into(), tx, Duration::from_secs(1), metrics.clone());
        let cancel = CancellationToken::new();

        mailbox
            .deliver("First", Args::empty(), sender(), false, &cancel, Delivery::Caller)
            .await
            .unwrap();

        let blocked = mailbox.deliver("Second", Args::empty(), sender(), false, &cancel, Delivery::Caller);
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(blocked, canceller);
        assert!(matches!(result, Err(TroupeError::Cancelled)));
        assert_eq!(metrics.backpressure_events(), 1);
    }

    #[tokio::test]
    async fn test_slot_is_held_until_envelope_is_finished() {
        let (tx, mut rx) = mpsc::channel(1);
        let mailbox = Mailbox::new("Cart#1".into(), tx, Duration::from_secs(1), Default::default());
        let cancel = CancellationToken::new();

        mailbox
            .deliver("First", Args::empty(), sender(), false, &cancel, Delivery::Caller)
            .await
            .unwrap();
        // Dequeued but still being handled: the channel is empty, the slot is not.
        let in_flight = rx.recv().await.unwrap();

        let mut second =
            Box::pin(mailbox.deliver("Second", Args::empty(), sender(), false, &cancel, Delivery::Caller));
        assert!(futures::poll!(second.as_mut()).is_pending());

        drop(in_flight);
        assert_eq!(second.await.unwrap(), None);
        assert_eq!(rx.recv().await.unwrap().method_name, "Second");
    }

    #[tokio::test]
    async fn test_dropped_completion_is_unanswered() {
        let (tx, mut rx) = mpsc::channel::<Envelope>(1);
        let mailbox = Mailbox::new("Cart#1".into(), tx, Duration::from_secs(1), Default::default());
        let discard = async {
            drop(rx.recv().await.unwrap());
        };
        let cancel = CancellationToken::new();
        let (result, ()) = tokio::join!(
            mailbox.deliver("Ping", Args::empty(), sender(), true, &cancel, Delivery::Caller),
            discard
        );
        assert!(matches!(result, Err(TroupeError::Unanswered(ref key)) if key == "Cart#1"));
    }

    #[tokio::test]
    async fn test_closed_mailbox_rejects_delivery() {
        let (tx, _rx) = mpsc::channel(1);
        let mailbox = Mailbox::new("Cart#1".into(), tx, Duration::from_secs(1), Default::default());
        mailbox.close();
        let err = mailbox
            .deliver("Ping", Args::empty(), sender(), true, &CancellationToken::new(), Delivery::Caller)
            .await
            .unwrap_err();
        assert!(matches!(err, TroupeError::MailboxClosed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_is_strictly_longer_than_timeout() {
        let (tx, _rx) = mpsc::channel(1);
        let mailbox = Mailbox::new("Cart#1".into(), tx, Duration::from_secs(3), Default::default());
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!mailbox.is_idle(Instant::now()));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(mailbox.is_idle(Instant::now()));
        mailbox.touch();
        assert!(!mailbox.is_idle(Instant::now()));
    }
}
