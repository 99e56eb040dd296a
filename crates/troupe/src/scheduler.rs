//! # Scheduler
//!
//! Timers that deliver invocations into an actor's own mailbox. Every timer
//! is a task tracked by the scheduler that spawned it and is cancelled with
//! it: the runtime owns the root scheduler and each activation gets a child,
//! so stopping an actor stops its timers and shutting down the runtime stops
//! all of them.

use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::actor::{ActorRef, Args};
use crate::errors::TroupeError;

/// Shortest period a repeating schedule runs at.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Cancels one schedule. Dropping the handle leaves the schedule running.
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    token: CancellationToken,
}

impl ScheduleHandle {
    /// Stop future deliveries. An invocation already handed to the mailbox
    /// is not recalled.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// A scheduler whose timers are also cancelled when this one is.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            tracker: TaskTracker::new(),
        }
    }

    /// Number of timers still running.
    pub fn active_schedules(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deliver one fire-and-forget invocation of `method` to `target` after
    /// `delay`.
    pub fn schedule_once(
        &self,
        target: ActorRef,
        delay: Duration,
        method: impl Into<String>,
        args: Args,
    ) -> ScheduleHandle {
        let method = method.into();
        self.spawn_schedule(move |token| async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Schedule of {} on {} cancelled before firing", method, target.key());
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(e) = target.deliver(&method, args, false, &token).await {
                debug!("Scheduled {} on {} not delivered: {}", method, target.key(), e);
            }
        })
    }

    /// Deliver `method` to `target` every `period` (at least one millisecond),
    /// starting one period from now. Each tick waits for the previous invocation to complete, so a
    /// slow handler delays the schedule instead of filling the mailbox.
    pub fn schedule_repeatedly(
        &self,
        target: ActorRef,
        period: Duration,
        method: impl Into<String>,
        args: Args,
    ) -> ScheduleHandle {
        let method = method.into();
        let period = period.max(MIN_PERIOD);
        self.spawn_schedule(move |token| async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match target.deliver(&method, args.clone(), true, &token).await {
                    Ok(_) => {}
                    Err(TroupeError::Cancelled) => break,
                    Err(TroupeError::MailboxClosed(key)) => {
                        debug!("Mailbox for {} closed, ending schedule of {}", key, method);
                        break;
                    }
                    Err(e) => {
                        warn!("Scheduled {} on {} failed: {}", method, target.key(), e);
                    }
                }
            }
        })
    }

    fn spawn_schedule<F, Fut>(&self, body: F) -> ScheduleHandle
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.cancel.child_token();
        let handle = ScheduleHandle {
            token: token.clone(),
        };
        self.tracker.spawn(body(token));
        handle
    }

    /// Cancel every timer without waiting for them to finish.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    /// Cancel every timer and wait until all of them have exited.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
