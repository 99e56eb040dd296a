//! Shutdown signalling for owned background loops.
//!
//! Every background task the runtime spawns (idle sweep, discovery refresh,
//! lease heartbeat) is wrapped in a [`BackgroundTask`]: its owner signals it
//! and joins it during shutdown, so no loop outlives the component that
//! started it.

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default timeout for waiting for a background task to acknowledge shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A signal indicating that a component should shutdown
#[derive(Debug)]
pub struct ShutdownSignal {
    responder: Option<Sender<()>>,
}

impl ShutdownSignal {
    /// Tell the signalling side that shutdown work is finished.
    pub fn acknowledge(mut self) {
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(());
        }
    }
}

/// Controller that can broadcast shutdown signals to multiple receivers
#[derive(Debug, Default)]
pub struct ShutdownController {
    subscribers: Vec<Sender<ShutdownSignal>>,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Get a new receiver for this controller
    pub fn subscribe(&mut self) -> ShutdownReceiver {
        let (sender, receiver) = oneshot::channel();
        self.subscribers.push(sender);
        ShutdownReceiver { receiver }
    }

    /// Signal all receivers and wait until each acknowledges or goes away.
    pub async fn signal_shutdown(self) {
        debug!("Signaling shutdown to {} subscribers", self.subscribers.len());
        let mut acks = Vec::new();
        for sender in self.subscribers {
            let (responder, ack) = oneshot::channel();
            if sender
                .send(ShutdownSignal {
                    responder: Some(responder),
                })
                .is_ok()
            {
                acks.push(ack);
            } else {
                debug!("Shutdown subscriber already gone");
            }
        }

        for ack in acks {
            if let Err(e) = ack.await {
                debug!("Subscriber dropped without acknowledging shutdown: {:?}", e);
            }
        }
    }
}

/// Receiver that can wait for shutdown signals
#[derive(Debug)]
pub struct ShutdownReceiver {
    receiver: Receiver<ShutdownSignal>,
}

impl ShutdownReceiver {
    /// Wait for a shutdown signal. A dropped controller counts as a
    /// request too; its signal has nobody to acknowledge to.
    pub async fn wait_for_shutdown(self) -> ShutdownSignal {
        match self.receiver.await {
            Ok(signal) => signal,
            Err(_) => {
                debug!("Shutdown controller dropped, shutting down");
                ShutdownSignal { responder: None }
            }
        }
    }
}

/// A spawned loop together with the controller that stops it.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    controller: ShutdownController,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(ShutdownReceiver) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut controller = ShutdownController::new();
        let receiver = controller.subscribe();
        let handle = tokio::spawn(body(receiver));
        debug!("Started background task '{}'", name);
        Self {
            name,
            controller,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the loop and join it. A task that does not finish within
    /// [`DEFAULT_SHUTDOWN_TIMEOUT`] is aborted.
    pub async fn stop(self) {
        let Self {
            name,
            controller,
            mut handle,
        } = self;

        let graceful = async {
            controller.signal_shutdown().await;
            (&mut handle).await
        };

        let outcome = tokio::time::timeout(DEFAULT_SHUTDOWN_TIMEOUT, graceful).await;
        match outcome {
            Ok(Ok(())) => debug!("Background task '{}' stopped", name),
            Ok(Err(e)) => warn!("Background task '{}' ended abnormally: {}", name, e),
            Err(_) => {
                warn!("Background task '{}' did not stop in time, aborting", name);
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_background_task_stops_on_signal() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let task = BackgroundTask::spawn("ticker", move |shutdown| async move {
            let shutdown = shutdown.wait_for_shutdown();
            tokio::pin!(shutdown);
            let mut interval = tokio::time::interval(Duration::from_millis(1));
            loop {
                tokio::select! {
                    signal = &mut shutdown => {
                        signal.acknowledge();
                        break;
                    }
                    _ = interval.tick() => {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        task.stop().await;
        let after_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_dropped_controller_still_signals() {
        let mut controller = ShutdownController::new();
        let receiver = controller.subscribe();
        drop(controller);
        let signal = receiver.wait_for_shutdown().await;
        assert!(signal.responder.is_none());
        signal.acknowledge();
    }

    #[tokio::test]
    async fn test_signal_waits_for_acknowledgement() {
        let mut controller = ShutdownController::new();
        let receiver = controller.subscribe();
        let acknowledged = Arc::new(AtomicUsize::new(0));
        let seen = acknowledged.clone();
        let subscriber = tokio::spawn(async move {
            let signal = receiver.wait_for_shutdown().await;
            seen.fetch_add(1, Ordering::SeqCst);
            signal.acknowledge();
        });

        controller.signal_shutdown().await;
        assert_eq!(acknowledged.load(Ordering::SeqCst), 1);
        subscriber.await.unwrap();
    }
}
