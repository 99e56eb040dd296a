//! # Lease Heartbeat
//!
//! Keeps a held lease alive by renewing it every third of its duration, and
//! makes losing it observable: [`LeaseHeartbeat::is_held`] flips to `false`
//! and [`LeaseHeartbeat::held`] notifies watchers the moment a renewal is
//! rejected.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::LeaseManager;
use crate::errors::Result;
use crate::id::InstanceId;
use crate::shutdown::BackgroundTask;

#[derive(Debug)]
pub struct LeaseHeartbeat {
    name: String,
    instance_id: InstanceId,
    leases: LeaseManager,
    held: watch::Receiver<bool>,
    task: BackgroundTask,
}

impl LeaseHeartbeat {
    /// Start renewing `name`, which `instance_id` is expected to hold.
    /// `user_data` is written with every renewal when present.
    pub fn start(
        leases: LeaseManager,
        name: impl Into<String>,
        duration: Duration,
        instance_id: InstanceId,
        user_data: Option<String>,
    ) -> Self {
        let name = name.into();
        let (held_tx, held) = watch::channel(true);
        let period = (duration / 3).max(Duration::from_millis(1));

        let task = {
            let leases = leases.clone();
            let name = name.clone();
            let instance_id = instance_id.clone();
            BackgroundTask::spawn("lease-heartbeat", move |shutdown| async move {
                let shutdown = shutdown.wait_for_shutdown();
                tokio::pin!(shutdown);
                let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        signal = &mut shutdown => {
                            signal.acknowledge();
                            break;
                        }
                        _ = ticker.tick() => {
                            match leases.renew(&name, duration, &instance_id, user_data.clone()).await {
                                Ok(true) => debug!("Renewed lease '{}'", name),
                                Ok(false) => {
                                    warn!("Lease '{}' lost by {}", name, instance_id);
                                    let _ = held_tx.send(false);
                                    // Wait for the owner to stop us.
                                    let signal = (&mut shutdown).await;
                                    signal.acknowledge();
                                    break;
                                }
                                Err(e) => warn!("Renewing lease '{}' failed: {}", name, e),
                            }
                        }
                    }
                }
            })
        };

        Self {
            name,
            instance_id,
            leases,
            held,
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether every renewal so far has succeeded.
    pub fn is_held(&self) -> bool {
        *self.held.borrow()
    }

    /// A receiver that changes to `false` when the lease is lost.
    pub fn held(&self) -> watch::Receiver<bool> {
        self.held.clone()
    }

    /// Stop renewing and release the lease.
    pub async fn stop(self) -> Result<()> {
        self.task.stop().await;
        self.leases.release(&self.name, &self.instance_id).await
    }
}
