use std::sync::Weak;
use std::time::Duration;

use super::mailbox::{ActorRef, Mailbox};
use super::types::Args;
use crate::dispatch::{Dispatcher, WeakDispatcher};
use crate::errors::{Result, TroupeError};
use crate::id::ResourceIdentifier;
use crate::scheduler::{ScheduleHandle, Scheduler};

/// # ActorContext
///
/// Handed to every handler alongside `&mut self`. It identifies the running
/// activation and gives the actor access to its own mailbox settings, its
/// timers, and the dispatcher for calling other actors.
///
/// The context never keeps the actor alive: it refers to the mailbox weakly,
/// and its timers are cancelled when the activation stops.
#[derive(Debug, Clone)]
pub struct ActorContext {
    actor_name: String,
    id: String,
    key: String,
    address: ResourceIdentifier,
    mailbox: Weak<Mailbox>,
    scheduler: Scheduler,
    dispatcher: Option<WeakDispatcher>,
}

impl ActorContext {
    pub(crate) fn new(
        actor_name: String,
        id: String,
        address: ResourceIdentifier,
        mailbox: Weak<Mailbox>,
        scheduler: Scheduler,
        dispatcher: Option<WeakDispatcher>,
    ) -> Self {
        let key = actor_key(&actor_name, &id);
        Self {
            actor_name,
            id,
            key,
            address,
            mailbox,
            scheduler,
            dispatcher,
        }
    }

    pub fn actor_name(&self) -> &str {
        &self.actor_name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `name#id`, the form used in logs.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Address of the process hosting this activation.
    pub fn address(&self) -> &ResourceIdentifier {
        &self.address
    }

    /// Change how long this activation may sit idle before the host's sweep
    /// evicts it. Takes effect for the next sweep.
    pub fn set_idle_timeout(&self, timeout: Duration) {
        if let Some(mailbox) = self.mailbox.upgrade() {
            mailbox.set_idle_timeout(timeout);
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.mailbox.upgrade().map(|mailbox| mailbox.idle_timeout())
    }

    /// A handle for delivering messages back into this actor's mailbox.
    pub fn self_ref(&self) -> ActorRef {
        ActorRef::new(self.key.clone(), self.address.clone(), self.mailbox.clone())
    }

    pub fn schedule_once(
        &self,
        delay: Duration,
        method: impl Into<String>,
        args: Args,
    ) -> ScheduleHandle {
        self.scheduler
            .schedule_once(self.self_ref(), delay, method, args)
    }

    pub fn schedule_repeatedly(
        &self,
        period: Duration,
        method: impl Into<String>,
        args: Args,
    ) -> ScheduleHandle {
        self.scheduler
            .schedule_repeatedly(self.self_ref(), period, method, args)
    }

    /// The dispatcher of the runtime hosting this actor.
    pub fn dispatcher(&self) -> Result<Dispatcher> {
        self.dispatcher
            .as_ref()
            .and_then(WeakDispatcher::upgrade)
            .ok_or(TroupeError::HostDisposed)
    }
}

pub(crate) fn actor_key(actor_name: &str, id: &str) -> String {
    format!("{}#{}", actor_name, id)
}
