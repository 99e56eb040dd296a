//! # Actor Types
//!
//! Message and error types shared by the mailbox, the processing loop and
//! the hosts.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tokio::sync::{oneshot, OwnedSemaphorePermit};

use crate::errors::TroupeError;
use crate::id::ResourceIdentifier;

static NEXT_MESSAGE_ID: AtomicI64 = AtomicI64::new(1);

/// Next process-wide message id. Strictly increasing; used for diagnostics
/// only, mailbox order is channel order.
pub fn next_message_id() -> i64 {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

/// # ActorFault
///
/// A failure raised by a handler while processing one message. Faults are
/// isolated to the envelope that produced them: the processing loop moves
/// on to the next message.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{type_name}: {message}")]
pub struct ActorFault {
    pub message: String,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl ActorFault {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            type_name: type_name.into(),
            log: None,
        }
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    pub fn method_not_found(actor: &str, method: &str) -> Self {
        Self::new(
            "MethodNotFound",
            format!("{} has no method named '{}'", actor, method),
        )
    }

    pub fn bad_argument(index: usize, reason: impl fmt::Display) -> Self {
        Self::new("ArgumentError", format!("argument {}: {}", index, reason))
    }

    /// Convert a caught panic payload into a fault.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::new("Panic", message)
    }

    pub fn is_method_not_found(&self) -> bool {
        self.type_name == "MethodNotFound"
    }
}

impl From<serde_json::Error> for ActorFault {
    fn from(error: serde_json::Error) -> Self {
        Self::new("SerializationError", error.to_string())
    }
}

impl From<anyhow::Error> for ActorFault {
    fn from(error: anyhow::Error) -> Self {
        Self::new("Error", format!("{:#}", error))
    }
}

impl From<TroupeError> for ActorFault {
    fn from(error: TroupeError) -> Self {
        match error {
            TroupeError::RemoteFault(exception) => exception.into(),
            other => Self::new("TroupeError", other.to_string()),
        }
    }
}

/// Positional, already-serialized method arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Deserialize the argument at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, ActorFault> {
        let value = self
            .0
            .get(index)
            .ok_or_else(|| ActorFault::bad_argument(index, "missing"))?;
        T::deserialize(value).map_err(|e| ActorFault::bad_argument(index, e))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Build [`Args`] from a list of serializable expressions.
///
/// ```
/// let args = troupe::args!["sku-1", 3];
/// assert_eq!(args.len(), 2);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::actor::Args::empty()
    };
    ($($arg:expr),+ $(,)?) => {
        $crate::actor::Args::new(vec![$($crate::serde_json::json!($arg)),+])
    };
}

/// Handler results travel back to the caller through this channel.
pub type Completion = oneshot::Sender<Result<Value, ActorFault>>;

/// # Envelope
///
/// One method invocation queued in an actor's mailbox. The mailbox owns it
/// until the processing loop completes it; the completion fires at most once
/// and is absent for fire-and-forget deliveries. `slot` is the mailbox
/// capacity the envelope holds until its handler has finished.
#[derive(Debug)]
pub struct Envelope {
    pub message_id: i64,
    pub method_name: String,
    pub args: Args,
    pub sender: ResourceIdentifier,
    pub completion: Option<Completion>,
    pub slot: Option<OwnedSemaphorePermit>,
}

impl Envelope {
    pub fn new(
        method_name: impl Into<String>,
        args: Args,
        sender: ResourceIdentifier,
        wait_for_completion: bool,
    ) -> (Self, Option<oneshot::Receiver<Result<Value, ActorFault>>>) {
        let (completion, receiver) = if wait_for_completion {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        (
            Self {
                message_id: next_message_id(),
                method_name: method_name.into(),
                args,
                sender,
                completion,
                slot: None,
            },
            receiver,
        )
    }
}

/// Lifecycle notifications fanned out by a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Activated { actor_name: String, id: String },
    Deactivated { actor_name: String, id: String },
}
