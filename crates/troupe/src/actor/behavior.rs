//! Actor behaviour: the trait actor types implement and the per-type method
//! table the processing loop dispatches through.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use super::context::ActorContext;
use super::types::{ActorFault, Args};

/// Future returned by a method handler.
pub type MethodFuture<'a> = BoxFuture<'a, Result<Value, ActorFault>>;

/// A method handler for actor type `A`.
///
/// Handlers are plain functions so the table can be built once per type:
///
/// ```rust,ignore
/// fn add_product<'a>(cart: &'a mut Cart, _ctx: &'a ActorContext, args: Args) -> MethodFuture<'a> {
///     Box::pin(async move {
///         cart.items.push(args.get::<String>(0)?);
///         Ok(json!("OK"))
///     })
/// }
/// ```
pub type MethodHandler<A> = for<'a> fn(&'a mut A, &'a ActorContext, Args) -> MethodFuture<'a>;

/// Method name to handler mapping for one actor type.
pub struct DispatchTable<A> {
    methods: HashMap<String, MethodHandler<A>>,
}

impl<A> DispatchTable<A> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Register `handler` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, handler: MethodHandler<A>) -> &mut Self {
        self.methods.insert(name.into(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<MethodHandler<A>> {
        self.methods.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl<A> Default for DispatchTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for DispatchTable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("methods", &self.method_names())
            .finish()
    }
}

/// # Actor
///
/// An actor type hosted by an [`ActorHost`](crate::host::ActorHost). Each
/// live instance owns its state exclusively: the processing loop hands out
/// `&mut self` to exactly one handler at a time.
pub trait Actor: Sized + Send + 'static {
    /// Populate the method table. Called once when the type is registered.
    fn register_methods(table: &mut DispatchTable<Self>);

    /// Runs before the first message. An error aborts the activation and is
    /// returned to the invoking caller.
    fn on_activate<'a>(&'a mut self, _ctx: &'a ActorContext) -> BoxFuture<'a, Result<(), ActorFault>> {
        Box::pin(async { Ok(()) })
    }

    /// Runs after the inbox has been drained, before watchers are notified.
    fn on_deactivate<'a>(&'a mut self, _ctx: &'a ActorContext) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Constructs a fresh actor instance for an activation.
pub type ActorFactory<A> = dyn Fn(&ActorContext) -> Result<A, ActorFault> + Send + Sync;
