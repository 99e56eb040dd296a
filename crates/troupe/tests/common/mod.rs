//! Actors and helpers shared by the integration tests.

#![allow(dead_code)]

use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use troupe::{
    Actor, ActorContext, ActorFault, ActorInterface, ActorProxy, Args, DispatchTable,
    InProcessNetwork, InstanceId, MethodFuture, ResourceIdentifier, ResourceInstance,
    RuntimeConfig, StaticDiscovery, TroupeRuntime,
};

pub const SHOP: &str = "shop";

/// A shopping cart that asks to be evicted after three idle seconds.
#[derive(Default)]
pub struct Cart {
    items: BTreeMap<String, u32>,
}

fn add_product<'a>(cart: &'a mut Cart, _ctx: &'a ActorContext, args: Args) -> MethodFuture<'a> {
    Box::pin(async move {
        let sku: String = args.get(0)?;
        let quantity: u32 = args.get(1)?;
        if sku.is_empty() {
            return Err(ActorFault::new("InvalidSku", "sku must not be empty"));
        }
        *cart.items.entry(sku).or_default() += quantity;
        Ok(json!("OK"))
    })
}

fn get_items<'a>(cart: &'a mut Cart, _ctx: &'a ActorContext, _args: Args) -> MethodFuture<'a> {
    Box::pin(async move { Ok(json!(cart.items)) })
}

fn host_of<'a>(_cart: &'a mut Cart, ctx: &'a ActorContext, _args: Args) -> MethodFuture<'a> {
    Box::pin(async move { Ok(json!(ctx.address().to_string())) })
}

/// Moves every item into another cart, wherever that cart lives.
fn merge_into<'a>(cart: &'a mut Cart, ctx: &'a ActorContext, args: Args) -> MethodFuture<'a> {
    Box::pin(async move {
        let target: String = args.get(0)?;
        let other = ctx.dispatcher()?.actor(SHOP, "Cart", target);
        for (sku, quantity) in std::mem::take(&mut cart.items) {
            other
                .call_void("AddProduct", troupe::args![sku, quantity])
                .await?;
        }
        Ok(Value::Null)
    })
}

impl Actor for Cart {
    fn register_methods(table: &mut DispatchTable<Self>) {
        table
            .register("AddProduct", add_product)
            .register("GetItems", get_items)
            .register("HostOf", host_of)
            .register("MergeInto", merge_into);
    }

    fn on_activate<'a>(&'a mut self, ctx: &'a ActorContext) -> BoxFuture<'a, Result<(), ActorFault>> {
        Box::pin(async move {
            ctx.set_idle_timeout(Duration::from_secs(3));
            Ok(())
        })
    }
}

pub struct CartClient(ActorProxy);

impl ActorInterface for CartClient {
    const SERVICE: &'static str = SHOP;
    const ACTOR: &'static str = "Cart";

    fn from_proxy(proxy: ActorProxy) -> Self {
        Self(proxy)
    }
}

impl CartClient {
    pub async fn add_product(&self, sku: &str, quantity: u32) -> troupe::Result<String> {
        self.0.call("AddProduct", troupe::args![sku, quantity]).await
    }

    pub async fn items(&self) -> troupe::Result<BTreeMap<String, u32>> {
        self.0.call("GetItems", Args::empty()).await
    }

    pub async fn host(&self) -> troupe::Result<String> {
        self.0.call("HostOf", Args::empty()).await
    }
}

pub fn node_config(name: &str) -> RuntimeConfig {
    RuntimeConfig {
        instance_id: Some(name.to_string()),
        service_name: SHOP.to_string(),
        local_address: format!("local://{}", name),
        ..RuntimeConfig::default()
    }
}

pub fn cart_entry(name: &str) -> ResourceInstance {
    ResourceInstance::actor(
        SHOP,
        "Cart",
        InstanceId::from(name),
        ResourceIdentifier::parse(&format!("local://{}", name)).unwrap_or_else(|e| panic!("{}", e)),
    )
}

/// Start one runtime per name on a shared in-process network, each aware of
/// all the others.
pub async fn start_cluster(names: &[&str]) -> Vec<TroupeRuntime> {
    let network = InProcessNetwork::new();
    let discovery = Arc::new(StaticDiscovery::new(
        names.iter().map(|name| cart_entry(name)).collect(),
    ));

    let mut nodes = Vec::new();
    for name in names {
        let runtime = TroupeRuntime::builder(node_config(name))
            .actor("Cart", |_ctx: &ActorContext| Ok(Cart::default()))
            .discovery(discovery.clone())
            .network(network.clone())
            .build()
            .unwrap();
        runtime.start().await.unwrap();
        nodes.push(runtime);
    }
    nodes
}
