//! Timers scheduled by actors against their own mailboxes.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use troupe::{
    Actor, ActorContext, Args, DispatchTable, MethodFuture, RuntimeConfig, ScheduleHandle,
    TroupeRuntime,
};

#[derive(Default)]
struct Reminder {
    fired: u32,
    ticks: u32,
    ticking: Option<ScheduleHandle>,
}

fn arm<'a>(_reminder: &'a mut Reminder, ctx: &'a ActorContext, args: Args) -> MethodFuture<'a> {
    Box::pin(async move {
        let delay_ms: u64 = args.get(0)?;
        ctx.schedule_once(Duration::from_millis(delay_ms), "Fire", Args::empty());
        Ok(json!(null))
    })
}

fn fire<'a>(reminder: &'a mut Reminder, _ctx: &'a ActorContext, _args: Args) -> MethodFuture<'a> {
    Box::pin(async move {
        reminder.fired += 1;
        Ok(json!(null))
    })
}

fn start_ticking<'a>(reminder: &'a mut Reminder, ctx: &'a ActorContext, _args: Args) -> MethodFuture<'a> {
    Box::pin(async move {
        reminder.ticking = Some(ctx.schedule_repeatedly(Duration::from_secs(1), "Tick", Args::empty()));
        Ok(json!(null))
    })
}

fn stop_ticking<'a>(reminder: &'a mut Reminder, _ctx: &'a ActorContext, _args: Args) -> MethodFuture<'a> {
    Box::pin(async move {
        if let Some(handle) = reminder.ticking.take() {
            handle.cancel();
        }
        Ok(json!(null))
    })
}

fn tick<'a>(reminder: &'a mut Reminder, _ctx: &'a ActorContext, _args: Args) -> MethodFuture<'a> {
    Box::pin(async move {
        reminder.ticks += 1;
        Ok(json!(null))
    })
}

fn counts<'a>(reminder: &'a mut Reminder, _ctx: &'a ActorContext, _args: Args) -> MethodFuture<'a> {
    Box::pin(async move { Ok(json!([reminder.fired, reminder.ticks])) })
}

impl Actor for Reminder {
    fn register_methods(table: &mut DispatchTable<Self>) {
        table
            .register("Arm", arm)
            .register("Fire", fire)
            .register("StartTicking", start_ticking)
            .register("StopTicking", stop_ticking)
            .register("Tick", tick)
            .register("Counts", counts);
    }
}

async fn runtime() -> TroupeRuntime {
    let runtime = TroupeRuntime::builder(RuntimeConfig {
        instance_id: Some("node-a".into()),
        service_name: "alarms".into(),
        ..RuntimeConfig::default()
    })
    .actor("Reminder", |_ctx: &ActorContext| Ok(Reminder::default()))
    .build()
    .unwrap();
    runtime.start().await.unwrap();
    runtime
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_one_shot_and_repeating_timers() {
    let runtime = runtime().await;
    let reminder = runtime.dispatcher().actor("alarms", "Reminder", "r1");

    reminder.call_void("Arm", troupe::args![5_000]).await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(reminder.call::<(u32, u32)>("Counts", Args::empty()).await.unwrap(), (0, 0));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(reminder.call::<(u32, u32)>("Counts", Args::empty()).await.unwrap(), (1, 0));

    reminder.call_void("StartTicking", Args::empty()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    reminder.call_void("StopTicking", Args::empty()).await.unwrap();
    assert_eq!(reminder.call::<(u32, u32)>("Counts", Args::empty()).await.unwrap(), (1, 3));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(reminder.call::<(u32, u32)>("Counts", Args::empty()).await.unwrap(), (1, 3));

    runtime.shutdown().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_stopping_an_actor_cancels_its_timers() {
    let runtime = runtime().await;
    let reminder = runtime.dispatcher().actor("alarms", "Reminder", "r1");

    reminder.call_void("Arm", troupe::args![5_000]).await.unwrap();
    assert!(runtime.actors().stop_actor("Reminder", "r1").await.unwrap());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!runtime.actors().is_hosted("Reminder", "r1"));
    assert_eq!(runtime.metrics().snapshot().activations, 1);

    runtime.shutdown().await.unwrap();
}
