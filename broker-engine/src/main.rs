use std::sync::Arc;

use broker_engine::{
    BackgroundTasks, Engine, EngineConfig, MemoryStore, TaskKind, init_logger,
};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();
    tracing::info!("Broker engine starting...");

    let config = EngineConfig::from_env();
    let store = Arc::new(MemoryStore::new());
    let (engine, mut notifications) = Engine::new(store, config);

    let mut tasks = BackgroundTasks::new();

    // SLA sweep loop. The poke sender would be handed to an API layer; the
    // bare binary keeps it alive so the channel stays open.
    let scheduler = engine.scheduler();
    let (_poke_tx, poke_rx) = mpsc::channel(32);
    let shutdown = tasks.shutdown_token();
    tasks.spawn("sla_scheduler", TaskKind::Periodic, async move {
        scheduler.run(shutdown, poke_rx).await;
    });

    // Delivery stand-in: drain intents to the log.
    tasks.spawn("notification_drain", TaskKind::Worker, async move {
        while let Some(intent) = notifications.recv().await {
            tracing::info!(
                kind = ?intent.kind,
                recipient = intent.recipient_id,
                role = ?intent.recipient_role,
                priority = ?intent.priority,
                message = %intent.message,
                "Notification intent"
            );
        }
    });

    tracing::info!(tasks = tasks.len(), "Broker engine ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received");
    tasks.shutdown().await;

    Ok(())
}
