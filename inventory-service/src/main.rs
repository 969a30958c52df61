use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

use anyhow::Result;
use clap::Parser;
use diesel::Connection;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use inventory_service::config::Args;
use inventory_service::dispatch::CommandDispatcher;
use inventory_service::handlers::CommandHandler;
use inventory_service::{telemetry, ExpirySweeper, InventoryService, PgStockStore};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use tracing::info;

async fn run_migrations(database_url: String) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&database_url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
        Ok(())
    })
    .await?
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(args.log_json);
    let service_config = args.service_config()?;

    // Run migrations first
    info!("Running database migrations...");
    run_migrations(args.database_url.clone()).await?;
    info!("Migrations completed successfully");

    let config = diesel_async::pooled_connection::AsyncDieselConnectionManager::<AsyncPgConnection>::new(&args.database_url);
    let pool = Pool::builder().max_size(args.pool_max_size).build(config).await?;

    let store = PgStockStore::new(pool, args.lock_timeout());
    let service = Arc::new(InventoryService::new(store, service_config));

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &args.kafka_brokers)
        .set("message.timeout.ms", "5000")
        .create()?;

    let consumer: StreamConsumer = ClientConfig::new()
        .set("group.id", "inventory-service")
        .set("bootstrap.servers", &args.kafka_brokers)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "6000")
        .set("enable.auto.commit", "true")
        .create()?;

    consumer.subscribe(&[&args.command_topic])?;

    let sweeper = ExpirySweeper::new(service.clone(), args.sweep_interval(), args.sweep_batch_size);
    let command_handler = CommandHandler::new(
        CommandDispatcher::new(service.clone()),
        producer.clone(),
        args.reply_topic.clone(),
    );

    let sweeper_task = tokio::spawn(async move {
        sweeper.run().await;
    });

    let handler_task = tokio::spawn(async move {
        command_handler.run(consumer).await;
    });

    info!(
        command_topic = %args.command_topic,
        reply_topic = %args.reply_topic,
        "Inventory service started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    sweeper_task.abort();
    handler_task.abort();

    Ok(())
}
