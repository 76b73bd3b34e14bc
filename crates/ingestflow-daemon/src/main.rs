//! Process entrypoint: wires the scheduler, the four worker pools, the
//! deferred-entity sweep, and the Subscriber Gateway together behind one
//! shutdown signal (spec §5 "graceful shutdown").

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ingestflow_adapters::{IssueTrackerAdapter, SourceControlAdapter};
use ingestflow_core::config::Config;
use ingestflow_core::messages::Queue;
use ingestflow_progress::{AuthValidator, Broker};
use ingestflow_queue::{PostgresQueueBus, QueueBus};
use ingestflow_scheduler::{CancellationRegistry, Scheduler, SchedulerStore};
use ingestflow_storage::{
    CredentialsStore, Database, EncryptionService, EntityRepository, IntegrationRepository,
    JobRepository, PostgresCredentialsStore, PostgresVectorStore, RawBatchRepository, VectorStore,
};
use ingestflow_workers::{
    ExtractWorker, HttpEmbeddingProvider, LoadWorker, PoolConfig, TransformWorker, VectorizeWorker,
    WorkerPool,
};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingestflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("ingestflow daemon starting");

    let db = Database::from_url(&config.database_url).await?;
    db.migrate().await?;

    let bus: Arc<dyn QueueBus> = Arc::new(PostgresQueueBus::new(db.pool().clone()));
    let broker = Broker::new();
    let cancellations = CancellationRegistry::new();

    let jobs = JobRepository::new(db.clone());
    let integrations = IntegrationRepository::new(db.clone());
    let raw_batches = RawBatchRepository::new(db.clone());
    let entities = EntityRepository::new(db.clone());
    let vectors: Arc<dyn VectorStore> = Arc::new(PostgresVectorStore::new(db.clone()));
    let encryption = EncryptionService::from_config(&config)?;
    let credentials: Arc<dyn CredentialsStore> = Arc::new(PostgresCredentialsStore::new(db.clone(), encryption));

    let scheduler_store: Arc<dyn SchedulerStore> = Arc::new(jobs.clone());
    let scheduler = Scheduler::new(
        scheduler_store,
        Arc::clone(&bus),
        config.scheduler_tick_interval,
        config.abandonment_multiplier,
        cancellations,
    );
    scheduler.schedule_all_active().await?;

    let issue_tracker = Arc::new(IssueTrackerAdapter::new(config.adapter_fetch_timeout));
    let source_control = Arc::new(SourceControlAdapter::new(config.adapter_fetch_timeout));

    let extract_worker = Arc::new(ExtractWorker::new(
        integrations,
        Arc::clone(&credentials),
        raw_batches.clone(),
        jobs.clone(),
        Arc::clone(&bus),
        scheduler.clone(),
        broker.clone(),
        issue_tracker,
        source_control,
    ));
    let transform_worker = Arc::new(TransformWorker::new(
        raw_batches,
        Arc::clone(&bus),
        scheduler.clone(),
        broker.clone(),
    ));
    let load_worker = Arc::new(LoadWorker::new(
        entities.clone(),
        Arc::clone(&bus),
        broker.clone(),
        scheduler.clone(),
    ));
    let embeddings = Arc::new(HttpEmbeddingProvider::new(
        config.embedding_base_url.clone(),
        config.embedding_api_key.clone(),
        config.embedding_model.clone(),
        config.embedding_dimension,
        config.adapter_fetch_timeout,
    ));
    let vectorize_worker = Arc::new(VectorizeWorker::new(
        entities,
        Arc::clone(&vectors),
        embeddings,
        scheduler.clone(),
        broker.clone(),
    ));

    let extract_pool = WorkerPool::new(
        Arc::clone(&bus),
        Queue::Extract,
        extract_worker,
        PoolConfig::new("extract-worker").with_max_concurrency(config.extract_worker_concurrency),
    );
    let transform_pool = WorkerPool::new(
        Arc::clone(&bus),
        Queue::Transform,
        transform_worker,
        PoolConfig::new("transform-worker").with_max_concurrency(config.transform_worker_concurrency),
    );
    let load_pool = WorkerPool::new(
        Arc::clone(&bus),
        Queue::Load,
        Arc::clone(&load_worker) as Arc<dyn ingestflow_workers::MessageHandler>,
        PoolConfig::new("load-worker").with_max_concurrency(config.load_worker_concurrency),
    );
    let vectorize_pool = WorkerPool::new(
        Arc::clone(&bus),
        Queue::Vectorize,
        vectorize_worker,
        PoolConfig::new("vectorize-worker").with_max_concurrency(config.vectorize_worker_concurrency),
    );

    let auth = AuthValidator::new(&config.jwt_hmac_secret);
    let gateway_state = ingestflow_progress::GatewayState { broker: broker.clone(), auth };
    let app = ingestflow_progress::router(gateway_state);
    let listener = tokio::net::TcpListener::bind(&config.gateway_bind_addr).await?;
    tracing::info!(addr = %config.gateway_bind_addr, "subscriber gateway listening");

    // Each component runs to completion on its own task; main only waits on
    // the OS signal, then flips the shared `watch` so every task drains its
    // in-flight work before returning (spec §5 "graceful shutdown").
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { scheduler.run(shutdown_rx).await }
    });
    let extract_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { extract_pool.run(shutdown_rx).await }
    });
    let transform_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { transform_pool.run(shutdown_rx).await }
    });
    let load_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { load_pool.run(shutdown_rx).await }
    });
    let vectorize_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { vectorize_pool.run(shutdown_rx).await }
    });
    let sweep_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        let load_worker = Arc::clone(&load_worker);
        async move { load_worker.run_deferred_sweep(Duration::from_secs(60), shutdown_rx).await }
    });
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()))
            .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(
        scheduler_handle,
        extract_handle,
        transform_handle,
        load_handle,
        vectorize_handle,
        sweep_handle,
        server_handle,
    );

    tracing::info!("ingestflow daemon shut down");
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}
