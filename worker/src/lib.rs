// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Process entry point wiring: connects to Postgres, NATS, and the KV bucket; constructs the
//! lease manager, task executor, and task router; and runs them until a shutdown signal
//! fires (SPEC_FULL §10.2/§10.4). Grounded in `storage_server/src/main.rs`'s connect-then-
//! serve shape and the teacher's original `worker/src/main.rs` restart-on-signal idiom.

pub mod config;

use std::sync::Arc;

use async_nats::jetstream;
use lease_gateway::nats::NatsKvGateway;
use lease_gateway::KvGateway;
use lease_manager::SessionLeaseManager;
use sqlx::postgres::PgPoolOptions;
use task_executor::{BackfillEnvelope, IncrementalEnvelope, TaskExecutor};
use task_router::{run_consumer, run_kv_watch, ConsumerSpec, NatsPublisher};
use telegram_client::GrammersClientFactory;

use crate::config::Settings;

const BACKFILL_SUBJECT: &str = "new_channel";
const SCHEDULE_SUBJECT: &str = "schedule";
const BACKFILL_CONSUMER: &str = "new_channel_consumer";
const SCHEDULE_CONSUMER: &str = "schedule_consumer";

/// Connects every external dependency and runs the worker until `/healthz`'s shutdown
/// channel fires (SIGINT/SIGTERM). Returns only on graceful shutdown or unrecoverable
/// connect failure.
pub async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    infra::logging::setup_logging(settings.debug);
    log::info!("starting crawler worker, pod_name={}", settings.pod_name);

    let pg_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.pg_dsn)
        .await?;
    session_directory::MIGRATOR.run(&pg_pool).await?;

    let gateway: Arc<dyn KvGateway> =
        Arc::new(NatsKvGateway::connect(&settings.nats_dsn, &settings.nats_kv_bucket, settings.kv_ttl()).await?);

    let lease_manager = SessionLeaseManager::new(
        gateway.clone(),
        settings.nats_prefix.clone(),
        settings.pod_name.clone(),
        settings.kv_ttl(),
    );
    let known_sessions = session_directory::all_ids(&pg_pool).await?;
    lease_manager.update_resources(&known_sessions);

    let nats_client = async_nats::connect(settings.nats_dsn.join(",")).await?;
    let jetstream = jetstream::new(nats_client);
    task_router::ensure_stream(&jetstream, &settings.message_stream, vec![settings.message_subject.clone()]).await?;

    let client_factory = Arc::new(GrammersClientFactory::new(settings.telegram_api_id, settings.telegram_api_hash.clone()));
    let publisher = Arc::new(NatsPublisher::new(
        jetstream.clone(),
        settings.message_subject.clone(),
        settings.message_batch_size,
    ));
    let executor = Arc::new(TaskExecutor::new(
        pg_pool.clone(),
        lease_manager.clone(),
        client_factory,
        publisher,
        settings.session_acquire_timeout(),
    ));

    let shutdown = infra::infra::setup_infra_endpoints(settings.infra_config(), || {})
        .map_err(|err| format!("failed to set up infra endpoints: {err}"))?;

    let kv_watch = tokio::spawn(run_kv_watch(
        gateway,
        settings.nats_prefix.clone(),
        lease_manager,
        shutdown.clone(),
    ));

    let backfill_executor = executor.clone();
    let backfill_consumer = run_consumer(
        jetstream.clone(),
        &settings.task_stream,
        ConsumerSpec {
            durable_name: BACKFILL_CONSUMER.to_owned(),
            filter_subject: BACKFILL_SUBJECT.to_owned(),
            max_deliver: settings.max_delivered_messages_count,
        },
        shutdown.clone(),
        move |payload| {
            let executor = backfill_executor.clone();
            async move {
                match serde_json::from_slice::<BackfillEnvelope>(&payload) {
                    Ok(envelope) => match envelope.validate() {
                        Ok(()) => executor.run_backfill(envelope).await == task_executor::Disposition::Ack,
                        Err(err) => {
                            log::error!("invalid backfill envelope, acking to drop it: {err}");
                            true
                        }
                    },
                    Err(err) => {
                        log::error!("malformed backfill envelope, acking to drop it: {err}");
                        true
                    }
                }
            }
        },
    );

    let incremental_executor = executor.clone();
    let incremental_consumer = run_consumer(
        jetstream,
        &settings.task_stream,
        ConsumerSpec {
            durable_name: SCHEDULE_CONSUMER.to_owned(),
            filter_subject: SCHEDULE_SUBJECT.to_owned(),
            max_deliver: settings.max_delivered_messages_count,
        },
        shutdown,
        move |payload| {
            let executor = incremental_executor.clone();
            async move {
                match serde_json::from_slice::<IncrementalEnvelope>(&payload) {
                    Ok(envelope) => match envelope.validate() {
                        Ok(()) => executor.run_incremental(envelope).await == task_executor::Disposition::Ack,
                        Err(err) => {
                            log::error!("invalid incremental envelope, acking to drop it: {err}");
                            true
                        }
                    },
                    Err(err) => {
                        log::error!("malformed incremental envelope, acking to drop it: {err}");
                        true
                    }
                }
            }
        },
    );

    let (backfill_result, incremental_result) = tokio::join!(backfill_consumer, incremental_consumer);
    backfill_result?;
    incremental_result?;
    kv_watch.abort();

    log::info!("worker shut down cleanly");
    Ok(())
}
