// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Process configuration, loaded from the environment (SPEC_FULL §6.5/§10.2). Uses `clap`'s
//! `env` attribute support in the teacher's own `#[arg(long, env)]` idiom rather than a
//! layered YAML file: every setting here is a scalar or a short list, with no nested
//! structure that would justify `storage_server::config::Config`'s `serde_yaml` approach.

use std::time::Duration;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(name = "crawler-worker")]
#[command(about = "Ingests chat-platform channel history into the analytical store.")]
pub struct Settings {
    /// Postgres connection string for the `crawler` schema.
    #[arg(long, env = "PG_DSN")]
    pub pg_dsn: String,

    /// One or more NATS server addresses (comma-separated).
    #[arg(long, env = "NATS_DSN", value_delimiter = ',', num_args = 1..)]
    pub nats_dsn: Vec<String>,

    /// Prefix prepended to every lease key in the KV bucket; the session ID is appended
    /// directly, matching `<prefix>.<session_id>` (SPEC_FULL §4.2/§6.3).
    #[arg(long, env = "NATS_PREFIX", default_value = "crawler.lease.")]
    pub nats_prefix: String,

    /// Name of the KV bucket leases are stored in.
    #[arg(long, env = "NATS_KV_BUCKET", default_value = "crawler-sessions")]
    pub nats_kv_bucket: String,

    /// TTL, in seconds, for lease keys. The auto-refresher renews at half this interval.
    #[arg(long, env = "NATS_KV_TTL", default_value_t = 30)]
    pub nats_kv_ttl_secs: u64,

    /// Maximum redelivery count for inbound task messages before they are routed to the
    /// dead-letter subject (SPEC_FULL §4.9).
    #[arg(long, env = "NATS_MAX_DELIVERED_MESSAGES_COUNT", default_value_t = 10)]
    pub max_delivered_messages_count: i64,

    /// Stream the backfill and incremental consumers are bound to.
    #[arg(long, env = "NATS_TASK_STREAM", default_value = "crawler-tasks")]
    pub task_stream: String,

    /// Subject outbound messages are published to.
    #[arg(long, env = "MESSAGE_SUBJECT", default_value = "crawler.messages")]
    pub message_subject: String,

    /// Stream `MESSAGE_SUBJECT` is published into.
    #[arg(long, env = "MESSAGE_STREAM", default_value = "crawler-messages")]
    pub message_stream: String,

    /// Maximum number of outbound publishes the publisher lets sit un-acked at once; bounds
    /// pipelining without reordering the per-sub-range publish sequence (SPEC_FULL §5/§6.5).
    #[arg(long, env = "MESSAGE_BATCH_SIZE", default_value_t = 100)]
    pub message_batch_size: usize,

    /// This worker instance's identifier, recorded as the lease value so other workers can
    /// tell who holds a session. Defaults to a random UUID, matching the source's own
    /// `POD_NAME` setting's `default_factory=str(uuid4())`.
    #[arg(long, env = "POD_NAME", default_value_t = crawler_util::default_instance_name())]
    pub pod_name: String,

    /// Raises the default log directive to `debug` when `RUST_LOG` is unset.
    #[arg(long, env = "DEBUG", default_value_t = false)]
    pub debug: bool,

    /// Telegram API ID issued to the application, shared by every session in the pool.
    #[arg(long, env = "TELEGRAM_API_ID")]
    pub telegram_api_id: i32,

    /// Telegram API hash issued to the application.
    #[arg(long, env = "TELEGRAM_API_HASH")]
    pub telegram_api_hash: String,

    /// How long to wait for a free session before a task nacks with `lease-busy`'s timeout
    /// disposition (SPEC_FULL §4.2.1/§5).
    #[arg(long, env = "SESSION_ACQUIRE_TIMEOUT_SECS", default_value_t = 60)]
    pub session_acquire_timeout_secs: u64,

    /// Bind address for the `/metricsz` Prometheus scrape endpoint (SPEC_FULL §10.4).
    #[arg(long, env = "METRICSZ_BIND_ADDR", default_value = "0.0.0.0:8010")]
    pub metricsz_bind_addr: String,

    /// Bind address for the `/healthz` liveness endpoint.
    #[arg(long, env = "HEALTHZ_BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub healthz_bind_addr: String,
}

impl Settings {
    pub fn kv_ttl(&self) -> Duration {
        Duration::from_secs(self.nats_kv_ttl_secs)
    }

    pub fn session_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.session_acquire_timeout_secs)
    }

    pub fn infra_config(&self) -> infra::infra::InfraConfig {
        infra::infra::InfraConfig {
            metricsz_bind_addr: self.metricsz_bind_addr.clone(),
            bind_addr: self.healthz_bind_addr.clone(),
        }
    }
}
