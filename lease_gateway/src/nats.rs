// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! NATS JetStream KV-backed implementation of [`crate::KvGateway`].

use std::time::Duration;

use async_nats::jetstream::kv::{Operation, Store};
use async_nats::jetstream::{self, Context};
use async_trait::async_trait;
use futures::StreamExt;
use infra::retry::{retry_call, Backoff};

use crate::{KvEvent, KvEventStream, KvGateway, KvGatewayError, Revision};

/// Connect-time retry policy: three attempts, exponential 1s/2s/4s capped at 10s, matching
/// the client pool's own connect policy (SPEC_FULL §4.5) since both are "reach an external
/// broker over the network" operations of the same shape.
const CONNECT_BACKOFF: Backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 3);

pub struct NatsKvGateway {
    store: Store,
}

impl NatsKvGateway {
    /// Connects to the NATS servers in `dsns` and binds (creating if absent) the named KV
    /// bucket with the given default TTL.
    pub async fn connect(
        dsns: &[String],
        bucket: &str,
        ttl: Duration,
    ) -> Result<Self, KvGatewayError> {
        let servers = dsns.join(",");
        let client = retry_call(
            servers,
            CONNECT_BACKOFF,
            |servers| async move { async_nats::connect(servers).await },
            |err| {
                log::error!("Failed to connect to NATS: {err}");
                true
            },
        )
        .await
        .map_err(|err| KvGatewayError::Transient(format!("NATS connect failed: {err}")))?;

        let jetstream = jetstream::new(client);
        let store = get_or_create_bucket(&jetstream, bucket, ttl).await?;

        Ok(NatsKvGateway { store })
    }
}

async fn get_or_create_bucket(
    jetstream: &Context,
    bucket: &str,
    ttl: Duration,
) -> Result<Store, KvGatewayError> {
    if let Ok(store) = jetstream.get_key_value(bucket).await {
        return Ok(store);
    }

    jetstream
        .create_key_value(async_nats::jetstream::kv::Config {
            bucket: bucket.to_owned(),
            max_age: ttl,
            ..Default::default()
        })
        .await
        .map_err(|err| KvGatewayError::Transient(format!("failed to create KV bucket: {err}")))
}

#[async_trait]
impl KvGateway for NatsKvGateway {
    async fn create(&self, key: &str, value: &[u8]) -> Result<Revision, KvGatewayError> {
        self.store
            .create(key, value.to_vec().into())
            .await
            .map_err(|err| {
                if err.to_string().contains("already exists") {
                    KvGatewayError::AlreadyExists(key.to_owned())
                } else {
                    KvGatewayError::Transient(err.to_string())
                }
            })
    }

    async fn update(
        &self,
        key: &str,
        value: &[u8],
        expect_revision: Revision,
    ) -> Result<Revision, KvGatewayError> {
        self.store
            .update(key, value.to_vec().into(), expect_revision)
            .await
            .map_err(|err| {
                let msg = err.to_string();
                if msg.contains("wrong last sequence") {
                    KvGatewayError::SequenceMismatch {
                        key: key.to_owned(),
                        expected: expect_revision,
                    }
                } else if msg.contains("not found") {
                    KvGatewayError::NotFound(key.to_owned())
                } else {
                    KvGatewayError::Transient(msg)
                }
            })
    }

    async fn purge(&self, key: &str) -> Result<(), KvGatewayError> {
        match self.store.purge(key).await {
            Ok(()) => Ok(()),
            // Purging an absent key is the common case (releasing an already-expired
            // lease) and must stay idempotent.
            Err(err) if err.to_string().contains("not found") => Ok(()),
            Err(err) => Err(KvGatewayError::Transient(err.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, KvGatewayError> {
        let mut keys = self
            .store
            .keys()
            .await
            .map_err(|err| KvGatewayError::Transient(err.to_string()))?;

        let mut out = Vec::new();
        while let Some(key) = keys.next().await {
            let key = key.map_err(|err| KvGatewayError::Transient(err.to_string()))?;
            if key.starts_with(prefix) {
                out.push(key);
            }
        }
        Ok(out)
    }

    async fn watch(&self, prefix: &str) -> Result<KvEventStream, KvGatewayError> {
        let watch_prefix = format!("{prefix}*");
        let watch = self
            .store
            .watch(&watch_prefix)
            .await
            .map_err(|err| KvGatewayError::Transient(err.to_string()))?;

        let stream = watch.map(|entry| {
            let entry = entry.map_err(|err| KvGatewayError::Transient(err.to_string()))?;
            let op = match entry.operation {
                Operation::Put => crate::KvOp::Put,
                Operation::Delete | Operation::Purge => crate::KvOp::Purge,
            };
            Ok(KvEvent {
                key: entry.key,
                op,
                revision: entry.revision,
            })
        });

        Ok(Box::pin(stream))
    }

    async fn get_revision(&self, key: &str) -> Result<Option<Revision>, KvGatewayError> {
        match self.store.entry(key).await {
            Ok(Some(entry)) if entry.operation == Operation::Put => Ok(Some(entry.revision)),
            Ok(_) => Ok(None),
            Err(err) => Err(KvGatewayError::Transient(err.to_string())),
        }
    }
}
