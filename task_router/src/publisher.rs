// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Publishes projected messages to the outbound subject (SPEC_FULL §6.2), the counterpart to
//! `lease_gateway::nats::NatsKvGateway` for the message bus rather than the KV store.

use std::sync::Arc;

use async_nats::jetstream::context::Context;
use async_trait::async_trait;
use task_executor::{OutboundMessage, OutboundPublisher, TaskExecutorError};
use tokio::sync::Semaphore;

/// Publishes to `<MESSAGE_SUBJECT>`, bounding the number of publishes awaiting their
/// JetStream ack at once to `MESSAGE_BATCH_SIZE` (SPEC_FULL §6.5) so the executor can pipeline
/// a sub-range's messages onto the wire instead of paying one round trip per message, without
/// changing the ordered, one-result-per-call contract `iterate_range` relies on.
pub struct NatsPublisher {
    jetstream: Context,
    subject: String,
    in_flight: Arc<Semaphore>,
}

impl NatsPublisher {
    pub fn new(jetstream: Context, subject: String, batch_size: usize) -> Self {
        NatsPublisher {
            jetstream,
            subject,
            in_flight: Arc::new(Semaphore::new(batch_size.max(1))),
        }
    }
}

#[async_trait]
impl OutboundPublisher for NatsPublisher {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), TaskExecutorError> {
        let payload = serde_json::to_vec(message).map_err(|err| {
            TaskExecutorError::GatewayTransient(format!("failed to serialize outbound message: {err}"))
        })?;

        let _permit = self.in_flight.acquire().await.expect("semaphore is never closed");
        let ack = self
            .jetstream
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|err| TaskExecutorError::GatewayTransient(err.to_string()))?;
        ack.await.map_err(|err| TaskExecutorError::GatewayTransient(err.to_string()))?;
        Ok(())
    }
}
