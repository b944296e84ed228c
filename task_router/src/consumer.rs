// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Durable pull-consumer loop shared by the backfill and incremental subjects (SPEC_FULL
//! §4.9/§6.1). Grounded in `original_source/src/crawler/routes/new_channel.py`'s
//! `ConsumerConfig` shape (explicit ack, `deliver_policy=new`, bounded `max_deliver`,
//! `max_ack_pending=1`).

use std::future::Future;

use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy};
use async_nats::jetstream::context::Context;
use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::AckKind;
use futures::StreamExt;
use tokio::sync::watch;

use crate::error::TaskRouterError;

/// Durable-consumer shape for one inbound subject.
pub struct ConsumerSpec {
    pub durable_name: String,
    pub filter_subject: String,
    pub max_deliver: i64,
}

/// Fetches the named stream, creating it bound to `subjects` if it does not yet exist.
/// Shared by the inbound task consumers and the outbound message publisher so every subject
/// this process touches has a backing stream before first use.
pub async fn ensure_stream(
    jetstream: &Context,
    stream_name: &str,
    subjects: Vec<String>,
) -> Result<async_nats::jetstream::stream::Stream, TaskRouterError> {
    if let Ok(stream) = jetstream.get_stream(stream_name).await {
        return Ok(stream);
    }
    jetstream
        .create_stream(StreamConfig {
            name: stream_name.to_owned(),
            subjects,
            ..Default::default()
        })
        .await
        .map_err(|err| TaskRouterError::Connect(err.to_string()))
}

/// Pulls deliveries from a durable consumer bound to `spec.filter_subject` within
/// `stream_name`, handing each payload to `handle`. `handle` returns `true` to ack (success,
/// or a non-retriable failure per SPEC_FULL §7) and `false` to nack. A message that has
/// already been delivered `spec.max_deliver` times is instead republished to
/// `<filter_subject>.dlq` and acked, terminating redelivery (SPEC_FULL §4.9).
pub async fn run_consumer<H, Fut>(
    jetstream: Context,
    stream_name: &str,
    spec: ConsumerSpec,
    mut shutdown: watch::Receiver<()>,
    handle: H,
) -> Result<(), TaskRouterError>
where
    H: Fn(Vec<u8>) -> Fut,
    Fut: Future<Output = bool>,
{
    let stream = ensure_stream(&jetstream, stream_name, vec![spec.filter_subject.clone()]).await?;

    let consumer = stream
        .create_consumer(PullConfig {
            durable_name: Some(spec.durable_name.clone()),
            filter_subject: spec.filter_subject.clone(),
            ack_policy: AckPolicy::Explicit,
            deliver_policy: DeliverPolicy::New,
            max_deliver: spec.max_deliver,
            max_ack_pending: 1,
            ..Default::default()
        })
        .await
        .map_err(|err| TaskRouterError::Connect(err.to_string()))?;

    let dlq_subject = format!("{}.dlq", spec.filter_subject);
    let mut messages = consumer.messages().await.map_err(|err| TaskRouterError::Connect(err.to_string()))?;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                log::info!("shutdown signal observed, stopping consumer {}", spec.durable_name);
                return Ok(());
            }
            next = messages.next() => {
                let Some(received) = next else { return Ok(()) };
                let message = match received {
                    Ok(message) => message,
                    Err(err) => {
                        log::warn!("consumer {} pull error: {err}", spec.durable_name);
                        continue;
                    }
                };
                handle_one(&jetstream, &dlq_subject, spec.max_deliver, message, &handle).await;
            }
        }
    }
}

async fn handle_one<H, Fut>(
    jetstream: &Context,
    dlq_subject: &str,
    max_deliver: i64,
    message: async_nats::jetstream::Message,
    handle: &H,
) where
    H: Fn(Vec<u8>) -> Fut,
    Fut: Future<Output = bool>,
{
    let payload = message.payload.to_vec();
    let delivered = message.info().map(|info| info.delivered as i64).unwrap_or(1);

    if handle(payload.clone()).await {
        if let Err(err) = message.ack().await {
            log::error!("failed to ack message: {err}");
        }
        return;
    }

    if delivered >= max_deliver {
        log::warn!("message exhausted {max_deliver} deliveries, routing to {dlq_subject}");
        if let Err(err) = jetstream.publish(dlq_subject.to_owned(), payload.into()).await {
            log::error!("failed to publish to dead-letter subject {dlq_subject}: {err}");
        }
        if let Err(err) = message.ack().await {
            log::error!("failed to ack exhausted message: {err}");
        }
        return;
    }

    if let Err(err) = message.ack_with(AckKind::Nak(None)).await {
        log::error!("failed to nack message: {err}");
    }
}
