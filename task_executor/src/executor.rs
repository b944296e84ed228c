// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The backfill and incremental state machines (SPEC_FULL §4.6/§4.7/§4.8). Grounded in
//! `original_source/src/crawler/procedures/new_channel.py`'s `handle_new_channel` and
//! `schedule.py`'s `handle_schedule`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use client_pool::{ChatClient, ClientError, ClientPool, MessageIter, ResolvedEntity};
use lease_manager::{LeaseGuard, SessionLeaseManager};
use session_directory::{Entity, Session, SessionId};
use sqlx::PgPool;

use crate::envelope::{BackfillEnvelope, IncrementalEnvelope};
use crate::error::{Disposition, TaskExecutorError};
use crate::outbound::{project_message, OutboundMessage};

/// Builds a connected-capable client for a given session's credentials. Implementations own
/// the concrete network client type; the executor only ever sees `Box<dyn ChatClient>`.
pub trait ClientFactory: Send + Sync {
    fn build(&self, session: &Session) -> Result<Box<dyn ChatClient>, ClientError>;
}

/// Publishes a projected message to the outbound bus subject. Implemented by `task_router`
/// over `async-nats`; tests use an in-memory recorder.
#[async_trait]
pub trait OutboundPublisher: Send + Sync {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), TaskExecutorError>;
}

struct Accumulator {
    first: Option<(i64, DateTime<Utc>)>,
    last: Option<(i64, DateTime<Utc>)>,
    count: i32,
}

impl Accumulator {
    fn new() -> Self {
        Accumulator { first: None, last: None, count: 0 }
    }

    fn observe(&mut self, id: i64, date: DateTime<Utc>) {
        if self.first.is_none() {
            self.first = Some((id, date));
        }
        self.last = Some((id, date));
        self.count += 1;
    }
}

enum NextAction {
    Continue,
    Skip,
    Stop,
}

pub struct TaskExecutor {
    pool: PgPool,
    lease_manager: SessionLeaseManager,
    client_factory: Arc<dyn ClientFactory>,
    publisher: Arc<dyn OutboundPublisher>,
    session_timeout: Duration,
}

impl TaskExecutor {
    pub fn new(
        pool: PgPool,
        lease_manager: SessionLeaseManager,
        client_factory: Arc<dyn ClientFactory>,
        publisher: Arc<dyn OutboundPublisher>,
        session_timeout: Duration,
    ) -> Self {
        TaskExecutor {
            pool,
            lease_manager,
            client_factory,
            publisher,
            session_timeout,
        }
    }

    async fn lease_for_entity(&self, entity_id: Option<i64>) -> Result<LeaseGuard, TaskExecutorError> {
        if let Some(entity_id) = entity_id {
            if let Some(session) = session_directory::find_subscribed(&self.pool, entity_id).await? {
                if let Some(guard) = self.lease_manager.acquire_specific(session.id).await {
                    return Ok(guard);
                }
            }
        }
        Ok(self.lease_manager.session(self.session_timeout).await?)
    }

    async fn open_client_for(&self, session_id: SessionId) -> Result<(Session, ClientPool<Box<dyn ChatClient>>), TaskExecutorError> {
        let session = session_directory::get(&self.pool, session_id)
            .await?
            .ok_or(TaskExecutorError::SessionVanished)?;
        let client = self.client_factory.build(&session)?;
        let pool_client = ClientPool::new();
        pool_client.open(client).await?;
        Ok((session, pool_client))
    }

    /// Runs the backfill state machine (SPEC_FULL §4.6) to completion and returns the
    /// disposition the task router should apply to the inbound bus message.
    pub async fn run_backfill(&self, envelope: BackfillEnvelope) -> Disposition {
        match self.run_backfill_inner(&envelope).await {
            Ok(()) => Disposition::Ack,
            Err(err) => {
                log::warn!("backfill task for {} failed: {err}", envelope.channel_url);
                err.disposition()
            }
        }
    }

    async fn run_backfill_inner(&self, envelope: &BackfillEnvelope) -> Result<(), TaskExecutorError> {
        let existing_entity = session_directory::get_by_url(&self.pool, &envelope.channel_url).await?;
        let lease_guard = self.lease_for_entity(existing_entity.as_ref().map(|e| e.id)).await?;
        let (_session, pool_client) = self.open_client_for(lease_guard.session_id()).await?;

        let outcome = self.run_backfill_with_client(&pool_client, envelope, &lease_guard, existing_entity).await;
        let _ = pool_client.close().await;
        outcome
    }

    async fn run_backfill_with_client(
        &self,
        pool_client: &ClientPool<Box<dyn ChatClient>>,
        envelope: &BackfillEnvelope,
        lease_guard: &LeaseGuard,
        existing_entity: Option<Entity>,
    ) -> Result<(), TaskExecutorError> {
        let resolved = self.resolve_entity(pool_client, &envelope.channel_url, existing_entity.as_ref()).await?;
        let (entity, _is_new) =
            session_directory::create_or_get(&self.pool, &envelope.channel_url, resolved.id, &resolved.name).await?;
        session_directory::ensure_mapping(&self.pool, lease_guard.session_id(), entity.id).await?;

        let ranges = range_planner::plan_ranges(&self.pool, entity.id, envelope.datetime_offset, None).await?;
        if ranges.is_empty() {
            return Ok(());
        }

        for (a, b) in ranges {
            let mut iter = pool_client
                .with_client(|c| {
                    let resolved = resolved.clone();
                    async move { Ok(c.iter_messages(resolved, false)) }
                })
                .await?;

            let (acc, rate_limited) =
                iterate_range(iter.as_mut(), entity.id, &resolved.name, self.publisher.as_ref(), |msg| {
                    if msg.date < a {
                        NextAction::Stop
                    } else if msg.date > b {
                        NextAction::Skip
                    } else {
                        NextAction::Continue
                    }
                })
                .await?;

            if let (Some((from_id, from_dt)), Some((to_id, to_dt))) = (acc.first, acc.last) {
                session_directory::record_collection(&self.pool, entity.id, from_id, to_id, from_dt, to_dt, acc.count)
                    .await?;
            }

            if rate_limited {
                return Err(TaskExecutorError::GatewayTransient("rate limited by chat platform".to_owned()));
            }
        }

        Ok(())
    }

    /// Runs the incremental state machine (SPEC_FULL §4.7).
    pub async fn run_incremental(&self, envelope: IncrementalEnvelope) -> Disposition {
        match self.run_incremental_inner(&envelope).await {
            Ok(()) => Disposition::Ack,
            Err(err) => {
                log::warn!("incremental task for channel {} failed: {err}", envelope.channel_id);
                err.disposition()
            }
        }
    }

    async fn run_incremental_inner(&self, envelope: &IncrementalEnvelope) -> Result<(), TaskExecutorError> {
        let Some(entity) = session_directory::get_by_external_id(&self.pool, envelope.channel_id).await? else {
            return Err(TaskExecutorError::EntityNotFound);
        };

        let lease_guard = self.lease_for_entity(Some(entity.id)).await?;
        let (_session, pool_client) = self.open_client_for(lease_guard.session_id()).await?;

        let outcome = self
            .run_incremental_with_client(&pool_client, envelope, &lease_guard, &entity)
            .await;
        let _ = pool_client.close().await;
        outcome
    }

    async fn run_incremental_with_client(
        &self,
        pool_client: &ClientPool<Box<dyn ChatClient>>,
        envelope: &IncrementalEnvelope,
        lease_guard: &LeaseGuard,
        entity: &Entity,
    ) -> Result<(), TaskExecutorError> {
        let resolved = pool_client
            .with_client(|c| {
                let external_id = entity.external_id;
                async move { c.get_input_entity(external_id).await }
            })
            .await?;
        session_directory::ensure_mapping(&self.pool, lease_guard.session_id(), entity.id).await?;

        let mut iter = pool_client
            .with_client(|c| {
                let resolved = resolved.clone();
                async move { Ok(c.iter_messages(resolved, false)) }
            })
            .await?;

        let last_message_id = envelope.last_message_id;
        let (acc, rate_limited) =
            iterate_range(iter.as_mut(), entity.id, &resolved.name, self.publisher.as_ref(), |msg| {
                if msg.id <= last_message_id {
                    NextAction::Stop
                } else {
                    NextAction::Continue
                }
            })
            .await?;

        if let (Some((from_id, from_dt)), Some((to_id, to_dt))) = (acc.first, acc.last) {
            session_directory::record_collection(&self.pool, entity.id, from_id, to_id, from_dt, to_dt, acc.count)
                .await?;
        }

        if rate_limited {
            return Err(TaskExecutorError::GatewayTransient("rate limited by chat platform".to_owned()));
        }

        Ok(())
    }

    async fn resolve_entity(
        &self,
        pool_client: &ClientPool<Box<dyn ChatClient>>,
        channel_url: &str,
        existing_entity: Option<&Entity>,
    ) -> Result<ResolvedEntity, TaskExecutorError> {
        if let Some(external_id) = existing_entity.map(|e| e.external_id) {
            Ok(pool_client.with_client(|c| async move { c.get_input_entity(external_id).await }).await?)
        } else {
            let url = channel_url.to_owned();
            Ok(pool_client.with_client(|c| async move { c.get_entity(&url).await }).await?)
        }
    }
}

/// Iterates `iter`, projecting and publishing each message `action_for` accepts, until the
/// predicate says to stop, the iterator is exhausted, or a rate-limit signal interrupts it
/// (SPEC_FULL §4.8). Returns the accumulated sub-range bounds and whether a rate limit cut
/// iteration short.
async fn iterate_range<F>(
    iter: &mut dyn MessageIter,
    entity_id: i64,
    entity_name: &str,
    publisher: &dyn OutboundPublisher,
    mut action_for: F,
) -> Result<(Accumulator, bool), TaskExecutorError>
where
    F: FnMut(&client_pool::ChatMessage) -> NextAction,
{
    let mut acc = Accumulator::new();
    loop {
        match iter.next().await {
            Ok(Some(msg)) => match action_for(&msg) {
                NextAction::Stop => break,
                NextAction::Skip => continue,
                NextAction::Continue => {
                    let projected = project_message(&msg, entity_id, entity_name);
                    publisher.publish(&projected).await?;
                    acc.observe(msg.id, msg.date);
                }
            },
            Ok(None) => break,
            Err(ClientError::RateLimited { seconds }) => {
                log::warn!("rate limited, waiting {seconds}s is deferred to redelivery");
                return Ok((acc, true));
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok((acc, false))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use client_pool::testutil::FakeChatClient;
    use client_pool::{ChatMessage, EntityKind, ResolvedEntity};
    use lease_gateway::testutil::InMemoryKvGateway;
    use lease_manager::SessionLeaseManager;
    use session_directory::MIGRATOR;
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;

    use super::*;
    use crate::testutil::{FakeClientFactory, RecordingPublisher};

    async fn test_pool() -> Option<PgPool> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.expect("connect");
        MIGRATOR.run(&pool).await.expect("run migrations");
        Some(pool)
    }

    async fn seed_session(pool: &PgPool, id: i64) {
        sqlx::query(
            "INSERT INTO crawler.sessions (id, session, api_id, api_hash, tel) \
             VALUES ($1, 's', 1, 'h', 't') ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
    }

    fn lease_manager() -> SessionLeaseManager {
        SessionLeaseManager::new(
            Arc::new(InMemoryKvGateway::new()),
            "lease.".to_owned(),
            "test-worker".to_owned(),
            Duration::from_secs(30),
        )
    }

    fn msg(id: i64, minutes_ago: i64) -> ChatMessage {
        ChatMessage {
            id,
            date: Utc::now() - chrono::Duration::minutes(minutes_ago),
            sender_id: None,
            sender_name: None,
            text: format!("message {id}"),
            reactions: vec![],
            views: None,
            forwards: None,
            replies: None,
            media_type: None,
            media_url: None,
            reply_to_message_id: None,
            entities: vec![],
        }
    }

    #[tokio::test]
    async fn backfill_with_no_messages_acks_without_collection_record() {
        let Some(pool) = test_pool().await else {
            eprintln!("skipping: TEST_DATABASE_URL not set");
            return;
        };
        seed_session(&pool, 1).await;

        let lm = lease_manager();
        lm.update_resources(&[1]);

        let client_factory = Arc::new(FakeClientFactory::new(
            FakeChatClient::new().with_entity(ResolvedEntity {
                kind: EntityKind::Channel,
                id: 9001,
                name: "No Messages".to_owned(),
            }),
        ));
        let publisher = Arc::new(RecordingPublisher::new());
        let executor = TaskExecutor::new(pool.clone(), lm, client_factory, publisher.clone(), Duration::from_secs(5));

        let envelope = BackfillEnvelope {
            channel_url: "https://t.me/no-messages-test".to_owned(),
            datetime_offset: Utc::now() - chrono::Duration::hours(1),
        };
        let disposition = executor.run_backfill(envelope).await;

        assert_eq!(disposition, Disposition::Ack);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_mid_iteration_records_partial_and_nacks() {
        let Some(pool) = test_pool().await else {
            eprintln!("skipping: TEST_DATABASE_URL not set");
            return;
        };
        seed_session(&pool, 2).await;

        let lm = lease_manager();
        lm.update_resources(&[2]);

        let messages = vec![msg(5, 1), msg(4, 2), msg(3, 3), msg(2, 4), msg(1, 5)];
        let client_factory = Arc::new(FakeClientFactory::new(
            FakeChatClient::new()
                .with_entity(ResolvedEntity {
                    kind: EntityKind::Channel,
                    id: 9002,
                    name: "Rate Limited".to_owned(),
                })
                .with_messages(messages)
                .with_rate_limit_after(5),
        ));
        let publisher = Arc::new(RecordingPublisher::new());
        let executor = TaskExecutor::new(pool.clone(), lm, client_factory, publisher.clone(), Duration::from_secs(5));

        let envelope = BackfillEnvelope {
            channel_url: "https://t.me/rate-limited-test".to_owned(),
            datetime_offset: Utc::now() - chrono::Duration::hours(1),
        };
        let disposition = executor.run_backfill(envelope).await;

        assert_eq!(disposition, Disposition::Nack);
        assert_eq!(publisher.published().len(), 5);

        let entity = session_directory::get_by_url(&pool, "https://t.me/rate-limited-test")
            .await
            .unwrap()
            .unwrap();
        let count: i64 = sqlx::query_scalar(
            "SELECT messages_count FROM crawler.channel_collections WHERE entity_id = $1",
        )
        .bind(entity.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn backfill_with_unknown_entity_type_acks_without_retry() {
        let Some(pool) = test_pool().await else {
            eprintln!("skipping: TEST_DATABASE_URL not set");
            return;
        };
        seed_session(&pool, 3).await;

        let lm = lease_manager();
        lm.update_resources(&[3]);

        let client_factory = Arc::new(FakeClientFactory::new(FakeChatClient::new().with_unknown_entity()));
        let publisher = Arc::new(RecordingPublisher::new());
        let executor = TaskExecutor::new(pool, lm, client_factory, publisher, Duration::from_secs(5));

        let envelope = BackfillEnvelope {
            channel_url: "https://t.me/unknown-entity-test".to_owned(),
            datetime_offset: Utc::now() - chrono::Duration::hours(1),
        };
        assert_eq!(executor.run_backfill(envelope).await, Disposition::Ack);
    }

    #[tokio::test]
    async fn incremental_for_unknown_channel_acks_without_retry() {
        let Some(pool) = test_pool().await else {
            eprintln!("skipping: TEST_DATABASE_URL not set");
            return;
        };

        let lm = lease_manager();
        let client_factory = Arc::new(FakeClientFactory::new(FakeChatClient::new()));
        let publisher = Arc::new(RecordingPublisher::new());
        let executor = TaskExecutor::new(pool, lm, client_factory, publisher, Duration::from_secs(5));

        let envelope = IncrementalEnvelope {
            channel_id: 424242,
            last_message_id: 1,
        };
        assert_eq!(executor.run_incremental(envelope).await, Disposition::Ack);
    }
}
