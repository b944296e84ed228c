// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The `session_entity_map` table: the sticky session↔channel binding (SPEC_FULL §3/§4.4).

use sqlx::PgPool;

use crate::entities::EntityId;
use crate::error::SessionDirectoryError;
use crate::sessions::{Session, SessionId};

/// Returns any one session already known to have fetched history for `entity_id`, or `None`
/// if no session is subscribed yet.
pub async fn find_subscribed(
    pool: &PgPool,
    entity_id: EntityId,
) -> Result<Option<Session>, SessionDirectoryError> {
    let row = sqlx::query!(
        r#"
        SELECT s.id, s.session, s.api_id, s.api_hash, s.tel, s.proxy
        FROM crawler.sessions s
        JOIN crawler.session_entity_map m ON m.session_id = s.id
        WHERE m.entity_id = $1
        LIMIT 1
        "#,
        entity_id,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| Session {
        id: row.id,
        session: row.session,
        api_id: row.api_id,
        api_hash: row.api_hash,
        tel: row.tel,
        proxy: row.proxy,
    }))
}

/// Idempotently records that `session_id` has successfully fetched history for `entity_id`.
/// Guarded by a uniqueness lookup rather than relying solely on the unique constraint, so a
/// caller that runs this outside the collection-record transaction gets a plain `Ok` back
/// on the already-mapped path instead of a constraint-violation error to handle.
pub async fn ensure_mapping(
    pool: &PgPool,
    session_id: SessionId,
    entity_id: EntityId,
) -> Result<(), SessionDirectoryError> {
    let existing = sqlx::query!(
        r#"SELECT id FROM crawler.session_entity_map WHERE session_id = $1 AND entity_id = $2"#,
        session_id,
        entity_id,
    )
    .fetch_optional(pool)
    .await?;

    if existing.is_some() {
        return Ok(());
    }

    sqlx::query!(
        r#"INSERT INTO crawler.session_entity_map (session_id, entity_id) VALUES ($1, $2)
           ON CONFLICT (session_id, entity_id) DO NOTHING"#,
        session_id,
        entity_id,
    )
    .execute(pool)
    .await?;

    Ok(())
}
