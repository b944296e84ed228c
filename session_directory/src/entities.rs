// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The `entities` table: channels/chats/users resolved through the chat-platform client
//! library, created lazily on first successful URL resolution (SPEC_FULL §3).

use sqlx::{PgPool, Postgres, Transaction};

use crate::error::SessionDirectoryError;

pub type EntityId = i64;

/// A resolved chat-platform entity (channel, chat, or user).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entity {
    pub id: EntityId,
    pub external_id: i64,
    pub name: String,
    pub url: String,
}

#[derive(sqlx::FromRow)]
struct EntityRow {
    id: i64,
    entity_id: i64,
    entity_name: String,
    entity_url: String,
}

impl From<EntityRow> for Entity {
    fn from(row: EntityRow) -> Self {
        Entity {
            id: row.id,
            external_id: row.entity_id,
            name: row.entity_name,
            url: row.entity_url,
        }
    }
}

pub async fn get_by_url(pool: &PgPool, url: &str) -> Result<Option<Entity>, SessionDirectoryError> {
    let row: Option<EntityRow> = sqlx::query_as(
        r#"SELECT id, entity_id, entity_name, entity_url FROM crawler.entities WHERE entity_url = $1"#,
    )
    .bind(url)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Entity::from))
}

pub async fn get_by_external_id(
    pool: &PgPool,
    external_id: i64,
) -> Result<Option<Entity>, SessionDirectoryError> {
    let row: Option<EntityRow> = sqlx::query_as(
        r#"SELECT id, entity_id, entity_name, entity_url FROM crawler.entities WHERE entity_id = $1"#,
    )
    .bind(external_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Entity::from))
}

/// First-by-url then first-by-external-id lookup inside a single SERIALIZABLE transaction;
/// inserts only if neither matches. Returns `(entity, is_new)`.
pub async fn create_or_get(
    pool: &PgPool,
    url: &str,
    external_id: i64,
    name: &str,
) -> Result<(Entity, bool), SessionDirectoryError> {
    let mut tx: Transaction<'_, Postgres> = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut tx)
        .await?;

    let by_url: Option<EntityRow> = sqlx::query_as(
        r#"SELECT id, entity_id, entity_name, entity_url FROM crawler.entities WHERE entity_url = $1"#,
    )
    .bind(url)
    .fetch_optional(&mut tx)
    .await?;
    if let Some(existing) = by_url {
        tx.commit().await?;
        return Ok((existing.into(), false));
    }

    let by_external_id: Option<EntityRow> = sqlx::query_as(
        r#"SELECT id, entity_id, entity_name, entity_url FROM crawler.entities WHERE entity_id = $1"#,
    )
    .bind(external_id)
    .fetch_optional(&mut tx)
    .await?;
    if let Some(existing) = by_external_id {
        tx.commit().await?;
        return Ok((existing.into(), false));
    }

    let inserted: EntityRow = sqlx::query_as(
        r#"
        INSERT INTO crawler.entities (entity_id, entity_name, entity_url)
        VALUES ($1, $2, $3)
        RETURNING id, entity_id, entity_name, entity_url
        "#,
    )
    .bind(external_id)
    .bind(name)
    .bind(url)
    .fetch_one(&mut tx)
    .await?;
    tx.commit().await?;

    Ok((inserted.into(), true))
}
