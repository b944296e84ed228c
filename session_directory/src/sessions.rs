// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The `sessions` table: immutable-after-creation client credentials, provisioned by an
//! external CLI (SPEC_FULL §1) and treated as read-only from this system's point of view.

use sqlx::PgPool;

use crate::error::SessionDirectoryError;

pub type SessionId = i64;

/// A single authenticated chat-platform identity available to the worker fleet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub session: String,
    pub api_id: i64,
    pub api_hash: String,
    pub tel: String,
    pub proxy: Option<String>,
}

/// Looks up a session by its stable small-integer ID. Returns `None` if the row has been
/// removed from the directory out from under a held lease (SPEC_FULL §9's "ghost" lease
/// case), in which case the caller should treat the session as vanished.
pub async fn get(pool: &PgPool, id: SessionId) -> Result<Option<Session>, SessionDirectoryError> {
    let row = sqlx::query!(
        r#"SELECT id, session, api_id, api_hash, tel, proxy FROM crawler.sessions WHERE id = $1"#,
        id,
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

/// The full current roster of session IDs, used to seed and reconcile the lease manager's
/// local state (`update_resources`).
pub async fn all_ids(pool: &PgPool) -> Result<Vec<SessionId>, SessionDirectoryError> {
    let rows = sqlx::query!(r#"SELECT id FROM crawler.sessions ORDER BY id"#)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|row| row.id).collect())
}
