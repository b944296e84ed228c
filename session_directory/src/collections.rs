// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Writer for the `channel_collections` table. The read side (computing what still needs
//! collecting) lives in `range_planner`, which reads from the same table; this module owns
//! only the insert the task executor's RECORD state performs at task completion.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::entities::EntityId;
use crate::error::SessionDirectoryError;

/// Creates a collection record for a sub-range that yielded at least one message. Never
/// mutated after creation (SPEC_FULL §3); `(entity_id, from_message_id, to_message_id)` is
/// unique, so redelivery of a task that already committed a record for the same boundaries
/// surfaces as a constraint violation rather than silently duplicating data.
#[allow(clippy::too_many_arguments)]
pub async fn record_collection(
    pool: &PgPool,
    entity_id: EntityId,
    from_message_id: i64,
    to_message_id: i64,
    from_datetime: DateTime<Utc>,
    to_datetime: DateTime<Utc>,
    messages_count: i32,
) -> Result<(), SessionDirectoryError> {
    sqlx::query!(
        r#"
        INSERT INTO crawler.channel_collections
            (entity_id, from_message_id, to_message_id, from_datetime, to_datetime, messages_count)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
        entity_id,
        from_message_id,
        to_message_id,
        from_datetime,
        to_datetime,
        messages_count,
    )
    .execute(pool)
    .await?;

    Ok(())
}
