// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

/// Errors surfaced by this crate's queries. Matches the workspace convention (§7 of
/// `SPEC_FULL.md`) of a hand-written enum rather than a blanket `anyhow`/`thiserror` derive;
/// SQL failures of any shape are folded into `Database` since the task executor's disposition
/// for all of them is the same (`gateway-transient`: nack, rely on redelivery).
#[derive(Debug)]
pub enum SessionDirectoryError {
    Database(sqlx::Error),
}

impl fmt::Display for SessionDirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionDirectoryError::Database(err) => write!(f, "session directory query failed: {err}"),
        }
    }
}

impl std::error::Error for SessionDirectoryError {}

impl From<sqlx::Error> for SessionDirectoryError {
    fn from(err: sqlx::Error) -> Self {
        SessionDirectoryError::Database(err)
    }
}
