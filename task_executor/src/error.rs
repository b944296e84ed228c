// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

use client_pool::ClientError;
use lease_manager::LeaseManagerError;
use session_directory::SessionDirectoryError;

/// What the task router should do with the inbound bus message once a task finishes. See
/// SPEC_FULL §7 for the full disposition table this is derived from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Success, or a non-retriable failure (redelivery would only repeat it).
    Ack,
    /// A transient or racy failure; redelivery may succeed.
    Nack,
}

/// Errors a task run can end in. Each variant carries its SPEC_FULL §7 disposition via
/// [`TaskExecutorError::disposition`].
#[derive(Debug)]
pub enum TaskExecutorError {
    /// No session became free before the lease manager's deadline elapsed.
    LeaseTimeout,
    /// The client library rejected the configured proxy.
    InvalidProxy(String),
    /// The resolved entity fell outside the closed channel/chat/user variant set.
    UnknownEntityType(String),
    /// The incremental envelope named a channel this system has never backfilled.
    EntityNotFound,
    /// The session selected by the lease manager no longer exists in the directory.
    SessionVanished,
    /// The client, the KV store, the bus, or Postgres failed transiently.
    GatewayTransient(String),
}

impl TaskExecutorError {
    pub fn disposition(&self) -> Disposition {
        match self {
            TaskExecutorError::LeaseTimeout => Disposition::Nack,
            TaskExecutorError::InvalidProxy(_) => Disposition::Nack,
            TaskExecutorError::UnknownEntityType(_) => Disposition::Ack,
            TaskExecutorError::EntityNotFound => Disposition::Ack,
            TaskExecutorError::SessionVanished => Disposition::Nack,
            TaskExecutorError::GatewayTransient(_) => Disposition::Nack,
        }
    }
}

impl fmt::Display for TaskExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskExecutorError::LeaseTimeout => write!(f, "timed out waiting for a free session"),
            TaskExecutorError::InvalidProxy(msg) => write!(f, "invalid proxy: {msg}"),
            TaskExecutorError::UnknownEntityType(msg) => write!(f, "unrecognized entity type: {msg}"),
            TaskExecutorError::EntityNotFound => write!(f, "channel has no prior backfill"),
            TaskExecutorError::SessionVanished => write!(f, "selected session no longer exists"),
            TaskExecutorError::GatewayTransient(msg) => write!(f, "transient failure: {msg}"),
        }
    }
}

impl std::error::Error for TaskExecutorError {}

impl From<SessionDirectoryError> for TaskExecutorError {
    fn from(err: SessionDirectoryError) -> Self {
        TaskExecutorError::GatewayTransient(err.to_string())
    }
}

impl From<sqlx::Error> for TaskExecutorError {
    fn from(err: sqlx::Error) -> Self {
        TaskExecutorError::GatewayTransient(err.to_string())
    }
}

impl From<LeaseManagerError> for TaskExecutorError {
    fn from(err: LeaseManagerError) -> Self {
        match err {
            LeaseManagerError::Timeout => TaskExecutorError::LeaseTimeout,
            LeaseManagerError::Gateway(msg) => TaskExecutorError::GatewayTransient(msg),
        }
    }
}

impl From<ClientError> for TaskExecutorError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::InvalidProxy(msg) => TaskExecutorError::InvalidProxy(msg),
            ClientError::UnknownEntityType(msg) => TaskExecutorError::UnknownEntityType(msg),
            other => TaskExecutorError::GatewayTransient(other.to_string()),
        }
    }
}
