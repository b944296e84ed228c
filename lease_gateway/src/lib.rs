// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Thin adapter over a replicated key-value store's mutual-exclusion primitives.
//!
//! Exposes exactly the five operations the session lease manager needs: `create` (fails if
//! the key exists), `update` (compare-and-swap on an expected revision), `purge` (idempotent
//! delete), `list` (prefix snapshot), and `watch` (prefix subscription). Everything above this
//! layer — local caching, retry policy, random selection — lives in `lease_manager`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

pub mod nats;
pub mod testutil;

pub type Revision = u64;

/// A single mutation observed on a watched prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvEvent {
    pub key: String,
    pub op: KvOp,
    pub revision: Revision,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KvOp {
    Put,
    Purge,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KvGatewayError {
    /// `create` found the key already present.
    AlreadyExists(String),
    /// `update` observed a revision different from the one the caller expected.
    SequenceMismatch { key: String, expected: Revision },
    /// `update` targeted a key that does not exist.
    NotFound(String),
    /// Anything else: connection loss, timeout, malformed server response. Callers treat
    /// these as transient and simply do not make progress this attempt.
    Transient(String),
}

impl fmt::Display for KvGatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvGatewayError::AlreadyExists(key) => write!(f, "key already exists: {key}"),
            KvGatewayError::SequenceMismatch { key, expected } => {
                write!(f, "sequence mismatch for {key}, expected revision {expected}")
            }
            KvGatewayError::NotFound(key) => write!(f, "key not found: {key}"),
            KvGatewayError::Transient(msg) => write!(f, "transient gateway error: {msg}"),
        }
    }
}

impl std::error::Error for KvGatewayError {}

pub type KvEventStream = Pin<Box<dyn Stream<Item = Result<KvEvent, KvGatewayError>> + Send>>;

/// A replicated key-value store exposing TTL-backed leases with revision-based CAS.
#[async_trait]
pub trait KvGateway: Send + Sync {
    async fn create(&self, key: &str, value: &[u8]) -> Result<Revision, KvGatewayError>;

    async fn update(
        &self,
        key: &str,
        value: &[u8],
        expect_revision: Revision,
    ) -> Result<Revision, KvGatewayError>;

    async fn purge(&self, key: &str) -> Result<(), KvGatewayError>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>, KvGatewayError>;

    async fn watch(&self, prefix: &str) -> Result<KvEventStream, KvGatewayError>;

    /// Fetches the current revision for a single key, or `None` if absent. Used by the
    /// lease manager's reload-on-mismatch path, which needs the revision of each locked key
    /// after a `list`.
    async fn get_revision(&self, key: &str) -> Result<Option<Revision>, KvGatewayError>;
}

#[async_trait]
impl<G: KvGateway + ?Sized> KvGateway for std::sync::Arc<G> {
    async fn create(&self, key: &str, value: &[u8]) -> Result<Revision, KvGatewayError> {
        (**self).create(key, value).await
    }

    async fn update(
        &self,
        key: &str,
        value: &[u8],
        expect_revision: Revision,
    ) -> Result<Revision, KvGatewayError> {
        (**self).update(key, value, expect_revision).await
    }

    async fn purge(&self, key: &str) -> Result<(), KvGatewayError> {
        (**self).purge(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, KvGatewayError> {
        (**self).list(prefix).await
    }

    async fn watch(&self, prefix: &str) -> Result<KvEventStream, KvGatewayError> {
        (**self).watch(prefix).await
    }

    async fn get_revision(&self, key: &str) -> Result<Option<Revision>, KvGatewayError> {
        (**self).get_revision(key).await
    }
}

/// Default TTL for lease keys, overridable via `NATS_KV_TTL`.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);
