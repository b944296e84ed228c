// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! In-memory [`KvGateway`] used by tests throughout this workspace, in the spirit of
//! `storage`'s `MemoryStorage` mock driver: an `Arc<parking_lot::Mutex<Inner>>` standing in
//! for the real backend, with no network or persistence involved.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::{KvEvent, KvEventStream, KvGateway, KvGatewayError, KvOp, Revision};

struct Inner {
    entries: HashMap<String, (Vec<u8>, Revision)>,
    next_revision: Revision,
    events: broadcast::Sender<KvEvent>,
}

/// An in-memory stand-in for a NATS JetStream KV bucket. Revisions are a simple global
/// counter, matching JetStream's own monotonically increasing stream sequence.
#[derive(Clone)]
pub struct InMemoryKvGateway {
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemoryKvGateway {
    fn default() -> Self {
        let (events, _) = broadcast::channel(1024);
        InMemoryKvGateway {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                next_revision: 1,
                events,
            })),
        }
    }
}

impl InMemoryKvGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvGateway for InMemoryKvGateway {
    async fn create(&self, key: &str, value: &[u8]) -> Result<Revision, KvGatewayError> {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(key) {
            return Err(KvGatewayError::AlreadyExists(key.to_owned()));
        }
        let revision = inner.next_revision;
        inner.next_revision += 1;
        inner.entries.insert(key.to_owned(), (value.to_vec(), revision));
        let _ = inner.events.send(KvEvent {
            key: key.to_owned(),
            op: KvOp::Put,
            revision,
        });
        Ok(revision)
    }

    async fn update(
        &self,
        key: &str,
        value: &[u8],
        expect_revision: Revision,
    ) -> Result<Revision, KvGatewayError> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            None => Err(KvGatewayError::NotFound(key.to_owned())),
            Some((_, current)) if *current != expect_revision => {
                Err(KvGatewayError::SequenceMismatch {
                    key: key.to_owned(),
                    expected: expect_revision,
                })
            }
            Some(_) => {
                let revision = inner.next_revision;
                inner.next_revision += 1;
                inner
                    .entries
                    .insert(key.to_owned(), (value.to_vec(), revision));
                let _ = inner.events.send(KvEvent {
                    key: key.to_owned(),
                    op: KvOp::Put,
                    revision,
                });
                Ok(revision)
            }
        }
    }

    async fn purge(&self, key: &str) -> Result<(), KvGatewayError> {
        let mut inner = self.inner.lock();
        if inner.entries.remove(key).is_some() {
            let revision = inner.next_revision;
            inner.next_revision += 1;
            let _ = inner.events.send(KvEvent {
                key: key.to_owned(),
                op: KvOp::Purge,
                revision,
            });
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, KvGatewayError> {
        let inner = self.inner.lock();
        Ok(inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn watch(&self, prefix: &str) -> Result<KvEventStream, KvGatewayError> {
        let receiver = self.inner.lock().events.subscribe();
        let prefix = prefix.to_owned();
        let stream = BroadcastStream::new(receiver).filter_map(move |event| match event {
            Ok(event) if event.key.starts_with(&prefix) => Some(Ok(event)),
            Ok(_) => None,
            Err(_lagged) => Some(Err(KvGatewayError::Transient(
                "watch receiver lagged behind".to_owned(),
            ))),
        });
        Ok(Box::pin(stream))
    }

    async fn get_revision(&self, key: &str) -> Result<Option<Revision>, KvGatewayError> {
        let inner = self.inner.lock();
        Ok(inner.entries.get(key).map(|(_, rev)| *rev))
    }
}

/// Simulates external expiry or manual deletion without going through `purge`, used to test
/// reload-on-mismatch behavior.
impl InMemoryKvGateway {
    pub fn force_remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        if inner.entries.remove(key).is_some() {
            let revision = inner.next_revision;
            inner.next_revision += 1;
            let _ = inner.events.send(KvEvent {
                key: key.to_owned(),
                op: KvOp::Purge,
                revision,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_create_fails() {
        let gw = InMemoryKvGateway::new();
        gw.create("a.1", b"worker-1").await.unwrap();
        let err = gw.create("a.1", b"worker-2").await.unwrap_err();
        assert_eq!(err, KvGatewayError::AlreadyExists("a.1".to_owned()));
    }

    #[tokio::test]
    async fn update_with_stale_revision_fails() {
        let gw = InMemoryKvGateway::new();
        let rev = gw.create("a.1", b"worker-1").await.unwrap();
        gw.update("a.1", b"worker-1", rev).await.unwrap();
        let err = gw.update("a.1", b"worker-1", rev).await.unwrap_err();
        assert!(matches!(err, KvGatewayError::SequenceMismatch { .. }));
    }

    #[tokio::test]
    async fn purge_is_idempotent() {
        let gw = InMemoryKvGateway::new();
        gw.purge("missing").await.unwrap();
        gw.create("a.1", b"worker-1").await.unwrap();
        gw.purge("a.1").await.unwrap();
        gw.purge("a.1").await.unwrap();
        assert!(gw.list("a.").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let gw = InMemoryKvGateway::new();
        gw.create("a.1", b"x").await.unwrap();
        gw.create("a.2", b"x").await.unwrap();
        gw.create("b.1", b"x").await.unwrap();
        let mut keys = gw.list("a.").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a.1".to_owned(), "a.2".to_owned()]);
    }
}
