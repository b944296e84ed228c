// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A scripted in-memory [`ChatClient`], in the spirit of `storage`'s `MemoryStorage` and
//! `lease_gateway`'s `InMemoryKvGateway`: usable from any crate's tests without a running
//! chat-platform connection (SPEC_FULL §10.5).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::client::{ChatMessage, EntityKind, MessageIter, ResolvedEntity};
use crate::error::ClientError;

#[derive(Clone)]
pub struct FakeChatClient {
    connected: bool,
    connect_failures_remaining: u32,
    entity: Option<ResolvedEntity>,
    messages: Arc<Mutex<VecDeque<ChatMessage>>>,
    rate_limit_after: Option<usize>,
    unknown_entity: bool,
}

impl FakeChatClient {
    pub fn new() -> Self {
        FakeChatClient {
            connected: false,
            connect_failures_remaining: 0,
            entity: None,
            messages: Arc::new(Mutex::new(VecDeque::new())),
            rate_limit_after: None,
            unknown_entity: false,
        }
    }

    /// `get_entity`/`get_input_entity` fail with `UnknownEntityType` instead of resolving.
    pub fn with_unknown_entity(mut self) -> Self {
        self.unknown_entity = true;
        self
    }

    /// `connect()` fails this many times before succeeding, used to exercise the pool's
    /// retry-then-reraise behavior.
    pub fn with_connect_failures(mut self, n: u32) -> Self {
        self.connect_failures_remaining = n;
        self
    }

    /// The entity `get_entity`/`get_input_entity` resolve to.
    pub fn with_entity(mut self, entity: ResolvedEntity) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Messages returned by `iter_messages`, in the order given (this system always iterates
    /// newest-first, so callers should supply them already in that order).
    pub fn with_messages(self, messages: Vec<ChatMessage>) -> Self {
        *self.messages.lock().unwrap() = messages.into_iter().collect();
        self
    }

    /// Raises `RateLimited` after `n` messages have been yielded by an iterator over this
    /// client's messages.
    pub fn with_rate_limit_after(mut self, n: usize) -> Self {
        self.rate_limit_after = Some(n);
        self
    }
}

impl Default for FakeChatClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl crate::client::ChatClient for FakeChatClient {
    async fn connect(&mut self) -> Result<(), ClientError> {
        if self.connect_failures_remaining > 0 {
            self.connect_failures_remaining -= 1;
            return Err(ClientError::Other("simulated connect failure".to_owned()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn get_entity(&mut self, _url: &str) -> Result<ResolvedEntity, ClientError> {
        if self.unknown_entity {
            return Err(ClientError::UnknownEntityType("bot".to_owned()));
        }
        self.entity.clone().ok_or_else(|| ClientError::Other("no fake entity configured".to_owned()))
    }

    async fn get_input_entity(&mut self, external_id: i64) -> Result<ResolvedEntity, ClientError> {
        if self.unknown_entity {
            return Err(ClientError::UnknownEntityType("bot".to_owned()));
        }
        self.entity
            .clone()
            .filter(|e| e.id == external_id)
            .ok_or_else(|| ClientError::Other("no fake entity configured".to_owned()))
    }

    fn iter_messages(&self, _entity: ResolvedEntity, _reverse: bool) -> Box<dyn MessageIter> {
        Box::new(FakeMessageIter {
            messages: self.messages.lock().unwrap().clone(),
            rate_limit_after: self.rate_limit_after,
            yielded: 0,
        })
    }
}

/// Defaults to a user entity with id `1`, matching most tests' needs.
pub fn default_entity() -> ResolvedEntity {
    ResolvedEntity {
        kind: EntityKind::Channel,
        id: 1,
        name: "Test Channel".to_owned(),
    }
}

struct FakeMessageIter {
    messages: VecDeque<ChatMessage>,
    rate_limit_after: Option<usize>,
    yielded: usize,
}

#[async_trait]
impl MessageIter for FakeMessageIter {
    async fn next(&mut self) -> Result<Option<ChatMessage>, ClientError> {
        if let Some(limit) = self.rate_limit_after {
            if self.yielded >= limit {
                return Err(ClientError::RateLimited { seconds: 30 });
            }
        }
        let next = self.messages.pop_front();
        if next.is_some() {
            self.yielded += 1;
        }
        Ok(next)
    }
}
