// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The external chat-platform client library, modeled as a trait so the pool, the task
//! executor, and tests depend on an abstraction rather than a concrete network client
//! (SPEC_FULL §4.5). Grounded in `ConnectManager`/`TelegramClient.get_entity`/`get_messages`
//! in the original implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ClientError;

/// The closed variant set an entity resolves to (SPEC_FULL §9's "dynamic dispatch" note).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Channel,
    Chat,
    User,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedEntity {
    pub kind: EntityKind,
    /// The chat-platform's own ID for this entity (`external_id` in the data model).
    pub id: i64,
    /// Title for channels/chats, username for users.
    pub name: String,
}

/// A single reaction as reported by the client library, before projection into the outbound
/// schema's `{emoji, count}` shape (SPEC_FULL §6.2). The projection itself lives in
/// `task_executor`, which is the crate that owns the outbound wire format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawReaction {
    Emoji { character: String, count: u32 },
    CustomEmoji { document_id: i64, count: u32 },
    Paid { count: u32 },
    Unknown { count: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEntityOffset {
    pub kind: String,
    pub offset: i64,
    pub length: i64,
}

/// A single message as reported by the client library.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub sender_id: Option<i64>,
    pub sender_name: Option<String>,
    pub text: String,
    pub reactions: Vec<RawReaction>,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub replies: Option<i64>,
    pub media_type: Option<String>,
    pub media_url: Option<String>,
    pub reply_to_message_id: Option<i64>,
    pub entities: Vec<MessageEntityOffset>,
}

/// A cursor over a single entity's history, produced by [`ChatClient::iter_messages`].
/// Mirrors the iterator-object idiom real async chat-client crates expose (an entity's
/// history is paged behind the scenes; the caller just calls `next()` until `None`).
#[async_trait]
pub trait MessageIter: Send {
    async fn next(&mut self) -> Result<Option<ChatMessage>, ClientError>;
}

/// An authenticated connection to the chat platform, bound to a single session.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn connect(&mut self) -> Result<(), ClientError>;
    async fn disconnect(&mut self) -> Result<(), ClientError>;
    fn is_connected(&self) -> bool;

    /// Resolves a URL to an entity, classifying it by the closed `channel/chat/user` variant
    /// set; anything else is a fatal `unknown-entity-type` the task executor surfaces as such.
    async fn get_entity(&mut self, url: &str) -> Result<ResolvedEntity, ClientError>;

    /// Resolves a known `external_id` to an input entity without a URL round-trip —
    /// preferred over `get_entity` whenever the internal entity is already known.
    async fn get_input_entity(&mut self, external_id: i64) -> Result<ResolvedEntity, ClientError>;

    /// Begins iterating an entity's message history. `reverse = true` iterates
    /// oldest-to-newest; this system always passes `reverse = false` (newest-first, see
    /// SPEC_FULL §9), but the parameter is kept to match the external library's own surface.
    fn iter_messages(&self, entity: ResolvedEntity, reverse: bool) -> Box<dyn MessageIter>;
}

/// Lets `ClientPool` and the task executor hold a single boxed trait object rather than
/// being generic over a concrete client type, the same way `lease_gateway`'s `KvGateway` is
/// consumed as `Arc<dyn KvGateway>` rather than as a type parameter.
#[async_trait]
impl ChatClient for Box<dyn ChatClient> {
    async fn connect(&mut self) -> Result<(), ClientError> {
        (**self).connect().await
    }

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        (**self).disconnect().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn get_entity(&mut self, url: &str) -> Result<ResolvedEntity, ClientError> {
        (**self).get_entity(url).await
    }

    async fn get_input_entity(&mut self, external_id: i64) -> Result<ResolvedEntity, ClientError> {
        (**self).get_input_entity(external_id).await
    }

    fn iter_messages(&self, entity: ResolvedEntity, reverse: bool) -> Box<dyn MessageIter> {
        (**self).iter_messages(entity, reverse)
    }
}
