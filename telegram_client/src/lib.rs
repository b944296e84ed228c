// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The one concrete implementation of `client_pool::ChatClient`, wrapping `grammers-client`'s
//! MTProto connection. SPEC_FULL §1 and §4.5 treat "the chat-platform client library" as an
//! external collaborator the core is designed against, not a subject of this rewrite; this
//! crate is the thin seam where that collaborator is actually wired in, grounded in
//! `original_source/src/crawler/database/tg.py`'s `ConnectManager` (session string,
//! `api_id`/`api_hash`, proxy, `get_entity`, `iter_messages`).

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use client_pool::{
    parse_proxy, ChatClient, ChatMessage, ClientError, EntityKind, MessageEntityOffset, MessageIter,
    ProxyScheme, RawReaction, ResolvedEntity,
};
use grammers_client::types::{Chat, IterBuffer, Message};
use grammers_client::{Client, Config, InitParams};
use grammers_session::{PackedChat, Session};
use session_directory::Session as DirectorySession;
use task_executor::ClientFactory as ExecutorClientFactory;
use tokio::sync::Mutex as AsyncMutex;

fn proxy_url(scheme: ProxyScheme, cfg: &client_pool::ProxyConfig) -> String {
    let scheme_str = match scheme {
        ProxyScheme::Socks5 => "socks5",
        ProxyScheme::Socks4 => "socks4",
        ProxyScheme::Http => "http",
    };
    match (&cfg.username, &cfg.password) {
        (Some(user), Some(pass)) => format!("{scheme_str}://{user}:{pass}@{}:{}", cfg.host, cfg.port),
        _ => format!("{scheme_str}://{}:{}", cfg.host, cfg.port),
    }
}

fn classify(chat: &Chat) -> ResolvedEntity {
    match chat {
        Chat::Channel(c) => ResolvedEntity { kind: EntityKind::Channel, id: c.id(), name: c.title().to_owned() },
        Chat::Group(g) => ResolvedEntity { kind: EntityKind::Chat, id: g.id(), name: g.title().unwrap_or_default().to_owned() },
        Chat::User(u) => ResolvedEntity {
            kind: EntityKind::User,
            id: u.id(),
            name: u.username().unwrap_or_default().to_owned(),
        },
    }
}

fn project_message(msg: &Message) -> ChatMessage {
    ChatMessage {
        id: msg.id() as i64,
        date: Utc.timestamp_opt(msg.date().timestamp(), 0).single().unwrap_or_else(Utc::now),
        sender_id: msg.sender().map(|c| c.id()),
        sender_name: msg.sender().map(|c| match &c {
            Chat::User(u) => u.username().unwrap_or_default().to_owned(),
            other => other.name().to_owned(),
        }),
        text: msg.text().to_owned(),
        // `grammers-client`'s public `Message` surface only exposes the aggregate
        // `reaction_count()`; the per-reaction emoji/custom-emoji/paid breakdown
        // `RawReaction` models lives in the raw TL `MessageReactions.results`, which the
        // crate keeps private to `custom::Message`. The Emoji/CustomEmoji/Paid projection
        // in `task_executor::outbound` is exercised by its own unit tests against
        // `RawReaction` directly; this seam can only hand it a single aggregate entry until
        // `grammers-client` exposes the per-reaction list.
        reactions: msg
            .reaction_count()
            .map(|count| vec![RawReaction::Unknown { count: count as u32 }])
            .unwrap_or_default(),
        views: msg.view_count().map(|v| v as i64),
        forwards: msg.forward_count().map(|f| f as i64),
        replies: msg.reply_count().map(|r| r as i64),
        media_type: msg.media().map(|_| "media".to_owned()),
        media_url: None,
        reply_to_message_id: msg.reply_to_message_id().map(|id| id as i64),
        entities: Vec::<MessageEntityOffset>::new(),
    }
}

/// Resolves and caches `PackedChat`s the production client needs for `iter_messages` calls
/// that only carry an internal `external_id`, mirroring `ConnectManager`'s habit of keeping
/// an entity cache alongside the connection itself.
struct GrammersChatClient {
    client: Option<Client>,
    config: Config,
    resolved: Option<PackedChat>,
}

impl GrammersChatClient {
    fn new(config: Config) -> Self {
        GrammersChatClient { client: None, config, resolved: None }
    }

    fn client(&self) -> Result<&Client, ClientError> {
        self.client.as_ref().ok_or(ClientError::NotConnected)
    }
}

#[async_trait]
impl ChatClient for GrammersChatClient {
    async fn connect(&mut self) -> Result<(), ClientError> {
        let client = Client::connect(self.config.clone())
            .await
            .map_err(|err| ClientError::ConnectFailed(err.to_string()))?;

        if !client.is_authorized().await.map_err(|err| ClientError::Other(err.to_string()))? {
            return Err(ClientError::ConnectFailed(
                "session is not authorized; provision it via the sessions CLI first".to_owned(),
            ));
        }

        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        // `grammers-client` has no explicit disconnect; dropping the `Client` tears down its
        // background network task. Matches `ConnectManager.close()`'s idempotent no-op when
        // already disconnected.
        self.client = None;
        self.resolved = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn get_entity(&mut self, url: &str) -> Result<ResolvedEntity, ClientError> {
        let username = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .ok_or_else(|| ClientError::Other(format!("could not extract username from {url}")))?;

        let chat = self
            .client()?
            .resolve_username(username)
            .await
            .map_err(|err| ClientError::Other(err.to_string()))?
            .ok_or_else(|| ClientError::UnknownEntityType(format!("no entity found for {url}")))?;

        self.resolved = Some(chat.pack());
        Ok(classify(&chat))
    }

    async fn get_input_entity(&mut self, external_id: i64) -> Result<ResolvedEntity, ClientError> {
        // The client library resolves entities by username/dialog lookup, not bare numeric
        // ID; the task executor only calls this once a URL-based `get_entity` has already
        // populated `self.resolved` for the same logical entity in an earlier task run on
        // this same session (the sticky-session path, SPEC_FULL §4.6's RESOLVE_SESSION).
        let mut dialogs = self.client()?.iter_dialogs();
        while let Some(dialog) = dialogs.next().await.map_err(|err| ClientError::Other(err.to_string()))? {
            let chat = dialog.chat();
            if chat.id() == external_id {
                self.resolved = Some(chat.pack());
                return Ok(classify(chat));
            }
        }
        Err(ClientError::UnknownEntityType(format!("no dialog found for external_id {external_id}")))
    }

    fn iter_messages(&self, entity: ResolvedEntity, reverse: bool) -> Box<dyn MessageIter> {
        let packed = self.resolved.clone();
        Box::new(GrammersMessageIter {
            client: self.client.clone(),
            packed,
            fallback_id: entity.id,
            reverse,
            buffer: AsyncMutex::new(None),
        })
    }
}

struct GrammersMessageIter {
    client: Option<Client>,
    packed: Option<PackedChat>,
    fallback_id: i64,
    reverse: bool,
    buffer: AsyncMutex<Option<IterBuffer<Message>>>,
}

#[async_trait]
impl MessageIter for GrammersMessageIter {
    async fn next(&mut self) -> Result<Option<ChatMessage>, ClientError> {
        let client = self.client.as_ref().ok_or(ClientError::NotConnected)?;
        let mut guard = self.buffer.lock().await;
        if guard.is_none() {
            let packed = self
                .packed
                .clone()
                .ok_or_else(|| ClientError::Other(format!("no resolved chat for entity {}", self.fallback_id)))?;
            let mut iter = client.iter_messages(packed);
            if !self.reverse {
                iter = iter.rev();
            }
            *guard = Some(iter);
        }

        let iter = guard.as_mut().expect("populated above");
        match iter.next().await {
            Ok(Some(msg)) => Ok(Some(project_message(&msg))),
            Ok(None) => Ok(None),
            Err(err) => {
                let msg = err.to_string();
                if msg.contains("FLOOD_WAIT") {
                    let seconds = msg
                        .rsplit('_')
                        .next()
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(30);
                    Err(ClientError::RateLimited { seconds })
                } else {
                    Err(ClientError::Other(msg))
                }
            }
        }
    }
}

/// Builds a `GrammersChatClient` bound to a directory session's credentials and optional
/// proxy, one per task (SPEC_FULL §4.5 — the executor owns exactly one connected client per
/// task, discarded at task end).
pub struct GrammersClientFactory {
    api_id: i32,
    api_hash: String,
}

impl GrammersClientFactory {
    pub fn new(api_id: i32, api_hash: String) -> Self {
        GrammersClientFactory { api_id, api_hash }
    }
}

impl ExecutorClientFactory for GrammersClientFactory {
    fn build(&self, session: &DirectorySession) -> Result<Box<dyn ChatClient>, ClientError> {
        let proxy = match &session.proxy {
            Some(raw) => {
                let cfg = parse_proxy(raw)?;
                Some(proxy_url(cfg.scheme, &cfg))
            }
            None => None,
        };

        let config = Config {
            session: Session::load_from_str(&session.session).map_err(|err| ClientError::Other(err.to_string()))?,
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            params: InitParams { proxy_url: proxy, ..Default::default() },
        };

        Ok(Box::new(GrammersChatClient::new(config)))
    }
}
