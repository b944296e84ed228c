// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The outbound message wire schema (SPEC_FULL §6.2) and the projection from a
//! [`client_pool::ChatMessage`] into it. Grounded in
//! `original_source/src/crawler/schemas/message.py`'s `MessageResponseModel`.

use chrono::{DateTime, Utc};
use client_pool::{ChatMessage, MessageEntityOffset, RawReaction};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutboundReaction {
    pub emoji: String,
    pub count: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutboundEntityOffset {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: i64,
    pub length: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Default)]
pub struct OutboundMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<OutboundEntityOffset>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub message_id: i64,
    pub entity_id: i64,
    pub entity_name: String,
    pub sender_id: Option<i64>,
    pub sender_name: Option<String>,
    pub date: DateTime<Utc>,
    pub message: String,
    pub reactions: Vec<OutboundReaction>,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub replies: Option<i64>,
    pub media_type: Option<String>,
    pub media_url: Option<String>,
    pub reply_to_message_id: Option<i64>,
    pub metadata: OutboundMetadata,
}

/// Literal sentinel text for reaction kinds with no natural display character
/// (SPEC_FULL §6.2).
const PAID_REACTION_TEXT: &str = "PAID STAR";
const UNKNOWN_REACTION_TEXT: &str = "UNKNOWN";

fn project_reaction(reaction: &RawReaction) -> OutboundReaction {
    match reaction {
        RawReaction::Emoji { character, count } => OutboundReaction {
            emoji: character.clone(),
            count: *count as i64,
        },
        RawReaction::CustomEmoji { document_id, count } => OutboundReaction {
            emoji: document_id.to_string(),
            count: *count as i64,
        },
        RawReaction::Paid { count } => OutboundReaction {
            emoji: PAID_REACTION_TEXT.to_owned(),
            count: *count as i64,
        },
        RawReaction::Unknown { count } => OutboundReaction {
            emoji: UNKNOWN_REACTION_TEXT.to_owned(),
            count: *count as i64,
        },
    }
}

fn project_entity_offset(offset: &MessageEntityOffset) -> OutboundEntityOffset {
    OutboundEntityOffset {
        kind: offset.kind.clone(),
        offset: offset.offset,
        length: offset.length,
    }
}

pub fn project_message(msg: &ChatMessage, entity_id: i64, entity_name: &str) -> OutboundMessage {
    let entities = (!msg.entities.is_empty())
        .then(|| msg.entities.iter().map(project_entity_offset).collect());

    OutboundMessage {
        message_id: msg.id,
        entity_id,
        entity_name: entity_name.to_owned(),
        sender_id: msg.sender_id,
        sender_name: msg.sender_name.clone(),
        date: msg.date,
        message: msg.text.clone(),
        reactions: msg.reactions.iter().map(project_reaction).collect(),
        views: msg.views,
        forwards: msg.forwards,
        replies: msg.replies,
        media_type: msg.media_type.clone(),
        media_url: msg.media_url.clone(),
        reply_to_message_id: msg.reply_to_message_id,
        metadata: OutboundMetadata { entities },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emoji_reaction_projects_its_character() {
        let r = RawReaction::Emoji { character: "🔥".to_owned(), count: 3 };
        assert_eq!(project_reaction(&r), OutboundReaction { emoji: "🔥".to_owned(), count: 3 });
    }

    #[test]
    fn custom_emoji_projects_document_id_as_string() {
        let r = RawReaction::CustomEmoji { document_id: 123456789, count: 1 };
        assert_eq!(project_reaction(&r), OutboundReaction { emoji: "123456789".to_owned(), count: 1 });
    }

    #[test]
    fn paid_and_unknown_project_literal_sentinels() {
        assert_eq!(
            project_reaction(&RawReaction::Paid { count: 5 }),
            OutboundReaction { emoji: "PAID STAR".to_owned(), count: 5 }
        );
        assert_eq!(
            project_reaction(&RawReaction::Unknown { count: 2 }),
            OutboundReaction { emoji: "UNKNOWN".to_owned(), count: 2 }
        );
    }

    #[test]
    fn message_with_no_entities_omits_metadata_entities() {
        let msg = ChatMessage {
            id: 1,
            date: Utc::now(),
            sender_id: None,
            sender_name: None,
            text: "hi".to_owned(),
            reactions: vec![],
            views: None,
            forwards: None,
            replies: None,
            media_type: None,
            media_url: None,
            reply_to_message_id: None,
            entities: vec![],
        };
        let projected = project_message(&msg, 42, "Example");
        assert_eq!(projected.metadata.entities, None);
        let json = serde_json::to_value(&projected).unwrap();
        assert!(json.get("metadata").unwrap().get("entities").is_none());
    }
}
