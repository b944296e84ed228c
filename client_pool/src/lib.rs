// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A session-scoped connection to the chat platform: trait-abstracted client, proxy
//! configuration, and retrying connect/disconnect lifecycle (SPEC_FULL §4.5).

mod client;
mod error;
mod pool;
mod proxy;

pub mod testutil;

pub use client::{ChatClient, ChatMessage, EntityKind, MessageEntityOffset, MessageIter, RawReaction, ResolvedEntity};
pub use error::ClientError;
pub use pool::ClientPool;
pub use proxy::{parse_proxy, ProxyConfig, ProxyScheme};
