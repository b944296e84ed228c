// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! In-memory fakes for exercising [`crate::TaskExecutor`] without a live chat-platform
//! connection or bus, in the manner of `client_pool::testutil::FakeChatClient` and
//! `lease_gateway::testutil::InMemoryKvGateway` (SPEC_FULL §10.5).

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use client_pool::{ChatClient, ClientError};
use session_directory::Session;

use crate::executor::{ClientFactory, OutboundPublisher};
use crate::error::TaskExecutorError;
use crate::outbound::OutboundMessage;

/// Hands out clones of a single pre-scripted [`client_pool::testutil::FakeChatClient`],
/// ignoring the session's actual credentials (tests configure the fake directly).
pub struct FakeClientFactory {
    template: client_pool::testutil::FakeChatClient,
}

impl FakeClientFactory {
    pub fn new(template: client_pool::testutil::FakeChatClient) -> Self {
        FakeClientFactory { template }
    }
}

impl ClientFactory for FakeClientFactory {
    fn build(&self, _session: &Session) -> Result<Box<dyn ChatClient>, ClientError> {
        Ok(Box::new(self.template.clone()))
    }
}

/// Records every message passed to `publish` for later assertion.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        RecordingPublisher::default()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundPublisher for RecordingPublisher {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), TaskExecutorError> {
        self.published.lock().unwrap().push(message.clone());
        Ok(())
    }
}
