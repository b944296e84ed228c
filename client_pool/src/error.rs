// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

/// Errors the chat-platform client surface can raise. `RateLimited` and `InvalidProxy` get
/// their own dispositions in the task executor (SPEC_FULL §7); everything else collapses to
/// a retried/nacked task.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientError {
    /// `connect()` failed after exhausting its retry budget.
    ConnectFailed(String),
    /// The client library's rate-limit signal, carrying the suggested wait in seconds.
    RateLimited { seconds: u64 },
    /// A proxy URL with an unsupported scheme.
    InvalidProxy(String),
    /// An entity resolved to something outside the closed channel/chat/user variant set.
    UnknownEntityType(String),
    /// `with_client` was called before `open()`, or after `close()`.
    NotConnected,
    /// Anything else the client library can raise (network errors, protocol errors, ...).
    Other(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::ConnectFailed(msg) => write!(f, "failed to connect: {msg}"),
            ClientError::RateLimited { seconds } => write!(f, "rate limited, retry after {seconds}s"),
            ClientError::InvalidProxy(msg) => write!(f, "invalid proxy: {msg}"),
            ClientError::UnknownEntityType(msg) => write!(f, "unrecognized entity type: {msg}"),
            ClientError::NotConnected => write!(f, "client is not connected"),
            ClientError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ClientError {}
