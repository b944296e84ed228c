// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

#[derive(Debug)]
pub enum TaskRouterError {
    /// Failed to reach the stream/consumer/KV bucket at startup.
    Connect(String),
    /// A publish, pull, or ack call failed after the connection was already established.
    Transient(String),
}

impl fmt::Display for TaskRouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskRouterError::Connect(msg) => write!(f, "failed to connect task router: {msg}"),
            TaskRouterError::Transient(msg) => write!(f, "task router error: {msg}"),
        }
    }
}

impl std::error::Error for TaskRouterError {}
