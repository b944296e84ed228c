// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Binds the two inbound bus subjects to task executor invocations, publishes outbound
//! messages, and forwards KV-bucket mutations into the lease manager (SPEC_FULL §4.9/§6.1/
//! §6.3).

mod consumer;
mod error;
mod lease_events;
mod publisher;

pub use consumer::{ensure_stream, run_consumer, ConsumerSpec};
pub use error::TaskRouterError;
pub use lease_events::run_kv_watch;
pub use publisher::NatsPublisher;
