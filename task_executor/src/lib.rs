// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Runs a single backfill or incremental collection task to completion: session leasing,
//! client lifecycle, range planning, message projection, and the collection-record ledger
//! write (SPEC_FULL §4.6/§4.7/§4.8).

mod envelope;
mod error;
mod executor;
mod outbound;

pub mod testutil;

pub use envelope::{BackfillEnvelope, IncrementalEnvelope};
pub use error::{Disposition, TaskExecutorError};
pub use executor::{ClientFactory, OutboundPublisher, TaskExecutor};
pub use outbound::{project_message, OutboundEntityOffset, OutboundMessage, OutboundMetadata, OutboundReaction};
