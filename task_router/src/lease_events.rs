// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Forwards KV-bucket mutations into the lease manager's local cache (SPEC_FULL §4.9).

use std::sync::Arc;

use futures::StreamExt;
use lease_gateway::KvGateway;
use lease_manager::SessionLeaseManager;
use tokio::sync::watch;

/// Subscribes to `prefix` on `gateway` and applies every observed mutation to
/// `lease_manager` until the stream ends or `shutdown` fires. Runs for the lifetime of the
/// worker process, alongside the inbound-subject consumers (SPEC_FULL §5).
pub async fn run_kv_watch(
    gateway: Arc<dyn KvGateway>,
    prefix: String,
    lease_manager: SessionLeaseManager,
    mut shutdown: watch::Receiver<()>,
) {
    let mut stream = match gateway.watch(&prefix).await {
        Ok(stream) => stream,
        Err(err) => {
            log::error!("failed to start KV watch on {prefix}: {err}");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                log::info!("shutdown signal observed, stopping KV watch on {prefix}");
                return;
            }
            event = stream.next() => {
                match event {
                    Some(Ok(event)) => lease_manager.on_watch_event(&event),
                    Some(Err(err)) => log::warn!("KV watch error on {prefix}: {err}"),
                    None => {
                        log::warn!("KV watch stream on {prefix} ended");
                        return;
                    }
                }
            }
        }
    }
}
