// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Per-session client lifecycle: connect-with-retry, idempotent disconnect, and exclusive
//! access serialized through a per-instance mutex (SPEC_FULL §4.5/§5). Grounded in
//! `ConnectManager`'s `open`/`close`/`get_client` plus `execution/src/server/mod.rs`'s
//! per-key mutex-guarded access idiom for the Rust expression of "one outstanding call".

use std::future::Future;

use infra::retry::{retry_call, CLIENT_CONNECT_BACKOFF};
use tokio::sync::Mutex;

use crate::client::ChatClient;
use crate::error::ClientError;

/// Holds at most one connected client instance, guarded by an async mutex so that
/// `with_client` is the only way to touch it and a client handle is never used concurrently.
pub struct ClientPool<C> {
    client: Mutex<Option<C>>,
}

impl<C: ChatClient> ClientPool<C> {
    pub fn new() -> Self {
        ClientPool { client: Mutex::new(None) }
    }

    /// Connects `client`, retrying up to 3 times at 1s/2s/4s backed off delays (capped at
    /// 10s) on any failure; reraises on final failure. Reconnecting an already-connected
    /// client is a no-op, matching `ConnectManager.open()`'s `is_connected()` guard.
    pub async fn open(&self, mut client: C) -> Result<(), ClientError> {
        if !client.is_connected() {
            retry_call(
                (),
                CLIENT_CONNECT_BACKOFF,
                |()| {
                    let client = &mut client;
                    async move { client.connect().await }
                },
                |err| {
                    log::warn!("client connect attempt failed, will retry: {err}");
                    true
                },
            )
            .await
            .map_err(|err| ClientError::ConnectFailed(err.to_string()))?;
        }

        *self.client.lock().await = Some(client);
        Ok(())
    }

    /// Disconnects and drops the held client, if any. Idempotent.
    pub async fn close(&self) -> Result<(), ClientError> {
        let mut guard = self.client.lock().await;
        if let Some(mut client) = guard.take() {
            if client.is_connected() {
                client.disconnect().await?;
            }
        }
        Ok(())
    }

    /// Scoped exclusive access to the held client. Returns `NotConnected` if `open` has not
    /// succeeded yet (or `close` has already run).
    pub async fn with_client<F, Fut, T>(&self, f: F) -> Result<T, ClientError>
    where
        F: FnOnce(&mut C) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(ClientError::NotConnected)?;
        f(client).await
    }
}

impl<C: ChatClient> Default for ClientPool<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::FakeChatClient;

    use super::*;

    #[tokio::test]
    async fn open_then_with_client_succeeds() {
        let pool = ClientPool::new();
        pool.open(FakeChatClient::new()).await.unwrap();
        let connected = pool.with_client(|c| async move { Ok(c.is_connected()) }).await.unwrap();
        assert!(connected);
    }

    #[tokio::test]
    async fn with_client_before_open_fails() {
        let pool: ClientPool<FakeChatClient> = ClientPool::new();
        let err = pool.with_client(|c| async move { Ok(c.is_connected()) }).await.unwrap_err();
        assert_eq!(err, ClientError::NotConnected);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let pool = ClientPool::new();
        pool.open(FakeChatClient::new()).await.unwrap();
        pool.close().await.unwrap();
        pool.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_is_retried_then_reraised() {
        let pool = ClientPool::new();
        let client = FakeChatClient::new().with_connect_failures(5);
        let err = pool.open(client).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectFailed(_)));
    }
}
