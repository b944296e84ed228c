// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Generic retry-with-backoff helper shared by every crate that talks to an external
//! service (the KV store, the bus, Postgres, the chat-platform client).

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

/// Backoff schedule: `base * 2^attempt`, capped at `max`, plus up to 25% jitter so that
/// many workers retrying the same dependency do not all wake up in lockstep.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: usize,
}

impl Backoff {
    pub const fn new(base: Duration, max: Duration, max_attempts: usize) -> Self {
        Backoff {
            base,
            max,
            max_attempts,
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let exp = self.base.saturating_mul(1u32 << attempt.min(16) as u32);
        let capped = exp.min(self.max);
        let jitter_frac: f64 = rand::thread_rng().gen_range(0.0..0.25);
        capped.mul_f64(1.0 + jitter_frac)
    }
}

/// Matches the client pool's documented policy: three attempts at 1s/2s/4s, capped at 10s.
pub const CLIENT_CONNECT_BACKOFF: Backoff =
    Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 3);

/// Calls `op(input.clone())` in a loop until it succeeds, `should_retry` returns `false` for
/// the latest error, or the backoff's attempt budget is exhausted. `should_retry` is also the
/// place to log/record metrics for the failed attempt, matching how callers in this workspace
/// use it (see usage in the retained `storage` reference crate's Redis connection pool).
pub async fn retry_call<T, R, E, F, Fut, ShouldRetry>(
    input: T,
    backoff: Backoff,
    op: F,
    mut should_retry: ShouldRetry,
) -> Result<R, E>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    ShouldRetry: FnMut(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op(input.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retry = should_retry(&err);
                attempt += 1;
                if !retry || attempt >= backoff.max_attempts {
                    return Err(err);
                }
                sleep(backoff.delay_for(attempt - 1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{retry_call, Backoff};

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(5), 5);

        let result: Result<u32, &'static str> = retry_call(
            attempts.clone(),
            backoff,
            |attempts| async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(n as u32)
                }
            },
            |_err| true,
        )
        .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn stops_when_should_retry_is_false() {
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(5), 5);
        let result: Result<(), &'static str> =
            retry_call((), backoff, |_| async { Err("fatal") }, |_err| false).await;
        assert_eq!(result, Err("fatal"));
    }

    #[tokio::test]
    async fn exhausts_attempt_budget() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(5), 3);
        let result: Result<(), &'static str> = retry_call(
            attempts.clone(),
            backoff,
            |attempts| async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("still failing")
            },
            |_err| true,
        )
        .await;
        assert_eq!(result, Err("still failing"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
