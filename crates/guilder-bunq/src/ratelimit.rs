//! bunq rate limits
//!
//! bunq allows a small burst per verb with a slow refill; exceeding it
//! earns HTTP 429s and eventually a ban, so every HTTP-producing
//! operation must take a token from the matching bucket first. Tokens
//! are not reservable: once taken they are spent whether or not the
//! request goes out.

use crate::error::{BunqError, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One token bucket: starts full at `burst`, gains one token per
/// `refill` period
pub struct TokenBucket {
    tokens: flume::Receiver<()>,
}

impl TokenBucket {
    pub fn new(burst: usize, refill: Duration, token: CancellationToken) -> Self {
        let (tx, rx) = flume::bounded(burst);
        for _ in 0..burst {
            let _ = tx.try_send(());
        }

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(refill);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        // a full bucket just drops the refill
                        let _ = tx.try_send(());
                    }
                }
            }
        });

        Self { tokens: rx }
    }

    /// Block until a token is available or the context is cancelled
    pub async fn acquire(&self, token: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = token.cancelled() => Err(BunqError::Cancelled),
            received = self.tokens.recv_async() => {
                received.map_err(|_| BunqError::Cancelled)
            }
        }
    }
}

/// The four bunq verb buckets
pub struct RateLimiter {
    get: TokenBucket,
    post: TokenBucket,
    put: TokenBucket,
    session_server: TokenBucket,
}

impl RateLimiter {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            get: TokenBucket::new(3, Duration::from_secs(3), token.clone()),
            post: TokenBucket::new(5, Duration::from_secs(3), token.clone()),
            put: TokenBucket::new(3, Duration::from_secs(3), token.clone()),
            session_server: TokenBucket::new(1, Duration::from_secs(30), token),
        }
    }

    pub fn for_get(&self) -> &TokenBucket {
        &self.get
    }

    pub fn for_post(&self) -> &TokenBucket {
        &self.post
    }

    pub fn for_put(&self) -> &TokenBucket {
        &self.put
    }

    pub fn for_session_server(&self) -> &TokenBucket {
        &self.session_server
    }
}
