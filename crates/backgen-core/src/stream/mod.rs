//! Authenticated event streaming.
//!
//! The gateway issues short-lived single-use tokens bound to a
//! (user, generation) pair, validates them on subscribe, and wraps the
//! event-bus subscription with heartbeat and idle-timeout behavior.

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::events::{EventBus, GenerationEvent, Subscription};
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One delivery from an event stream.
#[derive(Debug)]
pub enum StreamItem {
    /// A generation event, in publish order.
    Event(GenerationEvent),
    /// Keepalive after a quiet heartbeat interval.
    Heartbeat,
    /// The channel closed after its terminal event was drained.
    Closed,
    /// Nothing arrived within the idle timeout; the stream ends without
    /// affecting the generation.
    IdleTimeout,
}

struct TokenRecord {
    user_id: String,
    generation_id: String,
    expires_at: DateTime<Utc>,
}

/// Issues stream tokens and binds subscribers to event channels.
pub struct StreamGateway {
    bus: Arc<EventBus>,
    tokens: Mutex<HashMap<String, TokenRecord>>,
    heartbeat: Duration,
    idle_timeout: Duration,
    token_ttl: chrono::Duration,
}

impl StreamGateway {
    /// Create a gateway from stream configuration.
    pub fn new(bus: Arc<EventBus>, config: &StreamConfig) -> Self {
        Self::with_timing(
            bus,
            Duration::from_secs(config.heartbeat_s),
            Duration::from_secs(config.idle_timeout_s),
            chrono::Duration::seconds(config.token_ttl_s),
        )
    }

    /// Create a gateway with explicit timings.
    pub fn with_timing(
        bus: Arc<EventBus>,
        heartbeat: Duration,
        idle_timeout: Duration,
        token_ttl: chrono::Duration,
    ) -> Self {
        Self {
            bus,
            tokens: Mutex::new(HashMap::new()),
            heartbeat,
            idle_timeout,
            token_ttl,
        }
    }

    /// Issue a fresh single-use token for `(user, generation)`.
    pub fn issue_token(&self, user_id: &str, generation_id: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let mut tokens = self.tokens.lock().expect("token lock");
        // Opportunistic sweep keeps the table from accumulating dead tokens.
        let now = Utc::now();
        tokens.retain(|_, record| record.expires_at > now);
        tokens.insert(
            token.clone(),
            TokenRecord {
                user_id: user_id.to_string(),
                generation_id: generation_id.to_string(),
                expires_at: now + self.token_ttl,
            },
        );
        token
    }

    /// Validate a token and attach to the generation's event channel.
    ///
    /// The token is consumed whether or not the channel attach succeeds;
    /// reconnection always requires a fresh token.
    pub fn subscribe(
        &self,
        generation_id: &str,
        token: &str,
    ) -> Result<EventStream, StreamError> {
        let record = {
            let mut tokens = self.tokens.lock().expect("token lock");
            tokens.remove(token)
        };

        let Some(record) = record else {
            return Err(StreamError::Unauthorized {
                reason: "unknown or already used token".to_string(),
            });
        };
        if record.expires_at <= Utc::now() {
            return Err(StreamError::Unauthorized {
                reason: "token expired".to_string(),
            });
        }
        if record.generation_id != generation_id {
            return Err(StreamError::Unauthorized {
                reason: "token does not match generation".to_string(),
            });
        }

        let subscription = self.bus.subscribe(generation_id)?;
        tracing::debug!(
            generation_id = %generation_id,
            user_id = %record.user_id,
            "stream subscriber attached"
        );
        Ok(EventStream {
            subscription,
            heartbeat: self.heartbeat,
            idle_timeout: self.idle_timeout,
            idle_elapsed: Duration::ZERO,
            done: false,
        })
    }
}

/// A live event stream for one subscriber.
#[derive(Debug)]
pub struct EventStream {
    subscription: Subscription,
    heartbeat: Duration,
    idle_timeout: Duration,
    idle_elapsed: Duration,
    done: bool,
}

impl EventStream {
    /// Wait for the next delivery.
    ///
    /// Yields `Heartbeat` every quiet heartbeat interval, `IdleTimeout` when
    /// the idle budget is exhausted, and `Closed` once the channel is
    /// terminal and drained. After `Closed` or `IdleTimeout`, further calls
    /// return `Closed`.
    pub async fn next(&mut self) -> StreamItem {
        if self.done {
            return StreamItem::Closed;
        }

        match tokio::time::timeout(self.heartbeat, self.subscription.recv()).await {
            Ok(Some(event)) => {
                self.idle_elapsed = Duration::ZERO;
                StreamItem::Event(event)
            }
            Ok(None) => {
                self.done = true;
                StreamItem::Closed
            }
            Err(_) => {
                self.idle_elapsed += self.heartbeat;
                if self.idle_elapsed >= self.idle_timeout {
                    self.done = true;
                    tracing::debug!(
                        generation_id = %self.subscription.generation_id(),
                        "stream closed after idle timeout"
                    );
                    StreamItem::IdleTimeout
                } else {
                    StreamItem::Heartbeat
                }
            }
        }
    }
}
