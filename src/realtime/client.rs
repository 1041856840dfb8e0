//! Server-sent-events transport for the realtime feed.
//!
//! # Protocol
//!
//! 1. `GET /api/realtime` opens an event stream
//! 2. The first frame (`PB_CONNECT`) carries a client id
//! 3. `POST /api/realtime` with `{clientId, subscriptions}` selects topics
//! 4. Each change arrives as a frame named after its topic
//!
//! Topics are re-posted whenever the hub's set of watched collections
//! changes. A lost stream is reported to subscribers through the hub and
//! the connection is retried with backoff; once the server accepts the
//! subscriptions of a new connection, the hub reports them restored.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::realtime::connection::{ConnectionState, calculate_backoff};
use crate::realtime::sse::{SseDecoder, StreamMessage, decode_frame};
use crate::realtime::{ChannelSignal, EventHandler, Hub, Realtime, SubscriptionHandle};
use crate::store::Session;
use crate::store::pocketbase::read_body;
use crate::{Error, Result};

/// Realtime connection to a record server.
pub struct RealtimeClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<Session>,
    hub: Hub,
    state: watch::Sender<ConnectionState>,
    max_attempts: Option<u32>,
}

impl RealtimeClient {
    pub fn new(http: reqwest::Client, base_url: &str, session: Arc<Session>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            hub: Hub::new(),
            state,
            max_attempts: None,
        }
    }

    /// Give up after `n` consecutive failed attempts. Unlimited by default.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run the connection loop on the current runtime.
    pub fn spawn(self: &Arc<Self>) -> RealtimeTask {
        let client = Arc::clone(self);
        RealtimeTask {
            handle: tokio::spawn(async move { client.run().await }),
        }
    }

    /// Connect and keep reconnecting until the attempt limit is reached.
    pub async fn run(&self) {
        let mut attempt: u32 = 0;
        loop {
            match self.connect_and_stream(&mut attempt).await {
                Ok(()) => {
                    tracing::info!("realtime hub released, closing stream");
                    self.state.send_replace(ConnectionState::Disconnected);
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "realtime connection lost");
                }
            }

            self.hub.report_dropped();
            attempt = attempt.saturating_add(1);
            if let Some(max) = self.max_attempts {
                if attempt > max {
                    tracing::error!(attempts = max, "giving up on realtime connection");
                    self.state.send_replace(ConnectionState::Disconnected);
                    return;
                }
            }

            let delay = calculate_backoff(attempt);
            self.state.send_replace(ConnectionState::Reconnecting {
                attempt,
                next_retry: Some(Instant::now() + delay),
            });
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_stream(&self, attempt: &mut u32) -> Result<()> {
        let url = format!("{}/api/realtime", self.base_url);
        tracing::debug!(url = %url, "opening realtime stream");

        let response = self
            .http
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Store {
                status: response.status().as_u16(),
                message: "realtime stream refused".to_string(),
            });
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::new();
        let mut topics = self.hub.topics();
        let mut client_id: Option<String> = None;

        loop {
            tokio::select! {
                chunk = stream.next() => {
                    let bytes = match chunk {
                        Some(Ok(bytes)) => bytes,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(Error::Other("realtime stream closed".to_string())),
                    };
                    for frame in decoder.push(&bytes) {
                        match decode_frame(&frame) {
                            Some(StreamMessage::Connect { client_id: id }) => {
                                let current = topics.borrow_and_update().clone();
                                self.post_subscriptions(&id, &current).await?;
                                tracing::info!(client_id = %id, topics = current.len(), "realtime connected");
                                self.state.send_replace(ConnectionState::Connected);
                                *attempt = 0;
                                client_id = Some(id);
                                self.hub.report_restored(&current);
                            }
                            Some(StreamMessage::Record { collection, event }) => {
                                self.hub.dispatch(&collection, &event);
                            }
                            None => {}
                        }
                    }
                }

                changed = topics.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    if let Some(ref id) = client_id {
                        let current = topics.borrow_and_update().clone();
                        self.post_subscriptions(id, &current).await?;
                    }
                }
            }
        }
    }

    async fn post_subscriptions(&self, client_id: &str, collections: &BTreeSet<String>) -> Result<()> {
        let subscriptions: Vec<String> = collections.iter().map(|c| format!("{}/*", c)).collect();
        tracing::debug!(client_id, ?subscriptions, "posting subscriptions");
        let mut request = self
            .http
            .post(format!("{}/api/realtime", self.base_url))
            .json(&json!({"clientId": client_id, "subscriptions": subscriptions}));
        if let Some(token) = self.session.token() {
            request = request.header("Authorization", token);
        }
        read_body(request.send().await?).await?;
        Ok(())
    }
}

impl Realtime for RealtimeClient {
    fn watch(&self, collection: &str, handler: EventHandler) -> SubscriptionHandle {
        self.hub.watch(collection, handler)
    }

    fn signals(&self) -> broadcast::Receiver<ChannelSignal> {
        self.hub.signals()
    }
}

/// Running connection loop. Dropping it stops the loop.
pub struct RealtimeTask {
    handle: JoinHandle<()>,
}

impl RealtimeTask {
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for RealtimeTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
