//! Connector to the provider's event gateway.
//!
//! The gateway streams newline-delimited JSON events (`{namespace?, type, payload}`)
//! over a long-lived HTTP response, authenticated with the provider key. Every
//! decoded event is republished on the local [`BroadcastFeed`], so subscribers
//! see gateway and webhook events alike. Blank lines are keep-alives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response, Url};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BroadcastFeed, EventFeed, EventHandler, FeedError, FeedEvent};
use crate::config::UpstreamConfig;

/// Event feed backed by the provider's streaming gateway.
pub struct GatewayFeed {
    stream: Arc<GatewayStream>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// What the background pump needs to read and reopen the stream.
struct GatewayStream {
    hub: Arc<BroadcastFeed>,
    http: Client,
    url: Url,
    key: String,
    reconnect: Duration,
    connected: AtomicBool,
}

impl GatewayFeed {
    pub fn new(config: &UpstreamConfig, hub: Arc<BroadcastFeed>) -> Result<Self, FeedError> {
        let events = config
            .events
            .as_deref()
            .ok_or_else(|| FeedError::Rejected("no event gateway configured".to_string()))?;
        let url = Url::parse(events)
            .map_err(|e| FeedError::Rejected(format!("events {}: {}", events, e)))?;

        // No overall timeout: the response body stays open for the life of the connection
        let http = Client::builder()
            .connect_timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| FeedError::Rejected(e.to_string()))?;

        Ok(Self {
            stream: Arc::new(GatewayStream {
                hub,
                http,
                url,
                key: config.key.clone(),
                reconnect: config.reconnect_delay(),
                connected: AtomicBool::new(false),
            }),
            pump: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &Url {
        &self.stream.url
    }

    /// True while the gateway stream is open.
    pub fn is_connected(&self) -> bool {
        self.stream.connected.load(Ordering::SeqCst)
    }

    /// Open the stream and start forwarding events.
    ///
    /// Fails when the gateway is unreachable or refuses the key. Once connected,
    /// dropped streams are reopened in the background every `reconnect_ms`.
    pub async fn connect(&self) -> Result<(), FeedError> {
        let response = self.stream.open().await?;
        self.stream.connected.store(true, Ordering::SeqCst);
        info!(url = %self.stream.url, "Connected to event gateway");

        let task = tokio::spawn(self.stream.clone().run(response));
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(previous) = pump.replace(task) {
                previous.abort();
            }
        }
        Ok(())
    }

    /// Close the stream and stop reconnecting.
    pub fn shutdown(&self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(task) = pump.take() {
                task.abort();
            }
        }
        self.stream.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for GatewayFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl EventFeed for GatewayFeed {
    async fn subscribe(
        &self,
        namespace: &str,
        types: &[&str],
        handler: EventHandler,
    ) -> Result<(), FeedError> {
        self.stream.hub.subscribe(namespace, types, handler).await
    }
}

impl GatewayStream {
    async fn open(&self) -> Result<Response, FeedError> {
        let response = self
            .http
            .get(self.url.clone())
            .header(AUTHORIZATION, &self.key)
            .header(ACCEPT, "application/x-ndjson")
            .send()
            .await
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Rejected(format!("event gateway answered {}", status)));
        }
        Ok(response)
    }

    async fn run(self: Arc<Self>, mut response: Response) {
        loop {
            self.drain(response).await;
            self.connected.store(false, Ordering::SeqCst);
            metrics::counter!("iam_feed_disconnects_total").increment(1);
            warn!(url = %self.url, "Event gateway stream closed, reconnecting");

            response = loop {
                tokio::time::sleep(self.reconnect).await;
                match self.open().await {
                    Ok(response) => break response,
                    Err(e) => warn!(error = %e, "Event gateway reconnect failed"),
                }
            };
            self.connected.store(true, Ordering::SeqCst);
            info!(url = %self.url, "Reconnected to event gateway");
        }
    }

    /// Forward events until the body ends or fails.
    async fn drain(&self, mut response: Response) {
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    buffer.extend_from_slice(&chunk);
                    while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=end).collect();
                        if let Some(event) = parse_line(&line) {
                            self.hub.publish(event);
                        }
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "Event gateway stream failed");
                    return;
                }
            }
        }
    }
}

/// Decode one stream line. Keep-alives and undecodable lines yield nothing.
fn parse_line(line: &[u8]) -> Option<FeedEvent> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_slice::<FeedEvent>(line) {
        Ok(event) => {
            debug!(namespace = %event.namespace, event_type = %event.event_type, "Gateway event received");
            Some(event)
        }
        Err(e) => {
            warn!(error = %e, "Undecodable gateway event skipped");
            None
        }
    }
}
