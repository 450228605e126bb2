//! Discovery WebSocket client
//!
//! The discovery service does the log parsing and layout decoding and
//! pushes one JSON [`DiscoveryEvent`] per text frame. This client only
//! keeps the connection alive and forwards what it receives.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::{Error, Result};
use crate::stream::events::DiscoveryEvent;

/// Why a connection ended
enum Disconnect {
    /// Server closed or the stream ended
    Remote,
    /// Shutdown requested
    Shutdown,
}

/// Discovery WebSocket client
pub struct DiscoveryClient {
    config: DiscoveryConfig,
    event_tx: mpsc::Sender<DiscoveryEvent>,
}

impl DiscoveryClient {
    pub fn new(config: DiscoveryConfig, event_tx: mpsc::Sender<DiscoveryEvent>) -> Self {
        Self { config, event_tx }
    }

    /// Run the connection loop in the background until `cancel` fires or
    /// the reconnect budget is spent
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        info!("Starting discovery WebSocket client...");
        info!("URL: {}", self.config.ws_url);

        let config = self.config.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut reconnect_attempts = 0u32;

            loop {
                if cancel.is_cancelled() {
                    break;
                }

                match Self::connect_and_stream(&config, &event_tx, &cancel).await {
                    Ok(Disconnect::Shutdown) => break,
                    Ok(Disconnect::Remote) => {
                        // Clean disconnect
                        reconnect_attempts = 0;
                    }
                    Err(e) => {
                        error!("Discovery WebSocket error: {}", e);
                        reconnect_attempts += 1;

                        if config.max_reconnect_attempts > 0
                            && reconnect_attempts >= config.max_reconnect_attempts
                        {
                            error!(
                                "Max reconnect attempts ({}) reached",
                                config.max_reconnect_attempts
                            );
                            break;
                        }
                    }
                }

                let delay = Duration::from_millis(config.reconnect_delay_ms);
                warn!("Reconnecting in {:?}...", delay);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            }

            info!("Discovery client stopped");
        })
    }

    async fn connect_and_stream(
        config: &DiscoveryConfig,
        event_tx: &mpsc::Sender<DiscoveryEvent>,
        cancel: &CancellationToken,
    ) -> Result<Disconnect> {
        let url = url::Url::parse(&config.ws_url)
            .map_err(|e| Error::Config(format!("Invalid WebSocket URL: {}", e)))?;

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::FeedConnection(format!("WebSocket connect failed: {}", e)))?;

        info!("Connected to discovery feed");

        let (mut write, mut read) = ws_stream.split();
        let mut ping_timer =
            tokio::time::interval(Duration::from_secs(config.ping_interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(Disconnect::Shutdown);
                }

                _ = ping_timer.tick() => {
                    write
                        .send(Message::Ping(vec![]))
                        .await
                        .map_err(|e| Error::FeedConnection(format!("Failed to send ping: {}", e)))?;
                    debug!("Sent ping");
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = parse_event(&text) {
                                if event_tx.send(event).await.is_err() {
                                    info!("Event receiver dropped, closing discovery feed");
                                    return Ok(Disconnect::Shutdown);
                                }
                            }
                        }
                        Some(Ok(Message::Pong(_))) => debug!("Received pong"),
                        Some(Ok(Message::Close(_))) => {
                            info!("WebSocket closed by server");
                            return Ok(Disconnect::Remote);
                        }
                        Some(Err(e)) => {
                            return Err(Error::FeedConnection(e.to_string()));
                        }
                        None => {
                            info!("WebSocket stream ended");
                            return Ok(Disconnect::Remote);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Parse one text frame; unknown messages are logged and dropped
pub fn parse_event(text: &str) -> Option<DiscoveryEvent> {
    match serde_json::from_str::<DiscoveryEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            let preview: String = text.chars().take(100).collect();
            debug!("Unknown message ({}): {}", e, preview);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_messages_are_dropped() {
        assert!(parse_event(r#"{"message":"subscribed"}"#).is_none());
        assert!(parse_event("not json").is_none());
    }

    #[test]
    fn test_balance_event_parses() {
        let text = format!(
            r#"{{"type":"wallet_balance_changed","account_id":"{}","mint":"{}","amount":7}}"#,
            solana_sdk::pubkey::Pubkey::new_unique(),
            solana_sdk::pubkey::Pubkey::new_unique()
        );
        assert!(matches!(
            parse_event(&text),
            Some(DiscoveryEvent::WalletBalanceChanged { amount: 7, .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_url_gives_up_after_budget() {
        let (tx, _rx) = mpsc::channel(8);
        let client = DiscoveryClient::new(
            DiscoveryConfig {
                ws_url: "not a url".to_string(),
                reconnect_delay_ms: 1,
                max_reconnect_attempts: 2,
                ping_interval_secs: 30,
                channel_capacity: 8,
            },
            tx,
        );

        // Returns once the reconnect budget is spent
        client.start(CancellationToken::new()).await.unwrap();
    }
}
