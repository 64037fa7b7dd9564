//! Webhook notifications for honeypot events.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON body sent to the webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub event: String,
    pub drop_id: String,
    /// RFC3339 UTC
    pub timestamp: String,
    pub remote_addr: String,
}

/// POSTs alert payloads to a webhook URL. Sends are fired on detached tasks
/// with a bounded timeout; failures are logged and never retried, so the
/// retrieval path is never blocked.
pub(crate) struct Alerter {
    webhook_url: String,
    client: reqwest::Client,
}

impl Alerter {
    pub(crate) fn new(webhook_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("building webhook client")?;

        Ok(Self {
            webhook_url: webhook_url.to_owned(),
            client,
        })
    }

    pub(crate) fn send(&self, drop_id: &str, remote_addr: &str) {
        let payload = AlertPayload {
            event: "honeypot_access".to_owned(),
            drop_id: drop_id.to_owned(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            remote_addr: remote_addr.to_owned(),
        };

        let client = self.client.clone();
        let url = self.webhook_url.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    warn!(status = %resp.status(), "honeypot webhook returned an error status");
                }
                Ok(_) => {}
                Err(e) => warn!("honeypot webhook POST failed: {e}"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, routing::post, Json, Router};
    use tokio::sync::mpsc;

    /// Local webhook sink capturing posted bodies.
    async fn spawn_sink() -> (String, mpsc::Receiver<AlertPayload>) {
        let (tx, rx) = mpsc::channel(8);

        async fn receive(
            State(tx): State<mpsc::Sender<AlertPayload>>,
            Json(payload): Json<AlertPayload>,
        ) {
            let _ = tx.send(payload).await;
        }

        let app = Router::new().route("/hook", post(receive)).with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        (format!("http://{addr}/hook"), rx)
    }

    #[tokio::test]
    async fn test_alert_posts_payload() {
        let (url, mut rx) = spawn_sink().await;
        let alerter = Alerter::new(&url).unwrap();

        alerter.send("0123456789abcdef0123456789abcdef", "203.0.113.7");

        let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("webhook must be called")
            .expect("payload");

        assert_eq!(payload.event, "honeypot_access");
        assert_eq!(payload.drop_id, "0123456789abcdef0123456789abcdef");
        assert_eq!(payload.remote_addr, "203.0.113.7");
        // RFC3339 UTC, e.g. 2026-08-02T10:00:00Z
        assert!(payload.timestamp.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_unreachable_webhook_does_not_block() {
        // Port 9 on localhost is almost certainly closed; the send must
        // return immediately and only log the failure.
        let alerter = Alerter::new("http://127.0.0.1:9/hook").unwrap();
        alerter.send("0123456789abcdef0123456789abcdef", "198.51.100.2");

        // Give the detached task a moment to fail quietly.
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
