use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use crate::config::MonitorConfig;

/// Delivers a text message to a chat group.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, group_id: i64, message: &str) -> Result<()>;
}

/// Posts notifications as JSON to a relay webhook.
pub struct WebhookNotifier {
    http_client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    /// `None` when no webhook is configured.
    pub fn from_config(config: &MonitorConfig) -> Option<Self> {
        config
            .webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| Self::new(url, Duration::from_millis(config.webhook_timeout_ms)))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, group_id: i64, message: &str) -> Result<()> {
        let payload = serde_json::json!({
            "username": "mcpulse",
            "group_id": group_id,
            "content": message,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.http_client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to reach webhook {}", self.url))?
            .error_for_status()
            .context("Webhook rejected notification")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn capture(State(tx): State<mpsc::UnboundedSender<serde_json::Value>>, Json(body): Json<serde_json::Value>) -> StatusCode {
        let _ = tx.send(body);
        StatusCode::NO_CONTENT
    }

    #[tokio::test]
    async fn test_webhook_payload() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let app = Router::new()
            .route("/hook", post(capture))
            .route("/broken", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .with_state(tx);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let notifier = WebhookNotifier::new(format!("http://127.0.0.1:{}/hook", port), Duration::from_secs(2));
        notifier.notify(1001, "hello").await.unwrap();
        let body = rx.recv().await.unwrap();
        assert_eq!(body["group_id"], 1001);
        assert_eq!(body["content"], "hello");

        let broken = WebhookNotifier::new(format!("http://127.0.0.1:{}/broken", port), Duration::from_secs(2));
        assert!(broken.notify(1001, "hello").await.is_err());
    }

    #[tokio::test]
    async fn test_slow_webhook_times_out() {
        let app = Router::new().route(
            "/slow",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                StatusCode::NO_CONTENT
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let notifier = WebhookNotifier::new(format!("http://127.0.0.1:{}/slow", port), Duration::from_millis(200));
        let started = std::time::Instant::now();
        assert!(notifier.notify(1001, "hello").await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_from_config_needs_a_url() {
        let mut config = MonitorConfig::default();
        assert!(WebhookNotifier::from_config(&config).is_none());
        config.webhook_url = Some("  ".into());
        assert!(WebhookNotifier::from_config(&config).is_none());
        config.webhook_url = Some("http://relay.example/hook".into());
        let notifier = WebhookNotifier::from_config(&config).unwrap();
        assert_eq!(notifier.url(), "http://relay.example/hook");
        assert_eq!(notifier.timeout, Duration::from_millis(10_000));
    }
}
