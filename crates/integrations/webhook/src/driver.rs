use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use klaxon_notify::{DeliveryReceipt, NotificationMessage, NotifyDriver, NotifyError};

use crate::config::WebhookChannelConfig;

/// Generic HTTP webhook driver: POSTs the notification message as JSON to
/// the channel's configured URL.
///
/// Classification: 429 and 5xx responses and transport timeouts are
/// retryable; other non-2xx responses are permanent rejections.
pub struct WebhookDriver {
    client: Client,
}

impl Default for WebhookDriver {
    fn default() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl WebhookDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a caller-provided client (shared connection pool, test setup).
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotifyDriver for WebhookDriver {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(
        &self,
        message: &NotificationMessage,
        config: &serde_json::Value,
    ) -> Result<DeliveryReceipt, NotifyError> {
        let config: WebhookChannelConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::Configuration(format!("webhook config: {e}")))?;

        debug!(url = %config.url, dedup_key = %message.dedup_key, "posting webhook");

        let mut request = self
            .client
            .post(&config.url)
            .timeout(config.timeout())
            .json(message);
        for (key, value) in &config.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                NotifyError::Timeout(config.timeout())
            } else {
                NotifyError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            warn!(url = %config.url, "webhook endpoint rate limited");
            return Err(NotifyError::RateLimited);
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Connection(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Delivery(format!("HTTP {status}: {body}")));
        }

        let body = response.text().await.unwrap_or_default();
        let detail: serde_json::Value = serde_json::from_str(&body)
            .unwrap_or_else(|_| serde_json::json!({"status": status.as_u16(), "body": body}));
        Ok(DeliveryReceipt::new(detail))
    }
}

#[cfg(test)]
mod tests {
    use klaxon_core::Severity;

    use super::*;

    /// Minimal one-shot HTTP server for exercising the driver end to end.
    struct MockEndpoint {
        listener: tokio::net::TcpListener,
        url: String,
    }

    impl MockEndpoint {
        async fn start() -> Self {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("failed to bind mock endpoint");
            let port = listener.local_addr().unwrap().port();
            Self {
                listener,
                url: format!("http://127.0.0.1:{port}/hook"),
            }
        }

        /// Accept one connection, respond with the given status and body,
        /// and return the raw request bytes.
        async fn respond_once(self, status: u16, body: &str) -> Vec<u8> {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};

            let body = body.to_owned();
            let (mut stream, _) = self.listener.accept().await.unwrap();

            let mut buf = vec![0u8; 16384];
            let n = stream.read(&mut buf).await.unwrap();
            buf.truncate(n);

            let response = format!(
                "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            buf
        }
    }

    fn message() -> NotificationMessage {
        NotificationMessage {
            title: "High CPU".into(),
            body: "web-01 at 95%".into(),
            severity: Severity::Critical,
            dedup_key: "trace:notify".into(),
            trace_id: "trace".into(),
            incident_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn delivers_message_as_json() {
        let endpoint = MockEndpoint::start().await;
        let config = serde_json::json!({"url": endpoint.url.clone()});
        let driver = WebhookDriver::new();

        let handle =
            tokio::spawn(async move { endpoint.respond_once(200, r#"{"ok": true}"#).await });
        let receipt = driver.deliver(&message(), &config).await.unwrap();
        let request = handle.await.unwrap();

        assert_eq!(receipt.detail["ok"], true);
        let request = String::from_utf8_lossy(&request);
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains("High CPU"));
        assert!(request.contains("trace:notify"));
    }

    #[tokio::test]
    async fn custom_headers_are_sent() {
        let endpoint = MockEndpoint::start().await;
        let config = serde_json::json!({
            "url": endpoint.url.clone(),
            "headers": {"X-Token": "secret-1"}
        });
        let driver = WebhookDriver::new();

        let handle = tokio::spawn(async move {
            let request = endpoint.respond_once(200, "{}").await;
            let request = String::from_utf8_lossy(&request).to_lowercase();
            assert!(request.contains("x-token: secret-1"));
        });
        driver.deliver(&message(), &config).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let endpoint = MockEndpoint::start().await;
        let config = serde_json::json!({"url": endpoint.url.clone()});
        let driver = WebhookDriver::new();

        let handle = tokio::spawn(async move {
            endpoint.respond_once(503, r#"{"error":"unavailable"}"#).await
        });
        let err = driver.deliver(&message(), &config).await.unwrap_err();
        handle.await.unwrap();

        assert!(matches!(err, NotifyError::Connection(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn rate_limit_is_retryable() {
        let endpoint = MockEndpoint::start().await;
        let config = serde_json::json!({"url": endpoint.url.clone()});
        let driver = WebhookDriver::new();

        let handle = tokio::spawn(async move { endpoint.respond_once(429, "{}").await });
        let err = driver.deliver(&message(), &config).await.unwrap_err();
        handle.await.unwrap();

        assert!(matches!(err, NotifyError::RateLimited));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn client_error_is_fatal() {
        let endpoint = MockEndpoint::start().await;
        let config = serde_json::json!({"url": endpoint.url.clone()});
        let driver = WebhookDriver::new();

        let handle = tokio::spawn(async move {
            endpoint.respond_once(404, r#"{"error":"gone"}"#).await
        });
        let err = driver.deliver(&message(), &config).await.unwrap_err();
        handle.await.unwrap();

        assert!(matches!(err, NotifyError::Delivery(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn bad_config_is_fatal() {
        let driver = WebhookDriver::new();
        let err = driver
            .deliver(&message(), &serde_json::json!({"no_url": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Configuration(_)));
    }
}
