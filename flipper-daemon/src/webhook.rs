//! Webhook notifier: posts announcements as `{"content": "..."}`.

use crate::config::WebhookConfig;
use crate::error::DaemonResult;
use async_trait::async_trait;
use flipper_core::{FlipperResult, RemoteError};
use flipper_engine::Notifier;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: SecretString,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig, url: SecretString) -> DaemonResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, url })
    }
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("url", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str) -> FlipperResult<()> {
        let response = self
            .client
            .post(self.url.expose_secret())
            .json(&WebhookMessage { content: text })
            .send()
            .await
            .map_err(|e| RemoteError::Transient {
                operation: "notify".to_string(),
                // The error text may echo the secret URL.
                reason: e.without_url().to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Rejected {
                operation: "notify".to_string(),
                reason: status.to_string(),
            }
            .into());
        }
        tracing::debug!(status = %status, "Announcement delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipper_core::FlipperError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one request, answer with `status`, and return the raw request.
    async fn one_shot(status: u16) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !String::from_utf8_lossy(&buf).contains("}") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let reply = format!(
                "HTTP/1.1 {} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{}/hook/secret", addr), handle)
    }

    fn notifier(url: String) -> WebhookNotifier {
        WebhookNotifier::new(&WebhookConfig::default(), SecretString::new(url.into())).unwrap()
    }

    #[tokio::test]
    async fn test_posts_content_json() {
        let (url, request) = one_shot(204).await;
        notifier(url).notify("Daily Grind: Now playing Twilight Zone.").await.unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /hook/secret HTTP/1.1"));
        assert!(request.contains(r#"{"content":"Daily Grind: Now playing Twilight Zone."}"#));
    }

    #[tokio::test]
    async fn test_rejected_status_is_an_error() {
        let (url, _request) = one_shot(400).await;
        let result = notifier(url).notify("hello").await;
        assert!(matches!(
            result,
            Err(FlipperError::Remote(RemoteError::Rejected { .. }))
        ));
    }

    #[test]
    fn test_debug_hides_url() {
        let shown = format!("{:?}", notifier("http://hooks.local/abc123".to_string()));
        assert!(!shown.contains("abc123"));
    }
}
