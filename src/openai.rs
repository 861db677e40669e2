//! Thin HTTP client for the OpenAI REST API, shared by the embedder and the
//! chat model. Requests are retried with exponential backoff when the
//! failure is transient (transport error, 429, 5xx).

use std::time::{Duration, Instant};

use reqwest::header;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::error::{QaError, Result};
use crate::utils::clamp_snippet;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base: String,
    retry: RetryPolicy,
}

impl OpenAiClient {
    pub fn new(api_key: &str, base: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let base = base.trim().trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(QaError::InvalidConfig(format!(
                "API base must start with http:// or https://, got '{base}'"
            )));
        }

        let mut headers = header::HeaderMap::new();
        let auth = header::HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| QaError::InvalidConfig(format!("invalid API key header: {e}")))?;
        headers.insert(header::AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| QaError::InvalidConfig(format!("http client build: {e}")))?;

        Ok(Self {
            client,
            base: base.to_string(),
            retry,
        })
    }

    /// POSTs `body` to `{base}{path}` and decodes the JSON reply.
    pub async fn post_json<B, R>(&self, service: &'static str, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base, path);
        let mut attempt = 0;
        loop {
            let started = Instant::now();
            match self.send_once(service, &url, body).await {
                Ok(out) => {
                    debug!(
                        service,
                        %url,
                        latency_ms = started.elapsed().as_millis(),
                        "request completed"
                    );
                    return Ok(out);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        service,
                        attempt = attempt + 1,
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(service, %url, error = %e, "request failed");
                    return Err(e);
                }
            }
        }
    }

    async fn send_once<B, R>(&self, service: &'static str, url: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| QaError::remote(service, None, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(QaError::remote(
                service,
                Some(status.as_u16()),
                clamp_snippet(&text, 300),
            ));
        }

        resp.json::<R>().await.map_err(|e| {
            QaError::remote(service, Some(status.as_u16()), format!("decode response: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubServer;
    use serde_json::{Value, json};

    fn client(base: &str, max_retries: u32) -> OpenAiClient {
        OpenAiClient::new(
            "sk-test",
            base,
            Duration::from_secs(5),
            RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
            },
        )
        .expect("client")
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_rejects_non_http_base() {
        let err = OpenAiClient::new(
            "sk-test",
            "api.openai.com",
            Duration::from_secs(5),
            RetryPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, QaError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_surfaces_remote_error() {
        let client = client("http://127.0.0.1:9", 0);
        let body = json!({ "model": "m" });
        let err = client
            .post_json::<_, Value>("embeddings", "/v1/embeddings", &body)
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::RemoteService { status: None, .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_succeeds() -> Result<()> {
        let server = StubServer::start(vec![
            (503, r#"{"error":"overloaded"}"#),
            (429, r#"{"error":"slow down"}"#),
            (200, r#"{"ok":true}"#),
        ])
        .await;
        let client = client(&server.base, 2);

        let reply: Value = client
            .post_json("chat", "/v1/chat/completions", &json!({ "model": "m" }))
            .await?;
        assert_eq!(reply, json!({ "ok": true }));
        assert_eq!(server.requests().len(), 3);
        assert_eq!(server.requests()[2]["model"], "m");
        Ok(())
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = StubServer::start(vec![
            (401, r#"{"error":{"code":"invalid_api_key"}}"#),
            (200, r#"{"ok":true}"#),
        ])
        .await;
        let client = client(&server.base, 2);

        let err = client
            .post_json::<_, Value>("chat", "/v1/chat/completions", &json!({}))
            .await
            .unwrap_err();
        match err {
            QaError::RemoteService {
                service,
                status,
                message,
            } => {
                assert_eq!(service, "chat");
                assert_eq!(status, Some(401));
                assert!(message.contains("invalid_api_key"), "message was: {message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let server = StubServer::start(vec![(500, "down"), (500, "down"), (500, "down")]).await;
        let client = client(&server.base, 1);

        let err = client
            .post_json::<_, Value>("embeddings", "/v1/embeddings", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::RemoteService { status: Some(500), .. }));
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_remote_error() {
        let server = StubServer::start(vec![(200, "not json")]).await;
        let client = client(&server.base, 2);

        let err = client
            .post_json::<_, Value>("chat", "/v1/chat/completions", &json!({}))
            .await
            .unwrap_err();
        match err {
            QaError::RemoteService { status, message, .. } => {
                assert_eq!(status, Some(200));
                assert!(message.starts_with("decode response"), "message was: {message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(server.requests().len(), 1);
    }
}
