//! reqwest-backed transport for the sync API

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::util::compact_text;

use super::protocol::{PullRequest, PullResponse, PushRequest, PushResponse};
use super::transport::SyncTransport;

const PUSH_PATH: &str = "/v1/sync/push";
const PULL_PATH: &str = "/v1/sync/pull";

/// Talks to `POST {base}/v1/sync/push` and `POST {base}/v1/sync/pull`
#[derive(Clone)]
pub struct HttpSyncTransport {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSyncTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSyncTransport")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpSyncTransport {
    /// Build a transport from a validated config
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("Accept", "application/json")
            .json(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|error| {
            Error::Transport(format!(
                "malformed response from {path}: {error} (body: {})",
                compact_text(&body)
            ))
        })
    }
}

impl SyncTransport for HttpSyncTransport {
    async fn push(&self, request: &PushRequest) -> Result<PushResponse> {
        tracing::debug!(
            operations = request.operations.len(),
            tenant_id = %request.tenant_id,
            "Pushing operations"
        );
        self.post_json(PUSH_PATH, request).await
    }

    async fn pull(&self, request: &PullRequest) -> Result<PullResponse> {
        tracing::debug!(
            cursor = request.cursor.as_deref().unwrap_or("<start>"),
            limit = request.limit,
            "Pulling changes"
        );
        self.post_json(PULL_PATH, request).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return compact_text(&message);
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .map_or_else(|| format!("HTTP {}", status.as_u16()), str::to_string)
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_api_error_prefers_message_field() {
        let message = parse_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error": "bad_request", "message": "tenant mismatch"}"#,
        );
        assert_eq!(message, "tenant mismatch");
    }

    #[test]
    fn parse_api_error_falls_back_to_body_then_reason() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "  upstream down  "),
            "upstream down"
        );
        assert_eq!(
            parse_api_error(StatusCode::SERVICE_UNAVAILABLE, ""),
            "Service Unavailable"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let mut config = ClientConfig::new("https://api.example.com/", "dev-1", "band-1");
        config.auth_token = Some("secret".into());
        let transport = HttpSyncTransport::new(&config).unwrap();

        let debug = format!("{transport:?}");
        assert!(!debug.contains("secret"));
        assert_eq!(transport.base_url(), "https://api.example.com");
    }
}
