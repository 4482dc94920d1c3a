//! HTTP client for the remote authority's `/entities` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::config::EngineConfig;
use crate::models::{Record, RecordId};
use crate::util::{is_http_url, normalize_text_option};

use super::{RemoteAuthority, RemoteError, RemoteResult};

#[derive(Clone)]
pub struct HttpRemote {
    base_url: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// Build a client from engine configuration; `remote_url` is required.
    pub fn from_config(config: &EngineConfig) -> RemoteResult<Self> {
        let base_url = config.remote_url.clone().ok_or_else(|| {
            RemoteError::InvalidConfiguration("remote_url is not configured".to_string())
        })?;
        Self::new(base_url, config.remote_token.clone(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn url(&self, id: Option<&RecordId>) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                RemoteError::InvalidConfiguration("remote_url cannot be a base".to_string())
            })?;
            segments.pop_if_empty().push("entities");
            if let Some(id) = id {
                segments.push(id.value());
            }
        }
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let request = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> RemoteResult<reqwest::Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn read_record(response: reqwest::Response) -> RemoteResult<Record> {
        let body = response.text().await?;
        let record: Record = serde_json::from_str(&body)
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
        if record.id.is_temporary() {
            return Err(RemoteError::InvalidPayload(
                "authority returned a temporary id".to_string(),
            ));
        }
        Ok(record)
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemote {
    async fn create(&self, record: &Record) -> RemoteResult<Record> {
        let request = self
            .request(reqwest::Method::POST, self.url(None)?)
            .json(&record.to_wire());
        let response = self.send(request).await?;
        Self::read_record(response).await
    }

    async fn fetch(&self, id: &RecordId) -> RemoteResult<Record> {
        let request = self.request(reqwest::Method::GET, self.url(Some(id))?);
        let response = self.send(request).await?;
        Self::read_record(response).await
    }

    async fn update(&self, record: &Record) -> RemoteResult<Record> {
        let request = self
            .request(reqwest::Method::PUT, self.url(Some(&record.id))?)
            .json(&record.to_wire());
        let response = self.send(request).await?;
        Self::read_record(response).await
    }

    async fn delete(&self, id: &RecordId) -> RemoteResult<()> {
        let request = self.request(reqwest::Method::DELETE, self.url(Some(id))?);
        self.send(request).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(body);
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => RemoteError::Server {
            status: status.as_u16(),
            message,
        },
        _ if status.is_server_error() => RemoteError::Server {
            status: status.as_u16(),
            message,
        },
        _ => RemoteError::Client {
            status: status.as_u16(),
            message,
        },
    }
}

fn parse_api_error(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no response body".to_string()
    } else {
        trimmed.to_string()
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<Url> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("remote_url must not be empty".to_string())
    })?;
    if !is_http_url(&base_url) {
        return Err(RemoteError::InvalidConfiguration(
            "remote_url must include http:// or https://".to_string(),
        ));
    }
    Url::parse(base_url.trim_end_matches('/'))
        .map_err(|error| RemoteError::InvalidConfiguration(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(base: &str) -> HttpRemote {
        HttpRemote::new(base, None, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("   ".to_string()).is_err());
        assert!(normalize_base_url("ftp://example.com".to_string()).is_err());
        assert!(normalize_base_url("https://api.example.com/".to_string()).is_ok());
    }

    #[test]
    fn builds_entity_urls() {
        let remote = remote("https://api.example.com/v1/");
        assert_eq!(
            remote.url(None).unwrap().as_str(),
            "https://api.example.com/v1/entities"
        );
        assert_eq!(
            remote
                .url(Some(&RecordId::canonical("a b")))
                .unwrap()
                .as_str(),
            "https://api.example.com/v1/entities/a%20b"
        );
    }

    #[test]
    fn classifies_status_codes() {
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, ""),
            RemoteError::NotFound
        ));
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        let rejected = classify_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"date is invalid"}"#,
        );
        assert!(!rejected.is_transient());
        assert_eq!(rejected.to_string(), "Request rejected: date is invalid (422)");
    }

    #[test]
    fn debug_redacts_token() {
        let remote = HttpRemote::new(
            "https://api.example.com",
            Some("secret".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        let debug = format!("{remote:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret"));
    }
}
