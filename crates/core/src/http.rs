//! Single-shot HTTP requests.
//!
//! [`HttpClient`] is the seam between the engine and the network. A request
//! either yields a body, yields `None` (the server answered but has nothing
//! usable for us), or fails with a transient error worth retrying.

use std::time::Duration;

use {
    async_trait::async_trait,
    reqwest::{Client, StatusCode, header},
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{Error, Result};

/// What to extract from a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// `GET`, body as text.
    Text,
    /// `GET`, body parsed as JSON.
    Json,
    /// `HEAD`, the `Last-Modified` header.
    LastModified,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    Json(Value),
    LastModified(Option<String>),
}

impl Body {
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_last_modified(self) -> Option<String> {
        match self {
            Self::LastModified(value) => value,
            _ => None,
        }
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Issue one request. `Err` means a transient failure (connection
    /// error, 5xx); `Ok(None)` means a definitive miss (4xx, unusable body).
    async fn fetch(&self, url: &str, kind: RequestKind) -> Result<Option<Body>>;
}

/// [`HttpClient`] over `reqwest`. Requests bypass caches.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("iitcm/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn fetch(&self, url: &str, kind: RequestKind) -> Result<Option<Body>> {
        debug!(url, ?kind, "http request");

        let request = match kind {
            RequestKind::LastModified => self.client.head(url),
            RequestKind::Text | RequestKind::Json => self.client.get(url),
        };
        let resp = request
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::PRAGMA, "no-cache")
            .send()
            .await
            .map_err(|source| Error::external(format!("request to {url} failed"), source))?;

        let status = resp.status();
        if is_transient(status) {
            return Err(Error::message(format!("{url} returned HTTP {status}")));
        }
        if !status.is_success() {
            debug!(url, %status, "http request returned no content");
            return Ok(None);
        }

        match kind {
            RequestKind::LastModified => {
                let value = resp
                    .headers()
                    .get(header::LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(Some(Body::LastModified(value)))
            },
            RequestKind::Text => {
                let text = resp
                    .text()
                    .await
                    .map_err(|source| Error::external(format!("reading {url} failed"), source))?;
                Ok(Some(Body::Text(text)))
            },
            RequestKind::Json => match resp.json::<Value>().await {
                Ok(value) => Ok(Some(Body::Json(value))),
                Err(e) => {
                    warn!(url, error = %e, "response is not valid JSON");
                    Ok(None)
                },
            },
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_text_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/plugins/ap-stats.user.js")
            .match_header("cache-control", "no-cache")
            .with_status(200)
            .with_body("// plugin code")
            .create_async()
            .await;

        let client = ReqwestClient::new();
        let url = format!("{}/plugins/ap-stats.user.js", server.url());
        let body = client.fetch(&url, RequestKind::Text).await.unwrap();

        assert_eq!(body, Some(Body::Text("// plugin code".into())));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_json_success() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/meta.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"iitc_version": "0.38.0", "categories": {}}"#)
            .create_async()
            .await;

        let client = ReqwestClient::new();
        let body = client
            .fetch(&format!("{}/meta.json", server.url()), RequestKind::Json)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body.into_json().unwrap()["iitc_version"], "0.38.0");
    }

    #[tokio::test]
    async fn fetch_last_modified_uses_head() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("HEAD", "/meta.json")
            .with_status(200)
            .with_header("last-modified", "Tue, 01 Oct 2024 10:00:00 GMT")
            .create_async()
            .await;

        let client = ReqwestClient::new();
        let body = client
            .fetch(&format!("{}/meta.json", server.url()), RequestKind::LastModified)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            body.into_last_modified().as_deref(),
            Some("Tue, 01 Oct 2024 10:00:00 GMT")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_is_a_miss() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.user.js")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;

        let client = ReqwestClient::new();
        let body = client
            .fetch(&format!("{}/missing.user.js", server.url()), RequestKind::Text)
            .await
            .unwrap();
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/meta.json")
            .with_status(503)
            .create_async()
            .await;

        let client = ReqwestClient::new();
        let result = client
            .fetch(&format!("{}/meta.json", server.url()), RequestKind::Json)
            .await;
        assert!(result.unwrap_err().to_string().contains("503"));
    }

    #[tokio::test]
    async fn invalid_json_is_a_miss() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/meta.json")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let client = ReqwestClient::new();
        let body = client
            .fetch(&format!("{}/meta.json", server.url()), RequestKind::Json)
            .await
            .unwrap();
        assert!(body.is_none());
    }
}
