//! HTTP client for the Pendo API.

use crate::aggregation::request::{FlatRequest, PipelineRequest};
use crate::aggregation::response::{rows, Row};
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::{DataOverview, ListOverview};
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Header carrying the integration key.
pub const INTEGRATION_KEY_HEADER: &str = "X-Pendo-Integration-Key";

const AGGREGATION_ENDPOINT: &str = "/api/v1/aggregation";

/// Connectivity report for `status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStatus {
    pub connected: bool,
    pub base_url: String,
    pub api_key_prefix: String,
}

/// Client for the aggregation and list endpoints.
pub struct PendoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout_seconds: u64,
}

impl PendoClient {
    /// Create a client; fails when no key is configured.
    pub fn new(config: &ApiConfig) -> ApiResult<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ApiError::MissingApiKey)?
            .to_string();

        let mut key_value =
            HeaderValue::from_str(&api_key).map_err(|_| ApiError::InvalidApiKey)?;
        key_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(INTEGRATION_KEY_HEADER, key_value);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("pendo-insights/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_seconds: config.timeout_seconds,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// First ten characters of the key, for display.
    pub fn masked_key(&self) -> String {
        let prefix: String = self.api_key.chars().take(10).collect();
        format!("{}...", prefix)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Run a flat aggregation request.
    pub async fn aggregate_flat(&self, request: &FlatRequest) -> ApiResult<Vec<Row>> {
        debug!("Flat aggregation on {} ({})", request.source, request.request_id);
        let body = self.post_json(AGGREGATION_ENDPOINT, request).await?;
        Ok(rows(&body))
    }

    /// Run a pipeline aggregation request.
    pub async fn aggregate_pipeline(&self, request: &PipelineRequest) -> ApiResult<Vec<Row>> {
        debug!(
            "Pipeline aggregation with {} stages ({})",
            request.pipeline.len(),
            request.request_id.as_deref().unwrap_or("-")
        );
        let body = self.post_json(AGGREGATION_ENDPOINT, request).await?;
        Ok(rows(&body))
    }

    pub async fn list_guides(&self) -> ApiResult<Vec<Row>> {
        Ok(rows(&self.get_json("/api/v1/guide").await?))
    }

    pub async fn list_pages(&self) -> ApiResult<Vec<Row>> {
        Ok(rows(&self.get_json("/api/v1/page").await?))
    }

    pub async fn list_features(&self) -> ApiResult<Vec<Row>> {
        Ok(rows(&self.get_json("/api/v1/feature").await?))
    }

    pub async fn list_reports(&self) -> ApiResult<Vec<Row>> {
        Ok(rows(&self.get_json("/api/v1/report").await?))
    }

    /// Metadata schema for `visitor`, `account` or `guide`.
    pub async fn metadata_schema(&self, kind: &str) -> ApiResult<Value> {
        self.get_json(&format!("/api/v1/metadata/schema/{}", kind))
            .await
    }

    /// Count and first record of guides, features, pages and reports.
    pub async fn data_overview(&self) -> ApiResult<DataOverview> {
        let (guides, features, pages, reports) = futures::try_join!(
            self.list_guides(),
            self.list_features(),
            self.list_pages(),
            self.list_reports(),
        )?;

        Ok(DataOverview {
            timestamp: Utc::now(),
            guides: ListOverview::from_rows(guides),
            features: ListOverview::from_rows(features),
            pages: ListOverview::from_rows(pages),
            reports: ListOverview::from_rows(reports),
        })
    }

    /// Whether the guide list endpoint answers with the configured key.
    pub async fn test_connection(&self) -> bool {
        match self.list_guides().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Connection test failed: {}", e);
                false
            }
        }
    }

    pub async fn status(&self) -> ApiStatus {
        ApiStatus {
            connected: self.test_connection().await,
            base_url: self.base_url.clone(),
            api_key_prefix: self.masked_key(),
        }
    }

    async fn get_json(&self, endpoint: &str) -> ApiResult<Value> {
        let request = self.http.get(self.url(endpoint));
        self.send(endpoint, request).await
    }

    async fn post_json<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> ApiResult<Value> {
        let request = self.http.post(self.url(endpoint)).json(body);
        self.send(endpoint, request).await
    }

    async fn send(&self, endpoint: &str, request: reqwest::RequestBuilder) -> ApiResult<Value> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout {
                    endpoint: endpoint.to_string(),
                    seconds: self.timeout_seconds,
                }
            } else if e.is_connect() {
                ApiError::Connect {
                    base_url: self.base_url.clone(),
                }
            } else {
                ApiError::Request(e)
            }
        })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), &body));
        }

        debug!("Successful request to {}", endpoint);

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|source| ApiError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// (request line prefix, status, body)
    type Route = (&'static str, u16, &'static str);

    fn api_config(key: Option<&str>) -> ApiConfig {
        ApiConfig {
            api_key: key.map(String::from),
            base_url: "http://127.0.0.1:1/".to_string(),
            timeout_seconds: 2,
            ..ApiConfig::default()
        }
    }

    #[test]
    fn test_missing_key_is_rejected() {
        assert!(matches!(
            PendoClient::new(&api_config(None)),
            Err(ApiError::MissingApiKey)
        ));
        assert!(matches!(
            PendoClient::new(&api_config(Some("   "))),
            Err(ApiError::MissingApiKey)
        ));
    }

    #[test]
    fn test_invalid_key_characters() {
        assert!(matches!(
            PendoClient::new(&api_config(Some("bad\nkey"))),
            Err(ApiError::InvalidApiKey)
        ));
    }

    #[test]
    fn test_masked_key_and_base_url() {
        let client = PendoClient::new(&api_config(Some("0123456789abcdef"))).unwrap();
        assert_eq!(client.masked_key(), "0123456789...");
        assert_eq!(client.base_url(), "http://127.0.0.1:1");
        assert_eq!(client.url(AGGREGATION_ENDPOINT), "http://127.0.0.1:1/api/v1/aggregation");
    }

    #[tokio::test]
    async fn test_unreachable_host_reports_connect_error() {
        let client = PendoClient::new(&api_config(Some("key"))).unwrap();
        let err = client.list_guides().await.unwrap_err();
        assert!(matches!(err, ApiError::Connect { .. }), "got {err:?}");
        assert!(!client.test_connection().await);
    }

    /// Answers each connection with the first route whose prefix matches
    /// the request line, or a 404.
    async fn serve(routes: Vec<Route>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let routes = routes.clone();
                tokio::spawn(async move {
                    let request = read_request(&mut socket).await;
                    let (status, body) = routes
                        .iter()
                        .find(|(prefix, _, _)| request.starts_with(prefix))
                        .map(|(_, status, body)| (*status, *body))
                        .unwrap_or((404, r#"{"message":"no route"}"#));
                    let response = format!(
                        "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}", addr)
    }

    /// Reads the head and any `Content-Length` body of one request.
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&data).into_owned();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let line = line.to_ascii_lowercase();
                        let value = line.strip_prefix("content-length:")?;
                        value.trim().parse::<usize>().ok()
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    fn local_client(base_url: String) -> PendoClient {
        PendoClient::new(&ApiConfig {
            api_key: Some("key".to_string()),
            base_url,
            timeout_seconds: 5,
            ..ApiConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_error_status_carries_json_message() {
        let base = serve(vec![(
            "GET /api/v1/guide ",
            401,
            r#"{"message":"Invalid integration key"}"#,
        )])
        .await;
        let client = local_client(base);

        match client.list_guides().await {
            Err(ApiError::Status { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid integration key");
            }
            other => panic!("expected status error, got {other:?}"),
        }
        assert!(!client.test_connection().await);
    }

    #[tokio::test]
    async fn test_empty_and_resultless_bodies_yield_no_rows() {
        let base = serve(vec![
            ("POST /api/v1/aggregation ", 200, ""),
            ("GET /api/v1/page ", 200, "{}"),
        ])
        .await;
        let client = local_client(base);

        let rows = client.aggregate_pipeline(&PipelineRequest::new()).await.unwrap();
        assert!(rows.is_empty());
        assert!(client.list_pages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_data_overview_counts_each_list() {
        let base = serve(vec![
            ("GET /api/v1/guide ", 200, include_str!("../../fixtures/guides.json")),
            ("GET /api/v1/feature ", 200, "[]"),
            ("GET /api/v1/page ", 200, "{}"),
            ("GET /api/v1/report ", 200, r#"[{"id": "r1", "name": "Weekly"}, {"id": "r2"}]"#),
        ])
        .await;
        let client = local_client(base);

        let overview = client.data_overview().await.unwrap();
        assert_eq!(overview.guides.count, 4);
        assert_eq!(overview.guides.sample.as_ref().unwrap()["id"], "g-welcome");
        assert_eq!(overview.features.count, 0);
        assert!(overview.features.sample.is_none());
        assert_eq!(overview.pages.count, 0);
        assert_eq!(overview.reports.count, 2);
        assert_eq!(overview.reports.sample.as_ref().unwrap()["name"], "Weekly");
    }

    #[tokio::test]
    async fn test_data_overview_fails_when_a_list_fails() {
        let base = serve(vec![("GET /api/v1/guide ", 200, "[]")]).await;
        let client = local_client(base);

        let err = client.data_overview().await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}
