//! Search-backend forwarding.
//!
//! [`UpstreamBackend`] relays a request to the search backend and returns
//! the response as-is. It does not interpret bodies; boosting happens in the
//! proxy around it. Every status code is relayed, including `5xx`.

use crate::error::{HandlerError, HandlerResult};
use axum::body::Bytes;
use boost_kernel::HttpMethod;
use reqwest::{Client, Method};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Headers that must not be copied between hops.
const HOP_HEADERS: &[&str] = &["host", "content-length", "connection", "transfer-encoding"];

/// A request on its way to the backend.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    /// Path plus query string.
    pub path_and_query: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// The backend's answer.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub latency_ms: u64,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Response headers minus hop-by-hop and length headers.
    pub fn relay_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter(|(k, _)| !is_hop_header(k))
            .cloned()
            .collect()
    }
}

/// HTTP client for one search backend.
#[derive(Debug, Clone)]
pub struct UpstreamBackend {
    base_url: String,
    client: Client,
}

impl UpstreamBackend {
    /// - `base_url`: e.g. `http://localhost:9200`.
    /// - `timeout`: transport timeout for each forwarded request.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forward `req` to `{base_url}{req.path_and_query}`.
    #[instrument(skip(self, req), fields(upstream = %self.base_url, path = %req.path_and_query))]
    pub async fn forward(&self, req: &UpstreamRequest) -> HandlerResult<UpstreamResponse> {
        let url = format!("{}{}", self.base_url, req.path_and_query);
        debug!(url = %url, "forwarding to search backend");

        let start = Instant::now();
        let mut builder = self.client.request(to_reqwest_method(req.method), &url);
        for (key, value) in &req.headers {
            if is_hop_header(key) {
                continue;
            }
            builder = builder.header(key, value);
        }
        if !req.body.is_empty() {
            builder = builder.body(req.body.clone());
        }

        let upstream_resp = builder.send().await.map_err(|e| self.network_error(e))?;
        let status = upstream_resp.status().as_u16();

        let headers = upstream_resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
            })
            .collect();

        let body = upstream_resp.bytes().await.map_err(|e| self.network_error(e))?;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        Ok(UpstreamResponse {
            status,
            headers,
            body,
            latency_ms,
        })
    }

    fn network_error(&self, err: reqwest::Error) -> HandlerError {
        HandlerError::Upstream {
            backend: self.base_url.clone(),
            message: err.to_string(),
        }
    }
}

fn is_hop_header(name: &str) -> bool {
    HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
        _ => Method::GET,
    }
}
