//! The request pipeline: the single entry point of every gateway service.
//!
//! Each request goes through the same states:
//!
//! ```text
//! received → logged → dispatching ─┬─ handled ──┐
//!                                  ├─ not_found ─┼→ response logged → sent
//!                                  └─ errored ───┘
//! ```
//!
//! Dispatch uses the bound route table. Unmatched requests, and handlers
//! that answer [`HandlerError::NotFound`], go to the service's not-found
//! handler. Any other error, or a panic inside a handler, becomes a
//! `500 {"error", "type"}` body. Bodies over the service's size limit are
//! refused with `413` before any handler runs. The pipeline itself never
//! fails.

use crate::error::{HandlerError, HandlerResult};
use crate::router::{BoundHandler, BoundRoutes, HandlerFuture};
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use boost_kernel::HttpMethod;
use boost_kernel::adapter::RequestDocument;
use futures::FutureExt;
use http_body_util::LengthLimitError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// HandlerRequest
// ─────────────────────────────────────────────────────────────────────────────

/// What a handler sees of an inbound request.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub id: String,
    pub method: HttpMethod,
    pub path: String,
    pub query: Option<String>,
    /// Header names are lowercase.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Captures of `{param}` segments of the matched route.
    pub params: HashMap<String, String>,
}

impl HandlerRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method,
            path: path.into(),
            query: None,
            headers: Vec::new(),
            body: Bytes::new(),
            params: HashMap::new(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into().to_lowercase(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Path plus query string, as received.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }

    /// Deserialize the JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> HandlerResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| HandlerError::BadRequest(format!("invalid JSON body: {e}")))
    }

    /// The request as an adapter envelope.
    pub fn document(&self) -> RequestDocument {
        RequestDocument::from_raw(
            &self.path,
            self.query.as_deref(),
            self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            &self.body,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reply
// ─────────────────────────────────────────────────────────────────────────────

/// What a handler produces.
#[derive(Debug, Clone)]
pub struct Reply {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Reply {
    /// `200` with a JSON body.
    pub fn json(value: Value) -> Self {
        Self::json_with_status(StatusCode::OK, value)
    }

    pub fn json_with_status(status: StatusCode, value: Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(value.to_string()),
        }
    }

    /// `200` with the raw bytes as body.
    pub fn plain(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Arbitrary status, headers and body, e.g. a relayed upstream response.
    pub fn raw(status: StatusCode, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            match (
                header::HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(header = %name, "dropping header that is not valid HTTP"),
            }
        }
        response
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RequestPipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Request bodies larger than this are refused unless a service says otherwise.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Dispatcher shared by every connection of one service.
#[derive(Clone)]
pub struct RequestPipeline {
    service: String,
    routes: Arc<BoundRoutes>,
    not_found: BoundHandler,
    max_body_bytes: usize,
}

impl RequestPipeline {
    pub fn new(service: impl Into<String>, routes: BoundRoutes, not_found: BoundHandler) -> Self {
        Self {
            service: service.into(),
            routes: Arc::new(routes),
            not_found,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn routes(&self) -> &BoundRoutes {
        &self.routes
    }

    /// Run one request through the pipeline.
    pub async fn handle(&self, request: Request) -> Response {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();

        let outcome = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(body) => {
                info!(
                    request_id  = %request_id,
                    service     = %self.service,
                    method      = %parts.method,
                    path        = %path,
                    body_len    = body.len(),
                    "→ inbound request"
                );
                match HttpMethod::from_str_ci(parts.method.as_str()) {
                    Some(method) => {
                        let req = HandlerRequest {
                            id: request_id.clone(),
                            method,
                            path: path.clone(),
                            query: parts.uri.query().map(str::to_string),
                            headers: parts
                                .headers
                                .iter()
                                .filter_map(|(k, v)| {
                                    v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string()))
                                })
                                .collect(),
                            body,
                            params: HashMap::new(),
                        };
                        self.dispatch(req).await
                    }
                    None => Err(HandlerError::MethodNotAllowed(parts.method.to_string())),
                }
            }
            Err(e) if exceeded_limit(&e) => Err(HandlerError::PayloadTooLarge(self.max_body_bytes)),
            Err(e) => Err(HandlerError::BadRequest(format!("failed to read body: {e}"))),
        };

        let reply = match outcome {
            Ok(reply) => reply,
            Err(HandlerError::NotFound) => HandlerError::NotFound.to_reply(),
            Err(err) => {
                error!(
                    request_id  = %request_id,
                    path        = %path,
                    kind        = err.kind(),
                    error       = %err,
                    "handler failed"
                );
                err.to_reply()
            }
        };

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let status = reply.status().as_u16();
        if status >= 500 {
            error!(
                request_id  = %request_id,
                path        = %path,
                status      = status,
                latency_ms  = latency_ms,
                "← error response"
            );
        } else {
            info!(
                request_id  = %request_id,
                path        = %path,
                status      = status,
                latency_ms  = latency_ms,
                "← outbound response"
            );
        }
        reply.into_response()
    }

    async fn dispatch(&self, mut req: HandlerRequest) -> HandlerResult<Reply> {
        let Some((route, params)) = self.routes.find(req.method, &req.path) else {
            return guarded((self.not_found)(req)).await;
        };
        req.params = params;
        match guarded(route.call(req.clone())).await {
            Err(HandlerError::NotFound) => {
                req.params.clear();
                guarded((self.not_found)(req)).await
            }
            other => other,
        }
    }
}

/// Axum fallback handler that feeds everything into the pipeline.
pub async fn pipeline_entry(State(pipeline): State<RequestPipeline>, request: Request) -> Response {
    pipeline.handle(request).await
}

fn exceeded_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

async fn guarded(fut: HandlerFuture) -> HandlerResult<Reply> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::Panic(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_helpers() {
        let req = HandlerRequest::new(HttpMethod::Post, "/idx/_search")
            .with_query("size=3")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"query":{"match":"shoes"}}"#);
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.path_and_query(), "/idx/_search?size=3");

        let doc = req.document();
        assert_eq!(doc.as_value()["url"]["query"]["size"], "3");
        assert_eq!(doc.as_value()["body"]["query"]["match"], "shoes");

        let body: Value = req.json().unwrap();
        assert_eq!(body["query"]["match"], "shoes");
    }

    #[test]
    fn invalid_json_is_a_bad_request() {
        let req = HandlerRequest::new(HttpMethod::Post, "/rank").with_body("not json");
        let err = req.json::<Value>().unwrap_err();
        assert_eq!(err.kind(), "BadRequest");
    }

    #[test]
    fn panic_messages() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(payload.as_ref()), "kaboom");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[tokio::test]
    async fn plain_reply_keeps_bytes() {
        let response = Reply::plain("raw bytes").into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"raw bytes");
    }
}
