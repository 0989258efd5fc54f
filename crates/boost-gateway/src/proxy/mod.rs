//! The boosting proxy.
//!
//! Every request that does not hit one of the proxy's own routes is
//! forwarded to the search backend. When a [`BackendAdapterConfig`] captures
//! the path, the exchange is boosted:
//!
//! 1. `query`, `topk` and `true_cids` are read from the request;
//! 2. the request asks upstream for `topk * multiplier` candidates, without
//!    the `true_cids` field and without `accept-encoding`;
//! 3. `cvalues`, `cids` and `choices` are read from a successful JSON
//!    response;
//! 4. the reranker orders the candidates and the best `topk` choices are
//!    written back in that order.
//!
//! Exchanges that cannot be boosted follow the configured
//! [`UnboostablePolicy`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check. |
//! | `GET`  | `/nboost/status` | Configuration and running stats. |
//! | `ANY`  | anything else | Proxied to the search backend. |

mod stats;

pub use stats::{ProxyStats, StatsSnapshot};

use crate::backend::{UpstreamBackend, UpstreamRequest, UpstreamResponse};
use crate::error::{HandlerError, HandlerResult};
use crate::pipeline::{DEFAULT_MAX_BODY_BYTES, HandlerRequest, Reply};
use crate::rerank::HttpReranker;
use crate::router::RouteTable;
use crate::server::{GatewayService, base_routes};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::StatusCode;
use boost_kernel::adapter::{ResponseDocument, TopkSource};
use boost_kernel::config::{BoostConfig, UnboostablePolicy};
use boost_kernel::rerank::validate_ranking;
use boost_kernel::{BackendAdapterConfig, BackendAdapterRegistry, HttpMethod, NotBoostable, Reranker};
use eyre::WrapErr;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Service that proxies and boosts search traffic.
#[derive(Serialize)]
pub struct BoostProxy {
    upstream: String,
    reranker_name: String,
    multiplier: usize,
    unboostable: UnboostablePolicy,
    max_body_bytes: usize,
    #[serde(skip)]
    adapters: Arc<BackendAdapterRegistry>,
    #[serde(skip)]
    backend: UpstreamBackend,
    #[serde(skip)]
    reranker: Arc<dyn Reranker>,
    #[serde(skip)]
    stats: ProxyStats,
}

impl BoostProxy {
    /// Proxy with a multiplier of 5 and the pass-through policy.
    pub fn new(backend: UpstreamBackend, reranker: Arc<dyn Reranker>, adapters: BackendAdapterRegistry) -> Self {
        Self {
            upstream: backend.base_url().to_string(),
            reranker_name: reranker.name().to_string(),
            multiplier: 5,
            unboostable: UnboostablePolicy::PassThrough,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            adapters: Arc::new(adapters),
            backend,
            reranker,
            stats: ProxyStats::new(),
        }
    }

    /// Proxy wired to the configured upstream and model server.
    pub fn from_config(config: &BoostConfig) -> eyre::Result<Self> {
        config.validate()?;
        let timeout = Duration::from_millis(config.upstream_timeout_ms);
        let backend = UpstreamBackend::new(config.upstream_url(), timeout)
            .wrap_err("failed to build upstream client")?;
        let reranker = HttpReranker::new(config.model_url(), timeout)
            .wrap_err("failed to build model server client")?;
        Ok(Self::new(backend, Arc::new(reranker), config.adapter_registry()?)
            .with_multiplier(config.multiplier)
            .with_policy(config.unboostable)
            .with_max_body_bytes(config.max_body_bytes))
    }

    pub fn with_multiplier(mut self, multiplier: usize) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    pub fn with_policy(mut self, policy: UnboostablePolicy) -> Self {
        self.unboostable = policy;
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    async fn status(self: Arc<Self>, _req: HandlerRequest) -> HandlerResult<Reply> {
        Ok(Reply::json(json!({
            "service": self.name(),
            "upstream": self.upstream,
            "reranker": self.reranker_name,
            "multiplier": self.multiplier,
            "unboostable": self.unboostable,
            "adapters": self.adapters.names().collect::<Vec<_>>(),
            "stats": self.stats.snapshot(),
        })))
    }

    /// Forward `req`, boosting it when an adapter captures its path.
    async fn proxy(&self, req: HandlerRequest) -> HandlerResult<Reply> {
        let Some((adapter_name, adapter)) = self.adapters.resolve_for_request(&req.path) else {
            let resp = self.forward(verbatim(&req)).await?;
            self.stats.record_pass_through();
            return Ok(relay(resp));
        };

        let mut doc = req.document();
        if doc.body().is_none() && !req.body.is_empty() {
            debug!(request_id = %req.id, adapter = adapter_name, "request body is not JSON");
            let resp = self.forward(verbatim(&req)).await?;
            self.stats.record_pass_through();
            return Ok(relay(resp));
        }

        let fields = match adapter.extract_request(&doc) {
            Ok(fields) => fields,
            Err(reason) => {
                self.refuse(&req, adapter_name, reason)?;
                return Ok(relay(self.forward(verbatim(&req)).await?));
            }
        };

        // The search backend does not understand the ground-truth field.
        if let Some(true_cids_path) = &adapter.true_cids_path {
            true_cids_path.remove(doc.as_value_mut());
        }

        let candidates = fields.topk.saturating_mul(self.multiplier);
        let written = match fields.topk_source {
            TopkSource::Path(index) => adapter
                .topk_path
                .set_alternative(index, doc.as_value_mut(), json!(candidates)),
            TopkSource::Default => adapter.topk_path.set(doc.as_value_mut(), json!(candidates)),
        };
        if !written {
            warn!(request_id = %req.id, adapter = adapter_name, "could not rewrite topk");
        }
        info!(
            request_id  = %req.id,
            adapter     = adapter_name,
            query       = %fields.query,
            topk        = fields.topk,
            candidates  = candidates,
            "boosting request"
        );

        let body = match doc.body() {
            Some(body) => Bytes::from(
                serde_json::to_vec(body).map_err(|e| HandlerError::Internal(e.to_string()))?,
            ),
            None => req.body.clone(),
        };
        let resp = self
            .forward(UpstreamRequest {
                method: req.method,
                path_and_query: doc.path_and_query(),
                headers: boosted_headers(&req.headers),
                body,
            })
            .await?;

        if !resp.is_success() {
            debug!(request_id = %req.id, status = resp.status, "upstream did not succeed; relaying");
            self.stats.record_pass_through();
            return Ok(relay(resp));
        }

        let mut resp_doc = ResponseDocument::from_raw(
            resp.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            &resp.body,
        );
        let response = match adapter.extract_response(&resp_doc) {
            Ok(response) => response,
            Err(reason) => {
                self.refuse(&req, adapter_name, reason)?;
                return Ok(relay(resp));
            }
        };

        let started = Instant::now();
        let ranks = self.reranker.score(&fields.query, &response.cvalues).await?;
        validate_ranking(&ranks, response.choices.len())?;
        let rerank_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let reordered: Vec<Value> = ranks
            .iter()
            .take(fields.topk)
            .map(|&i| response.choices[i].clone())
            .collect();
        if !adapter
            .choices_path
            .set(resp_doc.as_value_mut(), Value::Array(reordered))
        {
            warn!(request_id = %req.id, adapter = adapter_name, "could not write reranked choices; relaying");
            self.stats.record_pass_through();
            return Ok(relay(resp));
        }

        if let Some(true_cids) = fields.true_cids.as_deref().filter(|t| !t.is_empty()) {
            let reranked: Vec<&Value> = ranks.iter().map(|&i| &response.cids[i]).collect();
            let rr = reciprocal_rank(&reranked, true_cids);
            self.stats.record_reciprocal_rank(rr);
            debug!(request_id = %req.id, reciprocal_rank = rr, "evaluated ranking");
        }
        self.stats.record_boost(rerank_ms);

        let body = serde_json::to_vec(resp_doc.body().unwrap_or(&Value::Null))
            .map_err(|e| HandlerError::Internal(e.to_string()))?;
        Ok(Reply::raw(status_code(resp.status), resp.relay_headers(), body))
    }

    async fn forward(&self, req: UpstreamRequest) -> HandlerResult<UpstreamResponse> {
        let resp = self.backend.forward(&req).await?;
        self.stats.record_upstream(resp.latency_ms);
        Ok(resp)
    }

    /// Apply the unboostable policy. `Ok` means: relay without boosting.
    fn refuse(&self, req: &HandlerRequest, adapter: &str, reason: NotBoostable) -> HandlerResult<()> {
        match self.unboostable {
            UnboostablePolicy::Reject => {
                info!(request_id = %req.id, adapter = adapter, reason = %reason, "rejecting unboostable request");
                self.stats.record_rejected();
                Err(reason.into())
            }
            UnboostablePolicy::PassThrough => {
                debug!(request_id = %req.id, adapter = adapter, reason = %reason, "passing through unboostable request");
                self.stats.record_pass_through();
                Ok(())
            }
        }
    }
}

#[async_trait]
impl GatewayService for BoostProxy {
    fn name(&self) -> &str {
        "boost-proxy"
    }

    fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    fn routes() -> RouteTable<Self> {
        let mut table: RouteTable<Self> = base_routes();
        table
            .add_route(HttpMethod::Get, "/nboost/status")
            .to(|svc, req| svc.status(req).boxed());
        table
    }

    async fn not_found(&self, req: HandlerRequest) -> HandlerResult<Reply> {
        self.proxy(req).await
    }
}

fn verbatim(req: &HandlerRequest) -> UpstreamRequest {
    UpstreamRequest {
        method: req.method,
        path_and_query: req.path_and_query(),
        headers: req.headers.clone(),
        body: req.body.clone(),
    }
}

/// Headers for a request whose response will be parsed. The response body
/// must come back as plain JSON, so `accept-encoding` is not forwarded.
fn boosted_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("accept-encoding"))
        .cloned()
        .collect()
}

fn relay(resp: UpstreamResponse) -> Reply {
    let headers = resp.relay_headers();
    Reply::raw(status_code(resp.status), headers, resp.body)
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// `1 / position` of the first reranked id found in `true_cids`, or 0.
fn reciprocal_rank(reranked: &[&Value], true_cids: &[Value]) -> f64 {
    reranked
        .iter()
        .position(|cid| true_cids.contains(cid))
        .map(|pos| 1.0 / (pos + 1) as f64)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reciprocal_rank_of_first_hit() {
        let a = json!("a");
        let b = json!("b");
        let c = json!("c");
        assert_eq!(reciprocal_rank(&[&a, &b, &c], &[json!("b")]), 0.5);
        assert_eq!(reciprocal_rank(&[&a, &b, &c], &[json!("c"), json!("a")]), 1.0);
        assert_eq!(reciprocal_rank(&[&a], &[json!("z")]), 0.0);
    }

    #[test]
    fn boosted_requests_do_not_ask_for_compression() {
        let headers = vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("Accept-Encoding".to_string(), "gzip, deflate".to_string()),
        ];
        assert_eq!(
            boosted_headers(&headers),
            vec![("content-type".to_string(), "application/json".to_string())]
        );
    }

    #[test]
    fn multiplier_is_at_least_one() {
        let backend = UpstreamBackend::new("http://127.0.0.1:9200", Duration::from_secs(1)).unwrap();
        let proxy = BoostProxy::new(
            backend,
            Arc::new(boost_kernel::rerank::ShuffleReranker::new()),
            BackendAdapterRegistry::builtin(),
        )
        .with_multiplier(0);
        assert_eq!(proxy.multiplier, 1);
    }
}
