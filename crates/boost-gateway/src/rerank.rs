//! Client side of the model server.

use async_trait::async_trait;
use boost_kernel::{RerankError, Reranker};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Body of `POST /rank`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankRequest {
    pub query: String,
    pub choices: Vec<String>,
}

/// Answer of `POST /rank`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankResponse {
    pub ranks: Vec<usize>,
}

/// [`Reranker`] that delegates to a model server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpReranker {
    base_url: String,
    client: Client,
}

impl HttpReranker {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn unavailable(&self, reason: impl ToString) -> RerankError {
        RerankError::Unavailable(self.base_url.clone(), reason.to_string())
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn score(&self, query: &str, cvalues: &[String]) -> Result<Vec<usize>, RerankError> {
        let url = format!("{}/rank", self.base_url);
        debug!(url = %url, candidates = cvalues.len(), "requesting ranking");

        let resp = self
            .client
            .post(&url)
            .json(&RankRequest {
                query: query.to_string(),
                choices: cvalues.to_vec(),
            })
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("status {status}: {body}")));
        }

        let ranking: RankResponse = resp
            .json()
            .await
            .map_err(|e| RerankError::InvalidRanking(e.to_string()))?;
        Ok(ranking.ranks)
    }
}
