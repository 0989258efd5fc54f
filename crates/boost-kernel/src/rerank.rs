//! Reranking and artifact collaborator contracts.
//!
//! The scoring itself is not part of the gateway. It is consumed through
//! [`Reranker`], which orders candidate texts against a query, and model
//! weights come from an [`ArtifactFetcher`] at model-server startup.

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// Reranking failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RerankError {
    /// The scoring backend could not be reached or refused the request.
    #[error("reranker '{0}' is unavailable: {1}")]
    Unavailable(String, String),

    /// The scoring backend answered with an ordering that is not usable.
    #[error("reranker returned an invalid ranking: {0}")]
    InvalidRanking(String),
}

/// Orders candidate texts by relevance to a query.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &str;

    /// Return candidate indices, most relevant first.
    ///
    /// The result may be shorter than `cvalues` but every index must be in
    /// range and appear at most once (see [`validate_ranking`]).
    async fn score(&self, query: &str, cvalues: &[String]) -> Result<Vec<usize>, RerankError>;
}

/// Check that `ranks` is a duplicate-free selection of `0..len`.
pub fn validate_ranking(ranks: &[usize], len: usize) -> Result<(), RerankError> {
    let mut seen = HashSet::with_capacity(ranks.len());
    for &rank in ranks {
        if rank >= len {
            return Err(RerankError::InvalidRanking(format!(
                "index {rank} out of range for {len} candidates"
            )));
        }
        if !seen.insert(rank) {
            return Err(RerankError::InvalidRanking(format!("index {rank} repeated")));
        }
    }
    Ok(())
}

/// Random ordering; the `ShuffleModel` implementation.
///
/// Useful as a baseline and for exercising the proxy without model weights.
#[derive(Debug, Clone, Default)]
pub struct ShuffleReranker {
    seed: Option<u64>,
}

impl ShuffleReranker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic shuffling: every call with the same length yields the
    /// same order.
    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }

    fn order(&self, len: usize) -> Vec<usize> {
        let mut ranks: Vec<usize> = (0..len).collect();
        match self.seed {
            Some(seed) => ranks.shuffle(&mut StdRng::seed_from_u64(seed)),
            None => ranks.shuffle(&mut rand::thread_rng()),
        }
        ranks
    }
}

#[async_trait]
impl Reranker for ShuffleReranker {
    fn name(&self) -> &str {
        "shuffle"
    }

    async fn score(&self, _query: &str, cvalues: &[String]) -> Result<Vec<usize>, RerankError> {
        Ok(self.order(cvalues.len()))
    }
}

/// Artifact download failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArtifactError {
    #[error("failed to download '{url}': {reason}")]
    Download { url: String, reason: String },

    #[error("artifact url '{0}' has no usable file name")]
    InvalidUrl(String),

    #[error("artifact storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns an artifact URL into a local path holding the model weights.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<PathBuf, ArtifactError>;
}
