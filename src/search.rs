//! Hybrid retrieval with Reciprocal Rank Fusion.
//!
//! A query runs a dense (embedding nearest-neighbor) search and a sparse
//! (BM25 lexical) search independently, both scoped to the requested
//! subject partition, then fuses the two rankings by rank position alone:
//!
//! ```text
//! fused(id) = Σ over lists containing id of 1 / (κ + rank_in_list)
//! ```
//!
//! Rank-based fusion needs no score-scale reconciliation between the two
//! methods' incompatible score distributions. Ties break toward the chunk
//! with the better individual rank, then by chunk id, so a fixed pair of
//! candidate lists always produces the same ordering.
//!
//! If one backend fails, the query degrades to single-method ranking and
//! flags the degradation; only both backends failing fails the query.

use anyhow::Result;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::embedding;
use crate::models::RankedResult;
use crate::store::sqlite::{SqliteCatalog, SqliteDenseIndex, SqliteSparseIndex};
use crate::store::{Catalog, DenseIndex, SparseIndex};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// RRF smoothing constant κ (commonly 60).
    pub rrf_k: u32,
    pub k_dense: usize,
    pub k_sparse: usize,
    pub top_k: usize,
}

impl From<&RetrievalConfig> for RetrievalParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            rrf_k: config.rrf_k,
            k_dense: config.candidate_k_dense,
            k_sparse: config.candidate_k_sparse,
            top_k: config.top_k,
        }
    }
}

/// Which side of the hybrid pair was unavailable for a degraded query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
    DenseUnavailable,
    SparseUnavailable,
}

impl std::fmt::Display for Degradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Degradation::DenseUnavailable => write!(f, "dense search unavailable"),
            Degradation::SparseUnavailable => write!(f, "sparse search unavailable"),
        }
    }
}

/// A fused, ordered result set plus the degradation flag.
#[derive(Debug)]
pub struct SearchOutcome {
    pub results: Vec<RankedResult>,
    pub degraded: Option<Degradation>,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("both search backends failed (dense: {dense}; sparse: {sparse})")]
    AllBackendsFailed { dense: String, sparse: String },
}

/// Fuse two ranked id lists with Reciprocal Rank Fusion.
///
/// Ranks are 1-based; an id absent from a list contributes 0 for that
/// list. Output is ordered by fused score descending, then by the better
/// (lower) individual rank, then by chunk id.
pub fn rrf_fuse(dense_ids: &[String], sparse_ids: &[String], rrf_k: u32) -> Vec<RankedResult> {
    let kappa = rrf_k as f64;
    let mut by_id: HashMap<&str, RankedResult> = HashMap::new();

    for (i, id) in dense_ids.iter().enumerate() {
        let entry = by_id.entry(id.as_str()).or_insert_with(|| RankedResult {
            chunk_id: id.clone(),
            dense_rank: None,
            sparse_rank: None,
            score: 0.0,
        });
        entry.dense_rank = Some(i + 1);
        entry.score += 1.0 / (kappa + (i + 1) as f64);
    }

    for (i, id) in sparse_ids.iter().enumerate() {
        let entry = by_id.entry(id.as_str()).or_insert_with(|| RankedResult {
            chunk_id: id.clone(),
            dense_rank: None,
            sparse_rank: None,
            score: 0.0,
        });
        entry.sparse_rank = Some(i + 1);
        entry.score += 1.0 / (kappa + (i + 1) as f64);
    }

    let mut fused: Vec<RankedResult> = by_id.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.min_rank().cmp(&b.min_rank()))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    fused
}

/// Runs both searches against a subject partition and fuses the rankings.
pub struct HybridRetriever<'a> {
    dense: &'a dyn DenseIndex,
    sparse: &'a dyn SparseIndex,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(dense: &'a dyn DenseIndex, sparse: &'a dyn SparseIndex) -> Self {
        Self { dense, sparse }
    }

    /// Run a hybrid query.
    ///
    /// `query_vec` is the pre-computed query embedding; `None` means the
    /// dense side is unavailable (embeddings disabled or the embedding
    /// call failed) and the query degrades to sparse-only ranking.
    pub async fn query(
        &self,
        text: &str,
        query_vec: Option<&[f32]>,
        subject: &str,
        params: &RetrievalParams,
    ) -> Result<SearchOutcome, SearchError> {
        if text.trim().is_empty() {
            return Ok(SearchOutcome {
                results: Vec::new(),
                degraded: None,
            });
        }

        let dense_result: Result<Vec<String>, String> = match query_vec {
            Some(vec) => self
                .dense
                .query(vec, subject, params.k_dense)
                .await
                .map(|hits| hits.into_iter().map(|h| h.chunk_id).collect())
                .map_err(|e| e.to_string()),
            None => Err("no query embedding available".to_string()),
        };

        let sparse_result: Result<Vec<String>, String> = self
            .sparse
            .query(text, subject, params.k_sparse)
            .await
            .map(|hits| hits.into_iter().map(|h| h.chunk_id).collect())
            .map_err(|e| e.to_string());

        let (dense_ids, sparse_ids, degraded) = match (dense_result, sparse_result) {
            (Ok(d), Ok(s)) => (d, s, None),
            (Ok(d), Err(e)) => {
                warn!(subject, error = %e, "sparse search failed, degrading to dense-only");
                (d, Vec::new(), Some(Degradation::SparseUnavailable))
            }
            (Err(e), Ok(s)) => {
                warn!(subject, error = %e, "dense search unavailable, degrading to sparse-only");
                (Vec::new(), s, Some(Degradation::DenseUnavailable))
            }
            (Err(dense), Err(sparse)) => {
                return Err(SearchError::AllBackendsFailed { dense, sparse });
            }
        };

        let mut results = rrf_fuse(&dense_ids, &sparse_ids, params.rrf_k);
        results.truncate(params.top_k);

        Ok(SearchOutcome { results, degraded })
    }
}

/// Run the search command: query the database and print ranked chunks.
pub async fn run_search(
    config: &Config,
    query: &str,
    subject: &str,
    top_k: Option<usize>,
    mode: &str,
) -> Result<()> {
    match mode {
        "hybrid" | "dense" | "sparse" => {}
        _ => anyhow::bail!("Unknown search mode: {}. Use hybrid, dense, or sparse.", mode),
    }

    if !config.subjects.iter().any(|s| s == subject) {
        anyhow::bail!(
            "Unknown subject: '{}'. Configured subjects: {}",
            subject,
            config.subjects.join(", ")
        );
    }

    if mode == "dense" && !config.embedding.is_enabled() {
        anyhow::bail!("Mode 'dense' requires embeddings. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let catalog = SqliteCatalog::new(pool.clone());
    let dense = SqliteDenseIndex::new(pool.clone());
    let sparse = SqliteSparseIndex::new(pool.clone());

    let mut params = RetrievalParams::from(&config.retrieval);
    if let Some(k) = top_k {
        params.top_k = k;
    }
    match mode {
        "dense" => params.k_sparse = 0,
        "sparse" => params.k_dense = 0,
        _ => {}
    }

    // Embed the query when the dense side is in play; an embedding failure
    // degrades rather than failing the query.
    let query_vec: Option<Vec<f32>> = if mode != "sparse" && config.embedding.is_enabled() {
        let provider = embedding::create_provider(&config.embedding)?;
        match embedding::embed_query(provider.as_ref(), &config.embedding, query).await {
            Ok(vec) => Some(vec),
            Err(e) => {
                warn!(error = %e, "query embedding failed");
                None
            }
        }
    } else {
        None
    };

    // Sparse-only mode reports no degradation for the deliberately
    // skipped dense side.
    let outcome = if mode == "sparse" {
        let hits = sparse.query(query, subject, params.k_sparse).await?;
        let ids: Vec<String> = hits.into_iter().map(|h| h.chunk_id).collect();
        let mut results = rrf_fuse(&[], &ids, params.rrf_k);
        results.truncate(params.top_k);
        SearchOutcome {
            results,
            degraded: None,
        }
    } else {
        let retriever = HybridRetriever::new(&dense, &sparse);
        retriever
            .query(query, query_vec.as_deref(), subject, &params)
            .await?
    };

    if let Some(degradation) = outcome.degraded {
        if mode == "hybrid" {
            eprintln!("warning: {} — single-method ranking", degradation);
        }
    }

    if outcome.results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    let ids: Vec<String> = outcome.results.iter().map(|r| r.chunk_id.clone()).collect();
    let chunks = catalog.get_chunks(&ids).await?;
    let chunk_map: HashMap<&str, &crate::models::Chunk> =
        chunks.iter().map(|c| (c.id.as_str(), c)).collect();

    for (i, result) in outcome.results.iter().enumerate() {
        let chunk = match chunk_map.get(result.chunk_id.as_str()) {
            Some(c) => c,
            None => continue,
        };
        let ranks = match (result.dense_rank, result.sparse_rank) {
            (Some(d), Some(s)) => format!("dense #{}, sparse #{}", d, s),
            (Some(d), None) => format!("dense #{}", d),
            (None, Some(s)) => format!("sparse #{}", s),
            (None, None) => String::new(),
        };
        let excerpt: String = chunk.text.chars().take(240).collect();

        println!(
            "{}. [{:.4}] {} / {}",
            i + 1,
            result.score,
            chunk.subject,
            chunk.citation()
        );
        println!("    ranks: {}", ranks);
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " "));
        println!("    id: {}", chunk.id);
        println!();
    }

    pool.close().await;
    Ok(())
}
