//! Latency run over a fixed query set.

use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::query::QueryPipeline;

/// Per-query latency budget for interactive use.
pub const LATENCY_TARGET_MS: u64 = 2000;

/// Queries used when no query file is given.
pub const DEFAULT_QUERIES: &[&str] = &[
    "有人的圖片",
    "有車輛的圖片",
    "室外場景",
    "室內環境",
    "白天的照片",
    "夜晚拍攝的照片",
    "門或入口",
    "建築物",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTiming {
    pub query: String,
    pub elapsed_ms: u64,
    pub result_count: usize,
    pub max_score: Option<f32>,
    pub min_score: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EvalSummary {
    pub queries: usize,
    pub total_ms: u64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    /// Queries slower than [`LATENCY_TARGET_MS`].
    pub over_target: usize,
}

impl EvalSummary {
    /// All zeros for an empty slice.
    pub fn from_timings(timings: &[QueryTiming]) -> Self {
        if timings.is_empty() {
            return Self::default();
        }
        let total_ms: u64 = timings.iter().map(|t| t.elapsed_ms).sum();
        Self {
            queries: timings.len(),
            total_ms,
            avg_ms: total_ms as f64 / timings.len() as f64,
            min_ms: timings.iter().map(|t| t.elapsed_ms).min().unwrap_or(0),
            max_ms: timings.iter().map(|t| t.elapsed_ms).max().unwrap_or(0),
            over_target: timings.iter().filter(|t| t.elapsed_ms > LATENCY_TARGET_MS).count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalReport {
    pub top_k: usize,
    pub timings: Vec<QueryTiming>,
    pub summary: EvalSummary,
}

/// Run every query in order and collect timing and score spread.
pub fn run_eval<S: AsRef<str>>(pipeline: &QueryPipeline, queries: &[S], top_k: usize) -> Result<EvalReport> {
    let mut timings = Vec::with_capacity(queries.len());
    for q in queries {
        let resp = pipeline.query(q.as_ref(), top_k)?;
        let scores = resp.results.iter().map(|h| h.score);
        timings.push(QueryTiming {
            query: resp.query.clone(),
            elapsed_ms: resp.elapsed_ms,
            result_count: resp.results.len(),
            max_score: scores.clone().reduce(f32::max),
            min_score: scores.reduce(f32::min),
        });
    }
    let summary = EvalSummary::from_timings(&timings);
    info!(
        queries = summary.queries,
        total_ms = summary.total_ms,
        max_ms = summary.max_ms,
        over_target = summary.over_target,
        "evaluation run complete"
    );
    Ok(EvalReport { top_k, timings, summary })
}

/// One query per line; blank lines and `#` comments are skipped.
pub fn read_query_file(path: &Path) -> Result<Vec<String>> {
    let body = std::fs::read_to_string(path)?;
    Ok(body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}
