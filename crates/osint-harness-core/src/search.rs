//! Retrieval scoring: exact vector ranking, keyword relevance, and the
//! hybrid document-level merge.
//!
//! Everything here is pure. Stores feed candidates in, the manager feeds
//! scores in, and neither needs to know how the other ranks.
//!
//! # Exact ranking
//!
//! [`rank_exact`] is a full O(N) scan: every candidate carrying an
//! embedding (optionally restricted to one `source_type`) is scored with
//! [`cosine_similarity`] and the list is stable-sorted by similarity,
//! descending. Ties keep candidate order, which stores define as index
//! insertion order, so the earliest-inserted chunk wins a tie.
//!
//! # Hybrid merge
//!
//! 1. Semantic score per document = best chunk similarity.
//! 2. Text score per document = keyword score / 10, clamped to `[0, 1]`.
//! 3. `combined = semantic × w + text × (1 - w)`.
//! 4. Sort by combined score (desc), then document id (asc).

use serde::Serialize;

use crate::embedding::cosine_similarity;
use crate::models::DocumentContent;

/// One rankable vector.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub id: &'a str,
    pub source_type: &'a str,
    pub embedding: &'a [f32],
}

/// A ranked candidate id.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<'a> {
    pub id: &'a str,
    pub similarity: f32,
}

/// Rank `candidates` against `query` and keep the best `limit`.
pub fn rank_exact<'a, I>(
    query: &[f32],
    candidates: I,
    limit: usize,
    source_type: Option<&str>,
) -> Vec<Ranked<'a>>
where
    I: IntoIterator<Item = Candidate<'a>>,
{
    if limit == 0 {
        return Vec::new();
    }
    let mut ranked: Vec<Ranked<'a>> = candidates
        .into_iter()
        .filter(|c| source_type.map_or(true, |st| c.source_type == st))
        .map(|c| Ranked {
            id: c.id,
            similarity: cosine_similarity(query, c.embedding),
        })
        .collect();
    // sort_by is stable, so equal similarities keep insertion order.
    ranked.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    ranked.truncate(limit);
    ranked
}

/// Keyword relevance of `content` for `query`.
///
/// Each lower-cased query term adds 3.0 when it occurs in the title,
/// 2.0 in the description, and 1.0 for every other string field that
/// contains it.
pub fn keyword_score(content: &DocumentContent, query: &str) -> f64 {
    let query = query.to_lowercase();
    let terms: Vec<&str> = query.split_whitespace().collect();
    if terms.is_empty() {
        return 0.0;
    }

    let fields: Vec<(&str, String)> = content
        .string_fields()
        .into_iter()
        .map(|(name, value)| (name, value.to_lowercase()))
        .collect();

    let mut score = 0.0;
    for term in &terms {
        for (name, value) in &fields {
            if !value.contains(term) {
                continue;
            }
            score += match *name {
                "title" => 3.0,
                "description" => 2.0,
                _ => 1.0,
            };
        }
    }
    score
}

/// A document scored by the hybrid merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridScore {
    pub doc_id: String,
    pub semantic_score: f64,
    pub text_score: f64,
    pub combined_score: f64,
}

fn slot(merged: &mut Vec<HybridScore>, doc_id: &str) -> usize {
    match merged.iter().position(|h| h.doc_id == doc_id) {
        Some(i) => i,
        None => {
            merged.push(HybridScore {
                doc_id: doc_id.to_string(),
                semantic_score: 0.0,
                text_score: 0.0,
                combined_score: 0.0,
            });
            merged.len() - 1
        }
    }
}

/// Merge per-document semantic and keyword scores.
///
/// `semantic` holds `(doc_id, similarity)` pairs, possibly several per
/// document (one per chunk); the best one counts. `keyword` holds
/// `(doc_id, raw keyword score)` pairs.
pub fn merge_hybrid(
    semantic: &[(String, f32)],
    keyword: &[(String, f64)],
    semantic_weight: f64,
    limit: usize,
) -> Vec<HybridScore> {
    let w = semantic_weight.clamp(0.0, 1.0);
    let mut merged: Vec<HybridScore> = Vec::new();

    for (doc_id, sim) in semantic {
        let i = slot(&mut merged, doc_id);
        let sim = f64::from(*sim);
        if sim > merged[i].semantic_score {
            merged[i].semantic_score = sim;
        }
    }
    for (doc_id, raw) in keyword {
        let i = slot(&mut merged, doc_id);
        merged[i].text_score = (raw / 10.0).clamp(0.0, 1.0);
    }

    for h in &mut merged {
        h.combined_score = h.semantic_score * w + h.text_score * (1.0 - w);
    }
    merged.sort_by(|a, b| {
        b.combined_score
            .total_cmp(&a.combined_score)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
    merged.truncate(limit);
    merged
}
