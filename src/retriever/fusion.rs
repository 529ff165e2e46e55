//! Fuses ranked per-role result lists into one globally ranked list.
//!
//! Fusion strategy:
//! 1. Weighted sum of scores for the same document across roles
//! 2. Role weights from detection confidence
//! 3. Exponential position decay within each role's ranking
//! 4. Consensus bonus for documents corroborated by multiple roles

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::FusionConfig;
use crate::types::{Document, FusedDocument, RoleSearchResult};

/// Merges multiple roles' search results.
pub struct ResultFusion {
    config: FusionConfig,
}

/// Overlap statistics across one set of role results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FusionStatistics {
    pub role_count: usize,
    pub total_documents: usize,
    pub unique_documents: usize,
    pub overlap_documents: usize,
}

impl FusionStatistics {
    pub fn overlap_rate(&self) -> f64 {
        if self.unique_documents == 0 {
            0.0
        } else {
            self.overlap_documents as f64 / self.unique_documents as f64
        }
    }
}

impl ResultFusion {
    pub fn new() -> Self {
        Self {
            config: FusionConfig::default(),
        }
    }

    pub fn with_config(config: FusionConfig) -> Self {
        Self { config }
    }

    /// Fuse per-role results into the top `top_k` documents.
    ///
    /// Each returned document carries its fused score. Ties keep encounter
    /// order, so fusion is deterministic for a fixed role order.
    pub fn fuse_results(&self, results: &[RoleSearchResult], top_k: usize) -> Vec<Document> {
        if results.is_empty() {
            warn!("fusion called with no role results");
            return Vec::new();
        }

        let fused = self.accumulate(results);
        debug!(
            roles = results.len(),
            unique_documents = fused.len(),
            top_k,
            "fused role results"
        );

        fused
            .into_iter()
            .take(top_k)
            .map(|fused_doc| {
                let mut doc = fused_doc.document;
                doc.score = fused_doc.total_score;
                doc
            })
            .collect()
    }

    /// Fuse and keep the per-role breakdown of each document's score.
    pub fn fuse_with_details(
        &self,
        results: &[RoleSearchResult],
        top_k: usize,
    ) -> Vec<FusedDocument> {
        if results.is_empty() {
            return Vec::new();
        }

        let mut fused = self.accumulate(results);
        fused.truncate(top_k);
        fused
    }

    /// Count how much the roles' result sets overlap.
    pub fn calculate_statistics(&self, results: &[RoleSearchResult]) -> FusionStatistics {
        let mut stats = FusionStatistics {
            role_count: results.len(),
            ..FusionStatistics::default()
        };

        let mut doc_frequency: HashMap<&str, usize> = HashMap::new();
        for result in results {
            stats.total_documents += result.document_count();
            for scored in &result.documents {
                if !scored.document.id.is_empty() {
                    *doc_frequency.entry(scored.document.id.as_str()).or_insert(0) += 1;
                }
            }
        }

        stats.unique_documents = doc_frequency.len();
        stats.overlap_documents = doc_frequency.values().filter(|&&count| count > 1).count();
        stats
    }

    /// Accumulate contributions by document id in encounter order, apply the
    /// multi-role bonus, and sort descending by total score (stable).
    fn accumulate(&self, results: &[RoleSearchResult]) -> Vec<FusedDocument> {
        let mut fused: Vec<FusedDocument> = Vec::new();
        let mut slot_by_id: HashMap<String, usize> = HashMap::new();

        for result in results {
            if !result.has_results() {
                continue;
            }

            for (rank, scored) in result.documents.iter().enumerate() {
                let doc_id = &scored.document.id;
                if doc_id.is_empty() {
                    warn!(role_id = %result.role_id, rank, "skipping document without id");
                    continue;
                }

                let position_weight = self.config.position_decay.powi(rank as i32);
                let contribution = result.role_weight * scored.score * position_weight;

                match slot_by_id.get(doc_id) {
                    Some(&slot) => fused[slot].add_role_score(contribution, &result.role_id),
                    None => {
                        slot_by_id.insert(doc_id.clone(), fused.len());
                        fused.push(FusedDocument::new(
                            scored.document.clone(),
                            contribution,
                            &result.role_id,
                        ));
                    }
                }
            }
        }

        // Consensus bonus on the accumulated score
        for fused_doc in &mut fused {
            if fused_doc.is_from_multiple_roles() {
                let bonus =
                    (fused_doc.source_role_count() - 1) as f64 * self.config.multi_role_bonus;
                fused_doc.total_score *= 1.0 + bonus;
            }
        }

        fused.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        fused
    }
}

impl Default for ResultFusion {
    fn default() -> Self {
        Self::new()
    }
}
