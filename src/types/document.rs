//! Document types flowing through search and fusion.

use serde::{Deserialize, Serialize};

/// A retrievable document.
///
/// The id must be non-empty and globally unique across roles; fusion merges
/// contributions by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    /// Fused relevance score, set when the document is returned to the caller
    pub score: f64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score: 0.0,
            metadata: serde_json::Map::new(),
        }
    }
}

/// A document with the score assigned by a single role index.
///
/// Vec position is the index's own ranking: index 0 = best match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDoc {
    pub document: Document,
    pub score: f64,
}

impl ScoredDoc {
    pub fn new(document: Document, score: f64) -> Self {
        Self { document, score }
    }
}

/// Search outcome of one role for one query; discarded after fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSearchResult {
    pub role_id: String,
    pub role_name: String,
    /// Detection confidence, used as the role's fusion weight
    pub role_weight: f64,
    pub documents: Vec<ScoredDoc>,
    pub search_time_ms: u64,
}

impl RoleSearchResult {
    /// An empty result for a role whose search failed or was cancelled.
    pub fn empty(role_id: impl Into<String>, role_weight: f64) -> Self {
        let role_id = role_id.into();
        Self {
            role_name: role_id.clone(),
            role_id,
            role_weight,
            documents: Vec::new(),
            search_time_ms: 0,
        }
    }

    pub fn has_results(&self) -> bool {
        !self.documents.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }
}

/// One role's contribution to a fused document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleScore {
    pub role_id: String,
    pub score: f64,
}

/// A document merged across roles during one fusion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedDocument {
    pub document: Document,
    pub total_score: f64,
    /// Distinct roles that returned this document
    pub source_roles: Vec<String>,
    /// Every per-role contribution, in encounter order
    pub role_scores: Vec<RoleScore>,
}

impl FusedDocument {
    pub fn new(document: Document, score: f64, role_id: impl Into<String>) -> Self {
        let role_id = role_id.into();
        Self {
            document,
            total_score: score,
            source_roles: vec![role_id.clone()],
            role_scores: vec![RoleScore { role_id, score }],
        }
    }

    /// Accumulate another role's contribution to this document.
    pub fn add_role_score(&mut self, score: f64, role_id: &str) {
        self.total_score += score;
        self.role_scores.push(RoleScore {
            role_id: role_id.to_string(),
            score,
        });
        if !self.source_roles.iter().any(|r| r == role_id) {
            self.source_roles.push(role_id.to_string());
        }
    }

    pub fn is_from_multiple_roles(&self) -> bool {
        self.source_roles.len() > 1
    }

    pub fn source_role_count(&self) -> usize {
        self.source_roles.len()
    }
}
