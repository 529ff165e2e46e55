//! External collaborator interfaces.
//!
//! The retrieval core consumes role detection, the role registry, index
//! construction, the indexes themselves, and question embedding through these
//! narrow traits. Implementations live outside this crate (NLP heuristics,
//! vector stores, embedding engines); seams return `anyhow::Result` and are
//! converted to typed errors at the loader boundary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{Role, RoleDetection, ScoredDoc};

/// Detects which roles a question belongs to.
#[async_trait]
pub trait RoleDetector: Send + Sync {
    /// Return all candidate roles with confidence scores for a question.
    async fn detect(&self, question: &str, user_id: &str) -> anyhow::Result<RoleDetection>;
}

/// Read-only view of the role registry.
#[async_trait]
pub trait RoleRegistry: Send + Sync {
    /// All roles currently enabled for retrieval.
    async fn get_enabled_roles(&self) -> Vec<Role>;

    /// Look up a single role by id.
    async fn get_role(&self, role_id: &str) -> Option<Role>;
}

/// Builds (or reopens) the vector index for a role.
#[async_trait]
pub trait IndexBuilder: Send + Sync {
    async fn get_or_create_index(&self, role: &Role) -> anyhow::Result<Arc<dyn RoleIndex>>;
}

/// A role's vector index.
///
/// The loader owns the load/unload lifecycle while a handle sits in the
/// cache: `load` is called exactly once on insertion and `unload` exactly
/// once on eviction, explicit removal, or shutdown.
#[async_trait]
pub trait RoleIndex: Send + Sync {
    /// Bring the index into memory.
    async fn load(&self) -> anyhow::Result<()>;

    /// Release the index's memory.
    async fn unload(&self) -> anyhow::Result<()>;

    /// Search the index, best match first.
    async fn search(&self, query_vector: &[f32], top_k: usize) -> anyhow::Result<Vec<ScoredDoc>>;
}

impl std::fmt::Debug for dyn RoleIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn RoleIndex")
    }
}

/// Embeds a question into the query vector used for per-role search.
#[async_trait]
pub trait EmbeddingEngine: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}
