//! Core data types shared across the retrieval pipeline.

pub mod document;
pub mod role;

pub use document::{Document, FusedDocument, RoleScore, RoleSearchResult, ScoredDoc};
pub use role::{Role, RoleDetection, RoleMatch};
