//! rolerag - Multi-Role Knowledge Retrieval
//!
//! Answers a question by consulting several independently-indexed "role"
//! knowledge bases in parallel and fusing their ranked results, while keeping
//! only a bounded number of role indexes resident in memory.
//!
//! # Architecture
//!
//! - **loader**: LRU-cached, single-flight index loading with smart preloading
//! - **retriever**: role detection, bounded parallel search, result fusion
//! - **providers**: traits for the external collaborators (detection,
//!   registry, index building, embedding)

pub mod cancel;
pub mod config;
pub mod errors;
pub mod loader;
pub mod providers;
pub mod retriever;
pub mod types;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::RetrievalConfig;
pub use errors::{RetrievalError, Result};
pub use loader::KnowledgeBaseLoader;
pub use retriever::{MultiRoleRetriever, ResultFusion};
