//! Knowledge base loading: LRU cache, load statistics, preload ranking, and
//! the loader that ties them together.

pub mod cache;
pub mod kb;
pub mod preload;
pub mod stats;

pub use cache::{CacheStatistics, LruCache, PutOutcome};
pub use kb::KnowledgeBaseLoader;
pub use preload::PreloadStrategy;
pub use stats::{LoadingStats, RoleLoadReport, StatsReport};
