//! Top-level retrieval: parallel multi-role search and result fusion.

pub mod fusion;
pub mod multi_role;

pub use fusion::{FusionStatistics, ResultFusion};
pub use multi_role::{DetectionStatistics, MultiRoleRetriever};
