//! Role identity and detection types.

use serde::{Deserialize, Serialize};

/// A named knowledge domain with its own index.
///
/// Roles are owned by the external role registry; this crate only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// Stable role identifier, used as the cache key
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Preload priority (higher loads earlier)
    pub priority: i32,
    /// Disabled roles are never preloaded
    pub enabled: bool,
}

impl Role {
    pub fn new(id: impl Into<String>, name: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority,
            enabled: true,
        }
    }
}

/// One role candidate produced by role detection for a single query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleMatch {
    pub role_id: String,
    /// Detection confidence in [0, 1]
    pub confidence: f64,
}

impl RoleMatch {
    pub fn new(role_id: impl Into<String>, confidence: f64) -> Self {
        Self {
            role_id: role_id.into(),
            confidence,
        }
    }
}

/// Full output of the external role detector for one question.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleDetection {
    pub candidates: Vec<RoleMatch>,
}

impl RoleDetection {
    pub fn new(candidates: Vec<RoleMatch>) -> Self {
        Self { candidates }
    }
}
