//! Preload ranking: decides which role indexes are worth loading before
//! anyone asks for them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::PreloadConfig;
use crate::types::Role;

/// Scores roles by priority, usage frequency, and recency, with a forced
/// override set, and picks the top candidates for preloading.
pub struct PreloadStrategy {
    config: PreloadConfig,
    usage: RwLock<HashMap<String, Arc<RoleUsageStats>>>,
}

/// Per-role usage counters, updated atomically from concurrent callers.
#[derive(Debug, Default)]
struct RoleUsageStats {
    usage_count: AtomicU64,
    /// Millis since epoch of the last use; 0 = never used
    last_used_ms: AtomicU64,
}

/// Read-only view of one role's usage history.
#[derive(Debug, Clone)]
pub struct UsageSnapshot {
    pub usage_count: u64,
    pub last_used: Option<DateTime<Utc>>,
}

/// Score granted to roles in the forced-preload set; large enough to outrank
/// any weighted combination of the other signals.
const FORCE_PRELOAD_BONUS: f64 = 1000.0;

impl PreloadStrategy {
    pub fn new(config: PreloadConfig) -> Self {
        Self {
            config,
            usage: RwLock::new(HashMap::new()),
        }
    }

    /// Rank roles for preloading and return at most `max_preload_count`.
    ///
    /// Disabled roles never qualify. Ties keep the input order.
    pub fn decide_preload_roles(&self, all_roles: &[Role]) -> Vec<Role> {
        if all_roles.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(Role, f64)> = all_roles
            .iter()
            .filter(|role| role.enabled)
            .map(|role| {
                let score = self.calculate_score(role);
                debug!(role_id = %role.id, score, "preload score");
                (role.clone(), score)
            })
            .collect();

        if scored.is_empty() {
            return Vec::new();
        }

        // Stable sort: equal scores keep input order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.max_preload_count);

        scored.into_iter().map(|(role, _)| role).collect()
    }

    fn calculate_score(&self, role: &Role) -> f64 {
        let mut score = role.priority as f64 * self.config.priority_weight;

        let usage = self.usage.read().unwrap().get(&role.id).cloned();
        if let Some(stats) = usage {
            score += stats.usage_count.load(Ordering::Relaxed) as f64 * self.config.usage_weight;

            let last_used_ms = stats.last_used_ms.load(Ordering::Relaxed);
            if last_used_ms > 0 {
                let hours_since_use =
                    (Utc::now().timestamp_millis() - last_used_ms as i64) / (1000 * 60 * 60);
                let recency_score =
                    (self.config.max_recency_hours - hours_since_use).max(0) as f64;
                score += recency_score * self.config.recency_weight;
            }
        }

        if self.config.force_preload_roles.contains(&role.id) {
            score += FORCE_PRELOAD_BONUS;
        }

        score
    }

    /// Record one use of a role. Safe under concurrent callers.
    pub fn record_usage(&self, role_id: &str) {
        let stats = self.usage_entry(role_id);
        stats.usage_count.fetch_add(1, Ordering::Relaxed);
        stats
            .last_used_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Relaxed);
    }

    /// Usage history for a role, if it has ever been used.
    pub fn usage_stats(&self, role_id: &str) -> Option<UsageSnapshot> {
        let usage = self.usage.read().unwrap();
        usage.get(role_id).map(|stats| {
            let last_ms = stats.last_used_ms.load(Ordering::Relaxed);
            UsageSnapshot {
                usage_count: stats.usage_count.load(Ordering::Relaxed),
                last_used: if last_ms == 0 {
                    None
                } else {
                    DateTime::from_timestamp_millis(last_ms as i64)
                },
            }
        })
    }

    /// Drop all usage history.
    pub fn reset_stats(&self) {
        self.usage.write().unwrap().clear();
    }

    pub fn config(&self) -> &PreloadConfig {
        &self.config
    }

    fn usage_entry(&self, role_id: &str) -> Arc<RoleUsageStats> {
        if let Some(stats) = self.usage.read().unwrap().get(role_id) {
            return Arc::clone(stats);
        }
        let mut usage = self.usage.write().unwrap();
        Arc::clone(
            usage
                .entry(role_id.to_string())
                .or_insert_with(|| Arc::new(RoleUsageStats::default())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> PreloadStrategy {
        PreloadStrategy::new(PreloadConfig::default())
    }

    #[test]
    fn test_empty_input() {
        assert!(strategy().decide_preload_roles(&[]).is_empty());
    }

    #[test]
    fn test_disabled_roles_filtered() {
        let mut role = Role::new("dev", "Developer", 5);
        role.enabled = false;

        assert!(strategy().decide_preload_roles(&[role]).is_empty());
    }

    #[test]
    fn test_priority_ordering() {
        let roles = vec![Role::new("b", "B", 1), Role::new("a", "A", 5)];

        let selected = strategy().decide_preload_roles(&roles);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].id, "a");
        assert_eq!(selected[1].id, "b");
    }

    #[test]
    fn test_ties_keep_input_order() {
        let roles = vec![
            Role::new("first", "F", 3),
            Role::new("second", "S", 3),
            Role::new("third", "T", 3),
        ];

        let selected = strategy().decide_preload_roles(&roles);
        assert_eq!(selected[0].id, "first");
        assert_eq!(selected[1].id, "second");
        assert_eq!(selected[2].id, "third");
    }

    #[test]
    fn test_max_preload_count() {
        let roles: Vec<Role> = (0..10)
            .map(|i| Role::new(format!("r{}", i), format!("R{}", i), i))
            .collect();

        let selected = strategy().decide_preload_roles(&roles);
        assert_eq!(selected.len(), 3);
        // Highest priorities win
        assert_eq!(selected[0].id, "r9");
        assert_eq!(selected[1].id, "r8");
        assert_eq!(selected[2].id, "r7");
    }

    #[test]
    fn test_usage_boosts_score() {
        let strategy = strategy();
        let roles = vec![Role::new("a", "A", 2), Role::new("b", "B", 1)];

        // Heavy use of b outweighs a's priority edge:
        // a = 2*1.0, b = 1*1.0 + 2*2.0 + recency
        strategy.record_usage("b");
        strategy.record_usage("b");

        let selected = strategy.decide_preload_roles(&roles);
        assert_eq!(selected[0].id, "b");
    }

    #[test]
    fn test_forced_role_outranks_everything() {
        let mut config = PreloadConfig::default();
        config.max_preload_count = 2;
        config.force_preload_roles.insert("c".to_string());
        let strategy = PreloadStrategy::new(config);

        let roles = vec![
            Role::new("a", "A", 100),
            Role::new("b", "B", 50),
            Role::new("c", "C", 0),
        ];
        strategy.record_usage("a");

        let selected = strategy.decide_preload_roles(&roles);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].id, "c");
        assert_eq!(selected[1].id, "a");
    }

    #[test]
    fn test_usage_snapshot() {
        let strategy = strategy();
        assert!(strategy.usage_stats("dev").is_none());

        strategy.record_usage("dev");
        let snapshot = strategy.usage_stats("dev").unwrap();
        assert_eq!(snapshot.usage_count, 1);
        assert!(snapshot.last_used.is_some());
    }

    #[test]
    fn test_reset_stats() {
        let strategy = strategy();
        strategy.record_usage("dev");
        strategy.reset_stats();
        assert!(strategy.usage_stats("dev").is_none());
    }
}
