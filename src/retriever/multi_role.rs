//! Multi-role retriever.
//!
//! Workflow: detect candidate roles for a question, keep the most confident
//! few, search each role's knowledge base in parallel, and fuse the ranked
//! lists. Every failure degrades; `retrieve` never errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::config::RetrieverConfig;
use crate::errors::{Result, RetrievalError};
use crate::loader::KnowledgeBaseLoader;
use crate::providers::{EmbeddingEngine, RoleDetector, RoleRegistry};
use crate::retriever::fusion::ResultFusion;
use crate::types::{Document, RoleDetection, RoleMatch, RoleSearchResult};

/// Orchestrates detection, bounded parallel per-role search, and fusion.
pub struct MultiRoleRetriever {
    detector: Arc<dyn RoleDetector>,
    registry: Arc<dyn RoleRegistry>,
    loader: Arc<KnowledgeBaseLoader>,
    embedder: Arc<dyn EmbeddingEngine>,
    fusion: ResultFusion,
    config: RetrieverConfig,
    /// Bounds the per-query search fan-out
    search_permits: Arc<Semaphore>,
}

/// Per-question detection summary for observability endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionStatistics {
    pub role_count: usize,
    pub role_weights: HashMap<String, f64>,
}

impl MultiRoleRetriever {
    pub fn new(
        detector: Arc<dyn RoleDetector>,
        registry: Arc<dyn RoleRegistry>,
        loader: Arc<KnowledgeBaseLoader>,
        embedder: Arc<dyn EmbeddingEngine>,
    ) -> Self {
        Self::with_config(
            detector,
            registry,
            loader,
            embedder,
            RetrieverConfig::default(),
            ResultFusion::new(),
        )
    }

    pub fn with_config(
        detector: Arc<dyn RoleDetector>,
        registry: Arc<dyn RoleRegistry>,
        loader: Arc<KnowledgeBaseLoader>,
        embedder: Arc<dyn EmbeddingEngine>,
        config: RetrieverConfig,
        fusion: ResultFusion,
    ) -> Self {
        let fan_out = config.max_roles.max(1);
        Self {
            detector,
            registry,
            loader,
            embedder,
            fusion,
            config,
            search_permits: Arc::new(Semaphore::new(fan_out)),
        }
    }

    /// Answer a question from the best-matching role knowledge bases.
    ///
    /// Worst case this returns an empty list; it never returns an error.
    pub async fn retrieve(&self, question: &str, user_id: &str, top_k: usize) -> Vec<Document> {
        self.retrieve_with_cancel(question, user_id, top_k, CancellationToken::new())
            .await
    }

    /// Like [`retrieve`](Self::retrieve), with a caller-held cancellation
    /// token checked before and inside each per-role search task.
    pub async fn retrieve_with_cancel(
        &self,
        question: &str,
        user_id: &str,
        top_k: usize,
        cancel: CancellationToken,
    ) -> Vec<Document> {
        let started = Instant::now();

        match self.try_retrieve(question, user_id, top_k, &cancel).await {
            Ok(documents) => {
                info!(
                    results = documents.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "retrieval complete"
                );
                documents
            }
            Err(e) => {
                error!(error = %e, "retrieval failed, falling back to default role");
                self.retrieve_with_default_role(question, top_k, &cancel)
                    .await
            }
        }
    }

    /// Detection summary without running any searches.
    pub async fn detection_statistics(
        &self,
        question: &str,
        user_id: &str,
    ) -> DetectionStatistics {
        match self.detector.detect(question, user_id).await {
            Ok(detection) => {
                let selected = self.select_top_roles(&detection);
                DetectionStatistics {
                    role_count: selected.len(),
                    role_weights: selected
                        .into_iter()
                        .map(|m| (m.role_id, m.confidence))
                        .collect(),
                }
            }
            Err(e) => {
                error!(error = %e, "role detection failed");
                DetectionStatistics::default()
            }
        }
    }

    async fn try_retrieve(
        &self,
        question: &str,
        user_id: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        let detection = self
            .detector
            .detect(question, user_id)
            .await
            .map_err(RetrievalError::from)?;

        let top_roles = self.select_top_roles(&detection);
        if top_roles.is_empty() {
            warn!(question, "no role matched with enough confidence");
            return Ok(self
                .retrieve_with_default_role(question, top_k, cancel)
                .await);
        }

        debug!(
            roles = ?top_roles
                .iter()
                .map(|m| format!("{}({:.2})", m.role_id, m.confidence))
                .collect::<Vec<_>>(),
            "roles selected for retrieval"
        );

        let query_vector = Arc::new(self.embedder.embed(question).await?);
        let results = self
            .parallel_search(query_vector, top_roles, top_k, cancel)
            .await;

        let results: Vec<RoleSearchResult> =
            results.into_iter().filter(|r| r.has_results()).collect();

        Ok(self.fusion.fuse_results(&results, top_k))
    }

    /// Keep candidates at or above the confidence threshold, most confident
    /// first, at most `max_roles` of them.
    fn select_top_roles(&self, detection: &RoleDetection) -> Vec<RoleMatch> {
        let mut candidates: Vec<RoleMatch> = detection
            .candidates
            .iter()
            .filter(|m| m.confidence >= self.config.min_role_confidence)
            .cloned()
            .collect();

        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.config.max_roles);
        candidates
    }

    /// One search task per selected role, all concurrent, joined in selection
    /// order so fusion sees a deterministic role order.
    async fn parallel_search(
        &self,
        query_vector: Arc<Vec<f32>>,
        top_roles: Vec<RoleMatch>,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Vec<RoleSearchResult> {
        let timeout = Duration::from_millis(self.config.search_timeout_ms);

        let mut handles = Vec::with_capacity(top_roles.len());
        for role_match in top_roles {
            let loader = Arc::clone(&self.loader);
            let registry = Arc::clone(&self.registry);
            let permits = Arc::clone(&self.search_permits);
            let query_vector = Arc::clone(&query_vector);
            let cancel = cancel.clone();
            let task_match = role_match.clone();

            let handle = tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return RoleSearchResult::empty(
                            task_match.role_id.clone(),
                            task_match.confidence,
                        )
                    }
                };
                Self::search_in_role(loader, registry, query_vector, task_match, top_k, timeout, cancel)
                    .await
            });
            handles.push((handle, role_match));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (handle, fallback) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(role_id = %fallback.role_id, error = %e, "search task panicked");
                    results.push(RoleSearchResult::empty(fallback.role_id, fallback.confidence));
                }
            }
        }
        results
    }

    /// Search a single role. Any failure yields an empty result for that
    /// role; sibling searches are never aborted.
    async fn search_in_role(
        loader: Arc<KnowledgeBaseLoader>,
        registry: Arc<dyn RoleRegistry>,
        query_vector: Arc<Vec<f32>>,
        role_match: RoleMatch,
        top_k: usize,
        search_timeout: Duration,
        cancel: CancellationToken,
    ) -> RoleSearchResult {
        let role_id = role_match.role_id.clone();
        if cancel.is_cancelled() {
            debug!(role_id, "search cancelled before dispatch");
            return RoleSearchResult::empty(role_id, role_match.confidence);
        }

        let started = Instant::now();
        let outcome = async {
            let index = loader.get_index(&role_id).await?;
            tokio::time::timeout(search_timeout, index.search(&query_vector, top_k))
                .await
                .map_err(|_| RetrievalError::Timeout {
                    duration_ms: search_timeout.as_millis() as u64,
                })?
                .map_err(|e| RetrievalError::SearchFailure {
                    role_id: role_id.clone(),
                    reason: e.to_string(),
                })
        }
        .await;

        let search_time_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(documents) => {
                debug!(
                    role_id,
                    results = documents.len(),
                    search_time_ms,
                    "role search complete"
                );

                let role_name = registry
                    .get_role(&role_id)
                    .await
                    .map(|role| role.name)
                    .unwrap_or_else(|| role_id.clone());

                RoleSearchResult {
                    role_id,
                    role_name,
                    role_weight: role_match.confidence,
                    documents,
                    search_time_ms,
                }
            }
            Err(e) => {
                error!(role_id, error = %e, "role search failed");
                RoleSearchResult::empty(role_id, role_match.confidence)
            }
        }
    }

    /// Degraded path: search the default role only. Never errors.
    async fn retrieve_with_default_role(
        &self,
        question: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Vec<Document> {
        if cancel.is_cancelled() {
            return Vec::new();
        }

        info!(
            default_role = %self.config.default_role,
            "retrieving with default role"
        );

        let outcome = async {
            let query_vector = self.embedder.embed(question).await?;
            let index = self.loader.get_index(&self.config.default_role).await?;
            let documents = index
                .search(&query_vector, top_k)
                .await
                .map_err(|e| RetrievalError::SearchFailure {
                    role_id: self.config.default_role.clone(),
                    reason: e.to_string(),
                })?;
            Ok::<_, RetrievalError>(documents)
        }
        .await;

        match outcome {
            Ok(documents) => documents
                .into_iter()
                .map(|scored| {
                    let mut doc = scored.document;
                    doc.score = scored.score;
                    doc
                })
                .collect(),
            Err(e) => {
                error!(error = %e, "default role retrieval failed");
                Vec::new()
            }
        }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::providers::{IndexBuilder, RoleIndex};
    use crate::types::{Role, ScoredDoc};
    use async_trait::async_trait;

    struct FixedDetector {
        candidates: Vec<RoleMatch>,
        fail: bool,
    }

    #[async_trait]
    impl RoleDetector for FixedDetector {
        async fn detect(&self, _question: &str, _user_id: &str) -> anyhow::Result<RoleDetection> {
            if self.fail {
                anyhow::bail!("detector offline");
            }
            Ok(RoleDetection::new(self.candidates.clone()))
        }
    }

    struct StaticRegistry {
        roles: Vec<Role>,
    }

    #[async_trait]
    impl RoleRegistry for StaticRegistry {
        async fn get_enabled_roles(&self) -> Vec<Role> {
            self.roles.iter().filter(|r| r.enabled).cloned().collect()
        }

        async fn get_role(&self, role_id: &str) -> Option<Role> {
            self.roles.iter().find(|r| r.id == role_id).cloned()
        }
    }

    struct StaticIndex {
        docs: Vec<ScoredDoc>,
        fail_search: bool,
    }

    #[async_trait]
    impl RoleIndex for StaticIndex {
        async fn load(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn unload(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn search(&self, _query: &[f32], top_k: usize) -> anyhow::Result<Vec<ScoredDoc>> {
            if self.fail_search {
                anyhow::bail!("index corrupted");
            }
            Ok(self.docs.iter().take(top_k).cloned().collect())
        }
    }

    /// Builds one static index per role from (doc id, score) fixtures.
    struct StaticBuilder {
        docs_per_role: HashMap<String, Vec<(String, f64)>>,
        fail_search_for: Option<String>,
    }

    #[async_trait]
    impl IndexBuilder for StaticBuilder {
        async fn get_or_create_index(&self, role: &Role) -> anyhow::Result<Arc<dyn RoleIndex>> {
            let docs = self
                .docs_per_role
                .get(&role.id)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|(id, score)| {
                            ScoredDoc::new(Document::new(id.clone(), "content"), *score)
                        })
                        .collect()
                })
                .unwrap_or_default();

            Ok(Arc::new(StaticIndex {
                docs,
                fail_search: self.fail_search_for.as_deref() == Some(role.id.as_str()),
            }))
        }
    }

    struct ZeroEmbedder;

    #[async_trait]
    impl EmbeddingEngine for ZeroEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![0.0; 8])
        }
    }

    fn roles() -> Vec<Role> {
        vec![
            Role::new("developer", "Developer", 5),
            Role::new("qa", "QA", 3),
            Role::new("ops", "Ops", 1),
        ]
    }

    fn retriever_with(
        candidates: Vec<RoleMatch>,
        detector_fails: bool,
        docs_per_role: HashMap<String, Vec<(String, f64)>>,
        fail_search_for: Option<String>,
    ) -> MultiRoleRetriever {
        let registry = Arc::new(StaticRegistry { roles: roles() });
        let loader = Arc::new(
            KnowledgeBaseLoader::new(
                Arc::clone(&registry) as Arc<dyn RoleRegistry>,
                Arc::new(StaticBuilder {
                    docs_per_role,
                    fail_search_for,
                }),
                LoaderConfig::default(),
            )
            .unwrap(),
        );

        MultiRoleRetriever::new(
            Arc::new(FixedDetector {
                candidates,
                fail: detector_fails,
            }),
            registry,
            loader,
            Arc::new(ZeroEmbedder),
        )
    }

    fn docs(entries: &[(&str, &[(&str, f64)])]) -> HashMap<String, Vec<(String, f64)>> {
        entries
            .iter()
            .map(|(role, docs)| {
                (
                    role.to_string(),
                    docs.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_select_top_roles_bound() {
        let retriever = retriever_with(Vec::new(), false, HashMap::new(), None);
        let detection = RoleDetection::new(
            (0..10)
                .map(|i| RoleMatch::new(format!("r{}", i), 0.4 + i as f64 * 0.05))
                .collect(),
        );

        let selected = retriever.select_top_roles(&detection);

        assert_eq!(selected.len(), 3);
        assert_eq!(selected[0].role_id, "r9");
        assert_eq!(selected[1].role_id, "r8");
        assert_eq!(selected[2].role_id, "r7");
    }

    #[test]
    fn test_select_filters_below_threshold() {
        let retriever = retriever_with(Vec::new(), false, HashMap::new(), None);
        let detection = RoleDetection::new(vec![
            RoleMatch::new("dev", 0.9),
            RoleMatch::new("qa", 0.4),
            RoleMatch::new("ops", 0.2),
        ]);

        let selected = retriever.select_top_roles(&detection);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].role_id, "dev");
        assert_eq!(selected[1].role_id, "qa");
    }

    #[tokio::test]
    async fn test_end_to_end_two_roles() {
        let retriever = retriever_with(
            vec![
                RoleMatch::new("developer", 0.9),
                RoleMatch::new("qa", 0.4),
                RoleMatch::new("ops", 0.2),
            ],
            false,
            docs(&[
                ("developer", &[("dev-doc", 0.9)]),
                ("qa", &[("qa-doc", 0.8)]),
                ("ops", &[("ops-doc", 0.7)]),
            ]),
            None,
        );

        let results = retriever.retrieve("how do I deploy?", "u1", 10).await;
        let ids: Vec<&str> = results.iter().map(|d| d.id.as_str()).collect();

        // ops is below the confidence threshold and never searched
        assert!(ids.contains(&"dev-doc"));
        assert!(ids.contains(&"qa-doc"));
        assert!(!ids.contains(&"ops-doc"));
        // Higher-weighted role ranks first
        assert_eq!(results[0].id, "dev-doc");
    }

    #[tokio::test]
    async fn test_consensus_document_wins() {
        let retriever = retriever_with(
            vec![
                RoleMatch::new("developer", 0.6),
                RoleMatch::new("qa", 0.6),
            ],
            false,
            docs(&[
                ("developer", &[("solo", 0.95), ("shared", 0.9)]),
                ("qa", &[("shared", 0.9)]),
            ]),
            None,
        );

        let results = retriever.retrieve("question", "u1", 10).await;
        // shared: (0.6*0.9*0.9 + 0.6*0.9) * 2.2 > solo: 0.6*0.95
        assert_eq!(results[0].id, "shared");
    }

    #[tokio::test]
    async fn test_fallback_on_empty_selection() {
        let retriever = retriever_with(
            vec![RoleMatch::new("x", 0.1)],
            false,
            docs(&[("developer", &[("default-doc", 0.9)])]),
            None,
        );

        let results = retriever.retrieve("anything", "u1", 10).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "default-doc");
    }

    #[tokio::test]
    async fn test_fallback_on_detector_failure() {
        let retriever = retriever_with(
            Vec::new(),
            true,
            docs(&[("developer", &[("default-doc", 0.9)])]),
            None,
        );

        let results = retriever.retrieve("anything", "u1", 10).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "default-doc");
    }

    #[tokio::test]
    async fn test_fallback_never_panics_when_default_role_missing() {
        let retriever = retriever_with(vec![RoleMatch::new("x", 0.1)], false, HashMap::new(), None);

        // Default role index exists but holds nothing; worst case is empty
        let results = retriever.retrieve("anything", "u1", 10).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_failing_role_does_not_abort_query() {
        let retriever = retriever_with(
            vec![
                RoleMatch::new("developer", 0.9),
                RoleMatch::new("qa", 0.5),
            ],
            false,
            docs(&[
                ("developer", &[("dev-doc", 0.9)]),
                ("qa", &[("qa-doc", 0.8)]),
            ]),
            Some("qa".to_string()),
        );

        let results = retriever.retrieve("question", "u1", 10).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "dev-doc");
    }

    #[tokio::test]
    async fn test_slow_role_times_out_to_empty() {
        struct SlowIndex;

        #[async_trait]
        impl RoleIndex for SlowIndex {
            async fn load(&self) -> anyhow::Result<()> {
                Ok(())
            }

            async fn unload(&self) -> anyhow::Result<()> {
                Ok(())
            }

            async fn search(
                &self,
                _query: &[f32],
                _top_k: usize,
            ) -> anyhow::Result<Vec<ScoredDoc>> {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(vec![ScoredDoc::new(Document::new("late", "content"), 0.9)])
            }
        }

        struct SlowBuilder;

        #[async_trait]
        impl IndexBuilder for SlowBuilder {
            async fn get_or_create_index(&self, _role: &Role) -> anyhow::Result<Arc<dyn RoleIndex>> {
                Ok(Arc::new(SlowIndex))
            }
        }

        let registry = Arc::new(StaticRegistry { roles: roles() });
        let loader = Arc::new(
            KnowledgeBaseLoader::new(
                Arc::clone(&registry) as Arc<dyn RoleRegistry>,
                Arc::new(SlowBuilder),
                LoaderConfig::default(),
            )
            .unwrap(),
        );
        let retriever = MultiRoleRetriever::with_config(
            Arc::new(FixedDetector {
                candidates: vec![RoleMatch::new("developer", 0.9)],
                fail: false,
            }),
            registry,
            loader,
            Arc::new(ZeroEmbedder),
            RetrieverConfig {
                search_timeout_ms: 50,
                ..RetrieverConfig::default()
            },
            ResultFusion::new(),
        );

        // The only selected role hangs past its budget; the query degrades to
        // empty instead of stalling
        let results = retriever.retrieve("question", "u1", 10).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_query_returns_empty() {
        let retriever = retriever_with(
            vec![RoleMatch::new("developer", 0.9)],
            false,
            docs(&[("developer", &[("dev-doc", 0.9)])]),
            None,
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = retriever
            .retrieve_with_cancel("question", "u1", 10, cancel)
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_detection_statistics() {
        let retriever = retriever_with(
            vec![
                RoleMatch::new("developer", 0.9),
                RoleMatch::new("qa", 0.4),
                RoleMatch::new("ops", 0.2),
            ],
            false,
            HashMap::new(),
            None,
        );

        let stats = retriever.detection_statistics("question", "u1").await;
        assert_eq!(stats.role_count, 2);
        assert_eq!(stats.role_weights.get("developer"), Some(&0.9));
        assert!(!stats.role_weights.contains_key("ops"));
    }
}
