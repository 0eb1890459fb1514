//! Propagates index changes to every agent that searches a knowledge source.
//!
//! There is no incremental "add one index" call: each agent's complete index set is recomputed
//! from the metadata store and sent as a replacement, so a missed or repeated sync never leaves
//! an agent drifting from its sources.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::runtime::AgentRuntime;
use crate::knowledge::Agent;
use crate::store::{MetadataStore, StoreError};

/// Agents touched by a synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentSyncReport {
    /// Agents whose runtime index set was replaced.
    pub updated: Vec<Uuid>,
    /// Agents skipped because they are not provisioned on the runtime.
    pub skipped: Vec<Uuid>,
}

/// One agent that could not be updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentFailure {
    /// Local agent identifier.
    pub agent_id: Uuid,
    /// Rendered error.
    pub error: String,
}

/// Errors raised while synchronizing agents.
#[derive(Debug, Error)]
pub enum AgentSyncError {
    /// Dependent agents could not be enumerated.
    #[error("Metadata store failed: {0}")]
    Store(#[from] StoreError),
    /// Requested agent does not exist.
    #[error("Agent {0} not found")]
    AgentNotFound(Uuid),
    /// Some agents were updated, others failed; re-running converges.
    #[error("{} agent(s) failed to update", .failures.len())]
    Incomplete {
        /// Agents that failed.
        failures: Vec<AgentFailure>,
        /// Agents that were handled.
        report: AgentSyncReport,
    },
}

enum AgentOutcome {
    Updated,
    Skipped,
}

/// Recomputes and pushes agent index sets.
#[derive(Clone)]
pub struct AgentSynchronizer {
    store: Arc<dyn MetadataStore>,
    runtime: Arc<dyn AgentRuntime>,
}

impl AgentSynchronizer {
    /// Build a synchronizer over a metadata store and an agent runtime.
    pub fn new(store: Arc<dyn MetadataStore>, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self { store, runtime }
    }

    /// Re-push the full index set of every agent associated with `source_id`.
    ///
    /// Every agent is attempted even if an earlier one fails.
    pub async fn sync_agents_for(&self, source_id: Uuid) -> Result<AgentSyncReport, AgentSyncError> {
        let agents = self.store.agents_for_source(source_id).await?;
        tracing::debug!(source_id = %source_id, agents = agents.len(), "Synchronizing dependent agents");
        self.sync_all(agents).await
    }

    /// Re-push the full index set of a single agent.
    pub async fn sync_agent(&self, agent_id: Uuid) -> Result<AgentSyncReport, AgentSyncError> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or(AgentSyncError::AgentNotFound(agent_id))?;
        self.sync_all(vec![agent]).await
    }

    /// Re-push the index sets of an explicit list of agents.
    pub async fn sync_all(&self, agents: Vec<Agent>) -> Result<AgentSyncReport, AgentSyncError> {
        let mut report = AgentSyncReport::default();
        let mut failures = Vec::new();

        for agent in agents {
            match self.sync_one(&agent).await {
                Ok(AgentOutcome::Updated) => report.updated.push(agent.id),
                Ok(AgentOutcome::Skipped) => report.skipped.push(agent.id),
                Err(error) => {
                    tracing::warn!(agent_id = %agent.id, error = %error, "Agent index sync failed");
                    failures.push(AgentFailure {
                        agent_id: agent.id,
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(AgentSyncError::Incomplete { failures, report })
        }
    }

    /// Union of the index handles of every source the agent searches, sorted and deduplicated.
    pub async fn index_set_for(&self, agent_id: Uuid) -> Result<Vec<String>, StoreError> {
        let sources = self.store.sources_for_agent(agent_id).await?;
        let ids: BTreeSet<String> = sources
            .into_iter()
            .filter_map(|source| source.index_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn sync_one(&self, agent: &Agent) -> Result<AgentOutcome, String> {
        let Some(remote_id) = agent.remote_id.as_deref() else {
            tracing::debug!(agent_id = %agent.id, "Agent not provisioned on runtime; skipping");
            return Ok(AgentOutcome::Skipped);
        };
        let index_ids = self
            .index_set_for(agent.id)
            .await
            .map_err(|err| err.to_string())?;
        self.runtime
            .set_tool_index_set(remote_id, &index_ids)
            .await
            .map_err(|err| err.to_string())?;
        tracing::info!(
            agent_id = %agent.id,
            remote_id,
            indexes = index_ids.len(),
            "Agent index set updated"
        );
        Ok(AgentOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeSource;
    use crate::store::InMemoryStore;
    use crate::testing::FakeRuntime;

    async fn source_with_index(store: &InMemoryStore, name: &str, index: Option<&str>) -> Uuid {
        let source = KnowledgeSource::new(name);
        store.insert_source(&source).await.expect("insert");
        if let Some(index) = index {
            store.claim_index_id(source.id, index).await.expect("claim");
        }
        source.id
    }

    #[tokio::test]
    async fn recomputes_union_across_all_agent_sources() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = Arc::new(FakeRuntime::default());
        let s1 = source_with_index(&store, "S1", Some("V1")).await;
        let s2 = source_with_index(&store, "S2", Some("V2")).await;
        let agent = Agent::new("A1", Some("asst_a1".into()));
        store.upsert_agent(&agent).await.expect("agent");
        store.link_agent_source(agent.id, s1).await.expect("link");
        store.link_agent_source(agent.id, s2).await.expect("link");

        let sync = AgentSynchronizer::new(store.clone(), runtime.clone());
        let report = sync.sync_agents_for(s2).await.expect("sync");

        assert_eq!(report.updated, vec![agent.id]);
        assert_eq!(
            runtime.index_set("asst_a1"),
            Some(vec!["V1".to_string(), "V2".to_string()])
        );
    }

    #[tokio::test]
    async fn sources_without_index_contribute_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = Arc::new(FakeRuntime::default());
        let s1 = source_with_index(&store, "S1", Some("V1")).await;
        let pending = source_with_index(&store, "Pending", None).await;
        let agent = Agent::new("A1", Some("asst_a1".into()));
        store.upsert_agent(&agent).await.expect("agent");
        store.link_agent_source(agent.id, s1).await.expect("link");
        store.link_agent_source(agent.id, pending).await.expect("link");

        let sync = AgentSynchronizer::new(store.clone(), runtime.clone());
        sync.sync_agent(agent.id).await.expect("sync");
        assert_eq!(runtime.index_set("asst_a1"), Some(vec!["V1".to_string()]));
    }

    #[tokio::test]
    async fn failures_are_collected_and_other_agents_still_update() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = Arc::new(FakeRuntime::default());
        let source = source_with_index(&store, "S1", Some("V1")).await;
        let broken = Agent::new("Broken", Some("asst_broken".into()));
        let healthy = Agent::new("Healthy", Some("asst_ok".into()));
        let unprovisioned = Agent::new("Draft", None);
        for agent in [&broken, &healthy, &unprovisioned] {
            store.upsert_agent(agent).await.expect("agent");
            store.link_agent_source(agent.id, source).await.expect("link");
        }
        runtime.fail_for("asst_broken");

        let sync = AgentSynchronizer::new(store.clone(), runtime.clone());
        let error = sync.sync_agents_for(source).await.expect_err("partial");
        match error {
            AgentSyncError::Incomplete { failures, report } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].agent_id, broken.id);
                assert_eq!(report.updated, vec![healthy.id]);
                assert_eq!(report.skipped, vec![unprovisioned.id]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runtime.index_set("asst_ok"), Some(vec!["V1".to_string()]));
    }

    #[tokio::test]
    async fn unknown_agent_is_reported() {
        let sync = AgentSynchronizer::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(FakeRuntime::default()),
        );
        let missing = Uuid::new_v4();
        assert!(matches!(
            sync.sync_agent(missing).await,
            Err(AgentSyncError::AgentNotFound(id)) if id == missing
        ));
    }
}
