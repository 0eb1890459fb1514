//! In-memory [`MetadataStore`] used by tests and embedded deployments.
//!
//! All tables live behind one `tokio::sync::RwLock`, which makes the compare-and-set in
//! `claim_index_id` and the cascade in `delete_source` atomic.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{IndexClaim, MetadataStore, StoreError};
use crate::knowledge::{Agent, ContentItem, KnowledgeSource};

#[derive(Default)]
struct Tables {
    sources: HashMap<Uuid, KnowledgeSource>,
    items: HashMap<Uuid, ContentItem>,
    agents: HashMap<Uuid, Agent>,
    /// (agent_id, source_id)
    links: BTreeSet<(Uuid, Uuid)>,
}

/// Metadata store backed by process memory.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_sources(sources: &mut [KnowledgeSource]) {
    sources.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn insert_source(&self, source: &KnowledgeSource) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .sources
            .insert(source.id, source.clone());
        Ok(())
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<KnowledgeSource>, StoreError> {
        Ok(self.tables.read().await.sources.get(&id).cloned())
    }

    async fn list_sources(&self) -> Result<Vec<KnowledgeSource>, StoreError> {
        let mut sources: Vec<_> = self.tables.read().await.sources.values().cloned().collect();
        sort_sources(&mut sources);
        Ok(sources)
    }

    async fn claim_index_id(
        &self,
        source_id: Uuid,
        index_id: &str,
    ) -> Result<IndexClaim, StoreError> {
        let mut tables = self.tables.write().await;
        let source = tables
            .sources
            .get_mut(&source_id)
            .ok_or(StoreError::NotFound {
                entity: "knowledge source",
                id: source_id,
            })?;
        match &source.index_id {
            Some(existing) => Ok(IndexClaim::Existing(existing.clone())),
            None => {
                source.index_id = Some(index_id.to_string());
                Ok(IndexClaim::Claimed)
            }
        }
    }

    async fn touch_index_updated_at(
        &self,
        source_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let source = tables
            .sources
            .get_mut(&source_id)
            .ok_or(StoreError::NotFound {
                entity: "knowledge source",
                id: source_id,
            })?;
        source.index_updated_at = Some(at);
        Ok(())
    }

    async fn delete_source(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.sources.remove(&id).is_none() {
            return Ok(false);
        }
        tables.items.retain(|_, item| item.source_id != id);
        tables.links.retain(|(_, source_id)| *source_id != id);
        Ok(true)
    }

    async fn upsert_content_item(&self, item: &ContentItem) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.sources.contains_key(&item.source_id) {
            return Err(StoreError::NotFound {
                entity: "knowledge source",
                id: item.source_id,
            });
        }
        tables.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_content_item(&self, id: Uuid) -> Result<Option<ContentItem>, StoreError> {
        Ok(self.tables.read().await.items.get(&id).cloned())
    }

    async fn list_content_items(&self, source_id: Uuid) -> Result<Vec<ContentItem>, StoreError> {
        let mut items: Vec<_> = self
            .tables
            .read()
            .await
            .items
            .values()
            .filter(|item| item.source_id == source_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.id);
        Ok(items)
    }

    async fn set_external_file_id(
        &self,
        item_id: Uuid,
        file_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let item = tables.items.get_mut(&item_id).ok_or(StoreError::NotFound {
            entity: "content item",
            id: item_id,
        })?;
        item.external_file_id = file_id.map(str::to_string);
        Ok(())
    }

    async fn delete_content_item(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.items.remove(&id).is_some())
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .agents
            .insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, StoreError> {
        Ok(self.tables.read().await.agents.get(&id).cloned())
    }

    async fn link_agent_source(&self, agent_id: Uuid, source_id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.agents.contains_key(&agent_id) {
            return Err(StoreError::NotFound {
                entity: "agent",
                id: agent_id,
            });
        }
        if !tables.sources.contains_key(&source_id) {
            return Err(StoreError::NotFound {
                entity: "knowledge source",
                id: source_id,
            });
        }
        tables.links.insert((agent_id, source_id));
        Ok(())
    }

    async fn agents_for_source(&self, source_id: Uuid) -> Result<Vec<Agent>, StoreError> {
        let tables = self.tables.read().await;
        let mut agents: Vec<_> = tables
            .links
            .iter()
            .filter(|(_, linked)| *linked == source_id)
            .filter_map(|(agent_id, _)| tables.agents.get(agent_id).cloned())
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(agents)
    }

    async fn sources_for_agent(&self, agent_id: Uuid) -> Result<Vec<KnowledgeSource>, StoreError> {
        let tables = self.tables.read().await;
        let mut sources: Vec<_> = tables
            .links
            .iter()
            .filter(|(linked, _)| *linked == agent_id)
            .filter_map(|(_, source_id)| tables.sources.get(source_id).cloned())
            .collect();
        sort_sources(&mut sources);
        Ok(sources)
    }
}
