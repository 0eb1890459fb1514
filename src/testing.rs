//! In-process fakes of the remote collaborators, shared by unit tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::agents::{AgentRuntime, AgentRuntimeError};
use crate::knowledge::{Agent, ChunkingProfile, ContentItem, KnowledgeSource};
use crate::provider::{
    BatchState, ExpirationPolicy, FileBatch, FileCounts, IndexStatus, IndexingProvider,
    ProviderError,
};
use crate::store::{IndexClaim, InMemoryStore, MetadataStore, StoreError};

type CreateHook = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

fn failure(body: &str) -> ProviderError {
    ProviderError::UnexpectedStatus {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: body.to_string(),
    }
}

struct PendingBatch {
    index_id: String,
    file_ids: Vec<String>,
    remaining_polls: u32,
    status: BatchState,
}

#[derive(Default)]
struct ProviderState {
    next_id: u64,
    indexes: HashMap<String, (String, u32)>,
    attachments: HashMap<String, BTreeSet<String>>,
    files: HashMap<String, String>,
    batches: HashMap<String, PendingBatch>,
    batch_sizes: Vec<usize>,
    last_profile: Option<ChunkingProfile>,
    indexes_created: usize,
    uploads: usize,
    status_polls: u32,
    polls_before_done: u32,
    finish_state: Option<BatchState>,
    fail_uploads: bool,
    fail_deletes: bool,
    fail_detaches: bool,
    fail_attaches: bool,
    fail_index_creation: bool,
}

impl ProviderState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }

    fn settle(&mut self, batch_id: &str) -> FileBatch {
        let finish = self.finish_state.unwrap_or(BatchState::Completed);
        let batch = self.batches.get_mut(batch_id).expect("known batch");
        if batch.status == BatchState::InProgress && batch.remaining_polls == 0 {
            batch.status = finish;
        }
        let status = batch.status;
        let total = batch.file_ids.len() as u64;
        let completed = status == BatchState::Completed;
        let (index_id, files) = (batch.index_id.clone(), batch.file_ids.clone());
        if completed {
            self.attachments.entry(index_id).or_default().extend(files);
        }
        FileBatch {
            id: batch_id.to_string(),
            status,
            file_counts: FileCounts {
                completed: if completed { total } else { 0 },
                total,
                ..FileCounts::default()
            },
        }
    }
}

/// Fake indexing provider with failure switches.
#[derive(Default)]
pub(crate) struct FakeProvider {
    state: Mutex<ProviderState>,
    before_create: Mutex<Option<CreateHook>>,
}

impl FakeProvider {
    fn state(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().expect("fake provider state")
    }

    pub(crate) fn fail_uploads(&self, fail: bool) {
        self.state().fail_uploads = fail;
    }

    pub(crate) fn fail_deletes(&self, fail: bool) {
        self.state().fail_deletes = fail;
    }

    pub(crate) fn fail_detaches(&self, fail: bool) {
        self.state().fail_detaches = fail;
    }

    pub(crate) fn fail_attaches(&self, fail: bool) {
        self.state().fail_attaches = fail;
    }

    pub(crate) fn fail_index_creation(&self, fail: bool) {
        self.state().fail_index_creation = fail;
    }

    pub(crate) fn batch_polls_before_done(&self, polls: u32) {
        self.state().polls_before_done = polls;
    }

    pub(crate) fn finish_batches_as(&self, state: BatchState) {
        self.state().finish_state = Some(state);
    }

    pub(crate) fn before_create<F>(&self, hook: F)
    where
        F: Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static,
    {
        *self.before_create.lock().expect("hook") = Some(Arc::new(hook));
    }

    pub(crate) fn indexes_created(&self) -> usize {
        self.state().indexes_created
    }

    pub(crate) fn uploads(&self) -> usize {
        self.state().uploads
    }

    pub(crate) fn index_name(&self, index_id: &str) -> Option<String> {
        self.state().indexes.get(index_id).map(|(name, _)| name.clone())
    }

    pub(crate) fn expiration_days(&self, index_id: &str) -> Option<u32> {
        self.state().indexes.get(index_id).map(|(_, days)| *days)
    }

    pub(crate) fn live_indexes(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.state().indexes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn attached(&self, index_id: &str) -> Vec<String> {
        self.state()
            .attachments
            .get(index_id)
            .map(|files| files.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn file_exists(&self, file_id: &str) -> bool {
        self.state().files.contains_key(file_id)
    }

    pub(crate) fn file_content(&self, file_id: &str) -> Option<String> {
        self.state().files.get(file_id).cloned()
    }

    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.state().batch_sizes.clone()
    }

    pub(crate) fn last_profile(&self) -> Option<ChunkingProfile> {
        self.state().last_profile
    }

    pub(crate) fn status_polls(&self) -> u32 {
        self.state().status_polls
    }
}

#[async_trait]
impl IndexingProvider for FakeProvider {
    async fn create_index(
        &self,
        name: &str,
        expiration: ExpirationPolicy,
    ) -> Result<String, ProviderError> {
        let hook = self.before_create.lock().expect("hook").clone();
        if let Some(hook) = hook {
            hook().await;
        }
        let mut state = self.state();
        if state.fail_index_creation {
            return Err(failure("index creation unavailable"));
        }
        let id = state.next("vs");
        state
            .indexes
            .insert(id.clone(), (name.to_string(), expiration.days));
        state.indexes_created += 1;
        Ok(id)
    }

    async fn attach_files_batch(
        &self,
        index_id: &str,
        file_ids: &[String],
        profile: ChunkingProfile,
    ) -> Result<FileBatch, ProviderError> {
        let mut state = self.state();
        if state.fail_attaches {
            return Err(failure("attach unavailable"));
        }
        state.batch_sizes.push(file_ids.len());
        state.last_profile = Some(profile);
        let id = state.next("vsfb");
        let remaining_polls = state.polls_before_done;
        state.batches.insert(
            id.clone(),
            PendingBatch {
                index_id: index_id.to_string(),
                file_ids: file_ids.to_vec(),
                remaining_polls,
                status: BatchState::InProgress,
            },
        );
        Ok(state.settle(&id))
    }

    async fn batch_status(
        &self,
        _index_id: &str,
        batch_id: &str,
    ) -> Result<FileBatch, ProviderError> {
        let mut state = self.state();
        state.status_polls += 1;
        let batch = state
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| failure("unknown batch"))?;
        batch.remaining_polls = batch.remaining_polls.saturating_sub(1);
        Ok(state.settle(batch_id))
    }

    async fn detach_file(&self, index_id: &str, file_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        if state.fail_detaches {
            return Err(failure("detach unavailable"));
        }
        if let Some(files) = state.attachments.get_mut(index_id) {
            files.remove(file_id);
        }
        Ok(())
    }

    async fn upload_file(&self, bytes: Vec<u8>, _filename: &str) -> Result<String, ProviderError> {
        let mut state = self.state();
        if state.fail_uploads {
            return Err(failure("upload unavailable"));
        }
        let id = state.next("file");
        state
            .files
            .insert(id.clone(), String::from_utf8_lossy(&bytes).into_owned());
        state.uploads += 1;
        Ok(id)
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        if state.fail_deletes {
            return Err(failure("delete unavailable"));
        }
        state.files.remove(file_id);
        Ok(())
    }

    async fn retrieve_index(&self, index_id: &str) -> Result<IndexStatus, ProviderError> {
        let state = self.state();
        if !state.indexes.contains_key(index_id) {
            return Err(failure("unknown index"));
        }
        let attached = state
            .attachments
            .get(index_id)
            .map(|files| files.len() as u64)
            .unwrap_or(0);
        Ok(IndexStatus {
            id: index_id.to_string(),
            status: "completed".into(),
            file_counts: FileCounts {
                completed: attached,
                total: attached,
                ..FileCounts::default()
            },
        })
    }

    async fn update_expiration(
        &self,
        index_id: &str,
        expiration: ExpirationPolicy,
    ) -> Result<(), ProviderError> {
        let mut state = self.state();
        let entry = state
            .indexes
            .get_mut(index_id)
            .ok_or_else(|| failure("unknown index"))?;
        entry.1 = expiration.days;
        Ok(())
    }

    async fn delete_index(&self, index_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.indexes.remove(index_id);
        state.attachments.remove(index_id);
        Ok(())
    }
}

/// Fake agent runtime recording the last index set per remote agent.
#[derive(Default)]
pub(crate) struct FakeRuntime {
    sets: Mutex<HashMap<String, Vec<String>>>,
    failing: Mutex<HashSet<String>>,
    fail_all: Mutex<bool>,
    calls: Mutex<usize>,
}

impl FakeRuntime {
    pub(crate) fn fail_for(&self, remote_id: &str) {
        self.failing
            .lock()
            .expect("failing")
            .insert(remote_id.to_string());
    }

    pub(crate) fn fail_all(&self, fail: bool) {
        *self.fail_all.lock().expect("fail_all") = fail;
    }

    pub(crate) fn index_set(&self, remote_id: &str) -> Option<Vec<String>> {
        self.sets.lock().expect("sets").get(remote_id).cloned()
    }

    pub(crate) fn calls(&self) -> usize {
        *self.calls.lock().expect("calls")
    }
}

#[async_trait]
impl AgentRuntime for FakeRuntime {
    async fn set_tool_index_set(
        &self,
        remote_id: &str,
        index_ids: &[String],
    ) -> Result<(), AgentRuntimeError> {
        *self.calls.lock().expect("calls") += 1;
        if *self.fail_all.lock().expect("fail_all")
            || self.failing.lock().expect("failing").contains(remote_id)
        {
            return Err(AgentRuntimeError::UnexpectedStatus {
                status: StatusCode::BAD_GATEWAY,
                body: "runtime unavailable".into(),
            });
        }
        self.sets
            .lock()
            .expect("sets")
            .insert(remote_id.to_string(), index_ids.to_vec());
        Ok(())
    }
}

/// Store wrapper whose item reads can be switched to fail.
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: InMemoryStore,
    fail_item_reads: Mutex<bool>,
}

impl FlakyStore {
    pub(crate) fn fail_item_reads(&self, fail: bool) {
        *self.fail_item_reads.lock().expect("flag") = fail;
    }
}

#[async_trait]
impl MetadataStore for FlakyStore {
    async fn insert_source(&self, source: &KnowledgeSource) -> Result<(), StoreError> {
        self.inner.insert_source(source).await
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<KnowledgeSource>, StoreError> {
        self.inner.get_source(id).await
    }

    async fn list_sources(&self) -> Result<Vec<KnowledgeSource>, StoreError> {
        self.inner.list_sources().await
    }

    async fn claim_index_id(
        &self,
        source_id: Uuid,
        index_id: &str,
    ) -> Result<IndexClaim, StoreError> {
        self.inner.claim_index_id(source_id, index_id).await
    }

    async fn touch_index_updated_at(
        &self,
        source_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        self.inner.touch_index_updated_at(source_id, at).await
    }

    async fn delete_source(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_source(id).await
    }

    async fn upsert_content_item(&self, item: &ContentItem) -> Result<(), StoreError> {
        self.inner.upsert_content_item(item).await
    }

    async fn get_content_item(&self, id: Uuid) -> Result<Option<ContentItem>, StoreError> {
        if *self.fail_item_reads.lock().expect("flag") {
            return Err(StoreError::Corrupt("item read unavailable".into()));
        }
        self.inner.get_content_item(id).await
    }

    async fn list_content_items(&self, source_id: Uuid) -> Result<Vec<ContentItem>, StoreError> {
        self.inner.list_content_items(source_id).await
    }

    async fn set_external_file_id(
        &self,
        item_id: Uuid,
        file_id: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner.set_external_file_id(item_id, file_id).await
    }

    async fn delete_content_item(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_content_item(id).await
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        self.inner.upsert_agent(agent).await
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, StoreError> {
        self.inner.get_agent(id).await
    }

    async fn link_agent_source(&self, agent_id: Uuid, source_id: Uuid) -> Result<(), StoreError> {
        self.inner.link_agent_source(agent_id, source_id).await
    }

    async fn agents_for_source(&self, source_id: Uuid) -> Result<Vec<Agent>, StoreError> {
        self.inner.agents_for_source(source_id).await
    }

    async fn sources_for_agent(&self, agent_id: Uuid) -> Result<Vec<KnowledgeSource>, StoreError> {
        self.inner.sources_for_agent(agent_id).await
    }
}
