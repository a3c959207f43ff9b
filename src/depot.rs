//! Typed object store over the external key/value contract. Immutable
//! objects (artifacts, versions, save points) are written once; the
//! mutable indices over them are rewritten whole. Every operation gathers
//! its writes into one batch and commits at the end, so a failure part way
//! through leaves the store intact.

use crate::access::{AccessCheck, AllowAll};
use crate::agent::AgentRegistry;
use crate::baseline::Baseline;
use crate::config::CoreConfig;
use crate::error::{PolytopeError, PtResult};
use crate::id::{ArtifactId, ChangeId, HistoryId, ProjectId, SavePointId, VersionId, WorkspaceId};
use crate::model::{
    Artifact, ArtifactVersion, Change, History, Project, SavePoint, User, WorkspaceRecord,
};
use crate::store::{BatchOp, Column, KvStore, MemoryStore};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct Depot {
    inner: Arc<DepotInner>,
}

struct DepotInner {
    store: Arc<dyn KvStore>,
    registry: AgentRegistry,
    config: CoreConfig,
    access: Box<dyn AccessCheck>,
    // lock tables for the per-entity synchronisation of workspaces and
    // history tips; entries are created on first use and never removed
    history_locks: Mutex<FxHashMap<HistoryId, Arc<Mutex<()>>>>,
    workspace_locks: Mutex<FxHashMap<WorkspaceId, Arc<Mutex<()>>>>,
}

impl Depot {
    pub fn new(store: Arc<dyn KvStore>, registry: AgentRegistry, config: CoreConfig) -> Self {
        Self::with_access(store, registry, config, Box::new(AllowAll))
    }

    pub fn with_access(
        store: Arc<dyn KvStore>,
        registry: AgentRegistry,
        config: CoreConfig,
        access: Box<dyn AccessCheck>,
    ) -> Self {
        Self {
            inner: Arc::new(DepotInner {
                store,
                registry,
                config,
                access,
                history_locks: Default::default(),
                workspace_locks: Default::default(),
            }),
        }
    }

    /// depot over an in-process store with the standard agents
    pub fn in_memory() -> Self {
        Self::in_memory_with_config(CoreConfig::default())
    }

    pub fn in_memory_with_config(config: CoreConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), AgentRegistry::standard(), config)
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    pub fn check_access(&self, user: &str, operation: &str) -> PtResult<()> {
        self.inner.access.check(user, operation)
    }

    fn read<T: DeserializeOwned>(&self, column: Column, key: &str) -> PtResult<Option<T>> {
        match self.inner.store.get(column, key)? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => Ok(Some(value)),
                Err(err) => bail!(PolytopeError::Corrupt(format!(
                    "undecodable record at {}/{}: {}",
                    column, key, err
                ))),
            },
            None => Ok(None),
        }
    }

    fn read_required<T: DeserializeOwned>(
        &self,
        column: Column,
        key: &str,
        what: impl FnOnce() -> String,
    ) -> PtResult<T> {
        match self.read(column, key)? {
            Some(value) => Ok(value),
            None => bail!(PolytopeError::NotFound(what())),
        }
    }

    pub fn try_project(&self, name: &str) -> PtResult<Option<Project>> {
        self.read(Column::Projects, name)
    }

    pub fn project(&self, name: &str) -> PtResult<Project> {
        self.read_required(Column::Projects, name, || format!("project `{}`", name))
    }

    pub fn history(&self, id: &HistoryId) -> PtResult<History> {
        self.read_required(Column::Histories, id.as_str(), || format!("history `{}`", id))
    }

    pub fn change(&self, id: &ChangeId) -> PtResult<Change> {
        self.read_required(Column::Changes, id.as_str(), || format!("change `{}`", id))
    }

    pub fn save_point(&self, id: &SavePointId) -> PtResult<SavePoint> {
        self.read_required(Column::SavePoints, id.as_str(), || format!("save point `{}`", id))
    }

    pub fn artifact(&self, id: &ArtifactId) -> PtResult<Artifact> {
        self.read_required(Column::Artifacts, id.as_str(), || format!("artifact `{}`", id))
    }

    pub fn version(&self, id: &VersionId) -> PtResult<ArtifactVersion> {
        self.read_required(Column::Versions, id.as_str(), || format!("version `{}`", id))
    }

    pub fn workspace_record(&self, id: &WorkspaceId) -> PtResult<WorkspaceRecord> {
        self.read_required(Column::Workspaces, id.as_str(), || format!("workspace `{}`", id))
    }

    pub fn user(&self, name: &str) -> PtResult<User> {
        self.read_required(Column::Users, name, || format!("user `{}`", name))
    }

    pub fn register_user(&self, user: &User) -> PtResult<()> {
        let mut batch = vec![];
        stage(&mut batch, Column::Users, &user.name, user)?;
        self.commit(batch)
    }

    fn scan<T: DeserializeOwned>(&self, column: Column) -> PtResult<Vec<T>> {
        self.inner
            .store
            .iterate(column)?
            .into_iter()
            .map(|(key, bytes)| {
                serde_json::from_slice(&bytes).map_err(|err| {
                    anyhow!(PolytopeError::Corrupt(format!(
                        "undecodable record at {}/{}: {}",
                        column, key, err
                    )))
                })
            })
            .collect()
    }

    pub fn projects(&self) -> PtResult<Vec<Project>> {
        self.scan(Column::Projects)
    }

    pub fn histories_of(&self, project: &ProjectId) -> PtResult<Vec<History>> {
        Ok(self
            .scan::<History>(Column::Histories)?
            .into_iter()
            .filter(|h| &h.project == project)
            .collect())
    }

    pub fn changes_of(&self, history: &HistoryId) -> PtResult<Vec<Change>> {
        Ok(self
            .scan::<Change>(Column::Changes)?
            .into_iter()
            .filter(|c| &c.history == history)
            .collect())
    }

    pub fn workspaces_of(&self, project: &ProjectId) -> PtResult<Vec<WorkspaceRecord>> {
        Ok(self
            .scan::<WorkspaceRecord>(Column::Workspaces)?
            .into_iter()
            .filter(|w| &w.project == project)
            .collect())
    }

    /// decodes the baseline stored as a version's content
    pub fn baseline_at(&self, version: &VersionId) -> PtResult<Baseline> {
        let version = self.version(version)?;
        match serde_json::from_slice(&version.content) {
            Ok(baseline) => Ok(baseline),
            Err(err) => bail!(PolytopeError::Corrupt(format!(
                "version `{}` does not hold a baseline: {}",
                version.id, err
            ))),
        }
    }

    /// applies a batch atomically, refusing to rebind an immutable key to
    /// different bytes
    pub(crate) fn commit(&self, batch: Vec<BatchOp>) -> PtResult<()> {
        for op in &batch {
            if let BatchOp::Put { column, key, value } = op {
                if column.is_immutable() {
                    if let Some(existing) = self.inner.store.get(*column, key)? {
                        if &existing != value {
                            bail!(PolytopeError::Corrupt(format!(
                                "immutable record {}/{} rewritten with different contents",
                                column, key
                            )));
                        }
                    }
                }
            }
        }
        trace!("Depot::commit({} op(s))", batch.len());
        self.inner.store.write_batch(batch)
    }

    pub(crate) fn lock_workspace(&self, id: &WorkspaceId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.inner.workspace_locks.lock().entry(id.clone()).or_default(),
        )
    }

    pub(crate) fn lock_history(&self, id: &HistoryId) -> Arc<Mutex<()>> {
        Arc::clone(self.inner.history_locks.lock().entry(id.clone()).or_default())
    }
}

/// encodes a record into a batch put
pub(crate) fn stage<T: Serialize>(
    batch: &mut Vec<BatchOp>,
    column: Column,
    key: &str,
    value: &T,
) -> PtResult<()> {
    batch.push(BatchOp::Put {
        column,
        key: key.to_owned(),
        value: serde_json::to_vec(value)?,
    });
    Ok(())
}

#[cfg(test)]
mod tests;
