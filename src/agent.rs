//! Type-specific behaviour behind a closed registry: each artifact type
//! has an agent that can encode, decode, hash and three-way-merge values
//! of that type. The registry is built during startup and passed by
//! reference; persisted data always carries its type tag, so lookup
//! failures indicate corruption, not a missing feature.

pub mod dir;
pub mod text;

pub use dir::{DirConflictDetails, DirConflictKind, DirectoryAgent, DirectoryValue};
pub use text::{TextAgent, TextConflictDetails};

use crate::baseline::{Baseline, BaselineAgent};
use crate::depot::Depot;
use crate::error::{PolytopeError, PtResult};
use crate::hash::{self, ContentHash};
use crate::id::{ArtifactId, ConflictId, VersionId};
use crate::model::{ArtifactKind, ArtifactVersion};
use crate::store::{BatchOp, Column};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A decoded artifact value; the closed counterpart of [`ArtifactKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactValue {
    Text(String),
    Directory(DirectoryValue),
    Baseline(Baseline),
}

impl ArtifactValue {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactValue::Text(..) => ArtifactKind::Text,
            ArtifactValue::Directory(..) => ArtifactKind::Directory,
            ArtifactValue::Baseline(..) => ArtifactKind::Baseline,
        }
    }

    /// the empty value of a kind, used as the ancestor when both sides
    /// created an artifact independently
    pub fn empty(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Text => ArtifactValue::Text(String::new()),
            ArtifactKind::Directory => ArtifactValue::Directory(DirectoryValue::default()),
            ArtifactKind::Baseline => ArtifactValue::Baseline(Baseline::default()),
        }
    }

    pub fn into_text(self) -> PtResult<String> {
        match self {
            ArtifactValue::Text(text) => Ok(text),
            value => bail!(PolytopeError::Internal(format!(
                "expected a text value, found {}",
                value.kind()
            ))),
        }
    }

    pub fn into_directory(self) -> PtResult<DirectoryValue> {
        match self {
            ArtifactValue::Directory(dir) => Ok(dir),
            value => bail!(PolytopeError::Internal(format!(
                "expected a directory value, found {}",
                value.kind()
            ))),
        }
    }

    pub fn into_baseline(self) -> PtResult<Baseline> {
        match self {
            ArtifactValue::Baseline(baseline) => Ok(baseline),
            value => bail!(PolytopeError::Internal(format!(
                "expected a baseline value, found {}",
                value.kind()
            ))),
        }
    }
}

/// Identifies the artifact and versions participating in a merge; the
/// labels end up in user-visible conflict markers.
#[derive(Debug, Clone)]
pub struct MergeInput {
    pub artifact: ArtifactId,
    pub ancestor_version: Option<VersionId>,
    pub source_version: Option<VersionId>,
    pub target_version: Option<VersionId>,
    pub source_label: String,
    pub target_label: String,
}

impl MergeInput {
    pub fn new(
        artifact: ArtifactId,
        ancestor_version: Option<VersionId>,
        source_version: Option<VersionId>,
        target_version: Option<VersionId>,
    ) -> Self {
        let source_label =
            source_version.as_ref().map(|v| v.short().to_owned()).unwrap_or_else(|| "source".to_owned());
        let target_label =
            target_version.as_ref().map(|v| v.short().to_owned()).unwrap_or_else(|| "target".to_owned());
        Self { artifact, ancestor_version, source_version, target_version, source_label, target_label }
    }

    pub fn with_labels(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_label = source.into();
        self.target_label = target.into();
        self
    }
}

/// A user-visible merge conflict. `details` is an agent-specific encoded
/// payload; callers display it without the core knowing the layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub id: ConflictId,
    pub artifact: ArtifactId,
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<VersionId>,
    pub details: Vec<u8>,
}

impl MergeConflict {
    pub fn details_as<T: DeserializeOwned>(&self) -> PtResult<T> {
        Ok(serde_json::from_slice(&self.details)?)
    }
}

/// Outcome of a three-way merge. `proposed` is always populated with a
/// best-effort result, even when conflicts exist, so the workspace can
/// materialise a file the user can edit.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub kind: ArtifactKind,
    pub artifact: ArtifactId,
    pub ancestor_version: Option<VersionId>,
    pub source_version: Option<VersionId>,
    pub target_version: Option<VersionId>,
    pub proposed: Vec<u8>,
    pub conflicts: Vec<MergeConflict>,
}

impl MergeResult {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Carries depot access through a merge so nested merges (the baseline
/// agent recursing into per-artifact agents) can read versions and stage
/// new ones. Staged writes only reach the store when the caller commits
/// the whole operation's batch.
pub struct MergeCtxt<'a> {
    depot: &'a Depot,
    batch: Vec<BatchOp>,
}

impl<'a> MergeCtxt<'a> {
    pub fn new(depot: &'a Depot) -> Self {
        Self { depot, batch: vec![] }
    }

    pub fn depot(&self) -> &'a Depot {
        self.depot
    }

    pub fn registry(&self) -> &'a AgentRegistry {
        self.depot.registry()
    }

    pub fn stage_version(&mut self, version: &ArtifactVersion) -> PtResult<()> {
        trace!("MergeCtxt::stage_version(id: {}, artifact: {})", version.id, version.artifact);
        self.batch.push(BatchOp::Put {
            column: Column::Versions,
            key: version.id.as_str().to_owned(),
            value: serde_json::to_vec(version)?,
        });
        Ok(())
    }

    pub fn into_batch(self) -> Vec<BatchOp> {
        self.batch
    }
}

impl std::fmt::Debug for dyn Agent + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Agent({})", self.kind())
    }
}

pub trait Agent: Send + Sync {
    fn kind(&self) -> ArtifactKind;

    fn encode(&self, value: &ArtifactValue) -> PtResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> PtResult<ArtifactValue>;

    /// hash over the encoded form so the digest is stable across processes
    fn content_hash(&self, value: &ArtifactValue) -> PtResult<ContentHash> {
        Ok(hash::hash_bytes(self.encode(value)?))
    }

    fn merge(
        &self,
        ctxt: &mut MergeCtxt<'_>,
        input: &MergeInput,
        ancestor: &[u8],
        source: &[u8],
        target: &[u8],
    ) -> PtResult<MergeResult>;

    /// file agents materialise values to the workspace tree
    fn can_handle(&self, _path: &Path) -> bool {
        false
    }

    fn read_from_disk(&self, path: &Path) -> PtResult<Vec<u8>> {
        bail!(PolytopeError::InvalidParameter(format!(
            "{} artifacts cannot be read from `{}`",
            self.kind(),
            path.display()
        )))
    }

    fn write_to_disk(&self, _bytes: &[u8], path: &Path) -> PtResult<()> {
        bail!(PolytopeError::InvalidParameter(format!(
            "{} artifacts cannot be written to `{}`",
            self.kind(),
            path.display()
        )))
    }
}

/// The extension lookup table the registry consumes when a path must be
/// mapped to an artifact type. Detection itself is a plain table; the
/// interesting behaviour lives in the agents.
pub struct FileTypeTable {
    by_extension: FxHashMap<String, ArtifactKind>,
    fallback: ArtifactKind,
}

impl FileTypeTable {
    pub fn standard() -> Self {
        Self { by_extension: FxHashMap::default(), fallback: ArtifactKind::Text }
    }

    pub fn register_extension(&mut self, extension: impl Into<String>, kind: ArtifactKind) {
        self.by_extension.insert(extension.into(), kind);
    }

    pub fn kind_for_path(&self, path: &Path) -> ArtifactKind {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.by_extension.get(ext).copied())
            .unwrap_or(self.fallback)
    }
}

impl Default for FileTypeTable {
    fn default() -> Self {
        Self::standard()
    }
}

pub struct AgentRegistry {
    agents: FxHashMap<ArtifactKind, Box<dyn Agent>>,
    file_types: FileTypeTable,
}

impl AgentRegistry {
    pub fn new(file_types: FileTypeTable) -> Self {
        Self { agents: FxHashMap::default(), file_types }
    }

    /// registry with the built-in text, directory and baseline agents
    pub fn standard() -> Self {
        let mut registry = Self::new(FileTypeTable::standard());
        registry.register(Box::new(TextAgent));
        registry.register(Box::new(DirectoryAgent));
        registry.register(Box::new(BaselineAgent));
        registry
    }

    /// registration occurs during startup only, before any artifact of the
    /// agent's type is loaded
    pub fn register(&mut self, agent: Box<dyn Agent>) {
        self.agents.insert(agent.kind(), agent);
    }

    pub fn agent(&self, kind: ArtifactKind) -> PtResult<&dyn Agent> {
        match self.agents.get(&kind) {
            Some(agent) => Ok(agent.as_ref()),
            None => bail!(PolytopeError::Corrupt(format!(
                "no agent registered for artifact type `{}`",
                kind
            ))),
        }
    }

    /// the agent responsible for a workspace file path
    pub fn agent_for_path(&self, path: &Path) -> PtResult<&dyn Agent> {
        let agent = self.agent(self.file_types.kind_for_path(path))?;
        ensure!(
            agent.can_handle(path),
            PolytopeError::InvalidParameter(format!(
                "no agent can handle file `{}`",
                path.display()
            ))
        );
        Ok(agent)
    }

    pub fn file_types(&self) -> &FileTypeTable {
        &self.file_types
    }

    pub fn decode(&self, kind: ArtifactKind, bytes: &[u8]) -> PtResult<ArtifactValue> {
        self.agent(kind)?.decode(bytes)
    }

    pub fn encode(&self, value: &ArtifactValue) -> PtResult<Vec<u8>> {
        self.agent(value.kind())?.encode(value)
    }
}

#[cfg(test)]
mod tests;
