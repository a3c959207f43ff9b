//! The persisted object model. Artifacts, artifact versions and save
//! points are created once and never mutated; projects, histories, changes
//! and workspace records are the mutable indices over them.

use crate::agent::MergeConflict;
use crate::baseline::Baseline;
use crate::error::{PolytopeError, PtGenericError, PtResult};
use crate::id::{
    ArtifactId, ChangeId, HistoryId, ProjectId, SavePointId, VersionId, WorkspaceId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

pub type Metadata = BTreeMap<String, String>;

/// metadata key on a baseline artifact naming the project's top-level
/// directory artifact
pub const ROOT_DIR_METADATA_KEY: &str = "root-dir";

/// metadata key on a version holding a conflict-marked merge draft; the
/// value is the number of unresolved conflicts embedded in the content
pub const UNRESOLVED_CONFLICTS_METADATA_KEY: &str = "unresolved-conflicts";

/// Closed set of artifact types; every persisted artifact carries its tag
/// and the agent registry resolves behaviour from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Text,
    Directory,
    Baseline,
}

impl ArtifactKind {
    pub fn name(self) -> &'static str {
        match self {
            ArtifactKind::Text => "text",
            ArtifactKind::Directory => "directory",
            ArtifactKind::Baseline => "baseline",
        }
    }
}

impl Display for ArtifactKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ArtifactKind {
    type Err = PtGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ArtifactKind::Text),
            "directory" => Ok(ArtifactKind::Directory),
            "baseline" => Ok(ArtifactKind::Baseline),
            _ => Err(anyhow!(PolytopeError::Corrupt(format!("unknown artifact type `{}`", s)))),
        }
    }
}

/// An identity — a file, directory or baseline — independent of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub timestamp: DateTime<Utc>,
    pub creator: String,
    pub project: ProjectId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl Artifact {
    /// the root directory recorded on a baseline artifact
    pub fn root_dir(&self) -> PtResult<ArtifactId> {
        match self.metadata.get(ROOT_DIR_METADATA_KEY) {
            Some(id) => id.parse(),
            None => bail!(PolytopeError::Corrupt(format!(
                "baseline artifact `{}` has no root directory recorded",
                self.id
            ))),
        }
    }
}

/// An immutable snapshot of an artifact's content. `parents` records the
/// immediate predecessors: zero for an initial version, one for a linear
/// edit, two or more for a merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub id: VersionId,
    pub artifact: ArtifactId,
    pub creator: String,
    pub timestamp: DateTime<Utc>,
    pub content: Vec<u8>,
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub parents: SmallVec<[VersionId; 2]>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub root_history: HistoryId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryParent {
    pub history: HistoryId,
    pub step: usize,
}

/// A recorded cross-history integration; a later integrate of the same
/// range uses `merged` as its ancestor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub from: VersionId,
    pub to: VersionId,
    pub merged: VersionId,
}

/// A linear sequence of steps, each a baseline version. Histories form a
/// parent/child tree rooted at the project's main history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub id: HistoryId,
    pub project: ProjectId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<HistoryParent>,
    pub steps: Vec<VersionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub integrations: Vec<Integration>,
}

impl History {
    /// histories are created with their initial step; an empty step list
    /// is corrupt data
    pub fn tip(&self) -> PtResult<&VersionId> {
        match self.steps.last() {
            Some(tip) => Ok(tip),
            None => bail!(PolytopeError::Corrupt(format!("history `{}` has no steps", self.id))),
        }
    }

    pub fn step_of(&self, version: &VersionId) -> Option<usize> {
        self.steps.iter().position(|step| step == version)
    }

    pub fn find_integration(&self, from: &VersionId, to: &VersionId) -> Option<&Integration> {
        // scan newest-first so a re-run of the same range sees its latest merge
        self.integrations.iter().rev().find(|i| &i.from == from && &i.to == to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ChangeStatus {
    Open,
    Closed,
    Abandoned { reason: String },
}

/// A named workflow on a history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub name: String,
    pub history: HistoryId,
    /// the history-step baseline version the change branched from
    pub basis: VersionId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub save_points: Vec<SavePointId>,
    pub status: ChangeStatus,
}

impl Change {
    pub fn is_open(&self) -> bool {
        matches!(self.status, ChangeStatus::Open)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SavePointBasis {
    /// the previous save point in the same change
    SavePoint(SavePointId),
    /// the history step the change branched from
    HistoryStep { history: HistoryId, step: usize },
}

/// An immutable checkpoint within a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavePoint {
    pub id: SavePointId,
    pub change: ChangeId,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub basis: SavePointBasis,
    pub baseline_version: VersionId,
    /// exactly the artifacts whose version differs between
    /// `baseline_version` and the baseline reached from `basis`
    pub modified_artifacts: Vec<ArtifactId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub display_name: String,
}

/// Unsaved content for a single artifact; promoted to an `ArtifactVersion`
/// with `parents` as recorded here when the workspace saves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirtyEntry {
    pub kind: ArtifactKind,
    pub content: Vec<u8>,
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub parents: SmallVec<[VersionId; 2]>,
}

/// The mutable staging state of a user's workspace. All other entities are
/// immutable or append-mostly; every mutation here happens under the
/// workspace's operation lock and lands in one atomic batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub id: WorkspaceId,
    pub name: String,
    pub description: String,
    pub project: ProjectId,
    pub history: HistoryId,
    pub owner: String,
    /// the history-step baseline version this workspace is based on
    pub basis: VersionId,
    /// the last saved (or basis) baseline version; parent of the next save
    pub baseline_version: VersionId,
    /// the current working baseline, advanced by saves and updates
    pub baseline: Baseline,
    pub baseline_artifact: ArtifactId,
    pub root_dir: ArtifactId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_change: Option<ChangeId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dirty: BTreeMap<ArtifactId, DirtyEntry>,
    /// artifacts detached since the last save; dropped from the baseline
    /// on save
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub removed: BTreeSet<ArtifactId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<MergeConflict>,
    /// an integrate whose range is recorded on the history at next save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_integration: Option<(VersionId, VersionId)>,
}

impl WorkspaceRecord {
    pub fn is_clean(&self) -> bool {
        self.dirty.is_empty() && self.removed.is_empty() && self.conflicts.is_empty()
    }
}
