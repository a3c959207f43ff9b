//! The workspace: a user's mutable staging area. It projects a baseline
//! onto a path tree, records edits as dirty state, and drives the save /
//! update / integrate / deliver operations. Every operation holds the
//! workspace's lock for its full duration and lands its writes in one
//! atomic batch.

use crate::agent::{DirectoryValue, MergeConflict, MergeCtxt};
use crate::baseline::{plan_merge, Baseline, BaselineDecision};
use crate::depot::{stage, Depot};
use crate::error::{PolytopeError, PtResult};
use crate::id::{ArtifactId, ChangeId, ConflictId, SavePointId, VersionId, WorkspaceId};
use crate::model::{
    Artifact, ArtifactKind, ArtifactVersion, Change, ChangeStatus, DirtyEntry, History,
    Integration, SavePoint, SavePointBasis, WorkspaceRecord,
};
use crate::path;
use crate::store::{BatchOp, Column};
use chrono::Utc;
use itertools::Itertools;
use rustc_hash::FxHashSet;
use smallvec::{smallvec, SmallVec};
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::mem;

/// Handle to a workspace; operations load the record fresh under the
/// workspace lock, so handles are cheap and freely cloneable.
#[derive(Clone)]
pub struct Workspace {
    depot: Depot,
    id: WorkspaceId,
}

impl Debug for Workspace {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace").field("id", &self.id).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceStatus {
    pub dirty: Vec<ArtifactId>,
    pub removed: Vec<ArtifactId>,
    pub conflicts: usize,
    pub open_change: Option<ChangeId>,
    pub basis: VersionId,
}

/// outcome of an `update` or `integrate`
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub advanced: bool,
    pub conflicts: Vec<MergeConflict>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceEntry {
    pub path: String,
    pub artifact: ArtifactId,
    pub kind: ArtifactKind,
}

impl Depot {
    pub fn create_workspace(
        &self,
        project_name: &str,
        history_name: &str,
        name: &str,
        description: &str,
    ) -> PtResult<Workspace> {
        debug!("Depot::create_workspace(project: {}, name: {})", project_name, name);
        let owner = self.config().user.clone();
        self.check_access(&owner, "workspace.create")?;
        let project = self.project(project_name)?;
        let history = self.resolve_history(&project, history_name)?;
        if self.workspaces_of(&project.id)?.iter().any(|w| w.name == name) {
            bail!(PolytopeError::Duplicate(format!(
                "workspace `{}` in project `{}`",
                name, project_name
            )));
        }

        let basis = history.tip()?.clone();
        let baseline = self.baseline_at(&basis)?;
        let baseline_artifact = self.version(&basis)?.artifact;
        let root_dir = self.artifact(&baseline_artifact)?.root_dir()?;

        let record = WorkspaceRecord {
            id: WorkspaceId::fresh(),
            name: name.to_owned(),
            description: description.to_owned(),
            project: project.id,
            history: history.id,
            owner,
            baseline_version: basis.clone(),
            basis,
            baseline,
            baseline_artifact,
            root_dir,
            open_change: None,
            dirty: BTreeMap::new(),
            removed: Default::default(),
            conflicts: vec![],
            pending_integration: None,
        };
        let mut batch = vec![];
        stage(&mut batch, Column::Workspaces, record.id.as_str(), &record)?;
        self.commit(batch)?;
        Ok(Workspace { depot: self.clone(), id: record.id })
    }

    pub fn open_workspace(&self, id: &WorkspaceId) -> PtResult<Workspace> {
        self.workspace_record(id)?;
        Ok(Workspace { depot: self.clone(), id: id.clone() })
    }

    pub fn find_workspace(&self, project_name: &str, name: &str) -> PtResult<Workspace> {
        let project = self.project(project_name)?;
        match self.workspaces_of(&project.id)?.into_iter().find(|w| w.name == name) {
            Some(record) => Ok(Workspace { depot: self.clone(), id: record.id }),
            None => bail!(PolytopeError::NotFound(format!(
                "workspace `{}` in project `{}`",
                name, project_name
            ))),
        }
    }
}

struct WsCtxt<'a> {
    depot: &'a Depot,
    rec: WorkspaceRecord,
    batch: Vec<BatchOp>,
}

impl WsCtxt<'_> {
    /// dirty-aware content of an artifact
    fn content_of(&self, id: &ArtifactId) -> PtResult<Vec<u8>> {
        if let Some(entry) = self.rec.dirty.get(id) {
            return Ok(entry.content.clone());
        }
        match self.rec.baseline.get(id) {
            Some(version) => Ok(self.depot.version(version)?.content),
            None => bail!(PolytopeError::NotFound(format!(
                "artifact `{}` in workspace baseline",
                id
            ))),
        }
    }

    fn kind_of(&self, id: &ArtifactId) -> PtResult<ArtifactKind> {
        if let Some(entry) = self.rec.dirty.get(id) {
            return Ok(entry.kind);
        }
        Ok(self.depot.artifact(id)?.kind)
    }

    fn directory_value(&self, id: &ArtifactId) -> PtResult<DirectoryValue> {
        let bytes = self.content_of(id)?;
        self.depot.registry().decode(ArtifactKind::Directory, &bytes)?.into_directory()
    }

    /// records a directory's new bindings as dirty content
    fn stage_dir(&mut self, id: &ArtifactId, dir: &DirectoryValue) -> PtResult<()> {
        let content = serde_json::to_vec(dir)?;
        match self.rec.dirty.get_mut(id) {
            Some(entry) => entry.content = content,
            None => {
                let parents =
                    self.rec.baseline.get(id).cloned().into_iter().collect::<SmallVec<_>>();
                self.rec.dirty.insert(
                    id.clone(),
                    DirtyEntry { kind: ArtifactKind::Directory, content, parents },
                );
            }
        }
        Ok(())
    }

    /// walks bindings from the root; `Ok(None)` when some component is
    /// unbound, `NotADirectory` when the walk hits a file part way
    fn try_resolve(&self, target: &str) -> PtResult<Option<ArtifactId>> {
        let mut current = self.rec.root_dir.clone();
        let mut walked = String::new();
        for component in path::components(target)? {
            if self.kind_of(&current)? != ArtifactKind::Directory {
                bail!(PolytopeError::NotADirectory(walked));
            }
            let dir = self.directory_value(&current)?;
            match dir.get(component) {
                Some(next) => current = next.clone(),
                None => return Ok(None),
            }
            walked = path::join(&walked, component);
        }
        Ok(Some(current))
    }

    fn resolve(&self, target: &str) -> PtResult<ArtifactId> {
        match self.try_resolve(target)? {
            Some(id) => Ok(id),
            None => bail!(PolytopeError::NotFound(format!("path `{}`", target))),
        }
    }

    /// resolves the parent directory of `full`; intermediate directories
    /// are never created implicitly
    fn resolve_parent_dir(&self, parent: &str, full: &str) -> PtResult<ArtifactId> {
        let id = match self.try_resolve(parent)? {
            Some(id) => id,
            None => bail!(PolytopeError::ParentMissing(full.to_owned())),
        };
        if self.kind_of(&id)? != ArtifactKind::Directory {
            bail!(PolytopeError::NotADirectory(parent.to_owned()));
        }
        Ok(id)
    }

    /// walks every binding reachable from the root directory; the root
    /// itself appears as "". Fails `Corrupt` when an artifact is reachable
    /// twice (a cycle or a double binding).
    fn walk_entries(&self) -> PtResult<Vec<WorkspaceEntry>> {
        let mut entries = vec![WorkspaceEntry {
            path: String::new(),
            artifact: self.rec.root_dir.clone(),
            kind: ArtifactKind::Directory,
        }];
        let mut visited = FxHashSet::default();
        visited.insert(self.rec.root_dir.clone());
        let mut stack = vec![(String::new(), self.rec.root_dir.clone())];
        while let Some((prefix, dir_id)) = stack.pop() {
            let dir = self.directory_value(&dir_id)?;
            for (name, id) in dir.iter() {
                let entry_path = path::join(&prefix, name);
                if !visited.insert(id.clone()) {
                    bail!(PolytopeError::Corrupt(format!(
                        "artifact `{}` reachable twice in the directory graph (at `{}`)",
                        id, entry_path
                    )));
                }
                let kind = self.kind_of(id)?;
                if kind == ArtifactKind::Directory {
                    stack.push((entry_path.clone(), id.clone()));
                }
                entries.push(WorkspaceEntry { path: entry_path, artifact: id.clone(), kind });
            }
        }
        Ok(entries.into_iter().sorted_by(|a, b| a.path.cmp(&b.path)).collect())
    }
}

impl Workspace {
    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    pub(crate) fn depot(&self) -> &Depot {
        &self.depot
    }

    pub fn record(&self) -> PtResult<WorkspaceRecord> {
        self.depot.workspace_record(&self.id)
    }

    fn authorize(&self, operation: &str, rec: &WorkspaceRecord) -> PtResult<()> {
        let user = &self.depot.config().user;
        self.depot.check_access(user, operation)?;
        // a workspace is owned exclusively by one user
        if &rec.owner != user {
            bail!(PolytopeError::Unauthorized(format!(
                "workspace `{}` is owned by `{}`",
                rec.name, rec.owner
            )));
        }
        Ok(())
    }

    fn run_read<T>(&self, f: impl FnOnce(&WsCtxt<'_>) -> PtResult<T>) -> PtResult<T> {
        let lock = self.depot.lock_workspace(&self.id);
        let _guard = lock.lock();
        let rec = self.depot.workspace_record(&self.id)?;
        let ctxt = WsCtxt { depot: &self.depot, rec, batch: vec![] };
        f(&ctxt)
    }

    /// runs `f` under the workspace lock and commits its batch plus the
    /// updated record atomically
    fn run_mutate<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut WsCtxt<'_>) -> PtResult<T>,
    ) -> PtResult<T> {
        let lock = self.depot.lock_workspace(&self.id);
        let _guard = lock.lock();
        let rec = self.depot.workspace_record(&self.id)?;
        self.authorize(operation, &rec)?;
        let mut ctxt = WsCtxt { depot: &self.depot, rec, batch: vec![] };
        let out = f(&mut ctxt)?;
        stage(&mut ctxt.batch, Column::Workspaces, self.id.as_str(), &ctxt.rec)?;
        self.depot.commit(ctxt.batch)?;
        Ok(out)
    }

    /// like `run_mutate` but `f` stages the record and commits itself;
    /// used where the commit must ride on a history lock
    fn run_manual<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut WsCtxt<'_>) -> PtResult<T>,
    ) -> PtResult<T> {
        let lock = self.depot.lock_workspace(&self.id);
        let _guard = lock.lock();
        let rec = self.depot.workspace_record(&self.id)?;
        self.authorize(operation, &rec)?;
        let mut ctxt = WsCtxt { depot: &self.depot, rec, batch: vec![] };
        f(&mut ctxt)
    }

    pub fn list_paths(&self) -> PtResult<Vec<String>> {
        Ok(self.entries()?.into_iter().map(|entry| entry.path).collect())
    }

    /// the reachable tree as `(path, artifact, kind)` entries, path-sorted
    pub fn entries(&self) -> PtResult<Vec<WorkspaceEntry>> {
        self.run_read(|ctxt| ctxt.walk_entries())
    }

    /// current (dirty-aware) content at a path
    pub fn read_file(&self, target: &str) -> PtResult<Vec<u8>> {
        self.run_read(|ctxt| ctxt.content_of(&ctxt.resolve(target)?))
    }

    pub fn status(&self) -> PtResult<WorkspaceStatus> {
        self.run_read(|ctxt| {
            Ok(WorkspaceStatus {
                dirty: ctxt.rec.dirty.keys().cloned().collect(),
                removed: ctxt.rec.removed.iter().cloned().collect(),
                conflicts: ctxt.rec.conflicts.len(),
                open_change: ctxt.rec.open_change.clone(),
                basis: ctxt.rec.basis.clone(),
            })
        })
    }

    /// Creates a new artifact with an initial version and binds it at
    /// `target`. Parent directories must already exist.
    pub fn add_file(
        &self,
        target: &str,
        kind: ArtifactKind,
        content: Vec<u8>,
    ) -> PtResult<ArtifactId> {
        self.run_mutate("workspace.add_file", |ctxt| {
            debug!("Workspace::add_file(path: {}, kind: {})", target, kind);
            if kind == ArtifactKind::Baseline {
                bail!(PolytopeError::InvalidParameter(
                    "baseline artifacts cannot be bound in the tree".to_owned()
                ));
            }
            if let Err(err) = ctxt.depot.registry().decode(kind, &content) {
                bail!(PolytopeError::InvalidParameter(format!(
                    "content does not decode as {}: {}",
                    kind, err
                )));
            }
            let (parent_path, name) = path::parent_and_name(target)?;
            let parent = ctxt.resolve_parent_dir(parent_path, target)?;
            let mut dir = ctxt.directory_value(&parent)?;
            if dir.get(name).is_some() {
                bail!(PolytopeError::PathExists(target.to_owned()));
            }

            let artifact = Artifact {
                id: ArtifactId::fresh(),
                kind,
                timestamp: Utc::now(),
                creator: ctxt.rec.owner.clone(),
                project: ctxt.rec.project.clone(),
                metadata: Default::default(),
            };
            stage(&mut ctxt.batch, Column::Artifacts, artifact.id.as_str(), &artifact)?;
            ctxt.rec.dirty.insert(
                artifact.id.clone(),
                DirtyEntry { kind, content, parents: smallvec![] },
            );
            dir.bind(name, artifact.id.clone())?;
            ctxt.stage_dir(&parent, &dir)?;
            Ok(artifact.id)
        })
    }

    pub fn add_directory(&self, target: &str) -> PtResult<ArtifactId> {
        self.add_file(target, ArtifactKind::Directory, serde_json::to_vec(&DirectoryValue::new())?)
    }

    /// Replaces the dirty content at `target`; promoted to a version on
    /// `save`.
    pub fn modify_file(&self, target: &str, content: Vec<u8>) -> PtResult<()> {
        self.run_mutate("workspace.modify_file", |ctxt| {
            debug!("Workspace::modify_file(path: {})", target);
            let id = ctxt.resolve(target)?;
            let kind = ctxt.kind_of(&id)?;
            if kind != ArtifactKind::Text {
                bail!(PolytopeError::InvalidParameter(format!(
                    "`{}` is a {}; only file content can be modified directly",
                    target, kind
                )));
            }
            if let Err(err) = ctxt.depot.registry().decode(kind, &content) {
                bail!(PolytopeError::InvalidParameter(format!(
                    "content does not decode as {}: {}",
                    kind, err
                )));
            }
            match ctxt.rec.dirty.get_mut(&id) {
                Some(entry) => entry.content = content,
                None => {
                    let parents =
                        ctxt.rec.baseline.get(&id).cloned().into_iter().collect::<SmallVec<_>>();
                    ctxt.rec.dirty.insert(id, DirtyEntry { kind, content, parents });
                }
            }
            Ok(())
        })
    }

    /// Rebinds the artifact at `src` under `dst`. Successive moves of one
    /// artifact read back as a single rename, because directory change
    /// logs are derived by diffing values, not by replaying operations.
    pub fn move_file(&self, src: &str, dst: &str) -> PtResult<()> {
        self.run_mutate("workspace.move_file", |ctxt| {
            debug!("Workspace::move_file(src: {}, dst: {})", src, dst);
            if src == dst {
                bail!(PolytopeError::InvalidParameter(format!(
                    "source and destination are both `{}`",
                    src
                )));
            }
            let (src_parent_path, src_name) = path::parent_and_name(src)?;
            let (dst_parent_path, dst_name) = path::parent_and_name(dst)?;
            let id = ctxt.resolve(src)?;
            if ctxt.kind_of(&id)? == ArtifactKind::Directory && path::is_within(dst, src) {
                bail!(PolytopeError::InvalidParameter(format!(
                    "cannot move `{}` underneath itself",
                    src
                )));
            }
            let src_parent = ctxt.resolve_parent_dir(src_parent_path, src)?;
            let dst_parent = ctxt.resolve_parent_dir(dst_parent_path, dst)?;

            if src_parent == dst_parent {
                let mut dir = ctxt.directory_value(&src_parent)?;
                if dir.get(dst_name).is_some() {
                    bail!(PolytopeError::PathExists(dst.to_owned()));
                }
                dir.unbind(src_name);
                dir.bind(dst_name, id)?;
                ctxt.stage_dir(&src_parent, &dir)?;
            } else {
                let mut src_dir = ctxt.directory_value(&src_parent)?;
                let mut dst_dir = ctxt.directory_value(&dst_parent)?;
                if dst_dir.get(dst_name).is_some() {
                    bail!(PolytopeError::PathExists(dst.to_owned()));
                }
                src_dir.unbind(src_name);
                dst_dir.bind(dst_name, id)?;
                ctxt.stage_dir(&src_parent, &src_dir)?;
                ctxt.stage_dir(&dst_parent, &dst_dir)?;
            }
            Ok(())
        })
    }

    /// Unbinds `target` (recursively for directories) and returns the
    /// detached artifact ids; they remain reachable via prior versions.
    pub fn delete_file(&self, target: &str) -> PtResult<Vec<ArtifactId>> {
        self.run_mutate("workspace.delete_file", |ctxt| {
            debug!("Workspace::delete_file(path: {})", target);
            let (parent_path, name) = path::parent_and_name(target)?;
            let id = ctxt.resolve(target)?;
            let parent = ctxt.resolve_parent_dir(parent_path, target)?;

            let mut detached = vec![];
            let mut visited = FxHashSet::default();
            let mut stack = vec![id];
            while let Some(current) = stack.pop() {
                if !visited.insert(current.clone()) {
                    bail!(PolytopeError::Corrupt(format!(
                        "artifact `{}` reachable twice under `{}`",
                        current, target
                    )));
                }
                if ctxt.kind_of(&current)? == ArtifactKind::Directory {
                    let dir = ctxt.directory_value(&current)?;
                    for (_, child) in dir.iter() {
                        stack.push(child.clone());
                    }
                }
                detached.push(current);
            }

            let mut dir = ctxt.directory_value(&parent)?;
            dir.unbind(name);
            ctxt.stage_dir(&parent, &dir)?;
            for detached_id in &detached {
                ctxt.rec.dirty.remove(detached_id);
                if ctxt.rec.baseline.contains(detached_id) {
                    ctxt.rec.removed.insert(detached_id.clone());
                }
            }
            Ok(detached)
        })
    }

    /// Opens a change on the workspace's history. Switching away from an
    /// open change requires a clean workspace.
    pub fn create_change(&self, name: &str) -> PtResult<Change> {
        self.run_mutate("workspace.create_change", |ctxt| {
            debug!("Workspace::create_change(name: {})", name);
            path::validate_name(name)?;
            if ctxt.rec.open_change.is_some() && !ctxt.rec.is_clean() {
                bail!(PolytopeError::InvalidParameter(
                    "switching changes requires a clean workspace".to_owned()
                ));
            }
            if ctxt.depot.changes_of(&ctxt.rec.history)?.iter().any(|c| c.name == name) {
                bail!(PolytopeError::Duplicate(format!("change `{}` on this history", name)));
            }
            let change = Change {
                id: ChangeId::fresh(),
                name: name.to_owned(),
                history: ctxt.rec.history.clone(),
                basis: ctxt.rec.basis.clone(),
                save_points: vec![],
                status: ChangeStatus::Open,
            };
            stage(&mut ctxt.batch, Column::Changes, change.id.as_str(), &change)?;
            ctxt.rec.open_change = Some(change.id.clone());
            Ok(change)
        })
    }

    /// Attaches an existing open change; requires a clean workspace.
    pub fn select_change(&self, id: &ChangeId) -> PtResult<()> {
        self.run_mutate("workspace.select_change", |ctxt| {
            let change = ctxt.depot.change(id)?;
            if change.history != ctxt.rec.history {
                bail!(PolytopeError::InvalidParameter(format!(
                    "change `{}` belongs to another history",
                    change.name
                )));
            }
            if !change.is_open() {
                bail!(PolytopeError::InvalidParameter(format!(
                    "change `{}` is not open",
                    change.name
                )));
            }
            if !ctxt.rec.is_clean() {
                bail!(PolytopeError::InvalidParameter(
                    "switching changes requires a clean workspace".to_owned()
                ));
            }
            ctxt.rec.open_change = Some(change.id);
            Ok(())
        })
    }

    /// Promotes every dirty artifact to a new version, records the new
    /// baseline and emits a save point. Pending conflicts must be covered
    /// by `resolved`.
    pub fn save(&self, description: &str, resolved: &[ConflictId]) -> PtResult<SavePoint> {
        self.run_manual("workspace.save", |ctxt| {
            debug!("Workspace::save(description: {})", description);
            let ctxt = &mut *ctxt;
            let WsCtxt { depot, rec, batch } = ctxt;
            let depot = *depot;

            let change_id = match &rec.open_change {
                Some(id) => id.clone(),
                None => bail!(PolytopeError::InvalidParameter(
                    "workspace has no open change".to_owned()
                )),
            };
            let mut change = depot.change(&change_id)?;
            if !change.is_open() {
                bail!(PolytopeError::InvalidParameter(format!(
                    "change `{}` is not open",
                    change.name
                )));
            }

            let resolved = resolved.iter().collect::<FxHashSet<_>>();
            let pending = rec
                .conflicts
                .iter()
                .map(|c| c.id.clone())
                .filter(|id| !resolved.contains(id))
                .collect::<Vec<_>>();
            if !pending.is_empty() {
                bail!(PolytopeError::ConflictsPending(pending));
            }
            if rec.dirty.is_empty()
                && rec.removed.is_empty()
                && depot.baseline_at(&rec.baseline_version)? == rec.baseline
            {
                bail!(PolytopeError::InvalidParameter("no changes to save".to_owned()));
            }

            let now = Utc::now();
            for (id, entry) in &rec.dirty {
                let version = ArtifactVersion {
                    id: VersionId::fresh(),
                    artifact: id.clone(),
                    creator: rec.owner.clone(),
                    timestamp: now,
                    content: entry.content.clone(),
                    parents: entry.parents.clone(),
                    metadata: Default::default(),
                };
                stage(batch, Column::Versions, version.id.as_str(), &version)?;
                rec.baseline.set(id.clone(), version.id);
            }
            for id in &rec.removed {
                rec.baseline.remove(id);
            }

            let baseline_version = ArtifactVersion {
                id: VersionId::fresh(),
                artifact: rec.baseline_artifact.clone(),
                creator: rec.owner.clone(),
                timestamp: now,
                content: serde_json::to_vec(&rec.baseline)?,
                parents: smallvec![rec.baseline_version.clone()],
                metadata: Default::default(),
            };
            stage(batch, Column::Versions, baseline_version.id.as_str(), &baseline_version)?;

            let basis = match change.save_points.last() {
                Some(prior) => SavePointBasis::SavePoint(prior.clone()),
                None => {
                    let history = depot.history(&change.history)?;
                    match history.step_of(&change.basis) {
                        Some(step) => SavePointBasis::HistoryStep { history: history.id, step },
                        None => bail!(PolytopeError::Corrupt(format!(
                            "change `{}` based on version `{}` missing from history `{}`",
                            change.id, change.basis, history.id
                        ))),
                    }
                }
            };
            let basis_baseline = depot.baseline_at(&depot.save_point_basis_version(&basis)?)?;
            let save_point = SavePoint {
                id: SavePointId::fresh(),
                change: change.id.clone(),
                timestamp: now,
                description: description.to_owned(),
                basis,
                baseline_version: baseline_version.id.clone(),
                modified_artifacts: rec.baseline.diff(&basis_baseline),
            };
            stage(batch, Column::SavePoints, save_point.id.as_str(), &save_point)?;
            change.save_points.push(save_point.id.clone());
            stage(batch, Column::Changes, change.id.as_str(), &change)?;

            rec.baseline_version = baseline_version.id;
            rec.dirty.clear();
            rec.removed.clear();
            rec.conflicts.clear();
            let integration = rec.pending_integration.take().map(|(from, to)| Integration {
                from,
                to,
                merged: rec.baseline_version.clone(),
            });

            stage(batch, Column::Workspaces, rec.id.as_str(), rec)?;
            let batch = mem::take(batch);
            match integration {
                Some(integration) => depot.record_integration(&rec.history, integration, batch)?,
                None => depot.commit(batch)?,
            }
            info!(
                "saved `{}` on change `{}`: {} artifact(s) modified",
                rec.name,
                change.name,
                save_point.modified_artifacts.len()
            );
            Ok(save_point)
        })
    }

    /// Merges progress on the workspace's own history into the workspace,
    /// with the old basis as ancestor. Conflicts are materialised as dirty
    /// content the user resolves and saves.
    pub fn update(&self) -> PtResult<MergeOutcome> {
        self.run_mutate("workspace.update", |ctxt| {
            let history = ctxt.depot.history(&ctxt.rec.history)?;
            let tip = history.tip()?.clone();
            if tip == ctxt.rec.basis {
                return Ok(MergeOutcome { advanced: false, conflicts: vec![] });
            }
            debug!("Workspace::update() :: {} -> {}", ctxt.rec.basis, tip);

            let ancestor = ctxt.depot.baseline_at(&ctxt.rec.basis)?;
            let source = ctxt.depot.baseline_at(&tip)?;
            let applied = merge_into_workspace(ctxt, &ancestor, &source)?;

            ctxt.rec.basis = tip.clone();
            // a workspace with nothing of its own lands exactly on the tip
            if ctxt.rec.is_clean() && ctxt.rec.baseline == source {
                ctxt.rec.baseline_version = tip;
            }
            Ok(MergeOutcome { advanced: true, conflicts: applied.conflicts })
        })
    }

    /// Merges the changes between two baseline versions of another history
    /// into this workspace. The ancestor is the prior merge when the same
    /// range was integrated before, the fork baseline when the range
    /// starts there, and otherwise the range's own start.
    pub fn integrate(&self, from: &VersionId, to: &VersionId) -> PtResult<MergeOutcome> {
        self.run_mutate("workspace.integrate", |ctxt| {
            debug!("Workspace::integrate(from: {}, to: {})", from, to);
            let depot = ctxt.depot;
            let histories = depot.histories_of(&ctxt.rec.project)?;
            let source_history = match histories.iter().find(|h| h.step_of(to).is_some()) {
                Some(history) => history,
                None => bail!(PolytopeError::NotFound(format!(
                    "history containing version `{}`",
                    to
                ))),
            };
            match (source_history.step_of(from), source_history.step_of(to)) {
                (Some(from_step), Some(to_step)) if from_step <= to_step => {}
                (Some(_), Some(_)) => bail!(PolytopeError::InvalidParameter(
                    "integration range is reversed".to_owned()
                )),
                _ => bail!(PolytopeError::InvalidParameter(format!(
                    "`{}` is not a step of history `{}`",
                    from, source_history.id
                ))),
            }
            let target_history = depot.history(&ctxt.rec.history)?;
            if source_history.id == target_history.id {
                bail!(PolytopeError::InvalidParameter(
                    "cannot integrate a history into itself; use update".to_owned()
                ));
            }

            if depot.fork_version(source_history, &target_history)?.is_none() {
                bail!(PolytopeError::InvalidParameter(format!(
                    "histories `{}` and `{}` are unrelated",
                    source_history.name, target_history.name
                )));
            }
            // an already-integrated range merges against its own end, so
            // re-running it brings nothing new; otherwise the range start
            // (the fork baseline, when the range begins there) anchors the
            // merge
            let ancestor_version = if target_history.find_integration(from, to).is_some() {
                to.clone()
            } else {
                from.clone()
            };

            let ancestor = depot.baseline_at(&ancestor_version)?;
            let source = depot.baseline_at(to)?;
            let applied = merge_into_workspace(ctxt, &ancestor, &source)?;
            if applied.changed {
                ctxt.rec.pending_integration = Some((from.clone(), to.clone()));
            }
            Ok(MergeOutcome { advanced: applied.changed, conflicts: applied.conflicts })
        })
    }

    /// Promotes the workspace's saved tip baseline to a new history step.
    /// The tip advance is a compare-and-swap: concurrent progress fails
    /// `OutOfDate` and the caller retries after `update`.
    pub fn deliver(&self, description: &str) -> PtResult<History> {
        self.run_manual("workspace.deliver", |ctxt| {
            debug!("Workspace::deliver(description: {})", description);
            let ctxt = &mut *ctxt;
            let WsCtxt { depot, rec, batch } = ctxt;
            let depot = *depot;

            let change_id = match &rec.open_change {
                Some(id) => id.clone(),
                None => bail!(PolytopeError::InvalidParameter(
                    "workspace has no open change".to_owned()
                )),
            };
            let mut change = depot.change(&change_id)?;
            if !change.is_open() {
                bail!(PolytopeError::InvalidParameter(format!(
                    "change `{}` is not open",
                    change.name
                )));
            }
            if !rec.conflicts.is_empty() {
                bail!(PolytopeError::ConflictsPending(
                    rec.conflicts.iter().map(|c| c.id.clone()).collect()
                ));
            }
            // an update may advance the working baseline without leaving
            // dirty entries; that too must be saved before delivering
            if !rec.dirty.is_empty()
                || !rec.removed.is_empty()
                || depot.baseline_at(&rec.baseline_version)? != rec.baseline
            {
                bail!(PolytopeError::InvalidParameter(
                    "workspace has unsaved changes; save before delivering".to_owned()
                ));
            }
            if change.save_points.is_empty() {
                bail!(PolytopeError::InvalidParameter(format!(
                    "change `{}` has no save points to deliver",
                    change.name
                )));
            }

            change.status = ChangeStatus::Closed;
            stage(batch, Column::Changes, change.id.as_str(), &change)?;
            let expected = mem::replace(&mut rec.basis, rec.baseline_version.clone());
            rec.open_change = None;
            stage(batch, Column::Workspaces, rec.id.as_str(), rec)?;

            let batch = mem::take(batch);
            let history =
                depot.advance_tip(&rec.history, &expected, rec.baseline_version.clone(), batch)?;
            info!(
                "delivered change `{}` as step {} of history `{}` (\"{}\")",
                change.name,
                history.steps.len() - 1,
                history.id,
                description
            );
            Ok(history)
        })
    }

    /// Closes the open change as abandoned and resets the workspace to its
    /// basis.
    pub fn abandon_changes(&self, reason: &str) -> PtResult<()> {
        self.run_mutate("workspace.abandon_changes", |ctxt| {
            debug!("Workspace::abandon_changes(reason: {})", reason);
            let change_id = match &ctxt.rec.open_change {
                Some(id) => id.clone(),
                None => bail!(PolytopeError::InvalidParameter(
                    "workspace has no open change".to_owned()
                )),
            };
            let mut change = ctxt.depot.change(&change_id)?;
            if !change.is_open() {
                bail!(PolytopeError::InvalidParameter(format!(
                    "change `{}` is not open",
                    change.name
                )));
            }
            change.status = ChangeStatus::Abandoned { reason: reason.to_owned() };
            stage(&mut ctxt.batch, Column::Changes, change.id.as_str(), &change)?;

            ctxt.rec.open_change = None;
            ctxt.rec.dirty.clear();
            ctxt.rec.removed.clear();
            ctxt.rec.conflicts.clear();
            ctxt.rec.pending_integration = None;
            ctxt.rec.baseline = ctxt.depot.baseline_at(&ctxt.rec.basis)?;
            ctxt.rec.baseline_version = ctxt.rec.basis.clone();
            Ok(())
        })
    }
}

struct AppliedMerge {
    changed: bool,
    conflicts: Vec<MergeConflict>,
}

/// Applies a three-way baseline walk to the workspace: incoming-only
/// changes advance the baseline directly, double-sided changes become
/// dirty merge proposals, modify/delete divergences surface both outcomes.
fn merge_into_workspace(
    ctxt: &mut WsCtxt<'_>,
    ancestor: &Baseline,
    source: &Baseline,
) -> PtResult<AppliedMerge> {
    let depot = ctxt.depot;
    // unsaved removals are part of the target side: without them an
    // incoming edit to a locally-deleted artifact would silently lose
    let mut target = ctxt.rec.baseline.clone();
    for id in &ctxt.rec.removed {
        target.remove(id);
    }
    let dirty_snapshot = ctxt
        .rec
        .dirty
        .iter()
        .map(|(id, entry)| (id.clone(), entry.content.clone()))
        .collect::<BTreeMap<_, _>>();

    let mut merge_ctxt = MergeCtxt::new(depot);
    let plan = plan_merge(&mut merge_ctxt, ancestor, source, &target, &|id| {
        dirty_snapshot.get(id).cloned()
    })?;
    ctxt.batch.extend(merge_ctxt.into_batch());

    let mut new_conflicts = vec![];
    let mut changed = false;
    for (id, decision) in plan.decisions {
        if !matches!(decision, BaselineDecision::Keep) {
            changed = true;
        }
        match decision {
            BaselineDecision::Keep => {}
            BaselineDecision::TakeSource(Some(version)) => {
                ctxt.rec.baseline.set(id, version);
            }
            BaselineDecision::TakeSource(None) => {
                ctxt.rec.baseline.remove(&id);
                ctxt.rec.dirty.remove(&id);
            }
            BaselineDecision::Merge(result) => {
                let mut parents = match ctxt.rec.dirty.get(&id) {
                    Some(entry) => entry.parents.clone(),
                    None => target.get(&id).cloned().into_iter().collect::<SmallVec<_>>(),
                };
                if let Some(incoming) = source.get(&id) {
                    if !parents.contains(incoming) {
                        parents.push(incoming.clone());
                    }
                }
                new_conflicts.extend(result.conflicts.iter().cloned());
                ctxt.rec.dirty.insert(
                    id,
                    DirtyEntry { kind: result.kind, content: result.proposed, parents },
                );
            }
            BaselineDecision::ModDel { keep, conflict } => {
                if let Some(version) = keep {
                    // the surviving version stays selected even though its
                    // binding is gone; the user decides which outcome wins
                    ctxt.rec.removed.remove(&id);
                    ctxt.rec.baseline.set(id, version);
                }
                new_conflicts.push(conflict);
            }
        }
    }
    ctxt.rec.conflicts.extend(new_conflicts.iter().cloned());
    Ok(AppliedMerge { changed, conflicts: new_conflicts })
}

#[cfg(test)]
mod tests;
