//! Projects and their history tree. A history is a linear sequence of
//! baseline versions; advancing a tip is a compare-and-swap serialised per
//! history, so a stale deliver fails `OutOfDate` instead of clobbering
//! concurrent progress.

use crate::agent::ArtifactValue;
use crate::baseline::Baseline;
use crate::depot::{stage, Depot};
use crate::error::{PolytopeError, PtResult};
use crate::id::{ArtifactId, HistoryId, ProjectId, VersionId};
use crate::model::{
    Artifact, ArtifactKind, ArtifactVersion, History, HistoryParent, Integration, Project,
    ROOT_DIR_METADATA_KEY,
};
use crate::path;
use crate::store::{BatchOp, Column};
use chrono::Utc;
use smallvec::SmallVec;

impl Depot {
    /// Creates a project with its root history, an empty root directory and
    /// the initial baseline as step 0.
    pub fn create_project(&self, name: &str, description: &str) -> PtResult<Project> {
        debug!("Depot::create_project(name: {})", name);
        let creator = self.config().user.clone();
        self.check_access(&creator, "project.create")?;
        path::validate_name(name)?;
        if self.try_project(name)?.is_some() {
            bail!(PolytopeError::Duplicate(format!("project `{}`", name)));
        }

        let project_id = ProjectId::fresh();
        let now = Utc::now();

        let root_dir = Artifact {
            id: ArtifactId::fresh(),
            kind: ArtifactKind::Directory,
            timestamp: now,
            creator: creator.clone(),
            project: project_id.clone(),
            metadata: Default::default(),
        };
        let root_dir_version = ArtifactVersion {
            id: VersionId::fresh(),
            artifact: root_dir.id.clone(),
            creator: creator.clone(),
            timestamp: now,
            content: self.registry().encode(&ArtifactValue::Directory(Default::default()))?,
            parents: SmallVec::new(),
            metadata: Default::default(),
        };

        let baseline_artifact = Artifact {
            id: ArtifactId::fresh(),
            kind: ArtifactKind::Baseline,
            timestamp: now,
            creator: creator.clone(),
            project: project_id.clone(),
            metadata: [(ROOT_DIR_METADATA_KEY.to_owned(), root_dir.id.as_str().to_owned())]
                .into_iter()
                .collect(),
        };
        let mut baseline = Baseline::new();
        baseline.set(root_dir.id.clone(), root_dir_version.id.clone());
        let baseline_version = ArtifactVersion {
            id: VersionId::fresh(),
            artifact: baseline_artifact.id.clone(),
            creator: creator.clone(),
            timestamp: now,
            content: self.registry().encode(&ArtifactValue::Baseline(baseline))?,
            parents: SmallVec::new(),
            metadata: Default::default(),
        };

        let history = History {
            id: HistoryId::fresh(),
            project: project_id.clone(),
            name: self.config().main_history.clone(),
            parent: None,
            steps: vec![baseline_version.id.clone()],
            integrations: vec![],
        };
        let project = Project {
            id: project_id,
            name: name.to_owned(),
            description: description.to_owned(),
            root_history: history.id.clone(),
        };

        let mut batch = vec![];
        stage(&mut batch, Column::Artifacts, root_dir.id.as_str(), &root_dir)?;
        stage(&mut batch, Column::Versions, root_dir_version.id.as_str(), &root_dir_version)?;
        stage(&mut batch, Column::Artifacts, baseline_artifact.id.as_str(), &baseline_artifact)?;
        stage(&mut batch, Column::Versions, baseline_version.id.as_str(), &baseline_version)?;
        stage(&mut batch, Column::Histories, history.id.as_str(), &history)?;
        stage(&mut batch, Column::Projects, &project.name, &project)?;
        self.commit(batch)?;

        info!("created project `{}` with root history `{}`", project.name, history.id);
        Ok(project)
    }

    /// Creates a child history branching at `step` of `parent`.
    pub fn create_history(
        &self,
        project: &Project,
        name: &str,
        parent: &HistoryId,
        step: usize,
    ) -> PtResult<History> {
        debug!("Depot::create_history(project: {}, name: {})", project.name, name);
        self.check_access(&self.config().user, "history.create")?;
        path::validate_name(name)?;
        let parent_history = self.history(parent)?;
        let base_step = match parent_history.steps.get(step) {
            Some(version) => version.clone(),
            None => bail!(PolytopeError::InvalidParameter(format!(
                "history `{}` has no step {}",
                parent, step
            ))),
        };
        if self.histories_of(&project.id)?.iter().any(|h| h.name == name) {
            bail!(PolytopeError::Duplicate(format!(
                "history `{}` in project `{}`",
                name, project.name
            )));
        }

        let history = History {
            id: HistoryId::fresh(),
            project: project.id.clone(),
            name: name.to_owned(),
            parent: Some(HistoryParent { history: parent.clone(), step }),
            steps: vec![base_step],
            integrations: vec![],
        };
        let mut batch = vec![];
        stage(&mut batch, Column::Histories, history.id.as_str(), &history)?;
        self.commit(batch)?;
        Ok(history)
    }

    pub fn resolve_history(&self, project: &Project, name: &str) -> PtResult<History> {
        match self.histories_of(&project.id)?.into_iter().find(|h| h.name == name) {
            Some(history) => Ok(history),
            None => bail!(PolytopeError::NotFound(format!(
                "history `{}` in project `{}`",
                name, project.name
            ))),
        }
    }

    pub fn history_tip(&self, id: &HistoryId) -> PtResult<VersionId> {
        Ok(self.history(id)?.tip()?.clone())
    }

    /// the history's steps, newest first
    pub fn history_log(&self, id: &HistoryId) -> PtResult<Vec<VersionId>> {
        let mut steps = self.history(id)?.steps;
        steps.reverse();
        Ok(steps)
    }

    /// Appends a step to the history iff its tip still equals `expected`;
    /// `extra` commits in the same batch so the caller's state moves with
    /// the tip or not at all.
    pub(crate) fn advance_tip(
        &self,
        history_id: &HistoryId,
        expected: &VersionId,
        next: VersionId,
        mut extra: Vec<BatchOp>,
    ) -> PtResult<History> {
        let lock = self.lock_history(history_id);
        let _guard = lock.lock();

        let mut history = self.history(history_id)?;
        let tip = history.tip()?.clone();
        if &tip != expected {
            bail!(PolytopeError::OutOfDate {
                history: history_id.clone(),
                expected: expected.clone(),
                actual: tip,
            });
        }
        debug!("Depot::advance_tip(history: {}, step: {})", history_id, history.steps.len());
        history.steps.push(next);
        stage(&mut extra, Column::Histories, history.id.as_str(), &history)?;
        self.commit(extra)?;
        Ok(history)
    }

    /// Records an integration on a history and commits `extra` in the same
    /// batch; the history lock is held across the commit so a concurrent
    /// tip advance is not clobbered.
    pub(crate) fn record_integration(
        &self,
        history_id: &HistoryId,
        integration: Integration,
        mut extra: Vec<BatchOp>,
    ) -> PtResult<()> {
        let lock = self.lock_history(history_id);
        let _guard = lock.lock();
        let mut history = self.history(history_id)?;
        history.integrations.push(integration);
        stage(&mut extra, Column::Histories, history.id.as_str(), &history)?;
        self.commit(extra)
    }

    /// The baseline version at which two histories diverged, if they are
    /// directly related (parent/child or siblings under one parent).
    pub(crate) fn fork_version(&self, a: &History, b: &History) -> PtResult<Option<VersionId>> {
        let step_version = |h: &History, step: usize| -> PtResult<VersionId> {
            match h.steps.get(step) {
                Some(version) => Ok(version.clone()),
                None => bail!(PolytopeError::Corrupt(format!(
                    "history `{}` fork step {} out of range",
                    h.id, step
                ))),
            }
        };
        if let Some(parent) = &a.parent {
            if parent.history == b.id {
                return Ok(Some(step_version(b, parent.step)?));
            }
        }
        if let Some(parent) = &b.parent {
            if parent.history == a.id {
                return Ok(Some(step_version(a, parent.step)?));
            }
        }
        if let (Some(pa), Some(pb)) = (&a.parent, &b.parent) {
            if pa.history == pb.history {
                let parent = self.history(&pa.history)?;
                return Ok(Some(step_version(&parent, pa.step.min(pb.step))?));
            }
        }
        Ok(None)
    }
}
