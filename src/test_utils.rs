use crate::agent::{Agent, MergeCtxt, MergeInput, MergeResult};
use crate::config::CoreConfig;
use crate::depot::{stage, Depot};
use crate::error::PtResult;
use crate::id::{ArtifactId, ProjectId, VersionId};
use crate::model::{Artifact, ArtifactKind, ArtifactVersion};
use crate::store::Column;
use crate::workspace::Workspace;
use chrono::Utc;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_depot() -> Depot {
    init_logger();
    Depot::in_memory_with_config(CoreConfig::with_user("tester"))
}

/// depot with a `test` project, plus a workspace `mytest` on `main` with
/// an open change `test-change` — the S1 fixture
pub fn test_fixture() -> PtResult<(Depot, Workspace)> {
    let depot = test_depot();
    depot.create_project("test", "a test project")?;
    let workspace = depot.create_workspace("test", "main", "mytest", "scratch")?;
    workspace.create_change("test-change")?;
    Ok((depot, workspace))
}

pub fn text_bytes(lines: &[&str]) -> Vec<u8> {
    lines.concat().into_bytes()
}

/// writes a bare artifact record, outside any project tree
pub fn plant_artifact(depot: &Depot, kind: ArtifactKind) -> PtResult<ArtifactId> {
    let artifact = Artifact {
        id: ArtifactId::fresh(),
        kind,
        timestamp: Utc::now(),
        creator: depot.config().user.clone(),
        project: ProjectId::fresh(),
        metadata: Default::default(),
    };
    let mut batch = vec![];
    stage(&mut batch, Column::Artifacts, artifact.id.as_str(), &artifact)?;
    depot.commit(batch)?;
    Ok(artifact.id)
}

/// writes a version of a planted artifact
pub fn plant_version(
    depot: &Depot,
    artifact: &ArtifactId,
    content: Vec<u8>,
    parents: Vec<VersionId>,
) -> PtResult<VersionId> {
    let version = ArtifactVersion {
        id: VersionId::fresh(),
        artifact: artifact.clone(),
        creator: depot.config().user.clone(),
        timestamp: Utc::now(),
        content,
        parents: parents.into_iter().collect(),
        metadata: Default::default(),
    };
    let mut batch = vec![];
    stage(&mut batch, Column::Versions, version.id.as_str(), &version)?;
    depot.commit(batch)?;
    Ok(version.id)
}

/// runs a three-way merge through the registered agent for `kind` with
/// fabricated version ids and the labels `source`/`target`
pub fn raw_merge(
    depot: &Depot,
    kind: ArtifactKind,
    ancestor: &[u8],
    source: &[u8],
    target: &[u8],
) -> PtResult<MergeResult> {
    let input = MergeInput::new(
        ArtifactId::fresh(),
        Some(VersionId::fresh()),
        Some(VersionId::fresh()),
        Some(VersionId::fresh()),
    )
    .with_labels("source", "target");
    let mut ctxt = MergeCtxt::new(depot);
    depot.registry().agent(kind)?.merge(&mut ctxt, &input, ancestor, source, target)
}
