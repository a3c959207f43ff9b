//! The baseline maps artifact ids to the version selected for each — the
//! "tree view" of a project at a point in time. Directory structure and
//! version selection stay decoupled: directories bind ids, the baseline
//! picks versions.

use crate::agent::{
    Agent, ArtifactValue, MergeConflict, MergeCtxt, MergeInput, MergeResult,
};
use crate::error::{PolytopeError, PtResult};
use crate::id::{ArtifactId, ConflictId, VersionId};
use crate::model::{ArtifactKind, ArtifactVersion, Metadata, UNRESOLVED_CONFLICTS_METADATA_KEY};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Baseline(BTreeMap<ArtifactId, VersionId>);

impl Baseline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ArtifactId) -> Option<&VersionId> {
        self.0.get(id)
    }

    pub fn set(&mut self, id: ArtifactId, version: VersionId) {
        self.0.insert(id, version);
    }

    pub fn remove(&mut self, id: &ArtifactId) -> Option<VersionId> {
        self.0.remove(id)
    }

    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.0.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ArtifactId> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArtifactId, &VersionId)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// ids whose selected version differs between the two baselines;
    /// presence on only one side counts as a difference
    pub fn diff(&self, other: &Baseline) -> Vec<ArtifactId> {
        self.0
            .keys()
            .chain(other.0.keys())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|&id| self.get(id) != other.get(id))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaselineConflictKind {
    /// source modified the artifact, target removed it
    #[serde(rename = "MOD_DEL")]
    ModDel,
    /// source removed the artifact, target modified it
    #[serde(rename = "DEL_MOD")]
    DelMod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineConflictDetails {
    pub kind: BaselineConflictKind,
    pub artifact: ArtifactId,
    /// the version of the non-deleted side, which the proposed baseline keeps
    pub surviving_version: VersionId,
}

/// Per-artifact outcome of walking three baselines.
pub(crate) enum BaselineDecision {
    /// target side stands as it is
    Keep,
    /// only the source changed; `None` means the source removed the artifact
    TakeSource(Option<VersionId>),
    /// both sides changed; the artifact's own agent merged the contents
    Merge(MergeResult),
    /// one side removed, the other modified; both outcomes are surfaced and
    /// the user resolves
    ModDel { keep: Option<VersionId>, conflict: MergeConflict },
}

pub(crate) struct BaselinePlan {
    pub decisions: Vec<(ArtifactId, BaselineDecision)>,
}

/// Three-way walk over the artifact-id union of three baselines. `overlay`
/// supplies unsaved target-side content (the workspace's dirty entries);
/// pass `&|_| None` when merging saved baselines only.
pub(crate) fn plan_merge(
    ctxt: &mut MergeCtxt<'_>,
    ancestor: &Baseline,
    source: &Baseline,
    target: &Baseline,
    overlay: &dyn Fn(&ArtifactId) -> Option<Vec<u8>>,
) -> PtResult<BaselinePlan> {
    let depot = ctxt.depot();
    let ids = ancestor
        .ids()
        .chain(source.ids())
        .chain(target.ids())
        .cloned()
        .collect::<BTreeSet<_>>();

    let mut decisions = vec![];
    for id in ids {
        let av = ancestor.get(&id);
        let sv = source.get(&id);
        let tv = target.get(&id);
        let dirty = overlay(&id);
        let src_changed = sv != av;
        let tgt_changed = tv != av || dirty.is_some();

        let decision = if !src_changed {
            BaselineDecision::Keep
        } else if !tgt_changed {
            BaselineDecision::TakeSource(sv.cloned())
        } else if sv == tv && dirty.is_none() {
            // both sides arrived at the same version
            BaselineDecision::Keep
        } else {
            let target_present = tv.is_some() || dirty.is_some();
            match (sv, target_present) {
                (None, true) => BaselineDecision::ModDel {
                    keep: None,
                    conflict: removal_conflict(
                        depot,
                        &id,
                        BaselineConflictKind::DelMod,
                        sv.cloned(),
                        tv.cloned(),
                        tv.or(av).cloned(),
                    )?,
                },
                (Some(survivor), false) => BaselineDecision::ModDel {
                    keep: Some(survivor.clone()),
                    conflict: removal_conflict(
                        depot,
                        &id,
                        BaselineConflictKind::ModDel,
                        sv.cloned(),
                        tv.cloned(),
                        Some(survivor.clone()),
                    )?,
                },
                (Some(source_version), true) => {
                    let artifact = depot.artifact(&id)?;
                    let agent = ctxt.registry().agent(artifact.kind)?;
                    let ancestor_bytes = match av {
                        Some(v) => depot.version(v)?.content,
                        None => agent.encode(&ArtifactValue::empty(artifact.kind))?,
                    };
                    let source_bytes = depot.version(source_version)?.content;
                    let target_bytes = match (&dirty, tv) {
                        (Some(content), _) => content.clone(),
                        (None, Some(v)) => depot.version(v)?.content,
                        (None, None) => bail!(PolytopeError::Internal(format!(
                            "target side of `{}` present without version or dirty content",
                            id
                        ))),
                    };
                    let nested =
                        MergeInput::new(id.clone(), av.cloned(), sv.cloned(), tv.cloned());
                    BaselineDecision::Merge(agent.merge(
                        ctxt,
                        &nested,
                        &ancestor_bytes,
                        &source_bytes,
                        &target_bytes,
                    )?)
                }
                // both sides dropped the artifact
                (None, false) => BaselineDecision::Keep,
            }
        };
        decisions.push((id, decision));
    }
    Ok(BaselinePlan { decisions })
}

fn removal_conflict(
    depot: &crate::depot::Depot,
    id: &ArtifactId,
    kind: BaselineConflictKind,
    source_version: Option<VersionId>,
    target_version: Option<VersionId>,
    surviving: Option<VersionId>,
) -> PtResult<MergeConflict> {
    let artifact = depot.artifact(id)?;
    let surviving_version = match surviving {
        Some(v) => v,
        None => bail!(PolytopeError::Internal(format!(
            "modify/delete divergence on `{}` with no surviving version",
            id
        ))),
    };
    let details =
        BaselineConflictDetails { kind, artifact: id.clone(), surviving_version };
    Ok(MergeConflict {
        id: ConflictId::fresh(),
        artifact: id.clone(),
        kind: artifact.kind,
        source_version,
        target_version,
        details: serde_json::to_vec(&details)?,
    })
}

/// Agent over baseline values. Nested merges write their merged versions
/// through the merge context; they only reach the store when the enclosing
/// operation commits its batch.
pub struct BaselineAgent;

impl Agent for BaselineAgent {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Baseline
    }

    fn encode(&self, value: &ArtifactValue) -> PtResult<Vec<u8>> {
        match value {
            ArtifactValue::Baseline(baseline) => Ok(serde_json::to_vec(baseline)?),
            value => bail!(PolytopeError::Internal(format!(
                "baseline agent asked to encode a {} value",
                value.kind()
            ))),
        }
    }

    fn decode(&self, bytes: &[u8]) -> PtResult<ArtifactValue> {
        let baseline = serde_json::from_slice::<Baseline>(bytes).map_err(|err| {
            anyhow!(PolytopeError::Corrupt(format!("undecodable baseline value: {}", err)))
        })?;
        Ok(ArtifactValue::Baseline(baseline))
    }

    fn merge(
        &self,
        ctxt: &mut MergeCtxt<'_>,
        input: &MergeInput,
        ancestor: &[u8],
        source: &[u8],
        target: &[u8],
    ) -> PtResult<MergeResult> {
        let ancestor = self.decode(ancestor)?.into_baseline()?;
        let source = self.decode(source)?.into_baseline()?;
        let target = self.decode(target)?.into_baseline()?;

        let plan = plan_merge(ctxt, &ancestor, &source, &target, &|_| None)?;
        let mut proposed = target.clone();
        let mut conflicts = vec![];
        for (id, decision) in plan.decisions {
            match decision {
                BaselineDecision::Keep => {}
                BaselineDecision::TakeSource(Some(version)) => proposed.set(id, version),
                BaselineDecision::TakeSource(None) => {
                    proposed.remove(&id);
                }
                BaselineDecision::ModDel { keep, conflict } => {
                    if let Some(version) = keep {
                        proposed.set(id, version);
                    }
                    conflicts.push(conflict);
                }
                BaselineDecision::Merge(result) => {
                    let parents = target
                        .get(&id)
                        .into_iter()
                        .chain(source.get(&id))
                        .cloned()
                        .collect::<SmallVec<[VersionId; 2]>>();
                    // a conflicted draft is staged too, flagged in its
                    // metadata: the proposed baseline must reference the
                    // marked-up content so callers can materialise it for
                    // the user to edit
                    let mut metadata = Metadata::default();
                    if !result.is_clean() {
                        metadata.insert(
                            UNRESOLVED_CONFLICTS_METADATA_KEY.to_owned(),
                            result.conflicts.len().to_string(),
                        );
                    }
                    let version = ArtifactVersion {
                        id: VersionId::fresh(),
                        artifact: id.clone(),
                        creator: ctxt.depot().config().user.clone(),
                        timestamp: Utc::now(),
                        content: result.proposed,
                        parents,
                        metadata,
                    };
                    ctxt.stage_version(&version)?;
                    proposed.set(id, version.id);
                    conflicts.extend(result.conflicts);
                }
            }
        }

        debug!(
            "BaselineAgent::merge(artifact: {}) :: {} conflict(s)",
            input.artifact,
            conflicts.len()
        );
        Ok(MergeResult {
            kind: ArtifactKind::Baseline,
            artifact: input.artifact.clone(),
            ancestor_version: input.ancestor_version.clone(),
            source_version: input.source_version.clone(),
            target_version: input.target_version.clone(),
            proposed: serde_json::to_vec(&proposed)?,
            conflicts,
        })
    }
}
