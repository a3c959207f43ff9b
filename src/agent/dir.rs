//! Directory values and their semantic merge. A directory is an ordered
//! set of `name → artifact-id` bindings; merging works on per-artifact
//! change sets so a rename is distinguished from a remove plus an add.

use crate::agent::{Agent, ArtifactValue, MergeConflict, MergeCtxt, MergeInput, MergeResult};
use crate::error::{PolytopeError, PtGenericError, PtResult};
use crate::id::{ArtifactId, ConflictId};
use crate::model::ArtifactKind;
use crate::path;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Invariants: names are non-empty and contain no `/`; each name and each
/// artifact id appears at most once.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectoryValue {
    entries: IndexMap<String, ArtifactId>,
}

impl DirectoryValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ArtifactId> {
        self.entries.get(name)
    }

    pub fn name_of(&self, id: &ArtifactId) -> Option<&str> {
        self.entries.iter().find(|(_, bound)| *bound == id).map(|(name, _)| name.as_str())
    }

    pub fn bind(&mut self, name: &str, id: ArtifactId) -> PtResult<()> {
        path::validate_name(name)?;
        if let Some(existing) = self.name_of(&id) {
            if existing != name {
                bail!(PolytopeError::InvalidParameter(format!(
                    "artifact `{}` is already bound as `{}`",
                    id, existing
                )));
            }
        }
        self.entries.insert(name.to_owned(), id);
        Ok(())
    }

    pub fn unbind(&mut self, name: &str) -> Option<ArtifactId> {
        // shift_remove keeps the remaining bindings in insertion order
        self.entries.shift_remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArtifactId)> {
        self.entries.iter().map(|(name, id)| (name.as_str(), id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &ArtifactId> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn validate(&self) -> PtResult<()> {
        let mut seen = FxHashMap::default();
        for (name, id) in &self.entries {
            if !path::is_valid_name(name) {
                bail!(PolytopeError::Corrupt(format!("invalid directory entry name `{}`", name)));
            }
            if let Some(other) = seen.insert(id, name) {
                bail!(PolytopeError::Corrupt(format!(
                    "artifact `{}` bound as both `{}` and `{}`",
                    id, other, name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DirChange {
    Add { name: String },
    Remove { name: String },
    Rename { before: String, after: String },
}

/// per-artifact changes in `modified` relative to `ancestor`
fn changes_against(
    ancestor: &DirectoryValue,
    modified: &DirectoryValue,
) -> BTreeMap<ArtifactId, DirChange> {
    let mut changes = BTreeMap::new();
    for (name, id) in modified.iter() {
        match ancestor.name_of(id) {
            None => {
                changes.insert(id.clone(), DirChange::Add { name: name.to_owned() });
            }
            Some(before) if before != name => {
                changes.insert(
                    id.clone(),
                    DirChange::Rename { before: before.to_owned(), after: name.to_owned() },
                );
            }
            Some(_) => {}
        }
    }
    for (name, id) in ancestor.iter() {
        if modified.name_of(id).is_none() {
            changes.insert(id.clone(), DirChange::Remove { name: name.to_owned() });
        }
    }
    changes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirConflictKind {
    #[serde(rename = "ADD_ADD_NAME")]
    AddAddName,
    #[serde(rename = "ADD_ADD_ID")]
    AddAddId,
    #[serde(rename = "MOD_MOD")]
    ModMod,
    #[serde(rename = "MOD_DEL")]
    ModDel,
    #[serde(rename = "DEL_MOD")]
    DelMod,
}

impl Display for DirConflictKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            DirConflictKind::AddAddName => "ADD_ADD_NAME",
            DirConflictKind::AddAddId => "ADD_ADD_ID",
            DirConflictKind::ModMod => "MOD_MOD",
            DirConflictKind::ModDel => "MOD_DEL",
            DirConflictKind::DelMod => "DEL_MOD",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirConflictDetails {
    pub kind: DirConflictKind,
    pub artifact: ArtifactId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ancestor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
}

pub struct DirectoryAgent;

impl Agent for DirectoryAgent {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Directory
    }

    fn encode(&self, value: &ArtifactValue) -> PtResult<Vec<u8>> {
        match value {
            ArtifactValue::Directory(dir) => Ok(serde_json::to_vec(dir)?),
            value => bail!(PolytopeError::Internal(format!(
                "directory agent asked to encode a {} value",
                value.kind()
            ))),
        }
    }

    fn decode(&self, bytes: &[u8]) -> PtResult<ArtifactValue> {
        let dir = serde_json::from_slice::<DirectoryValue>(bytes).map_err(|err| {
            anyhow!(PolytopeError::Corrupt(format!("undecodable directory value: {}", err)))
        })?;
        dir.validate()?;
        Ok(ArtifactValue::Directory(dir))
    }

    fn merge(
        &self,
        _ctxt: &mut MergeCtxt<'_>,
        input: &MergeInput,
        ancestor: &[u8],
        source: &[u8],
        target: &[u8],
    ) -> PtResult<MergeResult> {
        let ancestor = self.decode(ancestor)?.into_directory()?;
        let source = self.decode(source)?.into_directory()?;
        let target = self.decode(target)?.into_directory()?;
        let merge = merge_directories(input, &ancestor, &source, &target)?;
        debug!(
            "DirectoryAgent::merge(artifact: {}) :: {} conflict(s)",
            input.artifact,
            merge.conflicts.len()
        );
        Ok(MergeResult {
            kind: ArtifactKind::Directory,
            artifact: input.artifact.clone(),
            ancestor_version: input.ancestor_version.clone(),
            source_version: input.source_version.clone(),
            target_version: input.target_version.clone(),
            proposed: serde_json::to_vec(&merge.proposed)?,
            conflicts: merge.conflicts,
        })
    }
}

pub(crate) struct DirectoryMerge {
    pub proposed: DirectoryValue,
    pub conflicts: Vec<MergeConflict>,
}

fn impossible(id: &ArtifactId, source: &DirChange, target: &DirChange) -> PtGenericError {
    let msg = format!(
        "directory merge: artifact `{}` has source change {:?} against target change {:?}",
        id, source, target
    );
    error!("{}", msg);
    anyhow!(PolytopeError::Internal(msg))
}

pub(crate) fn merge_directories(
    input: &MergeInput,
    ancestor: &DirectoryValue,
    source: &DirectoryValue,
    target: &DirectoryValue,
) -> PtResult<DirectoryMerge> {
    let src_changes = changes_against(ancestor, source);
    let tgt_changes = changes_against(ancestor, target);
    let tgt_adds_by_name: FxHashMap<&str, &ArtifactId> = tgt_changes
        .iter()
        .filter_map(|(id, change)| match change {
            DirChange::Add { name } => Some((name.as_str(), id)),
            _ => None,
        })
        .collect();

    let mut proposed = target.clone();
    let mut conflicts = vec![];
    let mut removals: Vec<String> = vec![];
    let mut insertions: Vec<(String, ArtifactId)> = vec![];

    let record_conflict = |conflicts: &mut Vec<MergeConflict>,
                               kind: DirConflictKind,
                               id: &ArtifactId|
     -> PtResult<ConflictId> {
        let conflict_id = ConflictId::fresh();
        let details = DirConflictDetails {
            kind,
            artifact: id.clone(),
            ancestor_name: ancestor.name_of(id).map(str::to_owned),
            source_name: source.name_of(id).map(str::to_owned),
            target_name: target.name_of(id).map(str::to_owned),
        };
        conflicts.push(MergeConflict {
            id: conflict_id.clone(),
            artifact: input.artifact.clone(),
            kind: ArtifactKind::Directory,
            source_version: input.source_version.clone(),
            target_version: input.target_version.clone(),
            details: serde_json::to_vec(&details)?,
        });
        Ok(conflict_id)
    };

    for (id, change) in &src_changes {
        if let DirChange::Add { name } = change {
            // another artifact claiming the same new name on the target side
            if let Some(&other) = tgt_adds_by_name.get(name.as_str()) {
                if other != id {
                    let conflict_id =
                        record_conflict(&mut conflicts, DirConflictKind::AddAddName, id)?;
                    // suffix the source binding so both artifacts survive
                    insertions.push((format!("{}_{}", name, conflict_id), id.clone()));
                    continue;
                }
            }
        }
        match (change, tgt_changes.get(id)) {
            (change, None) => match change {
                DirChange::Add { name } => insertions.push((name.clone(), id.clone())),
                DirChange::Remove { name } => removals.push(name.clone()),
                DirChange::Rename { before, after } => {
                    removals.push(before.clone());
                    insertions.push((after.clone(), id.clone()));
                }
            },
            (DirChange::Add { .. }, Some(DirChange::Add { .. })) => {
                // both sides added the same artifact; keep the target's
                // binding and let the user confirm the double add
                record_conflict(&mut conflicts, DirConflictKind::AddAddId, id)?;
            }
            (DirChange::Rename { after, .. }, Some(DirChange::Rename { after: target_after, .. })) => {
                if after != target_after {
                    record_conflict(&mut conflicts, DirConflictKind::ModMod, id)?;
                }
            }
            (DirChange::Rename { after, .. }, Some(DirChange::Remove { .. })) => {
                record_conflict(&mut conflicts, DirConflictKind::ModDel, id)?;
                // surface the renamed binding alongside the removal
                insertions.push((after.clone(), id.clone()));
            }
            (DirChange::Remove { .. }, Some(DirChange::Rename { .. })) => {
                record_conflict(&mut conflicts, DirConflictKind::DelMod, id)?;
            }
            (DirChange::Remove { .. }, Some(DirChange::Remove { .. })) => {
                // both sides removed it; the target copy already reflects that
            }
            // an artifact absent from the ancestor cannot be renamed or
            // removed, and one present cannot be added again
            (source_change, Some(target_change)) =>
                return Err(impossible(id, source_change, target_change)),
        }
    }

    // bindings leave before new ones land so a rename chain cannot collide
    for name in removals {
        proposed.unbind(&name);
    }
    for (name, id) in insertions {
        proposed.bind(&name, id)?;
    }

    Ok(DirectoryMerge { proposed, conflicts })
}

#[cfg(test)]
mod tests;
