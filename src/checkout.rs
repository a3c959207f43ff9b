//! On-disk workspace layout: directory artifacts become filesystem
//! directories, file artifacts become files, and a sidecar state file maps
//! paths to artifact ids and content hashes so a later scan can detect
//! dirtiness by comparing digests.

use crate::agent::Agent;
use crate::error::{PolytopeError, PtResult};
use crate::hash::{self, ContentHash};
use crate::id::ArtifactId;
use crate::model::ArtifactKind;
use crate::workspace::Workspace;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

pub const SIDECAR_FILE: &str = ".polytope.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarEntry {
    pub artifact: ArtifactId,
    pub hash: ContentHash,
}

/// maps materialised paths to the artifact and content hash they were
/// written from
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SidecarState {
    pub entries: BTreeMap<String, SidecarEntry>,
}

impl SidecarState {
    pub fn load(root: &Path) -> PtResult<Self> {
        let file = root.join(SIDECAR_FILE);
        if !file.exists() {
            bail!(PolytopeError::InvalidParameter(format!(
                "`{}` is not a materialised workspace (missing {})",
                root.display(),
                SIDECAR_FILE
            )));
        }
        Ok(serde_json::from_slice(&fs::read(file)?)?)
    }

    pub fn save(&self, root: &Path) -> PtResult<()> {
        Ok(fs::write(root.join(SIDECAR_FILE), serde_json::to_vec_pretty(self)?)?)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanOutcome {
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
}

impl ScanOutcome {
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty() && self.added.is_empty() && self.deleted.is_empty()
    }
}

impl Workspace {
    /// Writes the workspace's current tree under `root` and records the
    /// sidecar state for later scans.
    pub fn materialize(&self, root: &Path) -> PtResult<()> {
        debug!("Workspace::materialize(root: {})", root.display());
        fs::create_dir_all(root)?;
        let mut sidecar = SidecarState::default();
        for entry in self.entries()? {
            let full = root.join(&entry.path);
            match entry.kind {
                ArtifactKind::Directory => fs::create_dir_all(&full)?,
                ArtifactKind::Baseline => {
                    bail!(PolytopeError::Corrupt(format!(
                        "baseline artifact `{}` bound in the tree at `{}`",
                        entry.artifact, entry.path
                    )))
                }
                kind => {
                    let content = self.read_file(&entry.path)?;
                    self.depot().registry().agent(kind)?.write_to_disk(&content, &full)?;
                    sidecar.entries.insert(
                        entry.path,
                        SidecarEntry { artifact: entry.artifact, hash: hash::hash_bytes(&content) },
                    );
                }
            }
        }
        sidecar.save(root)
    }

    /// Walks the materialised tree, feeding content whose hash differs
    /// from the recorded one back into the workspace as dirty state. New
    /// files become artifacts, missing ones are deleted.
    pub fn scan(&self, root: &Path) -> PtResult<ScanOutcome> {
        debug!("Workspace::scan(root: {})", root.display());
        let mut sidecar = SidecarState::load(root)?;
        let mut outcome = ScanOutcome::default();
        let mut seen = FxHashSet::default();

        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(root)?.to_str() {
                Some(rel) => rel.to_owned(),
                None => bail!(PolytopeError::InvalidParameter(format!(
                    "non-utf8 path `{}` in workspace tree",
                    entry.path().display()
                ))),
            };
            if rel == SIDECAR_FILE {
                continue;
            }
            let agent = self.depot().registry().agent_for_path(entry.path())?;
            let bytes = agent.read_from_disk(entry.path())?;
            let digest = hash::hash_bytes(&bytes);
            seen.insert(rel.clone());
            match sidecar.entries.get_mut(&rel) {
                Some(state) if state.hash == digest => {}
                Some(state) => {
                    self.modify_file(&rel, bytes)?;
                    state.hash = digest;
                    outcome.modified.push(rel);
                }
                None => {
                    self.ensure_parent_directories(&rel)?;
                    let kind = self.depot().registry().file_types().kind_for_path(entry.path());
                    let artifact = self.add_file(&rel, kind, bytes)?;
                    sidecar.entries.insert(rel.clone(), SidecarEntry { artifact, hash: digest });
                    outcome.added.push(rel);
                }
            }
        }

        let missing = sidecar
            .entries
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect::<Vec<_>>();
        for rel in missing {
            self.delete_file(&rel)?;
            sidecar.entries.remove(&rel);
            outcome.deleted.push(rel);
        }

        sidecar.save(root)?;
        Ok(outcome)
    }

    /// binds any directory components of `target` that exist on disk but
    /// not yet in the workspace
    fn ensure_parent_directories(&self, target: &str) -> PtResult<()> {
        let (parent, _) = crate::path::parent_and_name(target)?;
        let mut prefix = String::new();
        for component in crate::path::components(parent)? {
            prefix = crate::path::join(&prefix, component);
            let result = self.add_directory(&prefix);
            if let Err(err) = result {
                match err.downcast_ref::<PolytopeError>() {
                    Some(PolytopeError::PathExists(..)) => continue,
                    _ => return Err(err),
                }
            }
        }
        Ok(())
    }
}
