//! Queries over changes and their save-point chains. Creation and status
//! transitions live on the workspace, which owns the staging state a
//! change captures.

use crate::baseline::Baseline;
use crate::depot::Depot;
use crate::error::{PolytopeError, PtResult};
use crate::id::{SavePointId, VersionId};
use crate::model::{Change, SavePoint, SavePointBasis};
use rustc_hash::FxHashSet;

impl Depot {
    pub fn save_points_of(&self, change: &Change) -> PtResult<Vec<SavePoint>> {
        change.save_points.iter().map(|id| self.save_point(id)).collect()
    }

    /// the baseline version a save-point basis points at: the prior save
    /// point's baseline, or the history step the change branched from
    pub(crate) fn save_point_basis_version(&self, basis: &SavePointBasis) -> PtResult<VersionId> {
        match basis {
            SavePointBasis::SavePoint(id) => Ok(self.save_point(id)?.baseline_version),
            SavePointBasis::HistoryStep { history, step } => {
                let history = self.history(history)?;
                match history.steps.get(*step) {
                    Some(version) => Ok(version.clone()),
                    None => bail!(PolytopeError::Corrupt(format!(
                        "save point based on missing step {} of history `{}`",
                        step, history.id
                    ))),
                }
            }
        }
    }

    /// the baseline a save point's recorded delta is relative to
    pub fn save_point_basis_baseline(&self, save_point: &SavePoint) -> PtResult<Baseline> {
        self.baseline_at(&self.save_point_basis_version(&save_point.basis)?)
    }

    /// Walks every basis chain of the change back to its history step.
    /// The chain must stay within the change and never revisit a save
    /// point; a violation is corrupt data.
    pub fn validate_save_point_chain(&self, change: &Change) -> PtResult<()> {
        for head in &change.save_points {
            let mut visited = FxHashSet::<SavePointId>::default();
            let mut cursor = head.clone();
            loop {
                if !visited.insert(cursor.clone()) {
                    bail!(PolytopeError::Corrupt(format!(
                        "save point chain of change `{}` contains a cycle at `{}`",
                        change.id, cursor
                    )));
                }
                let save_point = self.save_point(&cursor)?;
                if save_point.change != change.id {
                    bail!(PolytopeError::Corrupt(format!(
                        "save point `{}` belongs to change `{}`, reached from `{}`",
                        save_point.id, save_point.change, change.id
                    )));
                }
                match save_point.basis {
                    SavePointBasis::SavePoint(prior) => cursor = prior,
                    SavePointBasis::HistoryStep { .. } => break,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
