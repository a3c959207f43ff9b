use super::*;
use crate::depot::stage;
use crate::error::PtResult;
use crate::id::{ChangeId, HistoryId};
use crate::model::{ChangeStatus, SavePoint};
use crate::store::Column;
use crate::test_utils::{test_depot, test_fixture};
use chrono::Utc;

fn pt_err<T: std::fmt::Debug>(result: PtResult<T>) -> PolytopeError {
    result.unwrap_err().downcast::<PolytopeError>().unwrap()
}

#[test]
fn test_basis_chain_resolves_to_baselines() {
    let (depot, workspace) = test_fixture().unwrap();
    workspace.add_file("a", crate::model::ArtifactKind::Text, b"a\n".to_vec()).unwrap();
    let first = workspace.save("first", &[]).unwrap();
    workspace.add_file("b", crate::model::ArtifactKind::Text, b"b\n".to_vec()).unwrap();
    let second = workspace.save("second", &[]).unwrap();

    // the first save point's basis is the branching history step, the
    // second chains on the first
    assert_eq!(
        depot.save_point_basis_version(&second.basis).unwrap(),
        first.baseline_version
    );
    let change = depot.change(&first.change).unwrap();
    let step0 = depot.history(&change.history).unwrap().steps[0].clone();
    assert_eq!(depot.save_point_basis_version(&first.basis).unwrap(), step0);

    depot.validate_save_point_chain(&change).unwrap();
    assert_eq!(depot.save_points_of(&change).unwrap(), vec![first, second]);
}

#[test]
fn test_cyclic_basis_chain_is_corrupt() {
    let depot = test_depot();
    let change_id = ChangeId::fresh();
    let (a, b) = (SavePointId::fresh(), SavePointId::fresh());
    let save_point = |id: &SavePointId, basis: &SavePointId| SavePoint {
        id: id.clone(),
        change: change_id.clone(),
        timestamp: Utc::now(),
        description: String::new(),
        basis: SavePointBasis::SavePoint(basis.clone()),
        baseline_version: crate::id::VersionId::fresh(),
        modified_artifacts: vec![],
    };

    let mut batch = vec![];
    stage(&mut batch, Column::SavePoints, a.as_str(), &save_point(&a, &b)).unwrap();
    stage(&mut batch, Column::SavePoints, b.as_str(), &save_point(&b, &a)).unwrap();
    let change = Change {
        id: change_id.clone(),
        name: "broken".to_owned(),
        history: HistoryId::fresh(),
        basis: crate::id::VersionId::fresh(),
        save_points: vec![a.clone()],
        status: ChangeStatus::Open,
    };
    stage(&mut batch, Column::Changes, change.id.as_str(), &change).unwrap();
    depot.commit(batch).unwrap();

    assert!(matches!(
        pt_err(depot.validate_save_point_chain(&change)),
        PolytopeError::Corrupt(..)
    ));
}

#[test]
fn test_chain_escaping_the_change_is_corrupt() {
    let depot = test_depot();
    let (change_id, stranger_change) = (ChangeId::fresh(), ChangeId::fresh());
    let sp = SavePoint {
        id: SavePointId::fresh(),
        change: stranger_change,
        timestamp: Utc::now(),
        description: String::new(),
        basis: SavePointBasis::HistoryStep { history: HistoryId::fresh(), step: 0 },
        baseline_version: crate::id::VersionId::fresh(),
        modified_artifacts: vec![],
    };
    let change = Change {
        id: change_id,
        name: "broken".to_owned(),
        history: HistoryId::fresh(),
        basis: crate::id::VersionId::fresh(),
        save_points: vec![sp.id.clone()],
        status: ChangeStatus::Open,
    };
    let mut batch = vec![];
    stage(&mut batch, Column::SavePoints, sp.id.as_str(), &sp).unwrap();
    stage(&mut batch, Column::Changes, change.id.as_str(), &change).unwrap();
    depot.commit(batch).unwrap();

    assert!(matches!(
        pt_err(depot.validate_save_point_chain(&change)),
        PolytopeError::Corrupt(..)
    ));
}
