use super::*;
use crate::error::PtResultExt;
use crate::model::ArtifactKind;
use crate::test_utils::{plant_artifact, test_depot};

fn pt_err<T: std::fmt::Debug>(result: PtResult<T>) -> PolytopeError {
    result.unwrap_err().downcast::<PolytopeError>().unwrap()
}

#[test]
fn test_missing_records_read_not_found() {
    let depot = test_depot();
    let result = depot.artifact(&ArtifactId::fresh());
    assert!(result.is_not_found_err());
    assert!(depot.project("nope").is_not_found_err());
}

#[test]
fn test_immutable_records_cannot_be_rewritten() {
    let depot = test_depot();
    let id = plant_artifact(&depot, ArtifactKind::Text).unwrap();

    // re-staging identical bytes is idempotent
    let artifact = depot.artifact(&id).unwrap();
    let mut batch = vec![];
    stage(&mut batch, Column::Artifacts, id.as_str(), &artifact).unwrap();
    depot.commit(batch).unwrap();

    // different contents under the same key are corruption
    let mut tampered = artifact;
    tampered.creator = "someone else".to_owned();
    let mut batch = vec![];
    stage(&mut batch, Column::Artifacts, id.as_str(), &tampered).unwrap();
    let err = pt_err(depot.commit(batch));
    assert!(matches!(err, PolytopeError::Corrupt(..)));
    assert_eq!(depot.artifact(&id).unwrap().creator, "tester");
}

#[test]
fn test_undecodable_record_is_corrupt() {
    let store = Arc::new(MemoryStore::new());
    store.put(Column::Artifacts, "artifact:junk", b"not json".to_vec()).unwrap();
    let depot = Depot::new(
        store,
        AgentRegistry::standard(),
        crate::config::CoreConfig::default(),
    );
    let id = "artifact:junk".parse::<ArtifactId>().unwrap();
    assert!(matches!(pt_err(depot.artifact(&id)), PolytopeError::Corrupt(..)));
}

#[test]
fn test_user_records_round_trip() {
    let depot = test_depot();
    let user = User { name: "alice".to_owned(), display_name: "Alice".to_owned() };
    depot.register_user(&user).unwrap();
    assert_eq!(depot.user("alice").unwrap(), user);
    assert!(depot.user("bob").is_not_found_err());
}
