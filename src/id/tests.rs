use super::*;

#[test]
fn test_fresh_ids_are_unique_and_tagged() {
    let a = ArtifactId::fresh();
    let b = ArtifactId::fresh();
    assert_ne!(a, b);
    assert!(a.as_str().starts_with("artifact:"));
}

#[test]
fn test_id_round_trips_through_str() {
    let id = VersionId::fresh();
    let parsed = id.as_str().parse::<VersionId>().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn test_id_rejects_wrong_tag() {
    assert!("artifact:1234".parse::<VersionId>().is_err());
    assert!("version:".parse::<VersionId>().is_err());
}

#[test]
fn test_short_form_is_prefix() {
    let id = ChangeId::fresh();
    assert!(id.as_str().starts_with(id.short()));
    assert_eq!(format!("{:#}", id), id.short());
}

#[quickcheck]
fn qc_id_serde_round_trip(id: ArtifactId) -> bool {
    let json = serde_json::to_string(&id).unwrap();
    serde_json::from_str::<ArtifactId>(&json).unwrap() == id
}
