use super::*;
use crate::error::PtResultExt;
use crate::hash;
use std::path::PathBuf;

#[test]
fn test_missing_agent_is_corrupt_data() {
    let registry = AgentRegistry::new(FileTypeTable::standard());
    let err = registry.agent(ArtifactKind::Text).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_standard_registry_covers_the_closed_set() {
    let registry = AgentRegistry::standard();
    for kind in [ArtifactKind::Text, ArtifactKind::Directory, ArtifactKind::Baseline] {
        assert_eq!(registry.agent(kind).unwrap().kind(), kind);
    }
}

#[test]
fn test_file_type_table_falls_back_to_text() {
    let mut table = FileTypeTable::standard();
    assert_eq!(table.kind_for_path(&PathBuf::from("a/b/readme.md")), ArtifactKind::Text);
    table.register_extension("tree", ArtifactKind::Directory);
    assert_eq!(table.kind_for_path(&PathBuf::from("x.tree")), ArtifactKind::Directory);
}

#[test]
fn test_content_hash_is_over_the_encoded_form() {
    let registry = AgentRegistry::standard();
    let agent = registry.agent(ArtifactKind::Text).unwrap();
    let value = ArtifactValue::Text("a\nb\n".to_owned());
    let expected = hash::hash_bytes(agent.encode(&value).unwrap());
    assert_eq!(agent.content_hash(&value).unwrap(), expected);
}

#[test]
fn test_merge_input_labels_default_to_version_shorts() {
    let source = VersionId::fresh();
    let input = MergeInput::new(ArtifactId::fresh(), None, Some(source.clone()), None);
    assert_eq!(input.source_label, source.short());
    assert_eq!(input.target_label, "target");
}

#[test]
fn test_directory_agent_has_no_disk_seam() {
    let err = DirectoryAgent.read_from_disk(&PathBuf::from("whatever")).unwrap_err();
    assert!(!err.is_fatal());
    assert!(!DirectoryAgent.can_handle(&PathBuf::from("whatever")));
    assert!(TextAgent.can_handle(&PathBuf::from("whatever")));
}
