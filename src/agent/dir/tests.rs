use super::*;
use crate::agent::MergeResult;
use crate::test_utils::{raw_merge, test_depot};
use quickcheck::Arbitrary;

impl Arbitrary for DirectoryValue {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        let mut dir = DirectoryValue::new();
        for i in 0..usize::arbitrary(g) % 8 {
            let name = format!("entry{}-{}", i, u16::arbitrary(g));
            let _ = dir.bind(&name, ArtifactId::arbitrary(g));
        }
        dir
    }
}

fn dir_of(bindings: Vec<(&str, ArtifactId)>) -> DirectoryValue {
    let mut dir = DirectoryValue::new();
    for (name, id) in bindings {
        dir.bind(name, id).unwrap();
    }
    dir
}

fn merge_dirs(
    ancestor: &DirectoryValue,
    source: &DirectoryValue,
    target: &DirectoryValue,
) -> MergeResult {
    let depot = test_depot();
    raw_merge(
        &depot,
        ArtifactKind::Directory,
        &serde_json::to_vec(ancestor).unwrap(),
        &serde_json::to_vec(source).unwrap(),
        &serde_json::to_vec(target).unwrap(),
    )
    .unwrap()
}

fn proposed_dir(result: &MergeResult) -> DirectoryValue {
    serde_json::from_slice(&result.proposed).unwrap()
}

fn conflict_kind(conflict: &MergeConflict) -> DirConflictKind {
    conflict.details_as::<DirConflictDetails>().unwrap().kind
}

#[test]
fn test_bind_rejects_invalid_names() {
    let mut dir = DirectoryValue::new();
    assert!(dir.bind("", ArtifactId::fresh()).is_err());
    assert!(dir.bind("a/b", ArtifactId::fresh()).is_err());
}

#[test]
fn test_bind_rejects_double_binding() {
    let id = ArtifactId::fresh();
    let mut dir = dir_of(vec![("a", id.clone())]);
    assert!(dir.bind("b", id).is_err());
}

#[test]
fn test_changes_detect_add_remove_rename() {
    let (x, y, z) = (ArtifactId::fresh(), ArtifactId::fresh(), ArtifactId::fresh());
    let ancestor = dir_of(vec![("kept", x.clone()), ("old", y.clone())]);
    let modified = dir_of(vec![("kept", x), ("new", y.clone()), ("fresh", z.clone())]);
    let changes = changes_against(&ancestor, &modified);
    assert_eq!(changes.len(), 2);
    assert_eq!(
        changes.get(&y),
        Some(&DirChange::Rename { before: "old".to_owned(), after: "new".to_owned() })
    );
    assert_eq!(changes.get(&z), Some(&DirChange::Add { name: "fresh".to_owned() }));
}

#[test]
fn test_successive_moves_collapse_to_one_rename() {
    // the change log is derived by diffing values, so moving a -> b -> c
    // reads back as a single rename
    let id = ArtifactId::fresh();
    let ancestor = dir_of(vec![("a", id.clone())]);
    let mut modified = ancestor.clone();
    modified.unbind("a");
    modified.bind("b", id.clone()).unwrap();
    modified.unbind("b");
    modified.bind("c", id.clone()).unwrap();
    let changes = changes_against(&ancestor, &modified);
    assert_eq!(
        changes.get(&id),
        Some(&DirChange::Rename { before: "a".to_owned(), after: "c".to_owned() })
    );
    assert_eq!(changes.len(), 1);
}

#[test]
fn test_add_add_name_preserves_both_artifacts() {
    // S6: both sides bind different artifacts under `a`
    let (x1, x2) = (ArtifactId::fresh(), ArtifactId::fresh());
    let ancestor = DirectoryValue::new();
    let source = dir_of(vec![("a", x1.clone())]);
    let target = dir_of(vec![("a", x2.clone())]);

    let result = merge_dirs(&ancestor, &source, &target);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(conflict_kind(&result.conflicts[0]), DirConflictKind::AddAddName);

    let proposed = proposed_dir(&result);
    assert_eq!(proposed.len(), 2);
    assert_eq!(proposed.get("a"), Some(&x2));
    let suffixed = format!("a_{}", result.conflicts[0].id);
    assert_eq!(proposed.get(&suffixed), Some(&x1));
}

#[test]
fn test_rename_vs_untouched() {
    // S3, directory half: a rename on one side only
    let f = ArtifactId::fresh();
    let ancestor = dir_of(vec![("main.c", f.clone())]);
    let source = dir_of(vec![("app.c", f.clone())]);
    let result = merge_dirs(&ancestor, &source, &ancestor.clone());
    assert!(result.is_clean());
    let proposed = proposed_dir(&result);
    assert_eq!(proposed.len(), 1);
    assert_eq!(proposed.get("app.c"), Some(&f));
}

#[test]
fn test_rename_vs_rename_same_name_is_noop() {
    let f = ArtifactId::fresh();
    let ancestor = dir_of(vec![("a", f.clone())]);
    let renamed = dir_of(vec![("b", f.clone())]);
    let result = merge_dirs(&ancestor, &renamed, &renamed.clone());
    assert!(result.is_clean());
    assert_eq!(proposed_dir(&result).get("b"), Some(&f));
}

#[test]
fn test_rename_vs_rename_differing_keeps_target() {
    let f = ArtifactId::fresh();
    let ancestor = dir_of(vec![("a", f.clone())]);
    let source = dir_of(vec![("from-source", f.clone())]);
    let target = dir_of(vec![("from-target", f.clone())]);
    let result = merge_dirs(&ancestor, &source, &target);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(conflict_kind(&result.conflicts[0]), DirConflictKind::ModMod);
    let proposed = proposed_dir(&result);
    assert_eq!(proposed.get("from-target"), Some(&f));
    assert_eq!(proposed.get("from-source"), None);
}

#[test]
fn test_rename_vs_remove_surfaces_renamed_binding() {
    let f = ArtifactId::fresh();
    let ancestor = dir_of(vec![("a", f.clone())]);
    let source = dir_of(vec![("b", f.clone())]);
    let target = DirectoryValue::new();
    let result = merge_dirs(&ancestor, &source, &target);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(conflict_kind(&result.conflicts[0]), DirConflictKind::ModDel);
    assert_eq!(proposed_dir(&result).get("b"), Some(&f));
}

#[test]
fn test_remove_vs_rename_keeps_target_binding() {
    let f = ArtifactId::fresh();
    let ancestor = dir_of(vec![("a", f.clone())]);
    let source = DirectoryValue::new();
    let target = dir_of(vec![("b", f.clone())]);
    let result = merge_dirs(&ancestor, &source, &target);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(conflict_kind(&result.conflicts[0]), DirConflictKind::DelMod);
    assert_eq!(proposed_dir(&result).get("b"), Some(&f));
}

#[test]
fn test_remove_vs_remove_is_compatible() {
    let f = ArtifactId::fresh();
    let ancestor = dir_of(vec![("a", f)]);
    let removed = DirectoryValue::new();
    let result = merge_dirs(&ancestor, &removed, &removed.clone());
    assert!(result.is_clean());
    assert!(proposed_dir(&result).is_empty());
}

#[test]
fn test_add_add_same_id_conflicts_even_when_names_agree() {
    // a double add is flagged regardless of the chosen names; the
    // target's binding stands
    let f = ArtifactId::fresh();
    let added = dir_of(vec![("a", f.clone())]);
    let result = merge_dirs(&DirectoryValue::new(), &added, &added.clone());
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(conflict_kind(&result.conflicts[0]), DirConflictKind::AddAddId);
    let proposed = proposed_dir(&result);
    assert_eq!(proposed.get("a"), Some(&f));
    assert_eq!(proposed.len(), 1);
}

#[test]
fn test_add_add_same_id_differing_names_keeps_target() {
    let f = ArtifactId::fresh();
    let source = dir_of(vec![("source-name", f.clone())]);
    let target = dir_of(vec![("target-name", f.clone())]);
    let result = merge_dirs(&DirectoryValue::new(), &source, &target);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(conflict_kind(&result.conflicts[0]), DirConflictKind::AddAddId);
    let proposed = proposed_dir(&result);
    assert_eq!(proposed.get("target-name"), Some(&f));
    assert_eq!(proposed.len(), 1);
}

#[test]
fn test_independent_adds_and_removes_merge() {
    let (kept, gone, new_src, new_tgt) =
        (ArtifactId::fresh(), ArtifactId::fresh(), ArtifactId::fresh(), ArtifactId::fresh());
    let ancestor = dir_of(vec![("kept", kept.clone()), ("gone", gone)]);
    // source adds a file, target removes one and adds another
    let source = {
        let mut dir = ancestor.clone();
        dir.bind("src-new", new_src.clone()).unwrap();
        dir
    };
    let target = {
        let mut dir = ancestor.clone();
        dir.unbind("gone");
        dir.bind("tgt-new", new_tgt.clone()).unwrap();
        dir
    };
    let result = merge_dirs(&ancestor, &source, &target);
    assert!(result.is_clean());
    let proposed = proposed_dir(&result);
    assert_eq!(proposed.get("kept"), Some(&kept));
    assert_eq!(proposed.get("src-new"), Some(&new_src));
    assert_eq!(proposed.get("tgt-new"), Some(&new_tgt));
    assert_eq!(proposed.get("gone"), None);
}

#[test]
fn test_decode_rejects_double_binding() {
    let id = ArtifactId::fresh();
    let json = format!(r#"{{"a":"{}","b":"{}"}}"#, id, id);
    assert!(DirectoryAgent.decode(json.as_bytes()).is_err());
}

#[quickcheck]
fn qc_dir_round_trip(dir: DirectoryValue) -> bool {
    let agent = DirectoryAgent;
    let value = ArtifactValue::Directory(dir);
    agent.decode(&agent.encode(&value).unwrap()).unwrap() == value
}

#[quickcheck]
fn qc_dir_merge_identity(dir: DirectoryValue) -> bool {
    let result = merge_dirs(&dir, &dir, &dir);
    result.is_clean() && proposed_dir(&result) == dir
}

#[quickcheck]
fn qc_dir_merge_agreement(ancestor: DirectoryValue, seed: u64) -> bool {
    // agreed change sets built from renames and removals only: the
    // Add|Add matrix cell raises ADD_ADD_ID even for agreeing sides, so
    // agreement is conflict-free exactly when nothing was double-added
    let mut modified = DirectoryValue::new();
    for (i, (name, id)) in ancestor.iter().enumerate() {
        match (seed >> (i % 60)) & 3 {
            0 => {}
            1 => modified.bind(&format!("renamed-{}", i), id.clone()).unwrap(),
            _ => modified.bind(name, id.clone()).unwrap(),
        }
    }
    let result = merge_dirs(&ancestor, &modified, &modified);
    result.is_clean() && proposed_dir(&result) == modified
}
