use super::*;
use crate::agent::text::CONFLICT_START;
use crate::config::CoreConfig;
use crate::error::PolytopeError;
use crate::store::MemoryStore;
use crate::test_utils::{test_depot, test_fixture, text_bytes};
use std::collections::BTreeSet;
use std::sync::Arc;

fn pt_err<T: std::fmt::Debug>(result: PtResult<T>) -> PolytopeError {
    result.unwrap_err().downcast::<PolytopeError>().unwrap()
}

fn path_set(workspace: &Workspace) -> BTreeSet<String> {
    let paths = workspace.list_paths().unwrap();
    let set = paths.iter().cloned().collect::<BTreeSet<_>>();
    // exactly one path per reachable artifact
    assert_eq!(set.len(), paths.len());
    set
}

fn id_set(ids: &[ArtifactId]) -> BTreeSet<ArtifactId> {
    ids.iter().cloned().collect()
}

/// asserts a save point's recorded delta against the definition: the ids
/// whose version differs between its baseline and the baseline at its basis
fn assert_save_point_delta(depot: &Depot, save_point: &SavePoint) {
    let reached = depot.baseline_at(&save_point.baseline_version).unwrap();
    let basis = depot.save_point_basis_baseline(save_point).unwrap();
    assert_eq!(id_set(&save_point.modified_artifacts), id_set(&reached.diff(&basis)));
}

#[test]
fn test_s1_workspace_round_trip() {
    let (depot, workspace) = test_fixture().unwrap();
    let foo = workspace
        .add_file("foo", ArtifactKind::Text, text_bytes(&["11\n", "22\n", "33\n"]))
        .unwrap();
    let save_point = workspace.save("first", &[]).unwrap();

    assert_eq!(path_set(&workspace), btreeset! { "".to_owned(), "foo".to_owned() });

    let stored = depot.save_point(&save_point.id).unwrap();
    assert_eq!(stored, save_point);
    let root_dir = workspace.record().unwrap().root_dir;
    assert_eq!(id_set(&stored.modified_artifacts), id_set(&[foo, root_dir]));
    assert!(matches!(stored.basis, SavePointBasis::HistoryStep { step: 0, .. }));
    assert_save_point_delta(&depot, &stored);
}

#[test]
fn test_s2_directory_hierarchy_and_moves() {
    let (depot, workspace) = test_fixture().unwrap();
    let dir = workspace.add_directory("dir").unwrap();
    let rid = workspace.add_directory("rid").unwrap();
    workspace.add_directory("dir/boo").unwrap();
    workspace
        .add_file("dir/boo/text.txt", ArtifactKind::Text, text_bytes(&["some text\n"]))
        .unwrap();
    let blah = workspace
        .add_file("rid/blah.txt", ArtifactKind::Text, text_bytes(&["blah\n"]))
        .unwrap();
    let first = workspace.save("first", &[]).unwrap();

    workspace.move_file("dir/boo", "rid/boo").unwrap();
    workspace.move_file("rid/blah.txt", "rid/bleh.txt").unwrap();
    let detached = workspace.delete_file("rid/bleh.txt").unwrap();
    assert_eq!(detached, vec![blah.clone()]);
    let second = workspace.save("second", &[]).unwrap();

    assert_eq!(
        path_set(&workspace),
        btreeset! {
            "".to_owned(),
            "dir".to_owned(),
            "rid".to_owned(),
            "rid/boo".to_owned(),
            "rid/boo/text.txt".to_owned(),
        }
    );
    assert_eq!(id_set(&second.modified_artifacts), id_set(&[blah, dir, rid]));
    assert_eq!(second.basis, SavePointBasis::SavePoint(first.id.clone()));

    assert_save_point_delta(&depot, &first);
    assert_save_point_delta(&depot, &second);
    let change = depot.change(&workspace.record().unwrap().open_change.unwrap()).unwrap();
    assert_eq!(change.save_points, vec![first.id, second.id]);
    depot.validate_save_point_chain(&change).unwrap();
}

#[test]
fn test_s3_rename_and_edit_merge_without_conflict() {
    let depot = test_depot();
    depot.create_project("test", "").unwrap();

    let seed = depot.create_workspace("test", "main", "seed", "").unwrap();
    seed.create_change("seed").unwrap();
    seed.add_file("main.c", ArtifactKind::Text, text_bytes(&["A\n", "B\n", "C\n"])).unwrap();
    seed.save("seed", &[]).unwrap();
    seed.deliver("seed").unwrap();

    let renamer = depot.create_workspace("test", "main", "renamer", "").unwrap();
    let editor = depot.create_workspace("test", "main", "editor", "").unwrap();

    renamer.create_change("rename").unwrap();
    renamer.move_file("main.c", "app.c").unwrap();
    renamer.save("rename main.c", &[]).unwrap();
    renamer.deliver("rename").unwrap();

    editor.create_change("edit").unwrap();
    editor.modify_file("main.c", text_bytes(&["A\n", "BB\n", "C\n"])).unwrap();
    editor.save("edit", &[]).unwrap();

    // the history advanced past the editor's basis; deliver must fail and
    // leave the history untouched
    let history_before = depot.history(&editor.record().unwrap().history).unwrap();
    let err = pt_err(editor.deliver("stale"));
    assert!(matches!(err, PolytopeError::OutOfDate { .. }));
    let history_after = depot.history(&editor.record().unwrap().history).unwrap();
    assert_eq!(history_before, history_after);

    let outcome = editor.update().unwrap();
    assert!(outcome.advanced);
    assert!(outcome.conflicts.is_empty());

    assert_eq!(path_set(&editor), btreeset! { "".to_owned(), "app.c".to_owned() });
    assert_eq!(editor.read_file("app.c").unwrap(), text_bytes(&["A\n", "BB\n", "C\n"]));

    editor.save("merge rename and edit", &[]).unwrap();
    let history = editor.deliver("merged").unwrap();
    assert_eq!(history.steps.len(), 4);

    // a fresh workspace at the delivered tip sees the merged tree
    let check = depot.create_workspace("test", "main", "check", "").unwrap();
    assert_eq!(path_set(&check), btreeset! { "".to_owned(), "app.c".to_owned() });
    assert_eq!(check.read_file("app.c").unwrap(), text_bytes(&["A\n", "BB\n", "C\n"]));
}

#[test]
fn test_add_file_path_errors() {
    let (_, workspace) = test_fixture().unwrap();
    workspace.add_file("foo", ArtifactKind::Text, b"x\n".to_vec()).unwrap();

    let err = pt_err(workspace.add_file("foo", ArtifactKind::Text, b"y\n".to_vec()));
    assert_eq!(err, PolytopeError::PathExists("foo".to_owned()));

    let err = pt_err(workspace.add_file("missing/child", ArtifactKind::Text, b"y\n".to_vec()));
    assert_eq!(err, PolytopeError::ParentMissing("missing/child".to_owned()));

    let err = pt_err(workspace.add_file("foo/child", ArtifactKind::Text, b"y\n".to_vec()));
    assert_eq!(err, PolytopeError::NotADirectory("foo".to_owned()));
}

#[test]
fn test_path_operation_parameter_errors() {
    let (_, workspace) = test_fixture().unwrap();
    workspace.add_directory("dir").unwrap();

    assert!(matches!(pt_err(workspace.delete_file("")), PolytopeError::InvalidParameter(..)));
    assert!(matches!(
        pt_err(workspace.modify_file("dir", b"{}".to_vec())),
        PolytopeError::InvalidParameter(..)
    ));
    assert!(matches!(
        pt_err(workspace.move_file("dir", "dir/inner")),
        PolytopeError::InvalidParameter(..)
    ));
    assert!(matches!(pt_err(workspace.move_file("ghost", "dir/g")), PolytopeError::NotFound(..)));
    assert!(matches!(
        pt_err(workspace.add_file("dir/bad", ArtifactKind::Text, vec![0xff, 0xfe])),
        PolytopeError::InvalidParameter(..)
    ));
}

#[test]
fn test_duplicate_names_rejected() {
    let (depot, workspace) = test_fixture().unwrap();
    assert!(matches!(
        pt_err(depot.create_workspace("test", "main", "mytest", "")),
        PolytopeError::Duplicate(..)
    ));
    assert!(matches!(
        pt_err(workspace.create_change("test-change")),
        PolytopeError::Duplicate(..)
    ));
}

#[test]
fn test_save_requires_an_open_change_and_changes() {
    let depot = test_depot();
    depot.create_project("test", "").unwrap();
    let workspace = depot.create_workspace("test", "main", "ws", "").unwrap();

    workspace.add_file("foo", ArtifactKind::Text, b"x\n".to_vec()).unwrap();
    assert!(matches!(
        pt_err(workspace.save("no change", &[])),
        PolytopeError::InvalidParameter(..)
    ));

    workspace.create_change("c").unwrap();
    workspace.save("first", &[]).unwrap();
    assert!(matches!(
        pt_err(workspace.save("empty", &[])),
        PolytopeError::InvalidParameter(..)
    ));
}

#[test]
fn test_change_switching_requires_clean_workspace() {
    let (depot, workspace) = test_fixture().unwrap();
    let first = depot.change(&workspace.record().unwrap().open_change.unwrap()).unwrap();

    let second = workspace.create_change("another").unwrap();
    assert_eq!(workspace.record().unwrap().open_change, Some(second.id.clone()));

    workspace.add_file("foo", ArtifactKind::Text, b"x\n".to_vec()).unwrap();
    assert!(matches!(
        pt_err(workspace.create_change("third")),
        PolytopeError::InvalidParameter(..)
    ));
    assert!(matches!(
        pt_err(workspace.select_change(&first.id)),
        PolytopeError::InvalidParameter(..)
    ));

    workspace.save("tidy", &[]).unwrap();
    workspace.select_change(&first.id).unwrap();
    assert_eq!(workspace.record().unwrap().open_change, Some(first.id));
}

#[test]
fn test_conflicting_edits_resolve_and_save() {
    let depot = test_depot();
    depot.create_project("test", "").unwrap();

    let seed = depot.create_workspace("test", "main", "seed", "").unwrap();
    seed.create_change("seed").unwrap();
    seed.add_file("main.c", ArtifactKind::Text, text_bytes(&["A\n", "B\n", "C\n"])).unwrap();
    seed.save("seed", &[]).unwrap();
    seed.deliver("seed").unwrap();

    let left = depot.create_workspace("test", "main", "left", "").unwrap();
    let right = depot.create_workspace("test", "main", "right", "").unwrap();

    left.create_change("left").unwrap();
    left.modify_file("main.c", text_bytes(&["A\n", "Bs\n", "C\n"])).unwrap();
    left.save("left", &[]).unwrap();
    left.deliver("left").unwrap();

    right.create_change("right").unwrap();
    right.modify_file("main.c", text_bytes(&["A\n", "Bt\n", "C\n"])).unwrap();
    right.save("right", &[]).unwrap();

    let outcome = right.update().unwrap();
    assert_eq!(outcome.conflicts.len(), 1);

    // the proposed merge is materialised with conflict markers
    let content = String::from_utf8(right.read_file("main.c").unwrap()).unwrap();
    assert!(content.contains(CONFLICT_START));
    assert!(content.contains("Bs\n"));
    assert!(content.contains("Bt\n"));

    // saving without covering the conflict fails
    let err = pt_err(right.save("premature", &[]));
    assert!(matches!(err, PolytopeError::ConflictsPending(..)));

    right.modify_file("main.c", text_bytes(&["A\n", "B-merged\n", "C\n"])).unwrap();
    let resolved = outcome.conflicts.iter().map(|c| c.id.clone()).collect::<Vec<_>>();
    right.save("resolved", &resolved).unwrap();
    assert_eq!(right.status().unwrap().conflicts, 0);

    let history = right.deliver("merged").unwrap();
    assert_eq!(history.steps.len(), 4);
    let check = depot.create_workspace("test", "main", "check", "").unwrap();
    assert_eq!(check.read_file("main.c").unwrap(), text_bytes(&["A\n", "B-merged\n", "C\n"]));
}

#[test]
fn test_abandon_changes_discards_dirty_state() {
    let (depot, workspace) = test_fixture().unwrap();
    workspace.add_file("foo", ArtifactKind::Text, b"x\n".to_vec()).unwrap();
    workspace.abandon_changes("wrong direction").unwrap();

    let record = workspace.record().unwrap();
    assert!(record.is_clean());
    assert_eq!(record.open_change, None);
    assert_eq!(path_set(&workspace), btreeset! { "".to_owned() });

    let changes = depot.changes_of(&record.history).unwrap();
    assert!(matches!(changes[0].status, ChangeStatus::Abandoned { .. }));
}

#[test]
fn test_update_is_a_noop_at_the_tip() {
    let (_, workspace) = test_fixture().unwrap();
    let outcome = workspace.update().unwrap();
    assert!(!outcome.advanced);
    assert!(outcome.conflicts.is_empty());
}

#[test]
fn test_integrate_from_child_history() {
    let depot = test_depot();
    depot.create_project("test", "").unwrap();
    let project = depot.project("test").unwrap();
    let main = depot.resolve_history(&project, "main").unwrap();

    let feature = depot.create_history(&project, "feature", &main.id, 0).unwrap();
    let feature_ws = depot.create_workspace("test", "feature", "feat", "").unwrap();
    feature_ws.create_change("feature-work").unwrap();
    feature_ws.add_file("feature.txt", ArtifactKind::Text, b"hi\n".to_vec()).unwrap();
    feature_ws.save("add feature file", &[]).unwrap();
    feature_ws.deliver("feature").unwrap();

    let from = feature.steps[0].clone();
    let to = depot.history_tip(&feature.id).unwrap();

    let mainline = depot.create_workspace("test", "main", "mainline", "").unwrap();
    mainline.create_change("take-feature").unwrap();
    let outcome = mainline.integrate(&from, &to).unwrap();
    assert!(outcome.advanced);
    assert!(outcome.conflicts.is_empty());
    assert!(path_set(&mainline).contains("feature.txt"));

    let save_point = mainline.save("integrated", &[]).unwrap();
    let main_after = depot.history(&main.id).unwrap();
    assert_eq!(main_after.integrations.len(), 1);
    assert_eq!(main_after.integrations[0].from, from);
    assert_eq!(main_after.integrations[0].to, to);
    assert_eq!(main_after.integrations[0].merged, save_point.baseline_version);

    // re-integrating the same range brings nothing new
    let again = mainline.integrate(&from, &to).unwrap();
    assert!(!again.advanced);
    assert!(again.conflicts.is_empty());
}

#[test]
fn test_integrate_rejects_bad_ranges() {
    let depot = test_depot();
    depot.create_project("test", "").unwrap();
    let project = depot.project("test").unwrap();
    let main = depot.resolve_history(&project, "main").unwrap();
    let workspace = depot.create_workspace("test", "main", "ws", "").unwrap();

    let tip = depot.history_tip(&main.id).unwrap();
    assert!(matches!(
        pt_err(workspace.integrate(&tip, &VersionId::fresh())),
        PolytopeError::NotFound(..)
    ));
    assert!(matches!(
        pt_err(workspace.integrate(&tip, &tip)),
        PolytopeError::InvalidParameter(..)
    ));
}

#[test]
fn test_status_reports_dirty_state() {
    let (_, workspace) = test_fixture().unwrap();
    let foo = workspace.add_file("foo", ArtifactKind::Text, b"x\n".to_vec()).unwrap();
    let status = workspace.status().unwrap();
    assert!(status.dirty.contains(&foo));
    assert_eq!(status.conflicts, 0);
    assert!(status.open_change.is_some());
}

#[test]
fn test_read_file_sees_unsaved_content() {
    let (_, workspace) = test_fixture().unwrap();
    workspace.add_file("foo", ArtifactKind::Text, b"before\n".to_vec()).unwrap();
    workspace.save("first", &[]).unwrap();
    workspace.modify_file("foo", b"after\n".to_vec()).unwrap();
    assert_eq!(workspace.read_file("foo").unwrap(), b"after\n".to_vec());
}

#[test]
fn test_delete_returns_detached_subtree() {
    let (_, workspace) = test_fixture().unwrap();
    let dir = workspace.add_directory("dir").unwrap();
    let sub = workspace.add_directory("dir/sub").unwrap();
    let file = workspace.add_file("dir/sub/file", ArtifactKind::Text, b"x\n".to_vec()).unwrap();

    let detached = workspace.delete_file("dir").unwrap();
    assert_eq!(id_set(&detached), id_set(&[dir, sub, file]));
    assert_eq!(path_set(&workspace), btreeset! { "".to_owned() });
}

#[test]
fn test_workspace_is_owned_by_its_creator() {
    let store = Arc::new(MemoryStore::new());
    let alice = Depot::new(
        store.clone(),
        crate::agent::AgentRegistry::standard(),
        CoreConfig::with_user("alice"),
    );
    let bob = Depot::new(
        store,
        crate::agent::AgentRegistry::standard(),
        CoreConfig::with_user("bob"),
    );

    alice.create_project("test", "").unwrap();
    let workspace = alice.create_workspace("test", "main", "ws", "").unwrap();

    let intruder = bob.open_workspace(workspace.id()).unwrap();
    assert!(matches!(
        pt_err(intruder.add_file("foo", ArtifactKind::Text, b"x\n".to_vec())),
        PolytopeError::Unauthorized(..)
    ));
}
