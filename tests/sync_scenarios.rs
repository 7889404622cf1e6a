//! End-to-end sync scenarios against the in-memory store
//!
//! Each test builds a local tree in a temp dir, runs one or more full syncs
//! and checks the remote state, the call log and the cache file.
//!
//! Run with: cargo test --test sync_scenarios

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{tempdir, TempDir};

use quipsync::cache::{cache_key, fingerprint, ChangeCache};
use quipsync::remote::Call;
use quipsync::{
    FileOutcome, MemoryStore, Mirror, RetryPolicy, SyncConfig, SyncError, SyncMode, SyncReport,
};

const ROOT: &str = "root";

struct Tree {
    dir: TempDir,
}

impl Tree {
    fn new() -> Self {
        Self {
            dir: tempdir().unwrap(),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn cache_path(&self) -> PathBuf {
        self.root().join(".quip_sync_cache.json")
    }

    fn cache(&self) -> ChangeCache {
        ChangeCache::load(self.cache_path()).unwrap()
    }

    fn key(&self, path: &Path) -> String {
        cache_key(self.root(), path)
    }
}

fn mirror(store: MemoryStore) -> Mirror<MemoryStore> {
    Mirror::new(
        store,
        SyncConfig::default().with_retry(RetryPolicy::immediate(3)),
    )
}

fn run(mirror: &Mirror<MemoryStore>, tree: &Tree) -> SyncReport {
    mirror.run(tree.root(), ROOT, SyncMode::Incremental).unwrap()
}

fn store(mirror: &Mirror<MemoryStore>) -> &MemoryStore {
    mirror.remote().inner()
}

// ============================================================================
// IDEMPOTENCE AND CHANGE DETECTION
// ============================================================================

mod change_detection {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn second_run_makes_no_remote_writes() {
        let tree = Tree::new();
        tree.write("a.md", "alpha");
        tree.write("sub/b.md", "beta");
        let mirror = mirror(MemoryStore::new(ROOT));

        let first = run(&mirror, &tree);
        assert_eq!(first.created, 2);

        store(&mirror).clear_calls();
        let second = run(&mirror, &tree);
        assert_eq!(second.unchanged, 2);
        assert_eq!(second.mutated(), 0);
        assert_eq!(store(&mirror).mutation_count(), 0);
    }

    #[test]
    fn edit_and_revert_both_sync() {
        let tree = Tree::new();
        let path = tree.write("a.md", "original");
        let mirror = mirror(MemoryStore::new(ROOT));
        run(&mirror, &tree);

        fs::write(&path, "edited").unwrap();
        assert_eq!(run(&mirror, &tree).updated, 1);

        fs::write(&path, "original").unwrap();
        assert_eq!(run(&mirror, &tree).updated, 1);

        let docs = store(&mirror).documents_in(ROOT);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].html.contains("original"));
        assert!(!docs[0].html.contains("edited"));
    }

    #[test]
    fn failed_update_is_retried_without_local_change() {
        let tree = Tree::new();
        let path = tree.write("a.md", "v1");
        let mirror = mirror(MemoryStore::new(ROOT));
        run(&mirror, &tree);

        fs::write(&path, "v2").unwrap();
        store(&mirror).fail_prepends(true);
        let report = run(&mirror, &tree);
        assert_eq!(report.failed, 1);
        let entry = tree.cache().get(&tree.key(&path)).cloned().unwrap();
        assert!(!entry.sync_succeeded);
        assert_eq!(entry.fingerprint, fingerprint(b"v2"));

        store(&mirror).fail_prepends(false);
        let report = run(&mirror, &tree);
        assert_eq!(report.updated, 1);
        assert!(tree.cache().get(&tree.key(&path)).unwrap().sync_succeeded);
        assert!(store(&mirror).documents_in(ROOT)[0].html.contains("v2"));
    }

    #[test]
    fn document_deleted_remotely_is_recreated() {
        let tree = Tree::new();
        let path = tree.write("a.md", "alpha");
        let mirror = mirror(MemoryStore::new(ROOT));
        run(&mirror, &tree);
        let old_id = tree.cache().get(&tree.key(&path)).unwrap().remote_id.clone().unwrap();

        store(&mirror).remove_document(&old_id);
        let report = run(&mirror, &tree);
        assert_eq!(report.created, 1);

        let new_id = tree.cache().get(&tree.key(&path)).unwrap().remote_id.clone().unwrap();
        assert_ne!(new_id, old_id);
        assert!(store(&mirror).document(&new_id).is_some());
    }

    #[test]
    fn existing_document_with_same_title_is_adopted() {
        let tree = Tree::new();
        tree.write("notes.md", "fresh");
        let remote = MemoryStore::new(ROOT);
        let existing = remote.seed_document(ROOT, "notes", "stale");
        let mirror = mirror(remote);

        let report = run(&mirror, &tree);
        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 0);
        let doc = store(&mirror).document(&existing).unwrap();
        assert!(doc.html.contains("fresh"));
    }
}

// ============================================================================
// FOLDERS
// ============================================================================

mod folders {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sibling_directories_share_parent() {
        let tree = Tree::new();
        tree.write("a/x.md", "x");
        tree.write("a/b/y.md", "y");
        tree.write("c/z.md", "z");
        let mirror = mirror(MemoryStore::new(ROOT));

        run(&mirror, &tree);
        let top = store(&mirror).subfolders(ROOT);
        let titles: Vec<_> = top.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(titles, vec!["a", "c"]);

        let a_id = &top[0].0;
        let nested = store(&mirror).subfolders(a_id);
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].1, "b");
        assert_eq!(store(&mirror).documents_in(&nested[0].0)[0].title, "y");
    }

    #[test]
    fn later_runs_create_no_folders() {
        let tree = Tree::new();
        tree.write("a/b/c.md", "c");
        let mirror = mirror(MemoryStore::new(ROOT));
        run(&mirror, &tree);

        tree.write("a/b/d.md", "d");
        store(&mirror).clear_calls();
        let report = run(&mirror, &tree);
        assert_eq!(report.created, 1);
        assert!(!store(&mirror)
            .calls()
            .iter()
            .any(|c| matches!(c, Call::CreateFolder { .. })));
    }

    #[test]
    fn unresolvable_directory_skips_its_files() {
        let tree = Tree::new();
        tree.write("a.md", "a");
        tree.write("sub/b.md", "b");
        let mirror = mirror(MemoryStore::new(ROOT));

        let report = mirror
            .run(tree.root(), "no-such-folder", SyncMode::Incremental)
            .unwrap();
        // The root listing fails for both the title lookup and the folder walk
        assert_eq!((report.skipped, report.skipped_dirs, report.failed), (1, 1, 1));
    }
}

// ============================================================================
// IMAGES
// ============================================================================

mod images {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn local_images_become_blobs() {
        let tree = Tree::new();
        tree.write("img/pic.png", "png-bytes");
        tree.write("a.md", "Title\n![pic](img/pic.png)\n![web](https://example.com/x.png)");
        let mirror = mirror(MemoryStore::new(ROOT));

        let report = run(&mirror, &tree);
        assert_eq!(report.images_uploaded, 1);

        let doc = &store(&mirror).documents_in(ROOT)[0];
        assert!(!doc.html.contains("image path:"));
        assert!(doc.html.contains(&format!("/blob/{}/", doc.id)));
        assert!(doc.html.contains("https://example.com/x.png"));
        assert_eq!(store(&mirror).blobs(&doc.id).len(), 1);
    }

    #[test]
    fn missing_image_leaves_marker() {
        let tree = Tree::new();
        let path = tree.write("a.md", "![gone](missing.png)");
        let mirror = mirror(MemoryStore::new(ROOT));

        let report = run(&mirror, &tree);
        assert_eq!(report.images_missing, 1);
        assert_eq!(report.created, 1);
        assert!(tree.cache().get(&tree.key(&path)).unwrap().sync_succeeded);
        assert!(store(&mirror).documents_in(ROOT)[0]
            .html
            .contains("image path: (missing.png)"));
    }
}

// ============================================================================
// DELETIONS AND CLEAN MODE
// ============================================================================

mod deletions {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn removed_file_deletes_document() {
        let tree = Tree::new();
        tree.write("keep.md", "k");
        let gone = tree.write("gone.md", "g");
        let mirror = mirror(MemoryStore::new(ROOT));
        run(&mirror, &tree);

        let gone_id = tree.cache().get(&tree.key(&gone)).unwrap().remote_id.clone().unwrap();
        store(&mirror).clear_calls();

        fs::remove_file(&gone).unwrap();
        let report = run(&mirror, &tree);
        assert_eq!(report.deletions.deleted, 1);
        let deletes = store(&mirror)
            .calls()
            .into_iter()
            .filter(|c| c == &Call::DeleteDocument(gone_id.clone()))
            .count();
        assert_eq!(deletes, 1);

        let titles: Vec<_> = store(&mirror)
            .documents_in(ROOT)
            .into_iter()
            .map(|d| d.title)
            .collect();
        assert_eq!(titles, vec!["keep"]);
        assert!(tree.cache().get(&tree.key(&gone)).is_none());
    }

    #[test]
    fn failed_delete_is_retried_next_run() {
        let tree = Tree::new();
        let gone = tree.write("gone.md", "g");
        let mirror = mirror(MemoryStore::new(ROOT));
        run(&mirror, &tree);

        fs::remove_file(&gone).unwrap();
        store(&mirror).fail_deletes(true);
        let report = run(&mirror, &tree);
        assert_eq!(report.deletions.failed, 1);
        assert!(tree.cache().get(&tree.key(&gone)).is_some());

        store(&mirror).fail_deletes(false);
        let report = run(&mirror, &tree);
        assert_eq!(report.deletions.deleted, 1);
        assert!(store(&mirror).documents_in(ROOT).is_empty());
        assert!(tree.cache().is_empty());
    }

    #[test]
    fn forbidden_delete_does_not_abort_run() {
        let tree = Tree::new();
        let gone = tree.write("gone.md", "g");
        tree.write("keep.md", "k");
        let mirror = mirror(MemoryStore::new(ROOT));
        run(&mirror, &tree);

        fs::remove_file(&gone).unwrap();
        let added = tree.write("sub/new.md", "n");
        store(&mirror).forbid_deletes(true);
        let report = run(&mirror, &tree);

        assert_eq!(report.deletions.failed, 1);
        assert_eq!(report.deletions.deleted, 0);
        assert_eq!(report.created, 1);
        assert_eq!(report.unchanged, 1);

        let cache = tree.cache();
        assert!(cache.get(&tree.key(&gone)).is_some());
        assert!(cache.get(&tree.key(&added)).unwrap().sync_succeeded);
        assert_eq!(store(&mirror).documents_in(ROOT).len(), 2);
    }

    #[test]
    fn other_spelling_of_root_deletes_nothing() {
        let tree = Tree::new();
        tree.write("a.md", "a");
        tree.write("sub/b.md", "b");
        fs::create_dir_all(tree.root().join("detour")).unwrap();
        let mirror = mirror(MemoryStore::new(ROOT));
        run(&mirror, &tree);
        store(&mirror).clear_calls();

        let respelled = tree.root().join("detour").join("..");
        let report = mirror
            .run(&respelled, ROOT, SyncMode::Incremental)
            .unwrap();

        assert_eq!(report.deletions.deleted, 0);
        assert_eq!(report.deletions.failed, 0);
        assert_eq!(report.unchanged, 2);
        assert_eq!(store(&mirror).mutation_count(), 0);
        assert_eq!(tree.cache().len(), 2);
    }

    #[test]
    fn clean_mode_empties_tree_and_resyncs() {
        let tree = Tree::new();
        tree.write("a.md", "a");
        let remote = MemoryStore::new(ROOT);
        remote.seed_document(ROOT, "stray", "x");
        let sub = remote.seed_folder(ROOT, "old");
        remote.seed_document(&sub, "nested", "y");
        let mirror = mirror(remote);

        let report = mirror.run(tree.root(), ROOT, SyncMode::Clean).unwrap();
        let cleared = report.cleared.clone().unwrap();
        assert_eq!(cleared.documents_deleted, 2);
        assert_eq!(report.created, 1);

        let titles: Vec<_> = store(&mirror)
            .documents_in(ROOT)
            .into_iter()
            .map(|d| d.title)
            .collect();
        assert_eq!(titles, vec!["a"]);
        assert!(store(&mirror).documents_in(&sub).is_empty());
        assert_eq!(tree.cache().len(), 1);
    }
}

// ============================================================================
// CACHE FILE
// ============================================================================

mod cache_file {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn legacy_entries_resync_and_upgrade() {
        let tree = Tree::new();
        let path = tree.write("notes.md", "body");
        let mut legacy = serde_json::Map::new();
        // Older caches keyed files by the path as walked
        legacy.insert(
            path.to_string_lossy().into_owned(),
            serde_json::Value::String(fingerprint(b"body")),
        );
        fs::write(tree.cache_path(), serde_json::Value::Object(legacy).to_string()).unwrap();

        let remote = MemoryStore::new(ROOT);
        let existing = remote.seed_document(ROOT, "notes", "body");
        let mirror = mirror(remote);

        let report = run(&mirror, &tree);
        assert_eq!(report.updated, 1);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(tree.cache_path()).unwrap()).unwrap();
        assert!(raw.get(path.to_string_lossy().as_ref()).is_none());
        let record = &raw["notes.md"];
        assert_eq!(record["doc_id"], existing.as_str());
        assert_eq!(record["sync_success"], true);
        assert!(record["last_sync"].is_string());
    }

    #[test]
    fn corrupt_cache_starts_fresh() {
        let tree = Tree::new();
        tree.write("a.md", "a");
        fs::write(tree.cache_path(), "{not json").unwrap();
        let mirror = mirror(MemoryStore::new(ROOT));

        let report = run(&mirror, &tree);
        assert_eq!(report.created, 1);
        assert_eq!(tree.cache().len(), 1);
    }

    #[test]
    fn unreadable_file_is_not_cached() {
        let tree = Tree::new();
        let path = tree.root().join("bad.md");
        fs::write(&path, [0xffu8, 0xfe, 0xfd]).unwrap();
        tree.write("good.md", "ok");
        let mirror = mirror(MemoryStore::new(ROOT));

        let report = run(&mirror, &tree);
        assert_eq!(report.unreadable, 1);
        assert_eq!(report.created, 1);
        assert!(tree.cache().get(&tree.key(&path)).is_none());
    }
}

// ============================================================================
// RETRIES
// ============================================================================

mod retries {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn transient_timeouts_are_absorbed() {
        let tree = Tree::new();
        tree.write("a.md", "a");
        let remote = MemoryStore::new(ROOT);
        remote.inject_timeouts(2);
        let mirror = mirror(remote);

        let report = run(&mirror, &tree);
        assert_eq!(report.created, 1);
    }

    #[test]
    fn exhausted_retries_abort_without_saving() {
        let tree = Tree::new();
        let path = tree.write("a.md", "v1");
        let mirror = mirror(MemoryStore::new(ROOT));
        run(&mirror, &tree);
        let saved = fs::read_to_string(tree.cache_path()).unwrap();

        fs::write(&path, "v2").unwrap();
        store(&mirror).inject_timeouts(1000);
        let err = mirror
            .run(tree.root(), ROOT, SyncMode::Incremental)
            .unwrap_err();
        assert!(matches!(err, SyncError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(fs::read_to_string(tree.cache_path()).unwrap(), saved);
    }

    #[test]
    fn outcome_of_single_file_is_reported() {
        let tree = Tree::new();
        let path = tree.write("a.md", "a");
        let mirror = mirror(MemoryStore::new(ROOT));
        let config = mirror.config().clone();
        let mut cache = ChangeCache::empty(tree.cache_path());

        let reconciler = quipsync::sync::DocumentReconciler::new(mirror.remote(), &config, tree.root());
        let outcome = reconciler.sync_file(&mut cache, &path, ROOT).unwrap();
        assert!(matches!(outcome, FileOutcome::Created { .. }));
    }
}
