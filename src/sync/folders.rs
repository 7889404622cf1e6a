//! Mapping of local directories onto remote folders

use std::collections::HashMap;
use std::path::{Component, Path};

use crate::error::{Result, SyncError};
use crate::remote::{RemoteStore, Resilient};
use crate::types::FolderId;

/// Path segments of a relative directory, skipping empty and `.` segments
pub fn path_segments(relative: &Path) -> Vec<String> {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .flat_map(|s| {
            s.split(['/', '\\'])
                .filter(|part| !part.is_empty() && *part != ".")
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Resolves relative directory paths to folder ids under a fixed root.
///
/// Each level is matched by exact title among the existing subfolders; a
/// missing level is created. Resolutions are remembered for the lifetime of
/// the resolver so sibling directories share their common prefix.
pub struct FolderResolver<'a, S> {
    remote: &'a Resilient<S>,
    root_id: FolderId,
    memo: HashMap<Vec<String>, FolderId>,
}

impl<'a, S: RemoteStore> FolderResolver<'a, S> {
    pub fn new(remote: &'a Resilient<S>, root_id: impl Into<FolderId>) -> Self {
        Self {
            remote,
            root_id: root_id.into(),
            memo: HashMap::new(),
        }
    }

    /// Folder id for `relative`, creating missing levels
    pub fn resolve(&mut self, relative: &Path) -> Result<FolderId> {
        let segments = path_segments(relative);
        let mut current = self.root_id.clone();

        for depth in 1..=segments.len() {
            let prefix = &segments[..depth];
            if let Some(id) = self.memo.get(prefix) {
                current = id.clone();
                continue;
            }

            let title = &segments[depth - 1];
            let id = match self.find_child(&current, title)? {
                Some(id) => id,
                None => {
                    let folder = self
                        .remote
                        .call("new_folder", |s| s.create_folder(title, &current))?;
                    tracing::info!("Created folder: {}", title);
                    folder.id
                }
            };
            self.memo.insert(prefix.to_vec(), id.clone());
            current = id;
        }

        Ok(current)
    }

    /// First direct subfolder of `parent_id` titled `title`
    fn find_child(&self, parent_id: &str, title: &str) -> Result<Option<FolderId>> {
        let parent = self
            .remote
            .call("get_folder", |s| s.get_folder(parent_id))?;

        for child_id in parent.children.iter().filter_map(|c| c.folder_id()) {
            match self.remote.call("get_folder", |s| s.get_folder(child_id)) {
                Ok(child) if child.title == title => return Ok(Some(child.id)),
                Ok(_) => {}
                // Folders we cannot see cannot be ours
                Err(SyncError::NotFound(_)) | Err(SyncError::Forbidden(_)) => {
                    tracing::debug!("Skipping inaccessible folder {}", child_id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Call, MemoryStore, RetryPolicy};
    use pretty_assertions::assert_eq;

    fn resilient(store: MemoryStore) -> Resilient<MemoryStore> {
        Resilient::new(store, RetryPolicy::immediate(3))
    }

    #[test]
    fn test_path_segments() {
        assert_eq!(path_segments(Path::new("a/b")), vec!["a", "b"]);
        assert_eq!(path_segments(Path::new("./a//b/")), vec!["a", "b"]);
        assert!(path_segments(Path::new("")).is_empty());
        assert!(path_segments(Path::new(".")).is_empty());
    }

    #[test]
    fn test_empty_path_is_root() {
        let remote = resilient(MemoryStore::new("root"));
        let mut resolver = FolderResolver::new(&remote, "root");
        assert_eq!(resolver.resolve(Path::new("")).unwrap(), "root");
        assert!(remote.inner().calls().is_empty());
    }

    #[test]
    fn test_reuses_existing_folders() {
        let store = MemoryStore::new("root");
        let a = store.seed_folder("root", "a");
        let b = store.seed_folder(&a, "b");
        let remote = resilient(store);

        let mut resolver = FolderResolver::new(&remote, "root");
        assert_eq!(resolver.resolve(Path::new("a/b")).unwrap(), b);
        assert_eq!(remote.inner().mutation_count(), 0);
    }

    #[test]
    fn test_creates_missing_levels_once() {
        let remote = resilient(MemoryStore::new("root"));
        let mut resolver = FolderResolver::new(&remote, "root");

        let ab = resolver.resolve(Path::new("a/b")).unwrap();
        let ac = resolver.resolve(Path::new("a/c")).unwrap();
        assert_ne!(ab, ac);

        let created: Vec<_> = remote
            .inner()
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::CreateFolder { .. }))
            .collect();
        assert_eq!(created.len(), 3);
        assert_eq!(remote.inner().subfolders("root").len(), 1);
    }

    #[test]
    fn test_memo_avoids_second_lookup() {
        let remote = resilient(MemoryStore::new("root"));
        let mut resolver = FolderResolver::new(&remote, "root");
        let first = resolver.resolve(Path::new("x")).unwrap();
        remote.inner().clear_calls();

        assert_eq!(resolver.resolve(Path::new("x")).unwrap(), first);
        assert!(remote.inner().calls().is_empty());
    }

    #[test]
    fn test_fresh_resolver_finds_created_folders() {
        let remote = resilient(MemoryStore::new("root"));
        let first = FolderResolver::new(&remote, "root")
            .resolve(Path::new("a/b"))
            .unwrap();
        remote.inner().clear_calls();

        let second = FolderResolver::new(&remote, "root")
            .resolve(Path::new("a/b"))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(remote.inner().mutation_count(), 0);
    }

    #[test]
    fn test_first_matching_title_wins() {
        let store = MemoryStore::new("root");
        let first = store.seed_folder("root", "dup");
        store.seed_folder("root", "dup");
        let remote = resilient(store);

        let mut resolver = FolderResolver::new(&remote, "root");
        assert_eq!(resolver.resolve(Path::new("dup")).unwrap(), first);
    }

    #[test]
    fn test_listing_failure_propagates() {
        let remote = resilient(MemoryStore::new("root"));
        let mut resolver = FolderResolver::new(&remote, "missing-root");
        let err = resolver.resolve(Path::new("a")).unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }
}
