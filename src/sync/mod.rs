//! Sync engine
//!
//! Reconciles a local markdown tree with a remote folder:
//! - [`folders`]: directory paths to remote folder ids
//! - [`document`]: create or rewrite the document for one file
//! - [`media`]: inline image upload through text markers
//! - [`deletion`]: propagate local deletions, clear a folder tree
//! - [`orchestrator`]: drive a full run over the tree

pub mod deletion;
pub mod document;
pub mod folders;
pub mod media;
pub mod orchestrator;

pub use deletion::{clear_folder, reconcile_deletions};
pub use document::DocumentReconciler;
pub use folders::FolderResolver;
pub use media::MediaPass;
pub use orchestrator::Mirror;
