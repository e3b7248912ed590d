#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod cache;
pub mod config;
pub mod error;
pub mod graph;
pub mod lock;
pub mod paths;
pub mod repository;
pub mod version;

pub use cache::{
    Cache, CacheContext, CacheDependency, DirectoryDependency, FileDependency, NamedTriggers,
};
pub use config::{Config, ConflictPolicy, LockOptions};
pub use error::{Error, Result};
pub use graph::{
    get_exports, resolve_conflicts, CachingExporter, DependencyGraph, DependencyWalker,
    Diagnostic, Disposition, ExportTarget, FrameworkId, GraphItem, GraphNode, LibraryExporter,
    LibraryExports, LibraryIdentity, LibraryProvider, LibraryRange, LibraryType, NodeId,
    PackageFolderExporter, PackageFolderProvider, ProjectProvider, ProviderMatch, Reference,
    WalkOptions,
};
pub use lock::{with_file_lock, FileLock};
pub use repository::{
    commit, open_publisher, pull, push, ChangeRecord, CommitOutcome, FileSystemPublisher,
    HttpPublisher, RepositoryPublisher, TransmitOutcome, TransmitRecord,
};
pub use version::VERSION;
