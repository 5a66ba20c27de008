//! Syncfs implements the local side of the sync loop: building the transfer archive, honoring
//! ignore rules, and watching the Devfile and the working directory for changes.

pub mod archive;
pub mod ignorefile;
pub mod watch;

pub use archive::build_archive;
pub use ignorefile::IgnoreMatcher;
pub use watch::{LocalWatcher, SourceChange};

/// Error is the set of failures the filesystem side of the sync loop can surface. Per the
/// reconciliation design, every variant here is treated as fatal to the orchestrator.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Io indicates a filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Walk indicates the directory walk itself failed (permissions, loops).
    #[error("walking directory: {0}")]
    Walk(#[from] walkdir::Error),
    /// Ignore indicates the ignore-pattern compiler rejected a rule.
    #[error("compiling ignore rules: {0}")]
    Ignore(#[from] ::ignore::Error),
    /// Notify indicates the OS-level filesystem watcher failed to start or deliver an event.
    #[error("filesystem watch error: {0}")]
    Notify(#[from] notify::Error),
    /// BadRoot indicates the archive root has no usable top-level directory name.
    #[error("bad archive root: {0}")]
    BadRoot(String),
    /// ClockSkew indicates the written tar's mtime could not be represented as the mod-time
    /// token (a signed 64-bit nanosecond count).
    #[error("tar mtime out of range: {0}")]
    ClockSkew(#[from] std::num::TryFromIntError),
}

/// Result is the typedef used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
