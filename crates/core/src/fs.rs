//! Filesystem access used to locate the sandbox tool and its working directories.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Filesystem operations the sandbox layer depends on.
pub trait FileSystem: Send + Sync {
    /// Whether `path` names an existing regular file.
    fn file_exists(&self, path: &Path) -> bool;

    /// Look up an executable by name on `PATH`.
    fn executable_path(&self, name: &str) -> Option<PathBuf>;

    /// Resolve `path` against the current directory unless it is already absolute.
    fn full_path(&self, path: &Path) -> Result<PathBuf>;

    /// Directory containing the running executable.
    fn current_exe_dir(&self) -> Result<PathBuf>;
}

/// [`FileSystem`] backed by the local disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn executable_path(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    fn full_path(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        Ok(std::env::current_dir()?.join(path))
    }

    fn current_exe_dir(&self) -> Result<PathBuf> {
        let exe = std::env::current_exe()?;
        exe.parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::internal(format!("executable {} has no parent", exe.display())))
    }
}

/// Pick the sandbox tool: the configured path when it exists, then a `PATH` lookup,
/// otherwise the configured path unchanged so that launching reports the failure.
pub fn resolve_tool_path(fs: &dyn FileSystem, configured: &str, fallback_name: &str) -> PathBuf {
    let configured = PathBuf::from(configured);
    if fs.file_exists(&configured) {
        return configured;
    }
    match fs.executable_path(fallback_name) {
        Some(found) => {
            tracing::debug!(path = %found.display(), "Sandbox tool resolved from PATH");
            found
        }
        None => {
            tracing::warn!(path = %configured.display(), name = %fallback_name, "Sandbox tool not found");
            configured
        }
    }
}
