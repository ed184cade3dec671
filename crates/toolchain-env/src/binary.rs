//! Toolchain binary resolution
//!
//! The binary is resolved once and its absolute path is handed to every
//! subprocess. Nothing here mutates the process environment; well-known
//! install locations that are usually only added to `PATH` by shell profile
//! scripts are searched directly instead.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ToolchainError;
use crate::Result;

/// Absolute path to a resolved toolchain executable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolchainBinary {
    path: PathBuf,
}

impl ToolchainBinary {
    /// Use `path` as-is, after checking it is an executable file.
    pub fn at(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !is_executable(&path) {
            return Err(ToolchainError::NotExecutable(path));
        }
        Ok(Self { path })
    }

    /// Resolve `name`: an explicit path wins, then `PATH`, then the
    /// well-known install directories.
    pub fn resolve(name: &str, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::at(path);
        }

        let dirs = search_dirs();
        let found = find_in(name, &dirs);
        match found {
            Some(path) => {
                info!(binary = %path.display(), "resolved toolchain binary");
                Ok(Self { path })
            }
            None => Err(ToolchainError::NotFound {
                name: name.to_string(),
                searched: dirs.len(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Display for ToolchainBinary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// First executable named `name` in `dirs`.
pub fn find_in(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(name))
        .inspect(|candidate| debug!(candidate = %candidate.display(), "probing"))
        .find(|candidate| is_executable(candidate))
}

/// `PATH` entries followed by install locations the toolchain installer
/// normally wires up through shell profiles.
pub fn search_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|raw| std::env::split_paths(&raw).collect())
        .unwrap_or_default();

    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        dirs.push(home.join(".local/share/dfx/bin"));
        dirs.push(home.join(".local/bin"));
        dirs.push(home.join("bin"));
    }
    dirs.push(PathBuf::from("/usr/local/bin"));
    dirs.push(PathBuf::from("/opt/homebrew/bin"));

    let mut seen = std::collections::HashSet::new();
    dirs.retain(|d| seen.insert(d.clone()));
    dirs
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[cfg(unix)]
    fn write_executable(dir: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_find_in_returns_first_match() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        write_executable(b.path(), "faketool");
        let dirs = vec![a.path().to_path_buf(), b.path().to_path_buf()];
        assert_eq!(find_in("faketool", &dirs), Some(b.path().join("faketool")));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_file_is_skipped() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("faketool"), "data").unwrap();
        assert_eq!(find_in("faketool", &[dir.path().to_path_buf()]), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_explicit_path_wins() {
        let dir = tempdir().unwrap();
        let path = write_executable(dir.path(), "custom-dfx");
        let binary = ToolchainBinary::resolve("dfx", Some(&path)).expect("resolve");
        assert_eq!(binary.path(), path.as_path());
    }

    #[test]
    fn test_explicit_missing_path_is_not_executable() {
        let err = ToolchainBinary::resolve("dfx", Some(Path::new("/no/such/dfx"))).unwrap_err();
        assert!(matches!(err, ToolchainError::NotExecutable(_)));
        assert!(err.is_absent());
    }

    #[test]
    fn test_unknown_name_not_found() {
        let err = ToolchainBinary::resolve("canship-no-such-toolchain-binary", None).unwrap_err();
        assert!(matches!(err, ToolchainError::NotFound { .. }));
    }
}
