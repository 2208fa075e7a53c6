use crate::error::{Result, RollError};
use std::path::{Component, Path, PathBuf};

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

fn unsafe_path(path: impl Into<PathBuf>, reason: &str) -> RollError {
    RollError::UnsafePath { path: path.into(), reason: reason.to_string() }
}

/// Lexical check only: `rel` must be relative and free of `..`.
pub fn check_relative(rel: &Path) -> Result<()> {
    if rel.is_absolute() {
        return Err(unsafe_path(rel, "absolute paths are not allowed"));
    }
    for comp in rel.components() {
        match comp {
            Component::ParentDir => return Err(unsafe_path(rel, "parent traversal not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path(rel, "rooted paths are not allowed"))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Resolve a roll's relative path under `root`. Without `follow_symlinks`
/// any symlink on the way is rejected; with it, the resolved path must stay
/// under `root`. A path that does not exist is returned unresolved so the
/// caller can report it as missing.
pub fn validate_path(root: &Path, rel: &Path, policy: PathPolicy) -> Result<PathBuf> {
    check_relative(rel)?;
    let candidate = root.join(rel);
    if !policy.follow_symlinks {
        let mut cur = root.to_path_buf();
        for comp in rel.components() {
            cur = cur.join(comp);
            if let Ok(m) = std::fs::symlink_metadata(&cur) {
                if m.file_type().is_symlink() {
                    return Err(unsafe_path(&cur, "symlink in path (not following)"));
                }
            }
        }
        Ok(candidate)
    } else {
        if !candidate.exists() {
            return Ok(candidate);
        }
        let root_can = std::fs::canonicalize(root).map_err(|e| RollError::io(root, e))?;
        let cand_can = std::fs::canonicalize(&candidate).map_err(|e| RollError::io(&candidate, e))?;
        if !cand_can.starts_with(&root_can) {
            return Err(unsafe_path(rel, "path escapes root"));
        }
        Ok(cand_can)
    }
}
