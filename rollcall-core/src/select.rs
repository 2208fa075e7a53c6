use crate::error::{Result, RollError};
use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Which files under a root make up a batch.
///
/// A pattern without `/` is matched against file names in every visited
/// directory (`*.jpg`); a pattern with `/` is matched against the whole
/// relative path (`photos/*.jpg`).
#[derive(Clone, Debug)]
pub struct Selector {
    pub pattern: String,
    pub recurse: bool,
    pub exclude: Vec<String>,
}

impl Selector {
    pub fn all(recurse: bool) -> Self {
        Self { pattern: "*".to_string(), recurse, exclude: Vec::new() }
    }
}

fn bad_glob(e: globset::Error) -> RollError {
    RollError::Build(format!("bad file pattern: {e}"))
}

fn build_matcher(pattern: &str) -> Result<GlobMatcher> {
    let glob = GlobBuilder::new(pattern).literal_separator(true).build().map_err(bad_glob)?;
    Ok(glob.compile_matcher())
}

fn build_excludes(excludes: &[String]) -> Result<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for g in excludes {
        b.add(Glob::new(g).map_err(bad_glob)?);
    }
    b.build().map_err(bad_glob)
}

/// Regular files under `root` matched by `sel`, in enumeration order.
/// Symlinks are not followed and never selected.
pub fn select_files(root: &Path, sel: &Selector) -> Result<Vec<PathBuf>> {
    let md = std::fs::metadata(root).map_err(|e| RollError::io(root, e))?;
    if !md.is_dir() {
        return Err(RollError::Build(format!("{} is not a directory", root.display())));
    }
    let matcher = build_matcher(&sel.pattern)?;
    let by_path = sel.pattern.contains('/');
    let exc = build_excludes(&sel.exclude)?;

    let mut walker = WalkDir::new(root).min_depth(1);
    if !sel.recurse {
        walker = walker.max_depth(1);
    }
    let mut v = vec![];
    for ent in walker {
        let ent = match ent {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !ent.file_type().is_file() {
            continue;
        }
        let path = ent.path();
        let rel = match path.strip_prefix(root) {
            Ok(r) => r.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        let hit = if by_path {
            matcher.is_match(&rel)
        } else {
            matcher.is_match(ent.file_name())
        };
        if hit && !exc.is_match(&rel) {
            v.push(path.to_path_buf());
        }
    }
    Ok(v)
}
