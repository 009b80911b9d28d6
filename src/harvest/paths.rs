//! Selects files of interest from an unpacked archive tree.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::PathPattern;

/// One file matched by one pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    /// Source text of the pattern that matched
    pub pattern: String,

    /// Location of the file on disk
    pub real_path: PathBuf,

    /// `/` followed by the path relative to the unpacked root
    pub virtual_path: String,
}

impl PathMatch {
    /// Identifier of the binary inside its archive: `<archive>/<virtual path>`.
    pub fn binary_name(&self, archive: &str) -> String {
        format!("{}/{}", archive, self.virtual_path.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct PathMatcher {
    patterns: Vec<PathPattern>,
}

impl PathMatcher {
    pub fn new(patterns: Vec<PathPattern>) -> Self {
        Self { patterns }
    }

    /// Walks `root` once per pattern, yielding every regular file whose virtual
    /// path matches. Symbolic links are never yielded nor followed.
    ///
    /// Entries that cannot be read are skipped.
    pub fn matches<'a>(&'a self, root: &'a Path) -> impl Iterator<Item = PathMatch> + 'a {
        self.patterns
            .iter()
            .flat_map(move |pattern| walk_pattern(pattern, root))
    }

    /// Like [`matches`](Self::matches), grouped by pattern in configuration order.
    pub fn matches_by_pattern(&self, root: &Path) -> Vec<(PathPattern, Vec<PathMatch>)> {
        self.patterns
            .iter()
            .map(|pattern| (pattern.clone(), walk_pattern(pattern, root).collect()))
            .collect()
    }
}

fn walk_pattern<'a>(pattern: &'a PathPattern, root: &'a Path) -> impl Iterator<Item = PathMatch> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(move |entry| {
            let virtual_path = to_virtual_path(root, entry.path())?;
            pattern.is_match(&virtual_path).then(|| PathMatch {
                pattern: pattern.as_str().to_string(),
                real_path: entry.into_path(),
                virtual_path,
            })
        })
}

fn to_virtual_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(format!("/{}", parts.join("/")))
}
