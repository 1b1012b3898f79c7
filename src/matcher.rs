/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Ant-style glob discovery of APKs inside a workspace.
//!
//! Patterns are comma separated and evaluated one after the other; results
//! keep first-match order and never repeat an absolute path. The total number
//! of filesystem entries visited in one call is bounded so a stray `**` over a
//! huge workspace fails fast instead of hanging the build.

use crate::error::SignerError;
use glob::{MatchOptions, Pattern};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

pub const DEFAULT_SCAN_LIMIT: usize = 10_000;

/// Never descended, as in Ant's default excludes.
const VCS_DIRS: &[&str] = &[".git", ".svn", ".hg", "CVS", ".bzr"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedFile {
    pub absolute_path: PathBuf,
    /// Path below the workspace root, `/`-separated.
    pub relative_path: String,
}

impl MatchedFile {
    /// Directory part of `relative_path`; empty for files at the root.
    pub fn relative_dir(&self) -> &str {
        self.relative_path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("")
    }

    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.relative_path)
    }
}

struct CompiledPattern {
    source: String,
    base: String,
    max_depth: Option<usize>,
    pattern: Pattern,
}

#[derive(Debug, Clone)]
pub struct GlobMatcher {
    scan_limit: usize,
}

impl Default for GlobMatcher {
    fn default() -> Self {
        Self {
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }
}

impl GlobMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scan_limit(scan_limit: usize) -> Self {
        Self { scan_limit }
    }

    /// Split comma-separated pattern lists, trimming and dropping empties.
    pub fn split_patterns<S: AsRef<str>>(patterns: &[S]) -> Vec<String> {
        patterns
            .iter()
            .flat_map(|p| p.as_ref().split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Resolve `patterns` under `root`.
    pub fn match_patterns<S: AsRef<str>>(
        &self,
        patterns: &[S],
        root: &Path,
    ) -> Result<Vec<MatchedFile>, SignerError> {
        let root = Self::canonical_root(root)?;
        let mut scanned = 0usize;
        let mut seen = HashSet::new();
        let mut matches = Vec::new();

        for source in Self::split_patterns(patterns) {
            let compiled = Self::compile(&source)?;
            for file in self.scan(&compiled, &root, &mut scanned)? {
                if seen.insert(file.absolute_path.clone()) {
                    matches.push(file);
                }
            }
        }
        Ok(matches)
    }

    /// Pre-flight check. `None` when every pattern matches at least one file,
    /// otherwise a message describing the first problem found.
    pub fn validate<S: AsRef<str>>(&self, patterns: &[S], root: &Path) -> Option<String> {
        let root = match Self::canonical_root(root) {
            Ok(root) => root,
            Err(e) => return Some(e.to_string()),
        };
        let sources = Self::split_patterns(patterns);
        if sources.is_empty() {
            return Some("no APK patterns given".into());
        }

        let mut scanned = 0usize;
        for source in sources {
            let found = Self::compile(&source).and_then(|c| self.scan(&c, &root, &mut scanned));
            match found {
                Ok(files) if files.is_empty() => {
                    return Some(format!("'{}' doesn't match anything", source))
                }
                Ok(_) => {}
                Err(SignerError::Validation(msg)) => return Some(msg),
                Err(e) => return Some(e.to_string()),
            }
        }
        None
    }

    fn canonical_root(root: &Path) -> Result<PathBuf, SignerError> {
        fs::canonicalize(root).map_err(|e| {
            SignerError::Validation(format!(
                "workspace '{}' is not accessible: {}",
                root.display(),
                e
            ))
        })
    }

    fn compile(source: &str) -> Result<CompiledPattern, SignerError> {
        let mut normalized = source.replace('\\', "/");
        if normalized.ends_with('/') {
            normalized.push_str("**");
        }

        let is_absolute = normalized.starts_with('/')
            || normalized.as_bytes().get(1) == Some(&b':');
        if is_absolute {
            return Err(SignerError::Validation(format!(
                "'{}' must be relative to the workspace",
                source
            )));
        }

        let mut segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        // A trailing `**` selects every file below, at any depth.
        if segments.last() == Some(&"**") {
            segments.push("*");
        }
        if segments.iter().any(|s| *s == "..") {
            return Err(SignerError::Validation(format!(
                "'{}' must not leave the workspace",
                source
            )));
        }

        let pattern = Pattern::new(&segments.join("/")).map_err(|e| {
            SignerError::Validation(format!("invalid glob pattern '{}': {}", source, e))
        })?;

        // Walk from the longest literal directory prefix.
        let literal = segments
            .iter()
            .take(segments.len().saturating_sub(1))
            .take_while(|s| !s.contains(&['*', '?', '['][..]))
            .count();
        let rest = &segments[literal..];
        let max_depth = if rest.iter().any(|s| s.contains("**")) {
            None
        } else {
            Some(rest.len())
        };

        Ok(CompiledPattern {
            source: source.to_string(),
            base: segments[..literal].join("/"),
            max_depth,
            pattern,
        })
    }

    fn scan(
        &self,
        compiled: &CompiledPattern,
        root: &Path,
        scanned: &mut usize,
    ) -> Result<Vec<MatchedFile>, SignerError> {
        let base = if compiled.base.is_empty() {
            root.to_path_buf()
        } else {
            root.join(&compiled.base)
        };
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let mut walker = WalkDir::new(&base).min_depth(1).sort_by_file_name();
        if let Some(depth) = compiled.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut found = Vec::new();
        let entries = walker.into_iter().filter_entry(|e| {
            !(e.file_type().is_dir()
                && VCS_DIRS.iter().any(|d| e.file_name() == std::ffi::OsStr::new(d)))
        });
        for entry in entries {
            let entry = entry.map_err(|e| {
                SignerError::Validation(format!(
                    "cannot scan '{}' for '{}': {}",
                    base.display(),
                    compiled.source,
                    e
                ))
            })?;

            *scanned += 1;
            if *scanned > self.scan_limit {
                return Err(SignerError::Validation(format!(
                    "glob search limit of {} entries reached while matching '{}'",
                    self.scan_limit, compiled.source
                )));
            }

            let is_file = entry.file_type().is_file()
                || (entry.path_is_symlink() && entry.path().is_file());
            if !is_file {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let relative_path = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if compiled.pattern.matches_with(&relative_path, MATCH_OPTIONS) {
                found.push(MatchedFile {
                    absolute_path: entry.path().to_path_buf(),
                    relative_path,
                });
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn workspace(files: &[&str]) -> TempDir {
        let dir = tempdir().unwrap();
        for f in files {
            let p = dir.path().join(f);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, b"apk").unwrap();
        }
        dir
    }

    fn rels(files: &[MatchedFile]) -> Vec<&str> {
        files.iter().map(|f| f.relative_path.as_str()).collect()
    }

    #[test]
    fn duplicate_patterns_yield_one_entry() {
        let ws = workspace(&["a.apk"]);
        let found = GlobMatcher::new()
            .match_patterns(&["a.apk", "a.apk"], ws.path())
            .unwrap();
        assert_eq!(rels(&found), vec!["a.apk"]);
    }

    #[test]
    fn comma_separated_patterns_keep_first_match_order() {
        let ws = workspace(&[
            "app/build/outputs/apk/release/app-release-unsigned.apk",
            "lib/z.apk",
            "lib/b.apk",
            "top.apk",
        ]);
        let found = GlobMatcher::new()
            .match_patterns(&["lib/*.apk, **/*-unsigned.apk ,, **/*.apk"], ws.path())
            .unwrap();
        assert_eq!(
            rels(&found),
            vec![
                "lib/b.apk",
                "lib/z.apk",
                "app/build/outputs/apk/release/app-release-unsigned.apk",
                "top.apk",
            ]
        );
        let unique: HashSet<_> = found.iter().map(|f| &f.absolute_path).collect();
        assert_eq!(unique.len(), found.len());
    }

    #[test]
    fn single_star_stays_within_a_segment() {
        let ws = workspace(&["a-unsigned.apk", "b.apk", "sub/c-unsigned.apk"]);
        let found = GlobMatcher::new()
            .match_patterns(&["*-unsigned.apk"], ws.path())
            .unwrap();
        assert_eq!(rels(&found), vec!["a-unsigned.apk"]);
    }

    #[test]
    fn trailing_slash_means_everything_below() {
        let ws = workspace(&["out/a.apk", "out/x/b.apk", "other.apk"]);
        let found = GlobMatcher::new()
            .match_patterns(&["out\\"], ws.path())
            .unwrap();
        assert_eq!(rels(&found), vec!["out/a.apk", "out/x/b.apk"]);
    }

    #[test]
    fn vcs_directories_are_skipped() {
        let ws = workspace(&[".git/objects/a.apk", "b.apk"]);
        let found = GlobMatcher::new()
            .match_patterns(&["**/*.apk"], ws.path())
            .unwrap();
        assert_eq!(rels(&found), vec!["b.apk"]);
    }

    #[test]
    fn invalid_and_escaping_patterns_are_validation_errors() {
        let ws = workspace(&["a.apk"]);
        let m = GlobMatcher::new();
        assert!(matches!(
            m.match_patterns(&["[a.apk"], ws.path()),
            Err(SignerError::Validation(_))
        ));
        assert!(matches!(
            m.match_patterns(&["../*.apk"], ws.path()),
            Err(SignerError::Validation(_))
        ));
        assert!(matches!(
            m.match_patterns(&["/etc/*.apk"], ws.path()),
            Err(SignerError::Validation(_))
        ));
    }

    #[test]
    fn scan_limit_is_reported_not_panicked() {
        let names: Vec<String> = (0..30).map(|i| format!("d/f{}.txt", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let ws = workspace(&refs);
        let m = GlobMatcher::with_scan_limit(10);

        let err = m.match_patterns(&["**/*.apk"], ws.path()).unwrap_err();
        assert!(err.to_string().contains("glob search limit of 10 entries"));

        let msg = m.validate(&["**/*.apk"], ws.path()).unwrap();
        assert!(msg.contains("glob search limit"));
    }

    #[test]
    fn validate_reports_patterns_without_matches() {
        let ws = workspace(&["a.apk"]);
        let m = GlobMatcher::new();
        assert_eq!(m.validate(&["a.apk"], ws.path()), None);
        assert_eq!(
            m.validate(&["a.apk,missing/*.apk"], ws.path()).as_deref(),
            Some("'missing/*.apk' doesn't match anything")
        );
        assert!(m.validate(&[" , "], ws.path()).is_some());
        assert!(m.validate(&["[bad"], ws.path()).unwrap().contains("[bad"));
    }

    #[test]
    fn matched_file_exposes_directory_and_name() {
        let f = MatchedFile {
            absolute_path: PathBuf::from("/ws/app/build/a.apk"),
            relative_path: "app/build/a.apk".into(),
        };
        assert_eq!(f.relative_dir(), "app/build");
        assert_eq!(f.file_name(), "a.apk");
        let top = MatchedFile {
            absolute_path: PathBuf::from("/ws/a.apk"),
            relative_path: "a.apk".into(),
        };
        assert_eq!(top.relative_dir(), "");
    }
}
