/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Build-artifact archival.

use crate::error::SignerError;
use filetime::{set_file_times, FileTime};
use std::{
    fmt, fs,
    path::{Component, Path, PathBuf},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Signed,
    Unsigned,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArtifactKind::Signed => "signed",
            ArtifactKind::Unsigned => "unsigned",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedArtifact {
    pub kind: ArtifactKind,
    pub source_path: PathBuf,
    /// Relative to the archive root, `/`-separated.
    pub archived_path: String,
}

pub trait ArtifactArchiver {
    /// Copy `source` to `relative_destination` under the archive and return
    /// the absolute archived path.
    fn archive(&self, source: &Path, relative_destination: &str) -> Result<PathBuf, SignerError>;
}

/// Archives into a directory, keeping the source modification time.
#[derive(Debug, Clone)]
pub struct DirArchiver {
    root: PathBuf,
}

impl DirArchiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactArchiver for DirArchiver {
    fn archive(&self, source: &Path, relative_destination: &str) -> Result<PathBuf, SignerError> {
        let relative = Path::new(relative_destination);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(SignerError::Config(format!(
                "archive destination must be a plain relative path: {}",
                relative_destination
            )));
        }

        let target = self.root.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, &target)?;

        let meta = fs::metadata(source)?;
        let mtime = FileTime::from_last_modification_time(&meta);
        set_file_times(&target, FileTime::from_last_access_time(&meta), mtime)?;
        Ok(target)
    }
}
