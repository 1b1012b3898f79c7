/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Where a signed APK is written, given its unsigned input.

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

pub const BUILDER_OUTPUT_DIR: &str = "SignApksBuilder-out";
const UNSIGNED_MARKER: &str = "-unsigned";
const SIGNED_MARKER: &str = "-signed";

pub trait OutputMapper {
    /// Destination of the signed counterpart of `unsigned_apk`. Pure.
    fn map(&self, unsigned_apk: &Path, workspace_root: &Path) -> PathBuf;
}

/// Configured placement strategy. Chosen once per signing request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignedApkMapping {
    /// `app-unsigned.apk` becomes `app.apk` next to it.
    #[default]
    UnsignedApkSibling,
    /// `SignApksBuilder-out/<store>/<alias>/<input path>/app-signed.apk`.
    UnsignedApkBuilderDir,
}

impl SignedApkMapping {
    pub fn mapper(&self, key_store_id: &str, alias: &str) -> Box<dyn OutputMapper> {
        match self {
            SignedApkMapping::UnsignedApkSibling => Box::new(SiblingMapping),
            SignedApkMapping::UnsignedApkBuilderDir => Box::new(BuilderDirMapping {
                key_store_id: key_store_id.to_string(),
                alias: alias.to_string(),
            }),
        }
    }
}

impl fmt::Display for SignedApkMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignedApkMapping::UnsignedApkSibling => "sibling",
            SignedApkMapping::UnsignedApkBuilderDir => "builder-dir",
        })
    }
}

impl FromStr for SignedApkMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sibling" | "unsigned_apk_sibling" => Ok(SignedApkMapping::UnsignedApkSibling),
            "builder-dir" | "unsigned_apk_builder_dir" => {
                Ok(SignedApkMapping::UnsignedApkBuilderDir)
            }
            other => Err(format!(
                "unknown signed APK mapping '{}' (expected sibling or builder-dir)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SiblingMapping;

impl OutputMapper for SiblingMapping {
    fn map(&self, unsigned_apk: &Path, _workspace_root: &Path) -> PathBuf {
        let name = file_name(unsigned_apk);
        let (stem, ext) = split_extension(&name);
        let signed = match stem.strip_suffix(UNSIGNED_MARKER) {
            Some(base) if !base.is_empty() => format!("{}{}", base, ext),
            _ => format!("{}{}{}", stem, SIGNED_MARKER, ext),
        };
        unsigned_apk.with_file_name(signed)
    }
}

#[derive(Debug, Clone)]
pub struct BuilderDirMapping {
    pub key_store_id: String,
    pub alias: String,
}

impl OutputMapper for BuilderDirMapping {
    fn map(&self, unsigned_apk: &Path, workspace_root: &Path) -> PathBuf {
        let name = file_name(unsigned_apk);
        let (stem, ext) = split_extension(&name);
        let base = stem.strip_suffix(UNSIGNED_MARKER).unwrap_or(stem);
        let signed = format!("{}{}{}", base, SIGNED_MARKER, ext);

        let relative = unsigned_apk
            .strip_prefix(workspace_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(&name));

        workspace_root
            .join(BUILDER_OUTPUT_DIR)
            .join(&self.key_store_id)
            .join(&self.alias)
            .join(relative)
            .join(signed)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `("app", ".apk")`; `("app", "")` without an extension. A leading dot is
/// part of the stem.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    }
}
