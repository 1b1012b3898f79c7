/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Signing requests and the job-definition files they are read from.
//!
//! Job files are TOML. The current shape (`version = 3`) is a list of
//! `[[steps]]`; older shapes written by earlier releases are upgraded once,
//! in [`upgrade`], before anything else looks at them.

use crate::{error::SignerError, mapping::SignedApkMapping, matcher::GlobMatcher};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const CURRENT_JOB_VERSION: u32 = 3;

/// One signing invocation. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    pub workspace_root: PathBuf,
    pub glob_patterns: Vec<String>,
    pub key_store_id: String,
    /// Empty selects the key store's only private key.
    pub key_alias: String,
    pub archive_signed: bool,
    pub archive_unsigned: bool,
    pub skip_alignment: bool,
    pub android_home_override: Option<String>,
    pub alignment_tool_override: Option<String>,
    pub signed_apk_mapping: SignedApkMapping,
}

impl SigningRequest {
    /// `apks_to_sign` is a comma-separated list of workspace-relative globs.
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        apks_to_sign: &str,
        key_store_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            glob_patterns: GlobMatcher::split_patterns(&[apks_to_sign]),
            key_store_id: key_store_id.into(),
            key_alias: String::new(),
            archive_signed: true,
            archive_unsigned: false,
            skip_alignment: false,
            android_home_override: None,
            alignment_tool_override: None,
            signed_apk_mapping: SignedApkMapping::default(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.key_alias = alias.into().trim().to_string();
        self
    }

    pub fn with_archive_signed(mut self, archive: bool) -> Self {
        self.archive_signed = archive;
        self
    }

    pub fn with_archive_unsigned(mut self, archive: bool) -> Self {
        self.archive_unsigned = archive;
        self
    }

    pub fn with_skip_alignment(mut self, skip: bool) -> Self {
        self.skip_alignment = skip;
        self
    }

    pub fn with_android_home(mut self, path: Option<&str>) -> Self {
        self.android_home_override = non_empty(path);
        self
    }

    pub fn with_zipalign_path(mut self, path: Option<&str>) -> Self {
        self.alignment_tool_override = non_empty(path);
        self
    }

    pub fn with_mapping(mut self, mapping: SignedApkMapping) -> Self {
        self.signed_apk_mapping = mapping;
        self
    }

    pub fn validate(&self) -> Result<(), SignerError> {
        if self.key_store_id.trim().is_empty() {
            return Err(SignerError::Config("a key store id is required".into()));
        }
        if self.glob_patterns.is_empty() {
            return Err(SignerError::Config(
                "no APK patterns given; set the APKs to sign".into(),
            ));
        }
        Ok(())
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn default_true() -> bool {
    true
}

/// A `[[steps]]` table of a current job file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningStep {
    pub apks_to_sign: String,
    pub key_store_id: String,
    #[serde(default)]
    pub key_alias: String,
    #[serde(default = "default_true")]
    pub archive_signed_apks: bool,
    #[serde(default)]
    pub archive_unsigned_apks: bool,
    #[serde(default)]
    pub skip_zipalign: bool,
    #[serde(default)]
    pub android_home: Option<String>,
    #[serde(default)]
    pub zipalign_path: Option<String>,
    #[serde(default)]
    pub signed_apk_mapping: SignedApkMapping,
}

impl SigningStep {
    pub fn to_request(&self, workspace_root: &Path) -> SigningRequest {
        SigningRequest::new(workspace_root, &self.apks_to_sign, self.key_store_id.as_str())
            .with_alias(self.key_alias.as_str())
            .with_archive_signed(self.archive_signed_apks)
            .with_archive_unsigned(self.archive_unsigned_apks)
            .with_skip_alignment(self.skip_zipalign)
            .with_android_home(self.android_home.as_deref())
            .with_zipalign_path(self.zipalign_path.as_deref())
            .with_mapping(self.signed_apk_mapping)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDefinition {
    pub version: u32,
    #[serde(default)]
    pub steps: Vec<SigningStep>,
}

/// Version 1 shape: one builder holding several `[[entries]]`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LegacyEntry {
    key_store: String,
    #[serde(default)]
    alias: String,
    #[serde(alias = "selection")]
    apks_to_sign: String,
    #[serde(default = "default_true")]
    archive_signed_apks: bool,
    #[serde(default)]
    archive_unsigned_apks: bool,
}

/// Version 2 shape: `[[builders]]`, before alignment could be skipped.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LegacyBuilder {
    key_store_id: String,
    #[serde(default)]
    key_alias: String,
    apks_to_sign: String,
    #[serde(default = "default_true")]
    archive_signed_apks: bool,
    #[serde(default)]
    archive_unsigned_apks: bool,
    #[serde(default)]
    android_home: Option<String>,
    #[serde(default)]
    zipalign_path: Option<String>,
}

#[derive(Deserialize)]
struct V1File {
    #[serde(default)]
    entries: Vec<LegacyEntry>,
}

#[derive(Deserialize)]
struct V2File {
    #[serde(default)]
    builders: Vec<LegacyBuilder>,
}

impl From<LegacyEntry> for SigningStep {
    fn from(e: LegacyEntry) -> Self {
        SigningStep {
            apks_to_sign: e.apks_to_sign,
            key_store_id: e.key_store,
            key_alias: e.alias,
            archive_signed_apks: e.archive_signed_apks,
            archive_unsigned_apks: e.archive_unsigned_apks,
            skip_zipalign: false,
            android_home: None,
            zipalign_path: None,
            signed_apk_mapping: SignedApkMapping::UnsignedApkBuilderDir,
        }
    }
}

impl From<LegacyBuilder> for SigningStep {
    fn from(b: LegacyBuilder) -> Self {
        SigningStep {
            apks_to_sign: b.apks_to_sign,
            key_store_id: b.key_store_id,
            key_alias: b.key_alias,
            archive_signed_apks: b.archive_signed_apks,
            archive_unsigned_apks: b.archive_unsigned_apks,
            skip_zipalign: false,
            android_home: b.android_home,
            zipalign_path: b.zipalign_path,
            signed_apk_mapping: SignedApkMapping::UnsignedApkBuilderDir,
        }
    }
}

/// Bring any known job-file shape to the current version. Files without a
/// `version` key are classified by their top-level table.
pub fn upgrade(mut table: toml::Table) -> Result<JobDefinition, SignerError> {
    let version = match table.remove("version") {
        Some(toml::Value::Integer(v)) => u32::try_from(v)
            .map_err(|_| SignerError::Config(format!("invalid job file version {}", v)))?,
        Some(other) => {
            return Err(SignerError::Config(format!(
                "job file version must be an integer, found {}",
                other.type_str()
            )))
        }
        None if table.contains_key("entries") => 1,
        None if table.contains_key("builders") => 2,
        None if table.contains_key("steps") => CURRENT_JOB_VERSION,
        None => {
            return Err(SignerError::Config(
                "cannot determine job file version: expected [[steps]], [[builders]] or [[entries]]"
                    .into(),
            ))
        }
    };

    let invalid = |e: toml::de::Error| {
        SignerError::Config(format!("invalid version {} job file: {}", version, e))
    };
    let value = toml::Value::Table(table);
    let steps: Vec<SigningStep> = match version {
        1 => value
            .try_into::<V1File>()
            .map_err(invalid)?
            .entries
            .into_iter()
            .map(SigningStep::from)
            .collect(),
        2 => value
            .try_into::<V2File>()
            .map_err(invalid)?
            .builders
            .into_iter()
            .map(SigningStep::from)
            .collect(),
        CURRENT_JOB_VERSION => {
            let mut table = match value {
                toml::Value::Table(t) => t,
                _ => toml::Table::new(),
            };
            table.insert("version".into(), toml::Value::Integer(CURRENT_JOB_VERSION.into()));
            toml::Value::Table(table)
                .try_into::<JobDefinition>()
                .map_err(invalid)?
                .steps
        }
        other => {
            return Err(SignerError::Config(format!(
                "unsupported job file version {} (this release reads 1 to {})",
                other, CURRENT_JOB_VERSION
            )))
        }
    };

    if steps.is_empty() {
        return Err(SignerError::Config("job file defines no signing steps".into()));
    }
    Ok(JobDefinition {
        version: CURRENT_JOB_VERSION,
        steps,
    })
}

pub fn parse_job(text: &str) -> Result<JobDefinition, SignerError> {
    let table: toml::Table = toml::from_str(text)
        .map_err(|e| SignerError::Config(format!("invalid job file: {}", e)))?;
    upgrade(table)
}

pub fn load_job(path: &Path) -> Result<JobDefinition, SignerError> {
    let text = fs::read_to_string(path).map_err(|e| {
        SignerError::Config(format!("cannot read job file {}: {}", path.display(), e))
    })?;
    parse_job(&text)
}
