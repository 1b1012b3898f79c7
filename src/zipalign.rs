/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Locating the `zipalign` executable on the execution host.
//!
//! Search order, first hit wins:
//! 1. explicit tool path
//! 2. explicit SDK root (newest `build-tools/<version>/zipalign`)
//! 3. `ANDROID_ZIPALIGN`
//! 4. `ANDROID_HOME`, then `ANDROID_SDK_ROOT`
//! 5. every `PATH` entry: the tool itself, an SDK `tools` dir, an SDK
//!    `tools/bin` dir
//!
//! Every candidate also accepts a `.exe` sibling so Windows agents work with
//! the same configuration.

use crate::{error::SignerError, host::HostFilesystem, ui::Ui};
use std::{
    cmp::Ordering,
    collections::HashMap,
    ffi::OsString,
    fmt,
    path::{Path, PathBuf},
};

pub const ZIPALIGN: &str = "zipalign";
pub const ENV_ZIPALIGN_PATH: &str = "ANDROID_ZIPALIGN";
pub const ENV_ANDROID_HOME: &str = "ANDROID_HOME";
pub const ENV_ANDROID_SDK_ROOT: &str = "ANDROID_SDK_ROOT";
pub const ENV_PATH: &str = "PATH";

/// Byte alignment for uncompressed entries.
pub const ALIGNMENT: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSource {
    ExplicitOverride,
    ExplicitAndroidHome,
    EnvZipalignPath,
    EnvAndroidHome,
    PathToolsDir,
    PathToolsBinDir,
    PathZipalignDir,
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolSource::ExplicitOverride => "explicit zipalign path",
            ToolSource::ExplicitAndroidHome => "explicit Android SDK root",
            ToolSource::EnvZipalignPath => ENV_ZIPALIGN_PATH,
            ToolSource::EnvAndroidHome => "Android SDK root from environment",
            ToolSource::PathToolsDir => "SDK tools directory on PATH",
            ToolSource::PathToolsBinDir => "SDK tools/bin directory on PATH",
            ToolSource::PathZipalignDir => "zipalign directory on PATH",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLocation {
    pub executable_path: PathBuf,
    pub source: ToolSource,
}

impl ToolLocation {
    /// Arguments for `zipalign -f -p 4 <input> <output>`.
    pub fn command_for(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-f".into(),
            "-p".into(),
            ALIGNMENT.to_string().into(),
            input.as_os_str().to_owned(),
            output.as_os_str().to_owned(),
        ]
    }
}

pub struct ToolLocator<'h> {
    host: &'h dyn HostFilesystem,
}

impl<'h> ToolLocator<'h> {
    pub fn new(host: &'h dyn HostFilesystem) -> Self {
        Self { host }
    }

    pub fn locate(
        &self,
        explicit_path: Option<&str>,
        explicit_android_home: Option<&str>,
        env: &HashMap<String, String>,
        ui: &Ui,
    ) -> Result<ToolLocation, SignerError> {
        let mut searched = Vec::new();
        let non_empty = |v: Option<&str>| {
            v.map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };
        let from_env = |name: &str| non_empty(env.get(name).map(String::as_str));

        if let Some(raw) = non_empty(explicit_path) {
            let path = PathBuf::from(expand_vars(&raw, env));
            if let Some(found) = self.executable(&path) {
                return Ok(Self::found(found, ToolSource::ExplicitOverride, ui));
            }
            ui.warn(&format!(
                "Configured zipalign {} does not exist; searching elsewhere",
                path.display()
            ));
            searched.push(format!("explicit path {}", path.display()));
        }

        if let Some(raw) = non_empty(explicit_android_home) {
            let root = PathBuf::from(expand_vars(&raw, env));
            if let Some(found) = self.newest_in_sdk(&root) {
                return Ok(Self::found(found, ToolSource::ExplicitAndroidHome, ui));
            }
            searched.push(format!("explicit SDK root {}", root.display()));
        }

        if let Some(raw) = from_env(ENV_ZIPALIGN_PATH) {
            let path = PathBuf::from(expand_vars(&raw, env));
            if let Some(found) = self.executable(&path) {
                return Ok(Self::found(found, ToolSource::EnvZipalignPath, ui));
            }
            searched.push(format!("{}={}", ENV_ZIPALIGN_PATH, path.display()));
        }

        let sdk_var = [ENV_ANDROID_HOME, ENV_ANDROID_SDK_ROOT]
            .into_iter()
            .find_map(|name| from_env(name).map(|v| (name, v)));
        if let Some((name, raw)) = sdk_var {
            let root = PathBuf::from(expand_vars(&raw, env));
            if let Some(found) = self.newest_in_sdk(&root) {
                return Ok(Self::found(found, ToolSource::EnvAndroidHome, ui));
            }
            searched.push(format!("{}={}", name, root.display()));
        }

        if let Some(path_var) = from_env(ENV_PATH) {
            let separator = self.host.path_separator();
            for dir in path_var.split(separator).filter(|d| !d.is_empty()) {
                if let Some(found) = self.search_path_entry(Path::new(dir), ui) {
                    return Ok(Self::found(found.0, found.1, ui));
                }
            }
            searched.push(ENV_PATH.to_string());
        }

        Err(SignerError::ToolNotFound { searched })
    }

    fn found(executable_path: PathBuf, source: ToolSource, ui: &Ui) -> ToolLocation {
        ui.verbose(&format!(
            "Using zipalign {} ({})",
            executable_path.display(),
            source
        ));
        ToolLocation {
            executable_path,
            source,
        }
    }

    fn search_path_entry(&self, dir: &Path, ui: &Ui) -> Option<(PathBuf, ToolSource)> {
        if let Some(found) = self.executable(&dir.join(ZIPALIGN)) {
            return Some((found, ToolSource::PathZipalignDir));
        }

        let name = dir.file_name().and_then(|n| n.to_str());
        if name == Some("tools") && self.has_marker(dir, "android", &["", ".bat", ".exe"]) {
            ui.very_verbose(&format!("SDK tools directory on PATH: {}", dir.display()));
            let found = dir.parent().and_then(|root| self.newest_in_sdk(root))?;
            return Some((found, ToolSource::PathToolsDir));
        }

        let parent = dir.parent();
        let parent_name = parent.and_then(|p| p.file_name()).and_then(|n| n.to_str());
        if name == Some("bin")
            && parent_name == Some("tools")
            && self.has_marker(dir, "sdkmanager", &["", ".bat"])
        {
            ui.very_verbose(&format!("SDK tools/bin directory on PATH: {}", dir.display()));
            let found = parent
                .and_then(Path::parent)
                .and_then(|root| self.newest_in_sdk(root))?;
            return Some((found, ToolSource::PathToolsBinDir));
        }
        None
    }

    fn has_marker(&self, dir: &Path, marker: &str, suffixes: &[&str]) -> bool {
        suffixes
            .iter()
            .any(|s| self.host.is_file(&dir.join(format!("{}{}", marker, s))))
    }

    /// `path`, or `path.exe` when only that exists.
    fn executable(&self, path: &Path) -> Option<PathBuf> {
        if self.host.exists(path) {
            return Some(path.to_path_buf());
        }
        let mut exe = path.as_os_str().to_owned();
        exe.push(".exe");
        let exe = PathBuf::from(exe);
        self.host.exists(&exe).then_some(exe)
    }

    /// The zipalign in the highest-versioned `build-tools` folder of `sdk_root`.
    fn newest_in_sdk(&self, sdk_root: &Path) -> Option<PathBuf> {
        let build_tools = sdk_root.join("build-tools");
        let versions = self.host.list_dir(&build_tools).ok()?;

        versions
            .into_iter()
            .filter(|dir| self.host.is_dir(dir))
            .filter_map(|dir| {
                let version = dir.file_name()?.to_str()?.to_string();
                let tool = self.executable(&dir.join(ZIPALIGN))?;
                Some((version, tool))
            })
            .max_by(|a, b| compare_versions(&a.0, &b.0))
            .map(|(_, tool)| tool)
    }
}

/// Replace `${NAME}` with its value from `env`; unknown names stay verbatim.
pub fn expand_vars(input: &str, env: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match env.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + end + 3]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Order build-tools folder names: numeric parts numerically, others
/// lexically, and a trailing pre-release tag sorts before the release.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let split = |s: &str| -> Vec<String> {
        s.split(&['.', '-'][..]).map(str::to_string).collect()
    };
    let (pa, pb) = (split(a), split(b));

    for (x, y) in pa.iter().zip(pb.iter()) {
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(nx), Ok(ny)) => nx.cmp(&ny),
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(_), Err(_)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    let tail_is_numeric = |parts: &[String]| parts.first().map_or(true, |p| p.parse::<u64>().is_ok());
    match pa.len().cmp(&pb.len()) {
        Ordering::Greater if !tail_is_numeric(&pa[pb.len()..]) => Ordering::Less,
        Ordering::Less if !tail_is_numeric(&pb[pa.len()..]) => Ordering::Greater,
        other => other,
    }
}
