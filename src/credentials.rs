/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Where keystore bytes and passwords come from.
//!
//! Credentials are looked up by an opaque keystore id so that job files never
//! contain secrets. A credentials file looks like:
//!
//! ```toml
//! [keystores.release]
//! path = "keys/release.p12"
//! password_env = "RELEASE_STORE_PASSWORD"
//! ```

use crate::error::SignerError;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    fmt, fs,
    path::{Path, PathBuf},
};

/// Raw PKCS#12 container plus its store password.
#[derive(Clone)]
pub struct KeyStoreCredentials {
    pub bytes: Vec<u8>,
    pub password: Option<String>,
}

impl fmt::Debug for KeyStoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStoreCredentials")
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub trait CredentialsStore {
    fn lookup(&self, key_store_id: &str) -> Result<KeyStoreCredentials, SignerError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialsStore {
    entries: HashMap<String, KeyStoreCredentials>,
}

impl MemoryCredentialsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        key_store_id: impl Into<String>,
        bytes: Vec<u8>,
        password: Option<String>,
    ) -> &mut Self {
        self.entries
            .insert(key_store_id.into(), KeyStoreCredentials { bytes, password });
        self
    }
}

impl CredentialsStore for MemoryCredentialsStore {
    fn lookup(&self, key_store_id: &str) -> Result<KeyStoreCredentials, SignerError> {
        self.entries
            .get(key_store_id)
            .cloned()
            .ok_or_else(|| SignerError::CredentialsNotFound {
                key_store_id: key_store_id.to_string(),
            })
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CredentialsFile {
    #[serde(default)]
    keystores: BTreeMap<String, KeyStoreEntry>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyStoreEntry {
    path: PathBuf,
    password: Option<String>,
    password_env: Option<String>,
}

/// TOML-backed store. Keystore files are read lazily on lookup.
pub struct FileCredentialsStore {
    base_dir: PathBuf,
    entries: BTreeMap<String, KeyStoreEntry>,
    env: HashMap<String, String>,
}

impl fmt::Debug for FileCredentialsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCredentialsStore")
            .field("base_dir", &self.base_dir)
            .field("ids", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FileCredentialsStore {
    pub fn load(path: &Path) -> Result<Self, SignerError> {
        let text = fs::read_to_string(path).map_err(|e| {
            SignerError::Config(format!(
                "cannot read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_toml(&text, &base_dir)
    }

    pub fn from_toml(text: &str, base_dir: &Path) -> Result<Self, SignerError> {
        let parsed: CredentialsFile = toml::from_str(text)
            .map_err(|e| SignerError::Config(format!("invalid credentials file: {}", e)))?;
        for (id, entry) in &parsed.keystores {
            if entry.password.is_some() && entry.password_env.is_some() {
                return Err(SignerError::Config(format!(
                    "key store '{}' sets both password and password_env",
                    id
                )));
            }
        }
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            entries: parsed.keystores,
            env: std::env::vars().collect(),
        })
    }

    /// Environment consulted for `password_env`.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl CredentialsStore for FileCredentialsStore {
    fn lookup(&self, key_store_id: &str) -> Result<KeyStoreCredentials, SignerError> {
        let entry =
            self.entries
                .get(key_store_id)
                .ok_or_else(|| SignerError::CredentialsNotFound {
                    key_store_id: key_store_id.to_string(),
                })?;

        let path = if entry.path.is_absolute() {
            entry.path.clone()
        } else {
            self.base_dir.join(&entry.path)
        };
        let bytes = fs::read(&path).map_err(|e| {
            SignerError::Config(format!(
                "cannot read key store '{}' from {}: {}",
                key_store_id,
                path.display(),
                e
            ))
        })?;

        let password = match (&entry.password, &entry.password_env) {
            (Some(p), _) => Some(p.clone()),
            (None, Some(var)) => self.env.get(var).cloned(),
            (None, None) => None,
        };
        Ok(KeyStoreCredentials { bytes, password })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_store_reports_missing_id() {
        let mut store = MemoryCredentialsStore::new();
        store.insert("release", vec![1, 2, 3], Some("pw".into()));
        assert_eq!(store.lookup("release").unwrap().bytes, vec![1, 2, 3]);
        let err = store.lookup("debug").unwrap_err();
        assert!(matches!(err, SignerError::CredentialsNotFound { ref key_store_id } if key_store_id == "debug"));
    }

    #[test]
    fn file_store_resolves_relative_paths_and_env_passwords() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("keys")).unwrap();
        fs::write(dir.path().join("keys/release.p12"), b"p12").unwrap();
        let creds = dir.path().join("credentials.toml");
        fs::write(
            &creds,
            r#"
[keystores.release]
path = "keys/release.p12"
password_env = "STORE_PW"

[keystores.plain]
path = "keys/release.p12"
password = "inline"
"#,
        )
        .unwrap();

        let env = HashMap::from([("STORE_PW".to_string(), "from-env".to_string())]);
        let store = FileCredentialsStore::load(&creds).unwrap().with_env(env);
        let release = store.lookup("release").unwrap();
        assert_eq!(release.bytes, b"p12");
        assert_eq!(release.password.as_deref(), Some("from-env"));
        assert_eq!(store.lookup("plain").unwrap().password.as_deref(), Some("inline"));
        assert_eq!(store.ids().collect::<Vec<_>>(), vec!["plain", "release"]);
    }

    #[test]
    fn unset_password_env_yields_no_password() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("k.p12"), b"p12").unwrap();
        let store = FileCredentialsStore::from_toml(
            "[keystores.k]\npath = \"k.p12\"\npassword_env = \"NOPE\"\n",
            dir.path(),
        )
        .unwrap()
        .with_env(HashMap::new());
        assert_eq!(store.lookup("k").unwrap().password, None);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = KeyStoreCredentials {
            bytes: vec![0; 16],
            password: Some("hunter2".into()),
        };
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("16 bytes"));
    }

    #[test]
    fn conflicting_password_sources_are_rejected() {
        let err = FileCredentialsStore::from_toml(
            "[keystores.k]\npath = \"k.p12\"\npassword = \"a\"\npassword_env = \"B\"\n",
            Path::new("."),
        )
        .unwrap_err();
        assert!(matches!(err, SignerError::Config(_)));
    }
}
