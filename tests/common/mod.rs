/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

#![allow(dead_code)]

use apksignerust::{
    credentials::MemoryCredentialsStore,
    error::SignerError,
    host::{CancellationToken, LocalHost, ProcessOutput, ProcessRunner},
};
use std::{
    collections::HashMap,
    ffi::OsString,
    fs,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

pub const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

pub fn fixture(name: &str) -> Vec<u8> {
    fs::read(Path::new(FIXTURES).join(name)).unwrap()
}

pub fn cert_der(pem_name: &str) -> Vec<u8> {
    pem::parse(fixture(pem_name)).unwrap().contents().to_vec()
}

/// `release` (one key, alias `release`) and `multi` (`alpha`, `beta`).
pub fn credentials() -> MemoryCredentialsStore {
    let mut store = MemoryCredentialsStore::new();
    store
        .insert("release", fixture("release.p12"), Some("storepass".into()))
        .insert("multi", fixture("multi.p12"), Some("multipass".into()));
    store
}

/// A small unsigned APK with a stored and a deflated entry, a non-signature
/// META-INF file and a stale signature block from an earlier signer.
pub fn apk_bytes(marker: &str) -> Vec<u8> {
    let mut w = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    w.start_file("AndroidManifest.xml", deflated).unwrap();
    w.write_all(format!("<manifest package=\"{}\"/>", marker).as_bytes())
        .unwrap();
    w.start_file("classes.dex", deflated).unwrap();
    w.write_all(&vec![0x64; 4096]).unwrap();
    w.start_file("resources.arsc", stored).unwrap();
    w.write_all(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
    w.add_directory("res/", deflated).unwrap();
    w.start_file("res/drawable/icon.png", stored).unwrap();
    w.write_all(b"\x89PNG fake").unwrap();
    w.start_file("META-INF/services/java.lang.Object", deflated)
        .unwrap();
    w.write_all(b"kept").unwrap();
    w.start_file("META-INF/OLD.RSA", deflated).unwrap();
    w.write_all(b"stale").unwrap();
    w.finish().unwrap().into_inner()
}

pub fn write_apk(path: &Path, marker: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, apk_bytes(marker)).unwrap();
}

/// Stands in for zipalign: copies `<input>` to `<output>` and records every
/// invocation.
#[derive(Default)]
pub struct CopyingRunner {
    pub calls: Mutex<Vec<(PathBuf, Vec<OsString>)>>,
}

impl CopyingRunner {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ProcessRunner for CopyingRunner {
    fn run(
        &self,
        executable: &Path,
        args: &[OsString],
        _env_overrides: &HashMap<String, String>,
        _working_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, SignerError> {
        cancel.check("zipalign")?;
        self.calls
            .lock()
            .unwrap()
            .push((executable.to_path_buf(), args.to_vec()));
        let n = args.len();
        fs::copy(&args[n - 2], &args[n - 1])?;
        Ok(ProcessOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// Always exits 1 with a message on stderr.
pub struct FailingRunner;

impl ProcessRunner for FailingRunner {
    fn run(
        &self,
        _executable: &Path,
        _args: &[OsString],
        _env_overrides: &HashMap<String, String>,
        _working_dir: &Path,
        _cancel: &CancellationToken,
    ) -> Result<ProcessOutput, SignerError> {
        Ok(ProcessOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "Unable to open 'in.apk' as zip archive".into(),
        })
    }
}

/// Reports a timeout the way the local runner does, naming only the
/// working directory.
pub struct TimingOutRunner;

impl ProcessRunner for TimingOutRunner {
    fn run(
        &self,
        executable: &Path,
        _args: &[OsString],
        _env_overrides: &HashMap<String, String>,
        working_dir: &Path,
        _cancel: &CancellationToken,
    ) -> Result<ProcessOutput, SignerError> {
        Err(SignerError::ProcessFailure {
            executable: executable.to_path_buf(),
            input: working_dir.to_path_buf(),
            status: "timeout after 1s".into(),
            stderr: String::new(),
        })
    }
}

/// A host whose only zipalign is a placeholder file named by
/// `ANDROID_ZIPALIGN`.
pub fn host_with_zipalign(dir: &Path) -> (LocalHost, PathBuf) {
    let tool = dir.join("sdk-tools").join("zipalign");
    fs::create_dir_all(tool.parent().unwrap()).unwrap();
    fs::write(&tool, b"#!/bin/sh\n").unwrap();
    let env = HashMap::from([(
        "ANDROID_ZIPALIGN".to_string(),
        tool.display().to_string(),
    )]);
    (LocalHost::new().with_env(env), tool)
}
