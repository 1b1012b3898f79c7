/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

mod common;

use apksignerust::{
    archive::{ArtifactKind, DirArchiver},
    config::{parse_job, SigningRequest},
    error::SignerError,
    mapping::{SignedApkMapping, BUILDER_OUTPUT_DIR},
    matcher::GlobMatcher,
    orchestrator::SigningOrchestrator,
    signing::JarSigner,
    ui::Ui,
    verification::{JarVerifier, Verifier},
    zipalign::ToolSource,
};
use common::{
    credentials, host_with_zipalign, write_apk, CopyingRunner, FailingRunner, TimingOutRunner,
};
use std::{collections::BTreeSet, fs, path::Path};
use tempfile::tempdir;

fn workspace(dir: &Path) -> std::path::PathBuf {
    let ws = dir.join("ws");
    fs::create_dir_all(&ws).unwrap();
    ws.canonicalize().unwrap()
}

#[test]
fn signs_aligns_places_and_archives() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    write_apk(&ws.join("app/build/a-unsigned.apk"), "a");
    write_apk(&ws.join("app/build/b.apk"), "b");
    let untouched = fs::read(ws.join("app/build/b.apk")).unwrap();

    let (host, tool) = host_with_zipalign(dir.path());
    let runner = CopyingRunner::default();
    let creds = credentials();
    let signer = JarSigner::new();
    let archiver = DirArchiver::new(dir.path().join("archive"));
    let ui = Ui::silent();

    let request = SigningRequest::new(&ws, "**/*-unsigned.apk", "release");
    let report = SigningOrchestrator::new(&creds, &host, &runner, &signer, &ui)
        .with_archiver(&archiver)
        .run(&request)
        .unwrap();

    assert_eq!(report.alias, "release");
    assert_eq!(report.artifacts.len(), 1);
    let artifact = &report.artifacts[0];
    assert_eq!(artifact.signed_output_path, ws.join("app/build/a.apk"));
    assert!(artifact.was_aligned);

    let location = report.tool.as_ref().unwrap();
    assert_eq!(location.executable_path, tool);
    assert_eq!(location.source, ToolSource::EnvZipalignPath);

    let calls = runner.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, tool);
    let args: Vec<String> = calls[0]
        .1
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    assert_eq!(&args[..3], ["-f", "-p", "4"]);
    drop(calls);

    assert_eq!(report.archived.len(), 1);
    assert_eq!(report.archived[0].kind, ArtifactKind::Signed);
    assert_eq!(
        report.archived[0].archived_path,
        "release/release/app/build/a-unsigned.apk/a.apk"
    );
    let archived = archiver
        .root()
        .join("release/release/app/build/a-unsigned.apk/a.apk");
    let signed = fs::read(&artifact.signed_output_path).unwrap();
    assert_eq!(fs::read(archived).unwrap(), signed);

    let verified = JarVerifier::new().verify(&signed).unwrap();
    assert!(verified.verified, "{:?}", verified.errors);
    assert!(verified.signed_by(&common::cert_der("release-cert.pem")));

    assert!(ws.join("app/build/a-unsigned.apk").exists());
    assert_eq!(fs::read(ws.join("app/build/b.apk")).unwrap(), untouched);
}

#[test]
fn consecutive_runs_do_not_overwrite_archived_artifacts() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    write_apk(&ws.join("SignApksBuilderTest.apk"), "plain");
    write_apk(&ws.join("SignApksBuilderTest-unsigned.apk"), "unsigned");

    let (host, _) = host_with_zipalign(dir.path());
    let runner = CopyingRunner::default();
    let creds = credentials();
    let signer = JarSigner::new();
    let archiver = DirArchiver::new(dir.path().join("archive"));
    let ui = Ui::silent();
    let orchestrator =
        SigningOrchestrator::new(&creds, &host, &runner, &signer, &ui).with_archiver(&archiver);

    let mut archived = BTreeSet::new();
    for pattern in ["SignApksBuilderTest.apk", "SignApksBuilderTest-unsigned.apk"] {
        let request = SigningRequest::new(&ws, pattern, "release")
            .with_alias("release")
            .with_archive_unsigned(true);
        let report = orchestrator.run(&request).unwrap();
        assert_eq!(report.artifacts.len(), 1);
        archived.extend(report.archived.into_iter().map(|a| a.archived_path));
    }

    let expected: BTreeSet<String> = [
        "release/release/SignApksBuilderTest.apk/SignApksBuilderTest.apk",
        "release/release/SignApksBuilderTest.apk/SignApksBuilderTest-signed.apk",
        "release/release/SignApksBuilderTest-unsigned.apk/SignApksBuilderTest-unsigned.apk",
        "release/release/SignApksBuilderTest-unsigned.apk/SignApksBuilderTest.apk",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(archived, expected);
    for path in &expected {
        assert!(archiver.root().join(path).is_file(), "{} missing", path);
    }
    assert_eq!(runner.call_count(), 2);
}

#[test]
fn skipping_alignment_never_runs_the_tool() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    write_apk(&ws.join("out/app-unsigned.apk"), "app");

    // No zipalign anywhere: the lookup itself must be skipped.
    let host = apksignerust::host::LocalHost::new().with_env(Default::default());
    let runner = CopyingRunner::default();
    let creds = credentials();
    let signer = JarSigner::new();
    let ui = Ui::silent();

    let request = SigningRequest::new(&ws, "out/*.apk", "multi")
        .with_alias("alpha")
        .with_skip_alignment(true)
        .with_mapping(SignedApkMapping::UnsignedApkBuilderDir);
    let report = SigningOrchestrator::new(&creds, &host, &runner, &signer, &ui)
        .run(&request)
        .unwrap();

    assert!(report.tool.is_none());
    assert_eq!(runner.call_count(), 0);
    assert!(report.archived.is_empty());
    let artifact = &report.artifacts[0];
    assert!(!artifact.was_aligned);
    assert_eq!(
        artifact.signed_output_path,
        ws.join(BUILDER_OUTPUT_DIR)
            .join("multi/alpha/out/app-unsigned.apk/app-signed.apk")
    );
    let verified = JarVerifier::new()
        .verify(&fs::read(&artifact.signed_output_path).unwrap())
        .unwrap();
    assert!(verified.verified, "{:?}", verified.errors);
}

#[test]
fn legacy_job_file_runs_every_entry() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    write_apk(&ws.join("phone/app-unsigned.apk"), "phone");
    write_apk(&ws.join("wear/app-unsigned.apk"), "wear");

    let job = parse_job(
        r#"
[[entries]]
keyStore = "release"
apksToSign = "phone/*-unsigned.apk"

[[entries]]
keyStore = "multi"
alias = "beta"
selection = "wear/*-unsigned.apk"
archiveSignedApks = false
"#,
    )
    .unwrap();
    assert_eq!(job.steps.len(), 2);

    let (host, _) = host_with_zipalign(dir.path());
    let runner = CopyingRunner::default();
    let creds = credentials();
    let signer = JarSigner::new();
    let ui = Ui::silent();
    let orchestrator = SigningOrchestrator::new(&creds, &host, &runner, &signer, &ui);

    let mut outputs = Vec::new();
    for step in &job.steps {
        let report = orchestrator.run(&step.to_request(&ws)).unwrap();
        outputs.extend(report.artifacts.into_iter().map(|a| a.signed_output_path));
    }

    let out = ws.join(BUILDER_OUTPUT_DIR);
    assert_eq!(
        outputs,
        vec![
            out.join("release/release/phone/app-unsigned.apk/app-signed.apk"),
            out.join("multi/beta/wear/app-unsigned.apk/app-signed.apk"),
        ]
    );
    let wear = JarVerifier::new()
        .verify(&fs::read(&outputs[1]).unwrap())
        .unwrap();
    assert!(wear.signed_by(&common::cert_der("beta-cert.pem")));
}

#[test]
fn unknown_alias_aborts_before_any_output() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    write_apk(&ws.join("app-unsigned.apk"), "app");

    let (host, _) = host_with_zipalign(dir.path());
    let runner = CopyingRunner::default();
    let creds = credentials();
    let signer = JarSigner::new();
    let archiver = DirArchiver::new(dir.path().join("archive"));
    let ui = Ui::silent();

    let request = SigningRequest::new(&ws, "*.apk", "multi").with_alias("gamma");
    let err = SigningOrchestrator::new(&creds, &host, &runner, &signer, &ui)
        .with_archiver(&archiver)
        .run(&request)
        .unwrap_err();

    assert!(matches!(err, SignerError::AliasNotFound { .. }), "{}", err);
    assert!(!ws.join("app.apk").exists());
    assert!(!archiver.root().exists());
    assert_eq!(runner.call_count(), 0);
}

#[test]
fn no_matches_is_a_validation_error() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    write_apk(&ws.join("app.aab"), "bundle");

    let (host, _) = host_with_zipalign(dir.path());
    let runner = CopyingRunner::default();
    let creds = credentials();
    let signer = JarSigner::new();
    let ui = Ui::silent();

    let err = SigningOrchestrator::new(&creds, &host, &runner, &signer, &ui)
        .run(&SigningRequest::new(&ws, "**/*.apk", "release"))
        .unwrap_err();
    assert!(matches!(err, SignerError::Validation(_)), "{}", err);
}

#[test]
fn failed_alignment_leaves_workspace_untouched() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    write_apk(&ws.join("app-unsigned.apk"), "app");

    let (host, _) = host_with_zipalign(dir.path());
    let creds = credentials();
    let signer = JarSigner::new();
    let ui = Ui::silent();

    let err = SigningOrchestrator::new(&creds, &host, &FailingRunner, &signer, &ui)
        .run(&SigningRequest::new(&ws, "*-unsigned.apk", "release"))
        .unwrap_err();

    match err {
        SignerError::ProcessFailure { stderr, input, .. } => {
            assert!(stderr.contains("Unable to open"));
            assert_eq!(input, ws.join("app-unsigned.apk"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!ws.join("app.apk").exists());
}

#[test]
fn cancelled_run_stops_before_signing() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    write_apk(&ws.join("app-unsigned.apk"), "app");

    let (host, _) = host_with_zipalign(dir.path());
    let runner = CopyingRunner::default();
    let creds = credentials();
    let signer = JarSigner::new();
    let ui = Ui::silent();
    let cancel = apksignerust::host::CancellationToken::new();
    cancel.cancel();

    let err = SigningOrchestrator::new(&creds, &host, &runner, &signer, &ui)
        .with_cancellation(cancel)
        .run(&SigningRequest::new(&ws, "*.apk", "release"))
        .unwrap_err();
    assert!(matches!(err, SignerError::Cancelled(_)), "{}", err);
    assert!(!ws.join("app.apk").exists());
}

#[test]
fn runner_failures_name_the_apk_not_the_workspace() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    write_apk(&ws.join("nested/app-unsigned.apk"), "app");

    let (host, tool) = host_with_zipalign(dir.path());
    let creds = credentials();
    let signer = JarSigner::new();
    let ui = Ui::silent();

    let err = SigningOrchestrator::new(&creds, &host, &TimingOutRunner, &signer, &ui)
        .run(&SigningRequest::new(&ws, "nested/*.apk", "release"))
        .unwrap_err();

    match err {
        SignerError::ProcessFailure {
            executable,
            input,
            status,
            ..
        } => {
            assert_eq!(executable, tool);
            assert_eq!(input, ws.join("nested/app-unsigned.apk"));
            assert_eq!(status, "timeout after 1s");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!ws.join("nested/app.apk").exists());
}

#[test]
fn missing_zipalign_aborts_before_signing() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    write_apk(&ws.join("app-unsigned.apk"), "app");

    let host = apksignerust::host::LocalHost::new().with_env(Default::default());
    let runner = CopyingRunner::default();
    let creds = credentials();
    let signer = JarSigner::new();
    let archiver = DirArchiver::new(dir.path().join("archive"));
    let ui = Ui::silent();

    let err = SigningOrchestrator::new(&creds, &host, &runner, &signer, &ui)
        .with_archiver(&archiver)
        .run(&SigningRequest::new(&ws, "*-unsigned.apk", "release"))
        .unwrap_err();

    assert!(matches!(err, SignerError::ToolNotFound { .. }), "{}", err);
    assert!(!ws.join("app.apk").exists());
    assert!(!archiver.root().exists());
    assert_eq!(runner.call_count(), 0);
}

#[test]
fn archiver_without_archive_flags_stores_nothing() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    write_apk(&ws.join("app-unsigned.apk"), "app");

    let (host, _) = host_with_zipalign(dir.path());
    let runner = CopyingRunner::default();
    let creds = credentials();
    let signer = JarSigner::new();
    let archiver = DirArchiver::new(dir.path().join("archive"));
    let ui = Ui::silent();

    let request = SigningRequest::new(&ws, "*-unsigned.apk", "release")
        .with_archive_signed(false)
        .with_archive_unsigned(false);
    let report = SigningOrchestrator::new(&creds, &host, &runner, &signer, &ui)
        .with_archiver(&archiver)
        .run(&request)
        .unwrap();

    assert_eq!(report.artifacts.len(), 1);
    assert!(ws.join("app.apk").is_file());
    assert!(report.archived.is_empty());
    assert!(!archiver.root().exists());
}

#[test]
fn builder_dir_uses_the_configured_alias_spelling() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    write_apk(&ws.join("app-unsigned.apk"), "app");

    let (host, _) = host_with_zipalign(dir.path());
    let runner = CopyingRunner::default();
    let creds = credentials();
    let signer = JarSigner::new();
    let ui = Ui::silent();

    let request = SigningRequest::new(&ws, "*-unsigned.apk", "multi")
        .with_alias("BETA")
        .with_mapping(SignedApkMapping::UnsignedApkBuilderDir);
    let report = SigningOrchestrator::new(&creds, &host, &runner, &signer, &ui)
        .run(&request)
        .unwrap();

    assert_eq!(
        report.artifacts[0].signed_output_path,
        ws.join(BUILDER_OUTPUT_DIR)
            .join("multi/BETA/app-unsigned.apk/app-signed.apk")
    );
    let verified = JarVerifier::new()
        .verify(&fs::read(&report.artifacts[0].signed_output_path).unwrap())
        .unwrap();
    assert!(verified.signed_by(&common::cert_der("beta-cert.pem")));
}

#[test]
fn custom_matcher_scan_limit_applies_to_runs() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    for i in 0..12 {
        write_apk(&ws.join(format!("d/app{}.apk", i)), "app");
    }

    let (host, _) = host_with_zipalign(dir.path());
    let runner = CopyingRunner::default();
    let creds = credentials();
    let signer = JarSigner::new();
    let ui = Ui::silent();

    let err = SigningOrchestrator::new(&creds, &host, &runner, &signer, &ui)
        .with_matcher(GlobMatcher::with_scan_limit(5))
        .run(&SigningRequest::new(&ws, "**/*.apk", "release"))
        .unwrap_err();

    assert!(err.to_string().contains("glob search limit of 5 entries"), "{}", err);
    assert_eq!(runner.call_count(), 0);
}
