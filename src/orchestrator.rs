/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! The signing step end to end.
//!
//! A run has two phases. Phase one discovers the inputs, resolves the key,
//! locates `zipalign`, and signs and aligns every match into a private temp
//! directory. Phase two starts only when all of them succeeded: it archives
//! originals, moves the results to their mapped destinations and archives
//! the signed outputs. A failure in phase one leaves the workspace untouched.

use crate::{
    archive::{ArchivedArtifact, ArtifactArchiver, ArtifactKind},
    config::SigningRequest,
    credentials::CredentialsStore,
    error::SignerError,
    host::{CancellationToken, HostFilesystem, ProcessRunner},
    keys::{KeyMaterial, KeyResolver},
    matcher::{GlobMatcher, MatchedFile},
    signing::Signer,
    ui::Ui,
    zipalign::{ToolLocation, ToolLocator},
};
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedArtifact {
    pub unsigned_source_path: PathBuf,
    pub signed_output_path: PathBuf,
    pub was_aligned: bool,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub artifacts: Vec<SignedArtifact>,
    pub archived: Vec<ArchivedArtifact>,
    /// `None` when alignment was skipped.
    pub tool: Option<ToolLocation>,
    /// The alias the key store actually resolved.
    pub alias: String,
}

/// A signed (and maybe aligned) file waiting in the temp dir.
struct Staged {
    matched: MatchedFile,
    temp_path: PathBuf,
    destination: PathBuf,
    was_aligned: bool,
}

pub struct SigningOrchestrator<'a> {
    credentials: &'a dyn CredentialsStore,
    host: &'a dyn HostFilesystem,
    runner: &'a dyn ProcessRunner,
    signer: &'a dyn Signer,
    archiver: Option<&'a dyn ArtifactArchiver>,
    matcher: GlobMatcher,
    cancel: CancellationToken,
    ui: &'a Ui,
}

impl<'a> SigningOrchestrator<'a> {
    pub fn new(
        credentials: &'a dyn CredentialsStore,
        host: &'a dyn HostFilesystem,
        runner: &'a dyn ProcessRunner,
        signer: &'a dyn Signer,
        ui: &'a Ui,
    ) -> Self {
        Self {
            credentials,
            host,
            runner,
            signer,
            archiver: None,
            matcher: GlobMatcher::new(),
            cancel: CancellationToken::new(),
            ui,
        }
    }

    pub fn with_archiver(mut self, archiver: &'a dyn ArtifactArchiver) -> Self {
        self.archiver = Some(archiver);
        self
    }

    pub fn with_matcher(mut self, matcher: GlobMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(&self, request: &SigningRequest) -> Result<RunReport, SignerError> {
        request.validate()?;
        let ui = self.ui;
        let root = request.workspace_root.canonicalize().map_err(|e| {
            SignerError::Validation(format!(
                "workspace {} is not accessible: {}",
                request.workspace_root.display(),
                e
            ))
        })?;
        ui.verbose(&format!("Workspace: {}", root.display()));

        self.cancel.check("discovery")?;
        let matches = self.matcher.match_patterns(request.glob_patterns.as_slice(), &root)?;
        if matches.is_empty() {
            return Err(SignerError::Validation(format!(
                "no APKs in {} matched '{}'",
                root.display(),
                request.glob_patterns.join(", ")
            )));
        }
        ui.info(&format!("Found {} APK(s) to sign", matches.len()));

        self.cancel.check("key resolution")?;
        let key = KeyResolver::new(self.credentials).resolve(
            &request.key_store_id,
            &request.key_alias,
            ui,
        )?;
        ui.verbose(&format!(
            "Signing with '{}' from key store '{}'",
            key.alias, request.key_store_id
        ));

        let tool = if request.skip_alignment {
            ui.verbose("zipalign skipped");
            None
        } else {
            let location = ToolLocator::new(self.host).locate(
                request.alignment_tool_override.as_deref(),
                request.android_home_override.as_deref(),
                &self.host.environment(),
                ui,
            )?;
            Some(location)
        };

        let temp = tempfile::Builder::new()
            .prefix("apksignerust-")
            .tempdir()?;
        ui.record_temp_file(temp.path());

        let staged = self.sign_all(request, &root, &matches, &key, tool.as_ref(), temp.path())?;

        self.cancel.check("placement")?;
        let (artifacts, archived) = self.publish(request, &key, staged)?;

        self.report(request, &key, tool.as_ref(), &artifacts, &archived);
        Ok(RunReport {
            artifacts,
            archived,
            tool,
            alias: key.alias.clone(),
        })
    }

    fn sign_all(
        &self,
        request: &SigningRequest,
        root: &Path,
        matches: &[MatchedFile],
        key: &KeyMaterial,
        tool: Option<&ToolLocation>,
        temp_dir: &Path,
    ) -> Result<Vec<Staged>, SignerError> {
        let ui = self.ui;
        let alias = if request.key_alias.is_empty() {
            key.alias.as_str()
        } else {
            request.key_alias.as_str()
        };
        let mapper = request
            .signed_apk_mapping
            .mapper(&request.key_store_id, alias);

        if ui.verbose {
            ui.show_progress_bar(matches.len() as u64, "Signing");
        }
        let mut staged = Vec::with_capacity(matches.len());
        let mut destinations: HashMap<PathBuf, PathBuf> = HashMap::new();

        for (index, matched) in matches.iter().enumerate() {
            self.cancel.check("signing")?;
            let source = &matched.absolute_path;
            ui.set_progress_message(matched.file_name());
            ui.verbose(&format!("Signing {}", matched.relative_path));

            let unsigned = fs::read(source)?;
            let signed = self
                .signer
                .sign(&unsigned, key, ui)
                .map_err(|e| match e {
                    e @ (SignerError::Signing { .. } | SignerError::Cancelled(_)) => e,
                    other => SignerError::signing(source, other),
                })?;
            let signed_path = temp_dir.join(format!("{}-signed-{}", index, matched.file_name()));
            fs::write(&signed_path, signed)?;

            let (temp_path, was_aligned) = match tool {
                Some(tool) => {
                    let aligned_path =
                        temp_dir.join(format!("{}-aligned-{}", index, matched.file_name()));
                    self.align(tool, source, &signed_path, &aligned_path, root)?;
                    (aligned_path, true)
                }
                None => (signed_path, false),
            };

            let destination = mapper.map(source, root);
            if let Some(previous) = destinations.insert(destination.clone(), source.clone()) {
                return Err(SignerError::Validation(format!(
                    "{} and {} would both be written to {}",
                    previous.display(),
                    source.display(),
                    destination.display()
                )));
            }
            staged.push(Staged {
                matched: matched.clone(),
                temp_path,
                destination,
                was_aligned,
            });
            ui.update_progress(index as u64 + 1);
        }
        ui.finish_progress();
        Ok(staged)
    }

    fn align(
        &self,
        tool: &ToolLocation,
        source: &Path,
        signed: &Path,
        aligned: &Path,
        working_dir: &Path,
    ) -> Result<(), SignerError> {
        let args = tool.command_for(signed, aligned);
        self.ui.very_verbose(&format!(
            "{} {}",
            tool.executable_path.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        ));
        let output = self
            .runner
            .run(
                &tool.executable_path,
                &args,
                &HashMap::new(),
                working_dir,
                &self.cancel,
            )
            .map_err(|e| match e {
                // the runner only knows the working directory
                SignerError::ProcessFailure {
                    executable,
                    status,
                    stderr,
                    ..
                } => SignerError::ProcessFailure {
                    executable,
                    input: source.to_path_buf(),
                    status,
                    stderr,
                },
                other => other,
            })?;
        let failure = |status: String, stderr: String| SignerError::ProcessFailure {
            executable: tool.executable_path.clone(),
            input: source.to_path_buf(),
            status,
            stderr,
        };
        if !output.success() {
            return Err(failure(output.status_label(), output.stderr.trim().to_string()));
        }
        if !aligned.is_file() {
            return Err(failure(
                output.status_label(),
                "no aligned output was written".to_string(),
            ));
        }
        if !output.stdout.trim().is_empty() {
            self.ui.debug(output.stdout.trim());
        }
        Ok(())
    }

    fn publish(
        &self,
        request: &SigningRequest,
        key: &KeyMaterial,
        staged: Vec<Staged>,
    ) -> Result<(Vec<SignedArtifact>, Vec<ArchivedArtifact>), SignerError> {
        let ui = self.ui;
        let archiver = match self.archiver {
            Some(a) => Some(a),
            None if request.archive_signed || request.archive_unsigned => {
                ui.verbose("Archiving requested but no archive directory configured; skipping");
                None
            }
            None => None,
        };
        let namespace = |m: &MatchedFile, name: &str| {
            format!(
                "{}/{}/{}/{}",
                request.key_store_id, key.alias, m.relative_path, name
            )
        };
        let mut archived = Vec::new();

        // Originals first: a destination may be another input's path.
        if let (Some(archiver), true) = (archiver, request.archive_unsigned) {
            for item in &staged {
                let relative = namespace(&item.matched, item.matched.file_name());
                archiver.archive(&item.matched.absolute_path, &relative)?;
                ui.very_verbose(&format!("Archived unsigned {}", relative));
                archived.push(ArchivedArtifact {
                    kind: ArtifactKind::Unsigned,
                    source_path: item.matched.absolute_path.clone(),
                    archived_path: relative,
                });
            }
        }

        let mut artifacts = Vec::with_capacity(staged.len());
        for item in staged {
            place(&item.temp_path, &item.destination)?;
            ui.info(&format!(
                "Signed {} -> {}",
                item.matched.relative_path,
                item.destination.display()
            ));

            if let (Some(archiver), true) = (archiver, request.archive_signed) {
                let name = item
                    .destination
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let relative = namespace(&item.matched, &name);
                archiver.archive(&item.destination, &relative)?;
                archived.push(ArchivedArtifact {
                    kind: ArtifactKind::Signed,
                    source_path: item.destination.clone(),
                    archived_path: relative,
                });
            }

            artifacts.push(SignedArtifact {
                unsigned_source_path: item.matched.absolute_path,
                signed_output_path: item.destination,
                was_aligned: item.was_aligned,
            });
        }
        Ok((artifacts, archived))
    }

    fn report(
        &self,
        request: &SigningRequest,
        key: &KeyMaterial,
        tool: Option<&ToolLocation>,
        artifacts: &[SignedArtifact],
        archived: &[ArchivedArtifact],
    ) {
        let zipalign = match tool {
            Some(t) => format!("{} ({})", t.executable_path.display(), t.source),
            None => "skipped".to_string(),
        };
        self.ui.print_summary(
            "Signing Report",
            &[
                ("Key store", request.key_store_id.clone()),
                ("Alias", key.alias.clone()),
                ("Mapping", request.signed_apk_mapping.to_string()),
                ("zipalign", zipalign),
                ("Signed", artifacts.len().to_string()),
                ("Archived", archived.len().to_string()),
            ],
        );
        self.ui.success(&format!("Signed {} APK(s)", artifacts.len()));
    }
}

/// Move `from` to `to`, creating parent directories. Copies when a rename
/// is not possible, e.g. across filesystems.
fn place(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}
