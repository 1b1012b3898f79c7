/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

use crate::{
    archive::DirArchiver,
    config::{self, SigningRequest},
    credentials::FileCredentialsStore,
    error::SignerError,
    host::{CancellationToken, HostFilesystem, LocalHost, LocalProcessRunner},
    keys,
    mapping::SignedApkMapping,
    matcher::GlobMatcher,
    orchestrator::{RunReport, SigningOrchestrator},
    processor::JarSigner,
    ui::Ui,
    verification::{JarVerifier, Verifier},
    zipalign::ToolLocator,
    *,
};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

const ENV_CREDENTIALS: &str = "APKSIGNERUST_CREDENTIALS";
const ENV_ARCHIVE_DIR: &str = "APKSIGNERUST_ARCHIVE_DIR";
const ENV_WORKSPACE: &str = "WORKSPACE";

fn workspace_arg() -> Arg {
    Arg::new("workspace")
        .short('w')
        .long("workspace")
        .env(ENV_WORKSPACE)
        .default_value(".")
        .help("Workspace root the APK globs are relative to")
}

fn credentials_arg() -> Arg {
    Arg::new("credentials")
        .short('c')
        .long("credentials")
        .env(ENV_CREDENTIALS)
        .required(true)
        .help("TOML file mapping key store ids to PKCS#12 files and passwords")
}

fn archive_dir_arg() -> Arg {
    Arg::new("archive_dir")
        .long("archive-dir")
        .env(ENV_ARCHIVE_DIR)
        .help("Directory archived APKs are copied into")
}

fn timeout_arg() -> Arg {
    Arg::new("timeout")
        .long("timeout")
        .value_parser(value_parser!(u64))
        .help("Kill zipalign after this many seconds")
}

fn tool_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("android_home")
            .long("android-home")
            .help("Android SDK root to take build-tools/*/zipalign from (${VAR} allowed)"),
    )
    .arg(
        Arg::new("zipalign_path")
            .long("zipalign-path")
            .help("Explicit zipalign executable (${VAR} allowed)"),
    )
}

pub fn build_command() -> Command {
    Command::new(APP_NAME)
        .bin_name(APP_BIN_NAME)
        .version(APP_VERSION)
        .author(APP_AUTHOR)
        .about(APP_ABOUT)
        .disable_version_flag(true)
        .help_template("{about-with-newline}{usage-heading} {usage}\n\n{all-args}\n")
        .arg_required_else_help(true)
        .subcommand(tool_args(
            Command::new("sign")
                .about("Sign every APK matching the given globs")
                .arg(workspace_arg())
                .arg(
                    Arg::new("apks")
                        .short('a')
                        .long("apks")
                        .required(true)
                        .help("Comma-separated globs of APKs to sign, relative to the workspace"),
                )
                .arg(
                    Arg::new("keystore_id")
                        .short('k')
                        .long("keystore-id")
                        .required(true)
                        .help("Key store id in the credentials file"),
                )
                .arg(
                    Arg::new("alias")
                        .long("alias")
                        .help("Key alias; may be omitted when the key store holds one key"),
                )
                .arg(credentials_arg())
                .arg(archive_dir_arg())
                .arg(
                    Arg::new("no_archive_signed")
                        .long("no-archive-signed")
                        .action(ArgAction::SetTrue)
                        .help("Do not archive the signed APKs"),
                )
                .arg(
                    Arg::new("archive_unsigned")
                        .long("archive-unsigned")
                        .action(ArgAction::SetTrue)
                        .help("Also archive the unsigned inputs"),
                )
                .arg(
                    Arg::new("skip_zipalign")
                        .long("skip-zipalign")
                        .action(ArgAction::SetTrue)
                        .help("Do not run zipalign after signing"),
                )
                .arg(
                    Arg::new("mapping")
                        .long("mapping")
                        .default_value("sibling")
                        .help("Where signed APKs go: sibling or builder-dir"),
                )
                .arg(timeout_arg()),
        ))
        .subcommand(
            Command::new("run")
                .about("Run every signing step of a job file")
                .arg(
                    Arg::new("job")
                        .short('j')
                        .long("job")
                        .required(true)
                        .help("Job definition (TOML); older versions are upgraded on load"),
                )
                .arg(workspace_arg())
                .arg(credentials_arg())
                .arg(archive_dir_arg())
                .arg(timeout_arg()),
        )
        .subcommand(
            Command::new("check-globs")
                .about("Check that every glob matches at least one file")
                .arg(workspace_arg())
                .arg(
                    Arg::new("globs")
                        .required(true)
                        .num_args(1..)
                        .help("Comma-separated globs"),
                ),
        )
        .subcommand(tool_args(
            Command::new("locate-zipalign")
                .about("Print the zipalign that a signing run would use")
                .arg(workspace_arg()),
        ))
        .subcommand(
            Command::new("verify")
                .about("Verify the v1 signature of an APK")
                .arg(
                    Arg::new("input")
                        .required(true)
                        .help("APK to verify")
                        .index(1),
                )
                .arg(
                    Arg::new("cert")
                        .long("cert")
                        .help("Require this signer certificate (PEM or DER)"),
                ),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Set verbosity level (-v for verbose, -vv for more verbose, -vvv for debug)"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Suppress all output except errors"),
        )
        .arg(
            Arg::new("version_custom")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print version information"),
        )
}

pub fn run() -> Result<(), SignerError> {
    let matches = build_command().get_matches();

    if matches.get_flag("version_custom") {
        let mut ui = Ui::new(false, false, false, false, true);
        ui.enable_colors_if_supported();
        ui.print_version_info();
        return Ok(());
    }

    let verbosity_level = matches.get_count("verbose");
    let quiet = matches.get_flag("quiet");
    let mut ui = Ui::from_verbosity_level(verbosity_level, quiet, true);
    ui.enable_colors_if_supported();
    ui.print_banner();

    let result = run_logic(&matches, &ui);
    ui.print_temp_files();
    result
}

fn run_logic(matches: &ArgMatches, ui: &Ui) -> Result<(), SignerError> {
    match matches.subcommand() {
        Some(("sign", sub)) => cmd_sign(sub, ui),
        Some(("run", sub)) => cmd_run(sub, ui),
        Some(("check-globs", sub)) => cmd_check_globs(sub, ui),
        Some(("locate-zipalign", sub)) => cmd_locate(sub, ui),
        Some(("verify", sub)) => cmd_verify(sub, ui),
        _ => Err(SignerError::Config("No command provided".into())),
    }
}

fn string_arg<'m>(matches: &'m ArgMatches, id: &str) -> Option<&'m str> {
    matches.get_one::<String>(id).map(String::as_str)
}

fn workspace(matches: &ArgMatches) -> PathBuf {
    PathBuf::from(string_arg(matches, "workspace").unwrap_or("."))
}

/// The local host, with `WORKSPACE` set for `${WORKSPACE}` in tool paths.
fn host_for(workspace: &Path) -> LocalHost {
    let host = LocalHost::new();
    let mut env = host.environment();
    let root = workspace
        .canonicalize()
        .unwrap_or_else(|_| workspace.to_path_buf());
    env.insert(ENV_WORKSPACE.to_string(), root.display().to_string());
    host.with_env(env)
}

struct Pipeline {
    credentials: FileCredentialsStore,
    runner: LocalProcessRunner,
    archiver: Option<DirArchiver>,
    cancel: CancellationToken,
}

impl Pipeline {
    fn from_matches(matches: &ArgMatches, ui: &Ui) -> Result<Self, SignerError> {
        let credentials_path = string_arg(matches, "credentials")
            .ok_or_else(|| SignerError::Config("a credentials file is required".into()))?;
        let credentials = FileCredentialsStore::load(Path::new(credentials_path))?;
        ui.verbose(&format!("Credentials: {}", credentials_path));

        let archiver = string_arg(matches, "archive_dir").map(|dir| {
            ui.verbose(&format!("Archive: {}", dir));
            DirArchiver::new(dir)
        });
        let timeout = matches.get_one::<u64>("timeout").copied().map(Duration::from_secs);

        let cancel = CancellationToken::new();
        if let Err(e) = cancel.install_ctrlc_handler() {
            ui.debug(&e.to_string());
        }

        Ok(Self {
            credentials,
            runner: LocalProcessRunner::new(timeout),
            archiver,
            cancel,
        })
    }

    fn execute(
        &self,
        host: &LocalHost,
        request: &SigningRequest,
        ui: &Ui,
    ) -> Result<RunReport, SignerError> {
        let signer = JarSigner::new();
        let mut orchestrator =
            SigningOrchestrator::new(&self.credentials, host, &self.runner, &signer, ui)
                .with_cancellation(self.cancel.clone());
        if let Some(archiver) = &self.archiver {
            orchestrator = orchestrator.with_archiver(archiver);
        }
        orchestrator.run(request)
    }
}

fn cmd_sign(matches: &ArgMatches, ui: &Ui) -> Result<(), SignerError> {
    let workspace = workspace(matches);
    let mapping: SignedApkMapping = string_arg(matches, "mapping")
        .unwrap_or("sibling")
        .parse()
        .map_err(SignerError::Config)?;

    let request = SigningRequest::new(
        &workspace,
        string_arg(matches, "apks").unwrap_or(""),
        string_arg(matches, "keystore_id").unwrap_or(""),
    )
    .with_alias(string_arg(matches, "alias").unwrap_or(""))
    .with_archive_signed(!matches.get_flag("no_archive_signed"))
    .with_archive_unsigned(matches.get_flag("archive_unsigned"))
    .with_skip_alignment(matches.get_flag("skip_zipalign"))
    .with_android_home(string_arg(matches, "android_home"))
    .with_zipalign_path(string_arg(matches, "zipalign_path"))
    .with_mapping(mapping);

    let pipeline = Pipeline::from_matches(matches, ui)?;
    ui.print_mode_header("SIGNING MODE");
    let report = pipeline.execute(&host_for(&workspace), &request, ui)?;
    print_outputs(&report);
    Ok(())
}

fn cmd_run(matches: &ArgMatches, ui: &Ui) -> Result<(), SignerError> {
    let workspace = workspace(matches);
    let job_path = string_arg(matches, "job")
        .ok_or_else(|| SignerError::Config("a job file is required".into()))?;
    let job = config::load_job(Path::new(job_path))?;
    ui.verbose(&format!("Job {}: {} step(s)", job_path, job.steps.len()));

    let pipeline = Pipeline::from_matches(matches, ui)?;
    let host = host_for(&workspace);
    for (i, step) in job.steps.iter().enumerate() {
        ui.print_mode_header(&format!("STEP {}/{}", i + 1, job.steps.len()));
        let report = pipeline.execute(&host, &step.to_request(&workspace), ui)?;
        print_outputs(&report);
    }
    Ok(())
}

fn cmd_check_globs(matches: &ArgMatches, ui: &Ui) -> Result<(), SignerError> {
    let workspace = workspace(matches);
    let globs: Vec<String> = matches
        .get_many::<String>("globs")
        .map(|v| v.cloned().collect())
        .unwrap_or_default();

    let matcher = GlobMatcher::new();
    if let Some(problem) = matcher.validate(globs.as_slice(), &workspace) {
        return Err(SignerError::Validation(problem));
    }
    for file in matcher.match_patterns(globs.as_slice(), &workspace)? {
        println!("{}", file.relative_path);
    }
    ui.success("Every pattern matches");
    Ok(())
}

fn cmd_locate(matches: &ArgMatches, ui: &Ui) -> Result<(), SignerError> {
    let host = host_for(&workspace(matches));
    let location = ToolLocator::new(&host).locate(
        string_arg(matches, "zipalign_path"),
        string_arg(matches, "android_home"),
        &host.environment(),
        ui,
    )?;
    println!("{}", location.executable_path.display());
    ui.success(&format!("Found via {}", location.source));
    Ok(())
}

fn cmd_verify(matches: &ArgMatches, ui: &Ui) -> Result<(), SignerError> {
    let input = PathBuf::from(
        string_arg(matches, "input")
            .ok_or_else(|| SignerError::Config("No input file specified".into()))?,
    );
    let expected_cert = match string_arg(matches, "cert") {
        Some(path) => Some(keys::load_certificate(Path::new(path), ui)?),
        None => None,
    };

    ui.print_mode_header("VERIFICATION MODE");
    ui.info(&format!("Verifying: {}", input.display()));
    let apk = fs::read(&input)?;
    let report = JarVerifier::new().verify(&apk)?;

    for warning in &report.warnings {
        ui.warn(warning);
    }
    for error in &report.errors {
        ui.error(error);
    }
    if !report.verified {
        return Err(SignerError::Validation(format!(
            "{} is not validly signed",
            input.display()
        )));
    }
    if let Some(cert) = expected_cert {
        if !report.signed_by(&cert) {
            return Err(SignerError::Validation(format!(
                "{} is signed, but not by the given certificate",
                input.display()
            )));
        }
    }

    ui.print_summary(
        "Verification Report",
        &[
            ("Status", "Verified".to_string()),
            (
                "Schemes",
                report
                    .schemes
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            ("Signers", report.signer_certificates.len().to_string()),
        ],
    );
    ui.success("Signature valid.");
    Ok(())
}

/// Signed output paths on stdout, one per line, for scripting.
fn print_outputs(report: &RunReport) {
    for artifact in &report.artifacts {
        println!("{}", artifact.signed_output_path.display());
    }
}
