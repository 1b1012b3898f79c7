/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Capabilities of the execution host: filesystem checks, environment,
//! external processes and cancellation.
//!
//! Tool discovery asks these questions of the machine that will actually run
//! `zipalign`, which is not necessarily the one that parsed the job.

use crate::error::SignerError;
use std::{
    collections::HashMap,
    ffi::OsString,
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

pub trait HostFilesystem {
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    /// Direct children of `path`, full paths, in no particular order.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
    /// Separator of PATH-like lists on this host (`:` or `;`).
    fn path_separator(&self) -> char;
    fn environment(&self) -> HashMap<String, String>;
}

/// The machine this process runs on.
#[derive(Debug, Clone)]
pub struct LocalHost {
    env: HashMap<String, String>,
    separator: char,
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHost {
    pub fn new() -> Self {
        Self {
            env: std::env::vars().collect(),
            separator: if cfg!(windows) { ';' } else { ':' },
        }
    }

    /// Replace the captured environment.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_path_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }
}

impl HostFilesystem for LocalHost {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn path_separator(&self) -> char {
        self.separator
    }

    fn environment(&self) -> HashMap<String, String> {
        self.env.clone()
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` naming `stage` once cancellation was requested.
    pub fn check(&self, stage: &str) -> Result<(), SignerError> {
        if self.is_cancelled() {
            Err(SignerError::Cancelled(stage.to_string()))
        } else {
            Ok(())
        }
    }

    /// Cancel this token on SIGINT/SIGTERM. Only one handler may be
    /// installed per process.
    pub fn install_ctrlc_handler(&self) -> Result<(), SignerError> {
        let flag = Arc::clone(&self.flag);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .map_err(|e| SignerError::Config(format!("cannot install signal handler: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn status_label(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "a signal".to_string(),
        }
    }
}

pub trait ProcessRunner {
    /// Run `executable` to completion. `env_overrides` are added on top of
    /// the inherited environment. Implementations must stop waiting and
    /// terminate the child once `cancel` fires.
    fn run(
        &self,
        executable: &Path,
        args: &[OsString],
        env_overrides: &HashMap<String, String>,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, SignerError>;
}

/// Spawns real processes and polls them until exit, cancellation or timeout.
///
/// On Unix the child leads its own process group, so wrapper scripts and
/// their children are terminated together.
#[derive(Debug, Clone)]
pub struct LocalProcessRunner {
    timeout: Option<Duration>,
    poll_interval: Duration,
    grace_period: Duration,
}

impl Default for LocalProcessRunner {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: Duration::from_millis(50),
            grace_period: Duration::from_millis(500),
        }
    }
}

type Drains = (JoinHandle<Vec<u8>>, JoinHandle<Vec<u8>>);

impl LocalProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut pipe) = pipe {
                let _ = pipe.read_to_end(&mut buf);
            }
            buf
        })
    }

    fn collect(handles: Drains) -> (String, String) {
        let out = handles.0.join().unwrap_or_default();
        let err = handles.1.join().unwrap_or_default();
        (
            String::from_utf8_lossy(&out).into_owned(),
            String::from_utf8_lossy(&err).into_owned(),
        )
    }

    /// Like `collect`, but gives up on pipes still held open by an orphaned
    /// descendant once `deadline` passes. Abandoned drains end on their own.
    fn collect_until(&self, handles: Drains, deadline: Instant) -> (String, String) {
        while !(handles.0.is_finished() && handles.1.is_finished()) {
            if Instant::now() >= deadline {
                return (String::new(), String::new());
            }
            thread::sleep(self.poll_interval);
        }
        Self::collect(handles)
    }

    /// SIGTERM to the process group, SIGKILL after the grace period.
    fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let group = Pid::from_raw(child.id() as i32);
            let _ = killpg(group, Signal::SIGTERM);
            let started = Instant::now();
            while started.elapsed() < self.grace_period {
                if let Ok(Some(_)) = child.try_wait() {
                    break;
                }
                thread::sleep(self.poll_interval);
            }
            let _ = killpg(group, Signal::SIGKILL);
        }
        let _ = child.kill();
        let _ = child.wait();
    }

    /// Stop `child` and whatever it spawned, then salvage the stderr that is
    /// already available.
    fn abandon(&self, child: &mut Child, pipes: Drains) -> String {
        self.terminate(child);
        let (_, stderr) = self.collect_until(pipes, Instant::now() + self.grace_period);
        stderr
    }
}

impl ProcessRunner for LocalProcessRunner {
    fn run(
        &self,
        executable: &Path,
        args: &[OsString],
        env_overrides: &HashMap<String, String>,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, SignerError> {
        let mut command = Command::new(executable);
        command
            .args(args)
            .envs(env_overrides)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let failure = |status: String, stderr: String| SignerError::ProcessFailure {
            executable: executable.to_path_buf(),
            input: working_dir.to_path_buf(),
            status,
            stderr,
        };

        let mut child = command
            .spawn()
            .map_err(|e| failure("failed to start".into(), e.to_string()))?;

        let pipes = (
            Self::drain(child.stdout.take()),
            Self::drain(child.stderr.take()),
        );
        let started = Instant::now();

        let status = loop {
            if cancel.is_cancelled() {
                self.abandon(&mut child, pipes);
                return Err(SignerError::Cancelled(format!(
                    "terminated {}",
                    executable.display()
                )));
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    let stderr = self.abandon(&mut child, pipes);
                    return Err(failure(format!("timeout after {:?}", limit), stderr));
                }
            }
            match child.try_wait()? {
                Some(status) => break status,
                None => thread::sleep(self.poll_interval),
            }
        };

        let (stdout, stderr) = Self::collect(pipes);
        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}
