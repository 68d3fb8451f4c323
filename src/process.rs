// src/process.rs

//! External process execution
//!
//! Used for version-control tools during bucket sync, installer tools during
//! extraction, and handing off to installed programs from `exec`.

use crate::error::{Error, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Result of a captured run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; -1 when the process was killed by a signal
    pub code: i32,
    pub stdout: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs argv vectors
pub trait ProcessRunner {
    /// Run with stdout captured; `env` entries are added on top of the
    /// inherited environment
    fn run(&self, argv: &[String], env: &[(String, String)], cwd: Option<&Path>) -> Result<ProcessOutput>;

    /// Run with the terminal attached and a fully specified environment,
    /// returning the exit code
    fn run_attached(&self, argv: &[String], env: &[(String, String)], cwd: Option<&Path>) -> Result<i32>;
}

/// `std::process` implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(argv: &[String], cwd: Option<&Path>) -> Result<Command> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::ProcessError("empty command line".to_string()))?;
        let mut command = Command::new(program);
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        Ok(command)
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, argv: &[String], env: &[(String, String)], cwd: Option<&Path>) -> Result<ProcessOutput> {
        debug!("Running {:?}", argv);
        let mut command = Self::command(argv, cwd)?;
        command.envs(env.iter().map(|(k, v)| (k, v)));
        command.stdin(Stdio::null());

        let output = command.output().map_err(|e| spawn_error(&argv[0], e))?;
        let code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            debug!(
                "{} exited with {}: {}",
                argv[0],
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(ProcessOutput {
            code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    fn run_attached(&self, argv: &[String], env: &[(String, String)], cwd: Option<&Path>) -> Result<i32> {
        debug!("Handing off to {:?}", argv);
        let mut command = Self::command(argv, cwd)?;
        command.env_clear();
        command.envs(env.iter().map(|(k, v)| (k, v)));

        let status = command.status().map_err(|e| spawn_error(&argv[0], e))?;
        Ok(status.code().unwrap_or(-1))
    }
}

fn spawn_error(program: &str, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::ProcessError(format!("'{}' not found on PATH", program))
    } else {
        Error::ProcessError(format!("Failed to spawn {}: {}", program, err))
    }
}

/// Run and require exit code 0, returning trimmed stdout
pub fn run_checked(
    runner: &dyn ProcessRunner,
    argv: &[String],
    cwd: Option<&Path>,
) -> Result<String> {
    let output = runner.run(argv, &[], cwd)?;
    if !output.success() {
        return Err(Error::ProcessError(format!(
            "'{}' exited with code {}",
            argv.join(" "),
            output.code
        )));
    }
    Ok(output.stdout.trim().to_string())
}

/// Build an argv from string slices
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
