// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Build environments and package builders.

Packages are built inside an isolated environment (a chroot) managed by an
external tool. This module defines the interfaces the queue uses to drive that
tool and an implementation backed by `cowbuilder`.
*/

use {
    crate::error::{BuildQueueError, Result},
    duct::cmd,
    log::info,
    std::{
        ffi::OsString,
        io::{BufRead, BufReader},
        path::Path,
    },
};

/// Parameters describing the environment to create or refresh.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvironmentSettings {
    /// Package mirror the environment is bootstrapped from.
    pub mirror: String,
    /// Additional `sources.list` line.
    pub extra_sources: String,
    /// Distribution name.
    pub distribution: String,
}

/// How an external command terminated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommandOutcome {
    /// Exit code. [None] if the process was terminated by a signal.
    pub code: Option<i32>,
}

impl CommandOutcome {
    /// An outcome representing successful exit.
    pub fn success() -> Self {
        Self { code: Some(0) }
    }

    /// An outcome representing exit with the given code.
    pub fn exited(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// Whether the command exited with status 0.
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for CommandOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl std::fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(0) => f.write_str("success"),
            Some(code) => write!(f, "exit code {}", code),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Manages the isolated environment packages are built in.
pub trait BuildEnvironment {
    /// Create the environment.
    fn create(&mut self, settings: &EnvironmentSettings) -> Result<CommandOutcome>;

    /// Refresh an existing environment (e.g. update its package lists).
    fn update(&mut self, settings: &EnvironmentSettings) -> Result<CommandOutcome>;
}

/// Builds a source package.
pub trait PackageBuilder {
    /// Build the package described by `descriptor_path`, writing results to `results_dir`.
    ///
    /// A nonzero exit is reported through the returned outcome, not as an error.
    fn build(&mut self, descriptor_path: &Path, results_dir: &Path) -> Result<CommandOutcome>;
}

/// Drives `cowbuilder`.
///
/// Each call blocks until the spawned process exits. Output is forwarded to the log.
#[derive(Clone, Debug)]
pub struct Cowbuilder {
    program: String,
}

impl Default for Cowbuilder {
    fn default() -> Self {
        Self::new("cowbuilder")
    }
}

impl Cowbuilder {
    /// Construct an instance invoking the given program.
    pub fn new(program: impl ToString) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    /// The program that will be invoked.
    pub fn program(&self) -> &str {
        &self.program
    }

    fn environment_args(mode: &str, settings: &EnvironmentSettings) -> Vec<OsString> {
        vec![
            mode.into(),
            "--mirror".into(),
            settings.mirror.clone().into(),
            "--othermirror".into(),
            settings.extra_sources.clone().into(),
            "--distribution".into(),
            settings.distribution.clone().into(),
        ]
    }

    fn run(&self, args: Vec<OsString>) -> Result<CommandOutcome> {
        info!("running {} {:?}", self.program, args);

        let command_error = |source| BuildQueueError::Command {
            program: self.program.clone(),
            source,
        };

        let reader = cmd(self.program.as_str(), args)
            .stderr_to_stdout()
            .stdin_null()
            .unchecked()
            .reader()
            .map_err(command_error)?;

        {
            let lines = BufReader::new(&reader);
            for line in lines.lines() {
                info!("{}", line.map_err(command_error)?);
            }
        }

        let output = reader
            .try_wait()
            .map_err(command_error)?
            .ok_or_else(|| {
                command_error(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "unable to wait on command",
                ))
            })?;

        Ok(output.status.into())
    }
}

impl BuildEnvironment for Cowbuilder {
    fn create(&mut self, settings: &EnvironmentSettings) -> Result<CommandOutcome> {
        self.run(Self::environment_args("--create", settings))
    }

    fn update(&mut self, settings: &EnvironmentSettings) -> Result<CommandOutcome> {
        self.run(Self::environment_args("--update", settings))
    }
}

impl PackageBuilder for Cowbuilder {
    fn build(&mut self, descriptor_path: &Path, results_dir: &Path) -> Result<CommandOutcome> {
        self.run(vec![
            "--build".into(),
            descriptor_path.as_os_str().to_owned(),
            "--buildresult".into(),
            results_dir.as_os_str().to_owned(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EnvironmentSettings {
        EnvironmentSettings {
            mirror: "http://mirror/ubuntu".to_string(),
            extra_sources: "deb http://mirror/ubuntu gutsy universe".to_string(),
            distribution: "gutsy".to_string(),
        }
    }

    #[test]
    fn environment_args() {
        assert_eq!(
            Cowbuilder::environment_args("--create", &settings()),
            vec![
                "--create",
                "--mirror",
                "http://mirror/ubuntu",
                "--othermirror",
                "deb http://mirror/ubuntu gutsy universe",
                "--distribution",
                "gutsy",
            ]
            .into_iter()
            .map(OsString::from)
            .collect::<Vec<_>>()
        );
    }

    #[test]
    fn outcome_display() {
        assert!(CommandOutcome::success().is_success());
        assert!(!CommandOutcome::exited(2).is_success());
        assert_eq!(CommandOutcome::exited(2).to_string(), "exit code 2");
        assert_eq!(CommandOutcome { code: None }.to_string(), "terminated by signal");
    }

    #[cfg(unix)]
    #[test]
    fn run_reports_exit_status() -> Result<()> {
        let mut builder = Cowbuilder::new("false");
        let outcome = builder.build(Path::new("pkg.dsc"), Path::new("/nonexistent"))?;
        assert!(!outcome.is_success());

        let mut builder = Cowbuilder::new("true");
        assert!(builder.create(&settings())?.is_success());

        Ok(())
    }

    #[test]
    fn missing_program() {
        let mut builder = Cowbuilder::new("dbq-program-that-does-not-exist");
        assert!(matches!(
            builder.update(&settings()),
            Err(BuildQueueError::Command { .. })
        ));
    }
}
