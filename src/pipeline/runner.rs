//! Everything the pipeline does outside of this process goes through [`CommandRunner`] so a run
//! can be checked without Python, pip or a GPU around.
use anyhow::Context;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// A command to run
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl fmt::Display) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        self.args.extend(args.into_iter().map(|x| x.to_string()));
        self
    }

    /// Adds `--flag value`
    pub fn flag(self, flag: &str, value: impl fmt::Display) -> Self {
        self.arg(flag).arg(value)
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How a command finished. `code` is `None` if it was killed by a signal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunStatus {
    pub code: Option<i32>,
}

impl RunStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.code {
            Some(c) => write!(f, "exit code {}", c),
            None => write!(f, "signal"),
        }
    }
}

pub trait CommandRunner {
    /// Runs the command to completion. Errors are for commands that couldn't be started at all,
    /// a command that ran and failed is reported through the status.
    fn run(&mut self, invocation: &Invocation) -> anyhow::Result<RunStatus>;

    /// Runs a command where failure isn't fatal to the pipeline, logging any failure.
    fn run_lenient(&mut self, invocation: &Invocation) -> bool {
        match self.run(invocation) {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!("'{}' failed with {}", invocation, status);
                false
            }
            Err(e) => {
                warn!("'{}' couldn't be run: {:#}", invocation, e);
                false
            }
        }
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &mut R {
    fn run(&mut self, invocation: &Invocation) -> anyhow::Result<RunStatus> {
        (**self).run(invocation)
    }
}

/// Runs commands for real. Output goes straight to our stdout/stderr so training progress shows
/// up in the notebook.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, invocation: &Invocation) -> anyhow::Result<RunStatus> {
        debug!("Running: {}", invocation);
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }
        let status = command
            .status()
            .with_context(|| format!("failed to start '{}'", invocation.program))?;
        Ok(RunStatus {
            code: status.code(),
        })
    }
}
