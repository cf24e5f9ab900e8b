use std::io::{Read, Seek};
use std::process::{Command, ExitStatus};

use color_eyre::eyre::{Context, Result};
use tracing::{error, info};

use crate::opts::Escalation;
use crate::plan::{Invocation, Plan};

/// A child process exited unsuccessfully.
#[derive(Debug, thiserror::Error)]
#[error("`{command}` failed: {status}")]
pub struct SubprocessError {
    pub command: String,
    pub status: ExitStatus,
}

/// Helpers intended for [`std::process::Command`].
pub trait CommandRun {
    /// Execute the child process with inherited stdio, and return an error
    /// if it exits unsuccessfully.
    fn run(&mut self) -> Result<()>;

    /// Execute the child process with its stdout redirected to a temporary
    /// file, returning the exit status and everything it printed. A
    /// non-zero exit is *not* an error here.
    fn run_capture_stdout(&mut self) -> Result<(ExitStatus, String)>;
}

/// Helpers intended for [`std::process::ExitStatus`].
pub trait ExitStatusExt {
    /// If the exit status signals it was not successful, return an error
    /// naming `cmd`.
    fn check_status(&self, cmd: &Command) -> Result<(), SubprocessError>;
}

fn command_line(cmd: &Command) -> String {
    let argv: Vec<String> = std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" "))
}

impl ExitStatusExt for ExitStatus {
    fn check_status(&self, cmd: &Command) -> Result<(), SubprocessError> {
        if self.success() {
            return Ok(());
        }
        Err(SubprocessError {
            command: command_line(cmd),
            status: *self,
        })
    }
}

impl CommandRun for Command {
    fn run(&mut self) -> Result<()> {
        tracing::trace!("exec: {self:?}");
        let status = self
            .status()
            .with_context(|| format!("Failed to execute {:?}", self.get_program()))?;
        status.check_status(self)?;
        Ok(())
    }

    fn run_capture_stdout(&mut self) -> Result<(ExitStatus, String)> {
        let mut stdout = tempfile::tempfile()?;
        self.stdout(stdout.try_clone()?);
        tracing::trace!("exec: {self:?}");
        let status = self
            .status()
            .with_context(|| format!("Failed to execute {:?}", self.get_program()))?;
        stdout.seek(std::io::SeekFrom::Start(0)).context("seek")?;
        let mut s = String::new();
        stdout.read_to_string(&mut s)?;
        Ok((status, s))
    }
}

/// Runs the steps of a [`Plan`].
pub trait Executor {
    fn execute(&mut self, step: &Invocation) -> Result<()>;
}

/// Runs each step as a child process of ours, sharing our terminal.
#[derive(Debug)]
pub struct SystemExecutor {
    escalation: Escalation,
    is_root: bool,
}

impl SystemExecutor {
    pub fn new(escalation: Escalation, is_root: bool) -> Self {
        Self { escalation, is_root }
    }
}

impl Executor for SystemExecutor {
    fn execute(&mut self, step: &Invocation) -> Result<()> {
        step.escalate(self.escalation, self.is_root)
            .to_command()
            .run()
    }
}

/// Run `plan` one step at a time, stopping at the first failure.
///
/// Steps that already completed are left as they are; an image created
/// before QEMU fails to start stays on disk.
pub fn execute_plan(plan: &Plan, executor: &mut dyn Executor) -> Result<()> {
    if plan.is_empty() {
        tracing::debug!("nothing to do");
        return Ok(());
    }
    let total = plan.len();
    for (i, step) in plan.steps().iter().enumerate() {
        let n = i + 1;
        info!("[{n}/{total}] {step}");
        if let Err(e) = executor.execute(step) {
            let remaining = total - n;
            error!("step {n}/{total} failed, {remaining} remaining step(s) not run");
            return Err(e);
        }
    }
    Ok(())
}
