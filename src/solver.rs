use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::error::{EnsembleError, Result};
use crate::scenario::ScenarioUnit;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationStatus {
    Succeeded,
    /// The process ran but exited unsuccessfully; `None` when killed by a signal.
    Exited(Option<i32>),
    /// The process could not be started at all.
    LaunchFailed(String),
}

impl InvocationStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Runs the tournament solver for one scenario.
///
/// Implementations read the unit's input files and write its result and log
/// files. They must only touch the unit's own directory, since units are
/// invoked concurrently.
pub trait Solver: Sync {
    fn invoke(&self, unit: &ScenarioUnit) -> Result<InvocationStatus>;
}

/// External solver executable reached through a subprocess.
#[derive(Debug, Clone)]
pub struct SolverInvoker {
    program: PathBuf,
    static_args: Vec<OsString>,
}

impl SolverInvoker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            static_args: Vec::new(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn set_dynamic(&mut self, on: bool) -> &mut Self {
        self.static_args.push("--dynamic".into());
        self.static_args.push(if on { "on" } else { "off" }.into());
        self
    }

    pub fn set_single(&mut self) -> &mut Self {
        self.static_args.push("--single".into());
        self
    }

    pub fn args_for(&self, unit: &ScenarioUnit) -> Vec<OsString> {
        let mut args = self.static_args.clone();
        args.push("--teams".into());
        args.push(unit.teams_path().into_os_string());
        args.push("--prefix".into());
        args.push(unit.solver_prefix().into_os_string());
        args.push("--probs".into());
        args.push(unit.win_probs_path().into_os_string());
        args
    }

    pub fn command_for(&self, unit: &ScenarioUnit) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args_for(unit));
        cmd
    }
}

impl Solver for SolverInvoker {
    fn invoke(&self, unit: &ScenarioUnit) -> Result<InvocationStatus> {
        let log_path = unit.log_path();
        let mut log = File::create(&log_path).map_err(|e| EnsembleError::io(&log_path, e))?;
        let log_err = log.try_clone().map_err(|e| EnsembleError::io(&log_path, e))?;

        let mut cmd = self.command_for(unit);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone().map_err(|e| EnsembleError::io(&log_path, e))?))
            .stderr(Stdio::from(log_err));
        debug!(dir = %unit.dir().display(), ?cmd, "invoking solver");

        let status = match cmd.status() {
            Ok(status) => status,
            Err(err) => {
                let msg = format!("failed to launch {}: {err}", self.program.display());
                // The log is the unit's record of what went wrong.
                let _ = writeln!(log, "{msg}");
                warn!(dir = %unit.dir().display(), "{msg}");
                return Ok(InvocationStatus::LaunchFailed(msg));
            }
        };

        if status.success() {
            Ok(InvocationStatus::Succeeded)
        } else {
            warn!(dir = %unit.dir().display(), code = ?status.code(), "solver exited unsuccessfully");
            let _ = writeln!(log, "solver exited with status {status}");
            Ok(InvocationStatus::Exited(status.code()))
        }
    }
}
