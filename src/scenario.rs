use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

use crate::error::{EnsembleError, Result};
use crate::solver::{InvocationStatus, Solver};
use crate::win_prob::WinProbabilityMatrix;

pub const TEAMS_FILE: &str = "teams.ini";
pub const WIN_PROBS_FILE: &str = "win-probs.csv";
pub const SOLVER_PREFIX: &str = "experiment";
pub const LOG_FILE: &str = "output.log";
pub const RESULTS_SUFFIX: &str = ".dynamic.probs.json";
pub const FINISH_MARKER: &str = "Run Finished, time:";

/// Per-team probability reported by the solver for one scenario.
pub type TeamResults = BTreeMap<String, f64>;

/// One perturbed copy of the base matrix, bound to its own directory.
#[derive(Debug, Clone)]
pub struct ScenarioUnit {
    matrix: WinProbabilityMatrix,
    dir: PathBuf,
    rng: StdRng,
}

impl ScenarioUnit {
    pub fn new(base: &WinProbabilityMatrix, dir: PathBuf, seed: u64) -> Self {
        Self {
            matrix: base.clone(),
            dir,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn matrix(&self) -> &WinProbabilityMatrix {
        &self.matrix
    }

    pub fn teams_path(&self) -> PathBuf {
        self.dir.join(TEAMS_FILE)
    }

    pub fn win_probs_path(&self) -> PathBuf {
        self.dir.join(WIN_PROBS_FILE)
    }

    pub fn solver_prefix(&self) -> PathBuf {
        self.dir.join(SOLVER_PREFIX)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join(format!("{SOLVER_PREFIX}{RESULTS_SUFFIX}"))
    }

    /// Perturbs this unit's own copy of the matrix.
    pub fn prepare(&mut self, sigma: f64) {
        self.matrix.perturb(sigma, &mut self.rng);
    }

    pub fn create_dir(&self) -> Result<()> {
        match fs::read_dir(&self.dir) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    return Err(EnsembleError::PathExists(self.dir.clone()));
                }
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&self.dir).map_err(|e| EnsembleError::io(&self.dir, e))
            }
            Err(err) => Err(EnsembleError::io(&self.dir, err)),
        }
    }

    pub fn write_inputs(&self) -> Result<()> {
        let teams = self.teams_path();
        fs::write(&teams, self.matrix.roster().to_file_string())
            .map_err(|e| EnsembleError::io(&teams, e))?;
        let probs = self.win_probs_path();
        fs::write(&probs, self.matrix.to_csv()).map_err(|e| EnsembleError::io(&probs, e))?;
        Ok(())
    }

    pub fn materialize(&self) -> Result<()> {
        self.create_dir()?;
        self.write_inputs()
    }

    pub fn invoke<S: Solver + ?Sized>(&self, solver: &S) -> Result<InvocationStatus> {
        solver.invoke(self)
    }

    /// Elapsed seconds reported by the solver, or `None` when the log has no
    /// completion line (or was never written).
    pub fn read_duration(&self) -> Result<Option<f64>> {
        let path = self.log_path();
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no solver log");
                return Ok(None);
            }
            Err(err) => return Err(EnsembleError::io(&path, err)),
        };
        Ok(String::from_utf8_lossy(&raw)
            .lines()
            .find(|line| line.contains(FINISH_MARKER))
            .and_then(parse_finish_line))
    }

    /// Pairs each number of the solver's result list with the roster team at
    /// the same position. `null` entries read as 0.0.
    pub fn read_result(&self) -> Result<TeamResults> {
        let path = self.results_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(EnsembleError::MissingOutput(path));
            }
            Err(err) => return Err(EnsembleError::io(&path, err)),
        };
        let values = serde_json::from_str::<Vec<Option<f64>>>(&raw).map_err(|e| {
            EnsembleError::parse(&path.display().to_string(), e.line(), e.to_string())
        })?;

        Ok(self
            .matrix
            .roster()
            .iter()
            .zip(values)
            .map(|(team, v)| (team.to_string(), v.unwrap_or(0.0)))
            .collect())
    }
}

/// Parses `... Run Finished, time: 12.34s` into seconds.
pub fn parse_finish_line(line: &str) -> Option<f64> {
    let token = line.split_whitespace().last()?;
    let number = token
        .strip_suffix(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(token);
    number.parse::<f64>().ok()
}
