use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;

use crate::ensemble::EnsembleOptions;
use crate::strength_model::FitOptions;
use crate::win_prob::DEFAULT_SIGMA;

/// Run a perturbed ensemble of tournament scenarios through an external solver
#[derive(Parser, Debug, Clone)]
#[command(name = "tourney_ensemble", version, about)]
pub struct Config {
    /// Number of perturbed scenarios to generate
    #[arg(long, env = "ENSEMBLE_ITERS", default_value_t = 1000)]
    pub iters: usize,

    /// Roster file, one team per line
    #[arg(long, env = "ENSEMBLE_TEAMS")]
    pub teams: Option<PathBuf>,

    /// Pairwise win-probability table (team1,team2,prob-win-team1)
    #[arg(long = "win-probs", env = "ENSEMBLE_WIN_PROBS")]
    pub win_probs: Option<PathBuf>,

    /// Directory that receives one sub-directory per scenario
    #[arg(long = "exp-prefix", env = "ENSEMBLE_EXP_PREFIX")]
    pub exp_prefix: PathBuf,

    /// Tournament solver executable
    #[arg(long, env = "ENSEMBLE_PROGRAM")]
    pub program: PathBuf,

    /// Historical results (team1,team2,team1-goals,team2-goals); fits a
    /// strength model instead of reading --win-probs
    #[arg(long, env = "ENSEMBLE_MATCHES")]
    pub matches: Option<PathBuf>,

    /// Ask the solver for a single static run
    #[arg(long)]
    pub single: bool,

    /// Standard deviation of the perturbation
    #[arg(long, env = "ENSEMBLE_SIGMA", default_value_t = DEFAULT_SIGMA)]
    pub sigma: f64,

    /// Master seed; each scenario derives its own stream from it
    #[arg(long, env = "ENSEMBLE_SEED")]
    pub seed: Option<u64>,

    /// Worker threads (0 = available parallelism)
    #[arg(long, env = "ENSEMBLE_PARALLELISM", default_value_t = 0)]
    pub parallelism: usize,

    /// Randomize the roster order before building scenarios
    #[arg(long = "shuffle-teams")]
    pub shuffle_teams: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixSource {
    Table { teams: PathBuf, win_probs: PathBuf },
    Model { teams: PathBuf, matches: PathBuf },
}

impl MatrixSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Table { .. } => "table",
            Self::Model { .. } => "model",
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.iters == 0 {
            bail!("--iters must be at least 1");
        }
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            bail!("--sigma must be a positive number, got {}", self.sigma);
        }
        self.source()?;
        Ok(())
    }

    /// A matches file takes precedence over a pairwise table.
    pub fn source(&self) -> Result<MatrixSource> {
        let Some(teams) = self.teams.clone() else {
            bail!("--teams is required");
        };
        if let Some(matches) = self.matches.clone() {
            return Ok(MatrixSource::Model { teams, matches });
        }
        if let Some(win_probs) = self.win_probs.clone() {
            return Ok(MatrixSource::Table { teams, win_probs });
        }
        bail!("either --win-probs or --matches is required")
    }

    pub fn worker_threads(&self) -> usize {
        if self.parallelism > 0 {
            return self.parallelism;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn ensemble_options(&self, seed: u64) -> EnsembleOptions {
        EnsembleOptions {
            sigma: self.sigma,
            seed,
            parallelism: self.worker_threads(),
        }
    }

    pub fn absolute_prefix(&self) -> Result<PathBuf> {
        absolute(&self.exp_prefix)
    }

    pub fn absolute_program(&self) -> Result<PathBuf> {
        absolute(&self.program)
    }
}

/// Fit team strengths from historical results and write the pairwise table
#[derive(Parser, Debug, Clone)]
#[command(name = "fit_strengths", version, about)]
pub struct FitConfig {
    /// Historical results (team1,team2,team1-goals,team2-goals)
    #[arg(long, env = "ENSEMBLE_MATCHES")]
    pub matches: PathBuf,

    /// Teams to include in the table; defaults to every team in the history
    #[arg(long, env = "ENSEMBLE_TEAMS")]
    pub teams: Option<PathBuf>,

    /// Output table path
    #[arg(long, default_value = "win-probs.csv")]
    pub out: PathBuf,

    /// Give up after this many optimizer iterations
    #[arg(long, default_value_t = FitOptions::default().max_iters)]
    pub max_iters: usize,

    /// Keep the best point found when the optimizer does not converge
    #[arg(long)]
    pub accept_unconverged: bool,
}

impl FitConfig {
    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            max_iters: self.max_iters,
            ..FitOptions::default()
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("resolve {}", path.display()))
}
