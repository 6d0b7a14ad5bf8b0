use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{EnsembleError, Result};
use crate::roster::Roster;
use crate::skellam::poisson_ln_pmf;
use crate::win_prob::WinProbabilityMatrix;

const COL_TEAM1: &str = "team1";
const COL_TEAM2: &str = "team2";
const COL_GOALS1: &str = "team1-goals";
const COL_GOALS2: &str = "team2-goals";

// Armijo sufficient-increase constant for the line search.
const ARMIJO_C: f64 = 1e-4;
const MIN_STEP: f64 = 1e-16;
// A stalled line search still counts as converged within this multiple of
// the tolerance: the objective cannot resolve smaller gains.
const STALL_FACTOR: f64 = 1e3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoricalMatch {
    pub team1: usize,
    pub team2: usize,
    pub goals1: u32,
    pub goals2: u32,
}

/// Past results plus the roster discovered while reading them.
#[derive(Debug, Clone, Default)]
pub struct HistoricalMatchSet {
    roster: Roster,
    matches: Vec<HistoricalMatch>,
}

impl HistoricalMatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, team1: &str, team2: &str, goals1: u32, goals2: u32) -> HistoricalMatch {
        let m = HistoricalMatch {
            team1: self.roster.ensure_present(team1.trim()),
            team2: self.roster.ensure_present(team2.trim()),
            goals1,
            goals2,
        };
        self.matches.push(m);
        m
    }

    /// Reads `team1,team2,team1-goals,team2-goals` rows (header required,
    /// columns located by name).
    pub fn parse(raw: &str, source_name: &str) -> Result<Self> {
        let mut lines = raw
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());
        let mut out = Self::new();

        let Some((header_idx, header)) = lines.next() else {
            return Ok(out);
        };
        let columns = header.split(',').map(str::trim).collect::<Vec<_>>();
        let col = |name: &str| {
            columns.iter().position(|c| *c == name).ok_or_else(|| {
                EnsembleError::parse(source_name, header_idx + 1, format!("missing column {name}"))
            })
        };
        let cols = [col(COL_TEAM1)?, col(COL_TEAM2)?, col(COL_GOALS1)?, col(COL_GOALS2)?];

        for (idx, line) in lines {
            let line_no = idx + 1;
            let fields = line.split(',').map(str::trim).collect::<Vec<_>>();
            let mut picked = [""; 4];
            for (slot, c) in picked.iter_mut().zip(cols) {
                *slot = fields
                    .get(c)
                    .copied()
                    .ok_or_else(|| EnsembleError::parse(source_name, line_no, "short row"))?;
            }
            let goals = |raw: &str| {
                raw.parse::<u32>().map_err(|_| {
                    EnsembleError::parse(source_name, line_no, format!("bad goal count {raw:?}"))
                })
            };
            let (g1, g2) = (goals(picked[2])?, goals(picked[3])?);
            out.push(picked[0], picked[1], g1, g2);
        }
        Ok(out)
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| EnsembleError::io(path, e))?;
        Self::parse(&raw, &path.display().to_string())
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn matches(&self) -> &[HistoricalMatch] {
        &self.matches
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub max_iters: usize,
    /// Stop once the gradient norm, per historical match, falls below this.
    pub tolerance: f64,
    pub initial_step: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iters: 20_000,
            tolerance: 1e-7,
            initial_step: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FitReport {
    pub iterations: usize,
    pub log_likelihood: f64,
    pub gradient_norm: f64,
}

/// Latent per-team strengths fitted to goal counts.
///
/// A team with strength `s1` meeting a team with strength `s2` scores at
/// Poisson rate `exp(s1 - s2)`. Strengths are only identified up to a common
/// shift, so the last team's strength is pinned to minus the sum of the
/// others and only `N - 1` parameters are free.
#[derive(Debug, Clone)]
pub struct StrengthModel {
    history: HistoricalMatchSet,
    params: Vec<f64>,
}

impl StrengthModel {
    pub fn new(history: HistoricalMatchSet) -> Result<Self> {
        if history.is_empty() || history.roster().is_empty() {
            return Err(EnsembleError::EmptyHistory);
        }
        let params = vec![0.0; history.roster().len() - 1];
        Ok(Self { history, params })
    }

    pub fn history(&self) -> &HistoricalMatchSet {
        &self.history
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn expand_params(params: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(params.len() + 1);
        out.extend_from_slice(params);
        out.push(-params.iter().sum::<f64>());
        out
    }

    /// Fitted strengths for every team in the history roster.
    pub fn strengths(&self) -> Vec<f64> {
        Self::expand_params(&self.params)
    }

    pub fn log_likelihood(&self, params: &[f64]) -> f64 {
        if params.len() + 1 != self.history.roster().len() {
            return f64::NEG_INFINITY;
        }
        let strengths = Self::expand_params(params);
        self.history
            .matches()
            .iter()
            .map(|m| {
                let diff = strengths[m.team1] - strengths[m.team2];
                poisson_ln_pmf(m.goals1, diff.exp()) + poisson_ln_pmf(m.goals2, (-diff).exp())
            })
            .sum()
    }

    /// Gradient of [`log_likelihood`](Self::log_likelihood) with respect to the free parameters.
    pub fn gradient(&self, params: &[f64]) -> Vec<f64> {
        let strengths = Self::expand_params(params);
        let mut by_team = vec![0.0; strengths.len()];
        for m in self.history.matches() {
            let diff = strengths[m.team1] - strengths[m.team2];
            let d = m.goals1 as f64 - m.goals2 as f64 - diff.exp() + (-diff).exp();
            by_team[m.team1] += d;
            by_team[m.team2] -= d;
        }
        let last = by_team[by_team.len() - 1];
        by_team[..params.len()].iter().map(|g| g - last).collect()
    }

    /// Maximises the log-likelihood by gradient ascent with a backtracking
    /// line search, starting from all-zero strengths.
    ///
    /// On failure the best point found is kept, so callers may still use
    /// [`strengths`](Self::strengths) if they accept a non-converged fit.
    pub fn fit(&mut self, opts: FitOptions) -> Result<FitReport> {
        let mut x = vec![0.0; self.params.len()];
        let mut ll = self.log_likelihood(&x);
        let mut step = opts.initial_step;
        let tolerance = opts.tolerance * self.history.len() as f64;

        for iter in 0..opts.max_iters {
            let grad = self.gradient(&x);
            let grad_sq = grad.iter().map(|g| g * g).sum::<f64>();
            let grad_norm = grad_sq.sqrt();

            if iter % 500 == 0 {
                debug!(iter, ll, grad_norm, "strength fit progress");
            }

            if grad_norm < tolerance {
                self.params = x;
                info!(
                    iterations = iter,
                    log_likelihood = ll,
                    teams = self.history.roster().len(),
                    "strength model converged"
                );
                return Ok(FitReport {
                    iterations: iter,
                    log_likelihood: ll,
                    gradient_norm: grad_norm,
                });
            }

            let mut t = step;
            loop {
                let candidate = x
                    .iter()
                    .zip(&grad)
                    .map(|(xi, gi)| xi + t * gi)
                    .collect::<Vec<_>>();
                let cand_ll = self.log_likelihood(&candidate);
                if cand_ll >= ll + ARMIJO_C * t * grad_sq {
                    x = candidate;
                    ll = cand_ll;
                    break;
                }
                t *= 0.5;
                if t < MIN_STEP {
                    self.params = x;
                    if grad_norm < tolerance * STALL_FACTOR {
                        debug!(iter, grad_norm, "line search stalled near optimum");
                        return Ok(FitReport {
                            iterations: iter,
                            log_likelihood: ll,
                            gradient_norm: grad_norm,
                        });
                    }
                    return Err(EnsembleError::Convergence {
                        iterations: iter,
                        log_likelihood: ll,
                    });
                }
            }
            step = t * 2.0;
        }

        self.params = x;
        Err(EnsembleError::Convergence {
            iterations: opts.max_iters,
            log_likelihood: ll,
        })
    }

    /// Win probabilities between the teams of `subset`, in the subset's order.
    pub fn win_probabilities_for(&self, subset: Arc<Roster>) -> Result<WinProbabilityMatrix> {
        let strengths = self.strengths();
        let mut selected = Vec::with_capacity(subset.len());
        for name in subset.iter() {
            let idx = self.history.roster().require(name)?;
            selected.push(strengths[idx]);
        }
        WinProbabilityMatrix::from_strengths(subset, selected)
    }
}
