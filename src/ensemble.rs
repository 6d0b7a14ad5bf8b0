use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EnsembleError, Result};
use crate::scenario::{ScenarioUnit, TeamResults};
use crate::solver::{InvocationStatus, Solver};
use crate::summary::{self, EnsembleSummary};
use crate::win_prob::{DEFAULT_SIGMA, WinProbabilityMatrix};

pub const RESULTS_FILE: &str = "results.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const MANIFEST_FILE: &str = "manifest.json";

const ALPHABET: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// Fixed-width lowercase names for `count` units: "a".."z" up to 26 units,
/// "aa".."zz" up to 676, and so on. Names sort in generation order.
pub fn ordinal_names(count: usize) -> Vec<String> {
    let mut width = 1;
    let mut capacity = 26usize;
    while capacity < count {
        width += 1;
        capacity = capacity.saturating_mul(26);
    }

    (0..count)
        .map(|mut index| {
            let mut letters = vec![b'a'; width];
            for slot in letters.iter_mut().rev() {
                *slot = ALPHABET[index % 26];
                index /= 26;
            }
            String::from_utf8_lossy(&letters).into_owned()
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct EnsembleOptions {
    pub sigma: f64,
    /// Unit `k` draws from an RNG seeded with `seed + k`.
    pub seed: u64,
    /// Worker pool size; 0 uses the global rayon pool.
    pub parallelism: usize,
}

impl Default for EnsembleOptions {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_SIGMA,
            seed: 0,
            parallelism: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    CreateDir,
    WriteInputs,
    Invoke,
}

#[derive(Debug, Clone)]
pub struct UnitFailure {
    pub path: PathBuf,
    pub phase: Phase,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub units: usize,
    pub launched: usize,
    pub succeeded: usize,
    pub failures: Vec<UnitFailure>,
}

#[derive(Debug)]
pub struct UnitResult {
    pub path: PathBuf,
    pub duration: Option<f64>,
    pub result: Result<TeamResults>,
}

/// Row of `results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub time: Option<f64>,
    pub result: Option<TeamResults>,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&UnitResult> for ResultRecord {
    fn from(unit: &UnitResult) -> Self {
        let (result, error) = match &unit.result {
            Ok(r) => (Some(r.clone()), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Self {
            time: unit.duration,
            result,
            path: unit.path.display().to_string(),
            error,
        }
    }
}

/// Written next to the results so a run can be reproduced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub generated_at: String,
    pub source: String,
    pub units: usize,
    pub seed: u64,
    pub sigma: f64,
    pub program: String,
    pub teams: Vec<String>,
}

/// A named sequence of scenario units sharing one output prefix.
#[derive(Debug)]
pub struct Ensemble {
    prefix: PathBuf,
    units: Vec<ScenarioUnit>,
    // Error that removed each unit from the current run before invocation.
    dropped: Vec<Option<EnsembleError>>,
    opts: EnsembleOptions,
}

impl Ensemble {
    pub fn build(
        base: &WinProbabilityMatrix,
        count: usize,
        prefix: impl Into<PathBuf>,
        opts: EnsembleOptions,
    ) -> Self {
        let prefix = prefix.into();
        let units = ordinal_names(count)
            .into_iter()
            .enumerate()
            .map(|(k, name)| {
                ScenarioUnit::new(base, prefix.join(name), opts.seed.wrapping_add(k as u64))
            })
            .collect::<Vec<_>>();
        Self {
            prefix,
            dropped: vec![None; units.len()],
            units,
            opts,
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn units(&self) -> &[ScenarioUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Error that dropped unit `idx` during the last run, if any.
    pub fn dropped(&self, idx: usize) -> Option<&EnsembleError> {
        self.dropped.get(idx).and_then(Option::as_ref)
    }

    /// Perturbs, materializes and solves every unit. Each phase finishes for
    /// all units before the next one starts. A unit that fails a phase is
    /// dropped from later phases without affecting its siblings, and its
    /// directory is never read back as a result.
    pub fn run<S: Solver + ?Sized>(&mut self, solver: &S) -> RunReport {
        let pool = build_pool(self.opts.parallelism);
        let sigma = self.opts.sigma;
        let mut report = RunReport {
            units: self.units.len(),
            ..RunReport::default()
        };

        let units = &mut self.units;
        with_pool(&pool, || units.par_iter_mut().for_each(|u| u.prepare(sigma)));
        info!(units = report.units, sigma, "perturbed scenarios");

        self.dropped = vec![None; self.units.len()];
        run_phase(
            &pool,
            &self.units,
            &mut self.dropped,
            Phase::CreateDir,
            &mut report,
            ScenarioUnit::create_dir,
        );
        run_phase(
            &pool,
            &self.units,
            &mut self.dropped,
            Phase::WriteInputs,
            &mut report,
            ScenarioUnit::write_inputs,
        );
        info!(
            ready = self.dropped.iter().filter(|d| d.is_none()).count(),
            prefix = %self.prefix.display(),
            "scenario inputs written"
        );

        let outcomes = with_pool(&pool, || {
            self.units
                .par_iter()
                .zip(self.dropped.par_iter())
                .map(|(u, dropped)| dropped.is_none().then(|| u.invoke(solver)))
                .collect::<Vec<_>>()
        });
        for (unit, outcome) in self.units.iter().zip(outcomes) {
            let message = match outcome {
                None => continue,
                Some(Ok(InvocationStatus::Succeeded)) => {
                    report.launched += 1;
                    report.succeeded += 1;
                    continue;
                }
                Some(Ok(InvocationStatus::Exited(code))) => {
                    report.launched += 1;
                    format!("solver exited with code {code:?}")
                }
                Some(Ok(InvocationStatus::LaunchFailed(msg))) => msg,
                Some(Err(err)) => err.to_string(),
            };
            report.failures.push(UnitFailure {
                path: unit.dir().to_path_buf(),
                phase: Phase::Invoke,
                message,
            });
        }
        info!(
            launched = report.launched,
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "ensemble run finished"
        );
        report
    }

    /// Duration and result of every unit, in generation order. Read failures
    /// are reported per unit. A unit dropped before invocation reports the
    /// error that dropped it, whatever its directory holds.
    pub fn collect_results(&self) -> Vec<UnitResult> {
        self.units
            .iter()
            .zip(&self.dropped)
            .map(|(u, dropped)| {
                if let Some(err) = dropped {
                    return UnitResult {
                        path: u.dir().to_path_buf(),
                        duration: None,
                        result: Err(err.clone()),
                    };
                }
                let duration = u.read_duration().unwrap_or_else(|err| {
                    warn!(dir = %u.dir().display(), %err, "unreadable solver log");
                    None
                });
                UnitResult {
                    path: u.dir().to_path_buf(),
                    duration,
                    result: u.read_result(),
                }
            })
            .collect()
    }

    /// Recomputed from the files on disk on every call.
    pub fn summarize(&self) -> EnsembleSummary {
        summarize_results(&self.collect_results())
    }

    /// Writes `results.json` and `summary.json` under the prefix.
    pub fn write_outputs(&self) -> Result<EnsembleSummary> {
        let results = self.collect_results();
        for unit in &results {
            if let Err(err) = &unit.result {
                warn!(dir = %unit.path.display(), %err, "scenario has no result");
            }
        }

        let records = results.iter().map(ResultRecord::from).collect::<Vec<_>>();
        write_json(&self.prefix.join(RESULTS_FILE), &records)?;

        let summary = summarize_results(&results);
        write_json(&self.prefix.join(SUMMARY_FILE), &summary)?;
        Ok(summary)
    }
}

pub fn summarize_results(results: &[UnitResult]) -> EnsembleSummary {
    summary::summarize(
        results.iter().filter_map(|u| u.result.as_ref().ok()),
        results.iter().map(|u| u.duration),
    )
}

fn run_phase<F>(
    pool: &Option<rayon::ThreadPool>,
    units: &[ScenarioUnit],
    dropped: &mut [Option<EnsembleError>],
    phase: Phase,
    report: &mut RunReport,
    step: F,
) where
    F: Fn(&ScenarioUnit) -> Result<()> + Sync + Send,
{
    let outcomes = with_pool(pool, || {
        units
            .par_iter()
            .zip(dropped.par_iter())
            .map(|(u, d)| d.is_none().then(|| step(u)))
            .collect::<Vec<_>>()
    });
    for (idx, outcome) in outcomes.into_iter().enumerate() {
        if let Some(Err(err)) = outcome {
            warn!(dir = %units[idx].dir().display(), ?phase, %err, "scenario dropped");
            report.failures.push(UnitFailure {
                path: units[idx].dir().to_path_buf(),
                phase,
                message: err.to_string(),
            });
            dropped[idx] = Some(err);
        }
    }
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| EnsembleError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        EnsembleError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| EnsembleError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| EnsembleError::io(path, e))?;
    Ok(())
}

fn build_pool(threads: usize) -> Option<rayon::ThreadPool> {
    if threads == 0 {
        return None;
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .ok()
}

fn with_pool<T>(pool: &Option<rayon::ThreadPool>, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    if let Some(pool) = pool.as_ref() {
        pool.install(action)
    } else {
        action()
    }
}
