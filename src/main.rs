use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{error, info, warn};

use tourney_ensemble::config::{Config, MatrixSource};
use tourney_ensemble::ensemble::{self, Ensemble, MANIFEST_FILE, RunManifest};
use tourney_ensemble::logging;
use tourney_ensemble::roster::Roster;
use tourney_ensemble::solver::SolverInvoker;
use tourney_ensemble::strength_model::{FitOptions, HistoricalMatchSet, StrengthModel};
use tourney_ensemble::summary::EnsembleSummary;
use tourney_ensemble::win_prob::{self, WinProbabilityMatrix};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init();

    let cfg = Config::parse();
    cfg.validate()?;

    if let Err(err) = run(&cfg) {
        error!("{err:#}");
        return Err(err);
    }
    Ok(())
}

fn run(cfg: &Config) -> Result<()> {
    let source = cfg.source()?;
    let prefix = cfg.absolute_prefix()?;
    let program = cfg.absolute_program()?;
    let seed = cfg.seed.unwrap_or_else(rand::random);
    info!(seed, source = source.label(), units = cfg.iters, "starting ensemble");

    let mut rng = StdRng::seed_from_u64(seed);
    let mut roster = match &source {
        MatrixSource::Table { teams, .. } | MatrixSource::Model { teams, .. } => {
            Roster::read_file(teams).context("read teams file")?
        }
    };
    if cfg.shuffle_teams {
        roster = roster.random_permutation(&mut rng);
        info!(%roster, "shuffled team order");
    }
    let roster = Arc::new(roster);

    let base = match &source {
        MatrixSource::Table { win_probs, .. } => {
            let rows = win_prob::read_table(win_probs).context("read win-probability table")?;
            WinProbabilityMatrix::from_table(roster.clone(), &rows)?
        }
        MatrixSource::Model { matches, .. } => {
            let history = HistoricalMatchSet::read_file(matches).context("read matches file")?;
            info!(
                matches = history.len(),
                teams = history.roster().len(),
                "loaded historical results"
            );
            let mut model = StrengthModel::new(history)?;
            model
                .fit(FitOptions::default())
                .context("fit strength model")?;
            model.win_probabilities_for(roster.clone())?
        }
    };
    if !base.check_invariant() {
        warn!("base matrix has pairs whose win probabilities do not sum to 1");
    }

    let mut solver = SolverInvoker::new(&program);
    if cfg.single {
        solver.set_dynamic(false).set_single();
    }

    let mut ensemble = Ensemble::build(&base, cfg.iters, &prefix, cfg.ensemble_options(seed));
    let report = ensemble.run(&solver);
    for failure in report.failures.iter().take(10) {
        warn!(
            dir = %failure.path.display(),
            phase = ?failure.phase,
            "{}",
            failure.message
        );
    }

    if report.succeeded == 0 {
        warn!(prefix = %prefix.display(), "no scenario was solved");
    }

    let summary = ensemble.write_outputs()?;
    let manifest = RunManifest {
        generated_at: Utc::now().to_rfc3339(),
        source: source.label().to_string(),
        units: ensemble.len(),
        seed,
        sigma: cfg.sigma,
        program: program.display().to_string(),
        teams: roster.names().to_vec(),
    };
    ensemble::write_json(&prefix.join(MANIFEST_FILE), &manifest)?;

    println!("Ensemble complete");
    println!("Prefix: {}", prefix.display());
    println!(
        "Scenarios: {}/{} solved",
        report.succeeded, report.units
    );
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &EnsembleSummary) {
    let mut rows = summary.average.iter().collect::<Vec<_>>();
    rows.sort_by(|a, b| b.1.total_cmp(a.1));
    for (team, avg) in rows {
        let std = summary.std.get(team).copied().unwrap_or(0.0);
        println!("{team:<24} {:>7.3}%  ± {:.3}", avg * 100.0, std * 100.0);
    }
    match summary.average_time {
        Some(t) => println!("Average solver time: {t:.3}s"),
        None => println!("Average solver time: n/a"),
    }
}
