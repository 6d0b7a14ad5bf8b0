use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use tourney_ensemble::config::FitConfig;
use tourney_ensemble::logging;
use tourney_ensemble::roster::Roster;
use tourney_ensemble::strength_model::{HistoricalMatchSet, StrengthModel};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init();

    let cfg = FitConfig::parse();
    let history = HistoricalMatchSet::read_file(&cfg.matches).context("read matches file")?;
    let all_teams = Arc::new(history.roster().clone());
    let mut model = StrengthModel::new(history)?;

    match model.fit(cfg.fit_options()) {
        Ok(report) => info!(
            iterations = report.iterations,
            log_likelihood = report.log_likelihood,
            "fit complete"
        ),
        Err(err) if cfg.accept_unconverged => {
            warn!(%err, "keeping best point from unconverged fit");
        }
        Err(err) => return Err(err).context("fit strength model"),
    }

    let subset = match &cfg.teams {
        Some(path) => Arc::new(Roster::read_file(path).context("read teams file")?),
        None => all_teams.clone(),
    };
    let matrix = model.win_probabilities_for(subset.clone())?;
    fs::write(&cfg.out, matrix.to_csv())
        .with_context(|| format!("write {}", cfg.out.display()))?;

    let strengths = model.strengths();
    let mut ranked = all_teams
        .iter()
        .zip(strengths.iter().copied())
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    println!("Strength fit complete");
    println!("Matches: {}", model.history().len());
    println!("Table: {} ({} teams)", cfg.out.display(), subset.len());
    for (rank, (team, strength)) in ranked.iter().enumerate() {
        println!("{:>3}. {team:<24} {strength:+.4}", rank + 1);
    }
    Ok(())
}
