use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scenario::TeamResults;

/// Per-team spread of solver probabilities across an ensemble.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSummary {
    pub average: BTreeMap<String, f64>,
    pub std: BTreeMap<String, f64>,
    #[serde(rename = "average-time")]
    pub average_time: Option<f64>,
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Folds per-unit results into a summary. Teams missing from a unit's result
/// simply contribute nothing for that unit; unknown durations are skipped.
pub fn summarize<'a, R, D>(results: R, durations: D) -> EnsembleSummary
where
    R: IntoIterator<Item = &'a TeamResults>,
    D: IntoIterator<Item = Option<f64>>,
{
    let mut by_team: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for result in results {
        for (team, prob) in result {
            by_team.entry(team.clone()).or_default().push(*prob);
        }
    }

    let mut out = EnsembleSummary::default();
    for (team, values) in &by_team {
        if let (Some(m), Some(s)) = (mean(values), std_dev(values)) {
            out.average.insert(team.clone(), m);
            out.std.insert(team.clone(), s);
        }
    }

    let times = durations.into_iter().flatten().collect::<Vec<_>>();
    out.average_time = mean(&times);
    out
}
