use std::fs;
use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::warn;

use crate::error::{EnsembleError, Result};
use crate::roster::Roster;
use crate::skellam;

pub const COMPLEMENT_TOLERANCE: f64 = 1e-10;
pub const DEFAULT_SIGMA: f64 = 0.01;

const COL_TEAM1: &str = "team1";
const COL_TEAM2: &str = "team2";
const COL_PROB: &str = "prob-win-team1";

#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseRow {
    pub team1: String,
    pub team2: String,
    pub prob_win_team1: f64,
}

/// `P(row team beats column team)` for every ordered pair of a roster.
#[derive(Debug, Clone)]
pub struct WinProbabilityMatrix {
    roster: Arc<Roster>,
    probs: Vec<f64>,
    // Present when derived from a strength model; perturbation then acts on
    // strengths instead of individual cells.
    strengths: Option<Vec<f64>>,
}

impl WinProbabilityMatrix {
    fn zeroed(roster: Arc<Roster>) -> Self {
        let n = roster.len();
        Self {
            roster,
            probs: vec![0.0; n * n],
            strengths: None,
        }
    }

    /// Builds the matrix from pairwise rows. Pairs missing from `rows` stay at 0;
    /// callers that need a complete matrix should call [`check_invariant`].
    ///
    /// [`check_invariant`]: Self::check_invariant
    pub fn from_table(roster: Arc<Roster>, rows: &[PairwiseRow]) -> Result<Self> {
        let mut out = Self::zeroed(roster);
        for row in rows {
            let i = out.roster.require(&row.team1)?;
            let j = out.roster.require(&row.team2)?;
            out.set(i, j, row.prob_win_team1);
            out.set(j, i, 1.0 - row.prob_win_team1);
        }
        Ok(out)
    }

    pub fn from_strengths(roster: Arc<Roster>, strengths: Vec<f64>) -> Result<Self> {
        if strengths.len() != roster.len() {
            return Err(EnsembleError::StrengthCount {
                expected: roster.len(),
                got: strengths.len(),
            });
        }
        let mut out = Self::zeroed(roster);
        out.fill_from_strengths(&strengths);
        out.strengths = Some(strengths);
        Ok(out)
    }

    fn fill_from_strengths(&mut self, strengths: &[f64]) {
        let n = strengths.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let lambda_i = (strengths[i] - strengths[j]).exp();
                let lambda_j = (strengths[j] - strengths[i]).exp();
                let outcome = skellam::outcome_probs(lambda_i, lambda_j);

                // Ties are split evenly between the two sides.
                let p_i = (outcome.first_wins + outcome.tie / 2.0).clamp(0.0, 1.0);
                self.set(i, j, p_i);
                self.set(j, i, 1.0 - p_i);
            }
        }
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn strengths(&self) -> Option<&[f64]> {
        self.strengths.as_deref()
    }

    pub fn len(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.probs[i * self.roster.len() + j]
    }

    fn set(&mut self, i: usize, j: usize, value: f64) {
        let n = self.roster.len();
        self.probs[i * n + j] = value;
    }

    pub fn prob_by_name(&self, team1: &str, team2: &str) -> Result<f64> {
        let i = self.roster.require(team1)?;
        let j = self.roster.require(team2)?;
        Ok(self.get(i, j))
    }

    pub fn check_invariant(&self) -> bool {
        let n = self.roster.len();
        for i in 0..n {
            for j in (i + 1)..n {
                if (self.get(i, j) + self.get(j, i) - 1.0).abs() >= COMPLEMENT_TOLERANCE {
                    return false;
                }
            }
        }
        true
    }

    /// Applies Gaussian jitter with standard deviation `sigma`.
    ///
    /// Table-derived matrices receive one draw per unordered pair, added to
    /// `M[i][j]` and subtracted from `M[j][i]`. A draw that would push either
    /// cell outside `[0, 1]` is clipped to the bound, so the jitter is only
    /// Gaussian for cells at least a few sigma away from 0 and 1. Elsewhere
    /// the raw draw is applied unchanged. Strength-derived matrices jitter
    /// every strength independently and are rebuilt from the new strengths.
    pub fn perturb<R: Rng + ?Sized>(&mut self, sigma: f64, rng: &mut R) {
        let normal = match Normal::new(0.0, sigma) {
            Ok(normal) if sigma > 0.0 => normal,
            _ => {
                warn!(sigma, "skipping perturbation with non-positive sigma");
                return;
            }
        };

        if let Some(strengths) = self.strengths.take() {
            let jittered = strengths
                .iter()
                .map(|s| s + normal.sample(rng))
                .collect::<Vec<_>>();
            self.fill_from_strengths(&jittered);
            self.strengths = Some(jittered);
            return;
        }

        let n = self.roster.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let forward = self.get(i, j);
                let backward = self.get(j, i);
                let mut delta = normal.sample(rng);
                let lo = (-forward).max(backward - 1.0);
                let hi = (1.0 - forward).min(backward);
                if lo <= hi {
                    delta = delta.clamp(lo, hi);
                }
                self.set(i, j, forward + delta);
                self.set(j, i, backward - delta);
            }
        }
    }

    /// One row per unordered pair, in roster order.
    pub fn rows(&self) -> Vec<PairwiseRow> {
        let n = self.roster.len();
        let mut out = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for (i, team1) in self.roster.iter().enumerate() {
            for (j, team2) in self.roster.iter().enumerate().skip(i + 1) {
                out.push(PairwiseRow {
                    team1: team1.to_string(),
                    team2: team2.to_string(),
                    prob_win_team1: self.get(i, j),
                });
            }
        }
        out
    }

    pub fn to_csv(&self) -> String {
        write_table(&self.rows())
    }
}

pub fn write_table(rows: &[PairwiseRow]) -> String {
    let mut out = format!("{COL_TEAM1},{COL_TEAM2},{COL_PROB}\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{}\n",
            row.team1, row.team2, row.prob_win_team1
        ));
    }
    out
}

/// Parses a pairwise table. Columns are located by header name, so extra
/// columns and any column order are accepted.
pub fn parse_table(raw: &str, source_name: &str) -> Result<Vec<PairwiseRow>> {
    let mut lines = raw
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((header_idx, header)) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns = header.split(',').map(str::trim).collect::<Vec<_>>();
    let col = |name: &str| {
        columns
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| {
                EnsembleError::parse(source_name, header_idx + 1, format!("missing column {name}"))
            })
    };
    let (c1, c2, cp) = (col(COL_TEAM1)?, col(COL_TEAM2)?, col(COL_PROB)?);

    let mut rows = Vec::new();
    for (idx, line) in lines {
        let line_no = idx + 1;
        let fields = line.split(',').map(str::trim).collect::<Vec<_>>();
        let field = |c: usize| {
            fields
                .get(c)
                .copied()
                .ok_or_else(|| EnsembleError::parse(source_name, line_no, "short row"))
        };
        let raw_prob = field(cp)?;
        let prob_win_team1 = raw_prob.parse::<f64>().map_err(|_| {
            EnsembleError::parse(source_name, line_no, format!("bad probability {raw_prob:?}"))
        })?;
        rows.push(PairwiseRow {
            team1: field(c1)?.to_string(),
            team2: field(c2)?.to_string(),
            prob_win_team1,
        });
    }
    Ok(rows)
}

pub fn read_table(path: &Path) -> Result<Vec<PairwiseRow>> {
    let raw = fs::read_to_string(path).map_err(|e| EnsembleError::io(path, e))?;
    parse_table(&raw, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn roster(names: &[&str]) -> Arc<Roster> {
        Arc::new(Roster::new(names.iter().map(|s| s.to_string()).collect()).unwrap())
    }

    fn row(t1: &str, t2: &str, p: f64) -> PairwiseRow {
        PairwiseRow {
            team1: t1.to_string(),
            team2: t2.to_string(),
            prob_win_team1: p,
        }
    }

    fn full_table() -> WinProbabilityMatrix {
        WinProbabilityMatrix::from_table(
            roster(&["ITA", "AUT", "NED", "CZE"]),
            &[
                row("ITA", "AUT", 0.71),
                row("ITA", "NED", 0.52),
                row("CZE", "ITA", 0.25),
                row("AUT", "NED", 0.33),
                row("AUT", "CZE", 0.5),
                row("NED", "CZE", 0.64),
            ],
        )
        .unwrap()
    }

    #[test]
    fn from_table_fills_both_directions() {
        let m = full_table();
        assert_abs_diff_eq!(m.prob_by_name("ITA", "CZE").unwrap(), 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(m.get(1, 0), 0.29, epsilon = 1e-12);
        assert!(m.check_invariant());
    }

    #[test]
    fn from_table_rejects_unknown_team() {
        let err = WinProbabilityMatrix::from_table(roster(&["ITA", "AUT"]), &[row("ITA", "WAL", 0.6)])
            .unwrap_err();
        assert!(matches!(err, EnsembleError::UnknownTeam(ref t) if t == "WAL"));
    }

    #[test]
    fn incomplete_table_fails_invariant_check() {
        let m = WinProbabilityMatrix::from_table(roster(&["A", "B", "C"]), &[row("A", "B", 0.6)])
            .unwrap();
        assert!(!m.check_invariant());
    }

    #[test]
    fn table_perturbation_keeps_complements() {
        let mut rng = StdRng::seed_from_u64(11);
        let base = full_table();
        for _ in 0..50 {
            let mut m = base.clone();
            m.perturb(0.2, &mut rng);
            assert!(m.check_invariant());
            for i in 0..m.len() {
                for j in 0..m.len() {
                    if i != j {
                        assert!((-1e-12..=1.0 + 1e-12).contains(&m.get(i, j)));
                    }
                }
            }
        }
        // The base copy is untouched.
        assert_abs_diff_eq!(base.get(0, 1), 0.71);
    }

    #[test]
    fn interior_cells_receive_the_raw_draw() {
        let mut m = WinProbabilityMatrix::from_table(roster(&["A", "B"]), &[row("A", "B", 0.5)])
            .unwrap();
        m.perturb(0.01, &mut StdRng::seed_from_u64(21));

        let expected = Normal::new(0.0, 0.01)
            .unwrap()
            .sample(&mut StdRng::seed_from_u64(21));
        assert_eq!(m.get(0, 1), 0.5 + expected);
        assert_eq!(m.get(1, 0), 0.5 - expected);
    }

    #[test]
    fn draws_past_a_bound_are_clipped() {
        let mut m = WinProbabilityMatrix::from_table(roster(&["A", "B"]), &[row("A", "B", 0.999)])
            .unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            m.perturb(0.5, &mut rng);
            assert!((0.0..=1.0).contains(&m.get(0, 1)));
            assert!((0.0..=1.0).contains(&m.get(1, 0)));
            assert!(m.check_invariant());
        }
    }

    #[test]
    fn extreme_strength_gaps_stay_valid() {
        for gap in [5.0, 20.0, 50.0, 400.0] {
            for sign in [1.0, -1.0] {
                let s = sign * gap;
                let m = WinProbabilityMatrix::from_strengths(
                    roster(&["A", "B", "C"]),
                    vec![s, -s, 0.0],
                )
                .unwrap();
                assert!(m.check_invariant(), "gap {s}");
                for i in 0..3 {
                    for j in 0..3 {
                        if i != j {
                            assert!((0.0..=1.0).contains(&m.get(i, j)), "gap {s}");
                        }
                    }
                }
                if gap >= 20.0 {
                    let favourite = if sign > 0.0 { (0, 1) } else { (1, 0) };
                    assert!(m.get(favourite.0, favourite.1) > 0.999_999);
                }
            }
        }
    }

    #[test]
    fn strengths_give_valid_matrix() {
        let m = WinProbabilityMatrix::from_strengths(
            roster(&["A", "B", "C", "D"]),
            vec![1.2, -0.4, 0.0, -0.8],
        )
        .unwrap();
        assert!(m.check_invariant());
        assert!(m.get(0, 1) > 0.5);
        assert!(m.get(3, 0) < 0.5);
        assert!(m.get(2, 3) > m.get(2, 1));
    }

    #[test]
    fn equal_strengths_are_coin_flips() {
        let m = WinProbabilityMatrix::from_strengths(roster(&["A", "B"]), vec![0.3, 0.3]).unwrap();
        assert_abs_diff_eq!(m.get(0, 1), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn strength_count_must_match_roster() {
        let err = WinProbabilityMatrix::from_strengths(roster(&["A", "B"]), vec![0.1]).unwrap_err();
        assert!(matches!(err, EnsembleError::StrengthCount { expected: 2, got: 1 }));
    }

    #[test]
    fn strength_perturbation_moves_strengths_and_rebuilds() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut m =
            WinProbabilityMatrix::from_strengths(roster(&["A", "B", "C"]), vec![0.5, 0.0, -0.5])
                .unwrap();
        m.perturb(0.1, &mut rng);
        let s = m.strengths().unwrap().to_vec();
        assert_ne!(s, vec![0.5, 0.0, -0.5]);

        let rebuilt = WinProbabilityMatrix::from_strengths(m.roster().clone(), s).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                if i != j {
                    assert_abs_diff_eq!(m.get(i, j), rebuilt.get(i, j), epsilon = 1e-15);
                }
            }
        }
        assert!(m.check_invariant());
    }

    #[test]
    fn csv_round_trip_reproduces_matrix() {
        let m = WinProbabilityMatrix::from_strengths(
            roster(&["BEL", "POR", "FRA"]),
            vec![0.42, -0.17, -0.25],
        )
        .unwrap();
        let rows = parse_table(&m.to_csv(), "inline").unwrap();
        let back = WinProbabilityMatrix::from_table(m.roster().clone(), &rows).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                if i != j {
                    assert_abs_diff_eq!(m.get(i, j), back.get(i, j), epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn parse_table_locates_columns_by_header() {
        let raw = "prob-win-team1,team2,team1\n0.4,B,A\n\n";
        let rows = parse_table(raw, "inline").unwrap();
        assert_eq!(rows, vec![row("A", "B", 0.4)]);
    }

    #[test]
    fn parse_table_reports_line_of_bad_value() {
        let raw = "team1,team2,prob-win-team1\nA,B,0.4\nA,C,abc\n";
        let err = parse_table(raw, "probs.csv").unwrap_err();
        assert!(matches!(err, EnsembleError::Parse { line: 3, .. }));
    }
}
