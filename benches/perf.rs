use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::hint::black_box;

use tourney_ensemble::roster::Roster;
use tourney_ensemble::skellam;
use tourney_ensemble::strength_model::{FitOptions, HistoricalMatchSet, StrengthModel};
use tourney_ensemble::win_prob::WinProbabilityMatrix;

const TEAMS: usize = 24;

fn roster() -> Arc<Roster> {
    let names = (0..TEAMS).map(|i| format!("T{i:02}")).collect();
    Arc::new(Roster::new(names).expect("unique names"))
}

fn strengths() -> Vec<f64> {
    (0..TEAMS).map(|i| (i as f64 - 11.5) * 0.05).collect()
}

fn history() -> HistoricalMatchSet {
    let mut set = HistoricalMatchSet::new();
    for i in 0..TEAMS {
        for j in 0..TEAMS {
            if i == j {
                continue;
            }
            let g1 = ((i * 7 + j * 3) % 4) as u32;
            let g2 = ((i * 5 + j * 11) % 3) as u32;
            set.push(&format!("T{i:02}"), &format!("T{j:02}"), g1, g2);
        }
    }
    set
}

fn bench_outcome_probs(c: &mut Criterion) {
    c.bench_function("skellam_outcome_probs", |b| {
        b.iter(|| black_box(skellam::outcome_probs(black_box(1.8), black_box(0.9))))
    });
}

fn bench_matrix_from_strengths(c: &mut Criterion) {
    let roster = roster();
    let strengths = strengths();
    c.bench_function("matrix_from_strengths_24", |b| {
        b.iter(|| {
            let m = WinProbabilityMatrix::from_strengths(roster.clone(), strengths.clone()).unwrap();
            black_box(m.get(0, 1));
        })
    });
}

fn bench_perturb(c: &mut Criterion) {
    let base = WinProbabilityMatrix::from_strengths(roster(), strengths()).unwrap();
    let table = WinProbabilityMatrix::from_table(base.roster().clone(), &base.rows()).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    c.bench_function("perturb_table_24", |b| {
        b.iter(|| {
            let mut m = table.clone();
            m.perturb(0.01, &mut rng);
            black_box(m.get(1, 0));
        })
    });
}

fn bench_log_likelihood(c: &mut Criterion) {
    let model = StrengthModel::new(history()).unwrap();
    let params = vec![0.01; TEAMS - 1];
    c.bench_function("log_likelihood_552_matches", |b| {
        b.iter(|| black_box(model.log_likelihood(black_box(&params))))
    });
}

fn bench_fit(c: &mut Criterion) {
    let model = StrengthModel::new(history()).unwrap();
    c.bench_function("strength_fit_24", |b| {
        b.iter(|| {
            let mut m = model.clone();
            let _ = black_box(m.fit(FitOptions::default()));
        })
    });
}

criterion_group!(
    benches,
    bench_outcome_probs,
    bench_matrix_from_strengths,
    bench_perturb,
    bench_log_likelihood,
    bench_fit
);
criterion_main!(benches);
