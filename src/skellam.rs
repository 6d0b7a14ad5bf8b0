//! Poisson scoreline helpers.
//!
//! A match between two sides scoring independently at Poisson rates is
//! decided by the sign of the goal difference, which is Skellam distributed.

const TAIL_SIGMAS: f64 = 12.0;
const TAIL_PAD: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcomeProbs {
    pub first_wins: f64,
    pub tie: f64,
    pub second_wins: f64,
}

pub fn ln_factorial(k: u32) -> f64 {
    (2..=k).map(|i| (i as f64).ln()).sum()
}

pub fn poisson_ln_pmf(k: u32, lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return if k == 0 { 0.0 } else { f64::NEG_INFINITY };
    }
    k as f64 * lambda.ln() - lambda - ln_factorial(k)
}

/// Largest rate whose pmf is tabulated exactly. Beyond it the goal
/// difference is treated as normal.
const MAX_TABLE_RATE: f64 = 1e5;

/// Poisson pmf for `0..=max_k`, where `max_k` is far enough into the tail that
/// the truncated mass is below double precision. `lambda` must not exceed
/// [`MAX_TABLE_RATE`].
fn poisson_pmf_table(lambda: f64) -> Vec<f64> {
    let lambda = lambda.clamp(0.0, MAX_TABLE_RATE);
    let max_k = (lambda + TAIL_SIGMAS * lambda.sqrt() + TAIL_PAD).ceil() as usize;
    let mut out = Vec::with_capacity(max_k + 1);
    if lambda == 0.0 {
        out.push(1.0);
        return out;
    }

    // Log space so large rates do not underflow exp(-lambda).
    let ln_lambda = lambda.ln();
    let mut ln_fact = 0.0_f64;
    for k in 0..=max_k {
        if k > 0 {
            ln_fact += (k as f64).ln();
        }
        out.push((k as f64 * ln_lambda - lambda - ln_fact).exp());
    }
    out
}

fn tail_sums(pmf: &[f64]) -> Vec<f64> {
    // tail[k] = P(X > k)
    let mut tail = vec![0.0; pmf.len()];
    let mut acc = 0.0;
    for k in (0..pmf.len()).rev() {
        tail[k] = acc;
        acc += pmf[k];
    }
    tail
}

/// Win/tie/loss split for a side scoring at `lambda_first` against a side
/// scoring at `lambda_second`. The three values sum to one.
///
/// Rates above [`MAX_TABLE_RATE`] (including infinite ones) use a normal
/// approximation of the goal difference, so any pair of non-negative rates
/// gives a bounded answer.
pub fn outcome_probs(lambda_first: f64, lambda_second: f64) -> OutcomeProbs {
    let raw = if lambda_first.max(lambda_second) > MAX_TABLE_RATE {
        normal_outcome_probs(lambda_first, lambda_second)
    } else {
        table_outcome_probs(lambda_first, lambda_second)
    };
    normalized(raw)
}

fn table_outcome_probs(lambda_first: f64, lambda_second: f64) -> OutcomeProbs {
    let pmf_first = poisson_pmf_table(lambda_first);
    let pmf_second = poisson_pmf_table(lambda_second);
    let tail_first = tail_sums(&pmf_first);
    let tail_second = tail_sums(&pmf_second);

    let mut first_wins = 0.0;
    for (k, p) in pmf_second.iter().enumerate() {
        if let Some(t) = tail_first.get(k) {
            first_wins += p * t;
        }
    }

    let mut second_wins = 0.0;
    for (k, p) in pmf_first.iter().enumerate() {
        if let Some(t) = tail_second.get(k) {
            second_wins += p * t;
        }
    }

    let tie: f64 = pmf_first
        .iter()
        .zip(pmf_second.iter())
        .map(|(a, b)| a * b)
        .sum();

    OutcomeProbs {
        first_wins,
        tie,
        second_wins,
    }
}

/// Goal difference ~ N(l1 - l2, l1 + l2) with a half-goal continuity
/// correction around the tie.
fn normal_outcome_probs(lambda_first: f64, lambda_second: f64) -> OutcomeProbs {
    let mean = lambda_first - lambda_second;
    let sd = (lambda_first + lambda_second).sqrt();
    if !(mean.is_finite() && sd.is_finite()) || sd == 0.0 {
        return if lambda_first > lambda_second {
            OutcomeProbs {
                first_wins: 1.0,
                tie: 0.0,
                second_wins: 0.0,
            }
        } else if lambda_second > lambda_first {
            OutcomeProbs {
                first_wins: 0.0,
                tie: 0.0,
                second_wins: 1.0,
            }
        } else {
            OutcomeProbs {
                first_wins: 0.5,
                tie: 0.0,
                second_wins: 0.5,
            }
        };
    }

    let below = |x: f64| normal_cdf((x - mean) / sd);
    let second_wins = below(-0.5);
    let up_to_tie = below(0.5);
    OutcomeProbs {
        first_wins: 1.0 - up_to_tie,
        tie: (up_to_tie - second_wins).max(0.0),
        second_wins,
    }
}

fn normalized(raw: OutcomeProbs) -> OutcomeProbs {
    // Guard against truncation drift.
    let sum = raw.first_wins + raw.tie + raw.second_wins;
    if sum > 0.0 && sum.is_finite() {
        OutcomeProbs {
            first_wins: raw.first_wins / sum,
            tie: raw.tie / sum,
            second_wins: raw.second_wins / sum,
        }
    } else {
        OutcomeProbs {
            first_wins: 0.0,
            tie: 1.0,
            second_wins: 0.0,
        }
    }
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// Complementary error function, fractional error below 1.2e-7.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87
                                    + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let value = t * poly.exp();
    if x >= 0.0 { value } else { 2.0 - value }
}
