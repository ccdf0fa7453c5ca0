//! Numeric kernels shared by drift detection and reporting.
//!
//! All computation is in `f64`. Standard deviation is the population form
//! (divide by `n`), matching the historical monitoring reports.

use std::cmp::Ordering;

/// Descriptive statistics over a sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    /// Number of observations
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

impl Summary {
    /// Summarize a slice of values. An empty slice yields the all-zero default.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let sorted = sorted_copy(values);
        let mean = mean(values);

        Self {
            count: values.len(),
            mean,
            std: population_std_with_mean(values, mean),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p25: percentile_sorted(&sorted, 25.0),
            p50: percentile_sorted(&sorted, 50.0),
            p75: percentile_sorted(&sorted, 75.0),
            p95: percentile_sorted(&sorted, 95.0),
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn population_std(values: &[f64]) -> f64 {
    population_std_with_mean(values, mean(values))
}

fn population_std_with_mean(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

/// Percentile `q` in `[0, 100]` of an ascending slice, linearly interpolated
/// between the two closest ranks.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => return 0.0,
        1 => return sorted[0],
        _ => {}
    }
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Two-sample Kolmogorov-Smirnov outcome
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KsOutcome {
    /// Largest gap between the two empirical CDFs, in `[0, 1]`
    pub statistic: f64,
    /// Asymptotic two-sided p-value, in `[0, 1]`
    pub p_value: f64,
}

/// Two-sample KS test. Both samples must be non-empty.
pub fn ks_two_sample(a: &[f64], b: &[f64]) -> KsOutcome {
    if a.is_empty() || b.is_empty() {
        return KsOutcome { statistic: 0.0, p_value: 1.0 };
    }

    let a = sorted_copy(a);
    let b = sorted_copy(b);
    let (n1, n2) = (a.len() as f64, b.len() as f64);

    // Walk both sorted samples, stepping past ties together.
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let (x1, x2) = (a[i], b[j]);
        if x1 <= x2 {
            while i < a.len() && a[i] == x1 {
                i += 1;
            }
        }
        if x2 <= x1 {
            while j < b.len() && b[j] == x2 {
                j += 1;
            }
        }
        d = d.max((i as f64 / n1 - j as f64 / n2).abs());
    }

    let en = (n1 * n2 / (n1 + n2)).sqrt();
    let p_value = kolmogorov_q((en + 0.12 + 0.11 / en) * d);

    KsOutcome {
        statistic: d.clamp(0.0, 1.0),
        p_value: p_value.clamp(0.0, 1.0),
    }
}

/// Survival function of the Kolmogorov distribution.
fn kolmogorov_q(lambda: f64) -> f64 {
    const EPS1: f64 = 1e-3;
    const EPS2: f64 = 1e-8;

    let a2 = -2.0 * lambda * lambda;
    let mut fac = 2.0;
    let mut sum = 0.0;
    let mut previous = 0.0;
    for j in 1..=100 {
        let jf = j as f64;
        let term = fac * (a2 * jf * jf).exp();
        sum += term;
        if term.abs() <= EPS1 * previous || term.abs() <= EPS2 * sum {
            return sum;
        }
        fac = -fac;
        previous = term.abs();
    }
    // Series failed to converge: lambda is near zero, distributions agree.
    1.0
}

/// Ordinary least-squares fit of value against sequential index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearTrend {
    pub slope: f64,
    pub intercept: f64,
    /// Two-sided p-value for `slope != 0`
    pub p_value: f64,
    pub r_squared: f64,
}

impl LinearTrend {
    fn flat(intercept: f64) -> Self {
        Self { slope: 0.0, intercept, p_value: 1.0, r_squared: 0.0 }
    }
}

/// Fit `value = intercept + slope * index`. Fewer than three points or a
/// constant series yields a flat, non-significant trend.
pub fn linear_trend(values: &[f64]) -> LinearTrend {
    let n = values.len();
    let y_mean = mean(values);
    if n < 3 {
        return LinearTrend::flat(y_mean);
    }

    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = y - y_mean;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if syy == 0.0 {
        return LinearTrend::flat(y_mean);
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let sse: f64 = values
        .iter()
        .enumerate()
        .map(|(i, &y)| (y - (intercept + slope * i as f64)).powi(2))
        .sum();
    let r_squared = (1.0 - sse / syy).clamp(0.0, 1.0);

    let df = nf - 2.0;
    let std_err = (sse / df / sxx).sqrt();
    let p_value = if std_err == 0.0 || !std_err.is_finite() {
        if slope == 0.0 { 1.0 } else { 0.0 }
    } else {
        student_t_two_sided(slope / std_err, df)
    };

    LinearTrend { slope, intercept, p_value, r_squared }
}

/// Two-sided tail probability of Student's t with `df` degrees of freedom.
pub fn student_t_two_sided(t: f64, df: f64) -> f64 {
    if !t.is_finite() {
        return 0.0;
    }
    incomplete_beta(df / 2.0, 0.5, df / (df + t * t)).clamp(0.0, 1.0)
}

/// Regularized incomplete beta function `I_x(a, b)`.
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Lentz evaluation of the incomplete beta continued fraction.
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 300;
    const EPS: f64 = 1e-14;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Lanczos approximation of `ln Γ(x)` for `x > 0`.
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_9e-2,
        -0.539_523_938_495_3e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut series = 1.000_000_000_190_015;
    for c in COEFFS {
        y += 1.0;
        series += c / y;
    }
    -tmp + (2.506_628_274_631_000_5 * series / x).ln()
}

/// Floor applied to every bin probability before the PSI log ratio.
pub const PSI_MIN_PROPORTION: f64 = 0.0001;

/// Equal-width bin edges spanning the reference sample.
pub fn histogram_edges(reference: &[f64], bins: usize) -> Vec<f64> {
    let bins = bins.max(1);
    let (mut lo, mut hi) = reference
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if reference.is_empty() {
        lo = 0.0;
        hi = 1.0;
    } else if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f64;
    (0..=bins)
        .map(|i| if i == bins { hi } else { lo + width * i as f64 })
        .collect()
}

/// Share of `data` in each bin, floored at [`PSI_MIN_PROPORTION`]. Values
/// outside the outer edges are not counted.
pub fn bin_proportions(data: &[f64], edges: &[f64]) -> Vec<f64> {
    let bins = edges.len().saturating_sub(1);
    if bins == 0 {
        return Vec::new();
    }
    let lo = edges[0];
    let hi = edges[bins];
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];

    for &value in data {
        if value < lo || value > hi {
            continue;
        }
        let idx = if value == hi {
            bins - 1
        } else {
            (((value - lo) / width).floor() as usize).min(bins - 1)
        };
        counts[idx] += 1;
    }

    let n = data.len().max(1) as f64;
    counts
        .iter()
        .map(|&c| (c as f64 / n).max(PSI_MIN_PROPORTION))
        .collect()
}

/// Population Stability Index of `current` against `reference`, binned on
/// the reference range.
pub fn population_stability_index(reference: &[f64], current: &[f64], bins: usize) -> f64 {
    let edges = histogram_edges(reference, bins);
    let expected = bin_proportions(reference, &edges);
    let actual = bin_proportions(current, &edges);

    expected
        .iter()
        .zip(actual.iter())
        .map(|(&e, &a)| (a - e) * (a / e).ln())
        .sum()
}
