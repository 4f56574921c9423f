//! Paired significance tests for per-query metric values.
//!
//! - Paired t-test over the element-wise differences
//! - Wilcoxon signed-rank test, normal approximation without continuity correction
//!
//! # References
//!
//! - Smucker et al. (2007). "A comparison of statistical significance tests for IR evaluation"
//! - Wilcoxon (1945). "Individual comparisons by ranking methods"

use serde::Serialize;

/// Result of a paired t-test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TTestResult {
    /// t-statistic (positive if system A > system B)
    pub t_statistic: f64,
    /// Two-tailed p-value
    pub p_value: f64,
    /// Degrees of freedom
    pub df: usize,
}

/// Result of a Wilcoxon signed-rank test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WilcoxonResult {
    /// Sum of ranks of positive differences (A > B)
    pub w_plus: f64,
    /// Sum of ranks of negative differences
    pub w_minus: f64,
    /// Standardized min(W+, W-)
    pub z: f64,
    /// Two-tailed p-value
    pub p_value: f64,
    /// Non-zero differences that were ranked
    pub n: usize,
}

/// Paired t-test of `system_a` against `system_b` (same queries, same order).
///
/// Callers guarantee equal, non-zero lengths. Degenerate inputs do not fail:
/// a single pair or all-zero differences give t = 0 and p = 1, and constant
/// non-zero differences give an infinite t with p = 0.
pub fn paired_ttest(system_a: &[f64], system_b: &[f64]) -> TTestResult {
    let n = system_a.len().min(system_b.len());
    let diffs: Vec<f64> = system_a.iter().zip(system_b).map(|(a, b)| a - b).collect();

    if n < 2 {
        return TTestResult {
            t_statistic: 0.0,
            p_value: 1.0,
            df: 0,
        };
    }
    let df = n - 1;

    let mean_diff = diffs.iter().sum::<f64>() / n as f64;
    let var_diff = diffs.iter().map(|d| (d - mean_diff).powi(2)).sum::<f64>() / df as f64;
    let se = (var_diff / n as f64).sqrt();

    if mean_diff == 0.0 {
        return TTestResult {
            t_statistic: 0.0,
            p_value: 1.0,
            df,
        };
    }
    if se == 0.0 {
        return TTestResult {
            t_statistic: mean_diff.signum() * f64::INFINITY,
            p_value: 0.0,
            df,
        };
    }

    let t = mean_diff / se;
    TTestResult {
        t_statistic: t,
        p_value: t_distribution_p_value(t.abs(), df),
        df,
    }
}

/// Two-sided Wilcoxon signed-rank test using the normal approximation.
///
/// Zero differences are dropped before ranking; tied absolute differences get
/// their average rank and the variance is corrected for ties. No continuity
/// correction is applied. With no non-zero difference left, p = 1.
pub fn wilcoxon_signed_rank(system_a: &[f64], system_b: &[f64]) -> WilcoxonResult {
    let mut diffs: Vec<f64> = system_a
        .iter()
        .zip(system_b)
        .map(|(a, b)| a - b)
        .filter(|d| *d != 0.0)
        .collect();
    let n = diffs.len();

    if n == 0 {
        return WilcoxonResult {
            w_plus: 0.0,
            w_minus: 0.0,
            z: 0.0,
            p_value: 1.0,
            n: 0,
        };
    }

    diffs.sort_by(|a, b| a.abs().total_cmp(&b.abs()));

    let mut w_plus = 0.0;
    let mut w_minus = 0.0;
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && diffs[j + 1].abs() == diffs[i].abs() {
            j += 1;
        }
        // positions i..=j share the average of ranks i+1..=j+1
        let rank = (i + j + 2) as f64 / 2.0;
        for d in &diffs[i..=j] {
            if *d > 0.0 {
                w_plus += rank;
            } else {
                w_minus += rank;
            }
        }
        let t = (j - i + 1) as f64;
        tie_term += t * t * t - t;
        i = j + 1;
    }

    let nf = n as f64;
    let expected = nf * (nf + 1.0) / 4.0;
    let variance = nf * (nf + 1.0) * (2.0 * nf + 1.0) / 24.0 - tie_term / 48.0;
    let w_min = w_plus.min(w_minus);

    let (z, p_value) = if variance > 0.0 {
        let z = (w_min - expected) / variance.sqrt();
        (z, (2.0 * normal_cdf(z)).min(1.0))
    } else {
        (0.0, 1.0)
    };

    WilcoxonResult {
        w_plus,
        w_minus,
        z,
        p_value,
        n,
    }
}

// ============================================================================
// Internal: distribution helpers
// ============================================================================

/// Two-tailed p-value of the t-distribution.
///
/// Uses the incomplete beta relationship p = I_{df/(df+t²)}(df/2, 1/2); for
/// large df the normal approximation is used.
fn t_distribution_p_value(t_abs: f64, df: usize) -> f64 {
    if df > 100 {
        return (2.0 * (1.0 - normal_cdf(t_abs))).clamp(0.0, 1.0);
    }
    let x = df as f64 / (df as f64 + t_abs * t_abs);
    incomplete_beta(df as f64 / 2.0, 0.5, x).clamp(0.0, 1.0)
}

/// Normal CDF using error function approximation.
pub(crate) fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / 2.0_f64.sqrt()))
}

/// Error function approximation (Abramowitz and Stegun 7.1.26).
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// Regularized incomplete beta I_x(a, b).
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let bt = (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln()).exp();

    if x < (a + 1.0) / (a + b + 2.0) {
        bt * beta_cf(a, b, x) / a
    } else {
        1.0 - bt * beta_cf(b, a, 1.0 - x) / b
    }
}

/// Continued fraction for the incomplete beta (modified Lentz).
fn beta_cf(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 1e-12;
    const TINY: f64 = 1e-30;

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

        // Even step
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

        // Odd step
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
        let del = d * c;
        h *= del;

        if (del - 1.0).abs() < EPS {
            break;
        }
    }

    h
}

/// Log gamma (Lanczos approximation).
fn ln_gamma(x: f64) -> f64 {
    let coeffs = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];

    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();

    let mut ser = 1.000000000190015;
    for (i, &coeff) in coeffs.iter().enumerate() {
        ser += coeff / (x + 1.0 + i as f64);
    }

    -tmp + (2.5066282746310005 * ser / x).ln()
}
