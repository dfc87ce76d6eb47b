//! Isotonic adjuster: dose-monotonicity enforcement on posterior estimates
//!
//! Dose-response is assumed monotone non-decreasing, but independent per-dose
//! Beta posteriors need not respect that. Two strategies:
//!
//! 1-D (single outcome per dose): weighted pool-adjacent-violators applied
//! independently to every Monte-Carlo draw row across doses, so each draw
//! vector is monotone by construction.
//!
//! 2-D (outcome per dose and immune group): bivariate isotonic regression on
//! the (dose x group) mean surface via alternating row/column PAVA passes.
//! The adjusted draw vectors are the raw draws shifted by each cell's
//! (adjusted - raw) mean. That shift is an approximation, not an exact joint
//! posterior, and is kept as such: the reported 2-D intervals derive from
//! pre-adjustment draws reweighted by the mean shift.

use rayon::prelude::*;

use crate::posterior::DosePosterior;

/// Variance floor for inverse-variance weights
const VAR_EPS: f64 = 1e-10;

/// Inverse posterior variance, floored so a degenerate posterior never
/// produces a non-finite weight
pub fn inv_var_weight(var: f64) -> f64 {
    1.0 / var.max(VAR_EPS)
}

// ============================================================================
// WEIGHTED PAVA
// ============================================================================

/// Weighted pool-adjacent-violators: closest non-decreasing fit to `values`
/// under `weights`. Equal-value flat regions keep the native pooling rule
/// (violating blocks collapse to their shared weighted mean).
pub fn pava(values: &[f64], weights: &[f64]) -> Vec<f64> {
    debug_assert_eq!(values.len(), weights.len());
    // (weighted mean, total weight, run length)
    let mut blocks: Vec<(f64, f64, usize)> = Vec::with_capacity(values.len());

    for (&v, &w) in values.iter().zip(weights.iter()) {
        blocks.push((v, w, 1));
        while blocks.len() > 1 {
            let last = blocks[blocks.len() - 1];
            let prev = blocks[blocks.len() - 2];
            if prev.0 <= last.0 {
                break;
            }
            let w_sum = prev.1 + last.1;
            let merged = (
                (prev.0 * prev.1 + last.0 * last.1) / w_sum,
                w_sum,
                prev.2 + last.2,
            );
            blocks.pop();
            blocks.pop();
            blocks.push(merged);
        }
    }

    let mut out = Vec::with_capacity(values.len());
    for (mean, _, len) in blocks {
        out.extend(std::iter::repeat(mean).take(len));
    }
    out
}

// ============================================================================
// ADJUSTED SUMMARY
// ============================================================================

/// Monotonicity-adjusted posterior for one dose (or dose/group cell)
#[derive(Clone, Debug)]
pub struct AdjustedPosterior {
    /// Adjusted draws; index k still pairs with draw k of every other dose
    pub draws: Vec<f64>,
    pub mean: f64,
    /// 2.5th percentile of the adjusted draws
    pub lo: f64,
    /// 97.5th percentile of the adjusted draws
    pub hi: f64,
}

impl AdjustedPosterior {
    /// Summarize a vector of (already adjusted) draws
    pub fn from_draws(draws: Vec<f64>) -> Self {
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let mut sorted = draws.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let lo = percentile(&sorted, 0.025);
        let hi = percentile(&sorted, 0.975);
        AdjustedPosterior { draws, mean, lo, hi }
    }
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx]
}

// ============================================================================
// 1-D: PER-DRAW PAVA ACROSS DOSES
// ============================================================================

/// Enforce dose-monotonicity on one outcome's posteriors by running weighted
/// PAVA on every draw row across the doses that have data. Doses without a
/// posterior stay `None` and do not constrain their neighbors.
pub fn adjust_1d(posteriors: &[Option<DosePosterior>]) -> Vec<Option<AdjustedPosterior>> {
    let with_data: Vec<usize> = posteriors
        .iter()
        .enumerate()
        .filter_map(|(j, p)| p.as_ref().map(|_| j))
        .collect();

    if with_data.is_empty() {
        return vec![None; posteriors.len()];
    }

    let weights: Vec<f64> = with_data
        .iter()
        .map(|&j| inv_var_weight(posteriors[j].as_ref().unwrap().var))
        .collect();
    let n_sims = posteriors[with_data[0]].as_ref().unwrap().draws.len();

    // Row-wise PAVA, parallel over draws; collect preserves draw order
    let rows: Vec<Vec<f64>> = (0..n_sims)
        .into_par_iter()
        .map(|k| {
            let row: Vec<f64> = with_data
                .iter()
                .map(|&j| posteriors[j].as_ref().unwrap().draws[k])
                .collect();
            pava(&row, &weights)
        })
        .collect();

    let mut out: Vec<Option<AdjustedPosterior>> = vec![None; posteriors.len()];
    for (col, &j) in with_data.iter().enumerate() {
        let draws: Vec<f64> = rows.iter().map(|row| row[col]).collect();
        out[j] = Some(AdjustedPosterior::from_draws(draws));
    }
    out
}

// ============================================================================
// 2-D: BIVARIATE ISOTONIC REGRESSION OVER (DOSE x GROUP)
// ============================================================================

const BIVISO_MAX_ITER: usize = 200;
const BIVISO_TOL: f64 = 1e-9;

/// Weighted bivariate isotonic regression: smallest perturbation of `means`
/// (rows = doses, cols = groups) that is non-decreasing down every column
/// and across every row. Alternating row/column PAVA passes to convergence.
pub fn biviso(means: &[Vec<f64>], weights: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let wrapped: Vec<Vec<Option<f64>>> = means
        .iter()
        .map(|row| row.iter().copied().map(Some).collect())
        .collect();
    biviso_partial(&wrapped, weights)
        .into_iter()
        .map(|row| row.into_iter().map(|c| c.unwrap()).collect())
        .collect()
}

/// Bivariate isotonic regression on a partially populated surface. Rows and
/// columns are constrained along their populated subsequences; missing cells
/// stay missing and do not constrain their neighbors.
fn biviso_partial(means: &[Vec<Option<f64>>], weights: &[Vec<f64>]) -> Vec<Vec<Option<f64>>> {
    let n_rows = means.len();
    if n_rows == 0 {
        return Vec::new();
    }
    let n_cols = means[0].len();
    let mut m: Vec<Vec<Option<f64>>> = means.to_vec();

    for _ in 0..BIVISO_MAX_ITER {
        let mut delta = 0.0f64;

        // Rows: monotone across groups
        for i in 0..n_rows {
            let cols: Vec<usize> = (0..n_cols).filter(|&j| m[i][j].is_some()).collect();
            if cols.len() < 2 {
                continue;
            }
            let vals: Vec<f64> = cols.iter().map(|&j| m[i][j].unwrap()).collect();
            let w: Vec<f64> = cols.iter().map(|&j| weights[i][j]).collect();
            let fitted = pava(&vals, &w);
            for (c, &j) in cols.iter().enumerate() {
                delta = delta.max((fitted[c] - vals[c]).abs());
                m[i][j] = Some(fitted[c]);
            }
        }

        // Columns: monotone across doses
        for j in 0..n_cols {
            let rows: Vec<usize> = (0..n_rows).filter(|&i| m[i][j].is_some()).collect();
            if rows.len() < 2 {
                continue;
            }
            let vals: Vec<f64> = rows.iter().map(|&i| m[i][j].unwrap()).collect();
            let w: Vec<f64> = rows.iter().map(|&i| weights[i][j]).collect();
            let fitted = pava(&vals, &w);
            for (r, &i) in rows.iter().enumerate() {
                delta = delta.max((fitted[r] - vals[r]).abs());
                m[i][j] = Some(fitted[r]);
            }
        }

        if delta < BIVISO_TOL {
            break;
        }
    }
    m
}

/// 2-D adjustment of the grouped efficacy posteriors. The regression runs on
/// every populated cell of the (dose x group) mean surface, so a dose with a
/// single populated cell is still constrained along its group column. Each
/// populated cell's draws are shifted by (adjusted - raw) mean and clamped
/// to [0, 1]; empty cells stay empty.
pub fn adjust_2d(
    groups: &[Vec<Option<DosePosterior>>; 2],
) -> [Vec<Option<AdjustedPosterior>>; 2] {
    let n_doses = groups[0].len();
    let means: Vec<Vec<Option<f64>>> = (0..n_doses)
        .map(|j| (0..2).map(|g| groups[g][j].as_ref().map(|p| p.mean)).collect())
        .collect();
    let weights: Vec<Vec<f64>> = (0..n_doses)
        .map(|j| {
            (0..2)
                .map(|g| groups[g][j].as_ref().map_or(0.0, |p| inv_var_weight(p.var)))
                .collect()
        })
        .collect();
    let fitted = biviso_partial(&means, &weights);

    let mut out = [vec![None; n_doses], vec![None; n_doses]];
    for g in 0..2 {
        for j in 0..n_doses {
            if let Some(p) = groups[g][j].as_ref() {
                let shift = fitted[j][g].unwrap() - p.mean;
                let draws: Vec<f64> = p
                    .draws
                    .iter()
                    .map(|&d| (d + shift).clamp(0.0, 1.0))
                    .collect();
                out[g][j] = Some(AdjustedPosterior::from_draws(draws));
            }
        }
    }
    out
}
