//! Admissibility evaluator: posterior-credibility screening per dose
//!
//! Three one-sided tests against the clinical targets, each computed as the
//! empirical fraction of adjusted posterior draws satisfying the inequality.
//! A dose with no posterior for any monitored outcome carries no information
//! this stage and cannot be admissible. An empty set is a valid verdict, not
//! an error.

use crate::config::TrialConfig;
use crate::isotonic::AdjustedPosterior;

/// Empirical posterior probability: fraction of draws satisfying `pred`
pub fn credible_prob<F: Fn(f64) -> bool>(draws: &[f64], pred: F) -> f64 {
    if draws.is_empty() {
        return 0.0;
    }
    draws.iter().filter(|&&d| pred(d)).count() as f64 / draws.len() as f64
}

/// Per-dose verdicts for one stage, ordered by dose index.
/// Tests: P(tox < phi_t) >= c_t, P(eff > phi_e) >= c_e, P(imm > phi_i) >= c_i.
pub fn admissible_set(
    cfg: &TrialConfig,
    tox: &[Option<AdjustedPosterior>],
    eff: &[Option<AdjustedPosterior>],
    imm: &[Option<AdjustedPosterior>],
) -> Vec<usize> {
    (0..cfg.n_doses())
        .filter(|&j| {
            let (t, e, i) = match (&tox[j], &eff[j], &imm[j]) {
                (Some(t), Some(e), Some(i)) => (t, e, i),
                _ => return false,
            };
            credible_prob(&t.draws, |d| d < cfg.phi_t) >= cfg.c_t
                && credible_prob(&e.draws, |d| d > cfg.phi_e) >= cfg.c_e
                && credible_prob(&i.draws, |d| d > cfg.phi_i) >= cfg.c_i
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrialConfig;
    use crate::isotonic::AdjustedPosterior;

    fn summary(draws: Vec<f64>) -> Option<AdjustedPosterior> {
        Some(AdjustedPosterior::from_draws(draws))
    }

    fn constant(v: f64) -> Option<AdjustedPosterior> {
        summary(vec![v; 100])
    }

    fn cfg(n_doses: usize) -> TrialConfig {
        TrialConfig {
            dose_levels: (1..=n_doses).map(|k| k as f64 * 0.1).collect(),
            phi_t: 0.30,
            phi_e: 0.25,
            phi_i: 0.20,
            c_t: 0.80,
            c_e: 0.50,
            c_i: 0.50,
            ..TrialConfig::default()
        }
    }

    #[test]
    fn credible_prob_is_draw_fraction() {
        let draws = vec![0.1, 0.2, 0.3, 0.4];
        assert!((credible_prob(&draws, |d| d < 0.25) - 0.5).abs() < 1e-12);
        assert_eq!(credible_prob(&[], |_| true), 0.0);
    }

    #[test]
    fn dose_passing_all_tests_is_admissible() {
        let cfg = cfg(1);
        let tox = vec![constant(0.10)];
        let eff = vec![constant(0.50)];
        let imm = vec![constant(0.40)];
        assert_eq!(admissible_set(&cfg, &tox, &eff, &imm), vec![0]);
    }

    #[test]
    fn toxic_dose_is_excluded() {
        let cfg = cfg(2);
        let tox = vec![constant(0.10), constant(0.60)];
        let eff = vec![constant(0.50), constant(0.70)];
        let imm = vec![constant(0.40), constant(0.60)];
        assert_eq!(admissible_set(&cfg, &tox, &eff, &imm), vec![0]);
    }

    #[test]
    fn futile_dose_is_excluded() {
        let cfg = cfg(1);
        let tox = vec![constant(0.10)];
        let eff = vec![constant(0.05)]; // below phi_e with certainty
        let imm = vec![constant(0.40)];
        assert!(admissible_set(&cfg, &tox, &eff, &imm).is_empty());
    }

    #[test]
    fn dose_without_data_is_excluded() {
        let cfg = cfg(2);
        let tox = vec![constant(0.10), None];
        let eff = vec![constant(0.50), constant(0.70)];
        let imm = vec![constant(0.40), constant(0.60)];
        assert_eq!(admissible_set(&cfg, &tox, &eff, &imm), vec![0]);
    }

    #[test]
    fn borderline_fraction_respects_threshold_exactly() {
        let cfg = cfg(1);
        // Exactly 80 of 100 toxicity draws below the target: passes c_t = 0.80
        let mut draws = vec![0.10; 80];
        draws.extend(vec![0.50; 20]);
        let tox = vec![summary(draws.clone())];
        let eff = vec![constant(0.50)];
        let imm = vec![constant(0.40)];
        assert_eq!(admissible_set(&cfg, &tox, &eff, &imm), vec![0]);

        // 79 of 100: fails
        draws[79] = 0.50;
        let tox = vec![summary(draws)];
        assert!(admissible_set(&cfg, &tox, &eff, &imm).is_empty());
    }
}
