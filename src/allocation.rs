//! Adaptive randomizer: allocation probabilities and cohort assignment
//!
//! Stage 1 is a fixed special case (no data yet): the cohort is split evenly
//! across all configured doses. Later stages score each admissible dose by
//! the expected utility of its adjusted posterior means and normalize over
//! the admissible set; everything outside the set gets exactly 0.

use rand::Rng;

use crate::config::TrialConfig;
use crate::isotonic::AdjustedPosterior;

/// Uniform allocation over every configured dose (stage 1)
pub fn equal_allocation(n_doses: usize) -> Vec<f64> {
    vec![1.0 / n_doses as f64; n_doses]
}

/// Utility-scored allocation over the admissible set. Admissible doses are
/// guaranteed posteriors for all three outcomes by the admissibility pass.
/// If every score is zero the admissible doses split evenly.
pub fn adaptive_allocation(
    cfg: &TrialConfig,
    admissible: &[usize],
    tox: &[Option<AdjustedPosterior>],
    eff: &[Option<AdjustedPosterior>],
    imm: &[Option<AdjustedPosterior>],
) -> Vec<f64> {
    let mut probs = vec![0.0; cfg.n_doses()];
    if admissible.is_empty() {
        return probs;
    }

    let scores: Vec<f64> = admissible
        .iter()
        .map(|&j| {
            cfg.utility.expected(
                tox[j].as_ref().map_or(0.0, |p| p.mean),
                eff[j].as_ref().map_or(0.0, |p| p.mean),
                imm[j].as_ref().map_or(0.0, |p| p.mean),
            )
        })
        .collect();

    let total: f64 = scores.iter().sum();
    if total > 0.0 {
        for (&j, &s) in admissible.iter().zip(scores.iter()) {
            probs[j] = s / total;
        }
    } else {
        for &j in admissible {
            probs[j] = 1.0 / admissible.len() as f64;
        }
    }
    probs
}

/// Deterministic even split of the stage-1 cohort: remainder patients go to
/// the lowest doses, every dose is populated when cohort_size >= n_doses
pub fn stage_one_assignments(n_doses: usize, cohort_size: usize) -> Vec<usize> {
    (0..cohort_size).map(|p| p % n_doses).collect()
}

/// Categorical draw from an allocation vector (cumulative-sum walk)
pub fn sample_dose<R: Rng + ?Sized>(rng: &mut R, probs: &[f64]) -> usize {
    let r: f64 = rng.gen::<f64>() * probs.iter().sum::<f64>();
    let mut cumsum = 0.0;
    for (j, &p) in probs.iter().enumerate() {
        cumsum += p;
        if r < cumsum {
            return j;
        }
    }
    // Numeric slack at the top of the cumulative sum: last positive entry
    probs.iter().rposition(|&p| p > 0.0).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrialConfig;
    use crate::isotonic::AdjustedPosterior;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn constant(v: f64) -> Option<AdjustedPosterior> {
        Some(AdjustedPosterior::from_draws(vec![v; 10]))
    }

    #[test]
    fn equal_allocation_sums_to_one() {
        let probs = equal_allocation(4);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(probs.iter().all(|&p| (p - 0.25).abs() < 1e-12));
    }

    #[test]
    fn adaptive_allocation_zero_outside_admissible_set() {
        let cfg = TrialConfig::default();
        let tox = vec![constant(0.05), constant(0.10), constant(0.20)];
        let eff = vec![constant(0.20), constant(0.40), constant(0.60)];
        let imm = vec![constant(0.20), constant(0.40), constant(0.60)];
        let admissible = vec![1, 2];

        let probs = adaptive_allocation(&cfg, &admissible, &tox, &eff, &imm);
        assert_eq!(probs[0], 0.0);
        let in_set: f64 = admissible.iter().map(|&j| probs[j]).sum();
        assert!((in_set - 1.0).abs() < 1e-6);
        // Higher expected utility earns more of the cohort
        assert!(probs[2] > probs[1]);
    }

    #[test]
    fn empty_admissible_set_gets_all_zero() {
        let cfg = TrialConfig::default();
        let none: Vec<Option<AdjustedPosterior>> = vec![None, None, None];
        let probs = adaptive_allocation(&cfg, &[], &none, &none, &none);
        assert!(probs.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn stage_one_split_is_exact_for_divisible_cohort() {
        let a = stage_one_assignments(3, 15);
        assert_eq!(a.len(), 15);
        for dose in 0..3 {
            assert_eq!(a.iter().filter(|&&d| d == dose).count(), 5);
        }
    }

    #[test]
    fn stage_one_split_gives_remainder_to_lowest_doses() {
        let a = stage_one_assignments(3, 8);
        let counts: Vec<usize> = (0..3)
            .map(|d| a.iter().filter(|&&x| x == d).count())
            .collect();
        assert_eq!(counts, vec![3, 3, 2]);
    }

    #[test]
    fn sample_dose_never_picks_zero_probability() {
        let probs = vec![0.0, 0.7, 0.0, 0.3];
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..500 {
            let d = sample_dose(&mut rng, &probs);
            assert!(d == 1 || d == 3);
        }
    }

    #[test]
    fn sample_dose_is_deterministic_under_seed() {
        let probs = vec![0.2, 0.3, 0.5];
        let mut a = StdRng::seed_from_u64(9);
        let mut b = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            assert_eq!(sample_dose(&mut a, &probs), sample_dose(&mut b, &probs));
        }
    }
}
