//! Final selector: proof-of-concept screen + expected-utility dose choice
//!
//! Entered only when the trial runs its full course. The PoC comparison is
//! made on the immune-response draws, not efficacy: the design treats immune
//! activation as the mechanism being proven, so a candidate is measured by
//! whether its immune posterior sits meaningfully below the best dose's.

use rayon::prelude::*;

use crate::config::TrialConfig;
use crate::isotonic::AdjustedPosterior;
use crate::trial::StageSummary;

/// Terminal outcome of one trial run
#[derive(Clone, Debug)]
pub struct FinalDecision {
    /// Selected dose index, `None` when no decision could be made
    pub dose: Option<usize>,
    /// Draw-averaged expected utility of the selected dose
    pub expected_utility: Option<f64>,
    pub poc_validated: bool,
    /// Highest PoC probability among non-best admissible doses
    pub poc_prob: Option<f64>,
    /// (dose index, P(imm_i < delta_poc * imm_best)) per non-best candidate
    pub poc_table: Vec<(usize, f64)>,
    /// Some non-best dose was confirmed meaningfully below the best: the
    /// dose-response concept was demonstrated
    pub poc_detected: bool,
    pub rationale: String,
}

impl FinalDecision {
    /// Outcome for an early-terminated run: no selection, PoC never reached
    pub fn terminated(reason: String) -> Self {
        FinalDecision {
            dose: None,
            expected_utility: None,
            poc_validated: false,
            poc_prob: None,
            poc_table: Vec::new(),
            poc_detected: false,
            rationale: reason,
        }
    }
}

/// Expected utility from posterior means (ranks j*)
fn mean_utility(cfg: &TrialConfig, s: &StageSummary, j: usize) -> f64 {
    cfg.utility.expected(
        s.tox[j].as_ref().map_or(0.0, |p| p.mean),
        s.eff[j].as_ref().map_or(0.0, |p| p.mean),
        s.imm[j].as_ref().map_or(0.0, |p| p.mean),
    )
}

/// Expected utility averaged over paired posterior draws (ranks the final
/// candidates). The per-draw terms are computed in parallel but collected in
/// draw order and summed sequentially, so the result is the same whatever
/// the thread count.
fn draw_utility(cfg: &TrialConfig, s: &StageSummary, j: usize) -> f64 {
    let (tox, eff, imm) = match (&s.tox[j], &s.eff[j], &s.imm[j]) {
        (Some(t), Some(e), Some(i)) => (t, e, i),
        _ => return 0.0,
    };
    let n = imm.draws.len();
    let per_draw: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|k| cfg.utility.expected(tox.draws[k], eff.draws[k], imm.draws[k]))
        .collect();
    per_draw.iter().sum::<f64>() / n as f64
}

/// PoC probability of dose `i` against the best dose: paired immune draws
fn poc_probability(imm_i: &AdjustedPosterior, imm_best: &AdjustedPosterior, delta: f64) -> f64 {
    let hits = imm_i
        .draws
        .iter()
        .zip(imm_best.draws.iter())
        .filter(|&(&a, &b)| a < delta * b)
        .count();
    hits as f64 / imm_i.draws.len() as f64
}

/// Terminal decision from the final-stage summary
pub fn select(cfg: &TrialConfig, last: &StageSummary) -> FinalDecision {
    if last.admissible.is_empty() {
        return FinalDecision {
            dose: None,
            expected_utility: None,
            poc_validated: false,
            poc_prob: None,
            poc_table: Vec::new(),
            poc_detected: false,
            rationale: "no admissible dose at the final stage".to_string(),
        };
    }

    // Highest-utility admissible dose on posterior means
    let j_star = *last
        .admissible
        .iter()
        .max_by(|&&a, &&b| {
            mean_utility(cfg, last, a)
                .partial_cmp(&mean_utility(cfg, last, b))
                .unwrap()
        })
        .unwrap();
    let imm_best = last.imm[j_star].as_ref().unwrap();

    let poc_table: Vec<(usize, f64)> = last
        .admissible
        .iter()
        .filter(|&&i| i != j_star)
        .map(|&i| {
            let p = poc_probability(last.imm[i].as_ref().unwrap(), imm_best, cfg.delta_poc);
            (i, p)
        })
        .collect();

    let poc_prob = poc_table
        .iter()
        .map(|&(_, p)| p)
        .fold(None, |acc: Option<f64>, p| {
            Some(acc.map_or(p, |a| a.max(p)))
        });
    let poc_detected = poc_table.iter().any(|&(_, p)| p >= cfg.c_poc);

    // j* is trivially retained; other candidates need PoC credibility
    let mut p_final: Vec<usize> = vec![j_star];
    p_final.extend(poc_table.iter().filter(|&&(_, p)| p >= cfg.c_poc).map(|&(i, _)| i));
    p_final.sort_unstable();

    let best = *p_final
        .iter()
        .max_by(|&&a, &&b| {
            draw_utility(cfg, last, a)
                .partial_cmp(&draw_utility(cfg, last, b))
                .unwrap()
        })
        .unwrap();
    let eu = draw_utility(cfg, last, best);

    FinalDecision {
        dose: Some(best),
        expected_utility: Some(eu),
        poc_validated: true,
        poc_prob,
        poc_table,
        poc_detected,
        rationale: format!(
            "dose index {} selected by expected utility ({:.2}) from {} PoC-retained candidate(s); best-scoring dose was index {}",
            best,
            eu,
            p_final.len(),
            j_star
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrialConfig;
    use crate::isotonic::AdjustedPosterior;
    use crate::trial::StageSummary;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn constant(v: f64) -> Option<AdjustedPosterior> {
        Some(AdjustedPosterior::from_draws(vec![v; 200]))
    }

    fn summary_of(
        tox: Vec<Option<AdjustedPosterior>>,
        eff: Vec<Option<AdjustedPosterior>>,
        imm: Vec<Option<AdjustedPosterior>>,
        admissible: Vec<usize>,
    ) -> StageSummary {
        let n = tox.len();
        StageSummary {
            stage: 5,
            allocation: vec![1.0 / n as f64; n],
            tox,
            eff,
            imm,
            eff_groups: None,
            admissible,
        }
    }

    #[test]
    fn empty_admissible_set_means_no_decision() {
        let cfg = TrialConfig::default();
        let s = summary_of(
            vec![constant(0.5); 3],
            vec![constant(0.1); 3],
            vec![constant(0.1); 3],
            vec![],
        );
        let d = select(&cfg, &s);
        assert!(d.dose.is_none());
        assert!(!d.poc_validated);
        assert!(!d.poc_detected);
    }

    #[test]
    fn flat_immune_response_triggers_no_poc_detection() {
        let cfg = TrialConfig::default();
        // Identical posteriors everywhere: no draw ever falls below
        // delta_poc * best, so non-best doses are never retained
        let s = summary_of(
            vec![constant(0.10); 3],
            vec![constant(0.40); 3],
            vec![constant(0.30); 3],
            vec![0, 1, 2],
        );
        let d = select(&cfg, &s);
        assert!(d.poc_validated);
        assert!(!d.poc_detected);
        assert_eq!(d.poc_table.len(), 2);
        for &(_, p) in &d.poc_table {
            assert_eq!(p, 0.0);
        }
        assert!(d.dose.is_some());
    }

    #[test]
    fn clear_separation_detects_poc_and_retains_inferior_dose() {
        let cfg = TrialConfig::default();
        let s = summary_of(
            vec![constant(0.05), constant(0.08), constant(0.10)],
            vec![constant(0.20), constant(0.35), constant(0.55)],
            vec![constant(0.10), constant(0.30), constant(0.60)],
            vec![0, 1, 2],
        );
        let d = select(&cfg, &s);
        // 0.10 < 0.8 * 0.60 on every paired draw
        assert!(d.poc_detected);
        assert!(d.poc_validated);
        assert!((d.poc_prob.unwrap() - 1.0).abs() < 1e-12);
        // Highest utility dose wins the final choice
        assert_eq!(d.dose, Some(2));
        assert!(d.expected_utility.unwrap() > 0.0);
    }

    #[test]
    fn best_dose_is_always_retained() {
        let cfg = TrialConfig::default();
        let s = summary_of(
            vec![constant(0.05), constant(0.06)],
            vec![constant(0.50), constant(0.52)],
            vec![constant(0.40), constant(0.42)],
            vec![0, 1],
        );
        let d = select(&cfg, &s);
        // Near-flat: nothing detected, but j* alone keeps P_final non-empty
        assert!(!d.poc_detected);
        assert!(d.poc_validated);
        assert_eq!(d.dose, Some(1));
    }

    #[test]
    fn expected_utility_is_bit_identical_across_thread_counts() {
        let cfg = TrialConfig::default();
        // Noisy seeded draws: a scheduling-dependent float reduction would
        // show up as differing low-order bits between pool sizes
        let mut rng = StdRng::seed_from_u64(7);
        let mut noisy = |lo: f64, hi: f64| {
            let draws = (0..20_000).map(|_| lo + (hi - lo) * rng.gen::<f64>()).collect();
            Some(AdjustedPosterior::from_draws(draws))
        };
        let s = summary_of(
            vec![noisy(0.0, 0.2), noisy(0.0, 0.2)],
            vec![noisy(0.2, 0.6), noisy(0.3, 0.7)],
            vec![noisy(0.1, 0.5), noisy(0.2, 0.6)],
            vec![0, 1],
        );
        let bits: Vec<(Option<usize>, u64)> = (1..=4)
            .map(|t| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(t)
                    .build()
                    .unwrap()
                    .install(|| {
                        let d = select(&cfg, &s);
                        (d.dose, d.expected_utility.unwrap().to_bits())
                    })
            })
            .collect();
        for pair in bits.windows(2) {
            assert_eq!(pair[0], pair[1], "thread-count dependent result: {:?}", bits);
        }
    }

    #[test]
    fn terminated_constructor_reports_no_poc() {
        let d = FinalDecision::terminated("no admissible dose after stage 2".into());
        assert!(d.dose.is_none());
        assert!(!d.poc_validated);
        assert!(!d.poc_detected);
        assert!(d.rationale.contains("stage 2"));
    }
}
