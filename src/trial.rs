//! Stage controller: the stage-sequential trial state machine
//!
//! INIT -> STAGE_i -> {CONTINUE | TERMINATED_EARLY} -> FINAL_SELECTION.
//! Every stage recomputes tallies, posteriors, adjustments and the
//! admissible set from scratch out of the cumulative patient list: a pure
//! pipeline over immutable state, never an incremental mutation.

use std::error::Error;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::admissible::admissible_set;
use crate::allocation::{
    adaptive_allocation, equal_allocation, sample_dose, stage_one_assignments,
};
use crate::config::{ConfigError, EfficacyModel, ProbabilityModel, TrialConfig};
use crate::isotonic::{adjust_1d, adjust_2d, AdjustedPosterior};
use crate::outcomes::{generate_outcome, tally_by_dose, tally_eff_by_group, PatientRecord};
use crate::posterior::fit_all;
use crate::selector::{self, FinalDecision};

// ============================================================================
// PER-STAGE SNAPSHOT
// ============================================================================

/// Everything the design knew at the end of one stage
#[derive(Clone, Debug)]
pub struct StageSummary {
    pub stage: usize,
    /// Allocation vector the stage enrolled under (equal at stage 1, else
    /// derived from the previous stage's admissible set)
    pub allocation: Vec<f64>,
    pub tox: Vec<Option<AdjustedPosterior>>,
    pub imm: Vec<Option<AdjustedPosterior>>,
    /// Marginal efficacy per dose: the pooled 1-D adjustment, or the
    /// immune-rate-weighted mixture of the group cells under ByImmuneGroup
    pub eff: Vec<Option<AdjustedPosterior>>,
    /// Group-level efficacy surface (non-responders, responders);
    /// populated only under ByImmuneGroup
    pub eff_groups: Option<[Vec<Option<AdjustedPosterior>>; 2]>,
    pub admissible: Vec<usize>,
}

/// Recompute the full posterior pipeline from the cumulative patient list
fn summarize_stage<R: Rng + ?Sized>(
    cfg: &TrialConfig,
    patients: &[PatientRecord],
    stage: usize,
    allocation: Vec<f64>,
    rng: &mut R,
) -> StageSummary {
    let n_doses = cfg.n_doses();
    let prior = (cfg.prior_alpha, cfg.prior_beta);

    let imm_stats = tally_by_dose(patients, n_doses, |p| p.y_imm);
    let tox_stats = tally_by_dose(patients, n_doses, |p| p.y_tox);

    let imm = adjust_1d(&fit_all(&imm_stats, prior, cfg.n_sims, rng));
    let tox = adjust_1d(&fit_all(&tox_stats, prior, cfg.n_sims, rng));

    let (eff, eff_groups) = match cfg.efficacy_model {
        EfficacyModel::Pooled => {
            let eff_stats = tally_by_dose(patients, n_doses, |p| p.y_eff);
            let eff = adjust_1d(&fit_all(&eff_stats, prior, cfg.n_sims, rng));
            (eff, None)
        }
        EfficacyModel::ByImmuneGroup => {
            let [g0_stats, g1_stats] = tally_eff_by_group(patients, n_doses);
            let g0 = fit_all(&g0_stats, prior, cfg.n_sims, rng);
            let g1 = fit_all(&g1_stats, prior, cfg.n_sims, rng);
            let groups = adjust_2d(&[g0, g1]);
            let eff = (0..n_doses)
                .map(|j| marginal_eff(&groups, &imm, j))
                .collect();
            (eff, Some(groups))
        }
    };

    let admissible = admissible_set(cfg, &tox, &eff, &imm);

    StageSummary {
        stage,
        allocation,
        tox,
        imm,
        eff,
        eff_groups,
        admissible,
    }
}

/// Per-dose marginal efficacy draws: group draws mixed at the same draw
/// index, weighted by the dose's adjusted immune-response mean. A dose with
/// a single populated cell uses that cell alone.
fn marginal_eff(
    groups: &[Vec<Option<AdjustedPosterior>>; 2],
    imm: &[Option<AdjustedPosterior>],
    j: usize,
) -> Option<AdjustedPosterior> {
    match (&groups[0][j], &groups[1][j]) {
        (Some(g0), Some(g1)) => {
            let w = imm[j].as_ref().map_or(0.5, |p| p.mean);
            let draws: Vec<f64> = g0
                .draws
                .iter()
                .zip(g1.draws.iter())
                .map(|(&a, &b)| (1.0 - w) * a + w * b)
                .collect();
            Some(AdjustedPosterior::from_draws(draws))
        }
        (Some(g0), None) => Some(g0.clone()),
        (None, Some(g1)) => Some(g1.clone()),
        (None, None) => None,
    }
}

// ============================================================================
// TRIAL RESULT
// ============================================================================

/// Entry-contract result: the decision plus the full run history
#[derive(Clone, Debug)]
pub struct TrialResult {
    pub patients: Vec<PatientRecord>,
    pub stages: Vec<StageSummary>,
    pub terminated_early: bool,
    pub termination_stage: Option<usize>,
    pub termination_reason: Option<String>,
    pub decision: FinalDecision,
}

impl TrialResult {
    pub fn total_enrolled(&self) -> usize {
        self.patients.len()
    }
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Run one trial: `(config, scenario, seed) -> result`. Validates the design
/// and the scenario dimensions before stage 1; after that the only terminal
/// states are early termination and final selection.
pub fn run_trial(
    cfg: &TrialConfig,
    model: &ProbabilityModel,
    seed: u64,
) -> Result<TrialResult, ConfigError> {
    cfg.validate()?;
    if model.doses.len() != cfg.n_doses() {
        return Err(ConfigError::DimensionMismatch {
            expected: cfg.n_doses(),
            got: model.doses.len(),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut patients: Vec<PatientRecord> =
        Vec::with_capacity(cfg.n_stages * cfg.cohort_size);
    let mut stages: Vec<StageSummary> = Vec::with_capacity(cfg.n_stages);
    let mut terminated_early = false;
    let mut termination_stage = None;
    let mut termination_reason = None;

    for stage in 1..=cfg.n_stages {
        // (a) allocation: equal at stage 1, adaptive from the previous
        // stage's admissible set afterwards. With early stopping disabled an
        // empty previous set falls back to equal allocation.
        let allocation = if stage == 1 {
            equal_allocation(cfg.n_doses())
        } else {
            let prev = stages.last().unwrap();
            if prev.admissible.is_empty() {
                equal_allocation(cfg.n_doses())
            } else {
                adaptive_allocation(cfg, &prev.admissible, &prev.tox, &prev.eff, &prev.imm)
            }
        };

        // (b) enroll the cohort
        let assignments: Vec<usize> = if stage == 1 {
            stage_one_assignments(cfg.n_doses(), cfg.cohort_size)
        } else {
            (0..cfg.cohort_size)
                .map(|_| sample_dose(&mut rng, &allocation))
                .collect()
        };

        // (c) outcomes, appended to the cumulative record
        for dose in assignments {
            let (y_imm, y_tox, y_eff) = generate_outcome(&mut rng, dose, model);
            patients.push(PatientRecord {
                id: patients.len() + 1,
                stage,
                dose,
                y_imm,
                y_tox,
                y_eff,
            });
        }

        // (d)+(e) posterior pipeline and admissibility
        let summary = summarize_stage(cfg, &patients, stage, allocation, &mut rng);
        let set_empty = summary.admissible.is_empty();
        stages.push(summary);

        // An empty set at the final stage flows to final selection instead,
        // which reports "no decision"; early termination is for cut-short runs
        if set_empty && cfg.early_stop && stage < cfg.n_stages {
            terminated_early = true;
            termination_stage = Some(stage);
            termination_reason = Some(format!("no admissible dose after stage {}", stage));
            break;
        }
    }

    let decision = if terminated_early {
        FinalDecision::terminated(
            termination_reason
                .clone()
                .unwrap_or_else(|| "terminated early".to_string()),
        )
    } else {
        selector::select(cfg, stages.last().unwrap())
    };

    Ok(TrialResult {
        patients,
        stages,
        terminated_early,
        termination_stage,
        termination_reason,
        decision,
    })
}

// ============================================================================
// CSV EXPORT
// ============================================================================

/// Write the enrolled dataset: id,stage,dose,y_imm,y_tox,y_eff
pub fn export_patients_csv(result: &TrialResult, path: &str) -> Result<(), Box<dyn Error>> {
    let mut w = csv::Writer::from_path(path)?;
    for p in &result.patients {
        w.serialize(p)?;
    }
    w.flush()?;
    Ok(())
}

/// Write the per-stage allocation table: stage,dose_level,prob
pub fn export_allocations_csv(
    result: &TrialResult,
    cfg: &TrialConfig,
    path: &str,
) -> Result<(), Box<dyn Error>> {
    let mut w = csv::Writer::from_path(path)?;
    w.write_record(["stage", "dose_level", "prob"])?;
    for s in &result.stages {
        for (j, &p) in s.allocation.iter().enumerate() {
            w.write_record([
                s.stage.to_string(),
                cfg.dose_levels[j].to_string(),
                format!("{:.6}", p),
            ])?;
        }
    }
    w.flush()?;
    Ok(())
}
