//! Calibration sweeps: operating characteristics over replicated trials
//!
//! Each replication owns an independent RNG stream (base seed + replicate
//! index) and an independent trial state, so batches are reproducible and
//! non-interfering.

use crate::config::{ConfigError, ProbabilityModel, TrialConfig};
use crate::trial::run_trial;

/// Aggregated outcomes of one scenario replicated `n_reps` times
#[derive(Clone, Debug)]
pub struct CalibrationSummary {
    pub n_reps: usize,
    pub completed: usize,
    pub terminated_early: usize,
    /// Completed runs that reported a PoC-validated selection
    pub poc_validated: usize,
    /// Completed runs where some non-best dose was confirmed inferior
    /// (the dose-response detection rate)
    pub poc_detected: usize,
    pub mean_enrolled: f64,
    /// Selections per dose index; runs without a decision count separately
    pub selection_counts: Vec<usize>,
    pub no_selection: usize,
    /// Early terminations per stage (index 0 = stage 1)
    pub termination_by_stage: Vec<usize>,
}

impl CalibrationSummary {
    pub fn completion_rate(&self) -> f64 {
        self.completed as f64 / self.n_reps as f64
    }

    pub fn detection_rate(&self) -> f64 {
        self.poc_detected as f64 / self.n_reps as f64
    }

    /// Aligned text table in the style of the run reports
    pub fn render(&self, cfg: &TrialConfig) -> String {
        let mut s = String::new();
        s.push_str(&format!(
            "Replications: {}   completed {} ({:.1}%)   terminated early {} ({:.1}%)\n",
            self.n_reps,
            self.completed,
            100.0 * self.completion_rate(),
            self.terminated_early,
            100.0 * self.terminated_early as f64 / self.n_reps as f64,
        ));
        s.push_str(&format!(
            "PoC validated: {} ({:.1}%)   PoC detected: {} ({:.1}%)\n",
            self.poc_validated,
            100.0 * self.poc_validated as f64 / self.n_reps as f64,
            self.poc_detected,
            100.0 * self.detection_rate(),
        ));
        s.push_str(&format!("Mean enrolled N: {:.1}\n\n", self.mean_enrolled));

        s.push_str("Dose  | Level | Selected\n");
        s.push_str("------|-------|---------\n");
        for (j, &count) in self.selection_counts.iter().enumerate() {
            s.push_str(&format!(
                "{:>5} | {:>5.2} | {:>5} ({:.1}%)\n",
                j + 1,
                cfg.dose_levels[j],
                count,
                100.0 * count as f64 / self.n_reps as f64,
            ));
        }
        s.push_str(&format!(
            " none |   -   | {:>5} ({:.1}%)\n",
            self.no_selection,
            100.0 * self.no_selection as f64 / self.n_reps as f64,
        ));

        if self.terminated_early > 0 {
            s.push_str("\nStage | Early stops\n");
            s.push_str("------|------------\n");
            for (i, &count) in self.termination_by_stage.iter().enumerate() {
                if count > 0 {
                    s.push_str(&format!("{:>5} | {}\n", i + 1, count));
                }
            }
        }
        s
    }
}

/// Replicate one (config, scenario) pair across seeds and aggregate
pub fn calibrate(
    cfg: &TrialConfig,
    model: &ProbabilityModel,
    base_seed: u64,
    n_reps: usize,
) -> Result<CalibrationSummary, ConfigError> {
    let mut summary = CalibrationSummary {
        n_reps,
        completed: 0,
        terminated_early: 0,
        poc_validated: 0,
        poc_detected: 0,
        mean_enrolled: 0.0,
        selection_counts: vec![0; cfg.n_doses()],
        no_selection: 0,
        termination_by_stage: vec![0; cfg.n_stages],
    };

    let mut total_n = 0usize;
    for rep in 0..n_reps {
        let r = run_trial(cfg, model, base_seed + rep as u64)?;
        total_n += r.total_enrolled();

        if r.terminated_early {
            summary.terminated_early += 1;
            if let Some(stage) = r.termination_stage {
                summary.termination_by_stage[stage - 1] += 1;
            }
        } else {
            summary.completed += 1;
            if r.decision.poc_validated {
                summary.poc_validated += 1;
            }
            if r.decision.poc_detected {
                summary.poc_detected += 1;
            }
        }

        match r.decision.dose {
            Some(j) => summary.selection_counts[j] += 1,
            None => summary.no_selection += 1,
        }
    }
    summary.mean_enrolled = total_n as f64 / n_reps as f64;
    Ok(summary)
}
