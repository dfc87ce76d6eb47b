//! Trial design configuration and outcome-probability scenarios
//! Everything here is immutable once a trial run starts.

use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Fail-fast validation errors raised before any stage executes
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("dose level sequence is empty")]
    EmptyDoseLevels,

    #[error("dose levels must be strictly increasing")]
    UnorderedDoseLevels,

    #[error("{what} must be positive")]
    NonPositive { what: &'static str },

    #[error("{name} = {value} is outside {lo}..{hi}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        lo: f64,
        hi: f64,
    },

    #[error("probability model has {got} dose rows, config has {expected} dose levels")]
    DimensionMismatch { expected: usize, got: usize },
}

fn check_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) || !value.is_finite() {
        return Err(ConfigError::OutOfRange {
            name,
            value,
            lo: 0.0,
            hi: 1.0,
        });
    }
    Ok(())
}

// ============================================================================
// UTILITY TABLE
// ============================================================================

/// Clinical desirability of each (toxicity, efficacy, immune) outcome triple.
/// Indexed u[y_tox][y_eff][y_imm], each in {0,1}.
#[derive(Clone, Debug)]
pub struct UtilityTable {
    pub u: [[[f64; 2]; 2]; 2],
}

impl UtilityTable {
    /// Expected utility under independent marginal outcome probabilities
    pub fn expected(&self, p_tox: f64, p_eff: f64, p_imm: f64) -> f64 {
        let mut eu = 0.0;
        for t in 0..2 {
            let pt = if t == 1 { p_tox } else { 1.0 - p_tox };
            for e in 0..2 {
                let pe = if e == 1 { p_eff } else { 1.0 - p_eff };
                for i in 0..2 {
                    let pi = if i == 1 { p_imm } else { 1.0 - p_imm };
                    eu += pt * pe * pi * self.u[t][e][i];
                }
            }
        }
        eu
    }
}

impl Default for UtilityTable {
    /// Efficacy-weighted, toxicity-penalized scoring on a 0-100 scale:
    /// (no tox, eff, imm) = 100, (tox, no eff, no imm) = 0.
    fn default() -> Self {
        let mut u = [[[0.0; 2]; 2]; 2];
        for t in 0..2 {
            for e in 0..2 {
                for i in 0..2 {
                    u[t][e][i] =
                        60.0 * e as f64 + 20.0 * i as f64 + 20.0 * (1 - t) as f64;
                }
            }
        }
        UtilityTable { u }
    }
}

// ============================================================================
// MONOTONICITY STRATEGY
// ============================================================================

/// How the efficacy posterior is modeled and monotonicity-adjusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EfficacyModel {
    /// One efficacy rate per dose; per-draw 1-D PAVA across doses
    Pooled,
    /// Efficacy per (dose, immune group); bivariate isotonic regression on
    /// the mean surface, monotone in dose and in group
    ByImmuneGroup,
}

// ============================================================================
// TRIAL CONFIGURATION
// ============================================================================

/// Full design of one adaptive trial. Validated once, then read-only.
#[derive(Clone, Debug)]
pub struct TrialConfig {
    /// Ordered dose levels (labels only; the engine works on indices)
    pub dose_levels: Vec<f64>,
    pub n_stages: usize,
    pub cohort_size: usize,

    /// Clinical targets: toxicity bounded above, efficacy/immune bounded below
    pub phi_t: f64,
    pub phi_e: f64,
    pub phi_i: f64,

    /// Posterior credibility cutoffs for the three admissibility tests
    pub c_t: f64,
    pub c_e: f64,
    pub c_i: f64,

    /// Proof-of-concept credibility threshold and margin factor
    pub c_poc: f64,
    pub delta_poc: f64,

    pub utility: UtilityTable,

    /// Monte-Carlo posterior draws per dose/group
    pub n_sims: usize,

    /// Beta prior (alpha, beta) shared by all outcomes
    pub prior_alpha: f64,
    pub prior_beta: f64,

    pub early_stop: bool,
    pub efficacy_model: EfficacyModel,
}

impl TrialConfig {
    pub fn n_doses(&self) -> usize {
        self.dose_levels.len()
    }

    /// Fail fast on a malformed design, before any stage executes
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dose_levels.is_empty() {
            return Err(ConfigError::EmptyDoseLevels);
        }
        if self.dose_levels.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ConfigError::UnorderedDoseLevels);
        }
        if self.n_stages == 0 {
            return Err(ConfigError::NonPositive { what: "n_stages" });
        }
        if self.cohort_size == 0 {
            return Err(ConfigError::NonPositive { what: "cohort_size" });
        }
        if self.n_sims == 0 {
            return Err(ConfigError::NonPositive { what: "n_sims" });
        }
        if self.prior_alpha <= 0.0 {
            return Err(ConfigError::NonPositive { what: "prior_alpha" });
        }
        if self.prior_beta <= 0.0 {
            return Err(ConfigError::NonPositive { what: "prior_beta" });
        }
        check_unit("phi_t", self.phi_t)?;
        check_unit("phi_e", self.phi_e)?;
        check_unit("phi_i", self.phi_i)?;
        check_unit("c_t", self.c_t)?;
        check_unit("c_e", self.c_e)?;
        check_unit("c_i", self.c_i)?;
        check_unit("c_poc", self.c_poc)?;
        check_unit("delta_poc", self.delta_poc)?;
        Ok(())
    }
}

impl Default for TrialConfig {
    /// Reference design: 3 doses, 5 stages of 15 patients
    fn default() -> Self {
        TrialConfig {
            dose_levels: vec![0.1, 0.3, 0.5],
            n_stages: 5,
            cohort_size: 15,
            phi_t: 0.30,
            phi_e: 0.25,
            phi_i: 0.20,
            c_t: 0.85,
            c_e: 0.10,
            c_i: 0.10,
            c_poc: 0.80,
            delta_poc: 0.80,
            utility: UtilityTable::default(),
            n_sims: 2000,
            prior_alpha: 1.0,
            prior_beta: 1.0,
            early_stop: true,
            efficacy_model: EfficacyModel::ByImmuneGroup,
        }
    }
}

// ============================================================================
// OUTCOME PROBABILITY MODEL (scenario)
// ============================================================================

/// True outcome probabilities at one dose.
/// `p_eff` is conditional on immune status: [non-responder, responder].
#[derive(Clone, Copy, Debug)]
pub struct DoseOutcomeProbs {
    pub p_imm: f64,
    pub p_tox: f64,
    pub p_eff: [f64; 2],
}

/// Scenario: one row of true probabilities per configured dose.
/// Always passed explicitly; there is no ambient shared default.
#[derive(Clone, Debug)]
pub struct ProbabilityModel {
    pub doses: Vec<DoseOutcomeProbs>,
}

impl ProbabilityModel {
    pub fn new(doses: Vec<DoseOutcomeProbs>, n_doses: usize) -> Result<Self, ConfigError> {
        if doses.len() != n_doses {
            return Err(ConfigError::DimensionMismatch {
                expected: n_doses,
                got: doses.len(),
            });
        }
        for d in &doses {
            check_unit("p_imm", d.p_imm)?;
            check_unit("p_tox", d.p_tox)?;
            check_unit("p_eff[0]", d.p_eff[0])?;
            check_unit("p_eff[1]", d.p_eff[1])?;
        }
        Ok(ProbabilityModel { doses })
    }

    /// Null scenario: identical dose-response at every dose
    pub fn flat(n_doses: usize, p_imm: f64, p_tox: f64, p_eff: [f64; 2]) -> Self {
        ProbabilityModel {
            doses: vec![
                DoseOutcomeProbs {
                    p_imm,
                    p_tox,
                    p_eff,
                };
                n_doses
            ],
        }
    }

    /// Unfavorable scenario: toxicity climbing well past the usual target,
    /// with weak immune response and efficacy everywhere
    pub fn unfavorable(n_doses: usize) -> Self {
        let doses = (0..n_doses)
            .map(|j| {
                let frac = if n_doses > 1 {
                    j as f64 / (n_doses - 1) as f64
                } else {
                    0.0
                };
                DoseOutcomeProbs {
                    p_imm: 0.05,
                    p_tox: 0.30 + 0.30 * frac,
                    p_eff: [0.05, 0.10],
                }
            })
            .collect();
        ProbabilityModel { doses }
    }

    /// Graded scenario: immune response, toxicity and efficacy all rising
    /// with dose; the default demo setting
    pub fn graded(n_doses: usize) -> Self {
        let doses = (0..n_doses)
            .map(|j| {
                let frac = if n_doses > 1 {
                    j as f64 / (n_doses - 1) as f64
                } else {
                    0.0
                };
                DoseOutcomeProbs {
                    p_imm: 0.20 + 0.50 * frac,
                    p_tox: 0.05 + 0.15 * frac,
                    p_eff: [0.10 + 0.15 * frac, 0.30 + 0.35 * frac],
                }
            })
            .collect();
        ProbabilityModel { doses }
    }
}
