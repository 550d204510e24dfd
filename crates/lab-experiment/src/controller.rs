//! Epistemic controller: debt bookkeeping, the refusal contract and
//! contamination tracking.
//!
//! Debt is measured in bits. Over-claimed entropy reduction accrues it;
//! calibration actions repay it. Refusals are typed values returned to
//! the caller, and the agent cycle continues after one.

use serde::{Deserialize, Serialize};

/// Debt above which non-calibration actions are refused outright.
pub const DEBT_HARD_LIMIT_BITS: f64 = 2.0;
/// Cost inflation per bit of debt.
pub const DEBT_COST_SENSITIVITY: f64 = 0.5;
/// Wells that must stay in reserve for epistemic recovery.
pub const MIN_CALIBRATION_COST_WELLS: f64 = 12.0;
/// Flat repayment per calibration action, bits.
pub const REPAY_BASE_BITS: f64 = 0.25;
/// Maximum improvement-proportional bonus, bits.
pub const REPAY_BONUS_MAX_BITS: f64 = 0.75;
/// Noise improvement at which the bonus saturates.
pub const REPAY_FULL_IMPROVEMENT: f64 = 0.10;

/// Why an action was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    EpistemicDebtActionBlocked,
    InsufficientBudgetForEpistemicRecovery,
    EpistemicDebtBudgetExceeded,
}

impl RefusalReason {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            RefusalReason::EpistemicDebtActionBlocked => "epistemic_debt_action_blocked",
            RefusalReason::InsufficientBudgetForEpistemicRecovery => {
                "insufficient_budget_for_epistemic_recovery"
            }
            RefusalReason::EpistemicDebtBudgetExceeded => "epistemic_debt_budget_exceeded",
        }
    }
}

/// A refusal, returned by value and logged; never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefusalEvent {
    pub cycle: u64,
    pub action: String,
    pub reason: RefusalReason,
    pub debt_bits: f64,
    pub budget_remaining_wells: f64,
    pub base_cost_wells: f64,
    pub inflated_cost_wells: f64,
    pub epistemically_contaminated: bool,
}

/// Process-local debt counter, budget and contamination flag.
#[derive(Debug, Clone)]
pub struct EpistemicController {
    debt_bits: f64,
    budget_wells: f64,
    enforcement_enabled: bool,
    contaminated: bool,
    contamination_reason: Option<String>,
}

impl EpistemicController {
    /// Fresh controller with zero debt and a full budget.
    pub fn new(budget_wells: f64) -> Self {
        Self {
            debt_bits: 0.0,
            budget_wells,
            enforcement_enabled: true,
            contaminated: false,
            contamination_reason: None,
        }
    }

    /// Current debt in bits.
    pub fn debt_bits(&self) -> f64 {
        self.debt_bits
    }

    /// Wells remaining in the budget.
    pub fn budget_remaining_wells(&self) -> f64 {
        self.budget_wells
    }

    /// Whether the run is epistemically contaminated.
    pub fn is_contaminated(&self) -> bool {
        self.contaminated
    }

    /// Contamination reasons for the run summary.
    pub fn contamination_flags(&self) -> Vec<String> {
        self.contamination_reason.iter().cloned().collect()
    }

    /// Debt-inflated cost of an action.
    pub fn effective_cost_wells(&self, base_cost_wells: f64) -> f64 {
        base_cost_wells * (1.0 + DEBT_COST_SENSITIVITY * self.debt_bits)
    }

    /// Accrue debt when a claim's entropy reduction exceeds what was
    /// actually observed.
    pub fn accrue_claim(&mut self, claimed_bits: f64, observed_bits: f64) -> f64 {
        let accrued = (claimed_bits - observed_bits).max(0.0);
        if accrued > 0.0 {
            self.debt_bits += accrued;
            tracing::info!(
                claimed_bits,
                observed_bits,
                debt_bits = self.debt_bits,
                "epistemic debt accrued"
            );
        }
        accrued
    }

    /// Repay debt for a completed calibration action. The bonus is
    /// proportional to the measured noise improvement, saturating at
    /// [`REPAY_FULL_IMPROVEMENT`]; total repayment caps at one bit.
    pub fn repay_calibration(&mut self, noise_improvement: f64) -> f64 {
        let bonus = REPAY_BONUS_MAX_BITS
            * (noise_improvement / REPAY_FULL_IMPROVEMENT).clamp(0.0, 1.0);
        let repaid = (REPAY_BASE_BITS + bonus).min(1.0).min(self.debt_bits);
        self.debt_bits -= repaid;
        tracing::info!(
            noise_improvement,
            repaid,
            debt_bits = self.debt_bits,
            "calibration repaid debt"
        );
        repaid
    }

    /// The refusal contract, checked in strict precedence order:
    /// hard debt threshold, then budget reserve, then cost overflow.
    pub fn should_refuse_action(
        &mut self,
        cycle: u64,
        action: &str,
        is_calibration: bool,
        base_cost_wells: f64,
    ) -> Option<RefusalEvent> {
        if !self.enforcement_enabled {
            return None;
        }
        let inflated = self.effective_cost_wells(base_cost_wells);

        let reason = if self.debt_bits > DEBT_HARD_LIMIT_BITS && !is_calibration {
            Some(RefusalReason::EpistemicDebtActionBlocked)
        } else if !is_calibration
            && (self.budget_wells - inflated) < MIN_CALIBRATION_COST_WELLS
        {
            Some(RefusalReason::InsufficientBudgetForEpistemicRecovery)
        } else if inflated > self.budget_wells {
            Some(RefusalReason::EpistemicDebtBudgetExceeded)
        } else {
            None
        };

        reason.map(|reason| {
            tracing::warn!(cycle, action, code = reason.code(), "action refused");
            RefusalEvent {
                cycle,
                action: action.to_string(),
                reason,
                debt_bits: self.debt_bits,
                budget_remaining_wells: self.budget_wells,
                base_cost_wells,
                inflated_cost_wells: inflated,
                epistemically_contaminated: self.contaminated,
            }
        })
    }

    /// Deduct the inflated cost of an executed action.
    pub fn charge(&mut self, base_cost_wells: f64) {
        let inflated = self.effective_cost_wells(base_cost_wells);
        self.budget_wells = (self.budget_wells - inflated).max(0.0);
    }

    /// Preload debt, e.g. when resuming a tainted run.
    pub fn preload_debt(&mut self, debt_bits: f64) {
        self.debt_bits = debt_bits.max(0.0);
    }

    /// Disabling enforcement is allowed but never free: the run is
    /// flagged contaminated and every artefact carries the flag.
    pub fn disable_enforcement(&mut self, reason: &str) {
        tracing::warn!(reason, "debt enforcement disabled, run contaminated");
        self.enforcement_enabled = false;
        self.contaminated = true;
        self.contamination_reason = Some(reason.to_string());
    }
}
