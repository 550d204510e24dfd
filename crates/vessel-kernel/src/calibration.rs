//! Calibration gate: pooled noise-σ estimation with a df-earned χ²
//! confidence interval and hysteresis.
//!
//! Replicate residuals are pooled on the log scale, so the published σ̂
//! is a relative noise level. The gate is three-valued: precision is
//! `Earned` once the relative CI half-width closes below the earn
//! threshold, and is only `Lost` again if it reopens past the wider
//! lose threshold.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::{KernelError, Result};

/// Three-valued capability flag on noise-σ precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Earned,
    Lost,
    Unknown,
}

impl GateState {
    /// Stable wire label.
    pub fn label(&self) -> &'static str {
        match self {
            GateState::Earned => "earned",
            GateState::Lost => "lost",
            GateState::Unknown => "unknown",
        }
    }
}

/// Gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseGateConfig {
    /// CI confidence level
    pub confidence: f64,
    /// Relative half-width at or below which precision is earned
    pub earn_rel_width: f64,
    /// Relative half-width above which earned precision is lost
    pub lose_rel_width: f64,
}

impl Default for NoiseGateConfig {
    fn default() -> Self {
        Self {
            confidence: 0.95,
            earn_rel_width: 0.25,
            lose_rel_width: 0.40,
        }
    }
}

/// Sizing recommendation for a calibration batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationPlan {
    pub wells: u64,
    pub groups: u64,
    pub expected_df_gain: u64,
    pub cost_per_df: f64,
}

/// Pooled relative-σ estimator and gate.
#[derive(Debug, Clone)]
pub struct NoiseGate {
    config: NoiseGateConfig,
    sum_sq: f64,
    df: u64,
    state: GateState,
}

impl NoiseGate {
    /// Fresh gate in the `Unknown` state.
    pub fn new(config: NoiseGateConfig) -> Self {
        Self {
            config,
            sum_sq: 0.0,
            df: 0,
            state: GateState::Unknown,
        }
    }

    /// Pool one group of replicate readouts. Residuals are taken
    /// against the group mean on the log scale; the group contributes
    /// `n − 1` degrees of freedom.
    pub fn absorb_replicates(&mut self, values: &[f64]) -> Result<()> {
        if values.len() < 2 {
            return Err(KernelError::InvalidArgument(format!(
                "replicate group of {} cannot earn df",
                values.len()
            )));
        }
        if values.iter().any(|v| *v <= 0.0 || !v.is_finite()) {
            return Err(KernelError::InvalidArgument(
                "replicate values must be positive and finite".to_string(),
            ));
        }
        let logs: Vec<f64> = values.iter().map(|v| v.ln()).collect();
        let mean = logs.iter().sum::<f64>() / logs.len() as f64;
        self.sum_sq += logs.iter().map(|l| (l - mean).powi(2)).sum::<f64>();
        self.df += (values.len() - 1) as u64;
        self.update_state();
        Ok(())
    }

    fn update_state(&mut self) {
        let Some(rel) = self.rel_width() else {
            return;
        };
        self.state = match self.state {
            GateState::Earned => {
                if rel > self.config.lose_rel_width {
                    tracing::warn!(rel_width = rel, "noise gate lost");
                    GateState::Lost
                } else {
                    GateState::Earned
                }
            }
            GateState::Unknown | GateState::Lost => {
                if rel <= self.config.earn_rel_width {
                    tracing::info!(rel_width = rel, df = self.df, "noise gate earned");
                    GateState::Earned
                } else {
                    self.state
                }
            }
        };
    }

    /// Current gate state.
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Pooled relative σ̂, available once any df has been earned.
    pub fn pooled_sigma(&self) -> Option<f64> {
        (self.df >= 1).then(|| (self.sum_sq / self.df as f64).sqrt())
    }

    /// Degrees of freedom accumulated so far.
    pub fn df_current(&self) -> u64 {
        self.df
    }

    /// Relative half-width of the χ² CI on σ. Depends only on the df
    /// and the confidence level.
    pub fn rel_width(&self) -> Option<f64> {
        rel_width_for_df(self.df, self.config.confidence)
    }

    /// Margin between the earn threshold and the current width;
    /// positive once earned with room to spare.
    pub fn gate_slack(&self) -> Option<f64> {
        self.rel_width().map(|rel| self.config.earn_rel_width - rel)
    }

    /// Degrees of freedom required before the gate can be earned.
    pub fn df_needed_to_earn(&self) -> u64 {
        for df in 2..=10_000u64 {
            if let Some(rel) = rel_width_for_df(df, self.config.confidence)
                && rel <= self.config.earn_rel_width
            {
                return df;
            }
        }
        u64::MAX
    }

    /// Replicate wells still needed to earn, with groups of
    /// `group_size` wells.
    pub fn wells_needed(&self, group_size: u64) -> u64 {
        if group_size < 2 {
            return u64::MAX;
        }
        let needed = self.df_needed_to_earn().saturating_sub(self.df);
        if needed == 0 {
            return 0;
        }
        let groups = needed.div_ceil(group_size - 1);
        groups * group_size
    }
}

/// Relative CI half-width on σ for a given df. Pure in
/// `(df, confidence)`: the point estimate cancels out of the ratio.
pub fn rel_width_for_df(df: u64, confidence: f64) -> Option<f64> {
    if df < 2 {
        return None;
    }
    let alpha = 1.0 - confidence;
    let nu = df as f64;
    let chi = ChiSquared::new(nu).ok()?;
    let lo_q = chi.inverse_cdf(alpha / 2.0);
    let hi_q = chi.inverse_cdf(1.0 - alpha / 2.0);
    if lo_q <= 0.0 {
        return None;
    }
    let sigma_hi = (nu / lo_q).sqrt();
    let sigma_lo = (nu / hi_q).sqrt();
    Some((sigma_hi - sigma_lo) / 2.0)
}

/// Recommend a calibration batch via fixed-cost amortization.
pub fn recommend_batch(
    target_df_gain: u64,
    group_size: u64,
    fixed_plate_cost: f64,
    per_well_cost: f64,
) -> Result<CalibrationPlan> {
    if group_size < 2 || target_df_gain == 0 {
        return Err(KernelError::InvalidArgument(format!(
            "bad batch request: df_gain={target_df_gain}, group_size={group_size}"
        )));
    }
    let groups = target_df_gain.div_ceil(group_size - 1);
    let wells = groups * group_size;
    let expected_df_gain = groups * (group_size - 1);
    let cost_per_df = fixed_plate_cost / expected_df_gain as f64 + per_well_cost;
    Ok(CalibrationPlan {
        wells,
        groups,
        expected_df_gain,
        cost_per_df,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rel_width_shrinks_with_df() {
        let w10 = rel_width_for_df(10, 0.95).unwrap();
        let w40 = rel_width_for_df(40, 0.95).unwrap();
        let w200 = rel_width_for_df(200, 0.95).unwrap();
        assert!(w10 > w40);
        assert!(w40 > w200);
        assert!(rel_width_for_df(1, 0.95).is_none());
    }

    #[test]
    fn test_df_needed_at_default_thresholds() {
        let gate = NoiseGate::new(NoiseGateConfig::default());
        let needed = gate.df_needed_to_earn();
        // 0.25 relative half-width at 95% closes in the mid thirties
        assert!((30..=40).contains(&needed), "df_needed = {needed}");
    }

    #[test]
    fn test_gate_earns_with_enough_replicates() {
        let mut gate = NoiseGate::new(NoiseGateConfig::default());
        assert_eq!(gate.state(), GateState::Unknown);

        // groups of six: five df each
        let group = [100.0, 102.0, 99.0, 101.0, 100.5, 98.5];
        for _ in 0..4 {
            gate.absorb_replicates(&group).unwrap();
        }
        assert_eq!(gate.df_current(), 20);
        assert_eq!(gate.state(), GateState::Unknown);

        for _ in 0..4 {
            gate.absorb_replicates(&group).unwrap();
        }
        assert_eq!(gate.df_current(), 40);
        assert_eq!(gate.state(), GateState::Earned);
        assert!(gate.pooled_sigma().unwrap() > 0.0);
        assert!(gate.gate_slack().unwrap() >= 0.0);
    }

    #[test]
    fn test_hysteresis_band_holds() {
        // At 20 df the width sits between the earn and lose thresholds.
        let rel = rel_width_for_df(20, 0.95).unwrap();
        assert!(rel > 0.25 && rel < 0.40, "rel = {rel}");

        // An earned gate in the dead band stays earned.
        let mut earned = NoiseGate {
            config: NoiseGateConfig::default(),
            sum_sq: 0.02,
            df: 20,
            state: GateState::Earned,
        };
        earned.update_state();
        assert_eq!(earned.state(), GateState::Earned);

        // An unknown gate at the same width stays unknown.
        let mut unknown = NoiseGate {
            config: NoiseGateConfig::default(),
            sum_sq: 0.02,
            df: 20,
            state: GateState::Unknown,
        };
        unknown.update_state();
        assert_eq!(unknown.state(), GateState::Unknown);
    }

    #[test]
    fn test_small_groups_rejected() {
        let mut gate = NoiseGate::new(NoiseGateConfig::default());
        assert!(gate.absorb_replicates(&[1.0]).is_err());
        assert!(gate.absorb_replicates(&[1.0, -2.0]).is_err());
    }

    #[test]
    fn test_wells_needed_accounts_for_group_overhead() {
        let gate = NoiseGate::new(NoiseGateConfig::default());
        let needed_df = gate.df_needed_to_earn();
        let wells = gate.wells_needed(6);
        // each group of 6 wells yields 5 df
        assert_eq!(wells, needed_df.div_ceil(5) * 6);
    }

    #[test]
    fn test_recommend_batch_amortizes_fixed_cost() {
        let plan = recommend_batch(10, 6, 30.0, 1.0).unwrap();
        assert_eq!(plan.groups, 2);
        assert_eq!(plan.wells, 12);
        assert_eq!(plan.expected_df_gain, 10);
        assert!((plan.cost_per_df - 4.0).abs() < 1e-12);

        let bigger = recommend_batch(50, 6, 30.0, 1.0).unwrap();
        assert!(bigger.cost_per_df < plan.cost_per_df);
    }
}
