//! Mechanism beliefs: categorical posterior over the six mechanisms,
//! nuisance probability and entropy accounting.
//!
//! Updates compare a treated morphology bundle against a matched control
//! on the log scale and score the log-ratio vector against each
//! mechanism's expected signature. Cycle numbers are strictly monotonic
//! integers; a stale update is an integrity error, not a warning.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vessel_kernel::error::KernelError;
use vessel_kernel::observe::MorphologyBundle;
use vessel_kernel::params::Mechanism;

/// Categorical posterior over mechanisms, always normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MechanismPosterior {
    probs: [f64; 6],
}

impl MechanismPosterior {
    /// Uniform prior.
    pub fn uniform() -> Self {
        Self {
            probs: [1.0 / 6.0; 6],
        }
    }

    /// Concentrate `mass` on one mechanism, the rest spread evenly.
    pub fn peaked(mechanism: Mechanism, mass: f64) -> Self {
        let rest = (1.0 - mass) / 5.0;
        let mut probs = [rest; 6];
        probs[mechanism.index()] = mass;
        Self { probs }
    }

    /// Build from raw values without normalizing; used to test the
    /// bad-input path.
    pub fn from_raw(probs: [f64; 6]) -> Self {
        Self { probs }
    }

    /// Probability of one mechanism.
    pub fn prob(&self, mechanism: Mechanism) -> f64 {
        self.probs[mechanism.index()]
    }

    /// Whether this is a proper distribution.
    pub fn is_valid(&self) -> bool {
        self.probs.iter().all(|p| p.is_finite() && *p >= 0.0)
            && (self.probs.iter().sum::<f64>() - 1.0).abs() < 1e-6
    }

    /// The mechanism with the largest posterior mass.
    pub fn top(&self) -> (Mechanism, f64) {
        let mut best = (Mechanism::ALL[0], self.probs[0]);
        for mechanism in Mechanism::ALL {
            let p = self.probs[mechanism.index()];
            if p > best.1 {
                best = (mechanism, p);
            }
        }
        best
    }

    /// Shannon entropy in bits.
    pub fn entropy_bits(&self) -> f64 {
        -self
            .probs
            .iter()
            .filter(|p| **p > 0.0)
            .map(|p| p * p.log2())
            .sum::<f64>()
    }

    /// Posterior mass labelled by mechanism, for the evidence log.
    pub fn labelled(&self) -> BTreeMap<String, f64> {
        Mechanism::ALL
            .iter()
            .map(|m| (m.label().to_string(), self.probs[m.index()]))
            .collect()
    }

    /// Bayes update from per-mechanism log likelihoods.
    fn updated(&self, log_liks: [f64; 6]) -> Self {
        let mut log_post = [0.0; 6];
        for i in 0..6 {
            log_post[i] = self.probs[i].max(1e-12).ln() + log_liks[i];
        }
        let max = log_post.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut probs = [0.0; 6];
        let mut total = 0.0;
        for i in 0..6 {
            probs[i] = (log_post[i] - max).exp();
            total += probs[i];
        }
        for p in &mut probs {
            *p /= total;
        }
        Self { probs }
    }
}

/// Expected log-ratio signature of each mechanism across the five
/// channels `(er, mito, nucleus, actin, rna)` at a strong response.
fn signature(mechanism: Mechanism) -> [f64; 5] {
    match mechanism {
        Mechanism::ErStress => [0.35, 0.0, 0.0, 0.0, -0.10],
        Mechanism::Mitochondrial => [0.0, -0.45, 0.0, 0.0, -0.10],
        Mechanism::Microtubule => [-0.08, -0.07, 0.0, -0.30, 0.0],
        Mechanism::Oxidative => [0.0, -0.15, -0.20, 0.0, 0.0],
        Mechanism::Proteasome => [0.25, 0.0, 0.0, 0.0, -0.15],
        Mechanism::DnaDamage => [0.0, 0.0, 0.25, 0.0, 0.0],
    }
}

/// One belief update, returned for the evidence log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeliefUpdate {
    pub cycle: u64,
    pub entropy_before_bits: f64,
    pub entropy_after_bits: f64,
    pub evidence_strength: f64,
}

/// Current belief state of the agent.
#[derive(Debug, Clone)]
pub struct BeliefState {
    pub posterior: MechanismPosterior,
    pub nuisance_prob: f64,
    pub evidence_strength: f64,
    last_cycle: Option<u64>,
}

impl BeliefState {
    /// Fresh state: uniform posterior, full nuisance, no evidence.
    pub fn new() -> Self {
        Self {
            posterior: MechanismPosterior::uniform(),
            nuisance_prob: 1.0,
            evidence_strength: 0.0,
            last_cycle: None,
        }
    }

    /// Last cycle that produced an update.
    pub fn last_cycle(&self) -> Option<u64> {
        self.last_cycle
    }

    /// Update beliefs from a treated-vs-control morphology pair.
    ///
    /// `rel_noise` is the pooled relative σ from the calibration gate;
    /// `nuisance_prob` is supplied by the caller, which owns the mapping
    /// from gate width to nuisance mass.
    pub fn update_from_morphology(
        &mut self,
        cycle: u64,
        treated: &MorphologyBundle,
        control: &MorphologyBundle,
        rel_noise: f64,
        nuisance_prob: f64,
    ) -> Result<BeliefUpdate, KernelError> {
        if let Some(last) = self.last_cycle
            && cycle <= last
        {
            return Err(KernelError::Integrity(format!(
                "belief update cycle {cycle} not after {last}"
            )));
        }
        let ratios = log_ratios(treated, control)?;

        let sigma = rel_noise.max(0.05);
        let var = sigma * sigma;
        let mut log_liks = [0.0; 6];
        for mechanism in Mechanism::ALL {
            let expected = signature(mechanism);
            let sse: f64 = ratios
                .iter()
                .zip(expected)
                .map(|(r, e)| (r - e).powi(2))
                .sum();
            log_liks[mechanism.index()] = -sse / (2.0 * var);
        }

        let entropy_before = self.posterior.entropy_bits();
        self.posterior = self.posterior.updated(log_liks);
        let entropy_after = self.posterior.entropy_bits();

        let mean_abs = ratios.iter().map(|r| r.abs()).sum::<f64>() / ratios.len() as f64;
        self.evidence_strength = (mean_abs / 0.15).clamp(0.0, 1.0);
        self.nuisance_prob = nuisance_prob.clamp(0.0, 1.0);
        self.last_cycle = Some(cycle);

        tracing::debug!(
            cycle,
            top = self.posterior.top().1,
            evidence = self.evidence_strength,
            "beliefs updated"
        );

        Ok(BeliefUpdate {
            cycle,
            entropy_before_bits: entropy_before,
            entropy_after_bits: entropy_after,
            evidence_strength: self.evidence_strength,
        })
    }
}

impl Default for BeliefState {
    fn default() -> Self {
        Self::new()
    }
}

fn log_ratios(
    treated: &MorphologyBundle,
    control: &MorphologyBundle,
) -> Result<[f64; 5], KernelError> {
    let pairs = [
        (treated.er, control.er),
        (treated.mito, control.mito),
        (treated.nucleus, control.nucleus),
        (treated.actin, control.actin),
        (treated.rna, control.rna),
    ];
    let mut ratios = [0.0; 5];
    for (slot, (t, c)) in ratios.iter_mut().zip(pairs) {
        if t <= 0.0 || c <= 0.0 || !t.is_finite() || !c.is_finite() {
            return Err(KernelError::InvalidArgument(
                "morphology intensities must be positive and finite".to_string(),
            ));
        }
        *slot = (t / c).ln();
    }
    Ok(ratios)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(er: f64, mito: f64, nucleus: f64, actin: f64, rna: f64) -> MorphologyBundle {
        MorphologyBundle {
            er,
            mito,
            nucleus,
            actin,
            rna,
        }
    }

    fn control() -> MorphologyBundle {
        bundle(1200.0, 1500.0, 2000.0, 1800.0, 900.0)
    }

    #[test]
    fn test_uniform_entropy_is_log2_six() {
        let posterior = MechanismPosterior::uniform();
        assert!((posterior.entropy_bits() - 6.0f64.log2()).abs() < 1e-12);
        assert!(posterior.is_valid());
    }

    #[test]
    fn test_mito_signature_moves_posterior() {
        let mut beliefs = BeliefState::new();
        // mito channel down 35%, rna down 8%: the mitochondrial
        // signature is the closest match
        let treated = bundle(1200.0, 975.0, 2000.0, 1800.0, 828.0);
        beliefs
            .update_from_morphology(1, &treated, &control(), 0.1, 0.2)
            .unwrap();
        let (top, p) = beliefs.posterior.top();
        assert_eq!(top, Mechanism::Mitochondrial);
        assert!(p > 1.0 / 6.0);
    }

    #[test]
    fn test_repeated_updates_concentrate_mass() {
        let mut beliefs = BeliefState::new();
        let treated = bundle(1200.0, 975.0, 2000.0, 1800.0, 828.0);
        let mut last_top = 0.0;
        for cycle in 1..=4 {
            beliefs
                .update_from_morphology(cycle, &treated, &control(), 0.1, 0.2)
                .unwrap();
            let (_, p) = beliefs.posterior.top();
            assert!(p >= last_top);
            last_top = p;
        }
        assert!(last_top > 0.8);
    }

    #[test]
    fn test_entropy_reduction_reported() {
        let mut beliefs = BeliefState::new();
        let treated = bundle(1200.0, 975.0, 2000.0, 1800.0, 828.0);
        let update = beliefs
            .update_from_morphology(1, &treated, &control(), 0.1, 0.2)
            .unwrap();
        assert!(update.entropy_after_bits < update.entropy_before_bits);
    }

    #[test]
    fn test_cycle_must_be_strictly_monotonic() {
        let mut beliefs = BeliefState::new();
        let treated = bundle(1250.0, 1500.0, 2000.0, 1800.0, 880.0);
        beliefs
            .update_from_morphology(3, &treated, &control(), 0.1, 0.2)
            .unwrap();
        let err = beliefs
            .update_from_morphology(3, &treated, &control(), 0.1, 0.2)
            .unwrap_err();
        assert!(matches!(err, KernelError::Integrity(_)));
        let err = beliefs
            .update_from_morphology(2, &treated, &control(), 0.1, 0.2)
            .unwrap_err();
        assert!(matches!(err, KernelError::Integrity(_)));
        beliefs
            .update_from_morphology(4, &treated, &control(), 0.1, 0.2)
            .unwrap();
    }

    #[test]
    fn test_flat_morphology_is_weak_evidence() {
        let mut beliefs = BeliefState::new();
        let treated = control();
        let update = beliefs
            .update_from_morphology(1, &treated, &control(), 0.1, 0.2)
            .unwrap();
        assert!(update.evidence_strength < 0.05);
    }

    #[test]
    fn test_nonpositive_intensity_rejected() {
        let mut beliefs = BeliefState::new();
        let treated = bundle(0.0, 1500.0, 2000.0, 1800.0, 900.0);
        assert!(beliefs
            .update_from_morphology(1, &treated, &control(), 0.1, 0.2)
            .is_err());
    }
}
