//! Stress & compound model: hazard proposals, latent-axis dynamics and
//! morphology penalties.
//!
//! All dose-response math reads the adjusted IC50 / hill slope / potency
//! *stored on the exposure at treatment time*, so morphology and
//! viability always agree on potency and intentional incoherence can
//! only come from explicit run-context modifiers.

use crate::context::Channel;
use crate::error::Result;
use crate::params::{CellLineParams, Mechanism, ParameterStore};
use crate::vessel::{DeathBucket, HazardTerm, StressAxis, VesselState};

/// Latent-axis death threshold for ER stress before sensitivity shift.
pub const ER_DEATH_THETA0: f64 = 0.7;
/// Latent-axis death threshold for mitochondrial dysfunction.
pub const MITO_DEATH_THETA0: f64 = 0.65;
/// Steepness of the threshold-shifted sigmoid.
pub const THRESHOLD_SIGMOID_K: f64 = 12.0;
/// Ceiling hazard for ER latent death, per hour.
pub const ER_DEATH_LAMBDA_MAX: f64 = 0.35;
/// Ceiling hazard for mito latent death, per hour.
pub const MITO_DEATH_LAMBDA_MAX: f64 = 0.30;
/// Mitotic catastrophe ceiling for dividing lines under microtubule
/// stress, per hour.
pub const MITOTIC_CATASTROPHE_LAMBDA_MAX: f64 = 0.15;
/// Slow-burn microtubule base hazard; multiplied by the compound
/// attrition rate for post-mitotic lines.
pub const MICROTUBULE_ATTRITION_BASE: f64 = 0.008;
/// Hours a vessel tolerates without feeding before starvation begins.
pub const FEED_WINDOW_H: f64 = 48.0;
/// Starvation hazard slope per 24 h past the window, per hour.
pub const STARVATION_RATE_PER_H: f64 = 0.002;
/// Starvation hazard cap, per hour.
pub const STARVATION_CAP_PER_H: f64 = 0.05;
/// Over-confluence hazard at full overshoot, per hour.
pub const CONFLUENCE_RATE_PER_H: f64 = 0.03;
/// Undriven latent axes relax at this rate, per hour.
pub const AXIS_DECAY_PER_H: f64 = 0.01;

/// Smooth Hill occupancy; zero dose gives exactly zero.
pub fn hill(dose_um: f64, ec50_um: f64, slope: f64) -> f64 {
    if dose_um <= 0.0 {
        return 0.0;
    }
    let d = dose_um.powf(slope);
    let e = ec50_um.powf(slope);
    d / (e + d)
}

/// Threshold-shifted sigmoid on a latent axis.
///
/// `theta_shifted = theta0 × sensitivity_multiplier`; multipliers below
/// one lower the threshold, so the sensitive population dies earlier.
/// Rescaled so a fully relaxed axis contributes exactly zero hazard
/// rather than the raw sigmoid tail.
pub fn threshold_sigmoid(axis: f64, theta_shifted: f64) -> f64 {
    let s = |x: f64| 1.0 / (1.0 + (-THRESHOLD_SIGMOID_K * (x - theta_shifted)).exp());
    let floor = s(0.0);
    ((s(axis) - floor) / (1.0 - floor)).max(0.0)
}

/// Hazard from the ER-stress latent axis for a given line.
pub fn er_latent_hazard(axis: f64, line: &CellLineParams) -> f64 {
    let theta = ER_DEATH_THETA0 * line.sensitivity.multiplier(Mechanism::ErStress);
    ER_DEATH_LAMBDA_MAX * threshold_sigmoid(axis, theta)
}

/// Hazard from the mitochondrial-dysfunction latent axis.
pub fn mito_latent_hazard(axis: f64, line: &CellLineParams) -> f64 {
    let theta =
        MITO_DEATH_THETA0 * line.sensitivity.multiplier(Mechanism::Mitochondrial);
    MITO_DEATH_LAMBDA_MAX * threshold_sigmoid(axis, theta)
}

/// Propose every active hazard for one sub-step. Rates are per hour and
/// non-negative; zero-rate sources are omitted.
pub fn propose_hazards(
    vessel: &VesselState,
    line: &CellLineParams,
    store: &ParameterStore,
    now_h: f64,
) -> Result<Vec<HazardTerm>> {
    let mut terms = Vec::new();

    for (compound_id, exposure) in &vessel.exposures {
        let compound = store.compound(compound_id)?;
        let occ = hill(
            exposure.dose_um,
            exposure.ic50_um_adjusted,
            exposure.hill_slope,
        );
        if occ <= 0.0 {
            continue;
        }

        match compound.mechanism {
            Mechanism::Microtubule => {
                if line.post_mitotic {
                    // Slow burn: no mitosis means no catastrophe, only
                    // a low attrition hazard scaled by the compound.
                    let rate =
                        MICROTUBULE_ATTRITION_BASE * compound.attrition_rate * occ;
                    push(&mut terms, format!("compound:{compound_id}"), DeathBucket::Compound, rate);
                } else {
                    let rate = MITOTIC_CATASTROPHE_LAMBDA_MAX
                        * occ
                        * exposure.potency_scalar;
                    push(
                        &mut terms,
                        format!("mitotic_catastrophe:{compound_id}"),
                        DeathBucket::MitoticCatastrophe,
                        rate,
                    );
                }
            }
            mechanism => {
                let rate = mechanism.hazard_ceiling_per_h()
                    * occ
                    * exposure.potency_scalar;
                push(
                    &mut terms,
                    format!("compound:{compound_id}"),
                    mechanism.death_bucket(),
                    rate,
                );
            }
        }
    }

    let starved_h = vessel.hours_since_feed(now_h) - FEED_WINDOW_H;
    if starved_h > 0.0 {
        let rate =
            (STARVATION_RATE_PER_H * starved_h / 24.0).min(STARVATION_CAP_PER_H);
        push(&mut terms, "starvation".to_string(), DeathBucket::Starvation, rate);
    }

    if vessel.confluence > line.max_confluence {
        let overshoot = (vessel.confluence - line.max_confluence)
            / (1.0 - line.max_confluence).max(1e-6);
        push(
            &mut terms,
            "confluence".to_string(),
            DeathBucket::Confluence,
            CONFLUENCE_RATE_PER_H * overshoot.min(1.0),
        );
    }

    // Background senescent attrition is a known-unknown.
    push(
        &mut terms,
        "senescence".to_string(),
        DeathBucket::Unknown,
        line.senescence_rate_per_h,
    );

    push(
        &mut terms,
        "latent:er_stress".to_string(),
        DeathBucket::ErStress,
        er_latent_hazard(vessel.axes.er_stress, line),
    );
    push(
        &mut terms,
        "latent:mito_dysfunction".to_string(),
        DeathBucket::MitoDysfunction,
        mito_latent_hazard(vessel.axes.mito_dysfunction, line),
    );

    Ok(terms)
}

fn push(terms: &mut Vec<HazardTerm>, label: String, bucket: DeathBucket, rate: f64) {
    debug_assert!(rate.is_finite() && rate >= 0.0, "bad hazard rate");
    if rate > 0.0 {
        terms.push(HazardTerm {
            label,
            bucket,
            rate_per_h: rate,
        });
    }
}

/// Advance the latent axes by `dt_h`. Driven axes rise toward
/// saturation at the mechanism rate; undriven axes relax slowly.
pub fn advance_axes(
    vessel: &mut VesselState,
    store: &ParameterStore,
    dt_h: f64,
) -> Result<()> {
    let mut driven = [false; 3];
    let idx = |axis: StressAxis| match axis {
        StressAxis::ErStress => 0usize,
        StressAxis::MitoDysfunction => 1,
        StressAxis::TransportDysfunction => 2,
    };

    // Collect drives first; exposures borrow the vessel immutably.
    let mut drives: Vec<(StressAxis, f64)> = Vec::new();
    for (compound_id, exposure) in &vessel.exposures {
        let compound = store.compound(compound_id)?;
        let Some(axis) = compound.mechanism.target_axis() else {
            continue;
        };
        let occ = hill(
            exposure.dose_um,
            exposure.ic50_um_adjusted,
            exposure.hill_slope,
        );
        if occ <= 0.0 {
            continue;
        }
        driven[idx(axis)] = true;
        drives.push((axis, compound.mechanism.axis_rate_per_h() * occ));
    }

    for (axis, rate) in drives {
        let a = vessel.axes.get(axis);
        vessel.axes.set(axis, a + rate * (1.0 - a) * dt_h);
    }

    for axis in [
        StressAxis::ErStress,
        StressAxis::MitoDysfunction,
        StressAxis::TransportDysfunction,
    ] {
        if !driven[idx(axis)] {
            let a = vessel.axes.get(axis);
            vessel.axes.set(axis, a - AXIS_DECAY_PER_H * a * dt_h);
        }
    }

    Ok(())
}

/// Summed per-channel morphology effects. Channel intensity is rendered
/// as `baseline × (1 + effect)` downstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelEffects([f64; 5]);

impl ChannelEffects {
    /// Effect for one channel.
    pub fn get(&self, channel: Channel) -> f64 {
        self.0[channel_index(channel)]
    }

    fn add(&mut self, channel: Channel, effect: f64) {
        self.0[channel_index(channel)] += effect;
    }
}

fn channel_index(channel: Channel) -> usize {
    match channel {
        Channel::Er => 0,
        Channel::Mito => 1,
        Channel::Nucleus => 2,
        Channel::Actin => 3,
        Channel::Rna => 4,
    }
}

/// Per-axis contributions to channel intensity.
const ER_AXIS_EFFECTS: [(Channel, f64); 2] =
    [(Channel::Er, 0.45), (Channel::Rna, -0.08)];
const MITO_AXIS_EFFECTS: [(Channel, f64); 2] =
    [(Channel::Mito, -0.40), (Channel::Rna, -0.10)];
const TRANSPORT_AXIS_EFFECTS: [(Channel, f64); 3] = [
    (Channel::Actin, -0.35),
    (Channel::Er, -0.10),
    (Channel::Mito, -0.08),
];

/// Direct (non-latent) morphology signature per mechanism. Microtubule
/// is absent: its morphology renders only through the transport
/// dysfunction latent, so applying a direct term here would double
/// count.
fn direct_effects(mechanism: Mechanism) -> &'static [(Channel, f64)] {
    match mechanism {
        Mechanism::ErStress => &[(Channel::Er, 0.30)],
        Mechanism::Mitochondrial => &[(Channel::Mito, -0.35)],
        Mechanism::Oxidative => &[(Channel::Nucleus, -0.20), (Channel::Mito, -0.15)],
        Mechanism::Proteasome => &[(Channel::Er, 0.20), (Channel::Rna, -0.15)],
        Mechanism::DnaDamage => &[(Channel::Nucleus, 0.25)],
        Mechanism::Microtubule => &[],
    }
}

/// Compute the summed morphology effects for a vessel.
pub fn channel_effects(
    vessel: &VesselState,
    line: &CellLineParams,
    store: &ParameterStore,
) -> Result<ChannelEffects> {
    let mut effects = ChannelEffects::default();

    for (channel, coeff) in ER_AXIS_EFFECTS {
        effects.add(channel, coeff * vessel.axes.er_stress);
    }
    for (channel, coeff) in MITO_AXIS_EFFECTS {
        effects.add(channel, coeff * vessel.axes.mito_dysfunction);
    }
    for (channel, coeff) in TRANSPORT_AXIS_EFFECTS {
        effects.add(channel, coeff * vessel.axes.transport_dysfunction);
    }

    for (compound_id, exposure) in &vessel.exposures {
        let compound = store.compound(compound_id)?;
        let signature = direct_effects(compound.mechanism);
        if signature.is_empty() {
            continue;
        }
        let morph_ec50 =
            exposure.ic50_um_adjusted * compound.morph_ec50_fraction(line);
        let occ = hill(exposure.dose_um, morph_ec50, exposure.hill_slope)
            * exposure.potency_scalar;
        for &(channel, coeff) in signature {
            effects.add(channel, coeff * occ);
        }
    }

    Ok(effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vessel::PlatingContext;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;
    use std::collections::HashMap;

    fn vessel(line: &str) -> VesselState {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        VesselState::new(
            "v1",
            line,
            1.0e4,
            1.0,
            4.0e4,
            0.0,
            PlatingContext::sample(&mut rng),
        )
    }

    fn expose(vessel: &mut VesselState, compound: &str, dose_um: f64, ic50: f64, slope: f64) {
        vessel.exposures.insert(
            compound.to_string(),
            crate::vessel::CompoundExposure {
                dose_um,
                start_time_h: 0.0,
                ic50_um_adjusted: ic50,
                hill_slope: slope,
                potency_scalar: 1.0,
            },
        );
    }

    #[test]
    fn test_hill_zero_dose_is_zero() {
        assert_eq!(hill(0.0, 1.0, 2.0), 0.0);
        assert!((hill(1.0, 1.0, 2.0) - 0.5).abs() < 1e-12);
        assert!(hill(100.0, 1.0, 2.0) > 0.999);
    }

    #[test]
    fn test_threshold_shift_direction() {
        // A multiplier below one lowers the threshold, so the hazard at
        // a given axis level is strictly higher for the sensitive line.
        let axis = 0.7;
        let sensitive = ER_DEATH_LAMBDA_MAX * threshold_sigmoid(axis, 0.7 * 0.8);
        let resistant = ER_DEATH_LAMBDA_MAX * threshold_sigmoid(axis, 0.7 * 1.2);
        assert!(sensitive > resistant);
    }

    #[test]
    fn test_post_mitotic_microtubule_is_slow_burn() {
        let store = ParameterStore::builtin();
        let neuron = store.cell_line("iNeuron").unwrap().clone();
        let mut v = vessel("iNeuron");
        expose(&mut v, "nocodazole", 10.0, 0.42, 2.0);

        let terms = propose_hazards(&v, &neuron, &store, 0.0).unwrap();
        let compound_term = terms
            .iter()
            .find(|t| t.label == "compound:nocodazole")
            .unwrap();
        // attrition-scaled, far below the catastrophe ceiling
        assert!(compound_term.rate_per_h < 0.01);
        assert!(!terms
            .iter()
            .any(|t| t.label.starts_with("mitotic_catastrophe")));
    }

    #[test]
    fn test_dividing_line_gets_mitotic_catastrophe() {
        let store = ParameterStore::builtin();
        let a549 = store.cell_line("A549").unwrap().clone();
        let mut v = vessel("A549");
        expose(&mut v, "nocodazole", 10.0, 0.6, 2.0);

        let terms = propose_hazards(&v, &a549, &store, 0.0).unwrap();
        let term = terms
            .iter()
            .find(|t| t.label == "mitotic_catastrophe:nocodazole")
            .unwrap();
        assert!(term.rate_per_h > 0.1);
    }

    #[test]
    fn test_zero_dose_contributes_no_hazard() {
        let store = ParameterStore::builtin();
        let a549 = store.cell_line("A549").unwrap().clone();
        let mut v = vessel("A549");
        expose(&mut v, "rotenone", 0.0, 0.8, 1.4);

        let terms = propose_hazards(&v, &a549, &store, 0.0).unwrap();
        assert!(!terms.iter().any(|t| t.label == "compound:rotenone"));
    }

    #[test]
    fn test_transport_axis_saturation_at_24h() {
        let store = ParameterStore::builtin();
        let mut v = vessel("iNeuron");
        expose(&mut v, "nocodazole", 10.0, 0.42, 2.0);

        let dt = 0.5;
        for _ in 0..48 {
            advance_axes(&mut v, &store, dt).unwrap();
        }
        // 1 − exp(−0.067·24) ≈ 0.80
        assert!((v.axes.transport_dysfunction - 0.80).abs() < 0.03);
    }

    #[test]
    fn test_undriven_axis_decays() {
        let store = ParameterStore::builtin();
        let mut v = vessel("A549");
        v.axes.er_stress = 0.5;
        advance_axes(&mut v, &store, 1.0).unwrap();
        assert!(v.axes.er_stress < 0.5);
    }

    #[test]
    fn test_microtubule_morphology_is_latent_only() {
        let store = ParameterStore::builtin();
        let neuron = store.cell_line("iNeuron").unwrap().clone();
        let mut v = vessel("iNeuron");
        expose(&mut v, "nocodazole", 10.0, 0.42, 2.0);

        // No transport dysfunction accumulated yet: morphology must be
        // untouched even at saturating dose.
        let effects = channel_effects(&v, &neuron, &store).unwrap();
        assert_eq!(effects.get(Channel::Actin), 0.0);

        v.axes.transport_dysfunction = 0.8;
        let effects = channel_effects(&v, &neuron, &store).unwrap();
        assert!((effects.get(Channel::Actin) + 0.28).abs() < 1e-9);
    }

    #[test]
    fn test_er_compound_renders_both_paths() {
        let store = ParameterStore::builtin();
        let a549 = store.cell_line("A549").unwrap().clone();
        let mut v = vessel("A549");
        expose(&mut v, "tunicamycin", 5.0, 1.2, 1.6);
        v.axes.er_stress = 0.4;

        let effects = channel_effects(&v, &a549, &store).unwrap();
        // axis path alone would give 0.45·0.4 = 0.18; the direct Hill
        // term adds on top
        assert!(effects.get(Channel::Er) > 0.18);
    }

    #[test]
    fn test_morph_ec50_uses_stored_adjustment() {
        let store = ParameterStore::builtin();
        let a549 = store.cell_line("A549").unwrap().clone();
        let mut low = vessel("A549");
        let mut high = vessel("A549");
        // Same dose, different stored adjusted IC50: the one adjusted
        // downward must show the stronger morphology effect.
        expose(&mut low, "tunicamycin", 1.0, 0.6, 1.6);
        expose(&mut high, "tunicamycin", 1.0, 2.4, 1.6);

        let e_low = channel_effects(&low, &a549, &store).unwrap();
        let e_high = channel_effects(&high, &a549, &store).unwrap();
        assert!(e_low.get(Channel::Er) > e_high.get(Channel::Er));
    }

    #[test]
    fn test_starvation_ramps_after_window() {
        let store = ParameterStore::builtin();
        let a549 = store.cell_line("A549").unwrap().clone();
        let v = vessel("A549");

        let fed = propose_hazards(&v, &a549, &store, 24.0).unwrap();
        assert!(!fed.iter().any(|t| t.label == "starvation"));

        let starved = propose_hazards(&v, &a549, &store, 100.0).unwrap();
        let term = starved.iter().find(|t| t.label == "starvation").unwrap();
        assert!(term.rate_per_h > 0.0);
        assert!(term.rate_per_h <= STARVATION_CAP_PER_H);
    }

    #[test]
    fn test_morph_fraction_map_is_respected() {
        // iNeuron override (0.3) shifts the morphology EC50 below the
        // A549 default (0.5) for the same compound.
        let store = ParameterStore::builtin();
        let noc = store.compound("nocodazole").unwrap();
        let mut by_line = HashMap::new();
        by_line.insert("iNeuron".to_string(), 0.3f64);
        assert_eq!(noc.morph_ec50_fraction_by_line, by_line);
    }
}
