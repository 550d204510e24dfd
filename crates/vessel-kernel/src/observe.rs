//! Observation layer: scalar assays and cell painting over immutable
//! vessel snapshots.
//!
//! Measurements never mutate vessel state. Every readout is the physical
//! baseline times the layered technical factors
//! (`plate × day × operator × well × edge × reader_gain`), the per-assay
//! reagent-lot bias and a keyed noise draw, so re-reading the same state
//! reproduces identical values.

use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};

use crate::context::{Channel, RunContext, ScalarAssay};
use crate::error::Result;
use crate::params::{CellLineParams, Mechanism};
use crate::physics::VesselEngine;
use crate::plate::{PlateFormat, WellPos};
use crate::stress;
use crate::vessel::VesselState;

/// Where and by whom a measurement was taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellContext {
    pub batch: String,
    pub plate_id: String,
    pub well_pos: String,
    pub day: u32,
    pub operator: String,
    pub format: PlateFormat,
}

/// Scalar biochemical readouts of one well.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarBundle {
    pub atp: f64,
    pub ldh: f64,
    pub upr: f64,
    pub trafficking: f64,
    pub gamma_h2ax_intensity: f64,
    pub gamma_h2ax_pct_positive: f64,
    pub gamma_h2ax_fold: f64,
}

/// Morphological channel intensities of one well.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MorphologyBundle {
    pub er: f64,
    pub mito: f64,
    pub nucleus: f64,
    pub actin: f64,
    pub rna: f64,
}

/// Write-once record of one measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub vessel_id: String,
    pub cell_line_id: String,
    pub time_h: f64,
    pub plate_id: String,
    pub well_pos: String,
    pub day: u32,
    pub operator: String,
    pub is_edge_well: bool,
    pub scalars: Option<ScalarBundle>,
    pub morphology: Option<MorphologyBundle>,
}

/// Per-cell baseline intensity of each imaging channel, arbitrary units.
fn channel_baseline(channel: Channel) -> f64 {
    match channel {
        Channel::Er => 1200.0,
        Channel::Mito => 1500.0,
        Channel::Nucleus => 2000.0,
        Channel::Actin => 1800.0,
        Channel::Rna => 900.0,
    }
}

/// Dead-signal denominator floor; keeps LDH finite as viability falls.
const LDH_VIABILITY_FLOOR: f64 = 0.05;

fn total_tech_factor(
    ctx: &RunContext,
    line: &CellLineParams,
    well: &WellContext,
    is_edge: bool,
) -> f64 {
    let edge_factor = if is_edge { 1.0 - line.edge_penalty } else { 1.0 };
    ctx.plate_factor(&well.batch, &well.plate_id)
        * ctx.day_factor(&well.batch, well.day)
        * ctx.operator_factor(&well.batch, &well.operator)
        * ctx.well_factor(&well.batch, &well.plate_id, &well.well_pos)
        * edge_factor
        * ctx.reader_gain
}

/// Multiplicative noise with the given CV, drawn from a keyed stream.
///
/// Lognormal with sigma ≈ cv, good for the small CVs in the catalogue.
fn noise(rng: &mut ChaCha12Rng, cv: f64) -> f64 {
    if cv <= 0.0 {
        return 1.0;
    }
    LogNormal::new(0.0, cv).expect("valid lognormal").sample(rng)
}

fn dna_damage_occupancy(vessel: &VesselState, engine: &VesselEngine) -> Result<f64> {
    let mut occ: f64 = 0.0;
    for (compound_id, exposure) in &vessel.exposures {
        let compound = engine.params().compound(compound_id)?;
        if compound.mechanism == Mechanism::DnaDamage {
            let this = stress::hill(
                exposure.dose_um,
                exposure.ic50_um_adjusted,
                exposure.hill_slope,
            ) * exposure.potency_scalar;
            occ = occ.max(this);
        }
    }
    Ok(occ)
}

/// Run the scalar viability panel on one well.
///
/// Signals: ATP (viable energy charge), LDH (membrane rupture), UPR
/// reporter, trafficking reporter, and γH2AX intensity / % positive /
/// fold induction.
pub fn atp_viability_assay(
    engine: &VesselEngine,
    vessel_id: &str,
    well: &WellContext,
) -> Result<ObservationRecord> {
    let vessel = engine.vessel(vessel_id)?;
    let ctx = engine.ctx();
    let line = engine.params().cell_line(&vessel.cell_line_id)?;
    let pos = WellPos::parse(&well.well_pos, well.format)?;
    let is_edge = pos.is_edge(well.format);

    let tech = total_tech_factor(ctx, line, well, is_edge);
    let mut rng = ctx.measurement_rng(
        "scalar",
        &well.batch,
        &well.plate_id,
        well.day,
        &well.operator,
        &well.well_pos,
    );
    let cv = &line.assay_cv;

    // Physical baselines from the snapshot; the snapshot is never
    // written to.
    let atp_base = vessel.cell_count * (1.0 - 0.5 * vessel.axes.mito_dysfunction);
    let total_mass = vessel.cell_count / vessel.viability.max(LDH_VIABILITY_FLOOR);
    // dissociation debris elevates the dead-cell signal
    let ldh_base = total_mass
        * (1.0 - vessel.viability)
        * (1.0 + vessel.plating.post_dissociation_stress);
    let upr_base = 1.0 + 2.5 * vessel.axes.er_stress;
    let trafficking_base = 1.0 - 0.6 * vessel.axes.transport_dysfunction;
    let dna_occ = dna_damage_occupancy(vessel, engine)?;
    let gamma_intensity_base = 1.0 + 4.0 * dna_occ;
    let gamma_pct_base = (0.02 + 0.88 * dna_occ).clamp(0.0, 1.0);

    let scalars = ScalarBundle {
        atp: atp_base * tech * ctx.lot_bias(ScalarAssay::Atp) * noise(&mut rng, cv.atp),
        ldh: ldh_base * tech * ctx.lot_bias(ScalarAssay::Ldh) * noise(&mut rng, cv.ldh),
        upr: upr_base * tech * ctx.lot_bias(ScalarAssay::Upr) * noise(&mut rng, cv.upr),
        trafficking: trafficking_base
            * tech
            * ctx.lot_bias(ScalarAssay::Trafficking)
            * noise(&mut rng, cv.trafficking),
        gamma_h2ax_intensity: gamma_intensity_base
            * tech
            * ctx.lot_bias(ScalarAssay::GammaH2ax)
            * noise(&mut rng, cv.gamma_h2ax),
        gamma_h2ax_pct_positive: (gamma_pct_base * noise(&mut rng, cv.gamma_h2ax))
            .clamp(0.0, 1.0),
        gamma_h2ax_fold: gamma_intensity_base * noise(&mut rng, cv.gamma_h2ax),
    };

    Ok(ObservationRecord {
        vessel_id: vessel.vessel_id.clone(),
        cell_line_id: vessel.cell_line_id.clone(),
        time_h: engine.sim_time_h(),
        plate_id: well.plate_id.clone(),
        well_pos: well.well_pos.clone(),
        day: well.day,
        operator: well.operator.clone(),
        is_edge_well: is_edge,
        scalars: Some(scalars),
        morphology: None,
    })
}

/// Run the cell painting panel on one well.
///
/// Per-channel intensity is the per-cell baseline times
/// `(1 + Σ stress-axis effects)`, the run-level channel bias, the shared
/// illumination bias and a batch-keyed pipeline transform.
pub fn cell_painting_assay(
    engine: &VesselEngine,
    vessel_id: &str,
    well: &WellContext,
) -> Result<ObservationRecord> {
    let vessel = engine.vessel(vessel_id)?;
    let ctx = engine.ctx();
    let line = engine.params().cell_line(&vessel.cell_line_id)?;
    let pos = WellPos::parse(&well.well_pos, well.format)?;
    let is_edge = pos.is_edge(well.format);

    let effects = stress::channel_effects(vessel, line, engine.params())?;
    let edge_factor = if is_edge { 1.0 - line.edge_penalty } else { 1.0 };
    let pipeline_exp = ctx.pipeline_exponent(&well.batch);
    let mut rng = ctx.measurement_rng(
        "imaging",
        &well.batch,
        &well.plate_id,
        well.day,
        &well.operator,
        &well.well_pos,
    );

    // clumpy monolayers segment worse, inflating imaging noise
    let imaging_cv = line.assay_cv.imaging * (1.0 + 0.5 * vessel.plating.clumpiness);
    let mut measured = [0.0f64; 5];
    for (slot, channel) in measured.iter_mut().zip(Channel::ALL) {
        let physical = channel_baseline(channel)
            * (1.0 + effects.get(channel)).max(0.05)
            * edge_factor;
        let raw = physical
            * ctx.channel_bias(channel)
            * ctx.illumination_bias
            * noise(&mut rng, imaging_cv);
        // batch-dependent feature extraction drift
        *slot = raw.powf(pipeline_exp);
    }

    Ok(ObservationRecord {
        vessel_id: vessel.vessel_id.clone(),
        cell_line_id: vessel.cell_line_id.clone(),
        time_h: engine.sim_time_h(),
        plate_id: well.plate_id.clone(),
        well_pos: well.well_pos.clone(),
        day: well.day,
        operator: well.operator.clone(),
        is_edge_well: is_edge,
        scalars: None,
        morphology: Some(MorphologyBundle {
            er: measured[0],
            mito: measured[1],
            nucleus: measured[2],
            actin: measured[3],
            rna: measured[4],
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContextConfig;
    use crate::params::ParameterStore;

    fn engine(config: RunContextConfig) -> VesselEngine {
        let params = ParameterStore::builtin();
        let ctx = RunContext::sample(42, config);
        VesselEngine::new(params, ctx, "well96").unwrap()
    }

    fn well(pos: &str) -> WellContext {
        WellContext {
            batch: "b0".to_string(),
            plate_id: "P1".to_string(),
            well_pos: pos.to_string(),
            day: 1,
            operator: "op-a".to_string(),
            format: PlateFormat::Plate96,
        }
    }

    #[test]
    fn test_unknown_vessel_is_error() {
        let eng = engine(RunContextConfig::default());
        let err = atp_viability_assay(&eng, "ghost", &well("B2")).unwrap_err();
        assert!(matches!(err, crate::error::KernelError::UnknownVessel(_)));
    }

    #[test]
    fn test_measurement_does_not_mutate_state() {
        let mut eng = engine(RunContextConfig::default());
        eng.seed_vessel("v1", "A549", 1.0e4, 1.0).unwrap();
        let before = eng.vessel("v1").unwrap().clone();
        atp_viability_assay(&eng, "v1", &well("B2")).unwrap();
        cell_painting_assay(&eng, "v1", &well("B2")).unwrap();
        let after = eng.vessel("v1").unwrap();
        assert_eq!(before.viability, after.viability);
        assert_eq!(before.cell_count, after.cell_count);
        assert_eq!(before.ledger, after.ledger);
    }

    #[test]
    fn test_repeated_reads_are_identical() {
        let mut eng = engine(RunContextConfig::default());
        eng.seed_vessel("v1", "A549", 1.0e4, 1.0).unwrap();
        let a = atp_viability_assay(&eng, "v1", &well("B2")).unwrap();
        let b = atp_viability_assay(&eng, "v1", &well("B2")).unwrap();
        let (sa, sb) = (a.scalars.unwrap(), b.scalars.unwrap());
        assert_eq!(sa.atp, sb.atp);
        assert_eq!(sa.ldh, sb.ldh);
        assert_eq!(sa.gamma_h2ax_pct_positive, sb.gamma_h2ax_pct_positive);
    }

    #[test]
    fn test_different_wells_draw_different_noise() {
        let mut eng = engine(RunContextConfig::default());
        eng.seed_vessel("v1", "A549", 1.0e4, 1.0).unwrap();
        let a = atp_viability_assay(&eng, "v1", &well("B2")).unwrap();
        let b = atp_viability_assay(&eng, "v1", &well("B3")).unwrap();
        assert_ne!(a.scalars.unwrap().atp, b.scalars.unwrap().atp);
    }

    #[test]
    fn test_edge_well_penalty_applies() {
        let mut eng = engine(RunContextConfig::silent());
        eng.seed_vessel("v1", "A549", 1.0e4, 1.0).unwrap();
        let interior = atp_viability_assay(&eng, "v1", &well("B2")).unwrap();
        let edge = atp_viability_assay(&eng, "v1", &well("A1")).unwrap();
        assert!(!interior.is_edge_well);
        assert!(edge.is_edge_well);
    }

    #[test]
    fn test_mito_dysfunction_lowers_atp() {
        let mut eng = engine(RunContextConfig::silent());
        eng.seed_vessel("healthy", "iNeuron", 1.0e4, 1.0).unwrap();
        eng.seed_vessel("sick", "iNeuron", 1.0e4, 1.0).unwrap();

        // push the mito axis directly on the snapshot clone path: treat
        // and advance instead, keeping engine ownership honest
        eng.treat_with_compound("sick", "rotenone", 8.0).unwrap();
        eng.advance_time(24.0, 0.5).unwrap();

        let h = atp_viability_assay(&eng, "healthy", &well("B2")).unwrap();
        let s = atp_viability_assay(&eng, "sick", &well("B2")).unwrap();
        assert!(s.scalars.unwrap().atp < h.scalars.unwrap().atp);
    }

    #[test]
    fn test_upr_tracks_er_axis() {
        let mut eng = engine(RunContextConfig::silent());
        eng.seed_vessel("ctl", "A549", 1.0e4, 1.0).unwrap();
        eng.seed_vessel("trt", "A549", 1.0e4, 1.0).unwrap();
        eng.treat_with_compound("trt", "tunicamycin", 6.0).unwrap();
        eng.advance_time(12.0, 0.5).unwrap();

        let ctl = atp_viability_assay(&eng, "ctl", &well("B2")).unwrap();
        let trt = atp_viability_assay(&eng, "trt", &well("B2")).unwrap();
        assert!(trt.scalars.unwrap().upr > ctl.scalars.unwrap().upr);
    }

    #[test]
    fn test_gamma_h2ax_responds_to_dna_damage() {
        let mut eng = engine(RunContextConfig::silent());
        eng.seed_vessel("ctl", "A549", 1.0e4, 1.0).unwrap();
        eng.seed_vessel("trt", "A549", 1.0e4, 1.0).unwrap();
        eng.treat_with_compound("trt", "etoposide", 20.0).unwrap();

        let ctl = atp_viability_assay(&eng, "ctl", &well("B2")).unwrap();
        let trt = atp_viability_assay(&eng, "trt", &well("B2")).unwrap();
        let (sc, st) = (ctl.scalars.unwrap(), trt.scalars.unwrap());
        assert!(st.gamma_h2ax_intensity > sc.gamma_h2ax_intensity);
        assert!(st.gamma_h2ax_pct_positive > sc.gamma_h2ax_pct_positive);
        assert!(st.gamma_h2ax_pct_positive <= 1.0);
    }

    #[test]
    fn test_imaging_and_scalar_share_instrument_drift() {
        // With every other latent silenced, reader gain and illumination
        // bias are the same exp(instrument_shift) factor on both paths.
        let config = RunContextConfig {
            instrument_sigma: 0.3,
            ..RunContextConfig::silent()
        };
        let eng = {
            let params = ParameterStore::builtin();
            let ctx = RunContext::sample(7, config);
            VesselEngine::new(params, ctx, "well96").unwrap()
        };
        assert_eq!(eng.ctx().reader_gain, eng.ctx().illumination_bias);
        assert_ne!(eng.ctx().reader_gain, 1.0);
    }
}
