//! Vessel state: population, death ledger, latent axes, particles.
//!
//! A `VesselState` is exclusively owned by the physics engine. The death
//! ledger attributes every unit of lost viable mass to a cause; the
//! invariants below are checked after every mutation and a violation is
//! a hard error carrying a full receipt.

use std::collections::BTreeMap;

use rand::Rng;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ConservationReceipt, KernelError, Result};

/// Tolerance for ledger and particle sync checks.
pub const LEDGER_EPSILON: f64 = 1e-9;

/// Latent slow cellular-state axes, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressAxis {
    ErStress,
    MitoDysfunction,
    TransportDysfunction,
}

/// Current values of the latent stress axes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StressAxes {
    pub er_stress: f64,
    pub mito_dysfunction: f64,
    pub transport_dysfunction: f64,
}

impl StressAxes {
    /// Read one axis.
    pub fn get(&self, axis: StressAxis) -> f64 {
        match axis {
            StressAxis::ErStress => self.er_stress,
            StressAxis::MitoDysfunction => self.mito_dysfunction,
            StressAxis::TransportDysfunction => self.transport_dysfunction,
        }
    }

    /// Write one axis, clamped to [0, 1].
    pub fn set(&mut self, axis: StressAxis, value: f64) {
        let v = value.clamp(0.0, 1.0);
        match axis {
            StressAxis::ErStress => self.er_stress = v,
            StressAxis::MitoDysfunction => self.mito_dysfunction = v,
            StressAxis::TransportDysfunction => self.transport_dysfunction = v,
        }
    }
}

/// Creditable death buckets. `death_unattributed` is derived bookkeeping
/// and is never credited directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathBucket {
    Compound,
    Starvation,
    MitoticCatastrophe,
    ErStress,
    MitoDysfunction,
    Confluence,
    Unknown,
}

/// Cumulative death attribution, all fractions of initial viable mass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeathLedger {
    pub death_compound: f64,
    pub death_starvation: f64,
    pub death_mitotic_catastrophe: f64,
    pub death_er_stress: f64,
    pub death_mito_dysfunction: f64,
    pub death_confluence: f64,
    pub death_unknown: f64,
    /// Residual for unknown-unknowns: `(1 − viability) − Σ credited`,
    /// recomputed, never negative.
    pub death_unattributed: f64,
}

impl DeathLedger {
    /// Credit a realized kill fraction to a bucket.
    pub fn credit(&mut self, bucket: DeathBucket, amount: f64) {
        debug_assert!(amount >= 0.0, "negative death credit");
        match bucket {
            DeathBucket::Compound => self.death_compound += amount,
            DeathBucket::Starvation => self.death_starvation += amount,
            DeathBucket::MitoticCatastrophe => self.death_mitotic_catastrophe += amount,
            DeathBucket::ErStress => self.death_er_stress += amount,
            DeathBucket::MitoDysfunction => self.death_mito_dysfunction += amount,
            DeathBucket::Confluence => self.death_confluence += amount,
            DeathBucket::Unknown => self.death_unknown += amount,
        }
    }

    /// Sum of all credited buckets, `death_unknown` included and
    /// `death_unattributed` excluded.
    pub fn credited_total(&self) -> f64 {
        self.death_compound
            + self.death_starvation
            + self.death_mitotic_catastrophe
            + self.death_er_stress
            + self.death_mito_dysfunction
            + self.death_confluence
            + self.death_unknown
    }

    /// Recompute the unattributed residual against a viability.
    pub fn recompute_unattributed(&mut self, viability: f64) {
        self.death_unattributed = ((1.0 - viability) - self.credited_total()).max(0.0);
    }
}

/// One hazard term proposed for a sub-step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardTerm {
    /// Stable label for receipts and scratch inspection
    pub label: String,
    /// Bucket credited by this term's share of the realized kill
    pub bucket: DeathBucket,
    /// Instantaneous rate, per hour, non-negative
    pub rate_per_h: f64,
}

/// An epistemic particle. All particle viabilities are synced to the
/// vessel viability (physical-mixture regime); particles carry a
/// back-index into the vessel's particle list, never owning pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Particle {
    pub name: String,
    pub weight: f64,
    pub viability: f64,
}

/// Plating context sampled once on seed or passage. Shapes how the
/// population *reads* (debris in the supernatant, clumpy segmentation)
/// without touching the physics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatingContext {
    pub post_dissociation_stress: f64,
    pub clumpiness: f64,
}

impl PlatingContext {
    /// Draw a fresh plating context from the plating RNG stream.
    pub fn sample(rng: &mut ChaCha12Rng) -> Self {
        Self {
            post_dissociation_stress: rng.random::<f64>() * 0.10,
            clumpiness: rng.random::<f64>() * 0.5,
        }
    }
}

/// Recorded compound exposure. The adjusted IC50, hill slope and potency
/// scalar are fixed at treatment time; every downstream consumer
/// (hazards and morphology alike) reads these stored values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundExposure {
    pub dose_um: f64,
    pub start_time_h: f64,
    pub ic50_um_adjusted: f64,
    pub hill_slope: f64,
    pub potency_scalar: f64,
}

/// Scratch fields recomputed each sub-step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepScratch {
    pub kill_total: f64,
    pub hazards: Vec<HazardTerm>,
}

/// Full state of one logical well or flask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VesselState {
    pub vessel_id: String,
    pub cell_line_id: String,
    pub seed_time_h: f64,
    pub last_update_time_h: f64,
    pub last_feed_time_h: f64,

    /// Viable cell count
    pub cell_count: f64,
    pub viability: f64,
    pub confluence: f64,
    /// Cell count at 100% confluence for this vessel's geometry
    pub capacity_cells: f64,

    pub ledger: DeathLedger,
    pub axes: StressAxes,
    /// Keyed by compound id; BTreeMap for deterministic iteration
    pub exposures: BTreeMap<String, CompoundExposure>,
    pub particles: Vec<Particle>,
    pub plating: PlatingContext,
    pub scratch: StepScratch,
}

impl VesselState {
    /// Create a fresh vessel at the given simulated time.
    pub fn new(
        vessel_id: impl Into<String>,
        cell_line_id: impl Into<String>,
        cell_count: f64,
        viability: f64,
        capacity_cells: f64,
        now_h: f64,
        plating: PlatingContext,
    ) -> Self {
        let vessel_id = vessel_id.into();
        let mut vessel = Self {
            vessel_id,
            cell_line_id: cell_line_id.into(),
            seed_time_h: now_h,
            last_update_time_h: now_h,
            last_feed_time_h: now_h,
            cell_count,
            viability,
            confluence: (cell_count / capacity_cells).clamp(0.0, 1.0),
            capacity_cells,
            ledger: DeathLedger::default(),
            axes: StressAxes::default(),
            exposures: BTreeMap::new(),
            particles: vec![Particle {
                name: "root".to_string(),
                weight: 1.0,
                viability,
            }],
            plating,
            scratch: StepScratch::default(),
        };
        vessel.ledger.recompute_unattributed(viability);
        vessel
    }

    /// Sync every particle's viability to the vessel viability.
    pub fn sync_particles(&mut self) {
        for particle in &mut self.particles {
            particle.viability = self.viability;
        }
    }

    /// Replace the particle mixture. Weights must sum to 1; viabilities
    /// are synced on entry.
    pub fn set_particle_mixture(&mut self, named_weights: &[(&str, f64)]) -> Result<()> {
        let total: f64 = named_weights.iter().map(|(_, w)| w).sum();
        if (total - 1.0).abs() > LEDGER_EPSILON {
            return Err(KernelError::InvalidArgument(format!(
                "particle weights sum to {total}, expected 1"
            )));
        }
        self.particles = named_weights
            .iter()
            .map(|(name, weight)| Particle {
                name: (*name).to_string(),
                weight: *weight,
                viability: self.viability,
            })
            .collect();
        Ok(())
    }

    /// Check the conservation invariants. Returns a conservation error
    /// with a full receipt on the first violation. `death_unattributed`
    /// is recomputed here, so callers must invoke this after every
    /// mutation.
    pub fn check_invariants(&mut self) -> Result<()> {
        // Ranges first, so the ledger receipt is built on sane state.
        if !(0.0..=1.0).contains(&self.viability)
            || self.cell_count < 0.0
            || !(0.0..=1.0).contains(&self.confluence)
            || !self.viability.is_finite()
            || !self.cell_count.is_finite()
        {
            return Err(self.violation(format!(
                "state out of range: viability={}, cell_count={}, confluence={}",
                self.viability, self.cell_count, self.confluence
            )));
        }

        // The residual is derived, never stored stale.
        self.ledger.recompute_unattributed(self.viability);

        // Credited buckets never exceed total dead mass.
        let credited = self.ledger.credited_total();
        let allowed = (1.0 - self.viability) + LEDGER_EPSILON;
        if credited > allowed {
            return Err(KernelError::ConservationViolation(Box::new(
                self.receipt(self.viability, 0.0, 0.0),
            )));
        }

        // Physical-mixture regime: all particles track the vessel.
        for particle in &self.particles {
            if (particle.viability - self.viability).abs() >= LEDGER_EPSILON {
                return Err(self.violation(format!(
                    "particle '{}' viability {} diverged from vessel {}",
                    particle.name, particle.viability, self.viability
                )));
            }
        }

        // Particle weights form a distribution.
        let weight_total: f64 = self.particles.iter().map(|p| p.weight).sum();
        if (weight_total - 1.0).abs() > LEDGER_EPSILON {
            return Err(self.violation(format!(
                "particle weights sum to {weight_total}"
            )));
        }

        Ok(())
    }

    /// Build a diagnostic receipt from current state.
    pub fn receipt(&self, v_before: f64, total_hazard: f64, step_h: f64) -> ConservationReceipt {
        ConservationReceipt {
            vessel_id: self.vessel_id.clone(),
            v_before,
            v_after: self.viability,
            total_hazard,
            step_h,
            hazards: self.scratch.hazards.clone(),
            ledger: self.ledger.clone(),
            credited_total: self.ledger.credited_total(),
            allowed: (1.0 - self.viability) + LEDGER_EPSILON,
            note: None,
        }
    }

    fn violation(&self, detail: String) -> KernelError {
        tracing::error!(vessel = %self.vessel_id, %detail, "invariant violated");
        let mut receipt = self.receipt(self.viability, 0.0, 0.0);
        receipt.note = Some(detail);
        KernelError::ConservationViolation(Box::new(receipt))
    }

    /// Hours since the vessel was last fed.
    pub fn hours_since_feed(&self, now_h: f64) -> f64 {
        (now_h - self.last_feed_time_h).max(0.0)
    }
}
