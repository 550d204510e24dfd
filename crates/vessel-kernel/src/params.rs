//! Read-only parameter catalogue: cell lines, compounds, vessel geometry.
//!
//! The store ships with a built-in catalogue and accepts an optional TOML
//! overlay for site-specific values. Lookup misses are hard errors; the
//! kernel never substitutes defaults for a pair it does not know.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};
use crate::vessel::{DeathBucket, StressAxis};

/// Compound mechanism of action.
///
/// A tagged variant with per-variant tables; there is no inheritance
/// anywhere in the mechanism model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mechanism {
    ErStress,
    Mitochondrial,
    Microtubule,
    Oxidative,
    Proteasome,
    DnaDamage,
}

impl Mechanism {
    /// All mechanisms in canonical order.
    pub const ALL: [Mechanism; 6] = [
        Mechanism::ErStress,
        Mechanism::Mitochondrial,
        Mechanism::Microtubule,
        Mechanism::Oxidative,
        Mechanism::Proteasome,
        Mechanism::DnaDamage,
    ];

    /// Stable wire label.
    pub fn label(&self) -> &'static str {
        match self {
            Mechanism::ErStress => "er_stress",
            Mechanism::Mitochondrial => "mitochondrial",
            Mechanism::Microtubule => "microtubule",
            Mechanism::Oxidative => "oxidative",
            Mechanism::Proteasome => "proteasome",
            Mechanism::DnaDamage => "dna_damage",
        }
    }

    /// Index into per-mechanism arrays.
    pub fn index(&self) -> usize {
        Mechanism::ALL.iter().position(|m| m == self).unwrap_or(0)
    }

    /// The latent axis this mechanism drives, if any.
    ///
    /// Oxidative and DNA-damage stress kill directly without a slow
    /// latent build-up; proteotoxic load from proteasome inhibition
    /// surfaces on the ER axis.
    pub fn target_axis(&self) -> Option<StressAxis> {
        match self {
            Mechanism::ErStress => Some(StressAxis::ErStress),
            Mechanism::Mitochondrial => Some(StressAxis::MitoDysfunction),
            Mechanism::Microtubule => Some(StressAxis::TransportDysfunction),
            Mechanism::Proteasome => Some(StressAxis::ErStress),
            Mechanism::Oxidative | Mechanism::DnaDamage => None,
        }
    }

    /// Ledger bucket credited by this mechanism's direct kill hazard.
    pub fn death_bucket(&self) -> DeathBucket {
        DeathBucket::Compound
    }

    /// Maximum direct kill hazard at saturating dose, per hour.
    pub fn hazard_ceiling_per_h(&self) -> f64 {
        match self {
            Mechanism::ErStress => 0.05,
            Mechanism::Mitochondrial => 0.06,
            // Microtubule death routes through mitotic catastrophe or
            // post-mitotic attrition, not a direct ceiling.
            Mechanism::Microtubule => 0.0,
            Mechanism::Oxidative => 0.12,
            Mechanism::Proteasome => 0.07,
            Mechanism::DnaDamage => 0.08,
        }
    }

    /// Dose (as a multiple of adjusted IC50) above which the mechanism
    /// has an instant-kill component, e.g. supra-lethal oxidants.
    pub fn instant_kill_multiple(&self) -> Option<f64> {
        match self {
            Mechanism::Oxidative => Some(30.0),
            _ => None,
        }
    }

    /// Latent-axis rise rate at full occupancy, per hour.
    pub fn axis_rate_per_h(&self) -> f64 {
        match self {
            Mechanism::ErStress => 0.12,
            Mechanism::Mitochondrial => 0.09,
            // Tuned so saturating microtubule stress reaches ~0.8
            // transport dysfunction by 24 h.
            Mechanism::Microtubule => 0.067,
            Mechanism::Proteasome => 0.08,
            Mechanism::Oxidative | Mechanism::DnaDamage => 0.0,
        }
    }
}

/// Provenance of a catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    LiteratureConsensus,
    Estimated,
    NeedsValidation,
}

/// Per-mechanism sensitivity multipliers for one cell line.
///
/// Multipliers below 1.0 mean the line is *more* sensitive: adjusted
/// IC50s and latent death thresholds shift down, so the sensitive
/// population dies earlier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityProfile([f64; 6]);

impl SensitivityProfile {
    /// Uniform profile (all multipliers 1.0).
    pub fn uniform() -> Self {
        SensitivityProfile([1.0; 6])
    }

    /// Build from explicit per-mechanism multipliers in canonical order.
    pub fn new(multipliers: [f64; 6]) -> Self {
        SensitivityProfile(multipliers)
    }

    /// Multiplier for a mechanism.
    pub fn multiplier(&self, mechanism: Mechanism) -> f64 {
        self.0[mechanism.index()]
    }

    /// Replace one multiplier, returning the modified profile.
    pub fn with(mut self, mechanism: Mechanism, multiplier: f64) -> Self {
        self.0[mechanism.index()] = multiplier;
        self
    }
}

/// Coefficients of variation for each assay readout of a cell line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssayCvs {
    pub atp: f64,
    pub ldh: f64,
    pub upr: f64,
    pub trafficking: f64,
    pub gamma_h2ax: f64,
    pub imaging: f64,
}

impl Default for AssayCvs {
    fn default() -> Self {
        Self {
            atp: 0.06,
            ldh: 0.08,
            upr: 0.10,
            trafficking: 0.09,
            gamma_h2ax: 0.12,
            imaging: 0.03,
        }
    }
}

/// Growth and stress parameters for one cell line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellLineParams {
    pub id: String,
    /// Population doubling time in hours; ignored for post-mitotic lines
    pub doubling_time_h: f64,
    /// Confluence at which growth stalls and over-confluence death begins
    pub max_confluence: f64,
    /// Fraction of plated cells that attach and survive seeding
    pub seeding_efficiency: f64,
    /// Kill fraction applied to the target on passage
    pub passage_stress: f64,
    /// Background attrition rate, per hour
    pub senescence_rate_per_h: f64,
    /// Multiplicative signal penalty in edge wells
    pub edge_penalty: f64,
    /// Post-mitotic lines never divide and cannot undergo mitotic
    /// catastrophe
    pub post_mitotic: bool,
    /// Per-mechanism sensitivity multipliers
    pub sensitivity: SensitivityProfile,
    /// Per-assay noise levels
    pub assay_cv: AssayCvs,
    /// Default morphology EC50 as a fraction of the viability IC50,
    /// used when the compound carries no per-line override
    pub morph_ec50_fraction: f64,
    pub verification: VerificationStatus,
}

/// A compound and its dose-response parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compound {
    pub id: String,
    /// Baseline IC50 in micromolar, before cell-line adjustment
    pub ic50_um_baseline: f64,
    pub hill_slope: f64,
    pub mechanism: Mechanism,
    /// Per-cell-line morphology EC50 fraction overrides
    pub morph_ec50_fraction_by_line: HashMap<String, f64>,
    /// Scales the slow-burn death rate for post-mitotic lines
    pub attrition_rate: f64,
    pub verification: VerificationStatus,
}

impl Compound {
    /// Morphology EC50 fraction for a line, falling back to the line's
    /// own default.
    pub fn morph_ec50_fraction(&self, line: &CellLineParams) -> f64 {
        self.morph_ec50_fraction_by_line
            .get(&line.id)
            .copied()
            .unwrap_or(line.morph_ec50_fraction)
    }
}

/// Vessel geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VesselType {
    pub id: String,
    pub area_cm2: f64,
    pub working_volume_ml: f64,
    /// Cell count at 100% confluence
    pub capacity_cells: f64,
    pub verification: VerificationStatus,
}

/// Recommended seeding density for a (cell line, vessel type) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedingDensity {
    pub cell_line: String,
    pub vessel_type: String,
    pub cells_per_cm2: f64,
}

/// TOML overlay file schema.
#[derive(Debug, Default, Deserialize)]
struct CatalogueOverlay {
    #[serde(default)]
    cell_lines: Vec<CellLineParams>,
    #[serde(default)]
    compounds: Vec<Compound>,
    #[serde(default)]
    vessel_types: Vec<VesselType>,
    #[serde(default)]
    ic50_um: Vec<Ic50Entry>,
}

/// One row of the compound × cell-line IC50 table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ic50Entry {
    pub compound: String,
    pub cell_line: String,
    pub ic50_um: f64,
    pub verification: VerificationStatus,
}

/// Read-only lookup over the full parameter catalogue.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    cell_lines: HashMap<String, CellLineParams>,
    compounds: HashMap<String, Compound>,
    vessel_types: HashMap<String, VesselType>,
    seeding: Vec<SeedingDensity>,
    ic50_pairs: HashMap<(String, String), f64>,
}

impl ParameterStore {
    /// The built-in catalogue: three reference lines and one probe
    /// compound per mechanism.
    pub fn builtin() -> Self {
        let mut store = Self {
            cell_lines: HashMap::new(),
            compounds: HashMap::new(),
            vessel_types: HashMap::new(),
            seeding: Vec::new(),
            ic50_pairs: HashMap::new(),
        };

        store.insert_cell_line(CellLineParams {
            id: "A549".to_string(),
            doubling_time_h: 22.0,
            max_confluence: 0.95,
            seeding_efficiency: 0.90,
            passage_stress: 0.04,
            senescence_rate_per_h: 2.0e-4,
            edge_penalty: 0.08,
            post_mitotic: false,
            sensitivity: SensitivityProfile::uniform(),
            assay_cv: AssayCvs::default(),
            morph_ec50_fraction: 0.5,
            verification: VerificationStatus::LiteratureConsensus,
        });
        store.insert_cell_line(CellLineParams {
            id: "HepG2".to_string(),
            doubling_time_h: 34.0,
            max_confluence: 0.92,
            seeding_efficiency: 0.85,
            passage_stress: 0.06,
            senescence_rate_per_h: 3.0e-4,
            edge_penalty: 0.10,
            post_mitotic: false,
            sensitivity: SensitivityProfile::uniform()
                .with(Mechanism::Mitochondrial, 0.8)
                .with(Mechanism::Oxidative, 0.9),
            assay_cv: AssayCvs::default(),
            morph_ec50_fraction: 0.5,
            verification: VerificationStatus::LiteratureConsensus,
        });
        store.insert_cell_line(CellLineParams {
            id: "iNeuron".to_string(),
            doubling_time_h: f64::INFINITY,
            max_confluence: 0.85,
            seeding_efficiency: 0.70,
            passage_stress: 0.12,
            senescence_rate_per_h: 1.0e-4,
            edge_penalty: 0.15,
            post_mitotic: true,
            sensitivity: SensitivityProfile::uniform()
                .with(Mechanism::ErStress, 0.8)
                .with(Mechanism::Microtubule, 0.7),
            assay_cv: AssayCvs {
                imaging: 0.03,
                ..AssayCvs::default()
            },
            // Stem-cell-derived neurons show morphology collapse well
            // below the viability IC50 under cytoskeletal stress.
            morph_ec50_fraction: 0.3,
            verification: VerificationStatus::Estimated,
        });

        store.insert_compound(Compound {
            id: "tunicamycin".to_string(),
            ic50_um_baseline: 1.2,
            hill_slope: 1.6,
            mechanism: Mechanism::ErStress,
            morph_ec50_fraction_by_line: HashMap::new(),
            attrition_rate: 0.05,
            verification: VerificationStatus::LiteratureConsensus,
        });
        store.insert_compound(Compound {
            id: "rotenone".to_string(),
            ic50_um_baseline: 0.8,
            hill_slope: 1.4,
            mechanism: Mechanism::Mitochondrial,
            morph_ec50_fraction_by_line: HashMap::new(),
            attrition_rate: 0.08,
            verification: VerificationStatus::Verified,
        });
        store.insert_compound(Compound {
            id: "nocodazole".to_string(),
            ic50_um_baseline: 0.6,
            hill_slope: 2.0,
            mechanism: Mechanism::Microtubule,
            morph_ec50_fraction_by_line: HashMap::from([(
                "iNeuron".to_string(),
                0.3,
            )]),
            attrition_rate: 0.25,
            verification: VerificationStatus::LiteratureConsensus,
        });
        store.insert_compound(Compound {
            id: "menadione".to_string(),
            ic50_um_baseline: 12.0,
            hill_slope: 1.2,
            mechanism: Mechanism::Oxidative,
            morph_ec50_fraction_by_line: HashMap::new(),
            attrition_rate: 0.05,
            verification: VerificationStatus::Estimated,
        });
        store.insert_compound(Compound {
            id: "bortezomib".to_string(),
            ic50_um_baseline: 0.02,
            hill_slope: 1.8,
            mechanism: Mechanism::Proteasome,
            morph_ec50_fraction_by_line: HashMap::new(),
            attrition_rate: 0.06,
            verification: VerificationStatus::Verified,
        });
        store.insert_compound(Compound {
            id: "etoposide".to_string(),
            ic50_um_baseline: 4.0,
            hill_slope: 1.1,
            mechanism: Mechanism::DnaDamage,
            morph_ec50_fraction_by_line: HashMap::new(),
            attrition_rate: 0.04,
            verification: VerificationStatus::LiteratureConsensus,
        });

        store.insert_vessel_type(VesselType {
            id: "well96".to_string(),
            area_cm2: 0.32,
            working_volume_ml: 0.2,
            capacity_cells: 4.0e4,
            verification: VerificationStatus::Verified,
        });
        store.insert_vessel_type(VesselType {
            id: "well384".to_string(),
            area_cm2: 0.056,
            working_volume_ml: 0.05,
            capacity_cells: 7.0e3,
            verification: VerificationStatus::Verified,
        });
        store.insert_vessel_type(VesselType {
            id: "flask_t75".to_string(),
            area_cm2: 75.0,
            working_volume_ml: 12.0,
            capacity_cells: 9.0e6,
            verification: VerificationStatus::Verified,
        });

        store.seeding = vec![
            SeedingDensity {
                cell_line: "A549".to_string(),
                vessel_type: "well96".to_string(),
                cells_per_cm2: 3.0e4,
            },
            SeedingDensity {
                cell_line: "HepG2".to_string(),
                vessel_type: "well96".to_string(),
                cells_per_cm2: 5.0e4,
            },
            SeedingDensity {
                cell_line: "iNeuron".to_string(),
                vessel_type: "well96".to_string(),
                cells_per_cm2: 8.0e4,
            },
            SeedingDensity {
                cell_line: "A549".to_string(),
                vessel_type: "well384".to_string(),
                cells_per_cm2: 3.0e4,
            },
            SeedingDensity {
                cell_line: "HepG2".to_string(),
                vessel_type: "well384".to_string(),
                cells_per_cm2: 5.0e4,
            },
            SeedingDensity {
                cell_line: "iNeuron".to_string(),
                vessel_type: "well384".to_string(),
                cells_per_cm2: 8.0e4,
            },
        ];

        store
    }

    /// Merge a TOML overlay into the catalogue. Overlay entries replace
    /// built-in entries with the same id.
    pub fn load_overlay(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let overlay: CatalogueOverlay = toml::from_str(&raw)
            .map_err(|e| KernelError::CatalogueParse(e.to_string()))?;

        for line in overlay.cell_lines {
            tracing::debug!(cell_line = %line.id, "overlay cell line");
            self.insert_cell_line(line);
        }
        for compound in overlay.compounds {
            tracing::debug!(compound = %compound.id, "overlay compound");
            self.insert_compound(compound);
        }
        for vessel_type in overlay.vessel_types {
            self.insert_vessel_type(vessel_type);
        }
        for entry in overlay.ic50_um {
            self.ic50_pairs
                .insert((entry.compound, entry.cell_line), entry.ic50_um);
        }
        Ok(())
    }

    /// Register or replace a cell line. External catalogues (the SQL
    /// side of the lab) feed entries in through these before the store
    /// is handed to an engine; after that it is read-only by contract.
    pub fn insert_cell_line(&mut self, line: CellLineParams) {
        self.cell_lines.insert(line.id.clone(), line);
    }

    /// Register or replace a compound.
    pub fn insert_compound(&mut self, compound: Compound) {
        self.compounds.insert(compound.id.clone(), compound);
    }

    /// Register or replace a vessel type.
    pub fn insert_vessel_type(&mut self, vessel_type: VesselType) {
        self.vessel_types.insert(vessel_type.id.clone(), vessel_type);
    }

    /// Look up a cell line.
    pub fn cell_line(&self, id: &str) -> Result<&CellLineParams> {
        self.cell_lines
            .get(id)
            .ok_or_else(|| KernelError::MissingParameter {
                kind: "cell line",
                key: id.to_string(),
            })
    }

    /// Look up a compound.
    pub fn compound(&self, id: &str) -> Result<&Compound> {
        self.compounds
            .get(id)
            .ok_or_else(|| KernelError::MissingParameter {
                kind: "compound",
                key: id.to_string(),
            })
    }

    /// Look up a vessel type.
    pub fn vessel_type(&self, id: &str) -> Result<&VesselType> {
        self.vessel_types
            .get(id)
            .ok_or_else(|| KernelError::MissingParameter {
                kind: "vessel type",
                key: id.to_string(),
            })
    }

    /// Measured IC50 for a (compound, cell line) pair, falling back to
    /// the compound baseline when no pair measurement exists. Both the
    /// compound and the line must exist.
    pub fn ic50_um(&self, compound_id: &str, cell_line_id: &str) -> Result<f64> {
        let compound = self.compound(compound_id)?;
        self.cell_line(cell_line_id)?;
        Ok(self
            .ic50_pairs
            .get(&(compound_id.to_string(), cell_line_id.to_string()))
            .copied()
            .unwrap_or(compound.ic50_um_baseline))
    }

    /// Recommended seeding density, cells per cm².
    pub fn seeding_density(&self, cell_line: &str, vessel_type: &str) -> Result<f64> {
        self.seeding
            .iter()
            .find(|s| s.cell_line == cell_line && s.vessel_type == vessel_type)
            .map(|s| s.cells_per_cm2)
            .ok_or_else(|| KernelError::MissingParameter {
                kind: "seeding density",
                key: format!("{cell_line}/{vessel_type}"),
            })
    }

    /// All known cell line ids, sorted.
    pub fn cell_line_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.cell_lines.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// All known compound ids, sorted.
    pub fn compound_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.compounds.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookups() {
        let store = ParameterStore::builtin();
        assert!(store.cell_line("A549").is_ok());
        assert!(store.compound("nocodazole").is_ok());
        assert!(store.vessel_type("well96").is_ok());
        assert_eq!(
            store.compound("nocodazole").unwrap().mechanism,
            Mechanism::Microtubule
        );
    }

    #[test]
    fn test_missing_pair_is_hard_error() {
        let store = ParameterStore::builtin();
        let err = store.cell_line("U2OS").unwrap_err();
        assert!(matches!(err, KernelError::MissingParameter { .. }));
        let err = store.ic50_um("nocodazole", "U2OS").unwrap_err();
        assert!(matches!(err, KernelError::MissingParameter { .. }));
    }

    #[test]
    fn test_ic50_pair_falls_back_to_baseline() {
        let store = ParameterStore::builtin();
        let baseline = store.compound("rotenone").unwrap().ic50_um_baseline;
        assert_eq!(store.ic50_um("rotenone", "A549").unwrap(), baseline);
    }

    #[test]
    fn test_morph_fraction_override() {
        let store = ParameterStore::builtin();
        let noc = store.compound("nocodazole").unwrap();
        let neuron = store.cell_line("iNeuron").unwrap();
        let a549 = store.cell_line("A549").unwrap();
        assert_eq!(noc.morph_ec50_fraction(neuron), 0.3);
        assert_eq!(noc.morph_ec50_fraction(a549), 0.5);
    }

    #[test]
    fn test_overlay_replaces_entry() {
        let mut store = ParameterStore::builtin();
        let dir = std::env::temp_dir().join(format!(
            "vessel-kernel-overlay-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("overlay.toml");
        std::fs::write(
            &path,
            r#"
[[ic50_um]]
compound = "rotenone"
cell_line = "HepG2"
ic50_um = 0.4
verification = "verified"
"#,
        )
        .unwrap();

        store.load_overlay(&path).unwrap();
        assert_eq!(store.ic50_um("rotenone", "HepG2").unwrap(), 0.4);
        assert_ne!(store.ic50_um("rotenone", "A549").unwrap(), 0.4);
    }

    #[test]
    fn test_sensitivity_profile() {
        let profile = SensitivityProfile::uniform().with(Mechanism::Microtubule, 0.7);
        assert_eq!(profile.multiplier(Mechanism::Microtubule), 0.7);
        assert_eq!(profile.multiplier(Mechanism::ErStress), 1.0);
    }
}
