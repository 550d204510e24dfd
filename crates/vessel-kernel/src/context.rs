//! Per-run instrument, operator and batch latents shared across modalities.
//!
//! A `RunContext` is sampled once from the root seed and is immutable for
//! the rest of the run. The reader gain and the imaging illumination bias
//! are the *same* latent, so on a cursed day scalar and imaging readouts
//! drift together; per-assay reagent-lot shifts are drawn with partial
//! correlation to the cursed latent.
//!
//! Three RNG stream families are derived from the root seed and must
//! never be mixed: physics, measurement and plating.

use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Scalar assays with an independent reagent lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarAssay {
    Atp,
    Ldh,
    Upr,
    Trafficking,
    GammaH2ax,
}

impl ScalarAssay {
    /// All scalar assays in canonical order.
    pub const ALL: [ScalarAssay; 5] = [
        ScalarAssay::Atp,
        ScalarAssay::Ldh,
        ScalarAssay::Upr,
        ScalarAssay::Trafficking,
        ScalarAssay::GammaH2ax,
    ];

    fn index(&self) -> usize {
        ScalarAssay::ALL.iter().position(|a| a == self).unwrap_or(0)
    }
}

/// Imaging channels of the morphology assay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Er,
    Mito,
    Nucleus,
    Actin,
    Rna,
}

impl Channel {
    /// All channels in canonical order.
    pub const ALL: [Channel; 5] = [
        Channel::Er,
        Channel::Mito,
        Channel::Nucleus,
        Channel::Actin,
        Channel::Rna,
    ];

    fn index(&self) -> usize {
        Channel::ALL.iter().position(|c| c == self).unwrap_or(0)
    }
}

/// Magnitudes of the run-level latents. Tests zero individual sigmas to
/// isolate physics from measurement artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContextConfig {
    /// Spread of the instrument drift latent (log scale)
    pub instrument_sigma: f64,
    /// Spread of per-assay reagent-lot shifts (log scale)
    pub lot_sigma: f64,
    /// Correlation of lot shifts with the cursed latent
    pub lot_cursed_rho: f64,
    /// Spread of per-channel imaging biases (log scale)
    pub channel_sigma: f64,
    /// Spread of plate / day / operator / well latents (log scale)
    pub plate_sigma: f64,
    pub day_sigma: f64,
    pub operator_sigma: f64,
    pub well_sigma: f64,
    /// Spread of the run-level EC50 modifier (log scale)
    pub ec50_log_sigma: f64,
    /// Spread of per-compound potency scalars (log scale)
    pub potency_log_sigma: f64,
    /// Spread of the batch pipeline transform exponent
    pub pipeline_drift_sigma: f64,
}

impl Default for RunContextConfig {
    fn default() -> Self {
        Self {
            instrument_sigma: 0.08,
            lot_sigma: 0.06,
            lot_cursed_rho: 0.6,
            channel_sigma: 0.04,
            plate_sigma: 0.04,
            day_sigma: 0.05,
            operator_sigma: 0.03,
            well_sigma: 0.02,
            ec50_log_sigma: 0.10,
            potency_log_sigma: 0.08,
            pipeline_drift_sigma: 0.03,
        }
    }
}

impl RunContextConfig {
    /// All sigmas zero: measurements become noise-free pass-throughs of
    /// physical state. Used by physics-facing tests.
    pub fn silent() -> Self {
        Self {
            instrument_sigma: 0.0,
            lot_sigma: 0.0,
            lot_cursed_rho: 0.6,
            channel_sigma: 0.0,
            plate_sigma: 0.0,
            day_sigma: 0.0,
            operator_sigma: 0.0,
            well_sigma: 0.0,
            ec50_log_sigma: 0.0,
            potency_log_sigma: 0.0,
            pipeline_drift_sigma: 0.0,
        }
    }
}

/// Immutable per-run snapshot of shared measurement latents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    root_seed: u64,
    config: RunContextConfig,
    /// Standard-normal draw behind all correlated drift
    pub cursed_latent: f64,
    /// `instrument_sigma × cursed_latent`
    pub instrument_shift: f64,
    /// `exp(instrument_shift)`; multiplies every scalar readout
    pub reader_gain: f64,
    /// Identical to `reader_gain`: same latent, so scalar and imaging
    /// drift are perfectly correlated
    pub illumination_bias: f64,
    /// Run-level multiplicative modifier folded into adjusted IC50s
    pub ec50_modifier: f64,
    lot_biases: [f64; 5],
    channel_biases: [f64; 5],
}

impl RunContext {
    /// Sample the run context from the root seed.
    pub fn sample(root_seed: u64, config: RunContextConfig) -> Self {
        let mut rng =
            ChaCha12Rng::seed_from_u64(stream_seed(root_seed, &["run-context"]));
        let unit = Normal::new(0.0, 1.0).expect("unit normal");

        let cursed_latent = unit.sample(&mut rng);
        let instrument_shift = config.instrument_sigma * cursed_latent;
        let reader_gain = instrument_shift.exp();

        let rho = config.lot_cursed_rho.clamp(-1.0, 1.0);
        let ortho = (1.0 - rho * rho).sqrt();
        let mut lot_biases = [1.0; 5];
        for slot in &mut lot_biases {
            let z = unit.sample(&mut rng);
            *slot = (config.lot_sigma * (rho * cursed_latent + ortho * z)).exp();
        }

        let mut channel_biases = [1.0; 5];
        for slot in &mut channel_biases {
            *slot = (config.channel_sigma * unit.sample(&mut rng)).exp();
        }

        let ec50_modifier = (config.ec50_log_sigma * unit.sample(&mut rng)).exp();

        tracing::debug!(
            root_seed,
            cursed_latent,
            reader_gain,
            "run context sampled"
        );

        Self {
            root_seed,
            config,
            cursed_latent,
            instrument_shift,
            reader_gain,
            illumination_bias: reader_gain,
            ec50_modifier,
            lot_biases,
            channel_biases,
        }
    }

    /// Root seed this context was derived from.
    pub fn root_seed(&self) -> u64 {
        self.root_seed
    }

    /// Reagent-lot bias for one scalar assay.
    pub fn lot_bias(&self, assay: ScalarAssay) -> f64 {
        self.lot_biases[assay.index()]
    }

    /// Per-channel imaging bias.
    pub fn channel_bias(&self, channel: Channel) -> f64 {
        self.channel_biases[channel.index()]
    }

    /// Per-compound potency scalar, deterministic in (seed, compound).
    pub fn potency_scalar(&self, compound_id: &str) -> f64 {
        let mut rng = ChaCha12Rng::seed_from_u64(stream_seed(
            self.root_seed,
            &["potency", compound_id],
        ));
        let unit = Normal::new(0.0, 1.0).expect("unit normal");
        (self.config.potency_log_sigma * unit.sample(&mut rng)).exp()
    }

    /// Plate latent, keyed `(run_seed, batch, "plate", plate_id)` so a
    /// cursed plate varies between runs instead of being a constant.
    pub fn plate_factor(&self, batch: &str, plate_id: &str) -> f64 {
        self.batch_factor("plate", batch, plate_id, self.config.plate_sigma)
    }

    /// Day latent, keyed `(run_seed, batch, "day", day)`.
    pub fn day_factor(&self, batch: &str, day: u32) -> f64 {
        self.batch_factor("day", batch, &day.to_string(), self.config.day_sigma)
    }

    /// Operator latent, keyed `(run_seed, batch, "operator", operator)`.
    pub fn operator_factor(&self, batch: &str, operator: &str) -> f64 {
        self.batch_factor("operator", batch, operator, self.config.operator_sigma)
    }

    /// Well latent, keyed by plate and position.
    pub fn well_factor(&self, batch: &str, plate_id: &str, well_pos: &str) -> f64 {
        let mut rng = ChaCha12Rng::seed_from_u64(stream_seed(
            self.root_seed,
            &["measurement", "well", batch, plate_id, well_pos],
        ));
        let unit = Normal::new(0.0, 1.0).expect("unit normal");
        (self.config.well_sigma * unit.sample(&mut rng)).exp()
    }

    /// Batch pipeline transform exponent for imaging feature extraction.
    pub fn pipeline_exponent(&self, batch: &str) -> f64 {
        let mut rng = ChaCha12Rng::seed_from_u64(stream_seed(
            self.root_seed,
            &["measurement", "pipeline", batch],
        ));
        let unit = Normal::new(0.0, 1.0).expect("unit normal");
        1.0 + self.config.pipeline_drift_sigma * unit.sample(&mut rng)
    }

    fn batch_factor(&self, field: &str, batch: &str, value: &str, sigma: f64) -> f64 {
        let mut rng = ChaCha12Rng::seed_from_u64(stream_seed(
            self.root_seed,
            &["measurement", field, batch, value],
        ));
        let unit = Normal::new(0.0, 1.0).expect("unit normal");
        (sigma * unit.sample(&mut rng)).exp()
    }

    /// Measurement RNG stream for one well read of one assay.
    /// Re-reading the same state with the same key reproduces identical
    /// noise.
    pub fn measurement_rng(
        &self,
        assay: &str,
        batch: &str,
        plate_id: &str,
        day: u32,
        operator: &str,
        well_pos: &str,
    ) -> ChaCha12Rng {
        ChaCha12Rng::seed_from_u64(stream_seed(
            self.root_seed,
            &[
                "measurement",
                "noise",
                assay,
                batch,
                plate_id,
                &day.to_string(),
                operator,
                well_pos,
            ],
        ))
    }

    /// Plating RNG stream for one vessel, separate from measurement.
    pub fn plating_rng(&self, vessel_id: &str) -> ChaCha12Rng {
        ChaCha12Rng::seed_from_u64(stream_seed(
            self.root_seed,
            &["plating", vessel_id],
        ))
    }
}

/// Derive a labelled stream seed from the root seed.
///
/// FNV-1a over the label parts, then a splitmix64 finalizer so adjacent
/// labels land far apart.
pub fn stream_seed(root: u64, parts: &[&str]) -> u64 {
    let mut h = root ^ 0xcbf2_9ce4_8422_2325;
    for part in parts {
        for byte in part.bytes() {
            h ^= u64::from(byte);
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        // separator so ["ab","c"] differs from ["a","bc"]
        h ^= 0x1f;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let mut z = h.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
