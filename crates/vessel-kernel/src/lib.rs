//! Deterministic vessel-level simulator for cultured cell populations
//! under chemical perturbation.
//!
//! The kernel advances vessel viability under competing death hazards
//! while preserving strict conservation laws and attribution provenance,
//! renders physical state into fallible scalar and imaging readouts with
//! correlated instrument drift, and maintains the df-earned noise gate
//! that the epistemic harness builds its governance on.
//!
//! Everything in this crate is single-threaded and deterministic in the
//! root seed: physics, measurement and plating randomness live on
//! separate labelled streams that must never be mixed.

pub mod calibration;
pub mod context;
pub mod error;
pub mod observe;
pub mod params;
pub mod physics;
pub mod plate;
pub mod stress;
pub mod vessel;

pub use calibration::{CalibrationPlan, GateState, NoiseGate, NoiseGateConfig};
pub use context::{Channel, RunContext, RunContextConfig, ScalarAssay};
pub use error::{ConservationReceipt, KernelError, Result};
pub use observe::{MorphologyBundle, ObservationRecord, ScalarBundle, WellContext};
pub use params::{CellLineParams, Compound, Mechanism, ParameterStore, VerificationStatus};
pub use physics::VesselEngine;
pub use plate::{PlateFormat, WellPos, WellRecord};
pub use vessel::{DeathBucket, DeathLedger, StressAxis, VesselState};
