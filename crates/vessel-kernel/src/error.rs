//! Typed error taxonomy shared by the kernel and the experiment harness.
//!
//! Conservation violations carry a full diagnostic receipt and abort the
//! process; they are never recovered from and never renormalized away.
//! Refusals and gate states are *not* errors and live as plain values in
//! the harness crate.

use serde::Serialize;
use thiserror::Error;

use crate::vessel::{DeathLedger, HazardTerm};

/// Diagnostic receipt attached to a conservation failure.
///
/// Contains everything needed to reconstruct the failing sub-step from
/// the outside: the viability transition, the hazard field that drove it,
/// and the complete death ledger at the moment of failure.
#[derive(Debug, Clone, Serialize)]
pub struct ConservationReceipt {
    /// Vessel that failed the check
    pub vessel_id: String,
    /// Viability before the sub-step
    pub v_before: f64,
    /// Viability after the sub-step
    pub v_after: f64,
    /// Summed hazard rate for the sub-step (per hour)
    pub total_hazard: f64,
    /// Sub-step length in hours
    pub step_h: f64,
    /// Every hazard term that contributed to the sub-step
    pub hazards: Vec<HazardTerm>,
    /// Full death ledger at the moment of failure
    pub ledger: DeathLedger,
    /// Sum of all credited buckets
    pub credited_total: f64,
    /// Maximum the credited buckets were allowed to reach
    pub allowed: f64,
    /// Which invariant failed, when it was not the ledger sum itself
    pub note: Option<String>,
}

impl ConservationReceipt {
    /// Render the receipt for the abort path; a receipt that cannot be
    /// serialized still names its vessel.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|_| format!("{{\"vessel_id\":\"{}\"}}", self.vessel_id))
    }
}

/// Errors raised at the kernel boundary.
#[derive(Debug, Error)]
pub enum KernelError {
    /// A death-ledger invariant was broken. The simulator is broken;
    /// callers must abort, not retry.
    #[error(
        "conservation violated in vessel {}: credited {:.12} exceeds allowed {:.12}",
        .0.vessel_id, .0.credited_total, .0.allowed
    )]
    ConservationViolation(Box<ConservationReceipt>),

    /// A catalogue lookup missed. No silent defaults.
    #[error("missing parameter: {kind} for '{key}'")]
    MissingParameter {
        /// Which table missed (cell line, compound, vessel type, ...)
        kind: &'static str,
        /// The key that was looked up
        key: String,
    },

    /// A measurement or operator action referenced a vessel that does
    /// not exist.
    #[error("unknown vessel: '{0}'")]
    UnknownVessel(String),

    /// Temporal provenance violation: a ledger append went backwards or
    /// a required log record is missing.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A plate design broke a structural guarantee (duplicate position,
    /// position outside the declared format).
    #[error("plate design error: {0}")]
    Design(String),

    /// Malformed caller input (negative dose, zero step size, duplicate
    /// vessel id, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Artefact or catalogue IO failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalogue overlay failed to parse.
    #[error("catalogue parse error: {0}")]
    CatalogueParse(String),
}

/// Kernel result alias.
pub type Result<T> = std::result::Result<T, KernelError>;
