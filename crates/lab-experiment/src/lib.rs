//! Epistemic harness over the vessel kernel.
//!
//! Implements the outer control loop of the virtual laboratory: the
//! mechanism beliefs, the epistemic debt controller with its refusal
//! contract, the governance contract with action-intent biasing, and
//! the append-only run artefacts the loop emits every cycle.

pub mod agent;
pub mod artifacts;
pub mod beliefs;
pub mod controller;
pub mod governance;

pub use agent::{ActionTemplate, AgentConfig, LabAgent};
pub use artifacts::{RunArtifacts, RunStatus, RunSummary};
pub use beliefs::{BeliefState, MechanismPosterior};
pub use controller::{EpistemicController, RefusalEvent, RefusalReason};
pub use governance::{ActionIntent, Blocker, Decision, GovernanceConfig};
