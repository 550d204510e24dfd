//! Governance contract: decision classification and action-intent
//! biasing.
//!
//! Decisions and blockers are plain values, never exceptions. Bias
//! multipliers shape the heuristic score of candidate actions under a
//! `NoCommit`; they never change what is legal.

use serde::{Deserialize, Serialize};

use crate::beliefs::MechanismPosterior;

/// Governance decision over a mechanism call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Commit,
    NoCommit,
    NoDetection,
    BadInput,
}

/// Machine-readable reason a commit is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Blocker {
    LowPosteriorTop,
    HighNuisance,
    BadInput,
}

/// What a candidate action is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionIntent {
    Discriminate,
    ReduceNuisance,
    AmplifySignal,
    Observe,
}

/// Decision thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Minimum top posterior mass to commit
    pub commit_threshold: f64,
    /// Nuisance probability above which commits are blocked
    pub nuisance_threshold: f64,
    /// Evidence strength below which there is nothing to call
    pub detection_floor: f64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            commit_threshold: 0.80,
            nuisance_threshold: 0.30,
            detection_floor: 0.15,
        }
    }
}

/// A decision plus its blocker set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceVerdict {
    pub decision: Decision,
    pub blockers: Vec<Blocker>,
}

impl GovernanceVerdict {
    fn has(&self, blocker: Blocker) -> bool {
        self.blockers.contains(&blocker)
    }
}

/// Classify a `(posterior, nuisance)` pair.
pub fn decide(
    posterior: &MechanismPosterior,
    nuisance_prob: f64,
    evidence_strength: f64,
    config: &GovernanceConfig,
) -> GovernanceVerdict {
    if !posterior.is_valid()
        || !(0.0..=1.0).contains(&nuisance_prob)
        || !evidence_strength.is_finite()
    {
        return GovernanceVerdict {
            decision: Decision::BadInput,
            blockers: vec![Blocker::BadInput],
        };
    }

    if evidence_strength < config.detection_floor {
        return GovernanceVerdict {
            decision: Decision::NoDetection,
            blockers: Vec::new(),
        };
    }

    let mut blockers = Vec::new();
    let (_, top) = posterior.top();
    if top < config.commit_threshold {
        blockers.push(Blocker::LowPosteriorTop);
    }
    if nuisance_prob > config.nuisance_threshold {
        blockers.push(Blocker::HighNuisance);
    }

    let decision = if blockers.is_empty() {
        Decision::Commit
    } else {
        Decision::NoCommit
    };
    GovernanceVerdict { decision, blockers }
}

/// Score multiplier for a candidate intent under the current verdict.
///
/// Nuisance dominates: when both blockers are present the nuisance row
/// applies. Under a lone low posterior, amplification is only favoured
/// while the evidence itself is still weak.
pub fn bias_multiplier(
    verdict: &GovernanceVerdict,
    intent: ActionIntent,
    evidence_strength: f64,
) -> f64 {
    if verdict.decision != Decision::NoCommit {
        return 1.0;
    }
    let high_nuisance = verdict.has(Blocker::HighNuisance);
    let low_top = verdict.has(Blocker::LowPosteriorTop);

    if high_nuisance {
        match intent {
            ActionIntent::ReduceNuisance => 3.0,
            ActionIntent::Discriminate => 0.5,
            ActionIntent::Observe => 1.5,
            ActionIntent::AmplifySignal => 0.3,
        }
    } else if low_top {
        match intent {
            ActionIntent::ReduceNuisance => 1.0,
            ActionIntent::Discriminate => 2.5,
            ActionIntent::Observe => 2.0,
            ActionIntent::AmplifySignal => {
                if evidence_strength < 0.5 {
                    1.5
                } else {
                    1.0
                }
            }
        }
    } else {
        1.0
    }
}
