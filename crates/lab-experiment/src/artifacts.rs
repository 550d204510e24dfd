//! Append-only run artefacts: decision, evidence, diagnostic and
//! refusal ledgers plus the run summary.
//!
//! Consumers read the JSONL files in order and must treat them as the
//! single source of truth. Cycle numbers in the decision and evidence
//! ledgers are strictly monotonic; a stale append is refused at write
//! time with an integrity error.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vessel_kernel::calibration::CalibrationPlan;
use vessel_kernel::error::{KernelError, Result};

use crate::controller::RefusalEvent;

/// Why a candidate was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    MustCalibrate,
    GateLock,
    Scoring,
    Abort,
}

/// Where in the gate lifecycle a decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    PreGate,
    InGate,
    GateRevoked,
    IntegrityError,
    Aborted,
}

impl Regime {
    /// Stable wire label.
    pub fn label(&self) -> &'static str {
        match self {
            Regime::PreGate => "pre_gate",
            Regime::InGate => "in_gate",
            Regime::GateRevoked => "gate_revoked",
            Regime::IntegrityError => "integrity_error",
            Regime::Aborted => "aborted",
        }
    }
}

/// Terminal classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    GateEarned,
    Aborted,
    IntegrityError,
    CompletedNoGate,
    Legacy,
}

/// The candidate actually selected in a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub forced: bool,
    pub trigger: Trigger,
    pub regime: Regime,
    pub gate_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_plan: Option<CalibrationPlan>,
}

/// One decision per cycle, appended to `<run>_decisions.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub cycle: u64,
    pub selected_template: String,
    pub selected_candidate: CandidateRecord,
    pub reason: String,
    pub epistemically_contaminated: bool,
}

/// One belief update, appended to `<run>_evidence.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceEvent {
    pub cycle: u64,
    pub evidence_time_h: f64,
    pub posterior: BTreeMap<String, f64>,
    pub top_mechanism: String,
    pub top_posterior: f64,
    pub nuisance_prob: f64,
    pub entropy_bits: f64,
    pub epistemically_contaminated: bool,
}

/// Per-cycle noise metrics, appended to `<run>_diagnostics.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsEvent {
    pub cycle: u64,
    pub rel_width: Option<f64>,
    pub pooled_sigma: Option<f64>,
    pub df: u64,
    pub gate_state: String,
    pub epistemically_contaminated: bool,
}

/// Run summary, written once to `<run>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub root_seed: u64,
    pub status: RunStatus,
    pub regime_summary: BTreeMap<String, u64>,
    pub budget_initial_wells: f64,
    pub budget_remaining_wells: f64,
    pub cycles_completed: u64,
    pub gate_slack: Option<f64>,
    pub time_in_gate_percent: f64,
    pub debt_bits_final: f64,
    pub contamination_flags: Vec<String>,
    pub started_at: String,
    pub completed_at: String,
}

/// One append-only JSONL ledger with optional cycle monotonicity.
struct AppendLog {
    path: PathBuf,
    writer: BufWriter<File>,
    last_cycle: Option<u64>,
    strict: bool,
}

impl AppendLog {
    fn create(path: PathBuf, strict: bool) -> Result<Self> {
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            last_cycle: None,
            strict,
        })
    }

    fn append<T: Serialize>(&mut self, cycle: u64, event: &T) -> Result<()> {
        if let Some(last) = self.last_cycle {
            let stale = if self.strict { cycle <= last } else { cycle < last };
            if stale {
                return Err(KernelError::Integrity(format!(
                    "cycle {cycle} not after {last} in {}",
                    self.path.display()
                )));
            }
        }
        let line = serde_json::to_string(event)
            .map_err(|e| KernelError::Integrity(e.to_string()))?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        self.last_cycle = Some(cycle);
        Ok(())
    }
}

/// All ledgers of one run.
pub struct RunArtifacts {
    dir: PathBuf,
    run_name: String,
    decisions: AppendLog,
    evidence: AppendLog,
    diagnostics: AppendLog,
    refusals: AppendLog,
}

impl RunArtifacts {
    /// Create the artefact set under `dir`, truncating any previous run
    /// of the same name.
    pub fn create(dir: impl AsRef<Path>, run_name: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let log = |suffix: &str, strict: bool| -> Result<AppendLog> {
            AppendLog::create(dir.join(format!("{run_name}_{suffix}.jsonl")), strict)
        };
        Ok(Self {
            decisions: log("decisions", true)?,
            evidence: log("evidence", true)?,
            diagnostics: log("diagnostics", true)?,
            // a cycle may refuse biology and then fall back, so the
            // refusal ledger is only non-decreasing
            refusals: log("refusals", false)?,
            dir,
            run_name: run_name.to_string(),
        })
    }

    /// Append one decision event.
    pub fn append_decision(&mut self, event: &DecisionEvent) -> Result<()> {
        self.decisions.append(event.cycle, event)
    }

    /// Append one evidence event. Requires a finite, non-negative
    /// evidence time.
    pub fn append_evidence(&mut self, event: &EvidenceEvent) -> Result<()> {
        if !event.evidence_time_h.is_finite() || event.evidence_time_h < 0.0 {
            return Err(KernelError::Integrity(format!(
                "bad evidence_time_h {}",
                event.evidence_time_h
            )));
        }
        self.evidence.append(event.cycle, event)
    }

    /// Append one diagnostics event.
    pub fn append_diagnostics(&mut self, event: &DiagnosticsEvent) -> Result<()> {
        self.diagnostics.append(event.cycle, event)
    }

    /// Append one refusal event.
    pub fn append_refusal(&mut self, event: &RefusalEvent) -> Result<()> {
        self.refusals.append(event.cycle, event)
    }

    /// Write the run summary.
    pub fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        let path = self.dir.join(format!("{}.json", self.run_name));
        let json = serde_json::to_string_pretty(summary)
            .map_err(|e| KernelError::Integrity(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Path of one ledger file.
    pub fn ledger_path(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}_{suffix}.jsonl", self.run_name))
    }

    /// Path of the run summary.
    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.run_name))
    }
}
