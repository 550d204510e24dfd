//! Outer epistemic loop: a flat state machine alternating physics,
//! observation, calibration, belief update, governance and action.
//!
//! Every cycle consumes one full integer cycle number. Operator bench
//! time returned by engine actions is charged into simulated time here;
//! the engine itself never advances its clock for operator work.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use vessel_kernel::calibration::{
    recommend_batch, CalibrationPlan, GateState, NoiseGate, NoiseGateConfig,
};
use vessel_kernel::context::{RunContext, RunContextConfig};
use vessel_kernel::error::KernelError;
use vessel_kernel::observe::{
    atp_viability_assay, cell_painting_assay, MorphologyBundle, WellContext,
};
use vessel_kernel::params::ParameterStore;
use vessel_kernel::physics::VesselEngine;
use vessel_kernel::plate::PlateFormat;

use crate::artifacts::{
    CandidateRecord, DecisionEvent, DiagnosticsEvent, EvidenceEvent, Regime,
    RunArtifacts, RunStatus, RunSummary, Trigger,
};
use crate::beliefs::BeliefState;
use crate::controller::EpistemicController;
use crate::governance::{
    bias_multiplier, decide, ActionIntent, Decision, GovernanceConfig,
    GovernanceVerdict,
};

/// Fixed plate cost used for calibration batch sizing, in wells.
const FIXED_PLATE_COST_WELLS: f64 = 30.0;
/// Marginal well cost for calibration batch sizing.
const PER_WELL_COST: f64 = 1.0;

/// Action templates available to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTemplate {
    BaselineReplicates,
    DoseResponse,
    MechanismProbe,
    WashoutDiscriminator,
    ImagingPanel,
    Hold,
}

impl ActionTemplate {
    /// Biology templates scored against each other once the gate is
    /// earned.
    const SCORED: [ActionTemplate; 5] = [
        ActionTemplate::DoseResponse,
        ActionTemplate::MechanismProbe,
        ActionTemplate::WashoutDiscriminator,
        ActionTemplate::ImagingPanel,
        ActionTemplate::Hold,
    ];

    /// Stable wire name.
    pub fn name(&self) -> &'static str {
        match self {
            ActionTemplate::BaselineReplicates => "baseline_replicates",
            ActionTemplate::DoseResponse => "dose_response",
            ActionTemplate::MechanismProbe => "mechanism_probe",
            ActionTemplate::WashoutDiscriminator => "washout_discriminator",
            ActionTemplate::ImagingPanel => "imaging_panel",
            ActionTemplate::Hold => "hold",
        }
    }

    /// What the template is trying to do.
    pub fn intent(&self) -> ActionIntent {
        match self {
            ActionTemplate::BaselineReplicates => ActionIntent::ReduceNuisance,
            ActionTemplate::DoseResponse => ActionIntent::AmplifySignal,
            ActionTemplate::MechanismProbe => ActionIntent::Discriminate,
            ActionTemplate::WashoutDiscriminator => ActionIntent::Discriminate,
            ActionTemplate::ImagingPanel => ActionIntent::Observe,
            ActionTemplate::Hold => ActionIntent::Observe,
        }
    }

    /// Whether the template counts as calibration for the refusal
    /// contract.
    pub fn is_calibration(&self) -> bool {
        matches!(self, ActionTemplate::BaselineReplicates)
    }

    /// Nominal well cost before debt inflation.
    pub fn base_cost_wells(&self) -> f64 {
        match self {
            ActionTemplate::BaselineReplicates => 12.0,
            ActionTemplate::DoseResponse => 20.0,
            ActionTemplate::MechanismProbe => 10.0,
            ActionTemplate::WashoutDiscriminator => 8.0,
            ActionTemplate::ImagingPanel => 6.0,
            ActionTemplate::Hold => 0.0,
        }
    }

    /// Prior utility before intent biasing.
    fn base_score(&self) -> f64 {
        match self {
            ActionTemplate::BaselineReplicates => 0.7,
            ActionTemplate::DoseResponse => 1.2,
            ActionTemplate::MechanismProbe => 1.1,
            ActionTemplate::WashoutDiscriminator => 0.8,
            ActionTemplate::ImagingPanel => 0.9,
            ActionTemplate::Hold => 0.1,
        }
    }

    /// Entropy reduction the agent claims up front, bits.
    fn claimed_bits(&self) -> f64 {
        match self {
            ActionTemplate::BaselineReplicates | ActionTemplate::Hold => 0.0,
            ActionTemplate::DoseResponse => 0.9,
            ActionTemplate::MechanismProbe => 0.7,
            ActionTemplate::WashoutDiscriminator => 0.6,
            ActionTemplate::ImagingPanel => 0.3,
        }
    }
}

/// Configuration of one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub root_seed: u64,
    pub budget_wells: f64,
    pub max_cycles: u64,
    pub replicate_group_size: usize,
    pub cell_line: String,
    pub compound: String,
    pub dose_um: f64,
    /// Plate format for every seeded vessel and well read
    pub plate_format: PlateFormat,
    /// Optional TOML overlay merged into the built-in catalogue
    pub params_overlay: Option<PathBuf>,
    pub out_dir: PathBuf,
    pub run_name: String,
    /// Disabling enforcement contaminates the run; the reason is
    /// carried in every artefact.
    pub disable_enforcement: Option<String>,
    pub governance: GovernanceConfig,
    pub gate: NoiseGateConfig,
    pub context: RunContextConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            root_seed: 42,
            budget_wells: 240.0,
            max_cycles: 40,
            replicate_group_size: 6,
            cell_line: "A549".to_string(),
            compound: "rotenone".to_string(),
            dose_um: 5.0,
            plate_format: PlateFormat::Plate96,
            params_overlay: None,
            out_dir: PathBuf::from("runs"),
            run_name: "run".to_string(),
            disable_enforcement: None,
            governance: GovernanceConfig::default(),
            gate: NoiseGateConfig::default(),
            context: RunContextConfig::default(),
        }
    }
}

/// What one cycle decided to do.
struct Selected {
    template: ActionTemplate,
    forced: bool,
    trigger: Trigger,
    plan: Option<CalibrationPlan>,
    reason: String,
}

/// The outer agent.
pub struct LabAgent {
    config: AgentConfig,
    engine: VesselEngine,
    gate: NoiseGate,
    controller: EpistemicController,
    beliefs: BeliefState,
    artifacts: RunArtifacts,
    last_verdict: Option<GovernanceVerdict>,
    regime_counts: BTreeMap<String, u64>,
    cycles_in_gate: u64,
    gate_ever_earned: bool,
    plate_seq: u64,
}

impl LabAgent {
    /// Build the agent: load the catalogue, sample the run context,
    /// seed the standing vessels and open the artefact ledgers.
    pub fn new(config: AgentConfig) -> anyhow::Result<Self> {
        let mut params = ParameterStore::builtin();
        if let Some(path) = &config.params_overlay {
            params.load_overlay(path)?;
        }
        let vessel_type = vessel_type_id(config.plate_format);
        let ctx = RunContext::sample(config.root_seed, config.context.clone());
        let mut engine = VesselEngine::new(params, ctx, vessel_type)?;

        let seed_cells = engine
            .params()
            .seeding_density(&config.cell_line, vessel_type)?
            * engine.params().vessel_type(vessel_type)?.area_cm2;

        // Standing vessels: matched control, the perturbed culture under
        // investigation, and the sentinel pool for calibration.
        engine.seed_vessel("ctl", &config.cell_line, seed_cells, 1.0)?;
        engine.seed_vessel("trt", &config.cell_line, seed_cells, 1.0)?;
        engine.treat_with_compound("trt", &config.compound, config.dose_um)?;
        for i in 0..config.replicate_group_size {
            engine.seed_vessel(&format!("sent-{i}"), &config.cell_line, seed_cells, 1.0)?;
        }

        let artifacts = RunArtifacts::create(&config.out_dir, &config.run_name)?;
        let mut controller = EpistemicController::new(config.budget_wells);
        if let Some(reason) = &config.disable_enforcement {
            controller.disable_enforcement(reason);
        }

        Ok(Self {
            gate: NoiseGate::new(config.gate.clone()),
            controller,
            beliefs: BeliefState::new(),
            artifacts,
            last_verdict: None,
            regime_counts: BTreeMap::new(),
            cycles_in_gate: 0,
            gate_ever_earned: false,
            plate_seq: 0,
            engine,
            config,
        })
    }

    /// Drive the run to completion and write the summary.
    pub fn run(&mut self) -> anyhow::Result<RunSummary> {
        let started_at = Utc::now().to_rfc3339();
        let budget_initial = self.controller.budget_remaining_wells();
        let mut status = RunStatus::CompletedNoGate;
        let mut cycles_completed = 0u64;

        for cycle in 1..=self.config.max_cycles {
            match self.step(cycle) {
                Ok(CycleOutcome::Continue) => {
                    cycles_completed = cycle;
                }
                Ok(CycleOutcome::Committed) => {
                    cycles_completed = cycle;
                    status = RunStatus::GateEarned;
                    info!(cycle, "mechanism committed, run complete");
                    break;
                }
                Ok(CycleOutcome::Aborted) => {
                    cycles_completed = cycle;
                    status = RunStatus::Aborted;
                    break;
                }
                Err(err) if is_integrity(&err) => {
                    warn!(cycle, error = %err, "ledger integrity violated");
                    cycles_completed = cycle;
                    status = RunStatus::IntegrityError;
                    *self
                        .regime_counts
                        .entry(Regime::IntegrityError.label().to_string())
                        .or_insert(0) += 1;
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        if status == RunStatus::CompletedNoGate && self.gate_ever_earned {
            status = RunStatus::GateEarned;
        }

        let summary = RunSummary {
            run_id: Uuid::new_v4().to_string(),
            root_seed: self.config.root_seed,
            status,
            regime_summary: self.regime_counts.clone(),
            budget_initial_wells: budget_initial,
            budget_remaining_wells: self.controller.budget_remaining_wells(),
            cycles_completed,
            gate_slack: self.gate.gate_slack(),
            time_in_gate_percent: if cycles_completed > 0 {
                100.0 * self.cycles_in_gate as f64 / cycles_completed as f64
            } else {
                0.0
            },
            debt_bits_final: self.controller.debt_bits(),
            contamination_flags: self.controller.contamination_flags(),
            started_at,
            completed_at: Utc::now().to_rfc3339(),
        };
        self.artifacts.write_summary(&summary)?;
        Ok(summary)
    }

    fn regime(&self) -> Regime {
        match (self.gate.state(), self.gate_ever_earned) {
            (GateState::Earned, _) => Regime::InGate,
            (_, true) => Regime::GateRevoked,
            (_, false) => Regime::PreGate,
        }
    }

    fn step(&mut self, cycle: u64) -> anyhow::Result<CycleOutcome> {
        let regime = self.regime();

        // 1. Select a candidate.
        let mut selected = self.select_candidate(regime);

        // 2. Refusal contract; a refused biology action falls back to
        //    calibration, a refused calibration aborts the run.
        if let Some(refusal) = self.controller.should_refuse_action(
            cycle,
            selected.template.name(),
            selected.template.is_calibration(),
            selected.template.base_cost_wells(),
        ) {
            self.artifacts.append_refusal(&refusal)?;
            if selected.template.is_calibration() {
                return self.abort(cycle, regime, "calibration unaffordable");
            }
            selected = self.forced_calibration(
                Trigger::MustCalibrate,
                format!("refused: {}", refusal.reason.code()),
            );
            if let Some(refusal) = self.controller.should_refuse_action(
                cycle,
                selected.template.name(),
                true,
                selected.template.base_cost_wells(),
            ) {
                self.artifacts.append_refusal(&refusal)?;
                return self.abort(cycle, regime, "no affordable action");
            }
        }

        // 3. Execute.
        match selected.template {
            ActionTemplate::BaselineReplicates => self.exec_calibration(cycle)?,
            template => self.exec_biology(cycle, template)?,
        }
        self.controller
            .charge(selected.template.base_cost_wells());

        if self.gate.state() == GateState::Earned {
            self.gate_ever_earned = true;
        }

        // 4. Diagnostics, one event per cycle.
        self.artifacts.append_diagnostics(&DiagnosticsEvent {
            cycle,
            rel_width: self.gate.rel_width(),
            pooled_sigma: self.gate.pooled_sigma(),
            df: self.gate.df_current(),
            gate_state: self.gate.state().label().to_string(),
            epistemically_contaminated: self.controller.is_contaminated(),
        })?;

        // 5. Governance over the current beliefs.
        let nuisance = self.nuisance_from_gate();
        let verdict = decide(
            &self.beliefs.posterior,
            nuisance,
            self.beliefs.evidence_strength,
            &self.config.governance,
        );
        debug!(cycle, decision = ?verdict.decision, "governance verdict");

        // 6. Decision provenance.
        self.artifacts.append_decision(&DecisionEvent {
            cycle,
            selected_template: selected.template.name().to_string(),
            selected_candidate: CandidateRecord {
                forced: selected.forced,
                trigger: selected.trigger,
                regime,
                gate_state: self.gate.state().label().to_string(),
                calibration_plan: selected.plan.clone(),
            },
            reason: selected.reason.clone(),
            epistemically_contaminated: self.controller.is_contaminated(),
        })?;

        *self
            .regime_counts
            .entry(regime.label().to_string())
            .or_insert(0) += 1;
        if regime == Regime::InGate {
            self.cycles_in_gate += 1;
        }

        let committed = verdict.decision == Decision::Commit;
        self.last_verdict = Some(verdict);
        if committed {
            Ok(CycleOutcome::Committed)
        } else {
            Ok(CycleOutcome::Continue)
        }
    }

    fn select_candidate(&mut self, regime: Regime) -> Selected {
        if self.gate.state() != GateState::Earned {
            let trigger = match regime {
                Regime::GateRevoked => Trigger::GateLock,
                _ => Trigger::MustCalibrate,
            };
            return self.forced_calibration(trigger, "gate not earned".to_string());
        }

        let evidence = self.beliefs.evidence_strength;
        let mut best = (ActionTemplate::Hold, f64::NEG_INFINITY);
        for template in ActionTemplate::SCORED {
            let bias = match &self.last_verdict {
                Some(verdict) => bias_multiplier(verdict, template.intent(), evidence),
                None => 1.0,
            };
            let score = template.base_score() * bias;
            if score > best.1 {
                best = (template, score);
            }
        }
        Selected {
            template: best.0,
            forced: false,
            trigger: Trigger::Scoring,
            plan: None,
            reason: format!("scored {:.3}", best.1),
        }
    }

    fn forced_calibration(&mut self, trigger: Trigger, reason: String) -> Selected {
        let group = self.config.replicate_group_size as u64;
        let df_gap = self
            .gate
            .df_needed_to_earn()
            .saturating_sub(self.gate.df_current())
            .max(1);
        let plan = recommend_batch(
            df_gap.min(2 * (group - 1)),
            group,
            FIXED_PLATE_COST_WELLS,
            PER_WELL_COST,
        )
        .ok();
        Selected {
            template: ActionTemplate::BaselineReplicates,
            forced: true,
            trigger,
            plan,
            reason,
        }
    }

    fn abort(
        &mut self,
        cycle: u64,
        _regime: Regime,
        reason: &str,
    ) -> anyhow::Result<CycleOutcome> {
        warn!(cycle, reason, "aborting run");
        self.artifacts.append_decision(&DecisionEvent {
            cycle,
            selected_template: ActionTemplate::Hold.name().to_string(),
            selected_candidate: CandidateRecord {
                forced: true,
                trigger: Trigger::Abort,
                regime: Regime::Aborted,
                gate_state: self.gate.state().label().to_string(),
                calibration_plan: None,
            },
            reason: reason.to_string(),
            epistemically_contaminated: self.controller.is_contaminated(),
        })?;
        *self
            .regime_counts
            .entry(Regime::Aborted.label().to_string())
            .or_insert(0) += 1;
        Ok(CycleOutcome::Aborted)
    }

    /// Two replicate groups over the sentinel pool; the gate absorbs
    /// their scatter and the controller is repaid for the measured
    /// improvement.
    fn exec_calibration(&mut self, cycle: u64) -> anyhow::Result<()> {
        let mut bench_h = self.engine.feed_vessel("ctl")?;
        bench_h += self.engine.feed_vessel("trt")?;
        self.engine.advance_time(6.0 + bench_h, 0.5)?;

        let rel_before = self.gate.rel_width();
        for half in 0..2 {
            let plate = self.next_plate();
            let mut group = Vec::with_capacity(self.config.replicate_group_size);
            for i in 0..self.config.replicate_group_size {
                let well = self.well_ctx(&plate, &format!("B{}", i + 2));
                let record =
                    atp_viability_assay(&self.engine, &format!("sent-{i}"), &well)?;
                let scalars = record
                    .scalars
                    .ok_or_else(|| KernelError::Integrity("scalar bundle missing".into()))?;
                group.push(scalars.atp);
            }
            debug!(cycle, half, wells = group.len(), "replicate group measured");
            self.gate.absorb_replicates(&group)?;
        }

        let improvement = match (rel_before, self.gate.rel_width()) {
            (Some(before), Some(after)) if before > 0.0 => {
                ((before - after) / before).max(0.0)
            }
            // the first batch establishes the estimate at all
            _ => 0.05,
        };
        self.controller.repay_calibration(improvement);
        Ok(())
    }

    /// Run one biology template and fold its treated-vs-control
    /// morphology read into the beliefs.
    fn exec_biology(&mut self, cycle: u64, template: ActionTemplate) -> anyhow::Result<()> {
        let entropy_before = self.beliefs.posterior.entropy_bits();
        let claimed = template.claimed_bits();

        let pair = match template {
            ActionTemplate::DoseResponse => self.exec_dose_response(cycle)?,
            ActionTemplate::WashoutDiscriminator => self.exec_washout(cycle)?,
            ActionTemplate::MechanismProbe => {
                self.engine.advance_time(6.0, 0.5)?;
                Some(self.morphology_pair("trt")?)
            }
            ActionTemplate::ImagingPanel => {
                self.engine.advance_time(4.0, 0.5)?;
                Some(self.morphology_pair("trt")?)
            }
            ActionTemplate::Hold => {
                self.engine.advance_time(6.0, 0.5)?;
                None
            }
            ActionTemplate::BaselineReplicates => unreachable!("calibration path"),
        };

        if let Some((treated, control)) = pair {
            let rel_noise = self.gate.pooled_sigma().unwrap_or(0.2);
            let nuisance = self.nuisance_from_gate();
            let update = self.beliefs.update_from_morphology(
                cycle,
                &treated,
                &control,
                rel_noise,
                nuisance,
            )?;
            let observed = (entropy_before - update.entropy_after_bits).max(0.0);
            self.controller.accrue_claim(claimed, observed);

            let (top, top_p) = self.beliefs.posterior.top();
            self.artifacts.append_evidence(&EvidenceEvent {
                cycle,
                evidence_time_h: self.engine.sim_time_h(),
                posterior: self.beliefs.posterior.labelled(),
                top_mechanism: top.label().to_string(),
                top_posterior: top_p,
                nuisance_prob: self.beliefs.nuisance_prob,
                entropy_bits: update.entropy_after_bits,
                epistemically_contaminated: self.controller.is_contaminated(),
            })?;
        }
        Ok(())
    }

    /// Five-point ladder on throwaway vessels; the saturating point
    /// provides the morphology pair.
    fn exec_dose_response(
        &mut self,
        cycle: u64,
    ) -> anyhow::Result<Option<(MorphologyBundle, MorphologyBundle)>> {
        let doses = [0.1, 0.3, 1.0, 3.0, 10.0].map(|x| x * self.config.dose_um);
        let mut bench_h = 0.0;
        let mut ladder = Vec::with_capacity(doses.len());
        for (i, dose) in doses.iter().enumerate() {
            let id = format!("dr-{cycle}-{i}");
            bench_h += self
                .engine
                .seed_vessel(&id, &self.config.cell_line, 1.0e4, 1.0)?;
            bench_h += self
                .engine
                .treat_with_compound(&id, &self.config.compound, *dose)?;
            ladder.push(id);
        }
        self.engine.advance_time(12.0 + bench_h, 0.5)?;

        let plate = self.next_plate();
        for (i, id) in ladder.iter().enumerate() {
            let well = self.well_ctx(&plate, &format!("D{}", i + 2));
            let record = atp_viability_assay(&self.engine, id, &well)?;
            if let Some(scalars) = record.scalars {
                debug!(cycle, vessel = %id, atp = scalars.atp, "ladder point");
            }
        }

        let top = ladder
            .last()
            .ok_or_else(|| KernelError::InvalidArgument("empty ladder".into()))?
            .clone();
        let pair = self.morphology_pair(&top)?;
        for id in &ladder {
            self.engine.harvest(id)?;
        }
        Ok(Some(pair))
    }

    /// Pulse-chase: expose a throwaway vessel, wash the compound out,
    /// and read what the latent axes still show.
    fn exec_washout(
        &mut self,
        cycle: u64,
    ) -> anyhow::Result<Option<(MorphologyBundle, MorphologyBundle)>> {
        let id = format!("wo-{cycle}");
        let mut bench_h = self
            .engine
            .seed_vessel(&id, &self.config.cell_line, 1.0e4, 1.0)?;
        bench_h += self
            .engine
            .treat_with_compound(&id, &self.config.compound, self.config.dose_um)?;
        self.engine.advance_time(6.0 + bench_h, 0.5)?;
        let bench_h = self.engine.washout_compound(&id, &self.config.compound)?;
        self.engine.advance_time(2.0 + bench_h, 0.5)?;

        let pair = self.morphology_pair(&id)?;
        self.engine.harvest(&id)?;
        Ok(Some(pair))
    }

    fn morphology_pair(
        &mut self,
        treated_id: &str,
    ) -> anyhow::Result<(MorphologyBundle, MorphologyBundle)> {
        let plate = self.next_plate();
        let treated_well = self.well_ctx(&plate, "C3");
        let control_well = self.well_ctx(&plate, "C4");
        let treated = cell_painting_assay(&self.engine, treated_id, &treated_well)?
            .morphology
            .ok_or_else(|| KernelError::Integrity("morphology bundle missing".into()))?;
        let control = cell_painting_assay(&self.engine, "ctl", &control_well)?
            .morphology
            .ok_or_else(|| KernelError::Integrity("morphology bundle missing".into()))?;
        Ok((treated, control))
    }

    fn next_plate(&mut self) -> String {
        self.plate_seq += 1;
        format!("P{:03}", self.plate_seq)
    }

    fn well_ctx(&self, plate_id: &str, well_pos: &str) -> WellContext {
        WellContext {
            batch: "b0".to_string(),
            plate_id: plate_id.to_string(),
            well_pos: well_pos.to_string(),
            day: 1 + (self.engine.sim_time_h() / 24.0) as u32,
            operator: "op-a".to_string(),
            format: self.config.plate_format,
        }
    }

    fn nuisance_from_gate(&self) -> f64 {
        match self.gate.rel_width() {
            Some(width) => ((width - 0.15) / 0.5).clamp(0.02, 1.0),
            None => 0.9,
        }
    }
}

/// Catalogue vessel type backing each plate format.
fn vessel_type_id(format: PlateFormat) -> &'static str {
    match format {
        PlateFormat::Plate96 => "well96",
        PlateFormat::Plate384 => "well384",
    }
}

enum CycleOutcome {
    Continue,
    Committed,
    Aborted,
}

fn is_integrity(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<KernelError>(),
        Some(KernelError::Integrity(_))
    )
}
