//! Core data model for the proof pipeline.
//!
//! Every type here crosses a serialization boundary: plans and critic
//! verdicts come back from the model as schema-constrained JSON, and
//! [`FinalProofPayload`] is what callers persist and stream to clients.
//! Wire keys on the payload are camelCase to match the event stream.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Closed set of proof strategies the planner may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofStrategy {
    DirectProof,
    ContradictionGeneral,
    ContradictionMinimality,
    InductionWeak,
    InductionStrong,
    GreedyExchange,
    InvariantMaintenance,
    PigeonholePrinciple,
    Constructive,
    CaseAnalysis,
}

impl ProofStrategy {
    /// Whether this strategy argues by contradiction.
    ///
    /// Plans for any other strategy must leave `contradiction_setup` null.
    pub fn uses_contradiction(self) -> bool {
        matches!(self, Self::ContradictionGeneral | Self::ContradictionMinimality)
    }
}

impl std::fmt::Display for ProofStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DirectProof => "DIRECT_PROOF",
            Self::ContradictionGeneral => "CONTRADICTION_GENERAL",
            Self::ContradictionMinimality => "CONTRADICTION_MINIMALITY",
            Self::InductionWeak => "INDUCTION_WEAK",
            Self::InductionStrong => "INDUCTION_STRONG",
            Self::GreedyExchange => "GREEDY_EXCHANGE",
            Self::InvariantMaintenance => "INVARIANT_MAINTENANCE",
            Self::PigeonholePrinciple => "PIGEONHOLE_PRINCIPLE",
            Self::Constructive => "CONSTRUCTIVE",
            Self::CaseAnalysis => "CASE_ANALYSIS",
        };
        write!(f, "{name}")
    }
}

/// Why the user asked for a proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserIntent {
    Learning,
    Verification,
}

/// Rendering register the writer targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofMode {
    /// Compact symbolic theorem-proof style.
    MathFormal,
    /// Intuition-first prose with justified equations.
    Explanatory,
}

impl ProofMode {
    /// The mode the background variant runs in, given the fast variant's mode.
    pub fn opposite(self) -> Self {
        match self {
            Self::MathFormal => Self::Explanatory,
            Self::Explanatory => Self::MathFormal,
        }
    }
}

impl std::fmt::Display for ProofMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MathFormal => write!(f, "MATH_FORMAL"),
            Self::Explanatory => write!(f, "EXPLANATORY"),
        }
    }
}

/// Which configured model a stage call resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelTier {
    Fast,
    Quality,
}

/// Which of a run's two variants a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantRole {
    FastPrimary,
    BackgroundQuality,
}

impl std::fmt::Display for VariantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FastPrimary => write!(f, "FAST_PRIMARY"),
            Self::BackgroundQuality => write!(f, "BACKGROUND_QUALITY"),
        }
    }
}

/// Verdict of the critic on a single draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriticStatus {
    Pass,
    Fail,
}

/// Final outcome of a variant's writer/critic loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Pass,
    Fail,
    PassedWithWarnings,
}

/// One step in the planner's proof outline.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanStep {
    /// Either prose (`step`) or a display-math line (`math`).
    #[serde(rename = "type")]
    pub step_type: PlanStepType,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlanStepType {
    Step,
    Math,
}

/// The assumption/implication/climax triple for contradiction strategies.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ContradictionSetup {
    pub assumption: String,
    pub implication: String,
    pub climax: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanMeta {
    pub strategy: ProofStrategy,
    pub confidence_score: f64,
    pub user_intent: UserIntent,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanSetup {
    #[serde(default)]
    pub definitions: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub goal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanCoreLogic {
    #[serde(default)]
    pub invariant: String,
    #[serde(default)]
    pub base_cases: Vec<String>,
    #[serde(default)]
    pub contradiction_setup: Option<ContradictionSetup>,
    #[serde(default)]
    pub observations: Vec<String>,
}

/// Structured output of the planner stage.
///
/// `audit_report` is a placeholder at planning time (status FAIL, attempts 0);
/// the real audit is produced by the pipeline after the writer/critic loop.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanJson {
    pub meta: PlanMeta,
    pub setup: PlanSetup,
    pub core_logic: PlanCoreLogic,
    pub steps: Vec<PlanStep>,
    pub audit_report: AuditReport,
}

impl PlanJson {
    /// Enforce the plan invariants the JSON schema cannot express.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.steps.is_empty() {
            return Err(PipelineError::SchemaValidation(
                "Plan steps must be non-empty.".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.meta.confidence_score) {
            return Err(PipelineError::SchemaValidation(format!(
                "Plan confidence_score {} is outside [0, 1].",
                self.meta.confidence_score
            )));
        }
        if self.core_logic.contradiction_setup.is_some()
            && !self.meta.strategy.uses_contradiction()
        {
            return Err(PipelineError::SchemaValidation(format!(
                "Plan sets contradiction_setup but strategy {} does not argue by contradiction.",
                self.meta.strategy
            )));
        }
        Ok(())
    }
}

/// Critic verdict on one draft. Produced fresh each attempt and never merged
/// with prior attempts' output; only the gap list is carried forward as writer
/// context.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CriticResult {
    pub status: CriticStatus,
    #[serde(default)]
    pub gaps: Vec<String>,
    pub final_verdict: String,
}

/// Final verdict for a variant: critic outcome plus static lint findings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AuditReport {
    pub status: AuditStatus,
    pub attempts: u32,
    #[serde(default)]
    pub critiques: Vec<String>,
    pub final_verdict: String,
}

/// Per-strategy intuition card. Static lookup, never model-generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentalModel {
    pub title: String,
    pub trick: String,
    pub logic: String,
    pub invariant: String,
}

/// A validated generation request after scope gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub problem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<String>,
    pub user_intent: UserIntent,
    /// Mode the synchronous fast variant runs in.
    pub mode_preference: ProofMode,
}

/// Terminal output of one variant pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalProofPayload {
    pub run_id: String,
    pub strategy: ProofStrategy,
    pub attempts: u32,
    pub mode: ProofMode,
    pub variant_role: VariantRole,
    pub is_background: bool,
    pub plan: PlanJson,
    pub proof_markdown: String,
    pub audit: AuditReport,
    pub mental_model: MentalModel,
}
