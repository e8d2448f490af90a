//! Shared fixtures: a scripted stage-runner implementation that pops canned
//! outcomes per call and records what the pipeline passed in.
#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;

use proofsmith::error::PipelineError;
use proofsmith::fallback::StageOutcome;
use proofsmith::runners::{CriticArgs, FollowupArgs, PlannerArgs, StageRunners, WriterArgs};
use proofsmith::types::{
    AuditReport, AuditStatus, CriticResult, CriticStatus, PlanCoreLogic, PlanJson, PlanMeta,
    PlanSetup, PlanStep, PlanStepType, ProofStrategy, UserIntent,
};

pub fn sample_plan() -> PlanJson {
    PlanJson {
        meta: PlanMeta {
            strategy: ProofStrategy::ContradictionGeneral,
            confidence_score: 0.88,
            user_intent: UserIntent::Learning,
        },
        setup: PlanSetup {
            definitions: vec!["A rational number is a ratio of coprime integers.".into()],
            assumptions: vec![],
            goal: "sqrt(2) is irrational".into(),
        },
        core_logic: PlanCoreLogic {
            invariant: String::new(),
            base_cases: vec![],
            contradiction_setup: None,
            observations: vec!["If p/q is in lowest terms, p and q share no factor.".into()],
        },
        steps: vec![
            PlanStep {
                step_type: PlanStepType::Step,
                content: "Assume sqrt(2) = p/q in lowest terms.".into(),
            },
            PlanStep {
                step_type: PlanStepType::Math,
                content: "p^2 = 2q^2".into(),
            },
        ],
        audit_report: AuditReport {
            status: AuditStatus::Fail,
            attempts: 0,
            critiques: vec![],
            final_verdict: "pending".into(),
        },
    }
}

pub fn pass(verdict: &str) -> CriticResult {
    CriticResult {
        status: CriticStatus::Pass,
        gaps: vec![],
        final_verdict: verdict.into(),
    }
}

pub fn fail(verdict: &str, gaps: &[&str]) -> CriticResult {
    CriticResult {
        status: CriticStatus::Fail,
        gaps: gaps.iter().map(|gap| gap.to_string()).collect(),
        final_verdict: verdict.into(),
    }
}

/// Arguments the scripted runners observed, for assertions.
#[derive(Debug, Clone)]
pub struct ObservedWriterCall {
    pub attempt_gaps: Vec<String>,
    pub previous_draft: Option<String>,
}

type Scripted<T> = Mutex<Vec<Result<StageOutcome<T>, PipelineError>>>;

pub struct ScriptedRunners {
    plans: Scripted<PlanJson>,
    drafts: Scripted<String>,
    critiques: Scripted<CriticResult>,
    followups: Scripted<String>,
    pub planner_repair_flags: Mutex<Vec<bool>>,
    pub writer_calls: Mutex<Vec<ObservedWriterCall>>,
    pub critic_drafts: Mutex<Vec<String>>,
    pub followup_contexts: Mutex<Vec<Option<(String, String)>>>,
}

pub fn ok<T>(result: T, model_id: &str) -> Result<StageOutcome<T>, PipelineError> {
    Ok(StageOutcome {
        result,
        model_id: model_id.into(),
    })
}

impl ScriptedRunners {
    pub fn new(
        plans: Vec<Result<StageOutcome<PlanJson>, PipelineError>>,
        drafts: Vec<Result<StageOutcome<String>, PipelineError>>,
        critiques: Vec<Result<StageOutcome<CriticResult>, PipelineError>>,
    ) -> Self {
        Self {
            plans: Mutex::new(plans),
            drafts: Mutex::new(drafts),
            critiques: Mutex::new(critiques),
            followups: Mutex::new(vec![]),
            planner_repair_flags: Mutex::new(vec![]),
            writer_calls: Mutex::new(vec![]),
            critic_drafts: Mutex::new(vec![]),
            followup_contexts: Mutex::new(vec![]),
        }
    }

    pub fn with_followups(
        mut followups: Vec<Result<StageOutcome<String>, PipelineError>>,
    ) -> Self {
        let runners = Self::new(vec![], vec![], vec![]);
        runners
            .followups
            .lock()
            .unwrap()
            .append(&mut followups);
        runners
    }

    pub fn planner_calls(&self) -> usize {
        self.planner_repair_flags.lock().unwrap().len()
    }

    pub fn writer_call_count(&self) -> usize {
        self.writer_calls.lock().unwrap().len()
    }

    pub fn critic_call_count(&self) -> usize {
        self.critic_drafts.lock().unwrap().len()
    }

    fn pop<T>(queue: &Scripted<T>, stage: &str) -> Result<StageOutcome<T>, PipelineError> {
        let mut queue = queue.lock().unwrap();
        assert!(!queue.is_empty(), "unexpected extra {stage} call");
        queue.remove(0)
    }
}

#[async_trait]
impl StageRunners for ScriptedRunners {
    async fn run_planner(
        &self,
        args: PlannerArgs<'_>,
    ) -> Result<StageOutcome<PlanJson>, PipelineError> {
        self.planner_repair_flags
            .lock()
            .unwrap()
            .push(args.repair_mode);
        Self::pop(&self.plans, "planner")
    }

    async fn run_writer(
        &self,
        args: WriterArgs<'_>,
    ) -> Result<StageOutcome<String>, PipelineError> {
        self.writer_calls.lock().unwrap().push(ObservedWriterCall {
            attempt_gaps: args.critic_gaps.to_vec(),
            previous_draft: args.previous_draft.map(str::to_string),
        });
        let outcome = Self::pop(&self.drafts, "writer");
        if let (Ok(outcome), Some(observer)) = (&outcome, args.on_delta) {
            observer(&outcome.result);
        }
        outcome
    }

    async fn run_critic(
        &self,
        args: CriticArgs<'_>,
    ) -> Result<StageOutcome<CriticResult>, PipelineError> {
        self.critic_drafts.lock().unwrap().push(args.draft.to_string());
        Self::pop(&self.critiques, "critic")
    }

    async fn run_followup(
        &self,
        args: FollowupArgs<'_>,
    ) -> Result<StageOutcome<String>, PipelineError> {
        self.followup_contexts.lock().unwrap().push(
            args.context
                .map(|context| (context.problem.clone(), context.variant_role.clone())),
        );
        Self::pop(&self.followups, "followup")
    }
}
