//! Variant pipeline orchestrator.
//!
//! One run of this module produces one proof variant: a plan, then a
//! bounded writer/critic loop, then a final audit. The legal state walk is
//!
//! ```text
//! PLANNING -> WRITING -> CRITIQUING -> WRITING     (revision)
//!                                   -> ACCEPTED    (clean pass)
//!                                   -> EXHAUSTED   (attempts spent)
//! ```
//!
//! Acceptance is strict: the critic must PASS and the merged gap list
//! (critic gaps plus LaTeX lint warnings) must be empty. The terminal audit
//! label is derived leniently from the last critic verdict, so a run that
//! exhausts its attempts on a PASS-with-warnings still surfaces as
//! `PASSED_WITH_WARNINGS` rather than `FAIL`.

use std::sync::Arc;
use std::time::Instant;

use crate::error::PipelineError;
use crate::events::{EventSink, StreamEvent};
use crate::heartbeat::with_heartbeat;
use crate::latex::lint_latex_markdown;
use crate::mental_model::mental_model_for;
use crate::runners::{CriticArgs, PlannerArgs, StageRunners, WriterArgs};
use crate::state_machine::{VariantState, VariantStateMachine};
use crate::types::{
    AuditReport, AuditStatus, CriticResult, CriticStatus, FinalProofPayload, GenerateRequest,
    ModelTier, PlanJson, ProofMode, VariantRole,
};

/// Status line emitted before the single planner repair retry.
pub const PLANNER_REPAIR_STATUS: &str =
    "Planner output invalid. Retrying with strict JSON constraints...";

/// Everything one variant run needs. `existing_plan` lets the background
/// variant reuse the fast variant's plan instead of re-planning.
pub struct RunVariantPipelineArgs {
    pub run_id: String,
    pub request: GenerateRequest,
    pub mode: ProofMode,
    pub variant_role: VariantRole,
    pub is_background: bool,
    pub model_tier: ModelTier,
    pub max_attempts: u32,
    pub existing_plan: Option<PlanJson>,
    pub sink: Option<Arc<dyn EventSink>>,
}

/// Terminal result of one variant run.
#[derive(Debug, Clone)]
pub struct VariantPipelineResult {
    pub payload: FinalProofPayload,
    /// Distinct model ids in first-use order, across all stages.
    pub models_used: Vec<String>,
    /// Wall-clock duration of the whole variant.
    pub latency_ms: u64,
}

fn seed_critic_result() -> CriticResult {
    CriticResult {
        status: CriticStatus::Fail,
        gaps: vec!["No critique generated.".to_string()],
        final_verdict: "No critique was generated.".to_string(),
    }
}

fn emit(sink: &Option<Arc<dyn EventSink>>, event: StreamEvent) {
    if let Some(sink) = sink {
        sink.emit(event);
    }
}

fn record_model(models_used: &mut Vec<String>, model_id: &str) {
    if !models_used.iter().any(|known| known == model_id) {
        models_used.push(model_id.to_string());
    }
}

/// Derive the terminal audit from the last critic verdict and merged gaps.
fn derive_audit(last_critic: &CriticResult, merged_gaps: &[String], attempts: u32) -> AuditReport {
    let (status, final_verdict) = match last_critic.status {
        CriticStatus::Pass if merged_gaps.is_empty() => {
            (AuditStatus::Pass, last_critic.final_verdict.clone())
        }
        CriticStatus::Pass => (
            AuditStatus::PassedWithWarnings,
            format!("{} (with LaTeX warnings)", last_critic.final_verdict),
        ),
        CriticStatus::Fail => (AuditStatus::Fail, last_critic.final_verdict.clone()),
    };
    AuditReport {
        status,
        attempts,
        critiques: merged_gaps.to_vec(),
        final_verdict,
    }
}

async fn settle_plan(
    runners: &dyn StageRunners,
    args: &RunVariantPipelineArgs,
) -> Result<(PlanJson, Vec<String>), PipelineError> {
    let sink = &args.sink;
    emit(sink, StreamEvent::status("planner", "Analyzing Logic Structure..."));

    let fallback_observer = |from: &str, to: &str| {
        emit(
            sink,
            StreamEvent::status("planner", format!("Planner model fallback: {from} -> {to}")),
        );
    };
    let planner_args = |repair_mode: bool| PlannerArgs {
        problem: &args.request.problem,
        attempt: args.request.attempt.as_deref(),
        user_intent: args.request.user_intent,
        tier: args.model_tier,
        repair_mode,
        on_fallback: Some(&fallback_observer),
    };

    let first = with_heartbeat("planner", sink.as_ref(), runners.run_planner(planner_args(false)))
        .await;
    match first {
        Ok(outcome) => Ok((outcome.result, vec![outcome.model_id])),
        Err(PipelineError::SchemaValidation(detail)) => {
            tracing::warn!(run_id = %args.run_id, detail = %detail, "Planner output rejected; retrying in repair mode");
            emit(sink, StreamEvent::status("planner", PLANNER_REPAIR_STATUS));
            let outcome = with_heartbeat(
                "planner-repair",
                sink.as_ref(),
                runners.run_planner(planner_args(true)),
            )
            .await?;
            Ok((outcome.result, vec![outcome.model_id]))
        }
        Err(err) => Err(err),
    }
}

/// Run one full variant: plan, then up to `max_attempts` writer/critic
/// rounds, then the terminal audit.
pub async fn run_variant_pipeline(
    runners: &dyn StageRunners,
    args: RunVariantPipelineArgs,
) -> Result<VariantPipelineResult, PipelineError> {
    let started_at = Instant::now();
    let max_attempts = args.max_attempts.max(1);
    let sink = args.sink.clone();
    let mut machine = VariantStateMachine::new();
    let mut models_used: Vec<String> = Vec::new();

    // A supplied plan (the background variant reusing the fast one) skips
    // the planning stage and its events entirely.
    let plan = match &args.existing_plan {
        Some(plan) => plan.clone(),
        None => {
            let (plan, planner_models) = settle_plan(runners, &args).await?;
            for model in &planner_models {
                record_model(&mut models_used, model);
            }
            emit(&sink, StreamEvent::Plan { data: plan.clone() });
            plan
        }
    };
    machine.advance(VariantState::Writing, Some("plan settled"))?;

    let mut last_critic = seed_critic_result();
    let mut merged_gaps = last_critic.gaps.clone();
    let mut previous_draft: Option<String> = None;
    let mut draft = String::new();
    let mut attempts_run = 0;

    for attempt in 1..=max_attempts {
        attempts_run = attempt;
        machine.set_attempt(attempt);

        let writer_stage = format!("writer-{attempt}");
        let status_message = if attempt == 1 {
            "Drafting... (Attempt 1)".to_string()
        } else {
            format!("Refining Logic... (Attempt {attempt})")
        };
        emit(&sink, StreamEvent::status_attempt("writer", attempt, status_message));

        let delta_sink = sink.clone();
        let delta_observer = move |delta: &str| {
            emit(
                &delta_sink,
                StreamEvent::DraftDelta {
                    attempt,
                    delta: delta.to_string(),
                },
            );
        };
        let writer_fallback_sink = sink.clone();
        let writer_fallback = move |from: &str, to: &str| {
            emit(
                &writer_fallback_sink,
                StreamEvent::status("writer", format!("Writer model fallback: {from} -> {to}")),
            );
        };

        let writer_outcome = with_heartbeat(
            &writer_stage,
            sink.as_ref(),
            runners.run_writer(WriterArgs {
                problem: &args.request.problem,
                attempt: args.request.attempt.as_deref(),
                plan: &plan,
                mode: args.mode,
                previous_draft: previous_draft.as_deref(),
                critic_gaps: &merged_gaps,
                tier: args.model_tier,
                on_delta: Some(&delta_observer),
                on_fallback: Some(&writer_fallback),
            }),
        )
        .await?;
        record_model(&mut models_used, &writer_outcome.model_id);
        draft = writer_outcome.result;
        emit(
            &sink,
            StreamEvent::DraftComplete {
                attempt,
                markdown: draft.clone(),
            },
        );

        machine.advance(VariantState::Critiquing, None)?;
        let critic_stage = format!("critic-{attempt}");
        emit(
            &sink,
            StreamEvent::status_attempt(
                "critic",
                attempt,
                format!("Critic review in progress... (Attempt {attempt})"),
            ),
        );

        let critic_fallback_sink = sink.clone();
        let critic_fallback = move |from: &str, to: &str| {
            emit(
                &critic_fallback_sink,
                StreamEvent::status("critic", format!("Critic model fallback: {from} -> {to}")),
            );
        };
        let critic_outcome = with_heartbeat(
            &critic_stage,
            sink.as_ref(),
            runners.run_critic(CriticArgs {
                plan: &plan,
                draft: &draft,
                mode: args.mode,
                tier: args.model_tier,
                on_fallback: Some(&critic_fallback),
            }),
        )
        .await?;
        record_model(&mut models_used, &critic_outcome.model_id);
        last_critic = critic_outcome.result;

        let lint = lint_latex_markdown(&draft);
        merged_gaps = last_critic
            .gaps
            .iter()
            .cloned()
            .chain(lint.warnings.iter().cloned())
            .collect();
        emit(
            &sink,
            StreamEvent::Critique {
                attempt,
                status: last_critic.status,
                gaps: merged_gaps.clone(),
            },
        );

        if last_critic.status == CriticStatus::Pass && merged_gaps.is_empty() {
            machine.advance(VariantState::Accepted, Some("critic pass, no gaps"))?;
            break;
        }
        if attempt < max_attempts {
            machine.advance(VariantState::Writing, Some("revision required"))?;
            previous_draft = Some(draft.clone());
        } else {
            machine.advance(VariantState::Exhausted, Some("attempt budget spent"))?;
        }
    }

    let audit = derive_audit(&last_critic, &merged_gaps, attempts_run);
    tracing::info!(
        run_id = %args.run_id,
        variant = %args.variant_role,
        status = ?audit.status,
        attempts = attempts_run,
        latency_ms = started_at.elapsed().as_millis() as u64,
        "Variant pipeline finished"
    );

    let payload = FinalProofPayload {
        run_id: args.run_id,
        strategy: plan.meta.strategy,
        attempts: attempts_run,
        mode: args.mode,
        variant_role: args.variant_role,
        is_background: args.is_background,
        mental_model: mental_model_for(plan.meta.strategy),
        plan,
        proof_markdown: draft,
        audit,
    };

    Ok(VariantPipelineResult {
        payload,
        models_used,
        latency_ms: started_at.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn critic(status: CriticStatus, verdict: &str) -> CriticResult {
        CriticResult {
            status,
            gaps: vec![],
            final_verdict: verdict.into(),
        }
    }

    #[test]
    fn clean_pass_audit() {
        let audit = derive_audit(&critic(CriticStatus::Pass, "Sound."), &[], 2);
        assert_eq!(audit.status, AuditStatus::Pass);
        assert_eq!(audit.final_verdict, "Sound.");
        assert_eq!(audit.attempts, 2);
    }

    #[test]
    fn pass_with_residual_gaps_downgrades_to_warnings() {
        let gaps = vec!["Unbalanced $ inline math delimiters.".to_string()];
        let audit = derive_audit(&critic(CriticStatus::Pass, "Sound."), &gaps, 3);
        assert_eq!(audit.status, AuditStatus::PassedWithWarnings);
        assert_eq!(audit.final_verdict, "Sound. (with LaTeX warnings)");
        assert_eq!(audit.critiques, gaps);
    }

    #[test]
    fn fail_stays_fail_even_with_gaps() {
        let gaps = vec!["Circular step 3.".to_string()];
        let audit = derive_audit(&critic(CriticStatus::Fail, "Circular."), &gaps, 3);
        assert_eq!(audit.status, AuditStatus::Fail);
        assert_eq!(audit.final_verdict, "Circular.");
    }

    #[test]
    fn seed_critic_matches_first_writer_context() {
        let seed = seed_critic_result();
        assert_eq!(seed.status, CriticStatus::Fail);
        assert_eq!(seed.gaps, vec!["No critique generated."]);
        assert_eq!(seed.final_verdict, "No critique was generated.");
    }
}
