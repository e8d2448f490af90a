//! System prompts and user-prompt builders for each stage.
//!
//! Wording here is tuned, not contractual; the schemas in [`crate::types`]
//! are the real interface with the model.

use crate::types::{PlanJson, ProofMode, UserIntent};

pub const PLANNER_SYSTEM_PROMPT: &str = "\
You are the Logic Architect.
Your role is to structure, not to prove.
Select the most suitable strategy from: DIRECT_PROOF, CONTRADICTION_GENERAL, \
CONTRADICTION_MINIMALITY, INDUCTION_WEAK, INDUCTION_STRONG, GREEDY_EXCHANGE, \
INVARIANT_MAINTENANCE, PIGEONHOLE_PRINCIPLE, CONSTRUCTIVE, CASE_ANALYSIS.
Extract definitions, assumptions, goal, and core logic skeleton.
Output JSON only that matches the required schema.";

pub const WRITER_SYSTEM_PROMPT: &str = "\
You are the Proof Writer.
Write a rigorous proof in markdown.
Do not invent assumptions that contradict the plan.";

pub const CRITIC_SYSTEM_PROMPT: &str = "\
You are a strict Formal Logic Auditor.
Evaluate the draft for:
1) missing base cases,
2) hidden assumptions,
3) circular logic.
Return JSON only with keys: status, gaps, final_verdict.
status must be PASS or FAIL.";

pub const FOLLOWUP_SYSTEM_PROMPT: &str = "\
You answer follow-up questions about a previously generated proof.
Stay within the provided context; say so when the question goes beyond it.
Answer in markdown with KaTeX-compatible math delimiters.";

/// Appended to the planner prompt on the single repair retry after a schema
/// failure.
pub const PLANNER_REPAIR_SUFFIX: &str =
    "Return strict JSON only. Do not add markdown fences, extra prose, or trailing text.";

fn intent_label(intent: UserIntent) -> &'static str {
    match intent {
        UserIntent::Learning => "LEARNING",
        UserIntent::Verification => "VERIFICATION",
    }
}

fn mode_instruction(mode: ProofMode) -> &'static str {
    match mode {
        ProofMode::MathFormal => {
            "Mode: MATH_FORMAL. Write a highly formal, concise theorem-proof style response. \
             Prefer symbolic derivations and compact argument steps. Minimize prose and avoid \
             storytelling. Use KaTeX-compatible delimiters: inline $...$, display $$...$$."
        }
        ProofMode::Explanatory => {
            "Mode: EXPLANATORY. Write an intuitive explanation-first proof with clear \
             transitions. Keep equations, but explain why each step is valid in plain language. \
             Still keep rigor and avoid handwaving. Use KaTeX-compatible delimiters: inline \
             $...$, display $$...$$."
        }
    }
}

/// Join non-empty sections with blank lines, matching the shape every
/// builder below produces.
fn join_sections(sections: &[String]) -> String {
    sections
        .iter()
        .filter(|section| !section.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_planner_user_prompt(
    problem: &str,
    attempt: Option<&str>,
    user_intent: UserIntent,
    repair_mode: bool,
) -> String {
    let mut sections = vec![
        format!("User intent: {}", intent_label(user_intent)),
        "Problem:".to_string(),
        problem.to_string(),
    ];
    if let Some(attempt) = attempt {
        sections.push("User attempt:".to_string());
        sections.push(attempt.to_string());
    }
    sections.push("Return only valid JSON.".to_string());
    sections.push(
        "All schema keys are required: use [] or null when a field is not applicable.".to_string(),
    );
    sections.push(
        "Always include setup.definitions, setup.assumptions, core_logic.base_cases, \
         core_logic.observations."
            .to_string(),
    );
    sections.push(
        "Set core_logic.contradiction_setup to null when contradiction is not used.".to_string(),
    );
    sections
        .push("Set audit_report.status to FAIL and attempts to 0 for planning stage.".to_string());
    if repair_mode {
        sections.push(PLANNER_REPAIR_SUFFIX.to_string());
    }
    join_sections(&sections)
}

pub fn build_writer_user_prompt(
    problem: &str,
    attempt: Option<&str>,
    plan: &PlanJson,
    mode: ProofMode,
    previous_draft: Option<&str>,
    critic_gaps: &[String],
) -> String {
    let plan_json =
        serde_json::to_string_pretty(plan).unwrap_or_else(|_| "(plan unavailable)".to_string());
    let mut sections = vec![
        mode_instruction(mode).to_string(),
        "Problem:".to_string(),
        problem.to_string(),
        "Structured plan JSON:".to_string(),
        plan_json,
    ];
    if let Some(attempt) = attempt {
        sections.push(format!("Original user attempt:\n{attempt}"));
    }
    if let Some(previous) = previous_draft {
        sections.push(format!("Previous draft:\n{previous}"));
    }
    if !critic_gaps.is_empty() {
        sections.push(format!("Required fixes:\n- {}", critic_gaps.join("\n- ")));
    }
    sections.push("Return markdown only.".to_string());
    join_sections(&sections)
}

pub fn build_critic_user_prompt(plan: &PlanJson, draft: &str, mode: ProofMode) -> String {
    let plan_json =
        serde_json::to_string_pretty(plan).unwrap_or_else(|_| "(plan unavailable)".to_string());
    let mode_check = match mode {
        ProofMode::MathFormal => {
            "Verify that language stays compact and mathematically formal."
        }
        ProofMode::Explanatory => {
            "Verify that explanations are clear and each equation is justified in plain language."
        }
    };
    join_sections(&[
        format!("Mode: {mode}"),
        "Plan JSON:".to_string(),
        plan_json,
        "Draft proof markdown:".to_string(),
        draft.to_string(),
        "Check contradiction/minimality patterns when relevant to selected strategy.".to_string(),
        mode_check.to_string(),
    ])
}

/// Context block for a follow-up question resolved from a stored variant.
pub struct FollowupContext {
    pub problem: String,
    pub strategy: String,
    pub variant_role: String,
    pub proof_markdown: String,
}

pub fn build_followup_user_prompt(
    question: &str,
    mode_hint: Option<ProofMode>,
    context: Option<&FollowupContext>,
) -> String {
    let mut sections = Vec::new();
    if let Some(mode) = mode_hint {
        sections.push(mode_instruction(mode).to_string());
    }
    if let Some(context) = context {
        sections.push(format!(
            "Context, original problem:\n{}",
            context.problem
        ));
        sections.push(format!(
            "Proof ({} variant, strategy {}):\n{}",
            context.variant_role, context.strategy, context.proof_markdown
        ));
    }
    sections.push(format!("Question:\n{question}"));
    sections.push("Answer in markdown only.".to_string());
    join_sections(&sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AuditReport, AuditStatus, PlanCoreLogic, PlanJson, PlanMeta, PlanSetup, PlanStep,
        PlanStepType, ProofStrategy,
    };

    fn plan() -> PlanJson {
        PlanJson {
            meta: PlanMeta {
                strategy: ProofStrategy::DirectProof,
                confidence_score: 0.8,
                user_intent: UserIntent::Learning,
            },
            setup: PlanSetup {
                definitions: vec![],
                assumptions: vec![],
                goal: "goal".into(),
            },
            core_logic: PlanCoreLogic {
                invariant: String::new(),
                base_cases: vec![],
                contradiction_setup: None,
                observations: vec![],
            },
            steps: vec![PlanStep {
                step_type: PlanStepType::Step,
                content: "step 1".into(),
            }],
            audit_report: AuditReport {
                status: AuditStatus::Fail,
                attempts: 0,
                critiques: vec![],
                final_verdict: "placeholder".into(),
            },
        }
    }

    #[test]
    fn repair_mode_appends_strict_json_instruction() {
        let normal =
            build_planner_user_prompt("Prove X.", None, UserIntent::Verification, false);
        let repair = build_planner_user_prompt("Prove X.", None, UserIntent::Verification, true);
        assert!(!normal.contains(PLANNER_REPAIR_SUFFIX));
        assert!(repair.ends_with(PLANNER_REPAIR_SUFFIX));
    }

    #[test]
    fn writer_prompt_includes_gaps_and_previous_draft() {
        let gaps = vec!["Missing base case n=0.".to_string()];
        let prompt = build_writer_user_prompt(
            "Prove X.",
            Some("my try"),
            &plan(),
            ProofMode::Explanatory,
            Some("old draft"),
            &gaps,
        );
        assert!(prompt.contains("Required fixes:\n- Missing base case n=0."));
        assert!(prompt.contains("Previous draft:\nold draft"));
        assert!(prompt.contains("Original user attempt:\nmy try"));
        assert!(prompt.contains("Mode: EXPLANATORY"));
    }

    #[test]
    fn writer_prompt_omits_empty_sections() {
        let prompt = build_writer_user_prompt(
            "Prove X.",
            None,
            &plan(),
            ProofMode::MathFormal,
            None,
            &[],
        );
        assert!(!prompt.contains("Previous draft"));
        assert!(!prompt.contains("Required fixes"));
        assert!(prompt.ends_with("Return markdown only."));
    }

    #[test]
    fn critic_prompt_names_the_mode() {
        let prompt = build_critic_user_prompt(&plan(), "## Draft", ProofMode::MathFormal);
        assert!(prompt.starts_with("Mode: MATH_FORMAL"));
        assert!(prompt.contains("## Draft"));
    }

    #[test]
    fn followup_prompt_with_and_without_context() {
        let bare = build_followup_user_prompt("Why even?", None, None);
        assert!(bare.starts_with("Question:"));

        let context = FollowupContext {
            problem: "Prove sqrt(2) irrational.".into(),
            strategy: "CONTRADICTION_GENERAL".into(),
            variant_role: "FAST_PRIMARY".into(),
            proof_markdown: "## Proof".into(),
        };
        let with_context =
            build_followup_user_prompt("Why even?", Some(ProofMode::Explanatory), Some(&context));
        assert!(with_context.contains("Context, original problem:"));
        assert!(with_context.contains("CONTRADICTION_GENERAL"));
    }
}
