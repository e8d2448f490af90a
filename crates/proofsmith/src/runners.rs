//! Stage runners: typed model calls for planner, writer, critic, and
//! follow-up, each wrapped in the primary/fallback executor.
//!
//! The orchestrator depends on the [`StageRunners`] trait rather than on a
//! concrete provider so tests can script stage outcomes without any network.
//! [`ModelRunners`] is the production implementation over a
//! [`ModelProvider`] and a [`ModelConfig`].
//!
//! Stage temperatures are fixed: planner 0.1, writer 0.2, critic 0.0,
//! follow-up 0.3.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;

use crate::config::ModelConfig;
use crate::error::PipelineError;
use crate::fallback::{execute_with_model_fallback, FallbackObserver, StageOutcome};
use crate::formatting::normalize_math_delimiters;
use crate::prompts::{
    build_critic_user_prompt, build_followup_user_prompt, build_planner_user_prompt,
    build_writer_user_prompt, FollowupContext, CRITIC_SYSTEM_PROMPT, FOLLOWUP_SYSTEM_PROMPT,
    PLANNER_SYSTEM_PROMPT, WRITER_SYSTEM_PROMPT,
};
use crate::provider::{DeltaObserver, ModelProvider, ModelRequest};
use crate::scope::{ScopeClassifier, ScopeResult, ScopeVerdict};
use crate::types::{CriticResult, ModelTier, PlanJson, ProofMode, UserIntent};

const PLANNER_TEMPERATURE: f32 = 0.1;
const WRITER_TEMPERATURE: f32 = 0.2;
const CRITIC_TEMPERATURE: f32 = 0.0;
const FOLLOWUP_TEMPERATURE: f32 = 0.3;

pub struct PlannerArgs<'a> {
    pub problem: &'a str,
    pub attempt: Option<&'a str>,
    pub user_intent: UserIntent,
    pub tier: ModelTier,
    /// Second planner pass after a schema failure appends the strict-JSON
    /// instruction to the prompt.
    pub repair_mode: bool,
    pub on_fallback: Option<FallbackObserver<'a>>,
}

pub struct WriterArgs<'a> {
    pub problem: &'a str,
    pub attempt: Option<&'a str>,
    pub plan: &'a PlanJson,
    pub mode: ProofMode,
    pub previous_draft: Option<&'a str>,
    pub critic_gaps: &'a [String],
    pub tier: ModelTier,
    pub on_delta: Option<DeltaObserver<'a>>,
    pub on_fallback: Option<FallbackObserver<'a>>,
}

pub struct CriticArgs<'a> {
    pub plan: &'a PlanJson,
    pub draft: &'a str,
    pub mode: ProofMode,
    pub tier: ModelTier,
    pub on_fallback: Option<FallbackObserver<'a>>,
}

pub struct FollowupArgs<'a> {
    pub question: &'a str,
    pub mode_hint: Option<ProofMode>,
    pub context: Option<&'a FollowupContext>,
    pub on_delta: Option<DeltaObserver<'a>>,
    pub on_fallback: Option<FallbackObserver<'a>>,
}

/// The three pipeline stages plus follow-up, abstracted for test injection.
#[async_trait]
pub trait StageRunners: Send + Sync {
    async fn run_planner(
        &self,
        args: PlannerArgs<'_>,
    ) -> Result<StageOutcome<PlanJson>, PipelineError>;

    async fn run_writer(
        &self,
        args: WriterArgs<'_>,
    ) -> Result<StageOutcome<String>, PipelineError>;

    async fn run_critic(
        &self,
        args: CriticArgs<'_>,
    ) -> Result<StageOutcome<CriticResult>, PipelineError>;

    async fn run_followup(
        &self,
        args: FollowupArgs<'_>,
    ) -> Result<StageOutcome<String>, PipelineError>;
}

/// Production stage runners backed by a model provider.
pub struct ModelRunners {
    provider: Arc<dyn ModelProvider>,
    config: ModelConfig,
}

impl ModelRunners {
    pub fn new(provider: Arc<dyn ModelProvider>, config: ModelConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn request(&self, model: String, system: &str, user: String, temperature: f32) -> ModelRequest {
        ModelRequest {
            model,
            system: system.to_string(),
            user,
            temperature,
            timeout: self.config.timeout,
            schema: None,
        }
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, PipelineError> {
    serde_json::from_value(value).map_err(|err| PipelineError::SchemaValidation(err.to_string()))
}

#[async_trait]
impl StageRunners for ModelRunners {
    async fn run_planner(
        &self,
        args: PlannerArgs<'_>,
    ) -> Result<StageOutcome<PlanJson>, PipelineError> {
        let primary = self.config.model_for_tier(args.tier).to_string();
        let fallback = self.config.fallback_for(&primary).map(str::to_string);
        let user = build_planner_user_prompt(
            args.problem,
            args.attempt,
            args.user_intent,
            args.repair_mode,
        );
        let schema = serde_json::to_value(schema_for!(PlanJson))
            .map_err(|err| PipelineError::Internal(err.into()))?;

        execute_with_model_fallback(&primary, fallback.as_deref(), args.on_fallback, |model| {
            let mut request =
                self.request(model, PLANNER_SYSTEM_PROMPT, user.clone(), PLANNER_TEMPERATURE);
            request.schema = Some(schema.clone());
            async move {
                let raw = self.provider.generate_json(&request).await?;
                let plan: PlanJson = decode_json(raw)?;
                plan.validate()?;
                Ok(plan)
            }
        })
        .await
    }

    async fn run_writer(
        &self,
        args: WriterArgs<'_>,
    ) -> Result<StageOutcome<String>, PipelineError> {
        let primary = self.config.model_for_tier(args.tier).to_string();
        let fallback = self.config.fallback_for(&primary).map(str::to_string);
        let user = build_writer_user_prompt(
            args.problem,
            args.attempt,
            args.plan,
            args.mode,
            args.previous_draft,
            args.critic_gaps,
        );
        let on_delta = args.on_delta;

        execute_with_model_fallback(&primary, fallback.as_deref(), args.on_fallback, |model| {
            let request = self.request(model, WRITER_SYSTEM_PROMPT, user.clone(), WRITER_TEMPERATURE);
            async move {
                let raw = self.provider.generate_text(&request, on_delta).await?;
                let markdown = normalize_math_delimiters(raw.trim());
                if markdown.is_empty() {
                    return Err(PipelineError::EmptyDraft);
                }
                Ok(markdown)
            }
        })
        .await
    }

    async fn run_critic(
        &self,
        args: CriticArgs<'_>,
    ) -> Result<StageOutcome<CriticResult>, PipelineError> {
        let primary = self.config.model_for_tier(args.tier).to_string();
        let fallback = self.config.fallback_for(&primary).map(str::to_string);
        let user = build_critic_user_prompt(args.plan, args.draft, args.mode);
        let schema = serde_json::to_value(schema_for!(CriticResult))
            .map_err(|err| PipelineError::Internal(err.into()))?;

        execute_with_model_fallback(&primary, fallback.as_deref(), args.on_fallback, |model| {
            let mut request =
                self.request(model, CRITIC_SYSTEM_PROMPT, user.clone(), CRITIC_TEMPERATURE);
            request.schema = Some(schema.clone());
            async move {
                let raw = self.provider.generate_json(&request).await?;
                decode_json::<CriticResult>(raw)
            }
        })
        .await
    }

    async fn run_followup(
        &self,
        args: FollowupArgs<'_>,
    ) -> Result<StageOutcome<String>, PipelineError> {
        let primary = self.config.model_followup.clone();
        let fallback = self.config.fallback_for(&primary).map(str::to_string);
        let user = build_followup_user_prompt(args.question, args.mode_hint, args.context);
        let on_delta = args.on_delta;

        execute_with_model_fallback(&primary, fallback.as_deref(), args.on_fallback, |model| {
            let request =
                self.request(model, FOLLOWUP_SYSTEM_PROMPT, user.clone(), FOLLOWUP_TEMPERATURE);
            async move {
                let raw = self.provider.generate_text(&request, on_delta).await?;
                let answer = normalize_math_delimiters(raw.trim());
                if answer.is_empty() {
                    return Err(PipelineError::Provider(
                        "Follow-up model returned an empty answer.".into(),
                    ));
                }
                Ok(answer)
            }
        })
        .await
    }
}

const SCOPE_CLASSIFIER_SYSTEM_PROMPT: &str = "\
You classify whether a request asks for a mathematical proof, derivation, or \
algorithm-correctness argument. Return JSON with keys verdict (ALLOW, REVIEW, \
or BLOCK), confidence (0 to 1), reason, suggestion.";

#[derive(Debug, Deserialize, JsonSchema)]
struct ScopeClassifierWire {
    verdict: WireVerdict,
    confidence: f64,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    suggestion: String,
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum WireVerdict {
    Allow,
    Review,
    Block,
}

impl From<WireVerdict> for ScopeVerdict {
    fn from(verdict: WireVerdict) -> Self {
        match verdict {
            WireVerdict::Allow => ScopeVerdict::Allow,
            WireVerdict::Review => ScopeVerdict::Review,
            WireVerdict::Block => ScopeVerdict::Block,
        }
    }
}

/// Scope classifier backed by the fast model. No fallback: the scope gate
/// already degrades to its heuristic when classification fails.
pub struct ModelScopeClassifier {
    provider: Arc<dyn ModelProvider>,
    config: ModelConfig,
}

impl ModelScopeClassifier {
    pub fn new(provider: Arc<dyn ModelProvider>, config: ModelConfig) -> Self {
        Self { provider, config }
    }
}

#[async_trait]
impl ScopeClassifier for ModelScopeClassifier {
    async fn classify(
        &self,
        problem: &str,
        attempt: Option<&str>,
    ) -> anyhow::Result<ScopeResult> {
        let mut user = format!("Request:\n{problem}");
        if let Some(attempt) = attempt {
            user.push_str(&format!("\n\nUser attempt:\n{attempt}"));
        }
        let request = ModelRequest {
            model: self.config.model_fast.clone(),
            system: SCOPE_CLASSIFIER_SYSTEM_PROMPT.to_string(),
            user,
            temperature: 0.0,
            timeout: self.config.timeout,
            schema: Some(serde_json::to_value(schema_for!(ScopeClassifierWire))?),
        };
        let raw = self.provider.generate_json(&request).await?;
        let wire: ScopeClassifierWire = serde_json::from_value(raw)?;
        Ok(ScopeResult {
            verdict: wire.verdict.into(),
            confidence: wire.confidence,
            reason: wire.reason,
            suggestion: wire.suggestion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::config::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT_MS};
    use crate::types::{
        AuditReport, AuditStatus, PlanCoreLogic, PlanMeta, PlanSetup, PlanStep, PlanStepType,
        ProofStrategy,
    };

    fn config() -> ModelConfig {
        ModelConfig {
            api_key: "test-key".into(),
            base_url: DEFAULT_BASE_URL.into(),
            model_fast: "fast-model".into(),
            model_quality: "quality-model".into(),
            model_followup: "followup-model".into(),
            model_fallback: "fallback-model".into(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    fn plan_value() -> serde_json::Value {
        serde_json::to_value(plan()).unwrap()
    }

    fn plan() -> PlanJson {
        PlanJson {
            meta: PlanMeta {
                strategy: ProofStrategy::DirectProof,
                confidence_score: 0.85,
                user_intent: UserIntent::Learning,
            },
            setup: PlanSetup {
                definitions: vec![],
                assumptions: vec![],
                goal: "n^2 even implies n even".into(),
            },
            core_logic: PlanCoreLogic {
                invariant: String::new(),
                base_cases: vec![],
                contradiction_setup: None,
                observations: vec![],
            },
            steps: vec![PlanStep {
                step_type: PlanStepType::Step,
                content: "Consider the contrapositive.".into(),
            }],
            audit_report: AuditReport {
                status: AuditStatus::Fail,
                attempts: 0,
                critiques: vec![],
                final_verdict: "pending".into(),
            },
        }
    }

    /// Scripted provider: pops one canned response per call, recording the
    /// model each call targeted.
    struct ScriptedProvider {
        json_responses: Mutex<Vec<Result<serde_json::Value, PipelineError>>>,
        text_responses: Mutex<Vec<Result<String, PipelineError>>>,
        models_called: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn json(responses: Vec<Result<serde_json::Value, PipelineError>>) -> Self {
            Self {
                json_responses: Mutex::new(responses),
                text_responses: Mutex::new(vec![]),
                models_called: Mutex::new(vec![]),
            }
        }

        fn text(responses: Vec<Result<String, PipelineError>>) -> Self {
            Self {
                json_responses: Mutex::new(vec![]),
                text_responses: Mutex::new(responses),
                models_called: Mutex::new(vec![]),
            }
        }

        fn models(&self) -> Vec<String> {
            self.models_called.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn generate_json(
            &self,
            request: &ModelRequest,
        ) -> Result<serde_json::Value, PipelineError> {
            self.models_called.lock().unwrap().push(request.model.clone());
            self.json_responses.lock().unwrap().remove(0)
        }

        async fn generate_text(
            &self,
            request: &ModelRequest,
            on_delta: Option<DeltaObserver<'_>>,
        ) -> Result<String, PipelineError> {
            self.models_called.lock().unwrap().push(request.model.clone());
            let result = self.text_responses.lock().unwrap().remove(0);
            if let (Ok(text), Some(observer)) = (&result, on_delta) {
                observer(text);
            }
            result
        }
    }

    #[tokio::test]
    async fn planner_decodes_and_validates_plan() {
        let provider = Arc::new(ScriptedProvider::json(vec![Ok(plan_value())]));
        let runners = ModelRunners::new(provider.clone(), config());
        let outcome = runners
            .run_planner(PlannerArgs {
                problem: "Prove that n^2 even implies n even.",
                attempt: None,
                user_intent: UserIntent::Learning,
                tier: ModelTier::Fast,
                repair_mode: false,
                on_fallback: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.model_id, "fast-model");
        assert_eq!(outcome.result.meta.strategy, ProofStrategy::DirectProof);
        assert_eq!(provider.models(), vec!["fast-model"]);
    }

    #[tokio::test]
    async fn planner_invalid_plan_does_not_fall_back() {
        let mut bad = plan();
        bad.steps.clear();
        let provider = Arc::new(ScriptedProvider::json(vec![Ok(serde_json::to_value(bad)
            .unwrap())]));
        let runners = ModelRunners::new(provider.clone(), config());
        let err = runners
            .run_planner(PlannerArgs {
                problem: "Prove something.",
                attempt: None,
                user_intent: UserIntent::Verification,
                tier: ModelTier::Fast,
                repair_mode: false,
                on_fallback: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SchemaValidation(_)));
        assert_eq!(provider.models(), vec!["fast-model"]);
    }

    #[tokio::test]
    async fn writer_falls_back_on_empty_draft() {
        let provider = Arc::new(ScriptedProvider::text(vec![
            Ok("   \n".into()),
            Ok("## Proof\n\\[x^2\\]".into()),
        ]));
        let runners = ModelRunners::new(provider.clone(), config());
        let plan = plan();
        let outcome = runners
            .run_writer(WriterArgs {
                problem: "Prove something.",
                attempt: None,
                plan: &plan,
                mode: ProofMode::MathFormal,
                previous_draft: None,
                critic_gaps: &[],
                tier: ModelTier::Quality,
                on_delta: None,
                on_fallback: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.model_id, "fallback-model");
        assert_eq!(outcome.result, "## Proof\n$$x^2$$");
        assert_eq!(provider.models(), vec!["quality-model", "fallback-model"]);
    }

    #[tokio::test]
    async fn critic_runs_at_temperature_zero_and_decodes() {
        let verdict = serde_json::json!({
            "status": "FAIL",
            "gaps": ["Missing base case."],
            "final_verdict": "Induction base missing."
        });
        let provider = Arc::new(ScriptedProvider::json(vec![Ok(verdict)]));
        let runners = ModelRunners::new(provider, config());
        let plan = plan();
        let outcome = runners
            .run_critic(CriticArgs {
                plan: &plan,
                draft: "## Draft",
                mode: ProofMode::Explanatory,
                tier: ModelTier::Fast,
                on_fallback: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.result.gaps, vec!["Missing base case."]);
    }

    #[tokio::test]
    async fn followup_rejects_empty_answer_from_both_models() {
        let provider = Arc::new(ScriptedProvider::text(vec![Ok("".into()), Ok("  ".into())]));
        let runners = ModelRunners::new(provider, config());
        let err = runners
            .run_followup(FollowupArgs {
                question: "Why is n even?",
                mode_hint: None,
                context: None,
                on_delta: None,
                on_fallback: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::BothModelsFailed { .. }));
    }

    #[tokio::test]
    async fn scope_classifier_maps_wire_verdict() {
        let provider = Arc::new(ScriptedProvider::json(vec![Ok(serde_json::json!({
            "verdict": "BLOCK",
            "confidence": 0.9,
            "reason": "Creative writing request.",
            "suggestion": "Ask for a provable claim."
        }))]));
        let classifier = ModelScopeClassifier::new(provider, config());
        let result = classifier.classify("Write me a poem", None).await.unwrap();
        assert_eq!(result.verdict, ScopeVerdict::Block);
        assert!((result.confidence - 0.9).abs() < 1e-9);
    }
}
