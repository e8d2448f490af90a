//! Scope gate: decides whether a request enters the proof pipeline at all.
//!
//! A keyword heuristic scores the combined problem+attempt text; only when
//! the heuristic lands on REVIEW is an optional model-assisted classifier
//! consulted, and its verdict is honored only above per-verdict confidence
//! thresholds (BLOCK ≥ 0.75, ALLOW ≥ 0.6). Classifier failures degrade to
//! the heuristic verdict: fail-open to REVIEW rather than fail-closed to
//! BLOCK, so a transient model error never locks out a legitimate user.
//!
//! REVIEW requires an explicit user override to proceed; BLOCK cannot be
//! overridden.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Gate verdicts, strictest last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeVerdict {
    Allow,
    Review,
    Block,
}

/// Verdict plus explanation for the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeResult {
    pub verdict: ScopeVerdict,
    pub confidence: f64,
    pub reason: String,
    pub suggestion: String,
}

/// Model-assisted classifier consulted only for ambiguous prompts.
#[async_trait]
pub trait ScopeClassifier: Send + Sync {
    async fn classify(&self, problem: &str, attempt: Option<&str>)
        -> anyhow::Result<ScopeResult>;
}

static MATH_KEYWORD_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bprove\b",
        r"\bproof\b",
        r"\bshow that\b",
        r"\btheorem\b",
        r"\blemma\b",
        r"\bcorollary\b",
        r"\binduction\b",
        r"\bcontradiction\b",
        r"\binvariant\b",
        r"\bgraph\b",
        r"\bdijkstra\b",
        r"\bshortest path\b",
        r"\bcombinatorics\b",
        r"\bprobability\b",
        r"\bnumber theory\b",
        r"\birrational\b",
        r"\bsqrt\b",
        r"\bmod\b",
        r"\binteger\b",
        r"\bderivative\b",
        r"\bintegral\b",
        r"\blimit\b",
        r"\bmatrix\b",
        r"\bcomplexity\b",
        r"\bbig[\s-]?o\b",
        r"\\(frac|sqrt|sum|prod|int|forall|exists)",
        r"[∀∃∑∫√]",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("math keyword regex should compile"))
    .collect()
});

static NON_MATH_KEYWORD_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bpoem\b",
        r"\bstory\b",
        r"\bnovel\b",
        r"\blyrics?\b",
        r"\bmarketing\b",
        r"\bad copy\b",
        r"\bemail\b",
        r"\bresume\b",
        r"\bcover letter\b",
        r"\btravel itinerary\b",
        r"\brecipe\b",
        r"\bhoroscope\b",
        r"\bmovie script\b",
        r"\bsocial media\b",
        r"\binstagram\b",
        r"\btweet\b",
        r"\btranslation\b",
        r"\btranslate\b",
        r"\bstartup pitch\b",
        r"\bbusiness plan\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("non-math keyword regex should compile"))
    .collect()
});

static EQUATION_SIGNAL_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"[=<>+\-*/^]", r"\b\d+\b", r"\$\$?.+\$\$?", r"\bO\([^)]*\)"]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("equation signal regex should compile"))
        .collect()
});

fn count_hits(text: &str, patterns: &[Regex]) -> u32 {
    patterns.iter().filter(|re| re.is_match(text)).count() as u32
}

/// Score the combined text without consulting any model.
pub fn heuristic_assess(problem: &str, attempt: Option<&str>) -> ScopeResult {
    let combined = format!("{problem}\n{}", attempt.unwrap_or("")).to_lowercase();
    let math_hits = count_hits(&combined, &MATH_KEYWORD_RES);
    let non_math_hits = count_hits(&combined, &NON_MATH_KEYWORD_RES);
    let equation_hint = u32::from(count_hits(&combined, &EQUATION_SIGNAL_RES) > 0);
    let math_score = math_hits + equation_hint;

    if non_math_hits >= 2 && math_score <= 1 {
        return ScopeResult {
            verdict: ScopeVerdict::Block,
            confidence: 0.92,
            reason: "The request appears non-mathematical and outside proof scope.".into(),
            suggestion: "Ask for a theorem/proof, derivation, or algorithm-correctness claim."
                .into(),
        };
    }

    if math_score >= 3 && non_math_hits == 0 {
        return ScopeResult {
            verdict: ScopeVerdict::Allow,
            confidence: (0.72 + f64::from(math_score) * 0.05).min(0.99),
            reason: "Detected clear mathematics/proof intent.".into(),
            suggestion: "Proceed with structured plan, proof, and audit.".into(),
        };
    }

    if math_score >= 2 && non_math_hits <= 1 {
        return ScopeResult {
            verdict: ScopeVerdict::Allow,
            confidence: 0.74,
            reason: "Likely mathematical request with moderate certainty.".into(),
            suggestion: "Proceed and let planner infer formal structure.".into(),
        };
    }

    ScopeResult {
        verdict: ScopeVerdict::Review,
        confidence: 0.5,
        reason: "Prompt is ambiguous about whether it is a math-proof request.".into(),
        suggestion: "Clarify the claim, theorem, or equation to prove.".into(),
    }
}

fn normalize_classifier_result(result: ScopeResult) -> ScopeResult {
    let confidence = if result.confidence.is_finite() {
        result.confidence.clamp(0.0, 1.0)
    } else {
        0.5
    };
    let reason = result.reason.trim();
    let suggestion = result.suggestion.trim();
    ScopeResult {
        verdict: result.verdict,
        confidence,
        reason: if reason.is_empty() {
            "Scope classifier provided no reason.".into()
        } else {
            reason.to_string()
        },
        suggestion: if suggestion.is_empty() {
            "Please restate as a math proof request.".into()
        } else {
            suggestion.to_string()
        },
    }
}

/// Run the full gate: heuristic first, classifier only on REVIEW.
pub async fn assess_math_scope(
    problem: &str,
    attempt: Option<&str>,
    classifier: Option<&dyn ScopeClassifier>,
) -> ScopeResult {
    let heuristic = heuristic_assess(problem, attempt);

    if heuristic.verdict != ScopeVerdict::Review {
        return heuristic;
    }
    let Some(classifier) = classifier else {
        return heuristic;
    };

    match classifier.classify(problem, attempt).await {
        Ok(raw) => {
            let model_verdict = normalize_classifier_result(raw);
            match model_verdict.verdict {
                ScopeVerdict::Block if model_verdict.confidence >= 0.75 => model_verdict,
                ScopeVerdict::Allow if model_verdict.confidence >= 0.6 => model_verdict,
                _ => ScopeResult {
                    verdict: ScopeVerdict::Review,
                    confidence: heuristic.confidence.max(model_verdict.confidence),
                    reason: model_verdict.reason,
                    suggestion: model_verdict.suggestion,
                },
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "Scope classifier failed; using heuristic verdict");
            heuristic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClassifier(ScopeResult);

    #[async_trait]
    impl ScopeClassifier for FixedClassifier {
        async fn classify(
            &self,
            _problem: &str,
            _attempt: Option<&str>,
        ) -> anyhow::Result<ScopeResult> {
            Ok(self.0.clone())
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl ScopeClassifier for FailingClassifier {
        async fn classify(
            &self,
            _problem: &str,
            _attempt: Option<&str>,
        ) -> anyhow::Result<ScopeResult> {
            anyhow::bail!("classifier endpoint unreachable")
        }
    }

    #[test]
    fn clear_proof_request_is_allowed() {
        let result =
            heuristic_assess("Show that sqrt(2) is irrational using contradiction.", None);
        assert_eq!(result.verdict, ScopeVerdict::Allow);
        assert!(result.confidence > 0.72);
    }

    #[test]
    fn marketing_request_is_blocked() {
        let result = heuristic_assess(
            "Write a short marketing email for my new coffee shop launch.",
            None,
        );
        assert_eq!(result.verdict, ScopeVerdict::Block);
        assert!((result.confidence - 0.92).abs() < f64::EPSILON);
    }

    #[test]
    fn ambiguous_prompt_falls_to_review() {
        let result = heuristic_assess("Can you help with this claim?", None);
        assert_eq!(result.verdict, ScopeVerdict::Review);
        assert!((result.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn attempt_text_counts_toward_scoring() {
        let result = heuristic_assess(
            "Is this right?",
            Some("I tried induction on n: base case n=1 holds, then the invariant..."),
        );
        assert_eq!(result.verdict, ScopeVerdict::Allow);
    }

    #[tokio::test]
    async fn review_with_no_classifier_stays_review() {
        let result = assess_math_scope("Can you help with this claim?", None, None).await;
        assert_eq!(result.verdict, ScopeVerdict::Review);
    }

    #[tokio::test]
    async fn confident_classifier_block_is_honored() {
        let classifier = FixedClassifier(ScopeResult {
            verdict: ScopeVerdict::Block,
            confidence: 0.8,
            reason: "creative writing".into(),
            suggestion: "ask for a theorem".into(),
        });
        let result =
            assess_math_scope("Can you help with this claim?", None, Some(&classifier)).await;
        assert_eq!(result.verdict, ScopeVerdict::Block);
    }

    #[tokio::test]
    async fn hesitant_classifier_block_stays_review() {
        let classifier = FixedClassifier(ScopeResult {
            verdict: ScopeVerdict::Block,
            confidence: 0.7,
            reason: "probably off-topic".into(),
            suggestion: "clarify".into(),
        });
        let result =
            assess_math_scope("Can you help with this claim?", None, Some(&classifier)).await;
        assert_eq!(result.verdict, ScopeVerdict::Review);
        // Keeps the higher of the two confidences.
        assert!((result.confidence - 0.7).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn classifier_allow_threshold_is_lower() {
        let classifier = FixedClassifier(ScopeResult {
            verdict: ScopeVerdict::Allow,
            confidence: 0.65,
            reason: "looks like a claim".into(),
            suggestion: "proceed".into(),
        });
        let result =
            assess_math_scope("Can you help with this claim?", None, Some(&classifier)).await;
        assert_eq!(result.verdict, ScopeVerdict::Allow);
    }

    #[tokio::test]
    async fn classifier_failure_degrades_to_heuristic() {
        let result =
            assess_math_scope("Can you help with this claim?", None, Some(&FailingClassifier))
                .await;
        assert_eq!(result.verdict, ScopeVerdict::Review);
    }

    #[tokio::test]
    async fn classifier_not_consulted_when_heuristic_decides() {
        // A confident ALLOW never reaches the classifier, even one that
        // would BLOCK.
        let classifier = FixedClassifier(ScopeResult {
            verdict: ScopeVerdict::Block,
            confidence: 0.99,
            reason: "should not be used".into(),
            suggestion: "n/a".into(),
        });
        let result = assess_math_scope(
            "Prove the theorem that every integer n > 1 has a prime factor.",
            None,
            Some(&classifier),
        )
        .await;
        assert_eq!(result.verdict, ScopeVerdict::Allow);
    }

    #[test]
    fn classifier_confidence_is_clamped() {
        let normalized = normalize_classifier_result(ScopeResult {
            verdict: ScopeVerdict::Allow,
            confidence: 3.5,
            reason: "  ".into(),
            suggestion: String::new(),
        });
        assert!((normalized.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(normalized.reason, "Scope classifier provided no reason.");
    }
}
