//! Static per-strategy mental models.
//!
//! A closed dispatch table over [`ProofStrategy`]; never model-generated.

use crate::types::{MentalModel, ProofStrategy};

fn model(title: &str, trick: &str, logic: &str, invariant: &str) -> MentalModel {
    MentalModel {
        title: title.to_string(),
        trick: trick.to_string(),
        logic: logic.to_string(),
        invariant: invariant.to_string(),
    }
}

/// Look up the intuition card for a strategy.
pub fn mental_model_for(strategy: ProofStrategy) -> MentalModel {
    match strategy {
        ProofStrategy::DirectProof => model(
            "Direct Proof",
            "Assume the premises and push forward with valid implications.",
            "Every step should reduce distance to the target claim without contradiction.",
            "Each established statement remains true and reusable.",
        ),
        ProofStrategy::ContradictionGeneral => model(
            "Contradiction (General)",
            "Assume the negation and force an impossible conclusion.",
            "If assumptions imply both a claim and its negation, the negation is false.",
            "Logical rules remain valid under temporary negation assumptions.",
        ),
        ProofStrategy::ContradictionMinimality => model(
            "Minimal Counterexample",
            "Assume failure and choose the first or smallest failure.",
            "If that failure implies an even earlier failure, contradiction follows.",
            "All earlier cases are correct by minimality.",
        ),
        ProofStrategy::InductionWeak => model(
            "Weak Induction",
            "Prove base case, then n implies n+1.",
            "A chain from the base case covers all natural numbers.",
            "Induction hypothesis is valid for the current n.",
        ),
        ProofStrategy::InductionStrong => model(
            "Strong Induction",
            "Assume all earlier cases and prove n.",
            "The stronger hypothesis unlocks recursive dependencies.",
            "All k < n satisfy the property during the step.",
        ),
        ProofStrategy::GreedyExchange => model(
            "Greedy Exchange",
            "Swap an optimal solution toward the greedy choice without worsening it.",
            "If exchange preserves optimality, greedy can be part of an optimal solution.",
            "Each exchange keeps solution feasibility and objective value.",
        ),
        ProofStrategy::InvariantMaintenance => model(
            "Invariant Maintenance",
            "State a condition that is true before and after each iteration.",
            "Initialization + maintenance + termination implies correctness.",
            "Declared invariant statement itself.",
        ),
        ProofStrategy::PigeonholePrinciple => model(
            "Pigeonhole",
            "Show more objects than containers under given constraints.",
            "At least one container must hold multiple objects.",
            "Total count and container count bounds are fixed.",
        ),
        ProofStrategy::Constructive => model(
            "Constructive Proof",
            "Build an explicit witness that satisfies the claim.",
            "Verification of the constructed object proves existence.",
            "Construction constraints remain satisfied at every step.",
        ),
        ProofStrategy::CaseAnalysis => model(
            "Case Analysis",
            "Partition the domain into exhaustive, disjoint cases.",
            "If each case implies the claim, the whole domain does too.",
            "Case partition remains complete and non-overlapping.",
        ),
    }
}
