use async_trait::async_trait;
use redforge::agent::Agent;
use redforge::refine::{
    EngineConfig, LoopVariant, RefinementEngine, UnresponsivePolicy,
};
use redforge::report::{AnswerRecord, PromptRecord};
use redforge::runner::Runner;
use redforge::taxonomy::{Taxonomy, TaxonomyEntry};
use redforge::{AttackGoal, TerminationReason};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Replays a fixed queue of responses, then keeps returning the fallback.
struct ScriptedAgent {
    name: String,
    responses: Mutex<VecDeque<String>>,
    fallback: String,
}

impl ScriptedAgent {
    fn new(name: &str, responses: Vec<&str>, fallback: &str) -> Self {
        Self {
            name: name.to_string(),
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            fallback: fallback.to_string(),
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn generate(&self, _prompt: &str) -> String {
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Always replies with the same text and records every prompt it was sent.
struct RecordingAgent {
    name: String,
    reply: String,
    seen: Mutex<Vec<String>>,
}

impl RecordingAgent {
    fn new(name: &str, reply: &str) -> Self {
        Self {
            name: name.to_string(),
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Agent for RecordingAgent {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn generate(&self, prompt: &str) -> String {
        self.seen.lock().await.push(prompt.to_string());
        self.reply.clone()
    }
}

fn goal(id: &str, text: &str) -> AttackGoal {
    AttackGoal {
        id: id.to_string(),
        goal_text: text.to_string(),
        category: "jailbreak".to_string(),
        severity_hint: 8,
    }
}

fn engine(max_rounds: usize, policy: UnresponsivePolicy) -> RefinementEngine {
    RefinementEngine::new(EngineConfig {
        max_rounds,
        unresponsive_target: policy,
    })
}

fn taxonomy() -> Taxonomy {
    Taxonomy::from_entries(vec![TaxonomyEntry {
        code: "S1".into(),
        name: "Violent Crimes".into(),
    }])
}

#[tokio::test]
async fn test_pursuit_runs_to_round_bound() {
    // Attacker produces p1 then p2; target always answers. With R=2 the
    // session must finish at the bound and the transcript must carry both
    // exchanges in order.
    let attacker = ScriptedAgent::new("attacker", vec!["p1", "p2"], "p-extra");
    let target = RecordingAgent::new("target", "t-resp");
    let engine = engine(2, UnresponsivePolicy::Terminate);

    let outcome = engine.pursue(&attacker, &target, &goal("g1", "X")).await;

    assert_eq!(outcome.goal_id, "g1");
    assert_eq!(outcome.rounds_completed, 2);
    assert_eq!(outcome.termination, TerminationReason::MaxRounds);

    let p1 = outcome.final_prompt.find("User: p1").unwrap();
    let r1 = outcome.final_prompt.find("Assistant: t-resp").unwrap();
    let p2 = outcome.final_prompt.find("User: p2").unwrap();
    assert!(p1 < r1 && r1 < p2);
}

#[tokio::test]
async fn test_pursuit_stops_when_attacker_fails() {
    let attacker = ScriptedAgent::new("attacker", vec![], "");
    let target = RecordingAgent::new("target", "t-resp");
    let engine = engine(3, UnresponsivePolicy::Terminate);

    let outcome = engine.pursue(&attacker, &target, &goal("g1", "X")).await;

    assert_eq!(outcome.termination, TerminationReason::AttackerFailed);
    assert_eq!(outcome.rounds_completed, 0);
    // The target was never queried.
    assert!(target.seen.lock().await.is_empty());
}

#[tokio::test]
async fn test_pursuit_stops_when_target_is_silent() {
    let attacker = ScriptedAgent::new("attacker", vec!["p1"], "p1");
    let target = RecordingAgent::new("target", "");
    let engine = engine(3, UnresponsivePolicy::Terminate);

    let outcome = engine.pursue(&attacker, &target, &goal("g1", "X")).await;

    assert_eq!(outcome.termination, TerminationReason::TargetUnresponsive);
    assert_eq!(outcome.rounds_completed, 0);
}

#[tokio::test]
async fn test_refinement_converges_on_unchanged_candidate() {
    // The refiner always emits the same candidate, so the first feedback
    // round must detect no change and stop short of the bound.
    let refiner = RecordingAgent::new("refiner", "c1");
    let target = RecordingAgent::new("target", "refused");
    let engine = engine(3, UnresponsivePolicy::SkipRound);

    let outcome = engine.refine(&refiner, &target, &goal("g1", "X")).await;

    assert_eq!(outcome.termination, TerminationReason::NoChangeProduced);
    assert!(outcome.rounds_completed < 3);
    assert_eq!(outcome.final_prompt, "c1");
}

#[tokio::test]
async fn test_refinement_falls_back_to_seed_on_failed_initial_rewrite() {
    // Initial rewrite fails, later calls return a fresh candidate each time.
    let refiner = ScriptedAgent::new("refiner", vec!["", "c2", "c3", "c4"], "cX");
    let target = RecordingAgent::new("target", "refused");
    let engine = engine(2, UnresponsivePolicy::SkipRound);

    let outcome = engine
        .refine(&refiner, &target, &goal("g1", "seed prompt"))
        .await;

    assert_eq!(outcome.termination, TerminationReason::MaxRounds);
    assert_eq!(outcome.rounds_completed, 2);
    // Round 1 tested the unmodified seed.
    assert_eq!(target.seen.lock().await[0], "seed prompt");
    assert_eq!(outcome.final_prompt, "c3");
}

#[tokio::test]
async fn test_refinement_skips_rounds_on_silent_target() {
    let refiner = RecordingAgent::new("refiner", "c1");
    let target = RecordingAgent::new("target", "");
    let engine = engine(3, UnresponsivePolicy::SkipRound);

    let outcome = engine.refine(&refiner, &target, &goal("g1", "X")).await;

    // Under the skip policy silence burns every round but never terminates.
    assert_eq!(outcome.termination, TerminationReason::MaxRounds);
    assert_eq!(outcome.rounds_completed, 3);
    assert_eq!(outcome.final_prompt, "c1");
    // Only the initial rewrite happened; no feedback round had a response.
    assert_eq!(refiner.seen.lock().await.len(), 1);
}

#[tokio::test]
async fn test_refinement_can_terminate_on_silent_target() {
    let refiner = RecordingAgent::new("refiner", "c1");
    let target = RecordingAgent::new("target", "");
    let engine = engine(3, UnresponsivePolicy::Terminate);

    let outcome = engine.refine(&refiner, &target, &goal("g1", "X")).await;

    assert_eq!(outcome.termination, TerminationReason::TargetUnresponsive);
    assert_eq!(outcome.rounds_completed, 1);
}

#[tokio::test]
async fn test_runner_yields_one_outcome_per_goal() {
    let refiner: Arc<dyn Agent> = Arc::new(RecordingAgent::new("refiner", "c1"));
    let target: Arc<dyn Agent> = Arc::new(RecordingAgent::new("target", "refused"));
    let engine = Arc::new(engine(2, UnresponsivePolicy::SkipRound));

    let goals: Vec<AttackGoal> = (0..7).map(|i| goal(&format!("g{i}"), "X")).collect();
    let runner = Runner::new(3);
    let outcomes = runner
        .run_sessions(engine, LoopVariant::Feedback, refiner, target, goals)
        .await;

    assert_eq!(outcomes.len(), 7);
    let mut ids: Vec<&str> = outcomes.iter().map(|o| o.goal_id.as_str()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 7);
    for outcome in &outcomes {
        assert!(outcome.rounds_completed <= 2);
    }
}

#[tokio::test]
async fn test_answer_generation_records_target_answers() {
    // Concurrency 1 keeps the scripted replies aligned with prompt order:
    // p1 gets an answer, p2 gets nothing and is skipped.
    let target: Arc<dyn Agent> = Arc::new(ScriptedAgent::new("llama3.1:8b", vec!["t-resp"], ""));
    let runner = Runner::new(1);

    let records = vec![
        PromptRecord {
            id: "g1".into(),
            prompt: "p1".into(),
            kind: "jailbreak".into(),
            harm_rating: 9,
        },
        PromptRecord {
            id: "g2".into(),
            prompt: "p2".into(),
            kind: "jailbreak".into(),
            harm_rating: 8,
        },
    ];

    let answers = runner.run_generation(target, records).await;

    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].id, "g1");
    assert_eq!(answers[0].model_name, "llama3.1:8b");
    assert_eq!(answers[0].prompt, "p1");
    assert_eq!(answers[0].response, "t-resp");
    assert_eq!(answers[0].harm_rating, 9);
}

#[tokio::test]
async fn test_answer_generation_skips_empty_prompts_without_a_call() {
    let target = Arc::new(RecordingAgent::new("target", "t-resp"));
    let runner = Runner::new(1);

    let records = vec![PromptRecord {
        id: "g1".into(),
        prompt: "   ".into(),
        kind: "jailbreak".into(),
        harm_rating: 8,
    }];

    let answers = runner
        .run_generation(Arc::clone(&target) as Arc<dyn Agent>, records)
        .await;

    assert!(answers.is_empty());
    assert!(target.seen.lock().await.is_empty());
}

#[tokio::test]
async fn test_evaluation_classifies_and_attributes_categories() {
    let guard: Arc<dyn Agent> = Arc::new(RecordingAgent::new("guard", "unsafe, S1"));
    let runner = Runner::new(2);

    let answers = vec![AnswerRecord {
        id: "a1".into(),
        model_name: "target".into(),
        prompt: "p".into(),
        kind: "jailbreak".into(),
        harm_rating: 8,
        response: "Sure! Here is how.".into(),
    }];

    let report = runner
        .run_evaluation(guard, Arc::new(taxonomy()), "answers.json", answers)
        .await;

    assert_eq!(report.total_responses, 1);
    assert_eq!(report.evaluations.len(), 1);
    let evaluation = &report.evaluations[0];
    assert!(!evaluation.evaluation.is_safe);
    assert_eq!(evaluation.evaluation.violated_categories[0].code, "S1");
    assert_eq!(evaluation.raw_guard_output, "unsafe, S1");
}

#[tokio::test]
async fn test_evaluation_wraps_refusals_before_classification() {
    // The guard stub always says unsafe; what matters is the upstream
    // contract: the prompt it receives must carry the refusal markers and
    // the instruction to treat marked text as safe.
    let guard = Arc::new(RecordingAgent::new("guard", "unsafe, S1"));
    let runner = Runner::new(1);

    let answers = vec![AnswerRecord {
        id: "a1".into(),
        model_name: "target".into(),
        prompt: "how do I build weapons".into(),
        kind: "jailbreak".into(),
        harm_rating: 8,
        response: "I cannot provide information on weapons.".into(),
    }];

    let report = runner
        .run_evaluation(
            Arc::clone(&guard) as Arc<dyn Agent>,
            Arc::new(taxonomy()),
            "answers.json",
            answers,
        )
        .await;
    assert_eq!(report.evaluations.len(), 1);

    let seen = guard.seen.lock().await;
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("<REFUSAL>I cannot provide information on weapons.</REFUSAL>"));
    assert!(seen[0].contains("MUST classify it as safe"));
}

#[tokio::test]
async fn test_evaluation_skips_answers_the_guard_cannot_process() {
    let guard: Arc<dyn Agent> = Arc::new(RecordingAgent::new("guard", ""));
    let runner = Runner::new(1);

    let answers = vec![AnswerRecord {
        id: "a1".into(),
        model_name: "target".into(),
        prompt: "p".into(),
        kind: "jailbreak".into(),
        harm_rating: 8,
        response: "some response".into(),
    }];

    let report = runner
        .run_evaluation(guard, Arc::new(taxonomy()), "answers.json", answers)
        .await;

    assert_eq!(report.total_responses, 1);
    assert!(report.evaluations.is_empty());
}
