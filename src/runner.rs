//! The async engine that fans independent goal sessions out across a bounded
//! worker pool.
//!
//! Each session owns its own [`ConversationHistory`](crate::history::ConversationHistory)
//! inside its future, so sessions never share mutable state and cancelling one
//! cannot corrupt another. No ordering is implied across goals; the outcome
//! set is commutative.

use crate::agent::Agent;
use crate::moderation::{self, ModerationVerdict};
use crate::refine::{LoopVariant, RefinementEngine};
use crate::report::{AnswerRecord, Evaluation, EvaluationReport, PromptRecord};
use crate::taxonomy::Taxonomy;
use crate::{AttackGoal, RefinementOutcome, TerminationReason};
use colored::*;
use futures::{stream, StreamExt};
use std::sync::Arc;

pub struct Runner {
    concurrency: usize,
}

impl Runner {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Runs one refinement session per goal, at most `concurrency` at a time.
    /// Every input goal yields exactly one outcome, whatever happened
    /// mid-loop.
    pub async fn run_sessions(
        &self,
        engine: Arc<RefinementEngine>,
        variant: LoopVariant,
        agent: Arc<dyn Agent>,
        target: Arc<dyn Agent>,
        goals: Vec<AttackGoal>,
    ) -> Vec<RefinementOutcome> {
        let total = goals.len();
        println!(
            "Running {} goal sessions ({} vs {}) with concurrency {}",
            total,
            agent.model_name().cyan(),
            target.model_name().cyan(),
            self.concurrency
        );

        let outcomes = stream::iter(goals)
            .map(|goal| {
                let engine = Arc::clone(&engine);
                let agent = Arc::clone(&agent);
                let target = Arc::clone(&target);

                async move {
                    let outcome = engine
                        .run_goal(variant, agent.as_ref(), target.as_ref(), &goal)
                        .await;
                    log_outcome(&outcome);
                    outcome
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        println!("{}", "All sessions finished.".bold().white());
        outcomes
    }

    /// Sends each prompt to the target model and records its answer. Empty
    /// prompts are skipped without a backend call; prompts that yield no
    /// usable output are reported as failed and skipped.
    pub async fn run_generation(
        &self,
        target: Arc<dyn Agent>,
        records: Vec<PromptRecord>,
    ) -> Vec<AnswerRecord> {
        println!(
            "Answering {} prompts with {}",
            records.len(),
            target.model_name().cyan()
        );

        let answers = stream::iter(records)
            .map(|record| {
                let target = Arc::clone(&target);

                async move {
                    if record.prompt.trim().is_empty() {
                        return None;
                    }
                    let response = target.generate(&record.prompt).await;
                    if response.is_empty() {
                        eprintln!("[{}] {}", "FAILED".red().bold(), record.id);
                        return None;
                    }
                    println!("[{}] {}", "ANSWERED".green(), record.id);
                    Some(AnswerRecord {
                        id: record.id,
                        model_name: target.model_name().to_string(),
                        prompt: record.prompt,
                        kind: record.kind,
                        harm_rating: record.harm_rating,
                        response,
                    })
                }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|answer| async { answer })
            .collect::<Vec<_>>()
            .await;

        println!(
            "{} {} answers recorded.",
            "Generation complete.".bold().white(),
            answers.len()
        );
        answers
    }

    /// Classifies every answer with the guard model. Answers for which the
    /// guard returns no usable output are reported as failed and skipped.
    pub async fn run_evaluation(
        &self,
        guard: Arc<dyn Agent>,
        taxonomy: Arc<Taxonomy>,
        input_file: &str,
        answers: Vec<AnswerRecord>,
    ) -> EvaluationReport {
        let mut report = EvaluationReport::new(input_file, answers.len());
        println!(
            "Evaluating {} responses with guard {}",
            answers.len(),
            guard.model_name().cyan()
        );

        let evaluations = stream::iter(answers)
            .map(|answer| {
                let guard = Arc::clone(&guard);
                let taxonomy = Arc::clone(&taxonomy);

                async move { evaluate_answer(guard.as_ref(), &taxonomy, answer).await }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|result| async { result })
            .collect::<Vec<_>>()
            .await;

        report.evaluations = evaluations;
        println!(
            "{} {}/{} responses classified.",
            "Evaluation complete.".bold().white(),
            report.evaluations.len(),
            report.total_responses
        );
        report
    }
}

async fn evaluate_answer(
    guard: &dyn Agent,
    taxonomy: &Taxonomy,
    answer: AnswerRecord,
) -> Option<Evaluation> {
    if answer.response.trim().is_empty() {
        return None;
    }

    let tagged = moderation::tag_refusal(&answer.response);
    let prompt = moderation::moderation_prompt(&answer.prompt, &tagged, taxonomy);
    let raw_output = guard.generate(&prompt).await;

    if raw_output.is_empty() {
        eprintln!("[{}] {}", "FAILED".red().bold(), answer.id);
        return None;
    }

    let verdict = moderation::parse_verdict(&raw_output, taxonomy);
    log_verdict(&answer.id, &verdict);

    Some(Evaluation {
        id: answer.id,
        model_name: answer.model_name,
        prompt: answer.prompt,
        kind: answer.kind,
        harm_rating: answer.harm_rating,
        response: answer.response,
        evaluation: verdict,
        raw_guard_output: raw_output,
    })
}

fn log_outcome(outcome: &RefinementOutcome) {
    match outcome.termination {
        TerminationReason::MaxRounds => println!(
            "[{}] goal {} finished {} rounds",
            "DONE".green(),
            outcome.goal_id,
            outcome.rounds_completed
        ),
        reason => println!(
            "[{}] goal {} stopped after {} rounds: {:?}",
            "EARLY".yellow(),
            outcome.goal_id,
            outcome.rounds_completed,
            reason
        ),
    }
}

fn log_verdict(id: &str, verdict: &ModerationVerdict) {
    if verdict.is_safe {
        println!("[{}] {}", "SAFE".green(), id);
    } else {
        let codes = verdict
            .violated_categories
            .iter()
            .map(|entry| entry.code.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        println!("[{}] {} ({})", "UNSAFE".red().bold(), id, codes);
    }
}
