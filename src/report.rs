//! On-disk JSON formats: goal/prompt files, answer files and guard
//! evaluation reports, plus conversions to and from the domain records.

use crate::moderation::ModerationVerdict;
use crate::{AttackGoal, RedForgeResult, RefinementOutcome};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_harm_rating() -> i64 {
    8
}

/// One record in a prompt file: `{id, prompt, type, harm_rating}`. Used both
/// as input (goals) and output (refined prompts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRecord {
    pub id: String,
    pub prompt: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default = "default_harm_rating")]
    pub harm_rating: i64,
}

/// A `{"prompts": [...]}` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptFile {
    #[serde(default)]
    pub prompts: Vec<PromptRecord>,
}

impl PromptFile {
    pub fn load(path: &Path) -> RedForgeResult<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read prompt file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("cannot parse prompt file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> RedForgeResult<()> {
        write_json(path, self)
    }

    /// Maps the records to attack goals, skipping entries with no prompt text.
    pub fn goals(&self) -> Vec<AttackGoal> {
        self.prompts
            .iter()
            .filter(|record| !record.prompt.trim().is_empty())
            .map(AttackGoal::from)
            .collect()
    }

    pub fn from_outcomes(outcomes: &[RefinementOutcome]) -> Self {
        Self {
            prompts: outcomes.iter().map(PromptRecord::from).collect(),
        }
    }
}

impl From<&PromptRecord> for AttackGoal {
    fn from(record: &PromptRecord) -> Self {
        AttackGoal {
            id: record.id.clone(),
            goal_text: record.prompt.clone(),
            category: record.kind.clone(),
            severity_hint: record.harm_rating,
        }
    }
}

impl From<&RefinementOutcome> for PromptRecord {
    fn from(outcome: &RefinementOutcome) -> Self {
        PromptRecord {
            id: outcome.goal_id.clone(),
            prompt: outcome.final_prompt.clone(),
            kind: outcome.category.clone(),
            harm_rating: outcome.severity_hint,
        }
    }
}

/// A target model's answer awaiting guard evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub id: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default = "default_harm_rating")]
    pub harm_rating: i64,
    #[serde(default)]
    pub response: String,
}

/// A `{"responses": [...]}` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerFile {
    #[serde(default)]
    pub responses: Vec<AnswerRecord>,
}

impl AnswerFile {
    pub fn load(path: &Path) -> RedForgeResult<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read answer file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("cannot parse answer file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> RedForgeResult<()> {
        write_json(path, self)
    }
}

/// One classified answer in the evaluation report.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub id: String,
    pub model_name: String,
    pub prompt: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub harm_rating: i64,
    pub response: String,
    pub evaluation: ModerationVerdict,
    pub raw_guard_output: String,
}

/// The guard evaluation report for one answer file.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub input_file: String,
    pub total_responses: usize,
    pub processed_at: String,
    pub evaluations: Vec<Evaluation>,
}

impl EvaluationReport {
    pub fn new(input_file: impl Into<String>, total_responses: usize) -> Self {
        Self {
            input_file: input_file.into(),
            total_responses,
            processed_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            evaluations: Vec::new(),
        }
    }

    pub fn save(&self, path: &Path) -> RedForgeResult<()> {
        write_json(path, self)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> RedForgeResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create directory {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))
}
