use redforge::agent::{Agent, GenerationOptions, OllamaAgent, OpenAiAgent, PacedAgent, Pacer};
use redforge::refine::{EngineConfig, LoopVariant, RefinementEngine, UnresponsivePolicy};
use redforge::report::{AnswerFile, PromptFile};
use redforge::runner::Runner;
use redforge::taxonomy::Taxonomy;
use redforge::TerminationReason;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use dotenv::dotenv;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
/// Minimum spacing between backend calls, shared across all goal workers.
const PACE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "RedForge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Multi-turn goal pursuit: an attacker model adapts to the target's replies
    Pursue {
        #[command(flatten)]
        session: SessionArgs,

        /// The attacker model
        #[arg(long, default_value = "dolphin-llama3:latest")]
        attacker_model: String,
    },

    /// Feedback-driven refinement of one evolving candidate prompt per goal
    Refine {
        #[command(flatten)]
        session: SessionArgs,

        /// The refiner model
        #[arg(long, default_value = "dolphin-llama3:latest")]
        refiner_model: String,

        /// What to do when the target returns no text mid-loop
        #[arg(long, value_enum, default_value_t = UnresponsiveArg::Skip)]
        on_unresponsive: UnresponsiveArg,
    },

    /// Run a prompt file against a target model and record its answers
    Answer {
        /// JSON file of prompts ({"prompts": [{id, prompt, type, harm_rating}]})
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the answer file ({"responses": [...]})
        #[arg(short, long)]
        output: PathBuf,

        /// The target model under test
        #[arg(long, default_value = "llama3.1:8b")]
        target_model: String,

        /// Which backend protocol the target speaks
        #[arg(long, value_enum, default_value_t = Backend::Ollama)]
        backend: Backend,

        /// Backend base URL (falls back to REDFORGE_BASE_URL)
        #[arg(long)]
        base_url: Option<String>,

        /// Only process the first N prompts
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, default_value = "4")]
        concurrency: usize,
    },

    /// Classify target answers with a guard model against the safety taxonomy
    Evaluate {
        /// JSON file of answers to classify ({"responses": [...]})
        #[arg(short, long)]
        input_file: PathBuf,

        /// Taxonomy config file ({"taxonomy": [{code, name}]})
        #[arg(short, long, default_value = "policy_config.json")]
        taxonomy: PathBuf,

        /// The guard model
        #[arg(long, default_value = "llama-guard3")]
        guard_model: String,

        /// Which backend protocol the guard speaks
        #[arg(long, value_enum, default_value_t = Backend::Ollama)]
        backend: Backend,

        /// Where to write the evaluation report
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Backend base URL (falls back to REDFORGE_BASE_URL)
        #[arg(long)]
        base_url: Option<String>,

        #[arg(long, default_value = "2")]
        concurrency: usize,
    },
}

#[derive(Args)]
struct SessionArgs {
    /// JSON file of goals ({"prompts": [{id, prompt, type, harm_rating}]})
    #[arg(short, long)]
    input: PathBuf,

    /// Where to write the refined prompts
    #[arg(short, long)]
    output: PathBuf,

    /// The target model under test
    #[arg(long, default_value = "llama3.1:8b")]
    target_model: String,

    /// Maximum refinement rounds per goal
    #[arg(short, long, default_value = "3")]
    rounds: usize,

    /// Which backend protocol the models speak
    #[arg(long, value_enum, default_value_t = Backend::Ollama)]
    backend: Backend,

    /// Backend base URL (falls back to REDFORGE_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Only process the first N goals
    #[arg(long)]
    limit: Option<usize>,

    #[arg(long, default_value = "4")]
    concurrency: usize,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// The Ollama generate protocol
    Ollama,
    /// An OpenAI-compatible chat-completions endpoint (needs OPENAI_API_KEY)
    Openai,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum UnresponsiveArg {
    /// Skip the round and try again
    Skip,
    /// End the goal's session
    Terminate,
}

impl From<UnresponsiveArg> for UnresponsivePolicy {
    fn from(arg: UnresponsiveArg) -> Self {
        match arg {
            UnresponsiveArg::Skip => UnresponsivePolicy::SkipRound,
            UnresponsiveArg::Terminate => UnresponsivePolicy::Terminate,
        }
    }
}

fn resolve_base_url(flag: &Option<String>) -> String {
    flag.clone()
        .or_else(|| env::var("REDFORGE_BASE_URL").ok())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

/// Builds a paced agent on the selected backend, probing it first.
async fn connect(
    backend: Backend,
    base_url: &Option<String>,
    model: &str,
    options: GenerationOptions,
    pacer: &Arc<Pacer>,
) -> anyhow::Result<Arc<dyn Agent>> {
    let agent: Arc<dyn Agent> = match backend {
        Backend::Ollama => Arc::new(OllamaAgent::new(resolve_base_url(base_url), model, options)),
        Backend::Openai => {
            let api_key = env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY must be set for the openai backend")?;
            match base_url {
                Some(base) => Arc::new(OpenAiAgent::with_base_url(
                    api_key,
                    model.to_string(),
                    base.clone(),
                )),
                None => Arc::new(OpenAiAgent::new(api_key, model.to_string())),
            }
        }
    };
    if !agent.probe().await {
        bail!("cannot reach {}", model);
    }
    println!("Connected to {}", model.cyan());
    Ok(Arc::new(PacedAgent::new(agent, Arc::clone(pacer))))
}

async fn run_session_command(
    variant: LoopVariant,
    session: &SessionArgs,
    primary_model: &str,
    policy: UnresponsivePolicy,
) -> anyhow::Result<()> {
    let pacer = Arc::new(Pacer::new(PACE_INTERVAL));

    let primary = connect(
        session.backend,
        &session.base_url,
        primary_model,
        GenerationOptions::default(),
        &pacer,
    )
    .await?;
    let target = connect(
        session.backend,
        &session.base_url,
        &session.target_model,
        GenerationOptions::default(),
        &pacer,
    )
    .await?;

    let file = PromptFile::load(&session.input)?;
    let mut goals = file.goals();
    if let Some(limit) = session.limit {
        goals.truncate(limit);
    }
    if goals.is_empty() {
        bail!("no goals found in {}", session.input.display());
    }

    let engine = Arc::new(RefinementEngine::new(EngineConfig {
        max_rounds: session.rounds,
        unresponsive_target: policy,
    }));
    let runner = Runner::new(session.concurrency);
    let outcomes = runner
        .run_sessions(engine, variant, primary, target, goals)
        .await;

    let completed = outcomes
        .iter()
        .filter(|o| o.termination == TerminationReason::MaxRounds)
        .count();
    println!("Total goals: {}", outcomes.len());
    println!(
        "Ran to the round bound: {}",
        format!("{}", completed).green().bold()
    );

    PromptFile::from_outcomes(&outcomes).save(&session.output)?;
    println!("Output saved to {}", session.output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Pursue {
            session,
            attacker_model,
        } => {
            println!("{}", "RedForge: goal pursuit".bold().cyan());
            // The pursuit loop always terminates on an unresponsive target;
            // the policy argument only matters for feedback refinement.
            run_session_command(
                LoopVariant::Pursuit,
                session,
                attacker_model,
                UnresponsivePolicy::Terminate,
            )
            .await
        }

        Commands::Refine {
            session,
            refiner_model,
            on_unresponsive,
        } => {
            println!("{}", "RedForge: feedback refinement".bold().cyan());
            run_session_command(
                LoopVariant::Feedback,
                session,
                refiner_model,
                (*on_unresponsive).into(),
            )
            .await
        }

        Commands::Answer {
            input,
            output,
            target_model,
            backend,
            base_url,
            limit,
            concurrency,
        } => {
            println!("{}", "RedForge: answer generation".bold().cyan());

            let pacer = Arc::new(Pacer::new(PACE_INTERVAL));
            let target = connect(
                *backend,
                base_url,
                target_model,
                GenerationOptions::default(),
                &pacer,
            )
            .await?;

            let file = PromptFile::load(input)?;
            let mut records = file.prompts;
            if let Some(limit) = limit {
                records.truncate(*limit);
            }
            if records.is_empty() {
                bail!("no prompts found in {}", input.display());
            }

            let runner = Runner::new(*concurrency);
            let responses = runner.run_generation(target, records).await;

            AnswerFile { responses }.save(output)?;
            println!("Answers saved to {}", output.display());
            Ok(())
        }

        Commands::Evaluate {
            input_file,
            taxonomy,
            guard_model,
            backend,
            output,
            base_url,
            concurrency,
        } => {
            println!("{}", "RedForge: guard evaluation".bold().cyan());

            let taxonomy = Arc::new(Taxonomy::load(taxonomy)?);
            println!("Loaded taxonomy with {} categories", taxonomy.len());

            let pacer = Arc::new(Pacer::new(PACE_INTERVAL));
            let guard = connect(
                *backend,
                base_url,
                guard_model,
                GenerationOptions::deterministic(),
                &pacer,
            )
            .await?;

            let answers = AnswerFile::load(input_file)?;
            if answers.responses.is_empty() {
                bail!("no responses found in {}", input_file.display());
            }

            let input_name = input_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let runner = Runner::new(*concurrency);
            let report = runner
                .run_evaluation(guard, taxonomy, &input_name, answers.responses)
                .await;

            let output_path = output.clone().unwrap_or_else(|| {
                let stem = input_file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "answers".to_string());
                PathBuf::from(format!("guard_evaluations_{stem}.json"))
            });
            report.save(&output_path)?;
            println!("Report saved to {}", output_path.display());
            Ok(())
        }
    }
}
