use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use proofsmith::events::{EventSink, NdjsonSink, StreamEvent};
use proofsmith::provider::OpenAiProvider;
use proofsmith::runners::{ModelRunners, ModelScopeClassifier};
use proofsmith::scope::{assess_math_scope, ScopeClassifier};
use proofsmith::service::{FollowupRequest, GenerationOutcome, GenerationService, KickStore};
use proofsmith::store::{InMemoryStore, PostgresStore, ProofStore};
use proofsmith::types::{GenerateRequest, ProofMode, UserIntent, VariantRole};
use proofsmith::ModelConfig;

#[derive(Parser)]
#[command(name = "proofsmith", about = "Structured proof generation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum IntentArg {
    Learning,
    Verification,
}

impl From<IntentArg> for UserIntent {
    fn from(arg: IntentArg) -> Self {
        match arg {
            IntentArg::Learning => UserIntent::Learning,
            IntentArg::Verification => UserIntent::Verification,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    MathFormal,
    Explanatory,
}

impl From<ModeArg> for ProofMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::MathFormal => ProofMode::MathFormal,
            ModeArg::Explanatory => ProofMode::Explanatory,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    FastPrimary,
    BackgroundQuality,
}

impl From<RoleArg> for VariantRole {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::FastPrimary => VariantRole::FastPrimary,
            RoleArg::BackgroundQuality => VariantRole::BackgroundQuality,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Generate a proof, streaming NDJSON events to stdout.
    Generate {
        #[arg(long)]
        problem: String,
        /// The user's own attempted proof, if any.
        #[arg(long)]
        attempt: Option<String>,
        #[arg(long, value_enum, default_value = "learning")]
        intent: IntentArg,
        #[arg(long, value_enum, default_value = "math-formal")]
        mode: ModeArg,
        /// Proceed even when the scope gate answers REVIEW.
        #[arg(long)]
        override_scope: bool,
        /// Process the background-quality job before exiting.
        #[arg(long)]
        wait_background: bool,
    },
    /// Run worker sweeps until interrupted.
    Worker {
        #[arg(long)]
        batch: Option<usize>,
        #[arg(long, default_value_t = 10)]
        interval_seconds: u64,
        /// Run a single sweep and exit.
        #[arg(long)]
        once: bool,
    },
    /// Print the status of a background job as JSON.
    Job {
        job_id: String,
    },
    /// Ask a follow-up question about a stored run.
    Followup {
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        question: String,
        #[arg(long, value_enum)]
        role: Option<RoleArg>,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },
    /// Run only the scope gate and print its verdict as JSON.
    Scope {
        #[arg(long)]
        problem: String,
        #[arg(long)]
        attempt: Option<String>,
    },
}

async fn build_store() -> Result<Arc<dyn ProofStore>> {
    match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let store = PostgresStore::connect(&url)
                .await
                .context("connecting to Postgres")?;
            info!("Using Postgres store");
            Ok(Arc::new(store))
        }
        _ => {
            info!("DATABASE_URL not set; using in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ModelConfig::from_env().context("resolving model configuration")?;
    let provider = Arc::new(OpenAiProvider::new(
        config.base_url.clone(),
        config.api_key.clone(),
    ));
    let runners = Arc::new(ModelRunners::new(provider.clone(), config.clone()));
    let classifier: Arc<dyn ScopeClassifier> =
        Arc::new(ModelScopeClassifier::new(provider, config.clone()));
    let store = build_store().await?;
    let service = GenerationService::new(
        store.clone(),
        runners,
        Some(classifier.clone()),
        config,
        KickStore::from_env(),
    );

    match cli.command {
        Command::Generate {
            problem,
            attempt,
            intent,
            mode,
            override_scope,
            wait_background,
        } => {
            let sink: Arc<dyn EventSink> = Arc::new(NdjsonSink::new(io::stdout()));
            let request = GenerateRequest {
                problem,
                attempt,
                user_intent: intent.into(),
                mode_preference: mode.into(),
            };
            let outcome = service
                .run_generation(request, override_scope, Some(sink.clone()))
                .await?;
            match outcome {
                GenerationOutcome::Completed { payload, job_id } => {
                    if wait_background {
                        let worker = service.worker();
                        worker.process_specific_job(&job_id).await?;
                        let status = service.job_status(&job_id).await?;
                        sink.emit(StreamEvent::BackgroundUpdate {
                            run_id: payload.run_id,
                            job_id,
                            status: status.status.to_string(),
                            mode: status.mode.unwrap_or(ProofMode::Explanatory),
                            proof: status.proof,
                            error: status.error,
                        });
                    }
                }
                GenerationOutcome::ScopeBlocked(result)
                | GenerationOutcome::ScopeReview(result) => {
                    eprintln!("{}", serde_json::to_string_pretty(&result)?);
                    std::process::exit(2);
                }
            }
        }
        Command::Worker {
            batch,
            interval_seconds,
            once,
        } => {
            let worker = service.worker();
            loop {
                let summary = worker.process_queued_jobs(batch).await?;
                info!(
                    queued_seen = summary.queued_seen,
                    processed = summary.processed,
                    completed = summary.completed,
                    failed = summary.failed,
                    "Sweep finished"
                );
                if once {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(interval_seconds)).await;
            }
        }
        Command::Job { job_id } => {
            let status = service.job_status(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Followup {
            run_id,
            question,
            role,
            mode,
        } => {
            let print_delta = |delta: &str| {
                print!("{delta}");
                let _ = io::stdout().flush();
            };
            let answer = service
                .followup(FollowupRequest {
                    run_id: &run_id,
                    question: &question,
                    variant_role: role.map(Into::into),
                    mode_hint: mode.map(Into::into),
                    on_delta: Some(&print_delta),
                })
                .await?;
            // Deltas already went to stdout; make sure the full answer ends
            // with a newline even when streaming was unavailable.
            if !answer.markdown.ends_with('\n') {
                println!();
            }
            if !answer.used_context {
                eprintln!("note: no stored variant found for this run id");
            }
        }
        Command::Scope { problem, attempt } => {
            let result =
                assess_math_scope(&problem, attempt.as_deref(), Some(classifier.as_ref())).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
