//! Structured proof generation pipeline.
//!
//! A natural-language math claim goes through a planner, writer, and critic
//! stage, each a model call with primary/fallback routing, and comes out as
//! a plan plus an audited markdown proof. The synchronous fast variant
//! streams progress events; a background job later produces a second,
//! higher-quality variant in the opposite rendering mode.
//!
//! Layering, bottom up:
//!
//! * [`provider`] talks to the OpenAI-compatible gateway.
//! * [`fallback`], [`heartbeat`] wrap individual stage calls.
//! * [`runners`] turns stages into typed calls with prompts and schemas.
//! * [`pipeline`] runs one variant's state machine.
//! * [`service`] and [`worker`] sit on [`store`] and run whole requests.

pub mod config;
pub mod error;
pub mod events;
pub mod fallback;
pub mod formatting;
pub mod heartbeat;
pub mod latex;
pub mod mental_model;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod runners;
pub mod scope;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod types;
pub mod worker;

pub use config::ModelConfig;
pub use error::{PipelineError, StoreError};
pub use events::{EventSink, NdjsonSink, StreamEvent};
pub use pipeline::{run_variant_pipeline, RunVariantPipelineArgs, VariantPipelineResult};
pub use runners::{ModelRunners, ModelScopeClassifier, StageRunners};
pub use service::{GenerationOutcome, GenerationService, JobStatusResponse, KickStore};
pub use store::{InMemoryStore, PostgresStore, ProofStore};
pub use types::{FinalProofPayload, GenerateRequest, ProofMode, UserIntent};
pub use worker::{ProofWorker, SweepSummary};
