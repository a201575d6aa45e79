/*
cargo run --release --bin generate_qa -- \
    --mode concurrent \
    --threshold 0.9 \
    data/full_question_generation.json \
    data/run1.json

Writes data/run1.json and data/run1_flagged.json (or --flagged <PATH>).
*/

use std::{env, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tokio::time::Duration;

use campus_qa::{
    assembler::{self, AssemblerConfig, CategorizeStage, DatasetAssembler, DedupScope, DEFAULT_SYSTEM_PROMPT},
    completion::{OpenAiClient, DEFAULT_ENDPOINT, DEFAULT_MODEL},
    dedup::{CandidateStrategy, Deduplicator},
    dispatch::{self, Dispatcher, Mode, DEFAULT_DELAY_MS, DEFAULT_MAX_IN_FLIGHT},
    logging,
    record::load_paragraphs,
    retry::{policy_from_cli, Retrying},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Candidates {
    Exhaustive,
    Lsh,
}

#[derive(Parser, Debug)]
#[command(version, author, about = "Generate categorized QA pairs from paragraphs and flag near-duplicate questions")]
struct Cli {
    // Paragraph records: [{"response": ..., "code": ...}, ...]
    input: PathBuf,
    // QA dataset to (over)write
    output: PathBuf,

    // Audit list of flagged pairs; defaults to <output stem>_flagged.json
    #[arg(long)]
    flagged: Option<PathBuf>,

    // Asked interactively when left out
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    #[arg(long, default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    max_in_flight: usize,

    // Milliseconds to sleep after every generation call
    #[arg(long = "delay-ms", default_value_t = DEFAULT_DELAY_MS)]
    delay_ms: u64,

    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    // Cosine similarity above which two questions count as duplicates
    #[arg(long, default_value_t = 0.9)]
    threshold: f64,

    #[arg(long, value_enum, default_value_t = Candidates::Exhaustive)]
    candidates: Candidates,

    #[arg(long, value_enum, default_value_t = DedupScope::Global)]
    dedup_scope: DedupScope,

    #[arg(long, value_enum, default_value_t = CategorizeStage::BeforeDedup)]
    categorize: CategorizeStage,

    #[arg(long, default_value = DEFAULT_SYSTEM_PROMPT)]
    system_prompt: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    // API key; overrides $OPENAI_API_KEY
    #[arg(long = "api-key", value_name = "KEY")]
    api_key: Option<String>,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_path = logging::init_file_logger(&cli.log_dir, &cli.output)?;
    info!("run started -> model={}, threshold={}, log={}", cli.model, cli.threshold, log_path.display());

    let mode = match cli.mode {
        Some(mode) => mode,
        None => dispatch::prompt_mode()?,
    };

    let api_key = cli
        .api_key
        .clone()
        .or_else(|| env::var("OPENAI_API_KEY").ok())
        .context("provide --api-key or set OPENAI_API_KEY")?;
    let client = OpenAiClient::new(&cli.endpoint, &cli.model, &api_key)?;
    let client = Arc::new(Retrying::new(client, policy_from_cli(cli.max_attempts)?));

    let strategy = match cli.candidates {
        Candidates::Exhaustive => CandidateStrategy::Exhaustive,
        Candidates::Lsh => CandidateStrategy::DEFAULT_LSH,
    };
    let dedup = Deduplicator::new(cli.threshold, strategy)?;
    let dispatcher = Dispatcher::new(mode, cli.max_in_flight, Duration::from_millis(cli.delay_ms))?;
    let config = AssemblerConfig {
        system_prompt: cli.system_prompt.clone(),
        scope: cli.dedup_scope,
        stage: cli.categorize,
    };
    let assembler = DatasetAssembler::new(client, dedup, dispatcher, config)?;

    let paragraphs = load_paragraphs(&cli.input)?;
    info!("Loaded {} paragraphs from {}", paragraphs.len(), cli.input.display());
    println!("Processing paragraphs...");

    let bar = logging::progress_bar(paragraphs.len() as u64)?;
    let outcome = assembler.run(&paragraphs, &bar).await?;
    bar.finish_with_message("done");

    let flagged_path = cli.flagged.clone().unwrap_or_else(|| assembler::audit_path_for(&cli.output));
    assembler::persist(&outcome, &cli.output, &flagged_path)?;

    let report = outcome.tally.report();
    info!("{report}");
    println!("{report}");
    println!(
        "{} flagged pair(s) written to {}; dataset written to {}",
        outcome.flagged.len(),
        flagged_path.display(),
        cli.output.display()
    );

    Ok(())
}
