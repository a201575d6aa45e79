/*
cargo run --release --bin augment_dataset -- \
    --mode concurrent \
    data/hopefully_final.json \
    data/augmented_data.json

Every question is followed by up to four rephrased children (<ID>-1 .. <ID>-4).
*/

use std::{env, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tokio::time::Duration;

use campus_qa::{
    cleanup::with_rephrasings,
    completion::{OpenAiClient, DEFAULT_ENDPOINT, DEFAULT_MODEL},
    dispatch::{self, Dispatcher, Mode, DEFAULT_DELAY_MS, DEFAULT_MAX_IN_FLIGHT},
    generator::{QaGenerator, REPHRASE_COUNT},
    logging,
    record::{read_json, write_json, QaPair},
    retry::{policy_from_cli, Retrying},
};

#[derive(Parser, Debug)]
#[command(version, author, about = "Add rephrased child questions to a QA dataset")]
struct Cli {
    input: PathBuf,
    output: PathBuf,

    // Rephrasings requested per question
    #[arg(long, default_value_t = REPHRASE_COUNT)]
    count: usize,

    #[arg(long, value_enum)]
    mode: Option<Mode>,

    #[arg(long, default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    max_in_flight: usize,

    #[arg(long = "delay-ms", default_value_t = DEFAULT_DELAY_MS)]
    delay_ms: u64,

    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    #[arg(long = "api-key", value_name = "KEY")]
    api_key: Option<String>,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_file_logger(&cli.log_dir, &cli.output)?;
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
    let generator = QaGenerator::new(client);
    let dispatcher = Dispatcher::new(mode, cli.max_in_flight, Duration::from_millis(cli.delay_ms))?;

    let pairs: Vec<QaPair> = read_json(&cli.input)?;
    info!("Loaded {} entries from {}", pairs.len(), cli.input.display());

    let bar = logging::progress_bar(pairs.len() as u64)?;
    let count = cli.count;
    let task_bar = bar.clone();
    let mut rephrased = dispatcher
        .run(pairs, &bar, move |_, pair| {
            let generator = generator.clone();
            let bar = task_bar.clone();
            async move {
                bar.println(format!("Augmenting object with ID = {}", pair.id));
                let children = generator.rephrase(&pair.question, count).await;
                Ok::<_, anyhow::Error>((pair, children))
            }
        })
        .await?;
    bar.finish_with_message("done");
    rephrased.sort_by_key(|(idx, _)| *idx);

    let mut augmented = Vec::new();
    for (_, (pair, children)) in rephrased {
        augmented.extend(with_rephrasings(pair, children));
    }
    write_json(&cli.output, &augmented)?;

    info!("wrote {} entries to {}", augmented.len(), cli.output.display());
    println!("Augmentation complete, {} entries saved to {}", augmented.len(), cli.output.display());
    Ok(())
}
