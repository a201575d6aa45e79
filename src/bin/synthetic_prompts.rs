/*
cargo run --release --bin synthetic_prompts -- \
    --mode concurrent \
    data/instruction_dataset.json \
    data/responses.jsonl

Appends one {"User Query": ..., "Response": ...} line per paragraph, in the
order the calls finish.
*/

use std::{env, path::Path, path::PathBuf, sync::Arc, time::Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::info;
use tokio::time::Duration;

use campus_qa::{
    completion::{CompletionClient, OpenAiClient, DEFAULT_ENDPOINT, DEFAULT_MODEL},
    dispatch::{self, Dispatcher, JsonlSink, Mode, DEFAULT_DELAY_MS, DEFAULT_MAX_IN_FLIGHT},
    generator::{split_query_response, synthetic_prompt},
    logging,
    record::{load_paragraphs, StreamRecord},
    retry::{policy_from_cli, Retrying},
};

#[derive(Parser, Debug)]
#[command(version, author, about = "Generate user-query/response pairs as JSONL")]
struct Cli {
    input: PathBuf,
    // JSONL file, appended to
    output: PathBuf,

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
    let dispatcher = Dispatcher::new(mode, cli.max_in_flight, Duration::from_millis(cli.delay_ms))?;

    let paragraphs = load_paragraphs(&cli.input)?;
    let total = paragraphs.len();
    info!("Loaded {total} paragraphs from {}", cli.input.display());

    let bar = logging::progress_bar(total as u64)?;
    let sink: JsonlSink<StreamRecord> = JsonlSink::spawn(cli.output.clone(), cli.max_in_flight);
    let tx = sink.sender();
    let task_bar = bar.clone();

    let run = dispatcher
        .run(paragraphs, &bar, move |index, paragraph| {
            let client = Arc::clone(&client);
            let tx = tx.clone();
            let bar = task_bar.clone();
            async move {
                let started = Instant::now();
                let file_name = paragraph
                    .source
                    .as_deref()
                    .and_then(|s| Path::new(s).file_name())
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                bar.println(format!("Processing paragraph {}/{total}: {file_name}", index + 1));

                let generated = client.complete(&synthetic_prompt(&paragraph.text)).await?;
                let record = split_query_response(&file_name, &generated);
                tx.send(record).await.map_err(|_| anyhow!("jsonl writer stopped"))?;

                bar.println(format!(
                    "Finished paragraph {}/{total} in {:.1} seconds.",
                    index + 1,
                    started.elapsed().as_secs_f64()
                ));
                Ok::<_, anyhow::Error>(())
            }
        })
        .await;
    bar.finish_with_message("done");

    // a dead writer shows up as send failures; report its own error instead
    let written = sink.finish().await?;
    run?;
    info!("Appended {written} line(s) to {}", cli.output.display());
    println!("Appended {written} line(s) to {}", cli.output.display());
    Ok(())
}
