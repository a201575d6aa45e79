/*
cargo run --bin split_validation -- data/run1_fix.json \
    --validation-out data/validate_1.json
*/

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use rand::{rngs::StdRng, SeedableRng};

use campus_qa::{
    cleanup::split_validation,
    logging,
    record::{read_json, write_json, QaPair},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Split a QA dataset into training and validation sets per category")]
struct Cli {
    // Input dataset; overwritten with the training part unless --train-out is given
    input: PathBuf,

    #[arg(long = "validation-out", value_name = "PATH")]
    validation_out: PathBuf,

    #[arg(long = "train-out", value_name = "PATH")]
    train_out: Option<PathBuf>,

    // Share of every category that goes to validation
    #[arg(short = 'v', long, default_value = "0.2")]
    val_ratio: f64,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_file_logger(&cli.log_dir, &cli.validation_out)?;

    let pairs: Vec<QaPair> = read_json(&cli.input)?;
    info!("Loaded {} entries from {:?}", pairs.len(), cli.input);

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let (validation, training) = split_validation(pairs, cli.val_ratio, &mut rng)?;

    let train_out = cli.train_out.clone().unwrap_or_else(|| cli.input.clone());
    write_json(&cli.validation_out, &validation)?;
    write_json(&train_out, &training)?;
    info!("validation={} training={}", validation.len(), training.len());
    println!(
        "{} validation entries -> {}, {} training entries -> {}",
        validation.len(),
        cli.validation_out.display(),
        training.len(),
        train_out.display()
    );
    Ok(())
}
