/*
cargo run --bin fix_categories -- data/real_final_dataset.json -o data/maybe_final.json
*/

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use campus_qa::{
    cleanup::{fix_categories, tally},
    logging,
    record::{read_json, write_json, QaPair},
};

// Map stray category answers back onto the five labels.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    input: PathBuf,

    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_file_logger(&args.log_dir, &args.output)?;

    let mut pairs: Vec<QaPair> = read_json(&args.input)?;
    let changed = fix_categories(&mut pairs);
    info!("{changed} of {} categories rewritten", pairs.len());

    write_json(&args.output, &pairs)?;
    println!("{changed} of {} categories rewritten", pairs.len());
    println!("{}", tally(&pairs).report());
    Ok(())
}
