/*
cargo run --bin filter_dataset -- data/athletics_output.json \
    --duplicates --flagged --blank \
    -o data/athletics_output_final.json
*/

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use log::info;

use campus_qa::{
    cleanup::{filter_dataset, FilterOptions},
    logging,
    record::{read_json, write_json, QaPair},
};

// Drop reviewed entries from a QA dataset.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    input: PathBuf,

    #[arg(short, long)]
    output: PathBuf,

    // Drop entries with "Flagged": true
    #[arg(long)]
    flagged: bool,

    // Drop entries with "Is_Duplicate": true (also reads "Is Duplicate")
    #[arg(long)]
    duplicates: bool,

    // Drop entries whose question is empty or whitespace
    #[arg(long)]
    blank: bool,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if !(args.flagged || args.duplicates || args.blank) {
        bail!("nothing to do: pass at least one of --flagged, --duplicates, --blank");
    }
    logging::init_file_logger(&args.log_dir, &args.output)?;

    let pairs: Vec<QaPair> = read_json(&args.input)?;
    let opts = FilterOptions {
        drop_flagged: args.flagged,
        drop_duplicates: args.duplicates,
        drop_blank: args.blank,
    };
    let (kept, report) = filter_dataset(pairs, opts);
    info!("{report:?}");

    write_json(&args.output, &kept)?;
    println!(
        "kept {} (removed: {} duplicate, {} flagged, {} blank) -> {}",
        report.kept,
        report.duplicates,
        report.flagged,
        report.blank,
        args.output.display()
    );
    if report.duplicates > 0 {
        println!("Removed duplicates by category:\n{}", report.duplicate_tally.report());
    }
    Ok(())
}
