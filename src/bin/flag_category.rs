/*
cargo run --bin flag_category -- data/hopefully_final.json \
    --category "Campus Life" \
    --count 762
*/

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};

use campus_qa::{
    category::Category,
    cleanup::flag_category,
    record::{read_json, write_json, QaPair},
};

/// Randomly flag entries of an over-represented question category so the
/// filter step can drop them.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// QA dataset, rewritten in place unless --output is given
    input: PathBuf,

    /// Question category to thin out (one of the five labels)
    #[arg(long)]
    category: Category,

    /// How many entries to flag
    #[arg(long)]
    count: usize,

    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seed for a reproducible selection
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut pairs: Vec<QaPair> = read_json(&args.input)?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let flagged = flag_category(&mut pairs, args.category, args.count, &mut rng);

    let output = args.output.unwrap_or_else(|| args.input.clone());
    write_json(&output, &pairs)?;
    println!("Flagged {flagged} \"{}\" entries in {}", args.category, output.display());
    Ok(())
}
