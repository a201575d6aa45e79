/*
cargo run --bin category_counts -- data/augmented_data.json
*/

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use campus_qa::{cleanup::tally, record::{read_json, QaPair}};

/// Count paragraph and question categories of a QA dataset.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// QA dataset JSON file
    input: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let pairs: Vec<QaPair> = read_json(&args.input)?;
    let t = tally(&pairs);

    println!("Paragraph Total: {}", t.paragraph_total());
    println!("Question Total: {}", t.question_total());
    println!("{}", t.report());
    Ok(())
}
