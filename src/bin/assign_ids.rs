/*
cargo run --bin assign_ids -- data/paragraphs.json -o data/paragraphs_with_ids.json
*/

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use campus_qa::{
    cleanup::assign_ids,
    record::{read_json, write_json, RawParagraph},
};

// Add a short content-hash "code" to every paragraph record.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    input: PathBuf,

    // Defaults to rewriting the input in place
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut rows: Vec<RawParagraph> = read_json(&args.input)?;
    let changed = assign_ids(&mut rows);

    let output = args.output.unwrap_or_else(|| args.input.clone());
    write_json(&output, &rows)?;
    println!("Codes added to {} of {} record(s) in {}", changed, rows.len(), output.display());
    Ok(())
}
