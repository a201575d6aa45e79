/*
cargo run --bin jsonl_to_json -- data/responses.jsonl -o data/responses_converted.json
*/

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde_json::Value;

use campus_qa::record::{read_jsonl, write_json};

// Turn a JSONL file into one pretty-printed JSON array.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    input: PathBuf,

    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let items: Vec<Value> = read_jsonl(&args.input)?;
    write_json(&args.output, &items)?;
    println!("Converted {} line(s) into {}", items.len(), args.output.display());
    Ok(())
}
