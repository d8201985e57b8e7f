//! Inspects a recorded `.fgo` snapshot: prints the tree as indented rows,
//! optionally as a delta against a baseline recording.

use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result};
use flamegraph::{diff, fgo, Frame};

#[derive(Parser)]
#[command(name = "flamewire-replay")]
#[command(about = "inspect a recorded flamegraph snapshot", long_about = None)]
struct Args {
    #[arg(help = "recorded snapshot (.fgo or .json[.gz])")]
    file: PathBuf,

    #[arg(short, long, help = "baseline recording to diff against")]
    base: Option<PathBuf>,

    #[arg(short, long, default_value = "0", help = "hide rows with |cumulative| below this")]
    threshold: i64,
}

fn load(path: &PathBuf) -> Result<Frame> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    fgo::decode(&bytes).with_context(|| format!("failed to decode {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let head = load(&args.file)?;
    let frame = match &args.base {
        Some(base_path) => {
            let base = load(base_path)?;
            match diff(Some(&head), Some(&base)) {
                Some(frame) => frame,
                None => {
                    println!("no differences");
                    return Ok(());
                }
            }
        }
        None => head,
    };

    for row in frame.flatten() {
        if row.cumulative.abs() < args.threshold {
            continue;
        }
        println!(
            "{:indent$}{}  self={} cum={}",
            "",
            row.name,
            row.self_value,
            row.cumulative,
            indent = row.depth * 2
        );
    }
    Ok(())
}
