use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use anyhow::Result;
use clap::Parser;
use holdback::{layout, QueueExport};

#[derive(Parser)]
#[command(name = "holdback-export")]
#[command(about = "Print the live contents of a delay queue file")]
struct Cli {
    /// Queue file, or a storage directory containing delayStorage.db
    path: PathBuf,

    /// Optional max entries to print
    #[arg(long)]
    limit: Option<usize>,

    /// Print payloads as hex instead of lossy UTF-8
    #[arg(long)]
    hex: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let file = if cli.path.is_dir() {
        layout::storage_path(&cli.path)
    } else {
        cli.path.clone()
    };

    let queue = QueueExport::open(&file)?;
    let (oldest, newest) = queue.time_span();
    println!(
        "elements={} live={} span_ns={}..{}",
        queue.elements(),
        queue.live_entries(),
        oldest,
        newest
    );

    let mut count = 0usize;
    queue.export(|timestamp, payload| {
        if cli.limit.map_or(false, |max| count >= max) {
            return;
        }
        let ts_ns = timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        if cli.hex {
            let hex: String = payload.iter().map(|b| format!("{b:02x}")).collect();
            println!("ts_ns={} len={} payload={}", ts_ns, payload.len(), hex);
        } else {
            println!(
                "ts_ns={} len={} payload={}",
                ts_ns,
                payload.len(),
                String::from_utf8_lossy(payload)
            );
        }
        count += 1;
    });

    Ok(())
}
