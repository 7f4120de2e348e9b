use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;

use parafetch_core::engine::{Engine, EngineOptions};

mod terminal_observer;
use terminal_observer::TerminalProgressObserver;

#[derive(Parser)]
#[command(name = "parafetch", about = "Parallel segmented download engine")]
struct Args {
    /// URL to download
    url: String,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Speed cap in bytes/sec, 0 = unlimited
    #[arg(short, long, default_value = "0")]
    speed_cap: u64,

    /// Skip TLS peer verification (compatibility opt-in, off by default)
    #[arg(long)]
    insecure: bool,

    /// Resume a previously paused/crashed download by id instead of
    /// starting a fresh one
    #[arg(long)]
    resume: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let observer = Arc::new(TerminalProgressObserver::new());
    let options = EngineOptions { insecure: args.insecure };

    let start = Instant::now();

    let engine = if let Some(id) = args.resume {
        println!("Resuming {id}");
        Engine::resume(id, observer, options).await
    } else {
        println!("Starting download: {}", args.url);
        Engine::start(args.url, args.output, observer, options).await
    };

    if args.speed_cap > 0 {
        engine.set_speed_cap(args.speed_cap).await;
    }

    println!("id: {}", engine.id());
    engine.join().await;
    println!("Finished in {:.2}s", start.elapsed().as_secs_f64());
}
