use clap::Parser;
use servertool::bot;
use std::path::PathBuf;

/// Discord bot that controls a cloud-hosted game server instance.
#[derive(Parser)]
#[command(name = "servertool", version)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
    /// Path to the cloud credential file
    #[arg(long)]
    credential: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    if let Err(e) = runtime.block_on(bot::run(&args.config, &args.credential)) {
        eprintln!("Error starting bot: {}", e);
        std::process::exit(1);
    }
}
