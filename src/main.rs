use clap::Parser;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use divert::config::Config;
use divert::proxy;

#[derive(Parser)]
#[command(name = "divert")]
#[command(about = "Policy-routing DNS forwarding proxy", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "divert.toml")]
    config: PathBuf,

    /// Override the listen port from the config file
    #[arg(short, long)]
    port: Option<u16>,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(proxy::run(config))
}
