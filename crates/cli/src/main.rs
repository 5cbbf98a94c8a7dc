use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

#[derive(Parser)]
#[command(name = "tgwa")]
#[command(about = "Telegram to WhatsApp news relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file (every key spelled out, including the news template).
    Init {
        /// Config file path (default: TGWA_CONFIG_PATH or ~/.tgwa/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the bridge: Telegram listener, WhatsApp link watcher, relay and dashboard.
    Run {
        /// Config file path (default: TGWA_CONFIG_PATH or ~/.tgwa/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Dashboard port (default from PORT, config, or 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Format text read from stdin as an announcement and print it, without sending anything.
    Preview {
        /// Config file path (default: TGWA_CONFIG_PATH or ~/.tgwa/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print the status JSON of a running bridge.
    Status {
        /// Config file path (default: TGWA_CONFIG_PATH or ~/.tgwa/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("tgwa {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config, port }) => {
            if let Err(e) = run_bridge(config, port).await {
                log::error!("bridge failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Preview { config }) => {
            if let Err(e) = run_preview(config).await {
                log::error!("preview failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Status { config }) => {
            if let Err(e) = run_status(config).await {
                log::error!("status failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_bridge(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting bridge with {} on {}:{}",
        path.display(),
        config.gateway.bind,
        config.gateway.port
    );
    lib::gateway::run_gateway(config).await
}

async fn run_preview(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let mut raw = String::new();
    tokio::io::stdin().read_to_string(&mut raw).await?;
    let announcement = lib::news::format(&raw);
    println!("{}", announcement.render(&config.news));
    Ok(())
}

async fn run_status(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let host = match config.gateway.bind.trim() {
        "0.0.0.0" | "::" | "" => "127.0.0.1".to_string(),
        other => other.to_string(),
    };
    let url = format!("http://{}:{}/status", host, config.gateway.port);
    let res = reqwest::get(&url).await?.error_for_status()?;
    let status: serde_json::Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
