mod api;
mod catalog;
mod cli;
mod config;
mod credentials;
mod csvcheck;
mod dashboard;
mod gate;
mod journal;
mod keys;
mod prompt;
mod render;
mod session;
mod store;

use anyhow::{Context as _, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "reel",
    version,
    about = "Console for the movie-data API: sessions, API keys, usage dashboard and catalog admin"
)]
pub struct Args {
    #[arg(long, env = "REEL_API_URL", help = "Backend base URL")]
    pub api_url: Option<String>,

    #[arg(
        long,
        env = "REEL_API_KEY",
        hide_env_values = true,
        help = "API key sent as X-API-Key (overrides the stored active key)"
    )]
    pub api_key: Option<String>,

    #[arg(long, env = "REEL_CONFIG", help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Directory for session state, history and journals")]
    pub data_dir: Option<PathBuf>,

    #[arg(short, long, help = "Answer yes to confirmations")]
    pub yes: bool,

    #[arg(long, help = "Verbose output (info-level logs)")]
    pub verbose: bool,

    #[arg(long, help = "Debug output (HTTP requests and settings)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<cli::Command>,
}

fn init_tracing(args: &Args) {
    let filter = if args.debug {
        EnvFilter::new("reel=debug")
    } else if args.verbose {
        EnvFilter::new("reel=info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args);

    let mut cfg = config::Config::load(args.config.as_deref())?;
    if let Some(url) = &args.api_url {
        cfg.api.base_url = url.clone();
    }
    if let Some(dir) = &args.data_dir {
        cfg.session.data_dir = Some(dir.clone());
    }
    if let Err(errors) = cfg.validate() {
        for error in &errors {
            eprintln!("Config error {}", error);
        }
        anyhow::bail!("invalid configuration ({} error(s))", errors.len());
    }
    tracing::debug!(base_url = %cfg.api.base_url, ttl_hours = cfg.session.ttl_hours, "configuration loaded");

    let data_dir = cfg.session.resolve_data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let storage = store::FileStorage::open(&data_dir.join("state.json"))?;
    tracing::debug!(path = %storage.path().display(), "session state opened");
    let store = session::SessionStore::new(storage);

    let run_id = uuid::Uuid::new_v4().to_string();
    let journal = journal::Journal::open(&data_dir.join("journal"), &run_id)?;

    let interactive = args.command.is_none() || std::io::stdin().is_terminal();
    let prompt = Box::new(prompt::TerminalPrompt::new(args.yes, interactive));

    let client = api::Client::new(&cfg.api.base_url, cfg.api.timeout());
    let mut ctx = cli::Context::new(
        cfg,
        store,
        Arc::new(client),
        journal,
        prompt,
        data_dir,
        args.api_key.clone(),
    );

    match args.command {
        Some(command) => cli::run_once(&mut ctx, command),
        None => cli::run_repl(ctx),
    }
}
