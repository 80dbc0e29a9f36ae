use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use webreplay::config::Config;
use webreplay::session::{sanitize_test_name, Session};
use webreplay::status::{FileStatusStore, StatusStore};

#[derive(Parser)]
#[command(
    name = "webreplay",
    about = "Resilient replay of recorded browser sessions with scheduled pass/fail monitoring",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (TOML); built-in defaults when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay one recorded test; exit code 0 on pass, 1 on fail
    Run {
        /// Test name (sessions/<name>.json)
        test: String,
    },

    /// Start the scheduler daemon (periodic replays under bounded concurrency)
    Daemon,

    /// Parse and validate a session file without replaying it
    Validate {
        /// Test name
        test: String,
    },

    /// List recorded tests with their last run status
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { test } => {
            let passed = webreplay::replay_test(&cfg, &test).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Daemon => {
            webreplay::run_daemon(cfg, cli.config.as_deref()).await?;
        }
        Commands::Validate { test } => {
            let name = sanitize_test_name(&test);
            let session = Session::load(&cfg.session_file(&name)).await?;
            let href = session
                .first_navigate()
                .map(|(h, _)| h.to_string())
                .unwrap_or_default();
            println!(
                "{}: {} events, starts at {}, device {}",
                name,
                session.events.len(),
                href,
                session.device.as_deref().unwrap_or("desktop")
            );
        }
        Commands::List => {
            let store = FileStatusStore::new(cfg.sessions_dir.clone());
            let tests = list_tests(&cfg)?;
            if tests.is_empty() {
                println!("No recorded tests in {}.", cfg.sessions_dir.display());
            } else {
                println!("{:<24} | {:<10} | URL", "Test", "Status");
                println!("{:-<24}-|-{:-<10}-|-{:-<40}", "", "", "");
                for (name, href) in tests {
                    let status = store.read(&name).await.status;
                    println!("{:<24} | {:<10} | {}", name, status, href);
                }
            }
        }
    }

    Ok(())
}

/// Session files in the sessions dir, newest first, with their starting URL.
fn list_tests(cfg: &Config) -> Result<Vec<(String, String)>> {
    let dir = match std::fs::read_dir(&cfg.sessions_dir) {
        Ok(dir) => dir,
        Err(_) => return Ok(Vec::new()),
    };
    let mut entries: Vec<(Option<std::time::SystemTime>, String, String)> = Vec::new();
    for entry in dir.flatten() {
        let path = entry.path();
        let Some(file) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file.ends_with(".status.json") {
            continue;
        }
        let Some(name) = file.strip_suffix(".json") else {
            continue;
        };
        let name = name.to_string();
        let href = std::fs::read_to_string(&path)
            .ok()
            .and_then(|json| Session::from_json(&json).ok())
            .and_then(|s| s.first_navigate().map(|(h, _)| h.to_string()))
            .unwrap_or_default();
        let mtime = entry.metadata().and_then(|m| m.modified()).ok();
        entries.push((mtime, name, href));
    }
    entries.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(entries.into_iter().map(|(_, n, h)| (n, h)).collect())
}
