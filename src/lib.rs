//! webreplay -- resilient replay of recorded browser sessions.
//!
//! This crate replays captured user-interaction sessions against a live page
//! and reports pass/fail with diagnostics, and schedules such replays on
//! fixed intervals under bounded concurrency. Page automation is pluggable
//! behind [`driver::PageDriver`]; the built-in [`driver::sim`] backend serves
//! the test suite and offline validation.

pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod replay;
pub mod resolve;
pub mod schedule;
pub mod session;
pub mod status;

use crate::config::Config;
use crate::diagnostics::{DiagnosticsCapture, LogSink, NotificationSink, RunLog, WebhookSink};
use crate::driver::PageDriver;
use crate::replay::{ReplayEngine, ReplayOptions};
use crate::schedule::{Limiter, ProcessLauncher, RunLauncher, Scheduler, SystemClock};
use crate::session::Session;
use crate::status::{FileStatusStore, StatusStore};
use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Replay one named test end to end: load its session, drive the configured
/// backend, capture diagnostics on failure. Returns whether the run passed.
pub async fn replay_test(cfg: &Config, test_name: &str) -> Result<bool> {
    let name = session::sanitize_test_name(test_name);
    let session = Session::load(&cfg.session_file(&name)).await?;

    let Some(model_path) = &cfg.page_model else {
        bail!("no automation backend configured: set page-model in the config");
    };
    let model = driver::sim::PageModel::from_file(model_path).await?;
    let page = driver::sim::SimPage::new(model);
    run_session(&page, &session, cfg, &name).await
}

/// Replay a session against any backend. Returns whether the run passed;
/// failures are reported through the configured notification sink.
pub async fn run_session(
    page: &dyn PageDriver,
    session: &Session,
    cfg: &Config,
    test_name: &str,
) -> Result<bool> {
    let log = RunLog::new();
    page.subscribe(log.clone());

    let sink: Arc<dyn NotificationSink> = match &cfg.webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone())),
        None => Arc::new(LogSink),
    };
    let diagnostics = DiagnosticsCapture::new(sink, log, cfg.screenshots_dir.clone())
        .with_video_attach_limit(cfg.video_attach_limit_bytes);

    let opts = ReplayOptions {
        navigation_timeout: cfg.navigation_timeout,
        type_delay: cfg.type_delay,
        ..Default::default()
    };
    let mut engine = ReplayEngine::new(page, opts);
    match engine.run(session).await {
        Ok(summary) => {
            info!(test = %test_name, events = summary.events, "replay succeeded");
            Ok(true)
        }
        Err(err) => {
            error!(test = %test_name, step = err.step(), error = %err, "replay failed");
            diagnostics
                .capture(page, test_name, err.step(), &err.to_string())
                .await;
            Ok(false)
        }
    }
}

/// Start the scheduler daemon: one repeating trigger per configured test,
/// runs admitted through the concurrency limiter, each in its own process.
/// Runs until interrupted.
pub async fn run_daemon(cfg: Config, config_path: Option<&Path>) -> Result<()> {
    let status: Arc<dyn StatusStore> = Arc::new(FileStatusStore::new(cfg.sessions_dir.clone()));

    let mut args = vec!["run".to_string()];
    if let Some(path) = config_path {
        args.push("--config".into());
        args.push(path.display().to_string());
    }
    let launcher: Arc<dyn RunLauncher> = Arc::new(ProcessLauncher::current_exe(args)?);

    let limiter = Limiter::new(cfg.max_concurrent_runs, launcher, status);
    let scheduler = Scheduler::new(Arc::new(SystemClock), limiter);
    for entry in &cfg.schedules {
        scheduler.schedule(&entry.test, entry.every);
    }

    info!(
        schedules = cfg.schedules.len(),
        capacity = cfg.max_concurrent_runs,
        "webreplay daemon running"
    );
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    scheduler.shutdown();
    Ok(())
}
