//! Failure diagnostics -- run log accumulation and failure packaging.
//!
//! The run log subscribes to page events and appends immutable records;
//! on a failed run everything is packaged exactly once (screenshot, log,
//! optional video) and handed to the notification sink.

use crate::driver::{PageDriver, PageEvents, RequestSummary};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Response bodies in the network log are truncated to this many bytes.
pub const BODY_LIMIT: usize = 1000;

/// Videos larger than this are retained on disk but not attached.
pub const VIDEO_ATTACH_LIMIT: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct ConsoleEntry {
    pub level: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestEntry {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogData {
    pub console: Vec<ConsoleEntry>,
    pub page_errors: Vec<String>,
    pub network: Vec<RequestEntry>,
}

/// Accumulated console/page-error/network log for one run.
#[derive(Default)]
pub struct RunLog {
    data: Mutex<LogData>,
}

impl RunLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> LogData {
        self.data.lock().unwrap().clone()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.snapshot()).unwrap_or_else(|_| "{}".into())
    }
}

impl PageEvents for RunLog {
    fn on_console(&self, level: &str, text: &str) {
        self.data.lock().unwrap().console.push(ConsoleEntry {
            level: level.to_string(),
            text: text.to_string(),
        });
    }

    fn on_page_error(&self, message: &str) {
        self.data
            .lock()
            .unwrap()
            .page_errors
            .push(message.to_string());
    }

    fn on_request_finished(&self, summary: RequestSummary) {
        let mut body = summary.body;
        if body.len() > BODY_LIMIT {
            // Truncate on a char boundary.
            let mut end = BODY_LIMIT;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        self.data.lock().unwrap().network.push(RequestEntry {
            url: summary.url,
            method: summary.method,
            status: summary.status,
            body,
        });
    }
}

/// What gets handed to the notification sink for one failed run.
#[derive(Debug)]
pub struct FailureReport {
    pub message: String,
    pub screenshot: Option<PathBuf>,
    /// Serialized run log (JSON).
    pub log: String,
    pub video: Option<PathBuf>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, report: &FailureReport) -> anyhow::Result<()>;
}

/// Sink that only writes to the log. Default when no webhook is configured.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, report: &FailureReport) -> anyhow::Result<()> {
        error!(
            message = %report.message,
            screenshot = ?report.screenshot,
            video = ?report.video,
            "replay failed"
        );
        Ok(())
    }
}

/// Posts the failure as a multipart webhook: message as `content`, screenshot
/// and log (and video when small enough) as file parts.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, report: &FailureReport) -> anyhow::Result<()> {
        let mut form = reqwest::multipart::Form::new().text("content", report.message.clone());
        if let Some(path) = &report.screenshot {
            let bytes = tokio::fs::read(path).await?;
            let name = file_name(path, "screenshot.png");
            form = form.part(
                "screenshot",
                reqwest::multipart::Part::bytes(bytes).file_name(name),
            );
        }
        form = form.part(
            "log",
            reqwest::multipart::Part::bytes(report.log.clone().into_bytes())
                .file_name("run-log.json".to_string()),
        );
        if let Some(path) = &report.video {
            let bytes = tokio::fs::read(path).await?;
            let name = file_name(path, "run.webm");
            form = form.part(
                "video",
                reqwest::multipart::Part::bytes(bytes).file_name(name),
            );
        }
        let response = self.client.post(&self.url).multipart(form).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("webhook returned HTTP {}", response.status());
        }
        Ok(())
    }
}

fn file_name(path: &Path, fallback: &str) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback.to_string())
}

/// An active screen recording of the run; stopped and inspected on failure.
#[derive(Debug, Clone)]
pub struct Recording {
    pub path: PathBuf,
}

/// Packages diagnostics for a failed run and forwards them to the sink.
/// Firing is guarded: even when failure is observed from multiple code paths
/// concurrently, the packaging happens exactly once per run.
pub struct DiagnosticsCapture {
    sink: Arc<dyn NotificationSink>,
    log: Arc<RunLog>,
    screenshot_dir: PathBuf,
    recording: Mutex<Option<Recording>>,
    video_attach_limit: u64,
    fired: AtomicBool,
}

impl DiagnosticsCapture {
    pub fn new(sink: Arc<dyn NotificationSink>, log: Arc<RunLog>, screenshot_dir: PathBuf) -> Self {
        Self {
            sink,
            log,
            screenshot_dir,
            recording: Mutex::new(None),
            video_attach_limit: VIDEO_ATTACH_LIMIT,
            fired: AtomicBool::new(false),
        }
    }

    pub fn with_video_attach_limit(mut self, limit: u64) -> Self {
        self.video_attach_limit = limit;
        self
    }

    /// Register the screen recording active for this run, if any.
    pub fn set_recording(&self, recording: Recording) {
        *self.recording.lock().unwrap() = Some(recording);
    }

    /// Whether diagnostics already fired for this run.
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Capture and deliver diagnostics for a failed run. Best effort: the
    /// page may already be gone, in which case the screenshot is skipped.
    pub async fn capture(
        &self,
        driver: &dyn PageDriver,
        test_name: &str,
        step: usize,
        reason: &str,
    ) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.screenshot_dir).await {
            warn!(error = %e, "could not create screenshot dir");
        }
        let shot_path = self
            .screenshot_dir
            .join(format!("{test_name}-step{step}.png"));
        let screenshot = match driver.screenshot(&shot_path).await {
            Ok(()) => {
                info!(path = %shot_path.display(), "failure screenshot captured");
                Some(shot_path)
            }
            Err(e) => {
                warn!(error = %e, "screenshot failed");
                None
            }
        };

        let video = self.finish_recording().await;

        let report = FailureReport {
            message: format!("Test failed: '{test_name}' step {step}: {reason}"),
            screenshot,
            log: self.log.to_json(),
            video,
        };
        if let Err(e) = self.sink.send(&report).await {
            warn!(error = %e, "failure notification could not be delivered");
        }
    }

    /// Stop the active recording and decide whether it is small enough to
    /// attach. Oversized files stay on disk for manual retrieval.
    async fn finish_recording(&self) -> Option<PathBuf> {
        let recording = self.recording.lock().unwrap().take()?;
        match tokio::fs::metadata(&recording.path).await {
            Ok(meta) if meta.len() <= self.video_attach_limit => Some(recording.path),
            Ok(meta) => {
                info!(
                    path = %recording.path.display(),
                    size = meta.len(),
                    "video exceeds attach limit, retained locally"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "recording file unreadable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_bodies_are_truncated() {
        let log = RunLog::new();
        log.on_request_finished(RequestSummary {
            url: "https://api/x".into(),
            method: "GET".into(),
            status: 200,
            body: "x".repeat(5000),
        });
        let data = log.snapshot();
        assert_eq!(data.network.len(), 1);
        assert_eq!(data.network[0].body.len(), BODY_LIMIT);
    }

    #[test]
    fn log_serializes_all_sections() {
        let log = RunLog::new();
        log.on_console("warn", "low fps");
        log.on_page_error("TypeError: boom");
        let json = log.to_json();
        assert!(json.contains("low fps"));
        assert!(json.contains("TypeError"));
    }

    struct CountingSink(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl NotificationSink for CountingSink {
        async fn send(&self, _report: &FailureReport) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Sink that stores the report it receives for inspection.
    #[derive(Default)]
    struct ReportSink(Mutex<Option<FailureReport>>);

    impl ReportSink {
        fn video(&self) -> Option<PathBuf> {
            self.0.lock().unwrap().as_ref().and_then(|r| r.video.clone())
        }
    }

    #[async_trait]
    impl NotificationSink for ReportSink {
        async fn send(&self, report: &FailureReport) -> anyhow::Result<()> {
            *self.0.lock().unwrap() = Some(FailureReport {
                message: report.message.clone(),
                screenshot: report.screenshot.clone(),
                log: report.log.clone(),
                video: report.video.clone(),
            });
            Ok(())
        }
    }

    async fn page() -> crate::driver::sim::SimPage {
        use crate::driver::sim::{PageModel, SimPage};
        let page = SimPage::new(PageModel::single("https://app", vec![]));
        page.navigate("https://app", std::time::Duration::from_secs(1))
            .await
            .unwrap();
        page
    }

    #[tokio::test]
    async fn small_recording_is_attached_to_the_report() {
        let sink = Arc::new(ReportSink::default());
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("run.webm");
        tokio::fs::write(&video, vec![0u8; 64]).await.unwrap();

        let capture =
            DiagnosticsCapture::new(sink.clone(), RunLog::new(), dir.path().to_path_buf());
        capture.set_recording(Recording {
            path: video.clone(),
        });
        capture.capture(&page().await, "checkout", 2, "boom").await;

        assert_eq!(sink.video(), Some(video));
    }

    #[tokio::test]
    async fn oversized_recording_is_retained_but_not_attached() {
        let sink = Arc::new(ReportSink::default());
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("run.webm");
        tokio::fs::write(&video, vec![0u8; 64]).await.unwrap();

        let capture =
            DiagnosticsCapture::new(sink.clone(), RunLog::new(), dir.path().to_path_buf())
                .with_video_attach_limit(16);
        capture.set_recording(Recording {
            path: video.clone(),
        });
        capture.capture(&page().await, "checkout", 2, "boom").await;

        assert_eq!(sink.video(), None);
        assert!(tokio::fs::metadata(&video).await.is_ok());
    }

    #[tokio::test]
    async fn capture_fires_exactly_once() {
        use crate::driver::sim::{PageModel, SimPage};
        let sink = Arc::new(CountingSink(std::sync::atomic::AtomicUsize::new(0)));
        let log = RunLog::new();
        let dir = tempfile::tempdir().unwrap();
        let capture = DiagnosticsCapture::new(sink.clone(), log, dir.path().to_path_buf());

        let page = SimPage::new(PageModel::single("https://app", vec![]));
        page.navigate("https://app", std::time::Duration::from_secs(1))
            .await
            .unwrap();

        capture.capture(&page, "checkout", 3, "boom").await;
        capture.capture(&page, "checkout", 3, "boom").await;
        assert!(capture.fired());
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }
}
