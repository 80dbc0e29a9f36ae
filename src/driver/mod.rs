//! Page-automation capability contract.
//!
//! The replay core never talks to a browser directly; it drives whatever
//! backend implements [`PageDriver`]. The crate ships [`sim`], an in-memory
//! backend used by the test suite and for offline session validation. Real
//! browser backends (CDP, WebDriver, ...) plug in behind the same trait.

pub mod sim;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("timed out after {timeout_ms}ms waiting for selector '{selector}'")]
    WaitTimeout { selector: String, timeout_ms: u64 },

    #[error("automation backend error: {0}")]
    Backend(String),
}

/// A live element on the current page. `node` is an opaque backend handle
/// used to act on the element; the metadata snapshot is what the resolver
/// filters on.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementHandle {
    pub node: u64,
    /// Lowercase tag name.
    pub tag: String,
    /// Visible text content.
    pub text: String,
    pub id: Option<String>,
    /// `for` attribute when the element is a label.
    pub for_id: Option<String>,
    /// `type` attribute for inputs.
    pub input_type: Option<String>,
    pub disabled: bool,
    /// Still attached to the document.
    pub connected: bool,
    pub width: f64,
    pub height: f64,
}

impl ElementHandle {
    /// An element can exist in the DOM yet be unusable: detached, collapsed,
    /// or zero-sized. No strategy may declare success on such a candidate.
    pub fn is_actionable(&self) -> bool {
        self.connected && self.width > 0.0 && self.height > 0.0
    }
}

/// Identifier for a sub-frame (iframe) of the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameId(pub String);

/// Summary of a finished network request, as reported by the backend.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub url: String,
    pub method: String,
    pub status: u16,
    /// Response body; observers truncate for storage.
    pub body: String,
}

/// Synchronous observer for page-side events. The replay engine registers one
/// of these with the backend; implementations append immutable records rather
/// than mutating shared structures from callbacks.
pub trait PageEvents: Send + Sync {
    fn on_console(&self, level: &str, text: &str);
    fn on_page_error(&self, message: &str);
    fn on_request_finished(&self, summary: RequestSummary);
}

/// Contract required from any page-automation backend.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Load `url`, resolving once the document is ready. Hard timeout.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    /// All elements in the main document matching a CSS selector (comma
    /// lists allowed), in document order.
    async fn query(&self, selector: &str) -> Result<Vec<ElementHandle>, DriverError>;

    /// First element matching an XPath expression, if any.
    async fn query_xpath(&self, xpath: &str) -> Result<Option<ElementHandle>, DriverError>;

    /// Elements matching `selector` among the descendants of `el`.
    async fn query_within(
        &self,
        el: &ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, DriverError>;

    async fn frames(&self) -> Vec<FrameId>;

    async fn query_in_frame(
        &self,
        frame: &FrameId,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, DriverError>;

    async fn click(&self, el: &ElementHandle) -> Result<(), DriverError>;

    /// Focus `el`, select any existing content, then type `text` one
    /// character at a time with `char_delay` between keystrokes, so
    /// frameworks listening per-keystroke observe realistic input events.
    async fn type_text(
        &self,
        el: &ElementHandle,
        text: &str,
        char_delay: Duration,
    ) -> Result<(), DriverError>;

    /// Wait until `selector` matches, up to `timeout`. `WaitTimeout` on
    /// expiry.
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<ElementHandle, DriverError>;

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError>;

    /// Evaluate a script in the page context and return its JSON result.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, DriverError>;

    /// Register the observer that receives console/page-error/network events.
    fn subscribe(&self, observer: Arc<dyn PageEvents>);
}
