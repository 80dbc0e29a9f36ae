//! In-memory page backend.
//!
//! Backs the test suite and offline session validation (`run` against a page
//! model file). A [`PageModel`] declares, per URL, the elements present and
//! any console/network traffic to emit on load. The selector matcher covers
//! the simple-selector subset the resolver emits (`#id`, `[name=...]`, tag
//! lists, classes, `input[type=...]`, `input:not([type])`); recorded CSS
//! paths it cannot parse are matched against each element's declared
//! `selectors` list verbatim.

use super::{DriverError, ElementHandle, FrameId, PageDriver, PageEvents, RequestSummary};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SimElement {
    pub tag: String,
    pub text: String,
    pub id: Option<String>,
    pub name: Option<String>,
    pub class_name: Option<String>,
    #[serde(rename = "type")]
    pub input_type: Option<String>,
    pub for_id: Option<String>,
    pub parent_id: Option<String>,
    pub frame: Option<String>,
    pub xpath: Option<String>,
    /// Extra CSS selectors this element answers to verbatim.
    pub selectors: Vec<String>,
    pub disabled: bool,
    pub visible: bool,
    pub value: String,
}

impl Default for SimElement {
    fn default() -> Self {
        Self {
            tag: String::new(),
            text: String::new(),
            id: None,
            name: None,
            class_name: None,
            input_type: None,
            for_id: None,
            parent_id: None,
            frame: None,
            xpath: None,
            selectors: Vec::new(),
            disabled: false,
            visible: true,
            value: String::new(),
        }
    }
}

impl SimElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn button(text: &str) -> Self {
        Self {
            tag: "button".into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn text_input() -> Self {
        Self::new("input")
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_class(mut self, class_name: &str) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn with_type(mut self, input_type: &str) -> Self {
        self.input_type = Some(input_type.into());
        self
    }

    pub fn with_for(mut self, for_id: &str) -> Self {
        self.for_id = Some(for_id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_frame(mut self, frame: &str) -> Self {
        self.frame = Some(frame.into());
        self
    }

    pub fn with_xpath(mut self, xpath: &str) -> Self {
        self.xpath = Some(xpath.into());
        self
    }

    pub fn with_selector(mut self, selector: &str) -> Self {
        self.selectors.push(selector.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct SimRequest {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub body: String,
}

/// Everything the simulated page does on load.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct SimPageSpec {
    pub elements: Vec<SimElement>,
    pub console: Vec<String>,
    pub page_errors: Vec<String>,
    pub requests: Vec<SimRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PageModel {
    pub pages: HashMap<String, SimPageSpec>,
}

impl PageModel {
    /// Model with a single page of elements.
    pub fn single(url: &str, elements: Vec<SimElement>) -> Self {
        let mut pages = HashMap::new();
        pages.insert(
            url.to_string(),
            SimPageSpec {
                elements,
                ..Default::default()
            },
        );
        Self { pages }
    }

    pub async fn from_file(path: &Path) -> anyhow::Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Action log entry; tests assert against these.
#[derive(Debug, Clone, PartialEq)]
pub enum SimAction {
    Navigate { url: String },
    Click { target: String },
    Type { target: String, value: String },
}

pub struct SimPage {
    model: PageModel,
    current: Mutex<Option<String>>,
    actions: Mutex<Vec<SimAction>>,
    observer: Mutex<Option<Arc<dyn PageEvents>>>,
}

impl SimPage {
    pub fn new(model: PageModel) -> Self {
        Self {
            model,
            current: Mutex::new(None),
            actions: Mutex::new(Vec::new()),
            observer: Mutex::new(None),
        }
    }

    pub fn actions(&self) -> Vec<SimAction> {
        self.actions.lock().unwrap().clone()
    }

    /// Targets of all clicks performed so far.
    pub fn clicked(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                SimAction::Click { target } => Some(target),
                _ => None,
            })
            .collect()
    }

    /// `(target, value)` of all typing performed so far.
    pub fn typed(&self) -> Vec<(String, String)> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                SimAction::Type { target, value } => Some((target, value)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, action: SimAction) {
        self.actions.lock().unwrap().push(action);
    }

    fn page(&self) -> Result<&SimPageSpec, DriverError> {
        let url = self
            .current
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DriverError::Backend("no page loaded".into()))?;
        self.model
            .pages
            .get(&url)
            .ok_or_else(|| DriverError::Backend(format!("page vanished: {url}")))
    }

    fn handle(&self, node: usize, el: &SimElement) -> ElementHandle {
        let (width, height) = if el.visible { (24.0, 24.0) } else { (0.0, 0.0) };
        ElementHandle {
            node: node as u64,
            tag: el.tag.to_ascii_lowercase(),
            text: el.text.clone(),
            id: el.id.clone(),
            for_id: el.for_id.clone(),
            input_type: el.input_type.clone(),
            disabled: el.disabled,
            connected: true,
            width,
            height,
        }
    }

    /// Human-readable identity for the action log.
    fn target_label(&self, node: u64) -> String {
        let Ok(page) = self.page() else {
            return format!("node#{node}");
        };
        match page.elements.get(node as usize) {
            Some(el) => el
                .id
                .clone()
                .or_else(|| el.name.clone())
                .unwrap_or_else(|| {
                    if el.text.is_empty() {
                        el.tag.clone()
                    } else {
                        el.text.clone()
                    }
                }),
            None => format!("node#{node}"),
        }
    }

    fn query_frame(
        &self,
        frame: Option<&str>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let page = self.page()?;
        Ok(page
            .elements
            .iter()
            .enumerate()
            .filter(|(_, el)| el.frame.as_deref() == frame)
            .filter(|(_, el)| matches_selector_list(el, selector))
            .map(|(i, el)| self.handle(i, el))
            .collect())
    }

    fn emit_load_events(&self, spec: &SimPageSpec) {
        let observer = self.observer.lock().unwrap().clone();
        let Some(observer) = observer else { return };
        for line in &spec.console {
            observer.on_console("log", line);
        }
        for err in &spec.page_errors {
            observer.on_page_error(err);
        }
        for req in &spec.requests {
            observer.on_request_finished(RequestSummary {
                url: req.url.clone(),
                method: if req.method.is_empty() {
                    "GET".into()
                } else {
                    req.method.clone()
                },
                status: if req.status == 0 { 200 } else { req.status },
                body: req.body.clone(),
            });
        }
    }
}

#[async_trait]
impl PageDriver for SimPage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        let Some(spec) = self.model.pages.get(url) else {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason: "no such page in model".into(),
            });
        };
        *self.current.lock().unwrap() = Some(url.to_string());
        self.record(SimAction::Navigate {
            url: url.to_string(),
        });
        self.emit_load_events(spec);
        Ok(())
    }

    async fn query(&self, selector: &str) -> Result<Vec<ElementHandle>, DriverError> {
        self.query_frame(None, selector)
    }

    async fn query_xpath(&self, xpath: &str) -> Result<Option<ElementHandle>, DriverError> {
        let page = self.page()?;
        Ok(page
            .elements
            .iter()
            .enumerate()
            .filter(|(_, el)| el.frame.is_none())
            .find(|(_, el)| el.xpath.as_deref() == Some(xpath))
            .map(|(i, el)| self.handle(i, el)))
    }

    async fn query_within(
        &self,
        el: &ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let Some(parent_id) = &el.id else {
            return Ok(Vec::new());
        };
        let page = self.page()?;
        Ok(page
            .elements
            .iter()
            .enumerate()
            .filter(|(_, child)| child.parent_id.as_deref() == Some(parent_id.as_str()))
            .filter(|(_, child)| matches_selector_list(child, selector))
            .map(|(i, child)| self.handle(i, child))
            .collect())
    }

    async fn frames(&self) -> Vec<FrameId> {
        let Ok(page) = self.page() else {
            return Vec::new();
        };
        let mut seen = Vec::new();
        for el in &page.elements {
            if let Some(frame) = &el.frame {
                if !seen.iter().any(|FrameId(f)| f == frame) {
                    seen.push(FrameId(frame.clone()));
                }
            }
        }
        seen
    }

    async fn query_in_frame(
        &self,
        frame: &FrameId,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        self.query_frame(Some(frame.0.as_str()), selector)
    }

    async fn click(&self, el: &ElementHandle) -> Result<(), DriverError> {
        self.record(SimAction::Click {
            target: self.target_label(el.node),
        });
        Ok(())
    }

    async fn type_text(
        &self,
        el: &ElementHandle,
        text: &str,
        char_delay: Duration,
    ) -> Result<(), DriverError> {
        // One sleep for the whole string; per-keystroke pacing is a backend
        // concern the simulation only has to account for in wall-clock time.
        tokio::time::sleep(char_delay * text.chars().count() as u32).await;
        self.record(SimAction::Type {
            target: self.target_label(el.node),
            value: text.to_string(),
        });
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<ElementHandle, DriverError> {
        let start = tokio::time::Instant::now();
        loop {
            if let Some(handle) = self.query_frame(None, selector)?.into_iter().next() {
                return Ok(handle);
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::WaitTimeout {
                    selector: selector.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError> {
        // Minimal valid-enough PNG stub so downstream attachment code has a
        // real file to work with.
        let bytes: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| DriverError::Backend(format!("screenshot write failed: {e}")))
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value, DriverError> {
        Ok(serde_json::Value::Null)
    }

    fn subscribe(&self, observer: Arc<dyn PageEvents>) {
        *self.observer.lock().unwrap() = Some(observer);
    }
}

/// Match against a comma-separated selector list.
fn matches_selector_list(el: &SimElement, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .any(|s| matches_simple(el, s))
}

fn class_list(el: &SimElement) -> Vec<&str> {
    el.class_name
        .as_deref()
        .map(|c| c.split_whitespace().collect())
        .unwrap_or_default()
}

fn matches_attr(el: &SimElement, attr: &str) -> bool {
    // attr is the inside of [...]: name="x", type=text, ...
    let Some((key, value)) = attr.split_once('=') else {
        return false;
    };
    let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
    match key.trim() {
        "name" => el.name.as_deref() == Some(value),
        "type" => el.input_type.as_deref() == Some(value),
        "id" => el.id.as_deref() == Some(value),
        _ => false,
    }
}

/// Simple-selector matcher. Anything it cannot parse falls back to the
/// element's declared `selectors` list.
fn matches_simple(el: &SimElement, sel: &str) -> bool {
    if el.selectors.iter().any(|s| s == sel) {
        return true;
    }
    if let Some(id) = sel.strip_prefix('#') {
        return el.id.as_deref() == Some(id);
    }
    if let Some(rest) = sel.strip_prefix('[') {
        let Some(attr) = rest.strip_suffix(']') else {
            return false;
        };
        return matches_attr(el, attr);
    }
    if let Some(classes) = sel.strip_prefix('.') {
        let have = class_list(el);
        return classes.split('.').all(|c| have.contains(&c));
    }

    // tag-first forms: tag, tag.cls, tag[attr=v], tag:not([type])
    let tag_end = sel
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(sel.len());
    let (tag, rest) = sel.split_at(tag_end);
    if !tag.eq_ignore_ascii_case(&el.tag) {
        return false;
    }
    if rest.is_empty() {
        return true;
    }
    if rest == ":not([type])" {
        return el.input_type.is_none();
    }
    if let Some(classes) = rest.strip_prefix('.') {
        let have = class_list(el);
        return classes.split('.').all(|c| have.contains(&c));
    }
    if let Some(attr) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        return matches_attr(el, attr);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_id_and_name_selectors() {
        let el = SimElement::text_input().with_id("email").with_name("email");
        assert!(matches_simple(&el, "#email"));
        assert!(matches_simple(&el, "[name=\"email\"]"));
        assert!(!matches_simple(&el, "#other"));
    }

    #[test]
    fn matches_typed_and_untyped_inputs() {
        let text = SimElement::text_input().with_type("text");
        let bare = SimElement::text_input();
        assert!(matches_simple(&text, "input[type=\"text\"]"));
        assert!(!matches_simple(&bare, "input[type=\"text\"]"));
        assert!(matches_simple(&bare, "input:not([type])"));
        assert!(!matches_simple(&text, "input:not([type])"));
    }

    #[test]
    fn matches_comma_lists_and_classes() {
        let el = SimElement::new("span")
            .with_text("Save")
            .with_class("btn primary");
        assert!(matches_selector_list(&el, "button, a, span"));
        assert!(matches_simple(&el, "span.btn"));
        assert!(matches_simple(&el, ".btn.primary"));
        assert!(!matches_simple(&el, "span.missing"));
    }

    #[test]
    fn unparseable_selectors_fall_back_to_declared_list() {
        let el = SimElement::text_input().with_selector("div#form > input:nth-of-type(2)");
        assert!(matches_simple(&el, "div#form > input:nth-of-type(2)"));
        assert!(!matches_simple(&el, "div#form > input"));
    }
}
