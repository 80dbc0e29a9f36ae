//! Recorded session model -- timestamped interaction events plus a starting URL.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read session file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse session JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("session contains no events")]
    Empty,

    #[error("session must start with a navigate event, found '{found}'")]
    FirstEventNotNavigate { found: String },
}

/// Best-effort element metadata captured at record time. Every field is a
/// hint, not an identifier: none is guaranteed present, and the live page may
/// have drifted since recording. The resolver treats these accordingly.
///
/// Recorders emit empty strings for absent attributes, so empty/blank values
/// are normalized to `None` on deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementDescriptor {
    #[serde(deserialize_with = "de_hint")]
    pub tag: Option<String>,
    #[serde(deserialize_with = "de_hint")]
    pub text: Option<String>,
    #[serde(deserialize_with = "de_hint")]
    pub id: Option<String>,
    #[serde(deserialize_with = "de_hint")]
    pub name: Option<String>,
    #[serde(deserialize_with = "de_hint")]
    pub class_name: Option<String>,
    #[serde(rename = "type", deserialize_with = "de_hint")]
    pub input_type: Option<String>,
    #[serde(deserialize_with = "de_value")]
    pub value: Option<String>,
    pub checked: Option<bool>,
    #[serde(deserialize_with = "de_hint")]
    pub selector: Option<String>,
    #[serde(deserialize_with = "de_hint")]
    pub xpath: Option<String>,
    pub bounding_client_rect: Option<serde_json::Value>,
}

impl ElementDescriptor {
    /// Checkbox/radio targets are activated through their paired label/input
    /// event, never replayed directly.
    pub fn is_checkbox_or_radio(&self) -> bool {
        matches!(self.input_type.as_deref(), Some("checkbox") | Some("radio"))
    }

    /// The text used by text-matching strategies: visible text, falling back
    /// to the recorded `name`.
    pub fn text_hint(&self) -> Option<&str> {
        self.text.as_deref().or(self.name.as_deref())
    }

    /// Selector used by the input chain: the recorded CSS selector, or a
    /// `[name=...]` lookup synthesized from the recorded name.
    pub fn input_selector(&self) -> Option<String> {
        if let Some(sel) = &self.selector {
            return Some(sel.clone());
        }
        self.name.as_ref().map(|n| format!("[name=\"{}\"]", n))
    }
}

fn de_hint<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let s = Option::<String>::deserialize(d)?;
    Ok(s.filter(|s| !s.trim().is_empty()))
}

fn de_value<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let s = Option::<String>::deserialize(d)?;
    Ok(s.filter(|s| !s.is_empty()))
}

fn default_wait_timeout() -> u64 {
    5000
}

/// One recorded interaction. Tagged by `type` on the wire; timestamps are
/// epoch milliseconds and monotonically non-decreasing within a session.
/// Unknown fields are tolerated for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    Navigate {
        href: String,
        timestamp: i64,
    },
    Click {
        #[serde(default)]
        detail: Option<ElementDescriptor>,
        timestamp: i64,
    },
    Input {
        #[serde(default)]
        detail: Option<ElementDescriptor>,
        timestamp: i64,
    },
    WaitFor {
        selector: String,
        #[serde(default = "default_wait_timeout")]
        timeout: u64,
        timestamp: i64,
    },
}

impl Event {
    pub fn timestamp(&self) -> i64 {
        match self {
            Event::Navigate { timestamp, .. }
            | Event::Click { timestamp, .. }
            | Event::Input { timestamp, .. }
            | Event::WaitFor { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Navigate { .. } => "navigate",
            Event::Click { .. } => "click",
            Event::Input { .. } => "input",
            Event::WaitFor { .. } => "waitFor",
        }
    }
}

/// A recorded test: ordered event sequence, optionally tagged with the device
/// profile it was captured on.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Session {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub events: Vec<Event>,
}

/// Session files come in two shapes: a bare event array (older recorders) or
/// a `{device, events}` object.
#[derive(Deserialize)]
#[serde(untagged)]
enum SessionFile {
    Events(Vec<Event>),
    Object {
        #[serde(default)]
        device: Option<String>,
        events: Vec<Event>,
    },
}

impl Session {
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let file: SessionFile = serde_json::from_str(json)?;
        let session = match file {
            SessionFile::Events(events) => Session {
                device: None,
                events,
            },
            SessionFile::Object { device, events } => Session { device, events },
        };
        session.validate()?;
        Ok(session)
    }

    pub async fn load(path: &Path) -> Result<Self, SessionError> {
        if !path.exists() {
            return Err(SessionError::NotFound(path.to_path_buf()));
        }
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// Invariants: non-empty, first event is `Navigate`. Checked before any
    /// page interaction happens.
    pub fn validate(&self) -> Result<(), SessionError> {
        let first = self.events.first().ok_or(SessionError::Empty)?;
        match first {
            Event::Navigate { .. } => Ok(()),
            other => Err(SessionError::FirstEventNotNavigate {
                found: other.kind().to_string(),
            }),
        }
    }

    /// The leading navigation: `(href, timestamp)`.
    pub fn first_navigate(&self) -> Option<(&str, i64)> {
        match self.events.first() {
            Some(Event::Navigate { href, timestamp }) => Some((href, *timestamp)),
            _ => None,
        }
    }
}

/// Strip any path components and characters outside `[a-zA-Z0-9 _-]` from a
/// user-supplied test name before it touches the filesystem.
pub fn sanitize_test_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ' ' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
