//! Replay state machine.
//!
//! `Idle -> Navigating -> Replaying -> Succeeded | Failed`. One run consumes
//! one session, strictly sequentially: the only suspension points are the
//! capped inter-event delay, soft waits, and driver calls. The first fatal
//! error ends the run; remaining events are never replayed.

use crate::driver::{DriverError, PageDriver};
use crate::resolve;
use crate::session::{ElementDescriptor, Event, Session, SessionError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Inter-event delays reproduce human pacing but are capped so an outlier
/// recording (lunch break mid-session) cannot stall a run for hours.
pub const DELAY_CAP_MS: i64 = 10_000;

/// An `input` event this close behind a `click` on the same element is a
/// framework side effect of the click, not an independent user action.
pub const SUPPRESS_WINDOW_MS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Navigating,
    Replaying,
    Succeeded,
    Failed,
}

/// Fatal replay conditions. `step` is the 1-based event ordinal, matching
/// what the failure notification reports.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("step {step}: navigation to {url} failed: {reason}")]
    Navigation {
        step: usize,
        url: String,
        reason: String,
    },

    #[error("step {step}: could not locate click target '{target}'")]
    ElementNotFound { step: usize, target: String },

    #[error("step {step}: input field not found: {selector}")]
    InputTargetNotFound { step: usize, selector: String },

    #[error("invalid session: {0}")]
    Session(#[from] SessionError),

    #[error("step {step}: {source}")]
    Runtime {
        step: usize,
        #[source]
        source: DriverError,
    },
}

impl ReplayError {
    /// 1-based ordinal of the failing event; 0 when the session never got
    /// far enough to have one.
    pub fn step(&self) -> usize {
        match self {
            ReplayError::Navigation { step, .. }
            | ReplayError::ElementNotFound { step, .. }
            | ReplayError::InputTargetNotFound { step, .. }
            | ReplayError::Runtime { step, .. } => *step,
            ReplayError::Session(_) => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Hard navigation timeout; expiry aborts the run.
    pub navigation_timeout: Duration,
    /// Delay between typed characters.
    pub type_delay: Duration,
    /// Settle time after a successful click.
    pub click_settle: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(10),
            type_delay: Duration::from_millis(50),
            click_settle: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
pub struct ReplaySummary {
    /// Events acted on (skipped events included).
    pub events: usize,
}

/// Inter-event delay: `min(Δt, cap)`, never negative even when recorded
/// timestamps run backwards.
pub fn inter_event_delay(previous_ms: i64, current_ms: i64) -> Duration {
    Duration::from_millis((current_ms - previous_ms).clamp(0, DELAY_CAP_MS) as u64)
}

pub struct ReplayEngine<'a> {
    driver: &'a dyn PageDriver,
    opts: ReplayOptions,
    state: RunState,
}

impl<'a> ReplayEngine<'a> {
    pub fn new(driver: &'a dyn PageDriver, opts: ReplayOptions) -> Self {
        Self {
            driver,
            opts,
            state: RunState::Idle,
        }
    }

    /// Terminal state after `run` returns; `Idle` before.
    pub fn state(&self) -> RunState {
        self.state
    }

    pub async fn run(&mut self, session: &Session) -> Result<ReplaySummary, ReplayError> {
        let result = self.drive(session).await;
        self.state = if result.is_ok() {
            RunState::Succeeded
        } else {
            RunState::Failed
        };
        result
    }

    async fn drive(&mut self, session: &Session) -> Result<ReplaySummary, ReplayError> {
        session.validate()?;
        let Some((href, first_ts)) = session.first_navigate() else {
            return Err(SessionError::Empty.into());
        };

        self.state = RunState::Navigating;
        info!(url = %href, "navigating");
        self.driver
            .navigate(href, self.opts.navigation_timeout)
            .await
            .map_err(|e| navigation_error(1, href, e))?;

        self.state = RunState::Replaying;
        let mut previous_ts = first_ts;
        let mut events = 0usize;

        for (idx, event) in session.events.iter().enumerate().skip(1) {
            let step = idx + 1;
            let delay = inter_event_delay(previous_ts, event.timestamp());
            previous_ts = event.timestamp();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            events += 1;

            match event {
                Event::Navigate { href, .. } => {
                    info!(step, url = %href, "mid-session navigation");
                    self.driver
                        .navigate(href, self.opts.navigation_timeout)
                        .await
                        .map_err(|e| navigation_error(step, href, e))?;
                }
                Event::WaitFor {
                    selector, timeout, ..
                } => {
                    debug!(step, %selector, timeout, "waiting for selector");
                    match self
                        .driver
                        .wait_for_selector(selector, Duration::from_millis(*timeout))
                        .await
                    {
                        Ok(_) => {}
                        Err(DriverError::WaitTimeout { .. }) => {
                            // Soft: a missing spinner never fails the run.
                            warn!(step, %selector, timeout, "waitFor timed out, continuing");
                        }
                        Err(e) => return Err(ReplayError::Runtime { step, source: e }),
                    }
                }
                Event::Click { detail, .. } => {
                    let Some(detail) = detail else {
                        warn!(step, "click event without detail, skipping");
                        continue;
                    };
                    self.replay_click(step, detail).await?;
                }
                Event::Input { detail, timestamp } => {
                    let Some(detail) = detail else {
                        warn!(step, "input event without detail, skipping");
                        continue;
                    };
                    if suppressed_by_previous_click(session, idx, detail, *timestamp) {
                        debug!(step, "input suppressed: side effect of preceding click");
                        continue;
                    }
                    self.replay_input(step, detail).await?;
                }
            }
        }

        info!(events, "replay finished");
        Ok(ReplaySummary { events })
    }

    async fn replay_click(&self, step: usize, detail: &ElementDescriptor) -> Result<(), ReplayError> {
        // Checkbox/radio targets recorded directly are activated through
        // their paired label/input event; replaying the raw click would
        // toggle the state twice.
        if detail.is_checkbox_or_radio() {
            debug!(step, "checkbox/radio click handled via paired event, skipping");
            return Ok(());
        }

        let target = detail
            .text_hint()
            .or(detail.selector.as_deref())
            .unwrap_or("<unknown>")
            .to_string();
        info!(step, %target, "click");

        match resolve::resolve_click(self.driver, detail).await {
            Ok(Some(el)) => {
                self.driver
                    .click(&el)
                    .await
                    .map_err(|e| ReplayError::Runtime { step, source: e })?;
                tokio::time::sleep(self.opts.click_settle).await;
                Ok(())
            }
            Ok(None) => {
                for reason in resolve::explain_click_failure(self.driver, detail).await {
                    warn!(step, %reason, "click strategy exhausted");
                }
                Err(ReplayError::ElementNotFound { step, target })
            }
            Err(e) => Err(ReplayError::Runtime { step, source: e }),
        }
    }

    async fn replay_input(&self, step: usize, detail: &ElementDescriptor) -> Result<(), ReplayError> {
        // Checkbox/radio state changes arrive via the paired click event.
        if detail.is_checkbox_or_radio() {
            debug!(step, "checkbox/radio input handled via paired click, skipping");
            return Ok(());
        }

        let selector = detail.input_selector().unwrap_or_default();
        let value = detail.value.clone().unwrap_or_default();
        info!(step, %selector, "input");

        match resolve::resolve_input(self.driver, detail).await {
            Ok(Some(el)) => self
                .driver
                .type_text(&el, &value, self.opts.type_delay)
                .await
                .map_err(|e| ReplayError::Runtime { step, source: e }),
            Ok(None) => Err(ReplayError::InputTargetNotFound { step, selector }),
            Err(e) => Err(ReplayError::Runtime { step, source: e }),
        }
    }
}

/// True when the event at `idx` (an input) immediately follows a click on the
/// same element (shared `name` or `id`) within the suppression window.
/// Recorded input listeners over-capture framework-triggered value changes;
/// replaying both would double-apply the interaction.
fn suppressed_by_previous_click(
    session: &Session,
    idx: usize,
    detail: &ElementDescriptor,
    timestamp: i64,
) -> bool {
    let Some(Event::Click {
        detail: Some(click_detail),
        timestamp: click_ts,
    }) = idx.checked_sub(1).and_then(|i| session.events.get(i))
    else {
        return false;
    };
    if timestamp - click_ts >= SUPPRESS_WINDOW_MS {
        return false;
    }
    let same_name = matches!((&detail.name, &click_detail.name), (Some(a), Some(b)) if a == b);
    let same_id = matches!((&detail.id, &click_detail.id), (Some(a), Some(b)) if a == b);
    same_name || same_id
}

fn navigation_error(step: usize, url: &str, err: DriverError) -> ReplayError {
    let reason = match err {
        DriverError::Navigation { reason, .. } => reason,
        other => other.to_string(),
    };
    ReplayError::Navigation {
        step,
        url: url.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_capped() {
        assert_eq!(
            inter_event_delay(0, 60_000),
            Duration::from_millis(DELAY_CAP_MS as u64)
        );
    }

    #[test]
    fn delay_never_negative() {
        assert_eq!(inter_event_delay(5_000, 4_000), Duration::ZERO);
    }

    #[test]
    fn delay_passes_through_small_gaps() {
        assert_eq!(inter_event_delay(1_000, 1_250), Duration::from_millis(250));
    }
}
