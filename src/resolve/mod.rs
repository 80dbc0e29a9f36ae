//! Element resolution -- re-locating recorded elements on a drifted page.
//!
//! A recorded descriptor is a bag of stale hints, so resolution walks an
//! ordered chain of strategies and stops at the first hit. Every strategy is
//! a pure query: no clicks, no typing, no page mutation. A candidate only
//! counts when it is attached to the document with a non-zero bounding box;
//! an element that exists but is collapsed or detached is not a hit.

use crate::driver::{DriverError, ElementHandle, PageDriver};
use crate::session::ElementDescriptor;
use regex::RegexBuilder;
use std::time::Duration;
use tracing::debug;

/// Candidate pool for the text-matching strategies.
const TEXT_CANDIDATES: &str = "button,a,label,span,div";

/// Pool for the last-resort input strategy: anything text-like.
const GENERIC_INPUTS: &str = "input[type=\"text\"],input[type=\"number\"],input:not([type])";

/// How long the direct-selector input strategy waits for the field to appear.
const INPUT_SELECTOR_WAIT: Duration = Duration::from_secs(3);

/// Click-target strategies, tried strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickStrategy {
    /// Recorded `id`, as a `#id` lookup.
    ById,
    /// Recorded CSS selector.
    BySelector,
    /// `[name=...]` attribute lookup.
    ByName,
    /// Recorded XPath.
    ByXPath,
    /// Label/span wrapper: the `for`-referenced or nested input.
    LabelWrapper,
    /// Exact normalized-text match over interactive tags.
    ExactText,
    /// Substring match, same normalization.
    SubstringText,
    /// Regex built from digit-bearing text; dynamic numeric labels.
    NumericRegex,
    /// Tokens joined by `.*`, allowing intervening words. Last resort.
    FuzzyTokens,
}

pub const CLICK_CHAIN: &[ClickStrategy] = &[
    ClickStrategy::ById,
    ClickStrategy::BySelector,
    ClickStrategy::ByName,
    ClickStrategy::ByXPath,
    ClickStrategy::LabelWrapper,
    ClickStrategy::ExactText,
    ClickStrategy::SubstringText,
    ClickStrategy::NumericRegex,
    ClickStrategy::FuzzyTokens,
];

/// Input-target strategies, tried strictly in this order. Distinct from the
/// click chain: typing targets hide in iframes and wrapper containers far
/// more often than click targets do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStrategy {
    /// Recorded selector (or `[name=...]`), waited on briefly.
    BySelector,
    /// Same selector across every sub-frame.
    InFrames,
    /// Parent container by `id`, then its first nested input.
    ParentContainer,
    /// Recorded XPath, accepted only for `input` elements.
    ByXPath,
    /// `input.<classes>` lookup.
    ByClassName,
    /// First enabled, visible text-like input on the page.
    FirstTextInput,
}

pub const INPUT_CHAIN: &[InputStrategy] = &[
    InputStrategy::BySelector,
    InputStrategy::InFrames,
    InputStrategy::ParentContainer,
    InputStrategy::ByXPath,
    InputStrategy::ByClassName,
    InputStrategy::FirstTextInput,
];

/// Normalize recorded/live text before comparison: en-dash to hyphen,
/// whitespace collapsed and trimmed, case-folded. Idempotent.
pub fn normalize_text(s: &str) -> String {
    s.replace('\u{2013}', "-")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Resolve a click target. `Ok(None)` means every strategy came up empty;
/// the caller decides whether that is fatal.
pub async fn resolve_click(
    page: &dyn PageDriver,
    desc: &ElementDescriptor,
) -> Result<Option<ElementHandle>, DriverError> {
    for strategy in CLICK_CHAIN {
        if let Some(el) = try_click_strategy(*strategy, page, desc).await? {
            debug!(strategy = ?strategy, tag = %el.tag, "click target resolved");
            return Ok(Some(el));
        }
    }
    Ok(None)
}

/// Resolve a typing target via the input chain.
pub async fn resolve_input(
    page: &dyn PageDriver,
    desc: &ElementDescriptor,
) -> Result<Option<ElementHandle>, DriverError> {
    for strategy in INPUT_CHAIN {
        if let Some(el) = try_input_strategy(*strategy, page, desc).await? {
            debug!(strategy = ?strategy, tag = %el.tag, "input target resolved");
            return Ok(Some(el));
        }
    }
    Ok(None)
}

fn first_actionable(handles: Vec<ElementHandle>) -> Option<ElementHandle> {
    handles.into_iter().find(ElementHandle::is_actionable)
}

async fn try_click_strategy(
    strategy: ClickStrategy,
    page: &dyn PageDriver,
    desc: &ElementDescriptor,
) -> Result<Option<ElementHandle>, DriverError> {
    match strategy {
        ClickStrategy::ById => {
            let Some(id) = &desc.id else { return Ok(None) };
            Ok(first_actionable(page.query(&format!("#{id}")).await?))
        }
        ClickStrategy::BySelector => {
            let Some(sel) = &desc.selector else {
                return Ok(None);
            };
            Ok(first_actionable(page.query(sel).await?))
        }
        ClickStrategy::ByName => {
            let Some(name) = &desc.name else {
                return Ok(None);
            };
            Ok(first_actionable(
                page.query(&format!("[name=\"{name}\"]")).await?,
            ))
        }
        ClickStrategy::ByXPath => {
            let Some(xpath) = &desc.xpath else {
                return Ok(None);
            };
            Ok(page
                .query_xpath(xpath)
                .await?
                .filter(ElementHandle::is_actionable))
        }
        ClickStrategy::LabelWrapper => label_wrapper_input(page, desc).await,
        ClickStrategy::ExactText => {
            let Some(target) = normalized_target(desc) else {
                return Ok(None);
            };
            text_candidate(page, |text| normalize_text(text) == target).await
        }
        ClickStrategy::SubstringText => {
            let Some(target) = normalized_target(desc) else {
                return Ok(None);
            };
            text_candidate(page, |text| normalize_text(text).contains(&target)).await
        }
        ClickStrategy::NumericRegex => {
            let Some(target) = normalized_target(desc) else {
                return Ok(None);
            };
            if !target.chars().any(|c| c.is_ascii_digit()) {
                return Ok(None);
            }
            let Ok(re) = RegexBuilder::new(&numeric_pattern(&target))
                .case_insensitive(true)
                .build()
            else {
                return Ok(None);
            };
            text_candidate(page, |text| re.is_match(&normalize_text(text))).await
        }
        ClickStrategy::FuzzyTokens => {
            let Some(target) = normalized_target(desc) else {
                return Ok(None);
            };
            let pattern = target
                .split(' ')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let Ok(re) = RegexBuilder::new(&pattern).case_insensitive(true).build() else {
                return Ok(None);
            };
            text_candidate(page, |text| re.is_match(&normalize_text(text))).await
        }
    }
}

fn normalized_target(desc: &ElementDescriptor) -> Option<String> {
    let target = normalize_text(desc.text_hint()?);
    if target.is_empty() {
        None
    } else {
        Some(target)
    }
}

/// Escape `text` for regex use, keeping alphanumerics and the literal hyphen
/// untouched. Feeds the numeric-label fallback.
fn numeric_pattern(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if c.is_alphanumeric() || c == '-' {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

async fn text_candidate(
    page: &dyn PageDriver,
    accept: impl Fn(&str) -> bool,
) -> Result<Option<ElementHandle>, DriverError> {
    let candidates = page.query(TEXT_CANDIDATES).await?;
    Ok(candidates
        .into_iter()
        .find(|el| el.is_actionable() && accept(&el.text)))
}

/// Strategy 5: a click recorded on a LABEL/SPAN wrapper usually means the
/// checkbox/radio it fronts. Find the wrapper, then its `for`-referenced or
/// nested input.
async fn label_wrapper_input(
    page: &dyn PageDriver,
    desc: &ElementDescriptor,
) -> Result<Option<ElementHandle>, DriverError> {
    let is_wrapper = desc
        .tag
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("label") || t.eq_ignore_ascii_case("span"));
    if !is_wrapper {
        return Ok(None);
    }
    let wrapper_sel = match (&desc.selector, &desc.id) {
        (Some(sel), _) => sel.clone(),
        (None, Some(id)) => format!("#{id}"),
        (None, None) => return Ok(None),
    };
    let Some(wrapper) = page.query(&wrapper_sel).await?.into_iter().next() else {
        return Ok(None);
    };
    if let Some(for_id) = &wrapper.for_id {
        if let Some(el) = first_actionable(page.query(&format!("#{for_id}")).await?) {
            return Ok(Some(el));
        }
    }
    Ok(first_actionable(page.query_within(&wrapper, "input").await?))
}

async fn try_input_strategy(
    strategy: InputStrategy,
    page: &dyn PageDriver,
    desc: &ElementDescriptor,
) -> Result<Option<ElementHandle>, DriverError> {
    match strategy {
        InputStrategy::BySelector => {
            let Some(sel) = desc.input_selector() else {
                return Ok(None);
            };
            match page.wait_for_selector(&sel, INPUT_SELECTOR_WAIT).await {
                Ok(el) if el.is_actionable() => Ok(Some(el)),
                Ok(_) => Ok(None),
                Err(DriverError::WaitTimeout { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        }
        InputStrategy::InFrames => {
            let Some(sel) = desc.input_selector() else {
                return Ok(None);
            };
            for frame in page.frames().await {
                if let Some(el) = first_actionable(page.query_in_frame(&frame, &sel).await?) {
                    return Ok(Some(el));
                }
            }
            Ok(None)
        }
        InputStrategy::ParentContainer => {
            let Some(sel) = desc.input_selector() else {
                return Ok(None);
            };
            let Some(parent_id) = extract_id(&sel) else {
                return Ok(None);
            };
            let Some(parent) = page
                .query(&format!("#{parent_id}"))
                .await?
                .into_iter()
                .next()
            else {
                return Ok(None);
            };
            Ok(first_actionable(page.query_within(&parent, "input").await?))
        }
        InputStrategy::ByXPath => {
            let Some(xpath) = &desc.xpath else {
                return Ok(None);
            };
            Ok(page
                .query_xpath(xpath)
                .await?
                .filter(|el| el.tag == "input" && el.is_actionable()))
        }
        InputStrategy::ByClassName => {
            let Some(classes) = &desc.class_name else {
                return Ok(None);
            };
            let joined = classes.split_whitespace().collect::<Vec<_>>().join(".");
            if joined.is_empty() {
                return Ok(None);
            }
            Ok(first_actionable(page.query(&format!("input.{joined}")).await?))
        }
        InputStrategy::FirstTextInput => {
            let candidates = page.query(GENERIC_INPUTS).await?;
            Ok(candidates
                .into_iter()
                .find(|el| !el.disabled && el.is_actionable()))
        }
    }
}

/// First `#id` fragment of a CSS path, e.g. `div#amount > input` -> `amount`.
fn extract_id(selector: &str) -> Option<String> {
    let re = regex::Regex::new(r"#([^ >\.]+)").ok()?;
    re.captures(selector)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Per-strategy match counts for a click descriptor that failed to resolve.
/// Logged so a drifted page can be debugged from the run log alone.
pub async fn explain_click_failure(page: &dyn PageDriver, desc: &ElementDescriptor) -> Vec<String> {
    let mut reasons = Vec::new();
    if let Some(id) = &desc.id {
        let n = count(page, &format!("#{id}")).await;
        reasons.push(format!("by recorded id '#{id}': {n} matches"));
    }
    if let Some(sel) = &desc.selector {
        let n = count(page, sel).await;
        reasons.push(format!("by recorded selector '{sel}': {n} matches"));
    }
    if let Some(name) = &desc.name {
        let n = count(page, &format!("[name=\"{name}\"]")).await;
        reasons.push(format!("by name '[name={name}]': {n} matches"));
    }
    if let Some(xpath) = &desc.xpath {
        let found = matches!(page.query_xpath(xpath).await, Ok(Some(_)));
        reasons.push(format!(
            "by xpath '{xpath}': {}",
            if found { "found" } else { "not found" }
        ));
    }
    if let Some(target) = normalized_target(desc) {
        let candidates = page.query(TEXT_CANDIDATES).await.unwrap_or_default();
        let exact = candidates
            .iter()
            .filter(|el| normalize_text(&el.text) == target)
            .count();
        let substring = candidates
            .iter()
            .filter(|el| normalize_text(&el.text).contains(&target))
            .count();
        reasons.push(format!("exact text '{target}': {exact} matches"));
        reasons.push(format!("substring text: {substring} matches"));
    }
    reasons
}

async fn count(page: &dyn PageDriver, selector: &str) -> usize {
    page.query(selector).await.map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{PageModel, SimElement, SimPage};

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_text("  Continue\u{2013}now\t please ");
        assert_eq!(once, "continue-now please");
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn en_dash_becomes_hyphen() {
        assert_eq!(normalize_text("Continue\u{2013}now"), "continue-now");
    }

    #[test]
    fn numeric_pattern_keeps_hyphen_literal() {
        assert_eq!(numeric_pattern("10-20 kg"), "10-20\\ kg");
    }

    #[test]
    fn extract_id_takes_first_fragment() {
        assert_eq!(extract_id("div#amount > input").as_deref(), Some("amount"));
        assert_eq!(extract_id("input.field"), None);
    }

    fn desc(f: impl FnOnce(&mut crate::session::ElementDescriptor)) -> crate::session::ElementDescriptor {
        let mut d = crate::session::ElementDescriptor::default();
        f(&mut d);
        d
    }

    #[tokio::test]
    async fn id_wins_over_selector() {
        // Two distinct elements match the id and the recorded selector; the
        // id strategy must take precedence.
        let page = SimPage::new(PageModel::single(
            "https://app",
            vec![
                SimElement::button("By selector").with_selector("div > button"),
                SimElement::button("By id").with_id("go"),
            ],
        ));
        page.navigate("https://app", Duration::from_secs(1))
            .await
            .unwrap();
        let d = desc(|d| {
            d.id = Some("go".into());
            d.selector = Some("div > button".into());
        });
        let el = resolve_click(&page, &d).await.unwrap().unwrap();
        assert_eq!(el.id.as_deref(), Some("go"));
    }

    #[tokio::test]
    async fn invisible_candidates_are_skipped() {
        let page = SimPage::new(PageModel::single(
            "https://app",
            vec![
                SimElement::button("Submit").with_id("go").hidden(),
                SimElement::button("Submit"),
            ],
        ));
        page.navigate("https://app", Duration::from_secs(1))
            .await
            .unwrap();
        let d = desc(|d| {
            d.id = Some("go".into());
            d.text = Some("Submit".into());
        });
        // id matches only the hidden button, so resolution falls through to
        // the exact-text strategy and lands on the visible one.
        let el = resolve_click(&page, &d).await.unwrap().unwrap();
        assert!(el.id.is_none());
        assert!(el.is_actionable());
    }

    #[tokio::test(start_paused = true)]
    async fn fuzzy_tokens_allow_intervening_words() {
        let page = SimPage::new(PageModel::single(
            "https://app",
            vec![SimElement::button("Continue to secure checkout")],
        ));
        page.navigate("https://app", Duration::from_secs(1))
            .await
            .unwrap();
        let d = desc(|d| d.text = Some("Continue checkout".into()));
        let el = resolve_click(&page, &d).await.unwrap().unwrap();
        assert_eq!(el.text, "Continue to secure checkout");
    }

    #[tokio::test(start_paused = true)]
    async fn label_wrapper_resolves_for_referenced_input() {
        let page = SimPage::new(PageModel::single(
            "https://app",
            vec![
                // Styled-out label fronting a real checkbox; the wrapper
                // itself is not actionable, so the direct-selector strategy
                // falls through to the wrapper strategy.
                SimElement::new("label")
                    .with_id("optin-label")
                    .with_text("Subscribe")
                    .with_for("optin")
                    .hidden(),
                SimElement::text_input().with_id("optin").with_type("checkbox"),
            ],
        ));
        page.navigate("https://app", Duration::from_secs(1))
            .await
            .unwrap();
        let d = desc(|d| {
            d.tag = Some("LABEL".into());
            d.selector = Some("#optin-label".into());
        });
        let el = resolve_click(&page, &d).await.unwrap().unwrap();
        assert_eq!(el.id.as_deref(), Some("optin"));
    }

    #[tokio::test(start_paused = true)]
    async fn input_chain_falls_back_to_generic_text_input() {
        let page = SimPage::new(PageModel::single(
            "https://app",
            vec![
                SimElement::text_input().with_type("checkbox").with_id("cb"),
                SimElement::text_input().disabled().with_id("frozen"),
                SimElement::text_input().with_id("free"),
            ],
        ));
        page.navigate("https://app", Duration::from_secs(1))
            .await
            .unwrap();
        let d = desc(|d| d.selector = Some("#nope".into()));
        let el = resolve_input(&page, &d).await.unwrap().unwrap();
        assert_eq!(el.id.as_deref(), Some("free"));
    }

    #[tokio::test(start_paused = true)]
    async fn input_chain_searches_frames() {
        let page = SimPage::new(PageModel::single(
            "https://app",
            vec![SimElement::text_input()
                .with_name("card")
                .with_frame("payframe")],
        ));
        page.navigate("https://app", Duration::from_secs(1))
            .await
            .unwrap();
        let d = desc(|d| d.name = Some("card".into()));
        let el = resolve_input(&page, &d).await.unwrap().unwrap();
        assert_eq!(el.tag, "input");
    }
}
