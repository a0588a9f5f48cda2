//! Prompt recognition inside a target's document.
//!
//! Recognition runs in two script evaluations with a pure decision step in
//! between:
//!
//! 1. **survey**: a read-only script lists the interactive controls with
//!    their visible label, rendering state, disabled state and the time they
//!    were last activated by us.
//! 2. **select**: [`PromptRecognizer::select`] decides, in Rust, which
//!    controls to activate.
//! 3. **activate**: a second script clicks the selected controls, stamps
//!    them with the activation time and returns how many it clicked.
//!
//! A survey that selects nothing never leads to a mutation of the document.

use autoaccept_types::CdpConfig;
use serde::Deserialize;

/// Interactive controls considered by the default recognizer.
pub const CONTROL_SELECTOR: &str =
    "button, [role=\"button\"], a.monaco-button, .monaco-button";

/// Attribute holding the epoch-millis timestamp of our last activation.
pub const ACTIVATED_ATTR: &str = "data-autoaccept-at";

/// Longest label the scripts report.
const MAX_LABEL_CHARS: usize = 120;

/// One control as reported by the survey script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SurveyedControl {
    /// Position in `document.querySelectorAll(selector)`.
    pub index: u32,
    pub label: String,
    pub visible: bool,
    pub disabled: bool,
    /// Epoch millis of our last activation, if any.
    #[serde(rename = "lastActivated", default)]
    pub last_activated: Option<f64>,
}

/// The survey script's result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ControlSurvey {
    /// The document's `Date.now()` at survey time.
    pub now: f64,
    #[serde(default)]
    pub controls: Vec<SurveyedControl>,
    /// Whether the key-fallback container is present and rendered.
    #[serde(rename = "fallbackAvailable", default)]
    pub fallback_available: bool,
}

/// A control chosen for activation, with the label it had when surveyed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Selection {
    pub index: u32,
    pub label: String,
}

/// Pluggable matching strategy for approval controls.
pub trait PromptRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Read-only script whose value deserializes into a [`ControlSurvey`].
    fn survey_script(&self) -> String;

    /// Pick the controls to activate from a survey.
    fn select(&self, survey: &ControlSurvey) -> Vec<Selection>;

    /// Script that activates `selections` and returns the number activated.
    fn activate_script(&self, selections: &[Selection]) -> String;

    /// Script that focuses the key-fallback container, if one is configured.
    /// Returns `true` when the container was focused.
    fn focus_fallback_script(&self) -> Option<String> {
        None
    }
}

/// Matches controls whose label starts with one of a fixed set of phrases.
///
/// Matching is a case-insensitive prefix match on the trimmed label, since
/// hosts append keyboard shortcut hints to button labels.
pub struct ButtonPrefixRecognizer {
    phrases: Vec<String>,
    cooldown_ms: f64,
    selector: String,
    fallback_selector: Option<String>,
}

impl ButtonPrefixRecognizer {
    pub fn new(phrases: &[String], cooldown: std::time::Duration) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            cooldown_ms: cooldown.as_secs_f64() * 1000.0,
            selector: CONTROL_SELECTOR.to_string(),
            fallback_selector: None,
        }
    }

    /// Recognizer for the configured phrases, cooldown and key fallback.
    pub fn from_config(config: &CdpConfig) -> Self {
        Self::new(&config.accept_phrases, config.click_cooldown())
            .with_fallback_selector(config.key_fallback_selector.clone())
    }

    #[must_use]
    pub fn with_fallback_selector(mut self, selector: Option<String>) -> Self {
        self.fallback_selector = selector.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn matches_label(&self, label: &str) -> bool {
        let label = label.trim().to_lowercase();
        !label.is_empty() && self.phrases.iter().any(|p| label.starts_with(p.as_str()))
    }

    fn cooled_down(&self, control: &SurveyedControl, now: f64) -> bool {
        match control.last_activated {
            Some(at) => now - at >= self.cooldown_ms,
            None => true,
        }
    }
}

impl PromptRecognizer for ButtonPrefixRecognizer {
    fn name(&self) -> &str {
        "button-prefix"
    }

    fn survey_script(&self) -> String {
        let selector = js_string(&self.selector);
        let fallback = match &self.fallback_selector {
            Some(s) => js_string(s),
            None => "null".to_string(),
        };
        format!(
            r#"(() => {{
  {helpers}
  const nodes = Array.from(document.querySelectorAll({selector}));
  const controls = [];
  nodes.forEach((el, index) => {{
    const label = labelOf(el);
    if (!label) return;
    const stamp = el.getAttribute({attr});
    controls.push({{
      index,
      label,
      visible: isRendered(el),
      disabled: isDisabled(el),
      lastActivated: stamp === null ? null : Number(stamp),
    }});
  }});
  const fallbackSelector = {fallback};
  let fallbackAvailable = false;
  if (fallbackSelector) {{
    const container = document.querySelector(fallbackSelector);
    fallbackAvailable = !!container && isRendered(container);
  }}
  return {{ now: Date.now(), controls, fallbackAvailable }};
}})()"#,
            helpers = js_helpers(),
            selector = selector,
            attr = js_string(ACTIVATED_ATTR),
            fallback = fallback,
        )
    }

    fn select(&self, survey: &ControlSurvey) -> Vec<Selection> {
        survey
            .controls
            .iter()
            .filter(|c| c.visible && !c.disabled)
            .filter(|c| self.matches_label(&c.label))
            .filter(|c| self.cooled_down(c, survey.now))
            .map(|c| Selection {
                index: c.index,
                label: c.label.clone(),
            })
            .collect()
    }

    fn activate_script(&self, selections: &[Selection]) -> String {
        let targets = serde_json::to_string(selections).unwrap_or_else(|_| "[]".to_string());
        format!(
            r#"(() => {{
  {helpers}
  const targets = {targets};
  const nodes = Array.from(document.querySelectorAll({selector}));
  let activated = 0;
  for (const t of targets) {{
    const el = nodes[t.index];
    if (!el || labelOf(el) !== t.label || !isRendered(el) || isDisabled(el)) continue;
    el.setAttribute({attr}, String(Date.now()));
    el.click();
    activated += 1;
  }}
  return activated;
}})()"#,
            helpers = js_helpers(),
            targets = targets,
            selector = js_string(&self.selector),
            attr = js_string(ACTIVATED_ATTR),
        )
    }

    fn focus_fallback_script(&self) -> Option<String> {
        let selector = self.fallback_selector.as_ref()?;
        Some(format!(
            r#"(() => {{
  const el = document.querySelector({selector});
  if (!el) return false;
  el.focus();
  return true;
}})()"#,
            selector = js_string(selector),
        ))
    }
}

/// Shared label and visibility helpers, identical in both scripts so the
/// activate step sees the same label the survey reported.
fn js_helpers() -> String {
    format!(
        r#"const labelOf = (el) => (el.innerText || el.textContent || el.getAttribute('aria-label') || '').trim().replace(/\s+/g, ' ').slice(0, {max});
  const isRendered = (el) => {{
    if (!el.isConnected) return false;
    const style = window.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden' || style.opacity === '0') return false;
    const rect = el.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
  }};
  const isDisabled = (el) => el.disabled === true || el.getAttribute('aria-disabled') === 'true' || el.classList.contains('disabled');"#,
        max = MAX_LABEL_CHARS,
    )
}

/// Encode `s` as a JavaScript string literal.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}
