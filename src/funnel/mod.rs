//! Scripted user journeys ("funnels").
//!
//! A funnel is an ordered list of steps executed against a browser; each
//! step leaves an HTML snapshot and a screenshot behind, and those snapshots
//! feed a second scanner pass so violations inside checkout flows get
//! caught even though no crawler would reach them.
//!
//! Action and predicate variants are closed enums: an unknown `type` in a
//! config file fails at load time, not mid-run.

mod executor;

pub use executor::FunnelExecutor;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One scripted interaction inside a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Wait a fixed number of seconds, or until `selector` is visible.
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seconds: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Click {
        selector: String,
    },
    Input {
        selector: String,
        value: String,
    },
    Select {
        selector: String,
        value: String,
    },
    /// Submit the matched form, or the first form on the page when no
    /// selector is given.
    SubmitForm {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Script {
        code: String,
    },
    Screenshot {
        filename: String,
    },
    /// Best-effort dismissal of common cookie/consent banners.
    CookieBanner,
}

/// Predicate evaluated after a step's actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuccessCondition {
    ElementVisible { selector: String },
    ElementClickable { selector: String },
    UrlContains { text: String },
    TextContains { text: String },
}

/// One step of a funnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStep {
    pub name: String,
    /// Navigate here before running actions, when set.
    #[serde(default)]
    pub url: Option<String>,
    /// Block until this selector is visible (or the step times out).
    #[serde(default)]
    pub wait_for_selector: Option<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Absent means: the step succeeded iff its actions completed.
    #[serde(default)]
    pub success_condition: Option<SuccessCondition>,
    #[serde(default = "default_step_timeout")]
    pub timeout_secs: u64,
}

fn default_step_timeout() -> u64 {
    20
}

/// A complete scripted journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelDefinition {
    pub id: String,
    /// Restrict to one domain; `None` applies everywhere.
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub auth_required: bool,
    pub steps: Vec<FunnelStep>,
    /// Violations found inside this funnel weigh this much more.
    #[serde(default = "default_severity_multiplier")]
    pub severity_multiplier: f64,
}

fn default_severity_multiplier() -> f64 {
    1.0
}

/// Artifacts captured for one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelArtifact {
    pub funnel_id: String,
    pub step_index: usize,
    pub step_name: String,
    /// Page URL at capture time.
    pub url: String,
    pub html_snapshot_path: PathBuf,
    #[serde(default)]
    pub screenshot_path: Option<PathBuf>,
    pub success: bool,
}

/// Result of executing a whole funnel; serialized as `results.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelArtifacts {
    pub funnel_id: String,
    pub total_steps: usize,
    /// Steps whose success predicate held.
    pub steps_completed: usize,
    pub artifacts: Vec<FunnelArtifact>,
    /// `(step name, url, success)` per executed step, in order.
    pub results: Vec<StepResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub url: String,
    pub success: bool,
}

impl FunnelArtifacts {
    /// Snapshots that should flow into the scanner's funnel pass: every
    /// captured step, including a failed final one.
    #[must_use]
    pub fn scannable_snapshots(&self) -> Vec<&FunnelArtifact> {
        self.artifacts
            .iter()
            .filter(|a| a.html_snapshot_path.exists())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_round_trip_through_serde() {
        let json = r##"[
            {"type": "wait", "seconds": 2.0},
            {"type": "wait", "selector": "#app"},
            {"type": "click", "selector": ".add-to-cart"},
            {"type": "input", "selector": "#email", "value": "a@e.test"},
            {"type": "select", "selector": "#size", "value": "m"},
            {"type": "submit_form"},
            {"type": "script", "code": "window.scrollTo(0, 99)"},
            {"type": "screenshot", "filename": "cart.png"},
            {"type": "cookie_banner"}
        ]"##;
        let actions: Vec<Action> = serde_json::from_str(json).unwrap();
        assert_eq!(actions.len(), 9);
        let back = serde_json::to_string(&actions).unwrap();
        let again: Vec<Action> = serde_json::from_str(&back).unwrap();
        assert_eq!(actions, again);
    }

    #[test]
    fn unknown_action_variant_is_a_load_error() {
        let json = r##"{"type": "hover", "selector": "#menu"}"##;
        assert!(serde_json::from_str::<Action>(json).is_err());
    }

    #[test]
    fn unknown_condition_variant_is_a_load_error() {
        let json = r#"{"type": "status_is", "code": 200}"#;
        assert!(serde_json::from_str::<SuccessCondition>(json).is_err());
    }

    #[test]
    fn funnel_defaults() {
        let json = r#"{
            "id": "checkout",
            "steps": [{"name": "cart", "url": "https://e.test/cart"}]
        }"#;
        let funnel: FunnelDefinition = serde_json::from_str(json).unwrap();
        assert!(!funnel.auth_required);
        assert!((funnel.severity_multiplier - 1.0).abs() < f64::EPSILON);
        assert_eq!(funnel.steps[0].timeout_secs, 20);
        assert!(funnel.steps[0].success_condition.is_none());
    }
}
