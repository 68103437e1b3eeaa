//! Static WCAG mapping: violation identifier -> principle / criterion /
//! name, longest-prefix match.
//!
//! The table covers the axe rules this pipeline meets in practice; anything
//! unmapped lands in the `Other` bucket rather than being dropped.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four WCAG principles plus a catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Principle {
    Perceivable,
    Operable,
    Understandable,
    Robust,
    Other,
}

impl fmt::Display for Principle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Perceivable => "Perceivable",
            Self::Operable => "Operable",
            Self::Understandable => "Understandable",
            Self::Robust => "Robust",
            Self::Other => "Other",
        };
        f.write_str(s)
    }
}

/// One mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WcagMapping {
    pub principle: Principle,
    pub criterion: &'static str,
    pub name: &'static str,
}

/// Prefix-keyed table. Sorted by key at first use so the longest-prefix
/// scan can stop at the best match deterministically.
const WCAG_TABLE: &[(&str, WcagMapping)] = &[
    // Principle 1: Perceivable
    ("image-alt", WcagMapping { principle: Principle::Perceivable, criterion: "1.1.1", name: "Non-text Content" }),
    ("input-image-alt", WcagMapping { principle: Principle::Perceivable, criterion: "1.1.1", name: "Non-text Content" }),
    ("area-alt", WcagMapping { principle: Principle::Perceivable, criterion: "1.1.1", name: "Non-text Content" }),
    ("object-alt", WcagMapping { principle: Principle::Perceivable, criterion: "1.1.1", name: "Non-text Content" }),
    ("svg-img-alt", WcagMapping { principle: Principle::Perceivable, criterion: "1.1.1", name: "Non-text Content" }),
    ("audio-caption", WcagMapping { principle: Principle::Perceivable, criterion: "1.2.1", name: "Audio-only and Video-only (Prerecorded)" }),
    ("video-caption", WcagMapping { principle: Principle::Perceivable, criterion: "1.2.2", name: "Captions (Prerecorded)" }),
    ("list", WcagMapping { principle: Principle::Perceivable, criterion: "1.3.1", name: "Info and Relationships" }),
    ("listitem", WcagMapping { principle: Principle::Perceivable, criterion: "1.3.1", name: "Info and Relationships" }),
    ("definition-list", WcagMapping { principle: Principle::Perceivable, criterion: "1.3.1", name: "Info and Relationships" }),
    ("dlitem", WcagMapping { principle: Principle::Perceivable, criterion: "1.3.1", name: "Info and Relationships" }),
    ("heading-order", WcagMapping { principle: Principle::Perceivable, criterion: "1.3.1", name: "Info and Relationships" }),
    ("td-headers-attr", WcagMapping { principle: Principle::Perceivable, criterion: "1.3.1", name: "Info and Relationships" }),
    ("th-has-data-cells", WcagMapping { principle: Principle::Perceivable, criterion: "1.3.1", name: "Info and Relationships" }),
    ("table-fake-caption", WcagMapping { principle: Principle::Perceivable, criterion: "1.3.1", name: "Info and Relationships" }),
    ("autocomplete-valid", WcagMapping { principle: Principle::Perceivable, criterion: "1.3.5", name: "Identify Input Purpose" }),
    ("link-in-text-block", WcagMapping { principle: Principle::Perceivable, criterion: "1.4.1", name: "Use of Color" }),
    ("color-contrast", WcagMapping { principle: Principle::Perceivable, criterion: "1.4.3", name: "Contrast (Minimum)" }),
    ("meta-viewport", WcagMapping { principle: Principle::Perceivable, criterion: "1.4.4", name: "Resize text" }),
    ("reflow", WcagMapping { principle: Principle::Perceivable, criterion: "1.4.10", name: "Reflow" }),
    ("non-text-contrast", WcagMapping { principle: Principle::Perceivable, criterion: "1.4.11", name: "Non-text Contrast" }),
    // Principle 2: Operable
    ("keyboard", WcagMapping { principle: Principle::Operable, criterion: "2.1.1", name: "Keyboard" }),
    ("accesskeys", WcagMapping { principle: Principle::Operable, criterion: "2.1.1", name: "Keyboard" }),
    ("scrollable-region-focusable", WcagMapping { principle: Principle::Operable, criterion: "2.1.1", name: "Keyboard" }),
    ("bypass", WcagMapping { principle: Principle::Operable, criterion: "2.4.1", name: "Bypass Blocks" }),
    ("skip-link", WcagMapping { principle: Principle::Operable, criterion: "2.4.1", name: "Bypass Blocks" }),
    ("region", WcagMapping { principle: Principle::Operable, criterion: "2.4.1", name: "Bypass Blocks" }),
    ("document-title", WcagMapping { principle: Principle::Operable, criterion: "2.4.2", name: "Page Titled" }),
    ("link-name", WcagMapping { principle: Principle::Operable, criterion: "2.4.4", name: "Link Purpose (In Context)" }),
    ("empty-heading", WcagMapping { principle: Principle::Operable, criterion: "2.4.6", name: "Headings and Labels" }),
    ("empty-table-header", WcagMapping { principle: Principle::Operable, criterion: "2.4.6", name: "Headings and Labels" }),
    ("focus-visible", WcagMapping { principle: Principle::Operable, criterion: "2.4.7", name: "Focus Visible" }),
    ("target-size", WcagMapping { principle: Principle::Operable, criterion: "2.5.8", name: "Target Size (Minimum)" }),
    // Principle 3: Understandable
    ("html-has-lang", WcagMapping { principle: Principle::Understandable, criterion: "3.1.1", name: "Language of Page" }),
    ("html-lang-valid", WcagMapping { principle: Principle::Understandable, criterion: "3.1.2", name: "Language of Parts" }),
    ("html-xml-lang-mismatch", WcagMapping { principle: Principle::Understandable, criterion: "3.1.2", name: "Language of Parts" }),
    ("valid-lang", WcagMapping { principle: Principle::Understandable, criterion: "3.1.2", name: "Language of Parts" }),
    ("label", WcagMapping { principle: Principle::Understandable, criterion: "3.3.2", name: "Labels or Instructions" }),
    ("label-title-only", WcagMapping { principle: Principle::Understandable, criterion: "3.3.2", name: "Labels or Instructions" }),
    ("form-field-multiple-labels", WcagMapping { principle: Principle::Understandable, criterion: "3.3.2", name: "Labels or Instructions" }),
    ("select-name", WcagMapping { principle: Principle::Understandable, criterion: "3.3.2", name: "Labels or Instructions" }),
    // Principle 4: Robust
    ("aria-roles", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("aria-allowed-attr", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("aria-allowed-role", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("aria-required-attr", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("aria-required-children", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("aria-required-parent", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("aria-valid-attr", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("aria-hidden-body", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("aria-hidden-focus", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("button-name", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("frame-title", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("input-button-name", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("nested-interactive", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    // Duplicate ids block name/role/value determination under WCAG 2.2;
    // 4.1.1 Parsing itself is obsolete.
    ("duplicate-id-active", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("duplicate-id-aria", WcagMapping { principle: Principle::Robust, criterion: "4.1.2", name: "Name, Role, Value" }),
    ("status-messages", WcagMapping { principle: Principle::Robust, criterion: "4.1.3", name: "Status Messages" }),
    ("aria-live", WcagMapping { principle: Principle::Robust, criterion: "4.1.3", name: "Status Messages" }),
];

const UNMAPPED: WcagMapping = WcagMapping {
    principle: Principle::Other,
    criterion: "N/A",
    name: "Unmapped",
};

/// Longest-prefix lookup over the static table. `duplicate-id-aria` must
/// beat `duplicate-id` when both would match.
#[must_use]
pub fn wcag_mapping(violation_id: &str) -> WcagMapping {
    let needle = violation_id.trim().to_lowercase();
    let mut best: Option<(&str, WcagMapping)> = None;
    for (prefix, mapping) in WCAG_TABLE {
        if needle.starts_with(prefix) {
            let better = match best {
                Some((current, _)) => prefix.len() > current.len(),
                None => true,
            };
            if better {
                best = Some((prefix, *mapping));
            }
        }
    }
    best.map(|(_, mapping)| mapping).unwrap_or(UNMAPPED)
}
