//! Static remediation table for the By-Violation aggregation and the
//! Recommendations sheet.
//!
//! Keyed by violation-id prefix with a criterion-keyed fallback, longest
//! prefix winning. Unknown rules get generic guidance instead of holes in
//! the report.

/// Remediation guidance for one class of violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Solution {
    pub description: &'static str,
    pub technical: &'static str,
    pub user_impact: &'static str,
}

const RULE_SOLUTIONS: &[(&str, Solution)] = &[
    ("image-alt", Solution {
        description: "Provide text alternatives for non-text content.",
        technical: "Use the `alt` attribute for images. For complex images, provide a longer description nearby. For decorative images, use `alt=\"\"`.",
        user_impact: "Users of screen readers, people with slow connections, or those who have images disabled.",
    }),
    ("input-image-alt", Solution {
        description: "Give image inputs an accessible name.",
        technical: "Add `alt` to `<input type=\"image\">` describing the action the button performs.",
        user_impact: "Screen reader users who otherwise hear only 'button'.",
    }),
    ("area-alt", Solution {
        description: "Give image-map areas text alternatives.",
        technical: "Add `alt` to every `<area>` element describing its destination.",
        user_impact: "Screen reader users navigating image maps.",
    }),
    ("color-contrast", Solution {
        description: "Ensure text has sufficient color contrast against its background.",
        technical: "Ensure text meets a 4.5:1 contrast ratio (3:1 for large text) using a color contrast checker tool.",
        user_impact: "Users with low vision or color vision deficiencies.",
    }),
    ("link-in-text-block", Solution {
        description: "Color is not used as the only visual means of conveying information.",
        technical: "Supplement color cues with text, icons, or underlines so links stand out from surrounding text without color.",
        user_impact: "Users with color vision deficiencies.",
    }),
    ("meta-viewport", Solution {
        description: "Ensure text can be resized up to 200% without loss of content or functionality.",
        technical: "Do not set `user-scalable=no` or cap `maximum-scale` in the viewport meta tag.",
        user_impact: "Users with low vision who need to magnify text to read it.",
    }),
    ("reflow", Solution {
        description: "Content reflows without two-dimensional scrolling.",
        technical: "Ensure the page reflows into a single column when zoomed to 400%. Avoid content that requires both vertical and horizontal scrolling.",
        user_impact: "Users with low vision who use screen magnification.",
    }),
    ("list", Solution {
        description: "Ensure information, structure, and relationships are programmatically determinable.",
        technical: "Use semantic HTML: `<ul>`/`<ol>` with only `<li>` children, `<table>` for data tables, ARIA roles for custom components.",
        user_impact: "Screen reader users who rely on programmatic structure to understand the page layout.",
    }),
    ("heading-order", Solution {
        description: "Use a logical heading hierarchy.",
        technical: "Nest headings without skipping levels; one `<h1>` per page, `<h2>` under it, and so on.",
        user_impact: "Screen reader users who skim pages by heading level.",
    }),
    ("keyboard", Solution {
        description: "All functionality is available from a keyboard.",
        technical: "Ensure all interactive elements can be reached and activated using Tab, Shift+Tab, and Enter/Space.",
        user_impact: "Users with motor disabilities who cannot use a mouse, and screen reader users.",
    }),
    ("bypass", Solution {
        description: "Provide a mechanism to bypass repeated blocks of content.",
        technical: "Implement a \"Skip to main content\" link at the beginning of the page, or use ARIA landmark roles.",
        user_impact: "Keyboard-only and screen reader users who can avoid tabbing through navigation on every page.",
    }),
    ("region", Solution {
        description: "Place all content inside landmark regions.",
        technical: "Wrap page content in `<header>`, `<nav>`, `<main>`, `<aside>` and `<footer>` (or equivalent ARIA landmarks).",
        user_impact: "Screen reader users who navigate by landmarks.",
    }),
    ("document-title", Solution {
        description: "Provide web pages with titles that describe topic or purpose.",
        technical: "Use a unique and descriptive `<title>` element for each page.",
        user_impact: "All users, especially screen reader users who rely on the title to identify the page.",
    }),
    ("link-name", Solution {
        description: "The purpose of each link can be determined from its text or context.",
        technical: "Use descriptive link text (e.g., \"Read our Q3 financial report\") instead of generic text (\"Click here\"); give icon links an `aria-label`.",
        user_impact: "Screen reader users who often navigate by listing all the links on a page.",
    }),
    ("empty-heading", Solution {
        description: "Headings and labels describe the content they introduce.",
        technical: "Remove empty heading elements or fill them with descriptive text.",
        user_impact: "Screen reader users who use headings to skim content.",
    }),
    ("focus-visible", Solution {
        description: "Ensure a keyboard focus indicator is always visible.",
        technical: "Do not remove the default focus outline (`outline: none;`). If you customize it, ensure the custom indicator is highly visible.",
        user_impact: "Sighted keyboard-only users who need to see where they are on the page.",
    }),
    ("target-size", Solution {
        description: "Pointer targets are at least 24 by 24 CSS pixels.",
        technical: "Ensure all clickable targets meet the minimum size, or have sufficient spacing from other targets.",
        user_impact: "Users with motor impairments and touch screen users.",
    }),
    ("html-has-lang", Solution {
        description: "Specify the default human language of the page.",
        technical: "Add the `lang` attribute to the `<html>` element, e.g., `<html lang=\"en\">`.",
        user_impact: "Screen readers that use the attribute to switch to the correct voice profile for pronunciation.",
    }),
    ("html-lang-valid", Solution {
        description: "Use a valid language tag.",
        technical: "Set `lang` to a valid BCP 47 tag (e.g., `en`, `it`, `pt-BR`).",
        user_impact: "Screen reader users, ensuring correct pronunciation.",
    }),
    ("valid-lang", Solution {
        description: "Specify the human language of passages that differ from the page language.",
        technical: "Use the `lang` attribute on elements containing text in a different language.",
        user_impact: "Screen reader users, ensuring correct pronunciation of foreign words.",
    }),
    ("label", Solution {
        description: "Provide labels or instructions when content requires user input.",
        technical: "Use the `<label>` element for all form controls. Provide clear instructions for required formats (e.g., \"Date (MM/DD/YYYY)\").",
        user_impact: "All users, especially screen reader users who need the label to understand the purpose of a form field.",
    }),
    ("select-name", Solution {
        description: "Give select elements an accessible name.",
        technical: "Associate a `<label>` with every `<select>`, or add `aria-label`/`aria-labelledby`.",
        user_impact: "Screen reader users filling in forms.",
    }),
    ("form-field-multiple-labels", Solution {
        description: "Give each form field exactly one label.",
        technical: "Remove duplicate `<label for>` associations; combine text into a single label element.",
        user_impact: "Screen reader users who may hear conflicting field names.",
    }),
    ("button-name", Solution {
        description: "Ensure all UI components have a name and role.",
        technical: "Give every `<button>` visible text or an `aria-label`; never leave icon buttons unnamed.",
        user_impact: "Screen reader users whose software relies on this information to convey the purpose of controls.",
    }),
    ("frame-title", Solution {
        description: "Give frames descriptive titles.",
        technical: "Add a `title` attribute to every `<iframe>` describing its content.",
        user_impact: "Screen reader users navigating between frames.",
    }),
    ("aria-", Solution {
        description: "Use ARIA roles, states and properties correctly.",
        technical: "Use native HTML elements where possible; otherwise ensure ARIA attributes are valid for the role, required children/parents exist, and hidden elements are not focusable.",
        user_impact: "Screen reader users whose software relies on ARIA semantics being coherent.",
    }),
    ("duplicate-id", Solution {
        description: "Keep `id` attributes unique.",
        technical: "Deduplicate `id` values, especially on active and ARIA-referenced elements.",
        user_impact: "Assistive technology that resolves references (labels, descriptions) through ids.",
    }),
    ("status-messages", Solution {
        description: "Status messages can be programmatically determined.",
        technical: "Use an ARIA live region (`role=\"status\"`, `role=\"alert\"`, or `aria-live`) for dynamically updated content.",
        user_impact: "Screen reader users who need to be notified of important changes without losing focus.",
    }),
    ("video-caption", Solution {
        description: "Provide captions for prerecorded audio content in synchronized media.",
        technical: "Add a synchronized caption track (e.g., WebVTT) to all videos containing audio.",
        user_impact: "Users who are deaf, hard of hearing, or watching in a noisy environment.",
    }),
    ("autocomplete-valid", Solution {
        description: "Programmatically identify the purpose of input fields.",
        technical: "Use the `autocomplete` attribute on form fields with appropriate values (e.g., `autocomplete=\"email\"`).",
        user_impact: "Users with cognitive disabilities who benefit from autofill.",
    }),
    ("scrollable-region-focusable", Solution {
        description: "Make scrollable regions reachable by keyboard.",
        technical: "Add `tabindex=\"0\"` to scrollable containers so keyboard users can scroll them.",
        user_impact: "Keyboard-only users who cannot otherwise reach clipped content.",
    }),
];

const FALLBACK: Solution = Solution {
    description: "Check WCAG guidelines for this violation",
    technical: "Refer to WCAG documentation",
    user_impact: "May affect users with disabilities",
};

/// Longest-prefix lookup by violation id.
#[must_use]
pub fn solution_for(violation_id: &str) -> Solution {
    let needle = violation_id.trim().to_lowercase();
    let mut best: Option<(&str, Solution)> = None;
    for (prefix, solution) in RULE_SOLUTIONS {
        if needle.starts_with(prefix) {
            let better = match best {
                Some((current, _)) => prefix.len() > current.len(),
                None => true,
            };
            if better {
                best = Some((prefix, *solution));
            }
        }
    }
    best.map(|(_, solution)| solution).unwrap_or(FALLBACK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_rules_get_specific_guidance() {
        let s = solution_for("color-contrast");
        assert!(s.technical.contains("4.5:1"));
    }

    #[test]
    fn prefix_families_resolve() {
        // Every aria-* rule without its own entry shares the family advice.
        let s = solution_for("aria-valid-attr-value");
        assert!(s.description.contains("ARIA"));
        // But duplicate-id-aria prefers its longer prefix.
        let s = solution_for("duplicate-id-aria");
        assert!(s.description.contains("unique"));
    }

    #[test]
    fn unknown_rules_get_generic_guidance() {
        assert_eq!(solution_for("brand-new-rule"), FALLBACK);
    }
}
