//! Page-type classification from URL paths.
//!
//! An ordered set of regex groups; the first group whose pattern matches the
//! path wins. Everything else is `Other`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::NormalizedUrl;

/// Coarse functional class of a page, used by the analyzer's By-Page-Type
/// aggregation and by funnel identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Homepage,
    Search,
    Product,
    Category,
    Cart,
    Checkout,
    Login,
    Register,
    Account,
    Contact,
    Article,
    About,
    Other,
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Homepage => "homepage",
            Self::Search => "search",
            Self::Product => "product",
            Self::Category => "category",
            Self::Cart => "cart",
            Self::Checkout => "checkout",
            Self::Login => "login",
            Self::Register => "register",
            Self::Account => "account",
            Self::Contact => "contact",
            Self::Article => "article",
            Self::About => "about",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

static PAGE_TYPE_PATTERNS: Lazy<Vec<(PageType, Vec<Regex>)>> = Lazy::new(|| {
    let compile = |patterns: &[&str]| -> Vec<Regex> {
        patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){p}")).expect("static page-type pattern compiles")
            })
            .collect()
    };
    vec![
        (PageType::Homepage, compile(&[r"^/$", r"^/index\.html$", r"^/home$"])),
        (PageType::Search, compile(&[r"/search", r"/cerca", r"/find"])),
        (PageType::Product, compile(&[r"/product", r"/prodotto", r"/item"])),
        (PageType::Category, compile(&[r"/category", r"/categoria", r"/department"])),
        (PageType::Cart, compile(&[r"/cart", r"/carrello", r"/basket"])),
        (PageType::Checkout, compile(&[r"/checkout", r"/acquista", r"/payment"])),
        (PageType::Login, compile(&[r"/login", r"/accedi", r"/signin"])),
        (PageType::Register, compile(&[r"/register", r"/registrazione", r"/signup"])),
        (PageType::Account, compile(&[r"/account", r"/profilo", r"/user"])),
        (PageType::Contact, compile(&[r"/contact", r"/contatti", r"/support"])),
        (PageType::Article, compile(&[r"/article", r"/articolo", r"/post", r"/blog"])),
        (PageType::About, compile(&[r"/about", r"/chi-siamo", r"/azienda"])),
    ]
});

/// Classify a normalized URL by matching its path against the ordered
/// pattern groups.
#[must_use]
pub fn page_type(url: &NormalizedUrl) -> PageType {
    let path = url.path();
    let path = if path.is_empty() { "/" } else { path };
    for (kind, patterns) in PAGE_TYPE_PATTERNS.iter() {
        if patterns.iter().any(|re| re.is_match(path)) {
            return *kind;
        }
    }
    PageType::Other
}
