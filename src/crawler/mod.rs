//! Polite multi-domain crawler with template clustering and hybrid fetch
//! scheduling.
//!
//! The crawler's contract: given seeds and bounds, produce a [`CrawlState`]
//! in which every discovered template has a representative URL fetched
//! successfully or recorded as an error. The state file on disk is the
//! durable interface to the scanner and analyzer.

mod engine;
mod fetch;
mod health;
mod limiter;
mod links;
mod state;

pub use engine::{CrawlOutcome, SiteCrawler};
pub use fetch::{needs_heavy_fallback, FetchMode, FetchResponse, LightFetcher, RETRYABLE_STATUS};
pub use health::DomainHealth;
pub use limiter::DomainLimiter;
pub use links::extract_links;
pub use state::{CrawlState, DomainState, DomainStats};
