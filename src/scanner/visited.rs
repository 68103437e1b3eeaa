//! Scanner visited-set persistence.
//!
//! One URL per line, rewritten in full through an atomic rename at every
//! save. On start the scanner loads this file and drops already-visited
//! URLs from the pending list (when resume is on).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dashmap::DashSet;
use tracing::{debug, info};

use crate::output::OutputLayout;

#[derive(Debug)]
pub struct VisitedSet {
    path: PathBuf,
    urls: DashSet<String>,
}

impl VisitedSet {
    /// Open the visited file, loading prior entries when `resume` is set.
    pub fn open(layout: &OutputLayout, resume: bool) -> Result<Self> {
        let path = layout.visited_path();
        let urls = DashSet::new();
        if resume && path.exists() {
            let body = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            for line in body.lines() {
                let url = line.trim();
                if !url.is_empty() {
                    urls.insert(url.to_string());
                }
            }
            info!("loaded {} previously visited URLs", urls.len());
        } else if !resume {
            debug!("resume disabled: ignoring prior visited state");
        }
        Ok(Self { path, urls })
    }

    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn insert(&self, url: &str) {
        self.urls.insert(url.to_string());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full rewrite via temp file + rename; sorted for stable diffs.
    pub fn save(&self, layout: &OutputLayout) -> Result<()> {
        let sorted: BTreeSet<String> = self.urls.iter().map(|u| u.clone()).collect();
        let mut body = String::with_capacity(sorted.len() * 48);
        for url in &sorted {
            body.push_str(url);
            body.push('\n');
        }
        layout
            .atomic_write(&self.path, body.as_bytes())
            .context("writing visited file")?;
        debug!("persisted {} visited URLs", sorted.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_resumes() {
        let root = tempfile::tempdir().unwrap();
        let layout = OutputLayout::create(root.path(), "e.test").unwrap();

        let visited = VisitedSet::open(&layout, true).unwrap();
        assert!(visited.is_empty());
        visited.insert("https://e.test/a");
        visited.insert("https://e.test/b");
        visited.save(&layout).unwrap();

        let reloaded = VisitedSet::open(&layout, true).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("https://e.test/a"));

        let fresh = VisitedSet::open(&layout, false).unwrap();
        assert!(fresh.is_empty());
    }
}
