//! Deterministic per-domain output layout with atomic writes.
//!
//! Layout (authoritative):
//!
//! ```text
//! <output_root>/<domain_slug>/{crawler_output, axe_output, analysis_output,
//!                              reports, logs, charts, temp,
//!                              screenshots, funnels}
//! <output_root>/runs/<domain_slug>_<timestamp>/...
//! ```
//!
//! Every persisted artifact goes through [`OutputLayout::atomic_write`]
//! (temp file + rename) so readers observe either the old file or the new
//! one, never a torn write.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, info, warn};

/// The fixed set of per-domain subdirectories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Crawler,
    Axe,
    Analysis,
    Reports,
    Logs,
    Charts,
    Temp,
    Screenshots,
    Funnels,
}

impl Component {
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Crawler => "crawler_output",
            Self::Axe => "axe_output",
            Self::Analysis => "analysis_output",
            Self::Reports => "reports",
            Self::Logs => "logs",
            Self::Charts => "charts",
            Self::Temp => "temp",
            Self::Screenshots => "screenshots",
            Self::Funnels => "funnels",
        }
    }

    const ALL: [Component; 9] = [
        Self::Crawler,
        Self::Axe,
        Self::Analysis,
        Self::Reports,
        Self::Logs,
        Self::Charts,
        Self::Temp,
        Self::Screenshots,
        Self::Funnels,
    ];
}

/// Turn a domain into a filesystem-safe slug: lowercase, word chars and
/// hyphens kept, runs of anything else collapsed to `_`.
#[must_use]
pub fn domain_slug(domain: &str) -> String {
    let lowered = domain.trim().to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut last_was_sep = false;
    for ch in lowered.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' {
            slug.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    let slug = slug.trim_matches('_').to_string();
    sanitize_filename::sanitize(slug)
}

/// Per-domain directory tree rooted at `<output_root>/<slug>`.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    output_root: PathBuf,
    domain_slug: String,
}

impl OutputLayout {
    /// Create the layout and all component directories.
    pub fn create(output_root: impl Into<PathBuf>, domain: &str) -> Result<Self> {
        let layout = Self {
            output_root: output_root.into(),
            domain_slug: domain_slug(domain),
        };
        layout.create_directories()?;
        Ok(layout)
    }

    /// Same layout without touching the filesystem; used when reading
    /// artifacts from a prior run.
    #[must_use]
    pub fn open(output_root: impl Into<PathBuf>, domain: &str) -> Self {
        Self {
            output_root: output_root.into(),
            domain_slug: domain_slug(domain),
        }
    }

    #[must_use]
    pub fn domain_slug(&self) -> &str {
        &self.domain_slug
    }

    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    #[must_use]
    pub fn domain_dir(&self) -> PathBuf {
        self.output_root.join(&self.domain_slug)
    }

    #[must_use]
    pub fn component_dir(&self, component: Component) -> PathBuf {
        self.domain_dir().join(component.dir_name())
    }

    #[must_use]
    pub fn path(&self, component: Component, filename: &str) -> PathBuf {
        self.component_dir(component).join(filename)
    }

    /// Canonical crawler-state location for this domain.
    #[must_use]
    pub fn crawler_state_path(&self) -> PathBuf {
        self.path(
            Component::Crawler,
            &format!("crawler_state_{}.json", self.domain_slug),
        )
    }

    /// Scanner visited-set location.
    #[must_use]
    pub fn visited_path(&self) -> PathBuf {
        self.path(Component::Axe, "visited_urls.txt")
    }

    /// Scanner workbook location.
    #[must_use]
    pub fn axe_workbook_path(&self) -> PathBuf {
        self.path(
            Component::Axe,
            &format!("accessibility_report_{}.json", self.domain_slug),
        )
    }

    /// Final analyzer report workbook.
    #[must_use]
    pub fn report_path(&self) -> PathBuf {
        self.path(
            Component::Analysis,
            &format!("final_analysis_{}.json", self.domain_slug),
        )
    }

    /// Directory for a specific funnel's artifacts.
    #[must_use]
    pub fn funnel_dir(&self, funnel_id: &str) -> PathBuf {
        self.component_dir(Component::Funnels)
            .join(domain_slug(funnel_id))
    }

    pub fn create_directories(&self) -> Result<()> {
        for component in Component::ALL {
            let dir = self.component_dir(component);
            fs::create_dir_all(&dir)
                .with_context(|| format!("creating output directory {}", dir.display()))?;
        }
        debug!(
            "output layout ready under {}",
            self.domain_dir().display()
        );
        Ok(())
    }

    /// Write a file atomically: temp file in the target directory, flushed,
    /// then renamed over the destination.
    pub fn atomic_write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .with_context(|| format!("{} has no parent directory", path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("creating temp file in {}", parent.display()))?;
        tmp.write_all(contents)
            .with_context(|| format!("writing temp file for {}", path.display()))?;
        tmp.flush()?;
        tmp.persist(path)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    /// Serialize a value as pretty JSON and write it atomically.
    pub fn atomic_write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let body = serde_json::to_vec_pretty(value).context("serializing artifact")?;
        self.atomic_write(path, &body)
    }

    /// Rotate an existing file aside as `<stem>_<timestamp>.<ext>`, keeping
    /// at most `max_backups` prior copies.
    pub fn backup_existing(&self, path: &Path, max_backups: usize) -> Result<Option<PathBuf>> {
        if !path.exists() {
            return Ok(None);
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("backup")
            .to_string();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let parent = path
            .parent()
            .with_context(|| format!("{} has no parent directory", path.display()))?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let backup = parent.join(format!("{stem}_{timestamp}{ext}"));
        fs::rename(path, &backup)
            .with_context(|| format!("backing up {}", path.display()))?;
        info!("rotated {} -> {}", path.display(), backup.display());

        self.prune_backups(parent, &stem, &ext, max_backups)?;
        Ok(Some(backup))
    }

    fn prune_backups(
        &self,
        dir: &Path,
        stem: &str,
        ext: &str,
        max_backups: usize,
    ) -> Result<()> {
        let prefix = format!("{stem}_");
        let mut backups: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("listing {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|name| name.starts_with(&prefix) && name.ends_with(ext))
                    .unwrap_or(false)
            })
            .collect();

        if backups.len() <= max_backups {
            return Ok(());
        }
        // Timestamped names sort chronologically.
        backups.sort();
        let excess = backups.len() - max_backups;
        for stale in backups.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&stale) {
                warn!("could not prune old backup {}: {e}", stale.display());
            }
        }
        Ok(())
    }
}

/// Move any existing output for `domain` into `runs/<slug>_<timestamp>/`.
/// Returns the archive path when something was archived.
pub fn archive_previous_run(output_root: &Path, domain: &str) -> Result<Option<PathBuf>> {
    let slug = domain_slug(domain);
    let current = output_root.join(&slug);
    if !current.exists() || fs::read_dir(&current).map(|mut d| d.next().is_none()).unwrap_or(true)
    {
        debug!("no previous output to archive for {slug}");
        return Ok(None);
    }

    let runs_dir = output_root.join("runs");
    fs::create_dir_all(&runs_dir)
        .with_context(|| format!("creating {}", runs_dir.display()))?;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let archive = runs_dir.join(format!("{slug}_{timestamp}"));
    fs::rename(&current, &archive)
        .with_context(|| format!("archiving {} to {}", current.display(), archive.display()))?;
    info!("archived previous run to {}", archive.display());
    Ok(Some(archive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_filesystem_safe() {
        assert_eq!(domain_slug("Example.COM"), "example_com");
        assert_eq!(domain_slug("shop.e.test"), "shop_e_test");
        assert_eq!(domain_slug("my-site.test"), "my-site_test");
    }

    #[test]
    fn creates_all_component_directories() {
        let root = tempfile::tempdir().unwrap();
        let layout = OutputLayout::create(root.path(), "e.test").unwrap();
        for component in Component::ALL {
            assert!(layout.component_dir(component).is_dir());
        }
        assert!(layout
            .crawler_state_path()
            .starts_with(root.path().join("e_test").join("crawler_output")));
    }

    #[test]
    fn atomic_write_replaces_whole_file() {
        let root = tempfile::tempdir().unwrap();
        let layout = OutputLayout::create(root.path(), "e.test").unwrap();
        let path = layout.path(Component::Axe, "visited_urls.txt");
        layout.atomic_write(&path, b"one\ntwo\n").unwrap();
        layout.atomic_write(&path, b"three\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "three\n");
    }

    #[test]
    fn backup_rotation_keeps_bounded_history() {
        let root = tempfile::tempdir().unwrap();
        let layout = OutputLayout::create(root.path(), "e.test").unwrap();
        let path = layout.path(Component::Reports, "report.json");
        for i in 0..4 {
            layout
                .atomic_write(&path, format!("v{i}").as_bytes())
                .unwrap();
            layout.backup_existing(&path, 2).unwrap();
        }
        let backups = fs::read_dir(layout.component_dir(Component::Reports))
            .unwrap()
            .count();
        assert!(backups <= 2, "expected at most 2 backups, found {backups}");
    }

    #[test]
    fn archive_moves_prior_output_under_runs() {
        let root = tempfile::tempdir().unwrap();
        let layout = OutputLayout::create(root.path(), "e.test").unwrap();
        let marker = layout.path(Component::Reports, "marker.txt");
        layout.atomic_write(&marker, b"x").unwrap();

        let archived = archive_previous_run(root.path(), "e.test").unwrap();
        let archive_dir = archived.expect("something was archived");
        assert!(archive_dir.starts_with(root.path().join("runs")));
        assert!(!layout.domain_dir().exists());
        assert!(archive_dir.join("reports").join("marker.txt").exists());

        // Second call is a no-op.
        assert!(archive_previous_run(root.path(), "e.test").unwrap().is_none());
    }
}
