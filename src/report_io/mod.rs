//! Replaceable output collaborators.
//!
//! Chart rendering, workbook serialization and mail delivery are external
//! concerns: the pipeline produces tables, descriptors and paths, and these
//! traits carry them out. The defaults emit JSON artifacts so a run is
//! complete without any heavyweight spreadsheet or SMTP dependency; a real
//! xlsx writer or mailer slots in without touching the pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A named sheet of row objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<serde_json::Value>,
}

/// An ordered collection of sheets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn push<T: Serialize>(&mut self, name: &str, rows: &[T]) -> Result<()> {
        let rows = rows
            .iter()
            .map(|r| serde_json::to_value(r).context("serializing sheet row"))
            .collect::<Result<Vec<_>>>()?;
        self.sheets.push(Sheet {
            name: name.to_string(),
            rows,
        });
        Ok(())
    }

    #[must_use]
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

/// Excel-compatible sheet naming: unsafe characters replaced, 31-char cap,
/// duplicate names suffixed with a counter.
pub struct SheetNamer {
    used: BTreeMap<String, usize>,
}

impl SheetNamer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            used: BTreeMap::new(),
        }
    }

    pub fn name_for(&mut self, candidate: &str) -> String {
        let base: String = candidate
            .chars()
            .map(|c| match c {
                '\\' | '/' | '*' | '?' | ':' | '[' | ']' => '_',
                other => other,
            })
            .take(28)
            .collect();
        let base = if base.is_empty() {
            "sheet".to_string()
        } else {
            base
        };

        let count = self.used.entry(base.clone()).or_insert(0);
        *count += 1;
        let name = if *count == 1 {
            base
        } else {
            format!("{base}_{count}")
        };
        name.chars().take(31).collect()
    }
}

impl Default for SheetNamer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure function from workbook to file.
pub trait WorkbookWriter: Send + Sync {
    fn write(&self, workbook: &Workbook, path: &Path) -> Result<()>;
}

/// Default writer: one JSON document, sheets in order.
#[derive(Debug, Default)]
pub struct JsonWorkbookWriter;

impl WorkbookWriter for JsonWorkbookWriter {
    fn write(&self, workbook: &Workbook, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(workbook).context("serializing workbook")?;
        let tmp = tempfile::NamedTempFile::new_in(
            path.parent().unwrap_or_else(|| Path::new(".")),
        )?;
        std::fs::write(tmp.path(), &body)?;
        tmp.persist(path)
            .with_context(|| format!("replacing {}", path.display()))?;
        info!("workbook written to {}", path.display());
        Ok(())
    }
}

/// What a chart should show; rendering is someone else's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartDescriptor {
    /// Stable identifier, doubles as the output file stem.
    pub id: String,
    pub title: String,
    pub kind: ChartKind,
    /// Label -> value pairs in presentation order.
    pub series: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    Pie,
    HorizontalBar,
}

/// Pure function from chart descriptors to image files.
pub trait ChartRenderer: Send + Sync {
    /// Returns id -> written path for every chart it rendered.
    fn render(&self, charts: &[ChartDescriptor], out_dir: &Path) -> Result<BTreeMap<String, PathBuf>>;
}

/// Default renderer: persists each descriptor as JSON so the report still
/// references concrete chart artifacts.
#[derive(Debug, Default)]
pub struct DescriptorChartRenderer;

impl ChartRenderer for DescriptorChartRenderer {
    fn render(&self, charts: &[ChartDescriptor], out_dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("creating {}", out_dir.display()))?;
        let mut written = BTreeMap::new();
        for chart in charts {
            let path = out_dir.join(format!("{}.json", sanitize_filename::sanitize(&chart.id)));
            let body = serde_json::to_vec_pretty(chart).context("serializing chart")?;
            std::fs::write(&path, body)
                .with_context(|| format!("writing {}", path.display()))?;
            written.insert(chart.id.clone(), path);
        }
        Ok(written)
    }
}

/// Invoked after the pipeline returns report paths.
pub trait Mailer: Send + Sync {
    fn send_report(&self, recipients: &[String], subject: &str, report_paths: &[PathBuf])
        -> Result<()>;
}

/// Default mailer: logs what would have been sent.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_report(
        &self,
        recipients: &[String],
        subject: &str,
        report_paths: &[PathBuf],
    ) -> Result<()> {
        info!(
            "mail dispatch (dry-run): '{}' to {:?} with {} attachment(s)",
            subject,
            recipients,
            report_paths.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_namer_caps_and_dedupes() {
        let mut namer = SheetNamer::new();
        let long = "e.test_a-very-long-product-page-path-name";
        let first = namer.name_for(long);
        let second = namer.name_for(long);
        assert!(first.len() <= 31);
        assert!(second.len() <= 31);
        assert_ne!(first, second);
        assert!(second.ends_with("_2"));

        assert_eq!(namer.name_for("a:b/c"), "a_b_c");
    }

    #[test]
    fn json_workbook_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut workbook = Workbook::default();
        workbook
            .push("Summary", &[serde_json::json!({"metric": "pages", "value": 3})])
            .unwrap();

        let path = dir.path().join("report.json");
        JsonWorkbookWriter.write(&workbook, &path).unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let back: Workbook = serde_json::from_str(&body).unwrap();
        assert_eq!(back.sheets.len(), 1);
        assert_eq!(back.sheet("Summary").unwrap().rows.len(), 1);
    }

    #[test]
    fn descriptor_renderer_writes_chart_files() {
        let dir = tempfile::tempdir().unwrap();
        let charts = vec![ChartDescriptor {
            id: "impact_distribution".to_string(),
            title: "Violations by impact".to_string(),
            kind: ChartKind::Pie,
            series: vec![("critical".to_string(), 4.0), ("minor".to_string(), 2.0)],
        }];
        let written = DescriptorChartRenderer.render(&charts, dir.path()).unwrap();
        assert!(written["impact_distribution"].exists());
    }
}
