// =============================================================================
// Workbook Intake — enumeration plus the external spreadsheet extractor
// =============================================================================
//
// Reading .xlsx cells is delegated to the third-party extractor executable;
// everything downstream of its CSV output is handled in-process. The bridge
// streams the child's stdout (row data) and stderr (tagged log lines), and
// kills the child when the pipeline is cancelled.
//
// Extractor contract:
//   isx-extract -in=<file> -out=-                 rows on stdout, record layout
//   isx-extract -in=<file> -mode=indices -out=-   Date,ISX60,ISX15 on stdout
// =============================================================================

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{workbook_date, DailyIndex, TradeRecord};
use crate::export;
use crate::pipeline::stage::{CancelToken, OutputLevel};

// =============================================================================
// Enumeration
// =============================================================================

/// A workbook found under `downloads/`, with the trading date parsed from its
/// filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookFile {
    pub path: PathBuf,
    pub date: NaiveDate,
}

/// Enumerate daily workbooks under `dir`, sorted by date ascending. Lock
/// files (`~$` prefix) and unrelated files are ignored.
pub fn enumerate_workbooks(dir: &Path) -> Result<Vec<WorkbookFile>> {
    let mut found = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        // An absent downloads tree just means nothing has been scraped yet.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to list {}", dir.display()));
        }
    };

    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!(path = %entry.path().display(), "skipping workbook with non-UTF-8 name");
            continue;
        };
        if let Some(date) = workbook_date(name) {
            found.push(WorkbookFile { path: entry.path(), date });
        }
    }

    found.sort_by_key(|w| w.date);
    debug!(dir = %dir.display(), count = found.len(), "workbooks enumerated");
    Ok(found)
}

// =============================================================================
// Parser seam
// =============================================================================

/// Sink for log lines surfaced by a parser implementation.
pub type OutputSink<'a> = &'a (dyn Fn(OutputLevel, &str) + Send + Sync);

/// Turns one workbook into raw trade rows. The production implementation
/// shells out to the extractor; tests substitute an in-memory fake.
pub trait WorkbookParser: Send + Sync {
    /// Parse all trade rows from the workbook at `path`.
    fn parse<'a>(
        &'a self,
        path: &'a Path,
        cancel: &'a CancelToken,
        sink: OutputSink<'a>,
    ) -> BoxFuture<'a, Result<Vec<TradeRecord>>>;

    /// Extract the market index row from the workbook at `path`, when the
    /// sheet carries one.
    fn parse_indices<'a>(
        &'a self,
        path: &'a Path,
        cancel: &'a CancelToken,
        sink: OutputSink<'a>,
    ) -> BoxFuture<'a, Result<Option<DailyIndex>>>;
}

// =============================================================================
// ExtractorBridge
// =============================================================================

/// [`WorkbookParser`] backed by the external extractor executable.
pub struct ExtractorBridge {
    executable: PathBuf,
}

impl ExtractorBridge {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self { executable: executable.into() }
    }

    /// Run the extractor once, streaming stderr into `sink` and collecting
    /// stdout. The child is killed and reaped on cancellation.
    async fn run_extractor(
        &self,
        args: &[String],
        cancel: &CancelToken,
        sink: OutputSink<'_>,
    ) -> Result<String> {
        let mut child = Command::new(&self.executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn extractor {}", self.executable.display()))?;

        let stdout = child.stdout.take().context("extractor stdout unavailable")?;
        let stderr = child.stderr.take().context("extractor stderr unavailable")?;
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();

        let mut captured = String::new();
        let mut out_done = false;
        let mut err_done = false;

        while !(out_done && err_done) {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    bail!("extractor cancelled");
                }
                line = out_lines.next_line(), if !out_done => {
                    match line.context("failed to read extractor stdout")? {
                        Some(l) => {
                            captured.push_str(&l);
                            captured.push('\n');
                        }
                        None => out_done = true,
                    }
                }
                line = err_lines.next_line(), if !err_done => {
                    match line.context("failed to read extractor stderr")? {
                        Some(l) => sink(OutputLevel::from_tagged_line(&l), &l),
                        None => err_done = true,
                    }
                }
            }
        }

        let status = child.wait().await.context("failed to reap extractor")?;
        if !status.success() {
            bail!("extractor exited with {status}");
        }
        Ok(captured)
    }
}

impl WorkbookParser for ExtractorBridge {
    fn parse<'a>(
        &'a self,
        path: &'a Path,
        cancel: &'a CancelToken,
        sink: OutputSink<'a>,
    ) -> BoxFuture<'a, Result<Vec<TradeRecord>>> {
        Box::pin(async move {
            let args = vec![format!("-in={}", path.display()), "-out=-".to_string()];
            let stdout = self.run_extractor(&args, cancel, sink).await?;
            export::parse_records(&stdout, path)
                .with_context(|| format!("extractor output for {} is malformed", path.display()))
        })
    }

    fn parse_indices<'a>(
        &'a self,
        path: &'a Path,
        cancel: &'a CancelToken,
        sink: OutputSink<'a>,
    ) -> BoxFuture<'a, Result<Option<DailyIndex>>> {
        Box::pin(async move {
            let args = vec![
                format!("-in={}", path.display()),
                "-mode=indices".to_string(),
                "-out=-".to_string(),
            ];
            let stdout = self.run_extractor(&args, cancel, sink).await?;
            let mut series = export::parse_indexes(&stdout, path)
                .with_context(|| format!("extractor index output for {} is malformed", path.display()))?;
            Ok(series.pop())
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
