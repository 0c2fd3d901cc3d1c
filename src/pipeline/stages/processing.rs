// =============================================================================
// Processing Stage — workbooks to the dense grid and its CSV outputs
// =============================================================================
//
// Smart update: a workbook whose per-day CSV already exists is skipped unless
// the `full` flag is set. Dates about to be reparsed are dropped from the
// retained combined set first, so reprocessing never duplicates rows. Only
// real rows are retained from the existing combined file; placeholders are
// regenerated by the fill pass every run, which keeps reruns idempotent.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use futures_util::future::BoxFuture;

use crate::domain::daily_csv_name;
use crate::export;
use crate::fill::forward_fill;
use crate::parse::{enumerate_workbooks, WorkbookParser};
use crate::paths::DataPaths;
use crate::pipeline::stage::{OutputLevel, Stage, StageContext, StageEmitter};

pub struct ProcessingStage {
    parser: Arc<dyn WorkbookParser>,
    paths: DataPaths,
}

impl ProcessingStage {
    pub fn new(parser: Arc<dyn WorkbookParser>, paths: DataPaths) -> Self {
        Self { parser, paths }
    }
}

impl Stage for ProcessingStage {
    fn id(&self) -> &'static str {
        "processing"
    }
    fn name(&self) -> &'static str {
        "Processing"
    }
    fn description(&self) -> &'static str {
        "Parse workbooks, build the dense grid, write CSV outputs"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageContext,
        emitter: &'a dyn StageEmitter,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let full = ctx.flag("full");

            let workbooks = enumerate_workbooks(&self.paths.downloads)?;
            emitter.progress(2.0, &format!("found {} workbooks", workbooks.len()), None);

            let to_parse: Vec<_> = workbooks
                .iter()
                .filter(|wb| full || !self.paths.reports.join(daily_csv_name(wb.date)).exists())
                .collect();

            if to_parse.is_empty() {
                emitter.output(OutputLevel::Info, "all workbooks already processed");
                emitter.progress(100.0, "up to date", None);
                return Ok(());
            }

            // Retained set: real rows of the existing combined file, minus the
            // dates about to be reparsed.
            let combined_path = self.paths.combined_csv();
            let mut records = if combined_path.exists() {
                export::read_records(&combined_path)
                    .context("failed to load existing combined dataset")?
                    .into_iter()
                    .filter(|r| r.trading_status)
                    .collect()
            } else {
                Vec::new()
            };

            let reparse_dates: HashSet<NaiveDate> = to_parse.iter().map(|wb| wb.date).collect();
            let before = records.len();
            records.retain(|r| !reparse_dates.contains(&r.date));
            if before != records.len() {
                emitter.output(
                    OutputLevel::Info,
                    &format!("dropped {} retained rows for reprocessed dates", before - records.len()),
                );
            }

            // Parse, workbook by workbook; cancellation is checked per file
            // and inside the extractor itself.
            let total = to_parse.len();
            let sink = |level: OutputLevel, line: &str| emitter.output(level, line);
            for (i, wb) in to_parse.iter().enumerate() {
                if ctx.cancel.is_cancelled() {
                    bail!("processing cancelled");
                }

                let rows = self
                    .parser
                    .parse(&wb.path, &ctx.cancel, &sink)
                    .await
                    .with_context(|| format!("failed to parse {}", wb.path.display()))?;
                emitter.output(
                    OutputLevel::Info,
                    &format!("parsed {} rows from {}", rows.len(), wb.date),
                );
                records.extend(rows);

                let pct = 5.0 + (i + 1) as f64 / total as f64 * 70.0;
                emitter.progress(
                    pct,
                    &format!("parsed {}/{total} workbooks", i + 1),
                    Some(serde_json::json!({"current": (i + 1) as u64, "total": total as u64})),
                );
            }

            emitter.progress(80.0, "building dense grid", None);
            let (dense, stats) = forward_fill(&records);

            export::write_records_atomic(&combined_path, &dense)
                .context("failed to write combined dataset")?;

            emitter.progress(90.0, "writing per-day and per-ticker files", None);
            let (written, skipped) = export::write_daily_csvs(&self.paths.reports, &dense, full)?;
            export::write_ticker_histories(&self.paths.reports, &dense)?;

            emitter.output(
                OutputLevel::Info,
                &format!(
                    "dense grid: {} rows ({} real, {} filled); {written} daily files written, {skipped} kept",
                    stats.total, stats.active, stats.filled
                ),
            );
            emitter.progress(
                100.0,
                "processing complete",
                Some(serde_json::json!({
                    "total": stats.total as u64,
                    "active": stats.active as u64,
                    "filled": stats.filled as u64,
                })),
            );
            Ok(())
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
