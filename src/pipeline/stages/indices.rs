// =============================================================================
// Indices Stage — extract the ISX60/ISX15 series into indexes.csv
// =============================================================================
//
// Only workbooks whose date is not already in the series are consulted; the
// `full` flag rebuilds the series from every workbook. Not every workbook
// carries the index sheet, so an empty extraction is normal and skipped
// silently.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use futures_util::future::BoxFuture;

use crate::domain::DailyIndex;
use crate::export;
use crate::parse::{enumerate_workbooks, WorkbookParser};
use crate::paths::DataPaths;
use crate::pipeline::stage::{OutputLevel, Stage, StageContext, StageEmitter};

pub struct IndicesStage {
    parser: Arc<dyn WorkbookParser>,
    paths: DataPaths,
}

impl IndicesStage {
    pub fn new(parser: Arc<dyn WorkbookParser>, paths: DataPaths) -> Self {
        Self { parser, paths }
    }
}

impl Stage for IndicesStage {
    fn id(&self) -> &'static str {
        "indices"
    }
    fn name(&self) -> &'static str {
        "Indices"
    }
    fn description(&self) -> &'static str {
        "Extract the ISX60/ISX15 index series"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageContext,
        emitter: &'a dyn StageEmitter,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let full = ctx.flag("full");
            let indexes_path = self.paths.indexes_csv();

            // Keyed by date so reprocessed workbooks replace their old row.
            let mut series: BTreeMap<NaiveDate, DailyIndex> = BTreeMap::new();
            if indexes_path.exists() && !full {
                for row in export::read_indexes(&indexes_path)
                    .context("failed to load existing index series")?
                {
                    series.insert(row.date, row);
                }
            }

            let workbooks = enumerate_workbooks(&self.paths.downloads)?;
            let candidates: Vec<_> = workbooks
                .iter()
                .filter(|wb| !series.contains_key(&wb.date))
                .collect();

            if candidates.is_empty() {
                emitter.progress(100.0, "index series up to date", None);
                return Ok(());
            }

            let total = candidates.len();
            let sink = |level: OutputLevel, line: &str| emitter.output(level, line);
            let mut extracted = 0usize;
            for (i, wb) in candidates.iter().enumerate() {
                if ctx.cancel.is_cancelled() {
                    bail!("index extraction cancelled");
                }

                match self.parser.parse_indices(&wb.path, &ctx.cancel, &sink).await {
                    Ok(Some(row)) => {
                        series.insert(row.date, row);
                        extracted += 1;
                    }
                    Ok(None) => {
                        emitter.output(
                            OutputLevel::Debug,
                            &format!("no index sheet in workbook for {}", wb.date),
                        );
                    }
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("failed to extract indices from {}", wb.path.display())
                        });
                    }
                }

                let pct = (i + 1) as f64 / total as f64 * 95.0;
                emitter.progress(
                    pct,
                    &format!("scanned {}/{total} workbooks", i + 1),
                    Some(serde_json::json!({"current": (i + 1) as u64, "total": total as u64})),
                );
            }

            let rows: Vec<DailyIndex> = series.into_values().collect();
            export::write_indexes(&indexes_path, &rows)
                .context("failed to write index series")?;

            emitter.output(
                OutputLevel::Info,
                &format!("index series: {} rows ({extracted} new)", rows.len()),
            );
            emitter.progress(100.0, "index extraction complete", None);
            Ok(())
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
