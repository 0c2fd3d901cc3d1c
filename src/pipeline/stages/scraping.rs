// =============================================================================
// Scraping Stage — fetch new daily workbooks into downloads/
// =============================================================================
//
// Window: last already-downloaded workbook date + 1 through today, bounded to
// a month of backfill when the downloads tree is empty. `from`/`to` pipeline
// params override either end. Fridays and Saturdays are skipped (the exchange
// is closed); a 404 on any other day is treated as a holiday, not a failure.
// =============================================================================

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};
use futures_util::future::BoxFuture;
use tracing::debug;

use crate::domain::workbook_name;
use crate::parse::enumerate_workbooks;
use crate::paths::DataPaths;
use crate::pipeline::stage::{OutputLevel, Stage, StageContext, StageEmitter};

/// Backfill bound when nothing has been downloaded yet.
const DEFAULT_BACKFILL_DAYS: i64 = 30;
/// Per-request timeout for workbook fetches.
const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub struct ScrapingStage {
    http: reqwest::Client,
    base_url: String,
    paths: DataPaths,
}

impl ScrapingStage {
    pub fn new(base_url: impl Into<String>, paths: DataPaths) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self { http, base_url: base_url.into(), paths }
    }

    fn workbook_url(&self, date: NaiveDate) -> String {
        format!(
            "{}/{}",
            self.base_url,
            workbook_name(date).replace(' ', "%20")
        )
    }

    /// Resolve the fetch window from params and the downloads tree.
    fn window(&self, ctx: &StageContext) -> Result<(NaiveDate, NaiveDate)> {
        let today = Utc::now().date_naive();

        let to = match ctx.string("to") {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .with_context(|| format!("invalid `to` date {raw:?}"))?,
            None => today,
        };

        let from = match ctx.string("from") {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .with_context(|| format!("invalid `from` date {raw:?}"))?,
            None => {
                let last_seen = enumerate_workbooks(&self.paths.downloads)?
                    .last()
                    .map(|w| w.date);
                match last_seen {
                    Some(date) => date + Duration::days(1),
                    None => today - Duration::days(DEFAULT_BACKFILL_DAYS),
                }
            }
        };

        Ok((from, to))
    }
}

impl Stage for ScrapingStage {
    fn id(&self) -> &'static str {
        "scraping"
    }
    fn name(&self) -> &'static str {
        "Scraping"
    }
    fn description(&self) -> &'static str {
        "Fetch new daily workbooks from the exchange portal"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageContext,
        emitter: &'a dyn StageEmitter,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (from, to) = self.window(ctx)?;
            if from > to {
                emitter.progress(100.0, "no new dates to fetch", None);
                return Ok(());
            }

            // Trading days only: the exchange is closed Friday and Saturday.
            let dates: Vec<NaiveDate> = from
                .iter_days()
                .take_while(|d| *d <= to)
                .filter(|d| !matches!(d.weekday(), Weekday::Fri | Weekday::Sat))
                .collect();

            let total = dates.len();
            emitter.progress(
                0.0,
                &format!("fetching {total} candidate days ({from} → {to})"),
                Some(serde_json::json!({"current": 0, "total": total as u64})),
            );

            let mut fetched = 0usize;
            for (i, date) in dates.iter().enumerate() {
                if ctx.cancel.is_cancelled() {
                    bail!("scraping cancelled");
                }

                let target = self.paths.downloads.join(workbook_name(*date));
                if target.exists() {
                    debug!(%date, "workbook already downloaded");
                    continue;
                }

                let url = self.workbook_url(*date);
                let response = tokio::select! {
                    _ = ctx.cancel.cancelled() => bail!("scraping cancelled"),
                    resp = self.http.get(&url).send() => {
                        resp.with_context(|| format!("failed to fetch {url}"))?
                    }
                };

                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    // Holiday or report not published yet.
                    emitter.output(OutputLevel::Debug, &format!("no report for {date}"));
                    continue;
                }
                if !response.status().is_success() {
                    bail!("exchange portal returned {} for {url}", response.status());
                }

                let bytes = tokio::select! {
                    _ = ctx.cancel.cancelled() => bail!("scraping cancelled"),
                    body = response.bytes() => {
                        body.with_context(|| format!("failed to read body of {url}"))?
                    }
                };

                tokio::fs::write(&target, &bytes)
                    .await
                    .with_context(|| format!("failed to write {}", target.display()))?;
                fetched += 1;
                emitter.output(OutputLevel::Info, &format!("downloaded {}", workbook_name(*date)));

                let pct = (i + 1) as f64 / total as f64 * 100.0;
                emitter.progress(
                    pct,
                    &format!("fetched {fetched} workbooks"),
                    Some(serde_json::json!({"current": (i + 1) as u64, "total": total as u64})),
                );
            }

            emitter.progress(
                100.0,
                &format!("scrape complete: {fetched} new workbooks"),
                None,
            );
            Ok(())
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
