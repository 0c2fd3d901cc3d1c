// =============================================================================
// Analysis Stage — regenerate ticker summaries and market-mover tables
// =============================================================================

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use serde_json::json;

use crate::analysis::{build_summaries, compute_movers, MoverPeriod};
use crate::export;
use crate::paths::DataPaths;
use crate::pipeline::stage::{OutputLevel, Stage, StageContext, StageEmitter};

pub struct AnalysisStage {
    paths: DataPaths,
}

impl AnalysisStage {
    pub fn new(paths: DataPaths) -> Self {
        Self { paths }
    }
}

/// Rows per mover table written to disk.
const MOVERS_LIMIT: usize = 10;

impl Stage for AnalysisStage {
    fn id(&self) -> &'static str {
        "analysis"
    }
    fn name(&self) -> &'static str {
        "Analysis"
    }
    fn description(&self) -> &'static str {
        "Regenerate ticker summaries and market-mover tables"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageContext,
        emitter: &'a dyn StageEmitter,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let combined_path = self.paths.combined_csv();
            if !combined_path.exists() {
                emitter.output(OutputLevel::Warn, "no combined dataset yet — nothing to analyse");
                emitter.progress(100.0, "skipped: no data", None);
                return Ok(());
            }

            let dense = export::read_records(&combined_path)
                .context("failed to load combined dataset")?;
            emitter.progress(25.0, &format!("loaded {} rows", dense.len()), None);

            if ctx.cancel.is_cancelled() {
                anyhow::bail!("analysis cancelled");
            }

            let summaries = build_summaries(&dense);
            export::write_ticker_summary(
                &self.paths.ticker_summary_csv(),
                &self.paths.ticker_summary_json(),
                &summaries,
            )?;
            emitter.progress(65.0, &format!("summarised {} tickers", summaries.len()), None);

            let movers = json!({
                "daily": compute_movers(&dense, MoverPeriod::Daily, MOVERS_LIMIT, 0),
                "weekly": compute_movers(&dense, MoverPeriod::Weekly, MOVERS_LIMIT, 0),
                "monthly": compute_movers(&dense, MoverPeriod::Monthly, MOVERS_LIMIT, 0),
            });
            let movers_path = self.paths.reports.join("market_movers.json");
            let tmp = movers_path.with_extension("json.tmp");
            std::fs::write(&tmp, serde_json::to_string_pretty(&movers)?)
                .with_context(|| format!("failed to write {}", tmp.display()))?;
            std::fs::rename(&tmp, &movers_path)
                .with_context(|| format!("failed to rename movers into {}", movers_path.display()))?;

            emitter.output(
                OutputLevel::Info,
                &format!("analysis complete: {} tickers", summaries.len()),
            );
            emitter.progress(
                100.0,
                "analysis complete",
                Some(json!({"total": summaries.len() as u64})),
            );
            Ok(())
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::domain::TradeRecord;
    use crate::pipeline::stage::{CancelToken, NoopEmitter, StageParams, StageContext};

    fn rec(day: u32, symbol: &str, close: f64, real: bool) -> TradeRecord {
        TradeRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            company_name: format!("{symbol} Co"),
            symbol: symbol.to_string(),
            open_price: close,
            high_price: close,
            low_price: close,
            average_price: close,
            prev_average_price: close,
            close_price: close,
            prev_close_price: close,
            change: 0.0,
            change_percent: 1.0,
            num_trades: u64::from(real),
            volume: if real { 100 } else { 0 },
            value: 0.0,
            trading_status: real,
        }
    }

    fn ctx() -> StageContext {
        StageContext {
            pipeline_id: "p-test".into(),
            params: StageParams::new(),
            cancel: CancelToken::new(),
        }
    }

    #[tokio::test]
    async fn regenerates_summary_and_movers() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(tmp.path());
        paths.ensure_directories().unwrap();

        let dense = vec![
            rec(1, "AAA", 10.0, true),
            rec(2, "AAA", 10.5, true),
            rec(1, "BBB", 5.0, true),
            rec(2, "BBB", 5.0, false),
        ];
        export::write_records(&paths.combined_csv(), &dense).unwrap();

        let stage = AnalysisStage::new(paths.clone());
        stage.run(&ctx(), &NoopEmitter).await.unwrap();

        assert!(paths.ticker_summary_csv().exists());
        assert!(paths.ticker_summary_json().exists());

        let movers: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(paths.reports.join("market_movers.json")).unwrap(),
        )
        .unwrap();
        assert!(movers["daily"]["gainers"].is_array());
        assert!(movers["weekly"]["most_active"].is_array());
    }

    #[tokio::test]
    async fn missing_dataset_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(tmp.path());
        paths.ensure_directories().unwrap();

        let stage = AnalysisStage::new(paths);
        assert!(stage.run(&ctx(), &NoopEmitter).await.is_ok());
    }
}
