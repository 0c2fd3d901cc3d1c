// =============================================================================
// Analysis — ticker summaries and market-mover tables
// =============================================================================
//
// Both are derived from the dense grid. Summaries key off real trading rows
// (a forward-filled placeholder never becomes a "last price"); movers compare
// closes across a configurable period of real trading days.
// =============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{TickerSummary, TradeRecord};

// =============================================================================
// Ticker summaries
// =============================================================================

/// Closes retained per summary row.
const SUMMARY_WINDOW: usize = 10;

/// Build one summary per symbol from the dense dataset.
///
/// `last_price`/`last_date` come from the most recent real row. The closes
/// window holds the last ten real closes, oldest first; symbols with fewer
/// than ten real rows fall back to the tail of the dense sequence so the
/// window still fills out where history allows.
pub fn build_summaries(dense: &[TradeRecord]) -> Vec<TickerSummary> {
    let mut by_symbol: BTreeMap<&str, Vec<&TradeRecord>> = BTreeMap::new();
    for rec in dense {
        by_symbol.entry(rec.symbol.as_str()).or_default().push(rec);
    }

    let mut summaries = Vec::with_capacity(by_symbol.len());
    for (symbol, mut rows) in by_symbol {
        rows.sort_by_key(|r| r.date);

        let reals: Vec<&&TradeRecord> = rows.iter().filter(|r| r.trading_status).collect();
        let Some(&&last_real) = reals.last() else {
            // A symbol that never traded cannot appear in a real dataset, but
            // a caller-supplied slice may still contain one; skip it.
            continue;
        };

        let closes: Vec<f64> = if reals.len() >= SUMMARY_WINDOW {
            reals[reals.len() - SUMMARY_WINDOW..]
                .iter()
                .map(|r| r.close_price)
                .collect()
        } else {
            let start = rows.len().saturating_sub(SUMMARY_WINDOW);
            rows[start..].iter().map(|r| r.close_price).collect()
        };

        summaries.push(TickerSummary {
            ticker: symbol.to_string(),
            company_name: last_real.company_name.clone(),
            last_price: last_real.close_price,
            last_date: last_real.date,
            trading_days: reals.len(),
            last_10_days: closes,
        });
    }
    summaries
}

// =============================================================================
// Market movers
// =============================================================================

/// Comparison window for mover percentages, in real trading days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoverPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl MoverPeriod {
    /// Real trading days the comparison looks back over.
    fn lookback(self) -> usize {
        match self {
            Self::Daily => 1,
            Self::Weekly => 5,
            Self::Monthly => 22,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

/// One row of a movers table.
#[derive(Debug, Clone, Serialize)]
pub struct MoverEntry {
    pub symbol: String,
    pub company_name: String,
    pub close_price: f64,
    pub change_percent: f64,
    /// Volume over the comparison window.
    pub volume: u64,
}

/// Gainers, losers, and most-active tables for one period.
#[derive(Debug, Clone, Serialize)]
pub struct MarketMovers {
    pub period: MoverPeriod,
    pub gainers: Vec<MoverEntry>,
    pub losers: Vec<MoverEntry>,
    pub most_active: Vec<MoverEntry>,
}

/// Compute mover tables over the dense dataset.
///
/// Symbols whose window volume falls below `min_volume` are excluded from all
/// three tables. Each table is capped at `limit` entries.
pub fn compute_movers(
    dense: &[TradeRecord],
    period: MoverPeriod,
    limit: usize,
    min_volume: u64,
) -> MarketMovers {
    let mut by_symbol: BTreeMap<&str, Vec<&TradeRecord>> = BTreeMap::new();
    for rec in dense.iter().filter(|r| r.trading_status) {
        by_symbol.entry(rec.symbol.as_str()).or_default().push(rec);
    }

    let mut entries = Vec::new();
    for (symbol, mut rows) in by_symbol {
        rows.sort_by_key(|r| r.date);
        let last = rows[rows.len() - 1];

        let lookback = period.lookback();
        let (change_percent, volume) = if lookback == 1 {
            (last.change_percent, last.volume)
        } else {
            let window = &rows[rows.len().saturating_sub(lookback + 1)..];
            let base = window[0].close_price;
            let pct = if base != 0.0 {
                (last.close_price - base) / base * 100.0
            } else {
                0.0
            };
            let vol = window[1..].iter().map(|r| r.volume).sum();
            (pct, vol)
        };

        if volume < min_volume {
            continue;
        }

        entries.push(MoverEntry {
            symbol: symbol.to_string(),
            company_name: last.company_name.clone(),
            close_price: last.close_price,
            change_percent,
            volume,
        });
    }

    let mut gainers: Vec<MoverEntry> = entries
        .iter()
        .filter(|e| e.change_percent > 0.0)
        .cloned()
        .collect();
    gainers.sort_by(|a, b| b.change_percent.total_cmp(&a.change_percent));
    gainers.truncate(limit);

    let mut losers: Vec<MoverEntry> = entries
        .iter()
        .filter(|e| e.change_percent < 0.0)
        .cloned()
        .collect();
    losers.sort_by(|a, b| a.change_percent.total_cmp(&b.change_percent));
    losers.truncate(limit);

    let mut most_active = entries;
    most_active.sort_by(|a, b| b.volume.cmp(&a.volume));
    most_active.truncate(limit);

    MarketMovers { period, gainers, losers, most_active }
}

// =============================================================================
// Tests
// =============================================================================
