// =============================================================================
// Forward-Fill Engine — sparse observations to a dense (symbol × day) grid
// =============================================================================
//
// Every symbol gets a row for every trading day from its first real record
// onward. Synthetic rows carry the last real close in every price slot and
// never anchor later fills: the `last_known` slot is only advanced by real
// records, so `prev_*` fields always point back at genuine trades.
// =============================================================================

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use tracing::debug;

use crate::domain::TradeRecord;

// =============================================================================
// FillStats
// =============================================================================

/// Counters reported after a fill pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FillStats {
    /// Rows in the dense output.
    pub total: usize,
    /// Rows that came from parsed workbooks.
    pub active: usize,
    /// Synthesised placeholder rows.
    pub filled: usize,
}

// =============================================================================
// Fill
// =============================================================================

/// Build the dense grid from a sparse set of observations.
///
/// Output ordering is fully determined by the input: dates ascending, symbols
/// lexicographic within each date. Real records pass through bit-for-bit.
pub fn forward_fill(records: &[TradeRecord]) -> (Vec<TradeRecord>, FillStats) {
    // Index by (date, symbol); BTree containers give the deterministic walk.
    let mut by_key: HashMap<(NaiveDate, &str), &TradeRecord> = HashMap::new();
    let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
    let mut symbols: BTreeSet<&str> = BTreeSet::new();

    for rec in records {
        by_key.insert((rec.date, rec.symbol.as_str()), rec);
        dates.insert(rec.date);
        symbols.insert(rec.symbol.as_str());
    }

    let mut last_known: BTreeMap<&str, &TradeRecord> = BTreeMap::new();
    let mut output = Vec::with_capacity(dates.len() * symbols.len());
    let mut active = 0usize;
    let mut filled = 0usize;

    for &date in &dates {
        for &symbol in &symbols {
            if let Some(&real) = by_key.get(&(date, symbol)) {
                output.push(real.clone());
                last_known.insert(symbol, real);
                active += 1;
            } else if let Some(&anchor) = last_known.get(symbol) {
                output.push(synthesise(date, anchor));
                filled += 1;
            }
            // No history yet for this symbol: nothing to fill.
        }
    }

    let stats = FillStats {
        total: output.len(),
        active,
        filled,
    };
    debug!(total = stats.total, active = stats.active, filled = stats.filled, "forward fill complete");
    (output, stats)
}

/// Placeholder row for a symbol that did not trade on `date`.
fn synthesise(date: NaiveDate, anchor: &TradeRecord) -> TradeRecord {
    TradeRecord {
        date,
        company_name: anchor.company_name.clone(),
        symbol: anchor.symbol.clone(),
        open_price: anchor.close_price,
        high_price: anchor.close_price,
        low_price: anchor.close_price,
        average_price: anchor.close_price,
        prev_average_price: anchor.average_price,
        close_price: anchor.close_price,
        prev_close_price: anchor.close_price,
        change: 0.0,
        change_percent: 0.0,
        num_trades: 0,
        volume: 0,
        value: 0.0,
        trading_status: false,
    }
}

// =============================================================================
// Tests
// =============================================================================
