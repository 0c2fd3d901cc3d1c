// =============================================================================
// Shared domain types for the ISX Pulse workstation
// =============================================================================
//
// TradeRecord is the unit of everything downstream: one (symbol, date)
// observation, either parsed from a daily workbook (trading_status = true) or
// synthesised by the forward-fill engine (trading_status = false).
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// =============================================================================
// TradeRecord
// =============================================================================

/// One (symbol, date) observation.
///
/// Prices are displayed with 3 decimals; `change_percent` and `value` with 2.
/// `(symbol, date)` is unique within any exported dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub date: NaiveDate,
    pub company_name: String,
    pub symbol: String,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub average_price: f64,
    pub prev_average_price: f64,
    pub close_price: f64,
    pub prev_close_price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub num_trades: u64,
    pub volume: u64,
    pub value: f64,
    /// `true` for a real trading day, `false` for a forward-filled placeholder.
    pub trading_status: bool,
}

// =============================================================================
// TickerSummary
// =============================================================================

/// Dashboard row for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSummary {
    pub ticker: String,
    pub company_name: String,
    /// Close of the most recent real trading row.
    pub last_price: f64,
    /// Date of the most recent real trading row, never of a filled placeholder.
    pub last_date: NaiveDate,
    /// Count of real trading days.
    pub trading_days: usize,
    /// Chronological closes of the last ten real trading days, oldest first.
    /// Padded from the dense sequence when fewer than ten real rows exist.
    pub last_10_days: Vec<f64>,
}

// =============================================================================
// DailyIndex
// =============================================================================

/// One row of the market index series (`indexes.csv`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyIndex {
    pub date: NaiveDate,
    pub isx60: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isx15: Option<f64>,
}

// =============================================================================
// Workbook filenames
// =============================================================================

/// Suffix every daily workbook filename carries after its date.
pub const WORKBOOK_SUFFIX: &str = " ISX Daily Report.xlsx";

/// Parse the trading date out of a workbook filename of the form
/// `YYYY MM DD ISX Daily Report.xlsx`.
///
/// Returns `None` for spreadsheet lock files (`~$` prefix) and anything that
/// does not match the pattern.
pub fn workbook_date(file_name: &str) -> Option<NaiveDate> {
    if file_name.starts_with("~$") {
        return None;
    }
    let prefix = file_name.strip_suffix(WORKBOOK_SUFFIX)?;
    let mut parts = prefix.split(' ');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Workbook filename for a trading date (inverse of [`workbook_date`]).
pub fn workbook_name(date: NaiveDate) -> String {
    format!("{}{}", date.format("%Y %m %d"), WORKBOOK_SUFFIX)
}

/// Per-day CSV filename for a trading date (`isx_daily_YYYY_MM_DD.csv`).
pub fn daily_csv_name(date: NaiveDate) -> String {
    format!("isx_daily_{}.csv", date.format("%Y_%m_%d"))
}

/// Per-symbol history CSV filename.
pub fn ticker_history_name(symbol: &str) -> String {
    format!("{symbol}_trading_history.csv")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn workbook_date_parses_valid_name() {
        assert_eq!(
            workbook_date("2024 03 15 ISX Daily Report.xlsx"),
            Some(d(2024, 3, 15))
        );
    }

    #[test]
    fn workbook_date_rejects_lock_files() {
        assert_eq!(workbook_date("~$2024 03 15 ISX Daily Report.xlsx"), None);
    }

    #[test]
    fn workbook_date_rejects_other_files() {
        assert_eq!(workbook_date("notes.txt"), None);
        assert_eq!(workbook_date("2024 03 ISX Daily Report.xlsx"), None);
        assert_eq!(workbook_date("2024 13 01 ISX Daily Report.xlsx"), None);
    }

    #[test]
    fn workbook_name_roundtrip() {
        let date = d(2024, 1, 2);
        assert_eq!(workbook_date(&workbook_name(date)), Some(date));
    }

    #[test]
    fn daily_csv_name_uses_underscores() {
        assert_eq!(daily_csv_name(d(2024, 3, 15)), "isx_daily_2024_03_15.csv");
    }

    #[test]
    fn ticker_history_name_format() {
        assert_eq!(ticker_history_name("BBOB"), "BBOB_trading_history.csv");
    }
}
