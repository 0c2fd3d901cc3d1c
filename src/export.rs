// =============================================================================
// CSV Exporters — combined, per-day, per-ticker, summary, and index files
// =============================================================================
//
// All files are UTF-8 with a BOM prepended on create (spreadsheet apps key
// their encoding detection off it). Readers tolerate and strip the BOM.
// Column formats: prices %.3f, change-percent and value %.2f, booleans as
// lowercase true/false, dates YYYY-MM-DD. The combined and summary files are
// replaced atomically (tmp + rename) since readers may hold them open.
// =============================================================================

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::domain::{daily_csv_name, ticker_history_name, DailyIndex, TickerSummary, TradeRecord};

/// UTF-8 byte-order mark written at the start of every CSV this service owns.
const BOM: &[u8] = b"\xef\xbb\xbf";

/// Header of the combined, per-day, and per-ticker CSVs.
pub const RECORD_HEADER: [&str; 16] = [
    "Date",
    "CompanyName",
    "Symbol",
    "OpenPrice",
    "HighPrice",
    "LowPrice",
    "AveragePrice",
    "PrevAveragePrice",
    "ClosePrice",
    "PrevClosePrice",
    "Change",
    "ChangePercent",
    "NumTrades",
    "Volume",
    "Value",
    "TradingStatus",
];

/// Header of `indexes.csv`.
pub const INDEX_HEADER: [&str; 3] = ["Date", "ISX60", "ISX15"];

/// Header of `ticker_summary.csv`.
pub const SUMMARY_HEADER: [&str; 6] = [
    "Ticker",
    "CompanyName",
    "LastPrice",
    "LastDate",
    "TradingDays",
    "Last10Days",
];

// =============================================================================
// Record files
// =============================================================================

fn record_row(rec: &TradeRecord) -> [String; 16] {
    [
        rec.date.format("%Y-%m-%d").to_string(),
        rec.company_name.clone(),
        rec.symbol.clone(),
        format!("{:.3}", rec.open_price),
        format!("{:.3}", rec.high_price),
        format!("{:.3}", rec.low_price),
        format!("{:.3}", rec.average_price),
        format!("{:.3}", rec.prev_average_price),
        format!("{:.3}", rec.close_price),
        format!("{:.3}", rec.prev_close_price),
        format!("{:.3}", rec.change),
        format!("{:.2}", rec.change_percent),
        rec.num_trades.to_string(),
        rec.volume.to_string(),
        format!("{:.2}", rec.value),
        rec.trading_status.to_string(),
    ]
}

/// Write a record CSV (combined/daily/ticker layout) to `path`, BOM first.
pub fn write_records(path: &Path, records: &[TradeRecord]) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(BOM)
        .with_context(|| format!("failed to write BOM to {}", path.display()))?;

    let mut wtr = csv::Writer::from_writer(file);
    wtr.write_record(RECORD_HEADER)?;
    for rec in records {
        wtr.write_record(record_row(rec))?;
    }
    wtr.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

/// Write a record CSV atomically (tmp sibling + rename).
pub fn write_records_atomic(path: &Path, records: &[TradeRecord]) -> Result<()> {
    let tmp = path.with_extension("csv.tmp");
    write_records(&tmp, records)?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to rename {} into place", tmp.display()))?;
    Ok(())
}

fn parse_field<T: std::str::FromStr>(row: &csv::StringRecord, idx: usize, path: &Path) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = row
        .get(idx)
        .with_context(|| format!("missing column {idx} in {}", path.display()))?;
    raw.parse::<T>().map_err(|e| {
        anyhow::anyhow!("bad value {raw:?} in column {idx} of {}: {e}", path.display())
    })
}

/// Read a record CSV written by [`write_records`], stripping an optional BOM.
pub fn read_records(path: &Path) -> Result<Vec<TradeRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_records(&content, path)
}

/// Parse record-CSV text (combined/daily/ticker layout). `origin` is only
/// used for error messages.
pub fn parse_records(content: &str, origin: &Path) -> Result<Vec<TradeRecord>> {
    let path = origin;
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let header = rdr.headers()?.clone();
    if header.len() != RECORD_HEADER.len() {
        bail!(
            "unexpected column count {} in {}",
            header.len(),
            path.display()
        );
    }

    let mut records = Vec::new();
    for row in rdr.records() {
        let row = row.with_context(|| format!("malformed row in {}", path.display()))?;
        let date = NaiveDate::parse_from_str(
            row.get(0).unwrap_or_default(),
            "%Y-%m-%d",
        )
        .with_context(|| format!("bad date in {}", path.display()))?;

        records.push(TradeRecord {
            date,
            company_name: row.get(1).unwrap_or_default().to_string(),
            symbol: row.get(2).unwrap_or_default().to_string(),
            open_price: parse_field(&row, 3, path)?,
            high_price: parse_field(&row, 4, path)?,
            low_price: parse_field(&row, 5, path)?,
            average_price: parse_field(&row, 6, path)?,
            prev_average_price: parse_field(&row, 7, path)?,
            close_price: parse_field(&row, 8, path)?,
            prev_close_price: parse_field(&row, 9, path)?,
            change: parse_field(&row, 10, path)?,
            change_percent: parse_field(&row, 11, path)?,
            num_trades: parse_field(&row, 12, path)?,
            volume: parse_field(&row, 13, path)?,
            value: parse_field(&row, 14, path)?,
            trading_status: parse_field(&row, 15, path)?,
        });
    }
    Ok(records)
}

// =============================================================================
// Per-day and per-ticker fan-out
// =============================================================================

/// Write one CSV per trading day under `reports`. Existing files are skipped
/// unless `full` is set. Returns (written, skipped).
pub fn write_daily_csvs(reports: &Path, dense: &[TradeRecord], full: bool) -> Result<(usize, usize)> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&TradeRecord>> = BTreeMap::new();
    for rec in dense {
        by_date.entry(rec.date).or_default().push(rec);
    }

    let mut written = 0usize;
    let mut skipped = 0usize;
    for (date, rows) in by_date {
        let path = reports.join(daily_csv_name(date));
        if path.exists() && !full {
            skipped += 1;
            continue;
        }
        let owned: Vec<TradeRecord> = rows.into_iter().cloned().collect();
        write_records(&path, &owned)?;
        written += 1;
    }

    debug!(written, skipped, "daily CSVs updated");
    Ok((written, skipped))
}

/// Write one chronological history CSV per symbol under `reports`.
/// Forward-filled rows are included, distinguishable by `TradingStatus`.
pub fn write_ticker_histories(reports: &Path, dense: &[TradeRecord]) -> Result<usize> {
    let mut by_symbol: BTreeMap<&str, Vec<&TradeRecord>> = BTreeMap::new();
    for rec in dense {
        by_symbol.entry(rec.symbol.as_str()).or_default().push(rec);
    }

    for (symbol, rows) in &by_symbol {
        let owned: Vec<TradeRecord> = rows.iter().map(|r| (*r).clone()).collect();
        write_records(&reports.join(ticker_history_name(symbol)), &owned)?;
    }

    info!(tickers = by_symbol.len(), "ticker histories written");
    Ok(by_symbol.len())
}

// =============================================================================
// Ticker summary
// =============================================================================

/// Write `ticker_summary.csv` and `ticker_summary.json` atomically.
pub fn write_ticker_summary(
    csv_path: &Path,
    json_path: &Path,
    summaries: &[TickerSummary],
) -> Result<()> {
    // CSV side.
    let tmp = csv_path.with_extension("csv.tmp");
    {
        let mut file =
            File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(BOM)?;
        let mut wtr = csv::Writer::from_writer(file);
        wtr.write_record(SUMMARY_HEADER)?;
        for s in summaries {
            let closes = s
                .last_10_days
                .iter()
                .map(|c| format!("{c:.3}"))
                .collect::<Vec<_>>()
                .join(";");
            wtr.write_record([
                s.ticker.clone(),
                s.company_name.clone(),
                format!("{:.3}", s.last_price),
                s.last_date.format("%Y-%m-%d").to_string(),
                s.trading_days.to_string(),
                closes,
            ])?;
        }
        wtr.flush()?;
    }
    std::fs::rename(&tmp, csv_path)
        .with_context(|| format!("failed to rename summary into {}", csv_path.display()))?;

    // JSON side.
    let tmp = json_path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(summaries)
        .context("failed to serialise ticker summary JSON")?;
    std::fs::write(&tmp, body)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, json_path)
        .with_context(|| format!("failed to rename summary into {}", json_path.display()))?;

    info!(tickers = summaries.len(), "ticker summary regenerated");
    Ok(())
}

// =============================================================================
// Index series
// =============================================================================

/// Write `indexes.csv` (header `Date,ISX60,ISX15`), BOM first.
pub fn write_indexes(path: &Path, series: &[DailyIndex]) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(BOM)?;

    let mut wtr = csv::Writer::from_writer(file);
    wtr.write_record(INDEX_HEADER)?;
    for row in series {
        wtr.write_record([
            row.date.format("%Y-%m-%d").to_string(),
            format!("{:.2}", row.isx60),
            row.isx15.map(|v| format!("{v:.2}")).unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read `indexes.csv`, stripping an optional BOM. Missing ISX15 cells come
/// back as `None`.
pub fn read_indexes(path: &Path) -> Result<Vec<DailyIndex>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_indexes(&content, path)
}

/// Parse index-CSV text (`Date,ISX60,ISX15` layout). `origin` is only used
/// for error messages.
pub fn parse_indexes(content: &str, origin: &Path) -> Result<Vec<DailyIndex>> {
    let path = origin;
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let mut series = Vec::new();
    for row in rdr.records() {
        let row = row.with_context(|| format!("malformed row in {}", path.display()))?;
        let date = NaiveDate::parse_from_str(row.get(0).unwrap_or_default(), "%Y-%m-%d")
            .with_context(|| format!("bad date in {}", path.display()))?;
        let isx60: f64 = parse_field(&row, 1, path)?;
        let isx15 = match row.get(2) {
            Some("") | None => None,
            Some(raw) => Some(raw.parse::<f64>().map_err(|e| {
                anyhow::anyhow!("bad ISX15 value {raw:?} in {}: {e}", path.display())
            })?),
        };
        series.push(DailyIndex { date, isx60, isx15 });
    }
    Ok(series)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn rec(date: NaiveDate, symbol: &str, close: f64, real: bool) -> TradeRecord {
        TradeRecord {
            date,
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
            change_percent: 0.0,
            num_trades: if real { 5 } else { 0 },
            volume: if real { 500 } else { 0 },
            value: if real { close * 500.0 } else { 0.0 },
            trading_status: real,
        }
    }

    #[test]
    fn written_file_starts_with_bom_and_header() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("combined.csv");
        write_records(&path, &[rec(d(1), "AAA", 10.0, true)]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..3], BOM);
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        assert!(text.starts_with("Date,CompanyName,Symbol,OpenPrice"));
        assert!(text.contains("2024-01-01,AAA Co,AAA,10.000"));
        assert!(text.contains(",true"));
    }

    #[test]
    fn roundtrip_is_byte_identical() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("a.csv");
        let second = tmp.path().join("b.csv");

        let records = vec![
            rec(d(1), "AAA", 10.123, true),
            rec(d(2), "AAA", 10.0, false),
            rec(d(1), "BBB", 20.5, true),
        ];
        write_records(&first, &records).unwrap();

        let loaded = read_records(&first).unwrap();
        write_records(&second, &loaded).unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
    }

    #[test]
    fn read_strips_bom_and_preserves_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("combined.csv");
        let records = vec![rec(d(3), "TASC", 7.25, true)];
        write_records(&path, &records).unwrap();

        let loaded = read_records(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, "TASC");
        assert_eq!(loaded[0].date, d(3));
        assert_eq!(loaded[0].close_price, 7.25);
        assert!(loaded[0].trading_status);
    }

    #[test]
    fn daily_csvs_skip_existing_unless_full() {
        let tmp = tempfile::tempdir().unwrap();
        let dense = vec![rec(d(1), "AAA", 1.0, true), rec(d(2), "AAA", 1.1, true)];

        let (written, skipped) = write_daily_csvs(tmp.path(), &dense, false).unwrap();
        assert_eq!((written, skipped), (2, 0));

        // Second run with no new dates writes nothing.
        let (written, skipped) = write_daily_csvs(tmp.path(), &dense, false).unwrap();
        assert_eq!((written, skipped), (0, 2));

        // Full rework rewrites everything.
        let (written, skipped) = write_daily_csvs(tmp.path(), &dense, true).unwrap();
        assert_eq!((written, skipped), (2, 0));
    }

    #[test]
    fn ticker_histories_are_per_symbol_and_chronological() {
        let tmp = tempfile::tempdir().unwrap();
        let dense = vec![
            rec(d(1), "AAA", 1.0, true),
            rec(d(1), "BBB", 2.0, true),
            rec(d(2), "AAA", 1.1, false),
        ];
        let count = write_ticker_histories(tmp.path(), &dense).unwrap();
        assert_eq!(count, 2);

        let aaa = read_records(&tmp.path().join("AAA_trading_history.csv")).unwrap();
        assert_eq!(aaa.len(), 2);
        assert!(aaa[0].date < aaa[1].date);
        assert!(!aaa[1].trading_status);
    }

    #[test]
    fn indexes_roundtrip_with_missing_isx15() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("indexes.csv");
        let series = vec![
            DailyIndex { date: d(1), isx60: 623.45, isx15: Some(590.11) },
            DailyIndex { date: d(2), isx60: 625.0, isx15: None },
        ];
        write_indexes(&path, &series).unwrap();

        let loaded = read_indexes(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].isx15, Some(590.11));
        assert_eq!(loaded[1].isx15, None);
        assert_eq!(loaded[1].isx60, 625.0);
    }

    #[test]
    fn summary_files_written_together() {
        let tmp = tempfile::tempdir().unwrap();
        let csv_path = tmp.path().join("ticker_summary.csv");
        let json_path = tmp.path().join("ticker_summary.json");
        let summaries = vec![TickerSummary {
            ticker: "AAA".into(),
            company_name: "AAA Co".into(),
            last_price: 10.5,
            last_date: d(2),
            trading_days: 2,
            last_10_days: vec![10.0, 10.5],
        }];
        write_ticker_summary(&csv_path, &json_path, &summaries).unwrap();

        let csv_text = std::fs::read_to_string(&csv_path).unwrap();
        assert!(csv_text.contains("AAA,AAA Co,10.500,2024-01-02,2,10.000;10.500"));

        let parsed: Vec<TickerSummary> =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed[0].ticker, "AAA");
        assert_eq!(parsed[0].last_10_days, vec![10.0, 10.5]);
    }
}
