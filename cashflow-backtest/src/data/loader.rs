//! Bar and chain loader for CSV/Parquet files.
//!
//! Expected layouts (one row per interval or contract):
//! - underlying: timestamp, open, high, low, close, volume, implied_vol
//! - option bars: timestamp, open, high, low, close, volume
//! - chains: trade_date, expiry, strike, option_type, [delta]
//!
//! Timestamps may be strings or datetimes; date-only values map to midnight.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;

use super::provider::{InMemoryProvider, ListedChains, StrikeLadder};
use super::types::{Bar, OptionContract, OptionType, UnderlyingBar};

/// Columns of an option bar file.
pub const BAR_COLUMNS: &[&str] = &["timestamp", "open", "high", "low", "close", "volume"];

/// Columns of an underlying file.
pub const UNDERLYING_COLUMNS: &[&str] = &[
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "implied_vol",
];

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y%m%d %H:%M:%S",
];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lazy scan of a CSV or Parquet file, chosen by extension.
pub fn scan(path: &Path) -> Result<LazyFrame, LoaderError> {
    if !path.exists() {
        return Err(LoaderError::FileNotFound(path.display().to_string()));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "parquet" => Ok(LazyFrame::scan_parquet(path, ScanArgsParquet::default())?),
        "csv" => Ok(LazyCsvReader::new(path).with_has_header(true).finish()?),
        _ => Err(LoaderError::UnsupportedFormat(path.display().to_string())),
    }
}

/// Parse a timestamp cell.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .ok()
}

fn price(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(6)
}

fn null_at(column: &str, row: usize) -> LoaderError {
    LoaderError::InvalidData(format!("missing {} at row {}", column, row))
}

fn select_cast(lf: LazyFrame, columns: &[&str]) -> LazyFrame {
    let exprs: Vec<Expr> = columns
        .iter()
        .map(|&name| match name {
            "timestamp" => col(name).cast(DataType::String),
            "volume" => col(name).cast(DataType::Int64),
            _ => col(name).cast(DataType::Float64),
        })
        .collect();
    lf.select(exprs)
}

fn read_bars(df: &DataFrame) -> Result<Vec<Bar>, LoaderError> {
    let ts = df.column("timestamp")?.str()?;
    let open = df.column("open")?.f64()?;
    let high = df.column("high")?.f64()?;
    let low = df.column("low")?.f64()?;
    let close = df.column("close")?.f64()?;
    let volume = df.column("volume")?.i64()?;

    let mut bars = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let raw = ts.get(row).ok_or_else(|| null_at("timestamp", row))?;
        let timestamp = parse_timestamp(raw).ok_or_else(|| {
            LoaderError::InvalidData(format!("bad timestamp '{}' at row {}", raw, row))
        })?;
        bars.push(Bar {
            timestamp,
            open: price(open.get(row).ok_or_else(|| null_at("open", row))?),
            high: price(high.get(row).ok_or_else(|| null_at("high", row))?),
            low: price(low.get(row).ok_or_else(|| null_at("low", row))?),
            close: price(close.get(row).ok_or_else(|| null_at("close", row))?),
            volume: volume.get(row).ok_or_else(|| null_at("volume", row))?,
        });
    }
    Ok(bars)
}

/// Read option trade bars.
pub fn load_option_bars(path: &Path) -> Result<Vec<Bar>, LoaderError> {
    let df = select_cast(scan(path)?, BAR_COLUMNS).collect()?;
    let bars = read_bars(&df)?;
    info!(path = %path.display(), bars = bars.len(), "loaded option bars");
    Ok(bars)
}

/// Read underlying bars with their merged implied volatility.
pub fn load_underlying_bars(path: &Path) -> Result<Vec<UnderlyingBar>, LoaderError> {
    let df = select_cast(scan(path)?, UNDERLYING_COLUMNS).collect()?;
    let bars = read_bars(&df)?;
    let iv = df.column("implied_vol")?.f64()?;

    let mut out = Vec::with_capacity(bars.len());
    for (row, bar) in bars.into_iter().enumerate() {
        let implied_vol = iv.get(row).ok_or_else(|| null_at("implied_vol", row))?;
        out.push(UnderlyingBar { bar, implied_vol });
    }
    info!(path = %path.display(), bars = out.len(), "loaded underlying bars");
    Ok(out)
}

/// Read listed chains. `delta` is optional.
pub fn load_chains(path: &Path, underlying: &str) -> Result<ListedChains, LoaderError> {
    let df = scan(path)?.collect()?;

    let trade_dates = df.column("trade_date")?.cast(&DataType::String)?;
    let trade_dates = trade_dates.str()?;
    let expiries = df.column("expiry")?.cast(&DataType::String)?;
    let expiries = expiries.str()?;
    let strikes = df.column("strike")?.cast(&DataType::Float64)?;
    let strikes = strikes.f64()?;
    let types = df.column("option_type")?.cast(&DataType::String)?;
    let types = types.str()?;
    let deltas = match df.column("delta") {
        Ok(c) => Some(c.cast(&DataType::Float64)?),
        Err(_) => None,
    };
    let deltas = deltas.as_ref().map(|c| c.f64()).transpose()?;

    let mut chains = ListedChains::new();
    for row in 0..df.height() {
        let date = trade_dates
            .get(row)
            .and_then(parse_date)
            .ok_or_else(|| null_at("trade_date", row))?;
        let expiry = expiries
            .get(row)
            .and_then(parse_date)
            .ok_or_else(|| null_at("expiry", row))?;
        let kind = types
            .get(row)
            .and_then(OptionType::from_str)
            .ok_or_else(|| null_at("option_type", row))?;
        let strike = price(strikes.get(row).ok_or_else(|| null_at("strike", row))?);

        let mut contract = OptionContract::new(underlying, expiry, strike, kind);
        if let Some(d) = deltas.and_then(|c| c.get(row)) {
            contract = contract.with_delta(d);
        }
        chains.insert(date, contract);
    }
    info!(path = %path.display(), contracts = df.height(), "loaded option chains");
    Ok(chains)
}

/// Data files for one underlying.
#[derive(Debug, Clone)]
pub struct BarLoader {
    pub underlying: PathBuf,
    pub options: PathBuf,
    pub chains: Option<PathBuf>,
}

impl BarLoader {
    pub fn new(underlying: impl Into<PathBuf>, options: impl Into<PathBuf>) -> Self {
        Self {
            underlying: underlying.into(),
            options: options.into(),
            chains: None,
        }
    }

    pub fn with_chains(mut self, chains: impl Into<PathBuf>) -> Self {
        self.chains = Some(chains.into());
        self
    }

    /// Load every file into an in-memory provider.
    pub fn load(&self, symbol: &str, ladder: StrikeLadder) -> Result<InMemoryProvider, LoaderError> {
        let underlying = load_underlying_bars(&self.underlying)?;
        let options = load_option_bars(&self.options)?;
        let mut provider = InMemoryProvider::new(symbol, underlying, options).with_ladder(ladder);
        if let Some(path) = &self.chains {
            provider = provider.with_chains(load_chains(path, symbol)?);
        }
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{ChainSource, MarketDataProvider};
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2024-01-02 09:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T09:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 09:30"), Some(expected));
        assert_eq!(parse_timestamp("20240102 09:30:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-02"),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_timestamp("not a date"), None);
    }

    #[test]
    fn test_load_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        let underlying = write_file(
            &dir,
            "spy.csv",
            "timestamp,open,high,low,close,volume,implied_vol\n\
             2024-01-02 09:30:00,472.1,473.0,471.5,472.5,1200,0.13\n\
             2024-01-02 10:00:00,472.5,474.0,472.0,473.25,900,0.14\n",
        );
        let options = write_file(
            &dir,
            "spy_opt.csv",
            "timestamp,open,high,low,close,volume\n\
             2024-01-02 09:30:00,3.1,3.3,3.0,3.2,15\n\
             2024-01-02 10:00:00,3.2,3.2,3.2,3.2,0\n\
             2024-01-02 16:00:00,3.25,3.25,3.25,3.25,0\n",
        );
        let chains = write_file(
            &dir,
            "chains.csv",
            "trade_date,expiry,strike,option_type,delta\n\
             2024-01-02,2024-01-05,475,C,0.41\n\
             2024-01-02,2024-01-05,470,P,\n",
        );

        let provider = BarLoader::new(&underlying, &options)
            .with_chains(&chains)
            .load("SPY", StrikeLadder::new("SPY", 1, 5, dec!(1)))
            .unwrap();

        assert_eq!(provider.underlying.len(), 2);
        assert_eq!(provider.underlying[1].bar.close, dec!(473.25));
        assert!((provider.underlying[1].implied_vol - 0.14).abs() < 1e-12);
        assert_eq!(provider.options.len(), 3);
        assert!(provider.options[2].is_settlement_shaped());

        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let chain = provider.get_option_chain("SPY", day, dec!(473)).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].delta, Some(0.41));
        assert_eq!(chain[1].option_type, OptionType::Put);
        assert_eq!(chain[1].delta, None);

        let listed = provider.chains.as_ref().unwrap();
        assert_eq!(listed.chain(day, dec!(473)).len(), 2);
    }

    #[test]
    fn test_missing_file_and_format() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_option_bars(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, LoaderError::FileNotFound(_)));

        let txt = write_file(&dir, "bars.txt", "x");
        let err = load_option_bars(&txt).unwrap_err();
        assert!(matches!(err, LoaderError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_empty_volume_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let options = write_file(
            &dir,
            "spy_opt.csv",
            "timestamp,open,high,low,close,volume\n\
             2024-01-02 09:30:00,3.1,3.3,3.0,3.2,15\n\
             2024-01-02 10:00:00,3.2,3.2,3.2,3.2,\n",
        );
        match load_option_bars(&options).unwrap_err() {
            LoaderError::InvalidData(msg) => assert!(msg.contains("volume at row 1"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
