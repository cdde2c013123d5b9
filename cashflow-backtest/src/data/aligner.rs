//! Alignment of underlying/IV bars with option trade bars.
//!
//! Historical option TRADES requests return an extra end-of-day settlement
//! snapshot per session that has no counterpart in the underlying/IV series.
//! Left in place it shifts every IV merge after it by one interval. The
//! aligner keeps an option bar only when its interval key exists in the
//! underlying series and then requires a 1:1 correspondence. Gaps are fatal;
//! nothing is forward- or back-filled.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{Bar, TradingDay, UnderlyingBar};

/// Underlying and option series cannot be reconciled 1:1.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("data gap: {} underlying interval(s) without option bar (first: {}), {} duplicated option interval(s)", .missing.len(), first_or_none(.missing), .duplicated.len())]
pub struct DataGapError {
    /// Underlying intervals with no option bar after filtering.
    pub missing: Vec<NaiveDateTime>,
    /// Option intervals that appear more than once.
    pub duplicated: Vec<NaiveDateTime>,
}

impl DataGapError {
    /// Calendar dates touched by the gap.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self
            .missing
            .iter()
            .chain(self.duplicated.iter())
            .map(|t| t.date())
            .collect();
        dates.sort();
        dates.dedup();
        dates
    }
}

fn first_or_none(ts: &[NaiveDateTime]) -> String {
    ts.first()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// One interval present in both series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedBar {
    pub timestamp: NaiveDateTime,
    pub underlying: Bar,
    pub option: Bar,
    pub implied_vol: f64,
}

/// What the filter removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentStats {
    pub underlying_bars: usize,
    pub option_bars: usize,
    /// Dropped bars shaped like a settlement snapshot.
    pub dropped_settlement: usize,
    /// Dropped bars that printed volume or moved.
    pub dropped_other: usize,
}

/// Aligned series plus filter statistics.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub bars: Vec<AlignedBar>,
    pub stats: AlignmentStats,
}

/// Align the two series by interval key.
pub fn align(
    underlying_bars: &[UnderlyingBar],
    option_bars: &[Bar],
) -> Result<Vec<AlignedBar>, DataGapError> {
    Ok(align_with_stats(underlying_bars, option_bars)?.bars)
}

/// Align the two series and report how many option bars were dropped.
pub fn align_with_stats(
    underlying_bars: &[UnderlyingBar],
    option_bars: &[Bar],
) -> Result<Alignment, DataGapError> {
    let keys: HashSet<NaiveDateTime> = underlying_bars.iter().map(|u| u.timestamp()).collect();

    let mut stats = AlignmentStats {
        underlying_bars: underlying_bars.len(),
        option_bars: option_bars.len(),
        ..Default::default()
    };

    let mut by_key: HashMap<NaiveDateTime, &Bar> = HashMap::with_capacity(option_bars.len());
    let mut duplicated = Vec::new();

    for bar in option_bars {
        if !keys.contains(&bar.timestamp) {
            if bar.is_settlement_shaped() {
                stats.dropped_settlement += 1;
                debug!(timestamp = %bar.timestamp, "dropping settlement snapshot");
            } else {
                stats.dropped_other += 1;
                warn!(
                    timestamp = %bar.timestamp,
                    volume = bar.volume,
                    "dropping option bar with no underlying interval"
                );
            }
            continue;
        }
        if by_key.insert(bar.timestamp, bar).is_some() {
            duplicated.push(bar.timestamp);
        }
    }

    let mut ordered: Vec<&UnderlyingBar> = underlying_bars.iter().collect();
    ordered.sort_by_key(|u| u.timestamp());

    let mut missing = Vec::new();
    let mut bars = Vec::with_capacity(ordered.len());
    for u in ordered {
        match by_key.get(&u.timestamp()) {
            Some(option) => bars.push(AlignedBar {
                timestamp: u.timestamp(),
                underlying: u.bar.clone(),
                option: (*option).clone(),
                implied_vol: u.implied_vol,
            }),
            None => missing.push(u.timestamp()),
        }
    }

    if !missing.is_empty() || !duplicated.is_empty() || bars.len() != by_key.len() {
        duplicated.sort();
        duplicated.dedup();
        return Err(DataGapError {
            missing,
            duplicated,
        });
    }

    info!(
        aligned = bars.len(),
        dropped_settlement = stats.dropped_settlement,
        dropped_other = stats.dropped_other,
        "aligned option bars to underlying series"
    );

    Ok(Alignment { bars, stats })
}

/// Roll aligned intervals into one session per calendar date.
pub fn sessions(aligned: &[AlignedBar]) -> Vec<TradingDay> {
    let mut days: BTreeMap<NaiveDate, TradingDay> = BTreeMap::new();

    for bar in aligned {
        let u = &bar.underlying;
        let traded = usize::from(bar.option.volume > 0);
        days.entry(u.date())
            .and_modify(|day| {
                day.high = day.high.max(u.high);
                day.low = day.low.min(u.low);
                day.close = u.close;
                day.volume += u.volume;
                day.implied_vol = bar.implied_vol;
                day.option_trades += traded;
            })
            .or_insert_with(|| TradingDay {
                date: u.date(),
                open: u.open,
                high: u.high,
                low: u.low,
                close: u.close,
                volume: u.volume,
                implied_vol: bar.implied_vol,
                option_trades: traded,
            });
    }

    days.into_values().collect()
}
