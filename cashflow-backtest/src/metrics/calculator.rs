//! Performance metrics calculator.
//!
//! Works off the per-day outcomes of a run. Withdrawals are added back when
//! computing daily returns so cash taken out does not read as a loss.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::events::{CloseReason, TradeEvent};
use crate::backtest::record::DayOutcome;

/// Run-level performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // Returns
    pub initial_value: Decimal,
    pub final_value: Decimal,
    pub total_return_pct: f64,
    pub cagr: f64,
    pub benchmark_return_pct: f64,

    // Risk
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub max_drawdown_date: Option<NaiveDate>,
    pub sharpe_ratio: f64,
    pub max_margin_ratio: f64,

    // Cash flows
    pub total_premiums: Decimal,
    pub total_interest: Decimal,
    pub total_commissions: Decimal,
    pub total_withdrawn: Decimal,

    // Activity
    pub trading_days: usize,
    pub calls_written: usize,
    pub contracts_written: i64,
    pub assignments: usize,
    pub expirations: usize,
    pub early_closes: usize,
    pub dip_buys: usize,
    pub margin_calls: usize,
    pub skipped_actions: usize,
}

impl PerformanceMetrics {
    pub fn summary(&self) -> String {
        format!(
            "Performance Summary\n\
             ====================\n\
             \n\
             Final Value: ${:.2} (from ${:.2})\n\
             Total Return: {:.2}% (buy-and-hold {:.2}%)\n\
             CAGR: {:.2}%\n\
             Max Drawdown: {:.2}%\n\
             Sharpe Ratio: {:.2}\n\
             Peak Margin Ratio: {:.3}\n\
             \n\
             Premiums: ${:.2}\n\
             Interest: ${:.2}\n\
             Commissions: ${:.2}\n\
             Withdrawn: ${:.2}\n\
             \n\
             Calls Written: {} ({} contracts)\n\
             Assignments: {} | Expired: {} | Closed Early: {}\n\
             Dip Buys: {} | Margin Calls: {} | Skipped: {}",
            self.final_value,
            self.initial_value,
            self.total_return_pct,
            self.benchmark_return_pct,
            self.cagr,
            self.max_drawdown_pct,
            self.sharpe_ratio,
            self.max_margin_ratio,
            self.total_premiums,
            self.total_interest,
            self.total_commissions,
            self.total_withdrawn,
            self.calls_written,
            self.contracts_written,
            self.assignments,
            self.expirations,
            self.early_closes,
            self.dip_buys,
            self.margin_calls,
            self.skipped_actions,
        )
    }
}

/// Drawdown of the portfolio value curve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawdownAnalysis {
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub max_drawdown_date: Option<NaiveDate>,
}

pub struct MetricsCalculator;

impl MetricsCalculator {
    pub fn calculate(initial_balance: Decimal, days: &[DayOutcome]) -> PerformanceMetrics {
        let mut metrics = PerformanceMetrics {
            initial_value: initial_balance,
            final_value: days
                .last()
                .map(|d| d.ledger.portfolio_value)
                .unwrap_or(initial_balance),
            trading_days: days.len(),
            ..Default::default()
        };

        for event in days.iter().flat_map(|d| d.events.iter()) {
            metrics.total_commissions += event.commission();
            match event {
                TradeEvent::Write {
                    contracts,
                    credit,
                    commission,
                    ..
                } => {
                    metrics.calls_written += 1;
                    metrics.contracts_written += contracts;
                    metrics.total_premiums += *credit + *commission;
                }
                TradeEvent::Assign { .. } => metrics.assignments += 1,
                TradeEvent::Close { reason, .. } => match reason {
                    CloseReason::Expired => metrics.expirations += 1,
                    CloseReason::MarginCall => metrics.margin_calls += 1,
                    CloseReason::BoughtBack | CloseReason::ProfitTake => metrics.early_closes += 1,
                },
                TradeEvent::DipBuy { .. } => metrics.dip_buys += 1,
                TradeEvent::MarginCall { .. } => metrics.margin_calls += 1,
                TradeEvent::InterestAccrual { amount, .. } => metrics.total_interest += *amount,
                TradeEvent::Withdrawal { withdrawn, .. } => metrics.total_withdrawn += *withdrawn,
                TradeEvent::Skipped { .. } => metrics.skipped_actions += 1,
                TradeEvent::InitialBuy { .. } => {}
            }
        }

        metrics.total_return_pct = pct_change(initial_balance, metrics.final_value);
        metrics.cagr = Self::calculate_cagr(initial_balance, metrics.final_value, days.len());
        metrics.benchmark_return_pct = match (days.first(), days.last()) {
            (Some(first), Some(last)) => pct_change(first.benchmark_value, last.benchmark_value),
            _ => 0.0,
        };

        let drawdown = Self::analyze_drawdown(days);
        metrics.max_drawdown = drawdown.max_drawdown;
        metrics.max_drawdown_pct = drawdown.max_drawdown_pct;
        metrics.max_drawdown_date = drawdown.max_drawdown_date;
        metrics.sharpe_ratio = Self::calculate_sharpe(days);
        metrics.max_margin_ratio = days
            .iter()
            .map(|d| margin_ratio(d.ledger.margin_used, d.ledger.portfolio_value))
            .fold(0.0, f64::max);

        metrics
    }

    /// CAGR over trading days (252 per year), in percent.
    fn calculate_cagr(initial: Decimal, final_val: Decimal, trading_days: usize) -> f64 {
        let init = to_f64(initial);
        let fin = to_f64(final_val);
        if init <= 0.0 || fin <= 0.0 || trading_days == 0 {
            return 0.0;
        }
        let years = trading_days as f64 / 252.0;
        ((fin / init).powf(1.0 / years) - 1.0) * 100.0
    }

    fn analyze_drawdown(days: &[DayOutcome]) -> DrawdownAnalysis {
        let mut analysis = DrawdownAnalysis::default();
        let Some(first) = days.first() else {
            return analysis;
        };

        let mut peak = first.ledger.portfolio_value;
        for day in days {
            let value = day.ledger.portfolio_value;
            if value > peak {
                peak = value;
                continue;
            }
            let drawdown = peak - value;
            if drawdown > analysis.max_drawdown {
                analysis.max_drawdown = drawdown;
                analysis.max_drawdown_pct = if peak > Decimal::ZERO {
                    to_f64(drawdown) / to_f64(peak) * 100.0
                } else {
                    0.0
                };
                analysis.max_drawdown_date = Some(day.date);
            }
        }
        analysis
    }

    /// Annualized Sharpe of daily returns, risk-free rate zero.
    fn calculate_sharpe(days: &[DayOutcome]) -> f64 {
        let returns: Vec<f64> = days
            .windows(2)
            .filter_map(|w| {
                let prev = to_f64(w[0].ledger.portfolio_value);
                if prev <= 0.0 {
                    return None;
                }
                let withdrawn: Decimal = w[1]
                    .events
                    .iter()
                    .map(|e| match e {
                        TradeEvent::Withdrawal { withdrawn, .. } => *withdrawn,
                        _ => Decimal::ZERO,
                    })
                    .sum();
                let curr = to_f64(w[1].ledger.portfolio_value + withdrawn);
                Some((curr - prev) / prev)
            })
            .collect();

        if returns.len() < 2 {
            return 0.0;
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let std_dev = variance.sqrt();
        if std_dev == 0.0 {
            return 0.0;
        }
        mean / std_dev * 252.0_f64.sqrt()
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.try_into().unwrap_or(0.0)
}

fn pct_change(from: Decimal, to: Decimal) -> f64 {
    let from = to_f64(from);
    if from == 0.0 {
        return 0.0;
    }
    (to_f64(to) - from) / from * 100.0
}

fn margin_ratio(margin: Decimal, equity: Decimal) -> f64 {
    if margin.is_zero() || equity <= Decimal::ZERO {
        return 0.0;
    }
    to_f64(margin / equity)
}
