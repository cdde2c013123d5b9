//! End-to-end scenarios through the public API.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use cashflow_backtest::backtest::{
    run_simulation, BuyReason, LedgerParams, PortfolioLedger, SimulationConfig, StrategyEngine,
    TradeEvent, WithdrawalStatus,
};
use cashflow_backtest::data::{
    ChainSource, MarketDataset, OptionContract, OptionType, TradingDay,
};
use cashflow_backtest::pricing::BlackScholes;

fn date(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, d).unwrap()
}

fn day(m: u32, d: u32, close: Decimal) -> TradingDay {
    TradingDay::from_close(date(m, d), close, 0.18)
}

/// Chain source that never lists anything, isolating stock-side behavior.
struct NoChain;

impl ChainSource for NoChain {
    fn chain(&self, _date: NaiveDate, _spot: Decimal) -> Vec<OptionContract> {
        Vec::new()
    }
}

fn ledger_at(config: &SimulationConfig, spot: Decimal) -> PortfolioLedger {
    let mut ledger = PortfolioLedger::new(
        LedgerParams::from_config(config),
        BlackScholes::new(config.risk_free_rate, 0.0),
        date(1, 2),
        config.initial_balance,
    );
    ledger.mark(date(1, 2), spot, 0.2);
    ledger
}

#[test]
fn initial_position_is_sixty_percent_of_cash() {
    let config = SimulationConfig {
        initial_balance: dec!(200000),
        initial_position_percent: 0.6,
        ..Default::default()
    };
    let report = StrategyEngine::new(config)
        .unwrap()
        .run(&[day(1, 2, dec!(300))], &NoChain)
        .unwrap();

    let first = &report.days[0];
    assert!(matches!(
        first.events[0],
        TradeEvent::InitialBuy { shares: 400, commission, .. } if commission == dec!(2)
    ));
    assert_eq!(first.ledger.cash, dec!(79998));
    assert_eq!(first.ledger.portfolio_value, dec!(199998));

    let record = &report.daily["2024-01-02"];
    assert_eq!(record.cash_balance, 79998.0);
    assert_eq!(record.margin_ratio, 0.0);
    assert!(record.trading_log.contains("400"));
}

#[test]
fn dip_below_trigger_buys_half_of_idle_cash() {
    let config = SimulationConfig {
        initial_balance: dec!(200000),
        initial_position_percent: 0.6,
        dip_trigger: 0.92,
        dip_buy_percent: 0.5,
        ..Default::default()
    };
    let days = vec![
        day(1, 2, dec!(300)),
        day(1, 3, dec!(310)),
        day(1, 4, dec!(280)),
    ];
    let report = StrategyEngine::new(config)
        .unwrap()
        .run(&days, &NoChain)
        .unwrap();

    // 310 * 0.92 = 285.2 >= 280; idle cash 79998 -> floor(39999 / 280) = 142
    let dip = report.days[2]
        .events
        .iter()
        .find(|e| matches!(e, TradeEvent::DipBuy { .. }))
        .expect("dip buy on the third day");
    match dip {
        TradeEvent::DipBuy {
            shares,
            price,
            trigger_price,
            recent_high,
            ..
        } => {
            assert_eq!(*shares, 142);
            assert_eq!(*price, dec!(280));
            assert_eq!(*trigger_price, dec!(285.2));
            assert_eq!(*recent_high, dec!(310));
        }
        _ => unreachable!(),
    }
    assert_eq!(report.days[2].ledger.shares, 542);

    // No dip on the way up.
    assert!(!report.days[1]
        .events
        .iter()
        .any(|e| matches!(e, TradeEvent::DipBuy { .. })));
    assert_eq!(report.metrics.dip_buys, 1);
}

#[test]
fn withdrawal_borrows_the_shortfall() {
    let config = SimulationConfig {
        initial_balance: dec!(100000),
        ..Default::default()
    };
    let mut ledger = ledger_at(&config, dec!(300));
    ledger.buy_shares(300, dec!(300), BuyReason::Initial).unwrap();
    assert_eq!(ledger.cash(), dec!(9998.50));

    let event = ledger.apply_withdrawal(dec!(12000));
    assert_eq!(
        event,
        TradeEvent::Withdrawal {
            requested: dec!(12000),
            withdrawn: dec!(12000),
            borrowed: dec!(2001.50),
            status: WithdrawalStatus::Full,
        }
    );
    assert_eq!(ledger.cash(), dec!(-2001.50));
    assert_eq!(ledger.margin_used(), dec!(2001.50));
    assert!(ledger.check_invariants().is_ok());

    // 2001.50 * 0.06 * 30 / 365
    match ledger.accrue_interest(30) {
        Some(TradeEvent::InterestAccrual { amount, days, .. }) => {
            assert_eq!(amount, dec!(9.87));
            assert_eq!(days, 30);
        }
        other => panic!("expected interest accrual, got {other:?}"),
    }
    assert_eq!(ledger.interest_paid(), dec!(9.87));
}

#[test]
fn withdrawal_capped_at_margin_headroom() {
    let config = SimulationConfig {
        initial_balance: dec!(100000),
        max_margin_ratio: 0.5,
        ..Default::default()
    };
    let mut ledger = ledger_at(&config, dec!(300));
    ledger.buy_shares(300, dec!(300), BuyReason::Initial).unwrap();

    match ledger.apply_withdrawal(dec!(60000)) {
        TradeEvent::Withdrawal {
            withdrawn, status, ..
        } => {
            assert_eq!(status, WithdrawalStatus::Partial);
            assert!(withdrawn < dec!(60000) && withdrawn > Decimal::ZERO);
        }
        other => panic!("unexpected {other:?}"),
    }
    let margin = ledger.margin_used();
    assert!(margin <= dec!(0.5) * ledger.equity());
}

#[test]
fn assignment_delivers_shares_at_strike() {
    let config = SimulationConfig {
        initial_balance: dec!(100000),
        ..Default::default()
    };
    let mut ledger = ledger_at(&config, dec!(300));
    ledger.buy_shares(300, dec!(300), BuyReason::Initial).unwrap();

    let contract = OptionContract::new("SPY", date(1, 5), dec!(305), OptionType::Call);
    let leg_id = match ledger.write_call(contract, 3, dec!(2.50)).unwrap() {
        TradeEvent::Write {
            leg_id,
            credit,
            commission,
            ..
        } => {
            assert_eq!(commission, dec!(1.95));
            assert_eq!(credit, dec!(748.05));
            leg_id
        }
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(ledger.coverage_capacity(), 0);
    let cash_before = ledger.cash();

    ledger.mark(date(1, 5), dec!(320), 0.2);
    let event = ledger.close_or_assign(leg_id, None).unwrap();
    match &event {
        TradeEvent::Assign {
            shares_delivered,
            proceeds,
            total_cost,
            ..
        } => {
            assert_eq!(*shares_delivered, 300);
            assert_eq!(*proceeds, dec!(91500));
            assert_eq!(*total_cost, dec!(4500));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(event.to_string().contains("assigned"));
    assert_eq!(ledger.shares(), 0);
    assert_eq!(ledger.cash(), cash_before + dec!(91500));
    assert!(ledger.open_legs().is_empty());
}

#[test]
fn out_of_the_money_leg_expires() {
    let config = SimulationConfig::default();
    let mut ledger = ledger_at(&config, dec!(300));
    ledger.buy_shares(100, dec!(300), BuyReason::Initial).unwrap();
    let contract = OptionContract::new("SPY", date(1, 5), dec!(310), OptionType::Call);
    let write = ledger.write_call(contract, 1, dec!(1.20)).unwrap();
    let TradeEvent::Write { leg_id, .. } = write else {
        panic!("expected write");
    };

    ledger.mark(date(1, 5), dec!(305), 0.2);
    let event = ledger.close_or_assign(leg_id, None).unwrap();
    assert!(matches!(event, TradeEvent::Close { .. }));
    assert_eq!(ledger.shares(), 100);
}

#[test]
fn uncovered_write_is_refused() {
    let config = SimulationConfig::default();
    let mut ledger = ledger_at(&config, dec!(300));
    ledger.buy_shares(250, dec!(300), BuyReason::Initial).unwrap();

    let contract = OptionContract::new("SPY", date(1, 5), dec!(305), OptionType::Call);
    let err = ledger.write_call(contract, 3, dec!(2)).unwrap_err();
    assert_eq!(err.reason(), "uncovered_write");
    assert_eq!(ledger.open_contracts(), 0);
}

#[test]
fn full_run_over_dataset() {
    let config = SimulationConfig {
        initial_balance: dec!(200000),
        monthly_withdrawal: dec!(3000),
        ..Default::default()
    };
    let closes = [
        (1, 2, 300),
        (1, 3, 302),
        (1, 4, 299),
        (1, 5, 301),
        (1, 8, 303),
        (1, 9, 306),
        (1, 10, 304),
        (1, 11, 300),
        (1, 12, 298),
        (1, 16, 297),
        (2, 1, 305),
        (2, 2, 309),
    ];
    let days: Vec<TradingDay> = closes
        .iter()
        .map(|&(m, d, c)| day(m, d, Decimal::from(c)))
        .collect();
    let dataset = MarketDataset::from_days("SPY", days);

    let report = run_simulation(&config, &dataset).unwrap();
    assert_eq!(report.daily.len(), 12);
    assert!(report.metrics.calls_written >= 1);

    let feb = &report.days[10];
    assert!(feb.events.iter().any(|e| matches!(
        e,
        TradeEvent::Withdrawal {
            status: WithdrawalStatus::Full,
            ..
        }
    )));
    assert_eq!(report.metrics.total_withdrawn, dec!(3000));

    // Output keys are ISO dates in order.
    let keys: Vec<&String> = report.daily.keys().collect();
    assert_eq!(keys.first().map(|k| k.as_str()), Some("2024-01-02"));
    assert_eq!(keys.last().map(|k| k.as_str()), Some("2024-02-02"));

    let json: serde_json::Value = serde_json::from_str(&report.daily_json().unwrap()).unwrap();
    let first = &json["2024-01-02"];
    for field in [
        "Portfolio_Value",
        "spy_value",
        "Margin_Ratio",
        "Cash_Balance",
        "Premiums_Received",
        "Interest_Paid",
        "Trading_Log",
    ] {
        assert!(first.get(field).is_some(), "missing {field}");
    }
}
