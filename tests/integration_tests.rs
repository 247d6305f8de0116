//! Integration tests for component interactions.
//!
//! These tests drive the risk crates together the way the coordinator does.

use chrono::{DateTime, Duration, TimeZone, Utc};
use leverage_core::config::{
    CircuitBreakerConfig, CombinationRule, RegimeTable, SymbolOverride, TrailingMode,
};
use leverage_core::types::{
    DecisionOutcome, Factor, LiquidityTier, MarketRegime, MarketTick, PartialExit, Position, Side, SignalSnapshot, Timeframe,
    TrendAlignment, TrendStrength, VolatilityTier,
};
use leverage_core::RiskProfile;
use risk_manager::{
    BreakerEvent, CircuitBreakerMonitor, LeverageSafetyController, RiskAdjustmentEngine, SafetyInput,
    TradeResult, TrailingStopState, TripReason,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use trading_engine::{
    AccountState, EntryDecision, EntryPlan, EntryRequest, Instruction, MemoryInstructionSink, RiskCoordinator,
    TradeIntent,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
}

fn entry(signal: SignalSnapshot, price: Decimal) -> EntryRequest {
    let at = signal.timestamp;
    EntryRequest {
        tick: MarketTick::new(signal.symbol.clone(), price, at),
        signal,
        intent: TradeIntent {
            side: Side::Long,
            confidence: dec!(0.9),
        },
        account: AccountState {
            balance: dec!(10000),
            current_leverage: None,
        },
    }
}

fn opened(decision: EntryDecision) -> EntryPlan {
    match decision {
        EntryDecision::Opened(plan) => plan,
        other => panic!("expected Opened, got {other:?}"),
    }
}

fn trade(pnl_pct: Decimal, at: DateTime<Utc>) -> TradeResult {
    TradeResult {
        symbol: "BTCUSDT".to_string(),
        pnl: pnl_pct * dec!(100),
        pnl_pct,
        closed_at: at,
    }
}

/// Extreme volatility in a volatile regime is clamped up to the symbol's floor.
#[tokio::test]
async fn test_extreme_volatile_clamped_to_symbol_floor() {
    for rule in [CombinationRule::Multiplicative, CombinationRule::Additive] {
        let mut profile = RiskProfile::default();
        profile.adjustments.combination = rule;
        profile.symbol_specific_limits.insert(
            "SOLUSDT".to_string(),
            SymbolOverride {
                min_leverage: Some(dec!(3)),
                max_leverage: Some(dec!(15)),
                default_leverage: Some(dec!(5)),
                liquidity_tier: Some(LiquidityTier::Tier2),
                ..Default::default()
            },
        );
        let coordinator = RiskCoordinator::new(Arc::new(profile), Arc::new(MemoryInstructionSink::new()));

        let signal = SignalSnapshot::neutral("SOLUSDT", t0())
            .with_volatility(VolatilityTier::Extreme)
            .with_regime(MarketRegime::Volatile);
        let plan = opened(coordinator.evaluate_entry(entry(signal, dec!(150))).await.unwrap());

        assert_eq!(plan.decision.leverage, dec!(3), "rule {rule:?}");
        assert!(plan.decision.clamped);
        assert!(plan.decision.has_factor(&Factor::BoundsClamp));
        assert!(plan.decision.has_factor(&Factor::Volatility(VolatilityTier::Extreme)));
    }
}

/// Long at 50000, 0.5 % activation and 0.25 % callback over 50000 → 50300 → 50600 → 50500.
#[tokio::test]
async fn test_long_trailing_stop_follows_high_and_holds() {
    let mut profile = RiskProfile::default();
    profile.trailing.regimes = RegimeTable::uniform(TrailingMode::Percentage {
        activation_pct: dec!(0.5),
        callback_pct: dec!(0.25),
    });
    let sink = MemoryInstructionSink::new();
    let coordinator = RiskCoordinator::new(Arc::new(profile), Arc::new(sink.clone()));

    let signal = SignalSnapshot::neutral("BTCUSDT", t0()).with_regime(MarketRegime::Trending);
    let plan = opened(coordinator.evaluate_entry(entry(signal, dec!(50000))).await.unwrap());

    let mut stops = Vec::new();
    for (i, price) in [dec!(50000), dec!(50300), dec!(50600), dec!(50500)].into_iter().enumerate() {
        let tick = MarketTick::new("BTCUSDT", price, t0() + Duration::minutes(i as i64 + 1));
        let instructions = coordinator.on_tick(&tick).await;
        assert!(!instructions.iter().any(|i| matches!(i, Instruction::Close { .. })));
        stops.push(coordinator.positions().get_position(plan.position_id).unwrap().position.stop_loss);
    }

    // Initial 2 % stop, activation at 50300, trail from 50600, hold on retrace
    assert_eq!(stops, vec![dec!(49000), dec!(50174.25), dec!(50473.5), dec!(50473.5)]);

    let updates: Vec<Decimal> = sink
        .for_position(plan.position_id)
        .await
        .into_iter()
        .filter_map(|i| match i {
            Instruction::UpdateStop { stop_price, .. } => Some(stop_price),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec![dec!(50174.25), dec!(50473.5)]);

    let managed = coordinator.positions().get_position(plan.position_id).unwrap();
    let trailing = managed.trailing.unwrap();
    assert!(trailing.activated);
    assert_eq!(trailing.highest_favorable_price, dec!(50600));
}

/// Three losses pause trading on the streak alone; a win lifts the pause.
#[tokio::test]
async fn test_streak_pause_lifted_by_win() {
    let breaker = CircuitBreakerMonitor::new(CircuitBreakerConfig::default());
    let mut events = breaker.subscribe();

    for i in 0..3 {
        breaker
            .on_trade_closed(&trade(dec!(-0.5), t0() + Duration::minutes(i)))
            .await;
    }
    let state = breaker.snapshot("BTCUSDT").await;
    assert_eq!(state.consecutive_losses, 3);
    assert!(state.daily_loss_pct < breaker.config().daily_loss_threshold_pct);
    assert_eq!(state.trip_reason, Some(TripReason::ConsecutiveLosses));
    assert!(!breaker.check_allowed("BTCUSDT", t0() + Duration::minutes(5)).await);
    assert!(matches!(events.try_recv(), Ok(BreakerEvent::PauseStarted { .. })));

    let lifted = breaker
        .on_trade_closed(&trade(dec!(0.8), t0() + Duration::minutes(10)))
        .await;
    assert!(matches!(lifted.as_slice(), [BreakerEvent::PauseLifted { .. }]));
    assert_eq!(breaker.snapshot("BTCUSDT").await.consecutive_losses, 0);
    assert!(breaker.check_allowed("BTCUSDT", t0() + Duration::minutes(11)).await);
    assert_eq!(breaker.size_factor("BTCUSDT").await, Decimal::ONE);
}

/// The pause survives until its window elapses when no reset applies.
#[tokio::test]
async fn test_pause_holds_until_expiry_or_reset() {
    let config = CircuitBreakerConfig {
        reset_after_profitable_trade: false,
        ..Default::default()
    };
    let breaker = CircuitBreakerMonitor::new(config);
    for i in 0..3 {
        breaker
            .on_trade_closed(&trade(dec!(-0.5), t0() + Duration::minutes(i)))
            .await;
    }
    let tripped_at = t0() + Duration::minutes(2);
    let pause = Duration::minutes(breaker.config().pause_duration_minutes);

    // A win without reset does not lift the pause
    breaker
        .on_trade_closed(&trade(dec!(1), tripped_at + Duration::minutes(1)))
        .await;
    for offset in [1, 30, 59] {
        assert!(!breaker.check_allowed("BTCUSDT", tripped_at + Duration::minutes(offset)).await);
    }
    assert!(breaker.check_allowed("BTCUSDT", tripped_at + pause).await);

    breaker.manual_trip("BTCUSDT", "operator", tripped_at + pause).await;
    assert!(!breaker.check_allowed("BTCUSDT", tripped_at + pause).await);
    breaker.reset("BTCUSDT").await;
    assert!(breaker.check_allowed("BTCUSDT", tripped_at + pause).await);
}

fn snapshot_grid() -> Vec<SignalSnapshot> {
    let mut grid = Vec::new();
    for volatility in [
        VolatilityTier::Low,
        VolatilityTier::Normal,
        VolatilityTier::High,
        VolatilityTier::Extreme,
    ] {
        for strength in [TrendStrength::Weak, TrendStrength::Strong, TrendStrength::VeryStrong] {
            for alignment in [TrendAlignment::With, TrendAlignment::Against, TrendAlignment::Sideways] {
                for regime in MarketRegime::ALL {
                    for tier in [LiquidityTier::Tier1, LiquidityTier::Tier2, LiquidityTier::Tier3] {
                        for exposure in [dec!(0), dec!(60), dec!(150), dec!(250)] {
                            for streak in [-3, 0, 3, 6] {
                                grid.push(
                                    SignalSnapshot::neutral("BTCUSDT", t0())
                                        .with_volatility(volatility)
                                        .with_trend(strength, alignment)
                                        .with_regime(regime)
                                        .with_liquidity_tier(tier)
                                        .with_exposure(exposure)
                                        .with_streak(streak),
                                );
                            }
                        }
                    }
                }
            }
        }
    }
    grid
}

#[tokio::test]
async fn test_leverage_bounded_across_grid() {
    let engine = RiskAdjustmentEngine::new();

    for rule in [CombinationRule::Multiplicative, CombinationRule::Additive] {
        let mut profile = RiskProfile::default();
        profile.adjustments.combination = rule;

        for snapshot in snapshot_grid() {
            let adjustment = engine.compute(&snapshot, &profile);
            let bounds = adjustment.limits.bounds;
            let safety = LeverageSafetyController::new(profile.safety.clone());
            let decision = safety
                .apply(
                    SafetyInput {
                        symbol: snapshot.symbol.clone(),
                        raw_leverage: adjustment.target_leverage,
                        previous_leverage: None,
                        risk_pct: adjustment.risk_pct,
                        drawdown_pct: snapshot.drawdown_pct,
                        bounds,
                        now: snapshot.timestamp,
                    },
                    adjustment.reasons,
                )
                .await;

            assert!(
                decision.leverage >= bounds.min_leverage && decision.leverage <= bounds.max_leverage,
                "{rule:?}: leverage {} outside [{}, {}]",
                decision.leverage,
                bounds.min_leverage,
                bounds.max_leverage
            );
            assert!(decision.risk_pct >= profile.risk.min_risk_percentage);
            assert!(decision.risk_pct <= profile.risk.max_risk_percentage);
        }
    }
}

#[test]
fn test_engine_is_deterministic() {
    let engine = RiskAdjustmentEngine::new();
    let profile = RiskProfile::default();
    for snapshot in snapshot_grid().into_iter().step_by(37) {
        assert_eq!(engine.compute(&snapshot, &profile), engine.compute(&snapshot, &profile));
    }
}

/// Oscillating path with drift in the position's favor.
fn oscillating_ticks(side: Side, entry: Decimal, count: i64) -> Vec<MarketTick> {
    (0..count)
        .map(|i| {
            let drift = entry * Decimal::from(i) / dec!(2000);
            let wobble = entry * Decimal::from((i * 7) % 11 - 5) / dec!(400);
            let price = side.offset_toward(entry, drift) + wobble;
            let atr = entry * Decimal::from(5 + (i % 4)) / dec!(1000);
            MarketTick::new("BTCUSDT", price, t0() + Duration::minutes(i))
                .with_sequence(i as u64 + 1)
                .with_atr(Timeframe::H1, atr)
                .with_atr(Timeframe::H4, atr * dec!(2))
        })
        .collect()
}

#[test]
fn test_trailing_stop_monotonic() {
    let profile = RiskProfile::default();

    for side in [Side::Long, Side::Short] {
        for regime in MarketRegime::ALL {
            let entry = dec!(50000);
            let position = Position::new(
                "BTCUSDT",
                side,
                entry,
                Decimal::ONE,
                side.offset_against(entry, dec!(10000)),
                side.offset_toward(entry, dec!(20000)),
                t0(),
            )
            .with_regime(regime);
            let mut state = TrailingStopState::for_position(&position, &profile.trailing);

            let mut previous: Option<Decimal> = None;
            for tick in oscillating_ticks(side, entry, 400) {
                state.on_tick(&position, &tick);
                if state.is_closed() {
                    break;
                }
                if let (Some(prev), Some(current)) = (previous, state.stop_price) {
                    match side {
                        Side::Long => assert!(current >= prev, "{regime} long: {current} < {prev}"),
                        Side::Short => assert!(current <= prev, "{regime} short: {current} > {prev}"),
                    }
                }
                if state.activated {
                    previous = state.stop_price;
                }
            }
        }
    }
}

#[test]
fn test_partial_ladder_fires_once_and_within_quantity() {
    let mut position = Position::new(
        "BTCUSDT",
        Side::Short,
        dec!(2000),
        dec!(3),
        dec!(2100),
        dec!(1500),
        t0(),
    )
    .with_partial_exits(vec![
        PartialExit {
            threshold_pct: dec!(1),
            size_fraction: dec!(0.4),
        },
        PartialExit {
            threshold_pct: dec!(2),
            size_fraction: dec!(0.35),
        },
        PartialExit {
            threshold_pct: dec!(4),
            size_fraction: dec!(0.25),
        },
    ]);

    // Down through every rung, back up, and down again
    let path = [
        dec!(1990),
        dec!(1975),
        dec!(1950),
        dec!(1990),
        dec!(2010),
        dec!(1960),
        dec!(1900),
        dec!(1850),
        dec!(1950),
        dec!(1800),
    ];
    for (i, price) in path.into_iter().enumerate() {
        position.take_partial_exits(price, t0() + Duration::minutes(i as i64));
    }

    let fills = &position.partial_exits_filled;
    assert_eq!(fills.len(), 3);
    let mut thresholds: Vec<Decimal> = fills.iter().map(|f| f.threshold_pct).collect();
    thresholds.dedup();
    assert_eq!(thresholds.len(), 3);

    let fraction: Decimal = fills.iter().map(|f| f.size_fraction).sum();
    assert!(fraction <= Decimal::ONE);
    let filled: Decimal = fills.iter().map(|f| f.quantity).sum();
    assert_eq!(filled, position.original_quantity);
    assert_eq!(position.quantity, Decimal::ZERO);
}

/// Ladder exhaustion through the coordinator finalizes the position.
#[tokio::test]
async fn test_ladder_completion_closes_position() {
    let mut profile = RiskProfile::default();
    profile.trailing.enabled = false;
    profile.stops.partial_take_profits = vec![
        leverage_core::config::PartialTakeProfit {
            threshold_pct: dec!(1),
            size_fraction: dec!(0.5),
        },
        leverage_core::config::PartialTakeProfit {
            threshold_pct: dec!(2),
            size_fraction: dec!(0.5),
        },
    ];
    let sink = MemoryInstructionSink::new();
    let coordinator = RiskCoordinator::new(Arc::new(profile), Arc::new(sink.clone()));

    let signal = SignalSnapshot::neutral("BTCUSDT", t0()).with_regime(MarketRegime::Ranging);
    let plan = opened(coordinator.evaluate_entry(entry(signal, dec!(50000))).await.unwrap());

    coordinator
        .on_tick(&MarketTick::new("BTCUSDT", dec!(51100), t0() + Duration::minutes(1)))
        .await;

    let managed = coordinator.positions().get_position(plan.position_id).unwrap();
    assert!(!managed.position.is_open());
    assert_eq!(
        managed.position.close_reason,
        Some(leverage_core::types::CloseReason::LadderComplete)
    );
    assert!(managed.position.realized_pnl > Decimal::ZERO);

    let partials = sink
        .instructions()
        .await
        .into_iter()
        .filter(|i| matches!(i, Instruction::PartialClose { .. }))
        .count();
    assert_eq!(partials, 2);
    assert_eq!(coordinator.breaker().snapshot("BTCUSDT").await.consecutive_losses, 0);
}

fn calm_signal(at: DateTime<Utc>) -> SignalSnapshot {
    SignalSnapshot::neutral("BTCUSDT", at)
        .with_volatility(VolatilityTier::Normal)
        .with_trend(TrendStrength::Weak, TrendAlignment::Sideways)
        .with_regime(MarketRegime::Quiet)
}

fn strong_signal(at: DateTime<Utc>) -> SignalSnapshot {
    SignalSnapshot::neutral("BTCUSDT", at)
        .with_volatility(VolatilityTier::Low)
        .with_trend(TrendStrength::VeryStrong, TrendAlignment::With)
        .with_regime(MarketRegime::Trending)
}

fn multi_entry_coordinator() -> (RiskCoordinator, MemoryInstructionSink) {
    let mut profile = RiskProfile::default();
    profile.entry.max_open_positions_per_symbol = 5;
    let sink = MemoryInstructionSink::new();
    let coordinator = RiskCoordinator::new(Arc::new(profile), Arc::new(sink.clone()));
    (coordinator, sink)
}

fn open_count(instructions: &[Instruction]) -> usize {
    instructions
        .iter()
        .filter(|i| matches!(i, Instruction::Open { .. }))
        .count()
}

/// A jump of more than 100 % from the applied leverage waits for an operator.
#[tokio::test]
async fn test_large_leverage_jump_waits_for_acknowledgement() {
    let (coordinator, sink) = multi_entry_coordinator();

    // 0.5 * 0.7 * 0.7 clamps to the 0.3 floor: 5 * 0.3 = 1.5x
    let weak = SignalSnapshot::neutral("BTCUSDT", t0())
        .with_volatility(VolatilityTier::Extreme)
        .with_trend(TrendStrength::Weak, TrendAlignment::Against)
        .with_regime(MarketRegime::Volatile);
    let first = opened(coordinator.evaluate_entry(entry(weak, dec!(50000))).await.unwrap());
    assert_eq!(first.decision.leverage, dec!(1.5));

    // Past the cooldown, so only the relative size of the change matters: 1.5x → 7.5x
    let later = t0() + Duration::minutes(30);
    let request = entry(strong_signal(later), dec!(50000));
    let pending = match coordinator.evaluate_entry(request.clone()).await.unwrap() {
        EntryDecision::AwaitingConfirmation(decision) => decision,
        other => panic!("expected AwaitingConfirmation, got {other:?}"),
    };
    assert_eq!(pending.leverage, dec!(7.5));
    assert!(pending.has_factor(&Factor::ManualConfirmation));
    assert_eq!(open_count(&sink.instructions().await), 1);
    assert_eq!(coordinator.positions().open_count_for_symbol("BTCUSDT"), 1);

    let applied = coordinator.acknowledge(&pending, later).await;
    assert_eq!(applied.outcome, DecisionOutcome::Applied);

    let second = opened(coordinator.evaluate_entry(request).await.unwrap());
    assert_eq!(second.decision.leverage, dec!(7.5));
    assert_eq!(open_count(&sink.instructions().await), 2);
    let instructions = sink.for_position(second.position_id).await;
    assert!(matches!(
        instructions.as_slice(),
        [Instruction::Open { leverage, .. }] if *leverage == dec!(7.5)
    ));
}

/// Inside the cooldown a new target moves at most one step from the applied leverage.
#[tokio::test]
async fn test_leverage_step_limited_inside_cooldown() {
    let (coordinator, _sink) = multi_entry_coordinator();

    let first = opened(coordinator.evaluate_entry(entry(calm_signal(t0()), dec!(50000))).await.unwrap());
    assert_eq!(first.decision.leverage, dec!(5));

    // Target 7.5x, step 2 → 7x
    let second = opened(
        coordinator
            .evaluate_entry(entry(strong_signal(t0() + Duration::minutes(5)), dec!(50000)))
            .await
            .unwrap(),
    );
    assert_eq!(second.decision.outcome, DecisionOutcome::RateLimited);
    assert_eq!(second.decision.leverage, dec!(7));
    assert!(second.decision.has_factor(&Factor::RateLimited));
}

/// A rapid drawdown forces the emergency cap even while the cooldown is running.
#[tokio::test]
async fn test_rapid_drawdown_deleverages_during_cooldown() {
    let (coordinator, _sink) = multi_entry_coordinator();
    let cap = coordinator.profile().safety.emergency_leverage_cap;
    let threshold = coordinator.profile().safety.rapid_drawdown_threshold_pct;

    let first = opened(coordinator.evaluate_entry(entry(calm_signal(t0()), dec!(50000))).await.unwrap());
    assert_eq!(first.decision.leverage, dec!(5));

    // 5 minutes in: the rate limit alone would only step down to 3x
    let stressed = strong_signal(t0() + Duration::minutes(5)).with_drawdown(threshold + dec!(1));
    let plan = opened(coordinator.evaluate_entry(entry(stressed, dec!(50000))).await.unwrap());

    assert_eq!(plan.decision.outcome, DecisionOutcome::EmergencyDeleveraged);
    assert_eq!(plan.decision.leverage, cap);
    assert!(plan.decision.has_factor(&Factor::EmergencyDeleverage));
    assert!(!plan.decision.has_factor(&Factor::RateLimited));
    assert_eq!(
        coordinator.safety().last_applied("BTCUSDT").await.map(|a| a.leverage),
        Some(cap)
    );
}
