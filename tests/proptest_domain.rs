//! Property-Based Tests — Domain Layer Invariants
//!
//! Uses `proptest` to verify that position math, symbol handling and the
//! loss breaker maintain their invariants across random inputs.

use proptest::prelude::*;
use rust_decimal::Decimal;

use trade_sentinel::domain::position::{apply_trade, Position, PositionChange, PositionTrade};
use trade_sentinel::domain::trade::{compare_trade_ids, normalize_symbol, OrderAction};
use trade_sentinel::usecases::risk_breaker::{RiskBreaker, RiskLimits};

fn fill(action: OrderAction, qty: Decimal, price: Decimal, n: usize) -> PositionTrade {
    PositionTrade {
        account: "acct".to_string(),
        symbol: "BTCUSDT".to_string(),
        action,
        quantity: qty,
        price,
        fee: Decimal::ZERO,
        reported_pnl: Decimal::ZERO,
        executed_at_ms: 1_700_000_000_000 + n as i64,
        trade_id: n.to_string(),
    }
}

fn open_long(qty: Decimal, price: Decimal) -> Position {
    match apply_trade(None, &fill(OrderAction::OpenLong, qty, price, 0)) {
        Ok(PositionChange::Opened(p)) => p,
        other => panic!("expected Opened, got {other:?}"),
    }
}

fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1u32..100_000).prop_map(Decimal::from)
}

fn qty_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..100_000).prop_map(|q| Decimal::new(q, 3))
}

// ── Weighted-Average Entry ──────────────────────────────────

proptest! {
    /// Same-direction fills average to Σ(p·q) / Σq.
    #[test]
    fn entry_is_quantity_weighted_average(
        fills in prop::collection::vec((price_strategy(), qty_strategy()), 1..20),
    ) {
        let mut position: Option<Position> = None;
        for (n, (price, qty)) in fills.iter().enumerate() {
            let change = apply_trade(position.as_ref(), &fill(OrderAction::OpenLong, *qty, *price, n))
                .expect("valid fill");
            position = change.touched().into_iter().next().cloned();
        }

        let position = position.expect("position opened");
        let total_qty: Decimal = fills.iter().map(|(_, q)| *q).sum();
        let notional: Decimal = fills.iter().map(|(p, q)| *p * *q).sum();
        let expected = notional / total_qty;

        prop_assert_eq!(position.quantity, total_qty);
        prop_assert!(
            (position.entry_price - expected).abs() < Decimal::new(1, 6),
            "entry {} != weighted average {}", position.entry_price, expected
        );

        let min = fills.iter().map(|(p, _)| *p).min().expect("non-empty");
        let max = fills.iter().map(|(p, _)| *p).max().expect("non-empty");
        prop_assert!(position.entry_price >= min - Decimal::new(1, 6));
        prop_assert!(position.entry_price <= max + Decimal::new(1, 6));
    }

    /// Partial reductions keep the entry price and realize (exit − entry)·q.
    #[test]
    fn reduce_keeps_entry_and_realizes_difference(
        entry in price_strategy(),
        exit in price_strategy(),
        held in 2i64..100_000,
        cut in 1i64..100_000,
    ) {
        let held = Decimal::new(held, 3);
        let cut = Decimal::new(cut, 3).min(held - Decimal::new(1, 3));
        prop_assume!(cut > Decimal::ZERO);

        let position = open_long(held, entry);
        let change = apply_trade(Some(&position), &fill(OrderAction::CloseLong, cut, exit, 1))
            .expect("valid fill");

        match change {
            PositionChange::Reduced { position: next, realized } => {
                prop_assert_eq!(next.entry_price, entry);
                prop_assert_eq!(next.quantity, held - cut);
                prop_assert_eq!(realized, (exit - entry) * cut);
            }
            other => prop_assert!(false, "expected Reduced, got {:?}", other),
        }
    }

    /// Oversized opposite fills close at the old entry and open the excess
    /// at the fill price.
    #[test]
    fn flip_closes_then_opens_excess(
        entry in price_strategy(),
        exit in price_strategy(),
        held in qty_strategy(),
        excess in qty_strategy(),
    ) {
        let position = open_long(held, entry);
        let change = apply_trade(
            Some(&position),
            &fill(OrderAction::OpenShort, held + excess, exit, 1),
        )
        .expect("valid fill");

        match change {
            PositionChange::Flipped { closed, opened, realized } => {
                prop_assert!(!closed.is_open());
                prop_assert_eq!(closed.quantity, Decimal::ZERO);
                prop_assert_eq!(realized, (exit - entry) * held);
                prop_assert_eq!(opened.quantity, -excess);
                prop_assert_eq!(opened.entry_price, exit);
                prop_assert_ne!(opened.id, closed.id);
            }
            other => prop_assert!(false, "expected Flipped, got {:?}", other),
        }
    }
}

// ── Symbols and Trade IDs ───────────────────────────────────

proptest! {
    /// Normalizing twice changes nothing.
    #[test]
    fn normalize_symbol_is_idempotent(raw in "[a-zA-Z0-9_/:-]{0,16}") {
        let once = normalize_symbol(&raw);
        prop_assert_eq!(normalize_symbol(&once), once.clone());
        prop_assert!(!once.contains(['-', '_', '/', ':']));
    }

    /// Numeric trade IDs order like the numbers they encode.
    #[test]
    fn numeric_trade_ids_order_numerically(a in any::<u64>(), b in any::<u64>()) {
        prop_assert_eq!(compare_trade_ids(&a.to_string(), &b.to_string()), a.cmp(&b));
    }
}

// ── Risk Breaker ────────────────────────────────────────────

proptest! {
    /// Once tripped, no sequence of outcomes clears the breaker.
    #[test]
    fn tripped_breaker_is_sticky(
        outcomes in prop::collection::vec((any::<bool>(), -5.0f64..50.0), 0..30),
    ) {
        let limits = RiskLimits {
            max_consecutive_losses: 2,
            ..RiskLimits::default()
        };
        let breaker = RiskBreaker::new(limits, 1_000.0);

        tokio_test::block_on(async {
            breaker.update_after_trade(false, -0.1, 999.0).await;
            breaker.update_after_trade(false, -0.1, 998.0).await;
            assert!(breaker.is_tripped().await);

            let mut value = 998.0;
            for (win, pct) in &outcomes {
                value *= 1.0 + pct / 100.0;
                breaker.update_after_trade(*win, *pct, value).await;
            }

            let (allowed, reason) = breaker.can_trade().await;
            assert!(!allowed);
            assert!(reason.starts_with("consecutive_loss"));
            assert_eq!(breaker.status().await.total_trades, 2);
        });
    }
}
