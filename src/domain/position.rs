//! Position state and weighted-average cost-basis math.
//!
//! `apply_trade` is the only way position state changes. It is pure: it
//! takes the current open position (if any) and one fill, and returns the
//! resulting transition for the caller to persist.
//!
//! Rules:
//! - increasing (same direction, or opening from flat):
//!   `entry = (entry × |qty| + price × q) / (|qty| + q)`
//! - reducing (opposite direction, `q ≤ |qty|`): entry unchanged,
//!   `realized += (price − entry) × q × sign(qty)`
//! - flipping (opposite direction, `q > |qty|`): full close at the old
//!   entry, then a fresh open of the excess at the trade price
//! - a fill whose trade ID is the open position's `last_trade_id` is
//!   already applied and changes nothing

use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::PositionError;
use super::trade::{AccountId, OrderAction, Symbol, TradeId};

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    fn from_sign(sign: Decimal) -> Self {
        if sign.is_sign_negative() {
            Self::Short
        } else {
            Self::Long
        }
    }
}

/// Open/closed lifecycle flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Running per-account, per-symbol position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Internal position ID.
    pub id: Uuid,
    pub account: AccountId,
    pub symbol: Symbol,
    pub side: PositionSide,
    /// Signed quantity: positive = long, negative = short, zero once closed.
    pub quantity: Decimal,
    /// Weighted-average entry price.
    pub entry_price: Decimal,
    /// Realized PnL computed from entry/exit prices.
    pub realized_pnl: Decimal,
    /// Realized PnL as reported by the exchange, for drift checks.
    pub reported_pnl: Decimal,
    /// Cumulative commission.
    pub fees: Decimal,
    pub status: PositionStatus,
    pub opened_at_ms: i64,
    pub updated_at_ms: i64,
    pub closed_at_ms: Option<i64>,
    /// Last exchange trade folded into this position.
    pub last_trade_id: TradeId,
    /// Number of fills folded into this position.
    pub trade_count: u32,
}

impl Position {
    fn open(trade: &PositionTrade, signed_qty: Decimal, fee: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            account: trade.account.clone(),
            symbol: trade.symbol.clone(),
            side: PositionSide::from_sign(signed_qty),
            quantity: signed_qty,
            entry_price: trade.price,
            realized_pnl: Decimal::ZERO,
            reported_pnl: Decimal::ZERO,
            fees: fee,
            status: PositionStatus::Open,
            opened_at_ms: trade.executed_at_ms,
            updated_at_ms: trade.executed_at_ms,
            closed_at_ms: None,
            last_trade_id: trade.trade_id.clone(),
            trade_count: 1,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Absolute quantity.
    pub fn size(&self) -> Decimal {
        self.quantity.abs()
    }

    fn touch(&mut self, trade: &PositionTrade) {
        self.updated_at_ms = trade.executed_at_ms;
        self.last_trade_id = trade.trade_id.clone();
        self.trade_count += 1;
    }
}

/// One fill, as the position math sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionTrade {
    pub account: AccountId,
    pub symbol: Symbol,
    pub action: OrderAction,
    /// Executed quantity (positive).
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    /// Realized PnL reported by the exchange.
    pub reported_pnl: Decimal,
    pub executed_at_ms: i64,
    pub trade_id: TradeId,
}

/// Result of folding one fill into position state.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionChange {
    /// A new position was opened from flat.
    Opened(Position),
    /// Same-direction fill; entry price re-averaged.
    Increased(Position),
    /// Opposite-direction fill smaller than the position.
    Reduced { position: Position, realized: Decimal },
    /// Opposite-direction fill equal to the position.
    Closed { position: Position, realized: Decimal },
    /// Opposite-direction fill larger than the position.
    Flipped {
        closed: Position,
        opened: Position,
        realized: Decimal,
    },
    /// Nothing to apply (e.g. a close with no matching open position).
    Ignored { reason: &'static str },
}

impl PositionChange {
    /// Positions that must be persisted for this change.
    pub fn touched(&self) -> Vec<&Position> {
        match self {
            Self::Opened(p) | Self::Increased(p) => vec![p],
            Self::Reduced { position, .. } | Self::Closed { position, .. } => {
                vec![position]
            }
            Self::Flipped { closed, opened, .. } => vec![closed, opened],
            Self::Ignored { .. } => Vec::new(),
        }
    }

    /// Realized PnL produced by this change.
    pub fn realized(&self) -> Decimal {
        match self {
            Self::Reduced { realized, .. }
            | Self::Closed { realized, .. }
            | Self::Flipped { realized, .. } => *realized,
            _ => Decimal::ZERO,
        }
    }
}

/// Fold one fill into the current open position.
///
/// # Errors
/// Returns `PositionError::InvalidTrade` for non-positive quantity or price.
pub fn apply_trade(
    current: Option<&Position>,
    trade: &PositionTrade,
) -> Result<PositionChange, PositionError> {
    if trade.quantity <= Decimal::ZERO {
        return Err(PositionError::InvalidTrade {
            trade_id: trade.trade_id.clone(),
            reason: format!("quantity must be positive, got {}", trade.quantity),
        });
    }
    if trade.price <= Decimal::ZERO {
        return Err(PositionError::InvalidTrade {
            trade_id: trade.trade_id.clone(),
            reason: format!("price must be positive, got {}", trade.price),
        });
    }

    let direction = trade.action.side().sign();

    let Some(current) = current.filter(|p| p.is_open() && !p.quantity.is_zero()) else {
        if trade.action.is_close() {
            return Ok(PositionChange::Ignored {
                reason: "no open position to close",
            });
        }
        let mut opened = Position::open(trade, trade.quantity * direction, trade.fee);
        opened.reported_pnl = trade.reported_pnl;
        return Ok(PositionChange::Opened(opened));
    };

    // A retried cycle can refetch the fill that last touched this position.
    if current.last_trade_id == trade.trade_id {
        return Ok(PositionChange::Ignored {
            reason: "fill already applied to the open position",
        });
    }

    let position_sign = current.quantity.signum();
    let held = current.quantity.abs();

    if direction == position_sign {
        if trade.action.is_close() {
            return Ok(PositionChange::Ignored {
                reason: "close action in the direction of the open position",
            });
        }
        let mut next = current.clone();
        let total = held + trade.quantity;
        next.entry_price = (current.entry_price * held + trade.price * trade.quantity) / total;
        next.quantity = total * position_sign;
        next.fees += trade.fee;
        next.reported_pnl += trade.reported_pnl;
        next.touch(trade);
        return Ok(PositionChange::Increased(next));
    }

    let closing_qty = trade.quantity.min(held);
    let realized = (trade.price - current.entry_price) * closing_qty * position_sign;

    if trade.quantity < held {
        let mut next = current.clone();
        next.quantity = (held - trade.quantity) * position_sign;
        next.realized_pnl += realized;
        next.reported_pnl += trade.reported_pnl;
        next.fees += trade.fee;
        next.touch(trade);
        return Ok(PositionChange::Reduced {
            position: next,
            realized,
        });
    }

    let excess = trade.quantity - held;
    let closing_fee = if excess.is_zero() {
        trade.fee
    } else {
        trade.fee * closing_qty / trade.quantity
    };

    let mut closed = current.clone();
    closed.quantity = Decimal::ZERO;
    closed.realized_pnl += realized;
    closed.reported_pnl += trade.reported_pnl;
    closed.fees += closing_fee;
    closed.status = PositionStatus::Closed;
    closed.closed_at_ms = Some(trade.executed_at_ms);
    closed.touch(trade);

    if excess.is_zero() {
        return Ok(PositionChange::Closed {
            position: closed,
            realized,
        });
    }

    let opened = Position::open(trade, excess * direction, trade.fee - closing_fee);
    Ok(PositionChange::Flipped {
        closed,
        opened,
        realized,
    })
}
