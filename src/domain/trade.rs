//! Core trade domain types.
//!
//! Canonical, exchange-agnostic shapes produced by exchange collaborators
//! (`TradeRecord`) and owned by the persistence layer once ingested
//! (`OrderRecord`, `Fill`). Everything here is pure data: no I/O, no clock
//! reads except in the explicit constructors that stamp ingestion time.

use std::cmp::Ordering;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ────────────────────────────────────────────
// Type aliases consumed by ports and adapters
// ────────────────────────────────────────────

/// Exchange account identifier (UUID string of the configured account).
pub type AccountId = String;

/// Canonical, exchange-agnostic symbol (e.g. `BTCUSDT`).
pub type Symbol = String;

/// Exchange-assigned trade identifier.
pub type TradeId = String;

// ────────────────────────────────────────────
// Enums shared across domain and ports
// ────────────────────────────────────────────

/// Trade side as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order-action classification of a fill.
///
/// `Open*` covers both opening from flat and increasing an existing
/// position; `Close*` covers decreasing and fully closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
}

impl OrderAction {
    /// Infer the action from side and realized PnL when the collaborator
    /// did not classify the fill. A non-zero realized PnL means the fill
    /// closed exposure.
    pub fn infer(side: TradeSide, realized_pnl: Decimal) -> Self {
        let is_close = !realized_pnl.is_zero();
        match (side, is_close) {
            (TradeSide::Buy, true) => Self::CloseShort,
            (TradeSide::Buy, false) => Self::OpenLong,
            (TradeSide::Sell, true) => Self::CloseLong,
            (TradeSide::Sell, false) => Self::OpenShort,
        }
    }

    /// Direction of the fill in position terms.
    pub fn side(self) -> TradeSide {
        match self {
            Self::OpenLong | Self::CloseShort => TradeSide::Buy,
            Self::OpenShort | Self::CloseLong => TradeSide::Sell,
        }
    }

    pub fn is_close(self) -> bool {
        matches!(self, Self::CloseLong | Self::CloseShort)
    }
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::OpenLong => "open_long",
            Self::OpenShort => "open_short",
            Self::CloseLong => "close_long",
            Self::CloseShort => "close_short",
        };
        f.write_str(s)
    }
}

/// Order type recorded for synced fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Lifecycle status of an order record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Filled,
    Cancelled,
    Rejected,
}

// ────────────────────────────────────────────
// Collaborator boundary
// ────────────────────────────────────────────

/// One executed fill as reported by an exchange collaborator.
///
/// (account, `trade_id`) is the natural key: the same trade must never
/// be ingested twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Exchange-assigned trade ID, unique per exchange account.
    pub trade_id: TradeId,
    /// Exchange order ID, when the exchange reports it.
    #[serde(default)]
    pub order_id: Option<String>,
    /// Canonical symbol.
    pub symbol: Symbol,
    /// Buy or sell.
    pub side: TradeSide,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity (always positive).
    pub quantity: Decimal,
    /// Realized PnL reported by the exchange (0 for opening fills).
    #[serde(default)]
    pub realized_pnl: Decimal,
    /// Commission paid.
    #[serde(default)]
    pub fee: Decimal,
    /// Commission currency, when reported.
    #[serde(default)]
    pub fee_asset: Option<String>,
    /// Execution time, UTC milliseconds.
    pub executed_at_ms: i64,
    /// Collaborator-derived action classification.
    #[serde(default)]
    pub action: Option<OrderAction>,
}

impl TradeRecord {
    /// The collaborator's classification, or an inferred one.
    pub fn resolved_action(&self) -> OrderAction {
        self.action
            .unwrap_or_else(|| OrderAction::infer(self.side, self.realized_pnl))
    }

    /// Execution time as a UTC timestamp.
    pub fn executed_at(&self) -> DateTime<Utc> {
        ms_to_datetime(self.executed_at_ms)
    }
}

// ────────────────────────────────────────────
// Persisted records
// ────────────────────────────────────────────

/// Internal order record created for each ingested fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Internal order ID.
    pub id: Uuid,
    /// Owning exchange account.
    pub account: AccountId,
    /// Exchange order ID (falls back to the trade ID).
    pub exchange_order_id: String,
    pub symbol: Symbol,
    pub side: TradeSide,
    pub action: OrderAction,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    /// Fill time, UTC milliseconds.
    pub filled_at_ms: i64,
}

impl OrderRecord {
    /// Build the filled market-order record for a synced trade.
    pub fn from_trade(account: &str, trade: &TradeRecord, symbol: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            account: account.to_string(),
            exchange_order_id: trade
                .order_id
                .clone()
                .unwrap_or_else(|| trade.trade_id.clone()),
            symbol: symbol.to_string(),
            side: trade.side,
            action: trade.resolved_action(),
            order_type: OrderType::Market,
            status: OrderStatus::Filled,
            quantity: trade.quantity,
            price: trade.price,
            fee: trade.fee,
            filled_at_ms: trade.executed_at_ms,
        }
    }
}

/// Persisted, enriched form of a `TradeRecord`. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// Internal fill ID.
    pub id: Uuid,
    /// Owning exchange account.
    pub account: AccountId,
    /// Internal order reference.
    pub order_id: Uuid,
    /// Exchange trade ID (natural key together with `account`).
    pub exchange_trade_id: TradeId,
    pub symbol: Symbol,
    pub side: TradeSide,
    pub action: OrderAction,
    pub price: Decimal,
    pub quantity: Decimal,
    /// price × quantity
    pub quote_quantity: Decimal,
    pub fee: Decimal,
    /// Commission currency.
    pub commission_asset: String,
    pub realized_pnl: Decimal,
    /// Execution time, UTC milliseconds.
    pub executed_at_ms: i64,
    /// When this fill was ingested, UTC milliseconds.
    pub ingested_at_ms: i64,
}

impl Fill {
    /// Build the fill for a synced trade, stamped with the ingestion time.
    pub fn from_trade(
        order: &OrderRecord,
        trade: &TradeRecord,
        default_commission_asset: &str,
        ingested_at_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account: order.account.clone(),
            order_id: order.id,
            exchange_trade_id: trade.trade_id.clone(),
            symbol: order.symbol.clone(),
            side: trade.side,
            action: order.action,
            price: trade.price,
            quantity: trade.quantity,
            quote_quantity: trade.price * trade.quantity,
            fee: trade.fee,
            commission_asset: trade
                .fee_asset
                .clone()
                .unwrap_or_else(|| default_commission_asset.to_string()),
            realized_pnl: trade.realized_pnl,
            executed_at_ms: trade.executed_at_ms,
            ingested_at_ms,
        }
    }
}

// ────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────

/// Canonicalize an exchange symbol: upper-case, separators stripped.
///
/// `btc-usdt`, `BTC_USDT`, `BTC/USDT` and `BTC:USDT` all become `BTCUSDT`.
pub fn normalize_symbol(raw: &str) -> Symbol {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | '/' | ':'))
        .flat_map(char::to_uppercase)
        .collect()
}

/// Order trade IDs numerically when both parse, lexically otherwise.
pub fn compare_trade_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u128>(), b.parse::<u128>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

/// Convert UTC milliseconds to a timestamp (epoch on out-of-range input).
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
