use serde::{Deserialize, Serialize};

/// A trade represents a matched transaction between two orders.
///
/// - The price comes from the resting (passive) order, never the aggressor's limit
/// - Quantity is the amount filled
/// - `timestamp` is the logical clock tick of the command that produced the fill
///
/// Trades form an append-only ordered sequence; the log is the engine's
/// canonical output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub buy_order_id: u64,
    pub sell_order_id: u64,
    pub price: u64,
    pub quantity: u64,
    pub timestamp: u64,
}
