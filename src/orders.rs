use serde::{Deserialize, Serialize};

/// Represents which side of the market the order is on.
///
/// # Intuition
/// - `Buy` (Bid): The trader wants to purchase the asset. Buy orders are sorted from **highest to lowest price**
///   because a higher price means more willingness to buy — i.e., more aggressive.
/// - `Sell` (Ask): The trader wants to sell the asset. Sell orders are sorted from **lowest to highest price**
///   because a lower price means more willingness to sell — i.e., more aggressive.
///
/// This sorting ensures the matching engine always finds the **best price first**:
/// - Buyers match with the **lowest ask**
/// - Sellers match with the **highest bid**
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,  // Bid
    Sell, // Ask
}

impl Side {
    /// The side an incoming order matches against.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Specifies whether an order is a Limit or Market order.
///
/// - `Limit`: Executes at a specific price or better
/// - `Market`: Executes immediately at the best available price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Market,
}

/// An order accepted by the engine.
///
/// - `id` is assigned by the engine at acceptance and strictly increases
/// - `price` is in integer ticks and is ignored for market orders
/// - `quantity` is the *remaining* quantity; it shrinks as fills occur
/// - `timestamp` is the engine's logical clock at acceptance, informational only:
///   time priority within a price level is already given by queue position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub side: Side,
    pub kind: OrderKind,
    pub price: u64,
    pub quantity: u64,
    pub timestamp: u64,
}
