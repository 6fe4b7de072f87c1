use crate::{
    errors::OrderError,
    index::OrderIndex,
    levels::{BookSide, DepthLevel, OrderNode},
    orders::{Order, OrderKind, Side},
    trade::Trade,
};
use serde::{Deserialize, Serialize};
use slab::Slab;
use tracing::{debug, info, warn};

/// Aggregate view of both sides of the book, best levels first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

/// Running totals since the engine was constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Orders accepted, whether they filled, rested or were discarded.
    pub orders_processed: u64,
    pub trades_executed: u64,
    /// Resting orders currently in the book, both sides combined.
    pub active_orders: usize,
}

/// Matches an **incoming order** against the passive side of the book,
/// appending a [`Trade`] to the log for every partial or full fill.
///
/// # Behavior
/// - Fills walk the passive side best price first, FIFO within each level.
/// - A limit order stops at the price gate: a buy never fills above its own
///   limit, a sell never below. Equality crosses.
/// - Market orders skip the gate and run until either side exhausts.
/// - Trades execute at the resting order's price, never the aggressor's.
///
/// Fully consumed resting orders are unlinked from their level and dropped
/// from the id index; a level whose queue empties is removed.
fn match_incoming(
    incoming: &mut Order,
    passive: &mut BookSide,
    arena: &mut Slab<OrderNode>,
    index: &mut OrderIndex,
    trades: &mut Vec<Trade>,
) {
    while incoming.quantity > 0 {
        let Some((best_price, head)) = passive.best() else {
            break;
        };
        if incoming.kind == OrderKind::Limit {
            let gated = match incoming.side {
                Side::Buy => incoming.price < best_price,
                Side::Sell => incoming.price > best_price,
            };
            if gated {
                break;
            }
        }

        let resting = &arena[head].order;
        let fill = incoming.quantity.min(resting.quantity);
        let (buy_order_id, sell_order_id) = match incoming.side {
            Side::Buy => (incoming.id, resting.id),
            Side::Sell => (resting.id, incoming.id),
        };
        trades.push(Trade {
            buy_order_id,
            sell_order_id,
            price: best_price,
            quantity: fill,
            timestamp: incoming.timestamp,
        });
        debug!(
            buy = buy_order_id,
            sell = sell_order_id,
            price = best_price,
            quantity = fill,
            "fill"
        );

        incoming.quantity -= fill;
        if let Some(filled_id) = passive.fill_head(arena, best_price, fill) {
            index.erase_filled(filled_id);
        }
    }
}

/// Single-instrument central limit order book matching engine.
///
/// The engine is a serial command processor: each [`add_order`] or
/// [`cancel_order`] call runs to completion before the next, and the trade
/// log order is a deterministic function of the command sequence. All state
/// (both book sides, the id index, the trade log) lives in this one object;
/// construct it empty and drop it on shutdown.
///
/// Prices are integer ticks. Callers pricing in dollars convert to a fixed
/// tick grid (e.g. cents) before submission so that price levels compare
/// exactly.
///
/// Not thread-safe - wrap in a lock for concurrent readers.
///
/// [`add_order`]: MatchingEngine::add_order
/// [`cancel_order`]: MatchingEngine::cancel_order
pub struct MatchingEngine {
    arena: Slab<OrderNode>,
    bids: BookSide,
    asks: BookSide,
    index: OrderIndex,
    trades: Vec<Trade>,
    next_order_id: u64,
    clock: u64,
    orders_processed: u64,
}

impl MatchingEngine {
    /// Creates a new, empty engine with no resting orders and no trades.
    pub fn new() -> Self {
        Self {
            arena: Slab::new(),
            bids: BookSide::new(Side::Buy),
            asks: BookSide::new(Side::Sell),
            index: OrderIndex::new(),
            trades: Vec::new(),
            next_order_id: 1,
            clock: 0,
            orders_processed: 0,
        }
    }

    /// Accepts a new order, matches it against the opposite side and returns
    /// the assigned order id.
    ///
    /// Trades produced while matching are appended to the trade log. A limit
    /// order with remaining quantity rests at the tail of its price level; a
    /// market order's remainder is discarded.
    ///
    /// # Errors
    /// - [`OrderError::InvalidQuantity`] if `quantity` is zero
    /// - [`OrderError::InvalidPrice`] if a limit order's `price` is zero
    ///
    /// Market orders ignore the `price` argument. A rejected order assigns
    /// no id and leaves the book untouched.
    pub fn add_order(
        &mut self,
        side: Side,
        kind: OrderKind,
        price: u64,
        quantity: u64,
    ) -> Result<u64, OrderError> {
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity);
        }
        if kind == OrderKind::Limit && price == 0 {
            return Err(OrderError::InvalidPrice);
        }

        self.clock += 1;
        self.orders_processed += 1;
        let id = self.next_order_id;
        self.next_order_id += 1;
        let mut incoming = Order {
            id,
            side,
            kind,
            price,
            quantity,
            timestamp: self.clock,
        };
        info!(id, ?side, ?kind, price, quantity, "order accepted");

        let passive = match side {
            Side::Buy => &mut self.asks,
            Side::Sell => &mut self.bids,
        };
        match_incoming(
            &mut incoming,
            passive,
            &mut self.arena,
            &mut self.index,
            &mut self.trades,
        );

        if incoming.quantity > 0 {
            match kind {
                OrderKind::Limit => {
                    let own = match side {
                        Side::Buy => &mut self.bids,
                        Side::Sell => &mut self.asks,
                    };
                    let key = own.push_tail(&mut self.arena, incoming);
                    self.index.register(id, key);
                }
                OrderKind::Market => {
                    warn!(
                        id,
                        remaining = incoming.quantity,
                        "market order unfilled, remainder discarded"
                    );
                }
            }
        }
        Ok(id)
    }

    /// Cancels a resting order, removing its remainder from the book.
    ///
    /// Returns `false` if the id is unknown, already fully filled or
    /// previously cancelled; the book is untouched and no trade is emitted
    /// either way.
    pub fn cancel_order(&mut self, order_id: u64) -> bool {
        let Some(key) = self.index.remove(order_id) else {
            debug!(order_id, "cancel for unknown or inactive order");
            return false;
        };
        let book_side = match self.arena[key].order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let order = book_side.remove(&mut self.arena, key);
        info!(order_id, remaining = order.quantity, "order cancelled");
        true
    }

    /// Highest resting buy price.
    pub fn best_bid(&self) -> Option<u64> {
        self.bids.best_price()
    }

    /// Lowest resting sell price.
    pub fn best_ask(&self) -> Option<u64> {
        self.asks.best_price()
    }

    /// Midpoint of best bid and best ask, in ticks. `None` while either side
    /// is empty.
    pub fn mid_price(&self) -> Option<f64> {
        Some((self.best_bid()? + self.best_ask()?) as f64 / 2.0)
    }

    /// Best ask minus best bid, in ticks. `None` while either side is empty.
    pub fn spread(&self) -> Option<u64> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    /// Aggregate depth for one side, from the best level outward, up to
    /// `levels` levels.
    pub fn depth(&self, side: Side, levels: usize) -> Vec<DepthLevel> {
        match side {
            Side::Buy => self.bids.depth(levels),
            Side::Sell => self.asks.depth(levels),
        }
    }

    /// Snapshot of both sides, up to `levels` levels each.
    pub fn snapshot(&self, levels: usize) -> BookSnapshot {
        BookSnapshot {
            bids: self.depth(Side::Buy, levels),
            asks: self.depth(Side::Sell, levels),
        }
    }

    /// The full trade log, in execution order.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// The last `n` trades, oldest first.
    pub fn recent_trades(&self, n: usize) -> &[Trade] {
        &self.trades[self.trades.len().saturating_sub(n)..]
    }

    /// A resting order by id. Fully filled and cancelled orders miss.
    pub fn get_order(&self, order_id: u64) -> Option<&Order> {
        self.index.get(order_id).map(|key| &self.arena[key].order)
    }

    /// Resting orders currently in the book, both sides combined.
    pub fn active_orders(&self) -> usize {
        self.index.len()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            orders_processed: self.orders_processed,
            trades_executed: self.trades.len() as u64,
            active_orders: self.index.len(),
        }
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new()
    }
}

//tests
#[cfg(test)]
mod tests {
    use super::*;

    fn limit(engine: &mut MatchingEngine, side: Side, price: u64, quantity: u64) -> u64 {
        engine
            .add_order(side, OrderKind::Limit, price, quantity)
            .unwrap()
    }

    fn market(engine: &mut MatchingEngine, side: Side, quantity: u64) -> u64 {
        engine
            .add_order(side, OrderKind::Market, 0, quantity)
            .unwrap()
    }

    /// Tests a market buy order that partially fills against multiple sell orders.
    #[test]
    fn test_partial_fill_market_buy() {
        let mut engine = MatchingEngine::new();

        let a1 = limit(&mut engine, Side::Sell, 101, 5);
        let a2 = limit(&mut engine, Side::Sell, 102, 3);

        let taker = market(&mut engine, Side::Buy, 6);
        let trades = engine.trades();

        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].quantity, 5);
        assert_eq!(trades[0].price, 101);
        assert_eq!(trades[0].sell_order_id, a1);
        assert_eq!(trades[0].buy_order_id, taker);
        assert_eq!(trades[1].quantity, 1);
        assert_eq!(trades[1].price, 102);

        assert_eq!(engine.get_order(a2).unwrap().quantity, 2);
        assert_eq!(engine.get_order(a1), None);
    }

    /// Tests a market sell order that partially fills against a smaller bid.
    #[test]
    fn test_partial_fill_market_sell() {
        let mut engine = MatchingEngine::new();

        let bid = limit(&mut engine, Side::Buy, 100, 4);

        market(&mut engine, Side::Sell, 10);
        let trades = engine.trades();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].quantity, 4);
        assert_eq!(trades[0].price, 100);
        assert_eq!(trades[0].buy_order_id, bid);
        assert_eq!(engine.best_bid(), None);
        assert_eq!(engine.active_orders(), 0);
    }

    /// Tests that a market order does not match when there is no liquidity.
    #[test]
    fn test_no_match_for_market_order() {
        let mut engine = MatchingEngine::new();

        let id = market(&mut engine, Side::Buy, 10);

        assert!(engine.trades().is_empty());
        assert_eq!(engine.best_ask(), None);
        // The remainder is discarded, never rested
        assert_eq!(engine.get_order(id), None);
    }

    /// Tests a market order that exactly matches an available quantity.
    #[test]
    fn test_exact_match_market_order() {
        let mut engine = MatchingEngine::new();

        limit(&mut engine, Side::Sell, 100, 5);
        market(&mut engine, Side::Buy, 5);

        assert_eq!(engine.trades().len(), 1);
        assert_eq!(engine.trades()[0].quantity, 5);
        assert_eq!(engine.best_ask(), None);
        assert_eq!(engine.active_orders(), 0);
    }

    /// Tests a limit buy order that partially fills and rests the remainder.
    #[test]
    fn test_limit_order_partial_match_and_remainder() {
        let mut engine = MatchingEngine::new();

        limit(&mut engine, Side::Sell, 100, 5);
        let id = limit(&mut engine, Side::Buy, 101, 10);

        assert_eq!(engine.trades().len(), 1);
        assert_eq!(engine.trades()[0].quantity, 5);
        assert_eq!(engine.trades()[0].price, 100);
        assert_eq!(engine.best_bid(), Some(101));
        assert_eq!(engine.get_order(id).unwrap().quantity, 5);
    }

    /// Tests a limit buy order that finds no match and gets added to the book.
    #[test]
    fn test_limit_order_no_match_goes_to_book() {
        let mut engine = MatchingEngine::new();

        let id = limit(&mut engine, Side::Buy, 90, 8);

        assert!(engine.trades().is_empty());
        assert_eq!(engine.best_bid(), Some(90));
        assert_eq!(engine.get_order(id).unwrap().quantity, 8);
    }

    /// Tests that FIFO order is respected for multiple orders at the same price.
    #[test]
    fn test_queue_fairness_fifo_fill_order() {
        let mut engine = MatchingEngine::new();

        let first = limit(&mut engine, Side::Sell, 100, 4);
        let second = limit(&mut engine, Side::Sell, 100, 6);

        market(&mut engine, Side::Buy, 9);
        let trades = engine.trades();

        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].sell_order_id, first);
        assert_eq!(trades[0].quantity, 4);
        assert_eq!(trades[1].sell_order_id, second);
        assert_eq!(trades[1].quantity, 5);

        assert_eq!(engine.get_order(second).unwrap().quantity, 1);
    }

    /// Tests that a limit buy above the ask price matches immediately (crossing).
    #[test]
    fn test_crossing_limit_buy_matches_instead_of_resting() {
        let mut engine = MatchingEngine::new();

        limit(&mut engine, Side::Sell, 105, 5);
        let id = limit(&mut engine, Side::Buy, 110, 3);

        let trades = engine.trades();
        assert_eq!(trades.len(), 1);
        // Executes at the resting price, not the aggressor's limit
        assert_eq!(trades[0].price, 105);
        assert_eq!(trades[0].quantity, 3);

        assert_eq!(engine.best_ask(), Some(105));
        assert_eq!(engine.best_bid(), None);
        assert_eq!(engine.get_order(id), None);
    }

    /// Tests that a limit sell below the bid price matches immediately (crossing).
    #[test]
    fn test_crossing_limit_sell_matches_instead_of_resting() {
        let mut engine = MatchingEngine::new();

        limit(&mut engine, Side::Buy, 100, 5);
        limit(&mut engine, Side::Sell, 90, 4);

        let trades = engine.trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, 100);
        assert_eq!(trades[0].quantity, 4);

        assert_eq!(engine.best_bid(), Some(100));
        assert_eq!(engine.best_ask(), None);
    }

    /// A limit priced exactly at the opposite best crosses; one tick inside rests.
    #[test]
    fn test_price_gate_is_inclusive() {
        let mut engine = MatchingEngine::new();

        limit(&mut engine, Side::Sell, 100, 5);
        limit(&mut engine, Side::Buy, 100, 5);
        assert_eq!(engine.trades().len(), 1);
        assert_eq!(engine.active_orders(), 0);

        limit(&mut engine, Side::Sell, 100, 5);
        let inside = limit(&mut engine, Side::Buy, 99, 5);
        assert_eq!(engine.trades().len(), 1);
        assert_eq!(engine.best_bid(), Some(99));
        assert!(engine.get_order(inside).is_some());
    }

    #[test]
    fn test_cancel_existing_order() {
        let mut engine = MatchingEngine::new();
        let id = limit(&mut engine, Side::Buy, 101, 10);

        assert!(engine.cancel_order(id));
        assert_eq!(engine.best_bid(), None);
        assert_eq!(engine.active_orders(), 0);
        assert!(engine.trades().is_empty());
    }

    #[test]
    fn test_cancel_is_not_idempotent_on_success() {
        let mut engine = MatchingEngine::new();
        let id = limit(&mut engine, Side::Sell, 10100, 50);

        assert!(engine.cancel_order(id));
        assert!(!engine.cancel_order(id));
    }

    #[test]
    fn test_cancel_nonexistent_order() {
        let mut engine = MatchingEngine::new();
        limit(&mut engine, Side::Sell, 99, 5);

        assert!(!engine.cancel_order(999));
        assert_eq!(engine.active_orders(), 1);
    }

    /// A fully filled order behaves like an unknown id on cancel.
    #[test]
    fn test_cancel_filled_order_returns_false() {
        let mut engine = MatchingEngine::new();
        let maker = limit(&mut engine, Side::Sell, 100, 5);
        market(&mut engine, Side::Buy, 5);

        assert!(!engine.cancel_order(maker));
    }

    #[test]
    fn test_rejections_leave_engine_untouched() {
        let mut engine = MatchingEngine::new();

        assert_eq!(
            engine.add_order(Side::Buy, OrderKind::Limit, 100, 0),
            Err(OrderError::InvalidQuantity)
        );
        assert_eq!(
            engine.add_order(Side::Buy, OrderKind::Market, 0, 0),
            Err(OrderError::InvalidQuantity)
        );
        assert_eq!(
            engine.add_order(Side::Sell, OrderKind::Limit, 0, 10),
            Err(OrderError::InvalidPrice)
        );

        assert_eq!(engine.stats().orders_processed, 0);
        assert_eq!(engine.active_orders(), 0);
        assert!(engine.trades().is_empty());

        // No id was consumed by the rejected commands
        let id = limit(&mut engine, Side::Buy, 100, 1);
        assert_eq!(id, 1);
    }

    /// Market orders ignore the price argument entirely.
    #[test]
    fn test_market_order_ignores_price() {
        let mut engine = MatchingEngine::new();
        limit(&mut engine, Side::Sell, 100, 5);

        engine.add_order(Side::Buy, OrderKind::Market, 1, 5).unwrap();
        assert_eq!(engine.trades().len(), 1);
        assert_eq!(engine.trades()[0].price, 100);
    }

    #[test]
    fn test_mid_price_and_spread() {
        let mut engine = MatchingEngine::new();
        assert_eq!(engine.mid_price(), None);
        assert_eq!(engine.spread(), None);

        limit(&mut engine, Side::Buy, 10040, 120);
        assert_eq!(engine.mid_price(), None);

        limit(&mut engine, Side::Sell, 10050, 100);
        assert_eq!(engine.mid_price(), Some(10045.0));
        assert_eq!(engine.spread(), Some(10));
    }

    #[test]
    fn test_depth_aggregates_levels() {
        let mut engine = MatchingEngine::new();
        limit(&mut engine, Side::Sell, 10050, 100);
        limit(&mut engine, Side::Sell, 10050, 30);
        limit(&mut engine, Side::Sell, 10060, 150);
        limit(&mut engine, Side::Sell, 10070, 200);

        let depth = engine.depth(Side::Sell, 2);
        assert_eq!(depth.len(), 2);
        assert_eq!(depth[0].price, 10050);
        assert_eq!(depth[0].quantity, 130);
        assert_eq!(depth[0].orders, 2);
        assert_eq!(depth[1].price, 10060);
        assert_eq!(depth[1].quantity, 150);
        assert_eq!(depth[1].orders, 1);
    }

    #[test]
    fn test_recent_trades_window() {
        let mut engine = MatchingEngine::new();
        for _ in 0..3 {
            limit(&mut engine, Side::Sell, 100, 1);
            market(&mut engine, Side::Buy, 1);
        }

        assert_eq!(engine.trades().len(), 3);
        assert_eq!(engine.recent_trades(2).len(), 2);
        assert_eq!(engine.recent_trades(10).len(), 3);
        let last = &engine.recent_trades(1)[0];
        assert_eq!(last, engine.trades().last().unwrap());
    }

    #[test]
    fn test_stats_counts_both_sides() {
        let mut engine = MatchingEngine::new();
        limit(&mut engine, Side::Buy, 99, 10);
        limit(&mut engine, Side::Sell, 101, 10);
        market(&mut engine, Side::Buy, 4);

        let stats = engine.stats();
        assert_eq!(stats.orders_processed, 3);
        assert_eq!(stats.trades_executed, 1);
        assert_eq!(stats.active_orders, 2);
    }
}
