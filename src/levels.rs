use crate::orders::{Order, Side};
use serde::{Deserialize, Serialize};
use slab::Slab;
use std::collections::BTreeMap;

/// A resting order plus its links into the FIFO list of its price level.
///
/// Nodes live in a [`Slab`] arena owned by the engine; a level holds them
/// together through `prev`/`next` arena keys. Ownership of a node belongs to
/// the level list alone; the order index keeps a non-owning arena key that
/// is invalidated whenever the node is detached.
#[derive(Debug)]
pub(crate) struct OrderNode {
    pub(crate) order: Order,
    prev: Option<usize>,
    next: Option<usize>,
}

/// One price level: a FIFO queue of resting orders at a single price.
///
/// Only the list endpoints and the aggregates are stored here; the nodes
/// themselves sit in the shared arena. `quantity` is the sum of remaining
/// quantities over the queue and `orders` is the queue length.
#[derive(Debug)]
struct Level {
    head: Option<usize>,
    tail: Option<usize>,
    orders: usize,
    quantity: u64,
}

impl Level {
    fn new() -> Self {
        Self {
            head: None,
            tail: None,
            orders: 0,
            quantity: 0,
        }
    }
}

/// Aggregate view of one price level, best levels first, as handed to
/// rendering collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: u64,
    pub quantity: u64,
    pub orders: usize,
}

/// Internal enum to unify forward (`Iter`) and reverse (`Rev<Iter>`) BTreeMap iteration.
///
/// - [`EitherIter::Fwd`] handles ascending iteration over prices (ask side).
/// - [`EitherIter::Rev`] handles descending iteration (bid side, highest first).
enum EitherIter<'a> {
    /// Forward (ascending) iteration over the price levels.
    Fwd(std::collections::btree_map::Iter<'a, u64, Level>),
    /// Reverse (descending) iteration over the price levels.
    Rev(std::iter::Rev<std::collections::btree_map::Iter<'a, u64, Level>>),
}

impl<'a> Iterator for EitherIter<'a> {
    type Item = (&'a u64, &'a Level);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EitherIter::Fwd(iter) => iter.next(),
            EitherIter::Rev(iter) => iter.next(),
        }
    }
}

/// One side of the book: a sorted map from price to FIFO level.
///
/// Best-price access is O(1) (first or last key depending on side), level
/// insertion and removal are O(log L) in the number of active levels, and
/// detaching an arbitrary order through its arena key is O(1).
pub struct BookSide {
    side: Side,
    levels: BTreeMap<u64, Level>,
}

impl BookSide {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Number of active price levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Best price on this side: highest bid or lowest ask.
    pub fn best_price(&self) -> Option<u64> {
        match self.side {
            Side::Buy => self.levels.keys().next_back().copied(),
            Side::Sell => self.levels.keys().next().copied(),
        }
    }

    /// Best price level together with the arena key of its head order.
    ///
    /// A level present in the map always has a head; an empty level left
    /// behind is a defect in the store itself.
    pub(crate) fn best(&self) -> Option<(u64, usize)> {
        let (price, level) = match self.side {
            Side::Buy => self.levels.iter().next_back()?,
            Side::Sell => self.levels.iter().next()?,
        };
        debug_assert!(level.head.is_some(), "empty price level left in book");
        level.head.map(|head| (*price, head))
    }

    /// Appends an order at the tail of its price level, creating the level
    /// on first use. Returns the arena key of the new node.
    pub(crate) fn push_tail(&mut self, arena: &mut Slab<OrderNode>, order: Order) -> usize {
        debug_assert_eq!(order.side, self.side, "order rested on the wrong side");
        let price = order.price;
        let quantity = order.quantity;
        let key = arena.insert(OrderNode {
            order,
            prev: None,
            next: None,
        });

        let level = self.levels.entry(price).or_insert_with(Level::new);
        match level.tail {
            Some(tail) => {
                arena[tail].next = Some(key);
                arena[key].prev = Some(tail);
            }
            None => level.head = Some(key),
        }
        level.tail = Some(key);
        level.orders += 1;
        level.quantity += quantity;
        key
    }

    /// Fills `fill` units against the head of the level at `price`.
    ///
    /// If the head is fully consumed it is unlinked and freed, and its order
    /// id is returned so the caller can drop the id-index entry; the level is
    /// removed once its queue empties.
    pub(crate) fn fill_head(
        &mut self,
        arena: &mut Slab<OrderNode>,
        price: u64,
        fill: u64,
    ) -> Option<u64> {
        let Some(level) = self.levels.get_mut(&price) else {
            debug_assert!(false, "fill against a price level not in the book");
            return None;
        };
        let head = level.head?;
        let node = &mut arena[head];
        debug_assert!(fill <= node.order.quantity, "fill exceeds resting quantity");
        node.order.quantity -= fill;
        level.quantity -= fill;
        if node.order.quantity > 0 {
            return None;
        }

        let next = node.next;
        let id = node.order.id;
        arena.remove(head);
        level.head = next;
        level.orders -= 1;
        match next {
            Some(n) => arena[n].prev = None,
            None => level.tail = None,
        }
        if level.head.is_none() {
            self.levels.remove(&price);
        }
        Some(id)
    }

    /// Detaches an arbitrary resting order by its arena key (the cancel
    /// path). O(1) within the queue; the level is removed when it empties.
    pub(crate) fn remove(&mut self, arena: &mut Slab<OrderNode>, key: usize) -> Order {
        let node = arena.remove(key);
        debug_assert_eq!(node.order.side, self.side, "cancel routed to the wrong side");
        if let Some(prev) = node.prev {
            arena[prev].next = node.next;
        }
        if let Some(next) = node.next {
            arena[next].prev = node.prev;
        }

        let price = node.order.price;
        let Some(level) = self.levels.get_mut(&price) else {
            debug_assert!(false, "cancel for a price level not in the book");
            return node.order;
        };
        if level.head == Some(key) {
            level.head = node.next;
        }
        if level.tail == Some(key) {
            level.tail = node.prev;
        }
        level.orders -= 1;
        level.quantity -= node.order.quantity;
        if level.head.is_none() {
            self.levels.remove(&price);
        }
        node.order
    }

    /// Aggregate depth from the best level outward, up to `levels` levels.
    pub fn depth(&self, levels: usize) -> Vec<DepthLevel> {
        self.iter_best_first()
            .take(levels)
            .map(|(&price, level)| DepthLevel {
                price,
                quantity: level.quantity,
                orders: level.orders,
            })
            .collect()
    }

    fn iter_best_first(&self) -> EitherIter<'_> {
        match self.side {
            Side::Buy => EitherIter::Rev(self.levels.iter().rev()),
            Side::Sell => EitherIter::Fwd(self.levels.iter()),
        }
    }

    /// Order ids at `price` in queue (fill) order. Test support.
    #[cfg(test)]
    fn ids_at(&self, arena: &Slab<OrderNode>, price: u64) -> Vec<u64> {
        let mut ids = Vec::new();
        let mut cur = self.levels.get(&price).and_then(|l| l.head);
        while let Some(key) = cur {
            ids.push(arena[key].order.id);
            cur = arena[key].next;
        }
        ids
    }
}
