//! Price/time-priority limit order book for a single instrument.
//!
//! Structure follows the classic intrusive layout: each side is a circular
//! doubly-linked list of price levels, head at the best (most aggressive)
//! price (bids strictly descending, asks strictly ascending), and each level
//! holds a circular queue of orders in time priority. Orders and levels are
//! arena-allocated ([`Pool`]) and referenced by dense indices, so splicing is
//! O(1) and the hot path never allocates.
//!
//! The book is single-owner: only the matching engine calls it, and all
//! output (client responses, market updates) flows through the caller's
//! [`EventSink`].

mod matching;
mod order;

pub use order::Bbo;
pub(crate) use order::{Order, PriceLevel};

use crate::exchange::EventSink;
use crate::msg::{ClientResponse, MarketUpdate, ResponseKind, UpdateKind};
use crate::pool::{Idx, Pool};
use crate::types::{
    ClientId, INVALID_ORDER_ID, INVALID_PRICE, INVALID_QTY, MAX_CLIENTS, MAX_ORDER_IDS,
    MAX_PRICE_LEVELS, OrderId, Price, Priority, Qty, Side, TickerId,
};
use rustc_hash::FxHashMap;
use tracing::trace;

/// Limit order book for one instrument.
pub struct OrderBook {
    ticker_id: TickerId,
    orders: Pool<Order>,
    levels: Pool<PriceLevel>,
    /// Best bid level, head of the descending bid list.
    bids: Option<Idx<PriceLevel>>,
    /// Best ask level, head of the ascending ask list.
    asks: Option<Idx<PriceLevel>>,
    /// Full-domain price index; one entry per live level.
    price_to_level: FxHashMap<Price, Idx<PriceLevel>>,
    /// Per-client map from client order id to resting order. An entry exists
    /// iff the order is currently in the book.
    client_orders: Box<[FxHashMap<OrderId, Idx<Order>>]>,
    next_market_order_id: OrderId,
    bbo: Bbo,
}

impl OrderBook {
    /// Creates a book with the process-wide default capacities.
    pub fn new(ticker_id: TickerId) -> Self {
        Self::with_capacity(ticker_id, MAX_ORDER_IDS, MAX_PRICE_LEVELS)
    }

    /// Creates a book with explicit pool capacities. Tests use small pools to
    /// exercise exhaustion without gigabytes of arena.
    pub fn with_capacity(ticker_id: TickerId, max_orders: usize, max_levels: usize) -> Self {
        let client_orders = (0..MAX_CLIENTS)
            .map(|_| FxHashMap::default())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        OrderBook {
            ticker_id,
            orders: Pool::new(max_orders),
            levels: Pool::new(max_levels),
            bids: None,
            asks: None,
            price_to_level: FxHashMap::default(),
            client_orders,
            next_market_order_id: 1,
            bbo: Bbo::default(),
        }
    }

    /// The instrument this book trades.
    pub fn ticker_id(&self) -> TickerId {
        self.ticker_id
    }

    /// Current best bid and offer.
    pub fn bbo(&self) -> Bbo {
        self.bbo
    }

    /// Number of orders currently resting.
    pub fn resting_orders(&self) -> usize {
        self.orders.in_use()
    }

    /// Live price levels on the (bid, ask) sides.
    pub fn depth(&self) -> (usize, usize) {
        (self.count_levels(self.bids), self.count_levels(self.asks))
    }

    /// Accepts a NEW order: responds ACCEPTED, matches whatever crosses, and
    /// rests the remainder.
    pub fn add(
        &mut self,
        sink: &mut impl EventSink,
        client_id: ClientId,
        client_order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
    ) {
        let market_order_id = self.next_market_order_id;
        self.next_market_order_id += 1;

        sink.client_response(ClientResponse {
            kind: ResponseKind::Accepted,
            client_id,
            ticker_id: self.ticker_id,
            client_order_id,
            market_order_id,
            side,
            price,
            exec_qty: 0,
            leaves_qty: qty,
        });

        let leaves_qty =
            self.check_for_match(sink, client_id, client_order_id, side, price, qty, market_order_id);

        if leaves_qty > 0 {
            let priority = self.next_priority(price);
            let order_idx = self.orders.alloc(Order {
                ticker_id: self.ticker_id,
                client_id,
                client_order_id,
                market_order_id,
                side,
                price,
                qty: leaves_qty,
                priority,
                prev: Idx::placeholder(),
                next: Idx::placeholder(),
            });
            self.insert_order(order_idx);
            trace!(ticker = self.ticker_id, moid = market_order_id, %side, price, leaves_qty, "order rests");

            sink.market_update(MarketUpdate {
                kind: UpdateKind::Add,
                order_id: market_order_id,
                ticker_id: self.ticker_id,
                side,
                price,
                qty: leaves_qty,
                priority,
            });
            self.refresh_bbo_if_best(side, price);
        }
    }

    /// Cancels a resting order by its (client, client-order-id) key.
    /// An unknown key yields CANCEL_REJECTED and no market update.
    pub fn cancel(&mut self, sink: &mut impl EventSink, client_id: ClientId, order_id: OrderId) {
        let found = self
            .client_orders
            .get(client_id as usize)
            .and_then(|m| m.get(&order_id))
            .copied();

        let Some(order_idx) = found else {
            sink.client_response(ClientResponse {
                kind: ResponseKind::CancelRejected,
                client_id,
                ticker_id: self.ticker_id,
                client_order_id: order_id,
                market_order_id: INVALID_ORDER_ID,
                side: Side::Invalid,
                price: INVALID_PRICE,
                exec_qty: INVALID_QTY,
                leaves_qty: INVALID_QTY,
            });
            return;
        };

        let order = *self.orders.get(order_idx);
        sink.client_response(ClientResponse {
            kind: ResponseKind::Canceled,
            client_id,
            ticker_id: self.ticker_id,
            client_order_id: order_id,
            market_order_id: order.market_order_id,
            side: order.side,
            price: order.price,
            exec_qty: INVALID_QTY,
            leaves_qty: order.qty,
        });
        sink.market_update(MarketUpdate {
            kind: UpdateKind::Cancel,
            order_id: order.market_order_id,
            ticker_id: self.ticker_id,
            side: order.side,
            price: order.price,
            qty: 0,
            priority: order.priority,
        });

        self.remove_order(order_idx);
        self.refresh_bbo_if_best(order.side, order.price);
    }

    // --- level and order list management -------------------------------

    /// Time priority for the next order at `price`: one past the level's
    /// tail, or 1 when the level does not exist yet.
    fn next_priority(&self, price: Price) -> Priority {
        match self.price_to_level.get(&price) {
            None => 1,
            Some(&level_idx) => {
                let first = self.levels.get(level_idx).first_order;
                let tail = self.orders.get(first).prev;
                self.orders.get(tail).priority + 1
            }
        }
    }

    /// Links a freshly allocated order into its level, creating the level if
    /// this price is new, and records it in the client-order index.
    fn insert_order(&mut self, order_idx: Idx<Order>) {
        let order = *self.orders.get(order_idx);
        match self.price_to_level.get(&order.price).copied() {
            None => {
                // First order at this price: the order queue is just itself.
                let o = self.orders.get_mut(order_idx);
                o.prev = order_idx;
                o.next = order_idx;
                let level_idx = self.levels.alloc(PriceLevel {
                    side: order.side,
                    price: order.price,
                    first_order: order_idx,
                    prev: Idx::placeholder(),
                    next: Idx::placeholder(),
                });
                self.insert_level(level_idx);
            }
            Some(level_idx) => {
                // Append at the tail of the level's queue.
                let first = self.levels.get(level_idx).first_order;
                let tail = self.orders.get(first).prev;
                {
                    let o = self.orders.get_mut(order_idx);
                    o.prev = tail;
                    o.next = first;
                }
                self.orders.get_mut(tail).next = order_idx;
                self.orders.get_mut(first).prev = order_idx;
            }
        }
        self.client_orders[order.client_id as usize].insert(order.client_order_id, order_idx);
    }

    /// Splices an order out of its level queue, dropping the level when it
    /// was the last order, and clears the client-order index entry.
    fn remove_order(&mut self, order_idx: Idx<Order>) {
        let order = *self.orders.get(order_idx);
        if order.next == order_idx {
            self.remove_level(order.side, order.price);
        } else {
            self.orders.get_mut(order.prev).next = order.next;
            self.orders.get_mut(order.next).prev = order.prev;
            let level_idx = self.price_to_level[&order.price];
            let level = self.levels.get_mut(level_idx);
            if level.first_order == order_idx {
                level.first_order = order.next;
            }
        }
        self.client_orders[order.client_id as usize].remove(&order.client_order_id);
        self.orders.free(order_idx);
    }

    /// Splices a new level into its side's sorted circular list and updates
    /// the best-level head when this price is more aggressive.
    fn insert_level(&mut self, level_idx: Idx<PriceLevel>) {
        let (side, price) = {
            let l = self.levels.get(level_idx);
            (l.side, l.price)
        };
        self.price_to_level.insert(price, level_idx);

        let head = match side {
            Side::Buy => self.bids,
            Side::Sell => self.asks,
            Side::Invalid => unreachable!("invalid side never reaches the book"),
        };
        match head {
            None => {
                let l = self.levels.get_mut(level_idx);
                l.prev = level_idx;
                l.next = level_idx;
                self.set_head(side, Some(level_idx));
            }
            Some(head_idx) => {
                // Walk from the best until a less aggressive level appears;
                // wrapping back to the head means this is the new tail.
                let mut cur = head_idx;
                let before = loop {
                    let cur_price = self.levels.get(cur).price;
                    if Self::more_aggressive(side, price, cur_price) {
                        break cur;
                    }
                    cur = self.levels.get(cur).next;
                    if cur == head_idx {
                        break head_idx;
                    }
                };
                // Insert before `before`.
                let prev = self.levels.get(before).prev;
                {
                    let l = self.levels.get_mut(level_idx);
                    l.prev = prev;
                    l.next = before;
                }
                self.levels.get_mut(prev).next = level_idx;
                self.levels.get_mut(before).prev = level_idx;

                let head_price = self.levels.get(head_idx).price;
                if Self::more_aggressive(side, price, head_price) {
                    self.set_head(side, Some(level_idx));
                }
            }
        }
    }

    /// Removes the level at `price` from its side's list; the next level
    /// becomes best when the removed one was.
    fn remove_level(&mut self, side: Side, price: Price) {
        let level_idx = self
            .price_to_level
            .remove(&price)
            .expect("level must be indexed while live");
        let level = *self.levels.get(level_idx);
        if level.next == level_idx {
            self.set_head(side, None);
        } else {
            self.levels.get_mut(level.prev).next = level.next;
            self.levels.get_mut(level.next).prev = level.prev;
            if self.head(side) == Some(level_idx) {
                self.set_head(side, Some(level.next));
            }
        }
        self.levels.free(level_idx);
    }

    #[inline]
    fn more_aggressive(side: Side, a: Price, b: Price) -> bool {
        match side {
            Side::Buy => a > b,
            Side::Sell => a < b,
            Side::Invalid => false,
        }
    }

    #[inline]
    fn head(&self, side: Side) -> Option<Idx<PriceLevel>> {
        match side {
            Side::Buy => self.bids,
            _ => self.asks,
        }
    }

    #[inline]
    fn set_head(&mut self, side: Side, head: Option<Idx<PriceLevel>>) {
        match side {
            Side::Buy => self.bids = head,
            _ => self.asks = head,
        }
    }

    // --- BBO ------------------------------------------------------------

    /// Recomputes one BBO side, but only when the touched `price` could have
    /// affected the best level (at or inside the previous best, or the side
    /// just became empty).
    fn refresh_bbo_if_best(&mut self, side: Side, price: Price) {
        let affects = match side {
            Side::Buy => !self.bbo.has_bid() || price >= self.bbo.bid_price,
            Side::Sell => !self.bbo.has_ask() || price <= self.bbo.ask_price,
            Side::Invalid => false,
        };
        if affects {
            self.recompute_bbo_side(side);
        }
    }

    fn recompute_bbo_side(&mut self, side: Side) {
        let best = self.head(side);
        let (price, qty) = match best {
            None => (INVALID_PRICE, INVALID_QTY),
            Some(level_idx) => {
                let level = self.levels.get(level_idx);
                let mut qty: Qty = 0;
                let first = level.first_order;
                let mut cur = first;
                loop {
                    qty += self.orders.get(cur).qty;
                    cur = self.orders.get(cur).next;
                    if cur == first {
                        break;
                    }
                }
                (level.price, qty)
            }
        };
        match side {
            Side::Buy => {
                self.bbo.bid_price = price;
                self.bbo.bid_qty = qty;
            }
            _ => {
                self.bbo.ask_price = price;
                self.bbo.ask_qty = qty;
            }
        }
    }

    fn count_levels(&self, head: Option<Idx<PriceLevel>>) -> usize {
        let Some(head_idx) = head else { return 0 };
        let mut n = 0;
        let mut cur = head_idx;
        loop {
            n += 1;
            cur = self.levels.get(cur).next;
            if cur == head_idx {
                break;
            }
        }
        n
    }

    // --- consistency ----------------------------------------------------

    /// Walks the whole structure and panics on any broken invariant: side
    /// ordering, list circularity, priority monotonicity, index/list
    /// agreement and pool accounting. Test and diagnostic use only.
    pub fn assert_consistent(&self) {
        let mut seen_orders = 0usize;
        let mut seen_levels = 0usize;
        for (side, head) in [(Side::Buy, self.bids), (Side::Sell, self.asks)] {
            let Some(head_idx) = head else { continue };
            let mut cur = head_idx;
            let mut last_price: Option<Price> = None;
            loop {
                seen_levels += 1;
                let level = self.levels.get(cur);
                assert_eq!(level.side, side, "level side matches its list");
                if let Some(prev_price) = last_price {
                    assert!(
                        Self::more_aggressive(side, prev_price, level.price),
                        "side {side} out of order: {prev_price} then {}",
                        level.price
                    );
                }
                last_price = Some(level.price);
                assert_eq!(
                    self.price_to_level.get(&level.price).copied(),
                    Some(cur),
                    "price index points at the live level"
                );

                let first = level.first_order;
                let mut order_cur = first;
                let mut last_priority: Option<Priority> = None;
                loop {
                    seen_orders += 1;
                    let order = self.orders.get(order_cur);
                    assert_eq!(order.price, level.price);
                    assert_eq!(order.side, side);
                    if let Some(p) = last_priority {
                        assert!(p < order.priority, "priorities increase along the queue");
                    }
                    last_priority = Some(order.priority);
                    assert_eq!(
                        self.client_orders[order.client_id as usize]
                            .get(&order.client_order_id)
                            .copied(),
                        Some(order_cur),
                        "client index points at the resting order"
                    );
                    assert_eq!(self.orders.get(order.next).prev, order_cur);
                    order_cur = order.next;
                    if order_cur == first {
                        break;
                    }
                }
                assert_eq!(self.levels.get(level.next).prev, cur);
                cur = level.next;
                if cur == head_idx {
                    break;
                }
            }
        }
        let indexed: usize = self.client_orders.iter().map(|m| m.len()).sum();
        assert_eq!(indexed, seen_orders, "client index and side lists agree");
        assert_eq!(self.orders.in_use(), seen_orders, "order pool accounting");
        assert_eq!(self.levels.in_use(), seen_levels, "level pool accounting");
        assert_eq!(self.price_to_level.len(), seen_levels);
    }
}
