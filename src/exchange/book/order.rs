//! Arena records for resting orders and price levels.

use crate::pool::Idx;
use crate::types::{
    ClientId, INVALID_PRICE, INVALID_QTY, OrderId, Price, Priority, Qty, Side, TickerId,
};

/// A resting order. Lives in the book's order pool; `prev`/`next` thread the
/// circular doubly-linked queue of orders at the same price, in priority
/// order from the level's first order.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Order {
    pub ticker_id: TickerId,
    pub client_id: ClientId,
    pub client_order_id: OrderId,
    pub market_order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub priority: Priority,
    pub prev: Idx<Order>,
    pub next: Idx<Order>,
}

/// A price level. Lives in the book's level pool; `prev`/`next` thread the
/// circular list of levels on one side, most aggressive first from the side's
/// head pointer (bids descending, asks ascending).
#[derive(Debug, Clone, Copy)]
pub(crate) struct PriceLevel {
    pub side: Side,
    pub price: Price,
    pub first_order: Idx<Order>,
    pub prev: Idx<PriceLevel>,
    pub next: Idx<PriceLevel>,
}

/// Best bid and offer with the aggregate resting quantity at each.
///
/// An empty side reads as `INVALID_PRICE` / `INVALID_QTY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bbo {
    pub bid_price: Price,
    pub bid_qty: Qty,
    pub ask_price: Price,
    pub ask_qty: Qty,
}

impl Default for Bbo {
    fn default() -> Self {
        Bbo {
            bid_price: INVALID_PRICE,
            bid_qty: INVALID_QTY,
            ask_price: INVALID_PRICE,
            ask_qty: INVALID_QTY,
        }
    }
}

impl Bbo {
    /// Whether the bid side has any resting quantity.
    pub fn has_bid(&self) -> bool {
        self.bid_price != INVALID_PRICE
    }

    /// Whether the ask side has any resting quantity.
    pub fn has_ask(&self) -> bool {
        self.ask_price != INVALID_PRICE
    }
}

impl std::fmt::Display for Bbo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use crate::types::OrInvalid;
        write!(
            f,
            "{}@{} x {}@{}",
            OrInvalid(self.bid_qty, INVALID_QTY),
            OrInvalid(self.bid_price, INVALID_PRICE),
            OrInvalid(self.ask_qty, INVALID_QTY),
            OrInvalid(self.ask_price, INVALID_PRICE),
        )
    }
}
