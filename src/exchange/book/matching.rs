//! Aggressive-order matching: walks the opposing best level's queue while
//! the limit price crosses, emitting fills and the market updates the
//! passive side's change implies.

use super::OrderBook;
use crate::exchange::EventSink;
use crate::msg::{ClientResponse, MarketUpdate, ResponseKind, UpdateKind};
use crate::pool::Idx;
use crate::types::{
    ClientId, INVALID_ORDER_ID, INVALID_PRIORITY, OrderId, Price, Qty, Side,
};
use tracing::trace;

impl OrderBook {
    /// Matches an incoming order against the book and returns the unfilled
    /// remainder. Fills always consume the head order of the best opposing
    /// level, so time priority within a level and price priority across
    /// levels fall out of the walk order.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn check_for_match(
        &mut self,
        sink: &mut impl EventSink,
        client_id: ClientId,
        client_order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
        new_market_order_id: OrderId,
    ) -> Qty {
        let mut leaves_qty = qty;
        while leaves_qty > 0 {
            let Some(best_idx) = self.head(side.opposite()) else {
                break;
            };
            let first = self.levels.get(best_idx).first_order;
            let resting_price = self.orders.get(first).price;
            let crosses = match side {
                Side::Buy => price >= resting_price,
                Side::Sell => price <= resting_price,
                Side::Invalid => false,
            };
            if !crosses {
                break;
            }
            self.fill(
                sink,
                client_id,
                client_order_id,
                side,
                new_market_order_id,
                first,
                &mut leaves_qty,
            );
        }
        if leaves_qty != qty {
            // Every fill consumed from the opposing best level.
            self.recompute_bbo_side(side.opposite());
        }
        leaves_qty
    }

    /// Executes one fill between the incoming order and the resting order at
    /// `resting_idx`: two FILLED responses, a TRADE print, and a CANCEL or
    /// MODIFY for the passive order depending on whether it was consumed.
    #[allow(clippy::too_many_arguments)]
    fn fill(
        &mut self,
        sink: &mut impl EventSink,
        client_id: ClientId,
        client_order_id: OrderId,
        side: Side,
        new_market_order_id: OrderId,
        resting_idx: Idx<super::Order>,
        leaves_qty: &mut Qty,
    ) {
        let resting = *self.orders.get(resting_idx);
        let fill_qty = resting.qty.min(*leaves_qty);
        *leaves_qty -= fill_qty;
        let remaining = resting.qty - fill_qty;
        self.orders.get_mut(resting_idx).qty = remaining;

        trace!(
            ticker = self.ticker_id(),
            price = resting.price,
            fill_qty,
            aggressor = new_market_order_id,
            passive = resting.market_order_id,
            "fill"
        );

        sink.client_response(ClientResponse {
            kind: ResponseKind::Filled,
            client_id,
            ticker_id: self.ticker_id(),
            client_order_id,
            market_order_id: new_market_order_id,
            side,
            price: resting.price,
            exec_qty: fill_qty,
            leaves_qty: *leaves_qty,
        });
        sink.client_response(ClientResponse {
            kind: ResponseKind::Filled,
            client_id: resting.client_id,
            ticker_id: self.ticker_id(),
            client_order_id: resting.client_order_id,
            market_order_id: resting.market_order_id,
            side: resting.side,
            price: resting.price,
            exec_qty: fill_qty,
            leaves_qty: remaining,
        });
        sink.market_update(MarketUpdate {
            kind: UpdateKind::Trade,
            order_id: INVALID_ORDER_ID,
            ticker_id: self.ticker_id(),
            side,
            price: resting.price,
            qty: fill_qty,
            priority: INVALID_PRIORITY,
        });

        if remaining == 0 {
            sink.market_update(MarketUpdate {
                kind: UpdateKind::Cancel,
                order_id: resting.market_order_id,
                ticker_id: self.ticker_id(),
                side: resting.side,
                price: resting.price,
                qty: 0,
                priority: resting.priority,
            });
            self.remove_order(resting_idx);
        } else {
            sink.market_update(MarketUpdate {
                kind: UpdateKind::Modify,
                order_id: resting.market_order_id,
                ticker_id: self.ticker_id(),
                side: resting.side,
                price: resting.price,
                qty: remaining,
                priority: resting.priority,
            });
        }
    }
}
