//! The matching engine: a single-threaded loop that drains the sequenced
//! request ring, dispatches each request to the book for its instrument, and
//! fans the output into the response and market-update rings.
//!
//! The engine is the exclusive owner of every book and holds the only write
//! handles to both output rings, so all matching is serial and deterministic
//! in the arrival order the FIFO sequencer established.

use super::EventSink;
use super::book::OrderBook;
use crate::msg::{ClientRequest, ClientResponse, MarketUpdate, RequestKind};
use crate::spsc::{Consumer, Producer};
use crate::types::MAX_TICKERS;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

/// Owns the engine's two output rings and implements [`EventSink`] by
/// publishing into them. Kept separate from the books so a book call can
/// borrow the sink and the book disjointly.
struct RingSink {
    responses: Producer<ClientResponse>,
    updates: Producer<MarketUpdate>,
}

impl EventSink for RingSink {
    fn client_response(&mut self, response: ClientResponse) {
        trace!(%response, "engine response");
        self.responses.push(response);
    }

    fn market_update(&mut self, update: MarketUpdate) {
        trace!(%update, "engine update");
        self.updates.push(update);
    }
}

/// Single-threaded matching core over one book per instrument.
pub struct MatchingEngine {
    requests: Consumer<ClientRequest>,
    sink: RingSink,
    books: Vec<OrderBook>,
    run: Arc<AtomicBool>,
}

impl MatchingEngine {
    /// Builds an engine with a default-capacity book per instrument.
    pub fn new(
        requests: Consumer<ClientRequest>,
        responses: Producer<ClientResponse>,
        updates: Producer<MarketUpdate>,
        run: Arc<AtomicBool>,
    ) -> Self {
        let books = (0..MAX_TICKERS as u32).map(OrderBook::new).collect();
        Self::with_books(requests, responses, updates, books, run)
    }

    /// Builds an engine over caller-supplied books; tests pass small-pool
    /// books here.
    pub fn with_books(
        requests: Consumer<ClientRequest>,
        responses: Producer<ClientResponse>,
        updates: Producer<MarketUpdate>,
        books: Vec<OrderBook>,
        run: Arc<AtomicBool>,
    ) -> Self {
        MatchingEngine {
            requests,
            sink: RingSink { responses, updates },
            books,
            run,
        }
    }

    /// Read-only view of one instrument's book.
    pub fn book(&self, ticker_id: u32) -> &OrderBook {
        &self.books[ticker_id as usize]
    }

    /// Processes at most one pending request; returns whether one was there.
    pub fn poll_once(&mut self) -> bool {
        match self.requests.pop() {
            Some(request) => {
                self.process(request);
                true
            }
            None => false,
        }
    }

    fn process(&mut self, request: ClientRequest) {
        trace!(%request, "engine request");
        let book = self
            .books
            .get_mut(request.ticker_id as usize)
            .unwrap_or_else(|| panic!("request for unknown ticker {}", request.ticker_id));
        match request.kind {
            RequestKind::New => book.add(
                &mut self.sink,
                request.client_id,
                request.order_id,
                request.side,
                request.price,
                request.qty,
            ),
            RequestKind::Cancel => book.cancel(&mut self.sink, request.client_id, request.order_id),
            RequestKind::Invalid => {
                panic!("invalid client-request type reached the matching engine")
            }
        }
    }

    /// Busy-spins on the request ring until the run flag drops, then drains
    /// what is left and exits.
    pub fn run(&mut self) {
        debug!("matching engine running");
        while self.run.load(Ordering::Acquire) {
            self.poll_once();
        }
        while self.poll_once() {}
        debug!("matching engine stopped");
    }

    /// Moves the engine onto its own named thread.
    pub fn spawn(mut self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("exchange-matcher".into())
            .spawn(move || self.run())
            .expect("spawn matching engine thread")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{ResponseKind, UpdateKind};
    use crate::spsc;
    use crate::types::Side;

    fn harness() -> (
        Producer<ClientRequest>,
        MatchingEngine,
        Consumer<ClientResponse>,
        Consumer<MarketUpdate>,
    ) {
        let (req_tx, req_rx) = spsc::ring(64);
        let (resp_tx, resp_rx) = spsc::ring(64);
        let (upd_tx, upd_rx) = spsc::ring(64);
        let books = (0..2).map(|t| OrderBook::with_capacity(t, 64, 16)).collect();
        let engine = MatchingEngine::with_books(
            req_rx,
            resp_tx,
            upd_tx,
            books,
            Arc::new(AtomicBool::new(true)),
        );
        (req_tx, engine, resp_rx, upd_rx)
    }

    fn new_order(ticker: u32, client: u32, oid: u64, side: Side, price: i64, qty: u32) -> ClientRequest {
        ClientRequest {
            kind: RequestKind::New,
            client_id: client,
            ticker_id: ticker,
            order_id: oid,
            side,
            price,
            qty,
        }
    }

    #[test]
    fn routes_requests_to_the_right_book() {
        let (mut req_tx, mut engine, mut resp_rx, mut upd_rx) = harness();
        req_tx.push(new_order(0, 1, 1, Side::Buy, 50, 10));
        req_tx.push(new_order(1, 1, 2, Side::Buy, 70, 10));
        while engine.poll_once() {}

        assert_eq!(engine.book(0).bbo().bid_price, 50);
        assert_eq!(engine.book(1).bbo().bid_price, 70);

        assert_eq!(resp_rx.pop().unwrap().kind, ResponseKind::Accepted);
        assert_eq!(resp_rx.pop().unwrap().kind, ResponseKind::Accepted);
        let add = upd_rx.pop().unwrap();
        assert_eq!((add.kind, add.ticker_id), (UpdateKind::Add, 0));
        let add = upd_rx.pop().unwrap();
        assert_eq!((add.kind, add.ticker_id), (UpdateKind::Add, 1));
    }

    #[test]
    fn cancel_is_a_normal_branch() {
        let (mut req_tx, mut engine, mut resp_rx, _upd_rx) = harness();
        req_tx.push(new_order(0, 1, 1, Side::Buy, 50, 10));
        req_tx.push(ClientRequest {
            kind: RequestKind::Cancel,
            client_id: 1,
            ticker_id: 0,
            order_id: 1,
            ..ClientRequest::default()
        });
        while engine.poll_once() {}

        assert_eq!(resp_rx.pop().unwrap().kind, ResponseKind::Accepted);
        assert_eq!(resp_rx.pop().unwrap().kind, ResponseKind::Canceled);
        assert_eq!(engine.book(0).resting_orders(), 0);
    }

    #[test]
    #[should_panic(expected = "invalid client-request type")]
    fn invalid_request_kind_is_fatal() {
        let (mut req_tx, mut engine, _resp_rx, _upd_rx) = harness();
        req_tx.push(ClientRequest {
            ticker_id: 0,
            ..ClientRequest::default()
        });
        engine.poll_once();
    }

    #[test]
    fn run_drains_pending_requests_after_stop() {
        let (mut req_tx, engine, mut resp_rx, _upd_rx) = harness();
        let run = Arc::clone(&engine.run);
        for oid in 0..10 {
            req_tx.push(new_order(0, 1, oid, Side::Buy, 50 + oid as i64, 1));
        }
        run.store(false, Ordering::Release);
        let handle = engine.spawn();
        handle.join().unwrap();
        let mut accepted = 0;
        while let Some(r) = resp_rx.pop() {
            assert_eq!(r.kind, ResponseKind::Accepted);
            accepted += 1;
        }
        assert_eq!(accepted, 10);
    }
}
