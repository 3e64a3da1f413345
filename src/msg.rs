//! In-process message types carried on the rings: client requests, client
//! responses and market updates.
//!
//! These are the records the matching engine, sequencer, publisher and
//! consumer exchange internally. Their packed little-endian wire renditions
//! live in [`crate::wire`]; conversion happens only at the network boundary.

use crate::types::{
    ClientId, INVALID_CLIENT_ID, INVALID_ORDER_ID, INVALID_PRICE, INVALID_PRIORITY, INVALID_QTY,
    INVALID_TICKER_ID, OrInvalid, OrderId, Price, Priority, Qty, Side, TickerId,
};
use std::fmt;

/// Kind of an inbound client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestKind {
    /// Placeholder; never valid on the wire.
    Invalid = 0,
    /// Submit a new limit order.
    New = 1,
    /// Cancel a resting order.
    Cancel = 2,
}

impl RequestKind {
    /// Wire representation.
    #[inline]
    pub const fn to_wire(self) -> u8 {
        self as u8
    }

    /// Decode the wire representation, mapping unknown values to `Invalid`.
    #[inline]
    pub const fn from_wire(v: u8) -> RequestKind {
        match v {
            1 => RequestKind::New,
            2 => RequestKind::Cancel,
            _ => RequestKind::Invalid,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestKind::New => "NEW",
            RequestKind::Cancel => "CANCEL",
            RequestKind::Invalid => "INVALID",
        })
    }
}

/// An order request as seen by the matching engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRequest {
    pub kind: RequestKind,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    /// Client-assigned order id; the cancel key together with `client_id`.
    pub order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
}

impl Default for ClientRequest {
    fn default() -> Self {
        ClientRequest {
            kind: RequestKind::Invalid,
            client_id: INVALID_CLIENT_ID,
            ticker_id: INVALID_TICKER_ID,
            order_id: INVALID_ORDER_ID,
            side: Side::Invalid,
            price: INVALID_PRICE,
            qty: INVALID_QTY,
        }
    }
}

impl fmt::Display for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClientRequest[type:{} client:{} ticker:{} oid:{} side:{} qty:{} price:{}]",
            self.kind,
            OrInvalid(self.client_id, INVALID_CLIENT_ID),
            OrInvalid(self.ticker_id, INVALID_TICKER_ID),
            OrInvalid(self.order_id, INVALID_ORDER_ID),
            self.side,
            OrInvalid(self.qty, INVALID_QTY),
            OrInvalid(self.price, INVALID_PRICE),
        )
    }
}

/// Kind of an outbound client response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseKind {
    /// Placeholder; never valid on the wire.
    Invalid = 0,
    /// The order passed validation and entered matching.
    Accepted = 1,
    /// A resting order was cancelled on request.
    Canceled = 2,
    /// The order traded, partially or fully.
    Filled = 3,
    /// A cancel addressed no resting order.
    CancelRejected = 4,
}

impl ResponseKind {
    /// Wire representation.
    #[inline]
    pub const fn to_wire(self) -> u8 {
        self as u8
    }

    /// Decode the wire representation, mapping unknown values to `Invalid`.
    #[inline]
    pub const fn from_wire(v: u8) -> ResponseKind {
        match v {
            1 => ResponseKind::Accepted,
            2 => ResponseKind::Canceled,
            3 => ResponseKind::Filled,
            4 => ResponseKind::CancelRejected,
            _ => ResponseKind::Invalid,
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResponseKind::Accepted => "ACCEPTED",
            ResponseKind::Canceled => "CANCELED",
            ResponseKind::Filled => "FILLED",
            ResponseKind::CancelRejected => "CANCEL_REJECTED",
            ResponseKind::Invalid => "INVALID",
        })
    }
}

/// A matching-engine response bound for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientResponse {
    pub kind: ResponseKind,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    /// The id the client assigned to the order.
    pub client_order_id: OrderId,
    /// The id the book minted on acceptance.
    pub market_order_id: OrderId,
    pub side: Side,
    pub price: Price,
    /// Quantity executed by the fill this response reports.
    pub exec_qty: Qty,
    /// Quantity still open after this event.
    pub leaves_qty: Qty,
}

impl Default for ClientResponse {
    fn default() -> Self {
        ClientResponse {
            kind: ResponseKind::Invalid,
            client_id: INVALID_CLIENT_ID,
            ticker_id: INVALID_TICKER_ID,
            client_order_id: INVALID_ORDER_ID,
            market_order_id: INVALID_ORDER_ID,
            side: Side::Invalid,
            price: INVALID_PRICE,
            exec_qty: INVALID_QTY,
            leaves_qty: INVALID_QTY,
        }
    }
}

impl fmt::Display for ClientResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClientResponse[type:{} client:{} ticker:{} coid:{} moid:{} side:{} exec:{} leaves:{} price:{}]",
            self.kind,
            OrInvalid(self.client_id, INVALID_CLIENT_ID),
            OrInvalid(self.ticker_id, INVALID_TICKER_ID),
            OrInvalid(self.client_order_id, INVALID_ORDER_ID),
            OrInvalid(self.market_order_id, INVALID_ORDER_ID),
            self.side,
            OrInvalid(self.exec_qty, INVALID_QTY),
            OrInvalid(self.leaves_qty, INVALID_QTY),
            OrInvalid(self.price, INVALID_PRICE),
        )
    }
}

/// Kind of a market update on the incremental or snapshot stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateKind {
    /// Placeholder; never valid on the wire.
    Invalid = 0,
    /// Participants must clear their book for the carried ticker.
    /// Synthesized only inside snapshots.
    Clear = 1,
    /// A new order rests in the book.
    Add = 2,
    /// A resting order's quantity changed (partial fill).
    Modify = 3,
    /// A resting order left the book.
    Cancel = 4,
    /// A trade printed; carries no resting-order identity.
    Trade = 5,
    /// First record of a snapshot; `order_id` holds the last applied
    /// incremental sequence.
    SnapshotStart = 6,
    /// Last record of a snapshot; `order_id` as for `SnapshotStart`.
    SnapshotEnd = 7,
}

impl UpdateKind {
    /// Wire representation.
    #[inline]
    pub const fn to_wire(self) -> u8 {
        self as u8
    }

    /// Decode the wire representation, mapping unknown values to `Invalid`.
    #[inline]
    pub const fn from_wire(v: u8) -> UpdateKind {
        match v {
            1 => UpdateKind::Clear,
            2 => UpdateKind::Add,
            3 => UpdateKind::Modify,
            4 => UpdateKind::Cancel,
            5 => UpdateKind::Trade,
            6 => UpdateKind::SnapshotStart,
            7 => UpdateKind::SnapshotEnd,
            _ => UpdateKind::Invalid,
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpdateKind::Clear => "CLEAR",
            UpdateKind::Add => "ADD",
            UpdateKind::Modify => "MODIFY",
            UpdateKind::Cancel => "CANCEL",
            UpdateKind::Trade => "TRADE",
            UpdateKind::SnapshotStart => "SNAPSHOT_START",
            UpdateKind::SnapshotEnd => "SNAPSHOT_END",
            UpdateKind::Invalid => "INVALID",
        })
    }
}

/// A market update as emitted by the matching engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketUpdate {
    pub kind: UpdateKind,
    pub order_id: OrderId,
    pub ticker_id: TickerId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub priority: Priority,
}

impl Default for MarketUpdate {
    fn default() -> Self {
        MarketUpdate {
            kind: UpdateKind::Invalid,
            order_id: INVALID_ORDER_ID,
            ticker_id: INVALID_TICKER_ID,
            side: Side::Invalid,
            price: INVALID_PRICE,
            qty: INVALID_QTY,
            priority: INVALID_PRIORITY,
        }
    }
}

impl fmt::Display for MarketUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MarketUpdate[type:{} ticker:{} oid:{} side:{} qty:{} price:{} prio:{}]",
            self.kind,
            OrInvalid(self.ticker_id, INVALID_TICKER_ID),
            OrInvalid(self.order_id, INVALID_ORDER_ID),
            self.side,
            OrInvalid(self.qty, INVALID_QTY),
            OrInvalid(self.price, INVALID_PRICE),
            OrInvalid(self.priority, INVALID_PRIORITY),
        )
    }
}

/// A market update stamped with its stream sequence number, as published on
/// the wire and staged during consumer recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequencedUpdate {
    pub seq_num: u64,
    pub update: MarketUpdate,
}

impl fmt::Display for SequencedUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequencedUpdate[seq:{} {}]", self.seq_num, self.update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_wire_values() {
        for kind in [RequestKind::Invalid, RequestKind::New, RequestKind::Cancel] {
            assert_eq!(RequestKind::from_wire(kind.to_wire()), kind);
        }
        for kind in [
            ResponseKind::Accepted,
            ResponseKind::Canceled,
            ResponseKind::Filled,
            ResponseKind::CancelRejected,
        ] {
            assert_eq!(ResponseKind::from_wire(kind.to_wire()), kind);
        }
        for v in 0..=7u8 {
            assert_eq!(UpdateKind::from_wire(v).to_wire(), v);
        }
        assert_eq!(UpdateKind::from_wire(200), UpdateKind::Invalid);
    }

    #[test]
    fn display_masks_sentinels() {
        let req = ClientRequest::default();
        let text = req.to_string();
        assert!(text.contains("type:INVALID"));
        assert!(text.contains("client:INVALID"));

        let update = MarketUpdate {
            kind: UpdateKind::Trade,
            ticker_id: 3,
            side: Side::Buy,
            price: 50,
            qty: 100,
            ..MarketUpdate::default()
        };
        let text = update.to_string();
        assert!(text.contains("type:TRADE"));
        assert!(text.contains("oid:INVALID"));
        assert!(text.contains("price:50"));
    }
}
