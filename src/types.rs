//! Shared identifier types, the `Side` enum and the process-wide capacity
//! constants.
//!
//! Every capacity here is part of the wire contract: the exchange and the
//! participants must agree on them, so they are compile-time constants rather
//! than configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange-assigned or client-assigned order identifier.
pub type OrderId = u64;
/// Trading instrument identifier. Books, position slots and risk rows are
/// directly indexable by this value.
pub type TickerId = u32;
/// Market participant identifier.
pub type ClientId = u32;
/// Price in integer ticks.
pub type Price = i64;
/// Order quantity.
pub type Qty = u32;
/// Time priority within a price level; monotonically assigned on acceptance.
pub type Priority = u64;
/// Nanoseconds since the Unix epoch.
pub type Nanos = u64;

/// Sentinel for "no order".
pub const INVALID_ORDER_ID: OrderId = OrderId::MAX;
/// Sentinel for "no instrument".
pub const INVALID_TICKER_ID: TickerId = TickerId::MAX;
/// Sentinel for "no client".
pub const INVALID_CLIENT_ID: ClientId = ClientId::MAX;
/// Sentinel for "no price".
pub const INVALID_PRICE: Price = Price::MAX;
/// Sentinel for "no quantity".
pub const INVALID_QTY: Qty = Qty::MAX;
/// Sentinel for "no priority".
pub const INVALID_PRIORITY: Priority = Priority::MAX;

/// Number of trading instruments supported by the exchange.
pub const MAX_TICKERS: usize = 8;
/// Capacity of the client-request and client-response rings: the most
/// unprocessed requests (and unpublished responses) that can be in flight.
pub const MAX_CLIENT_UPDATES: usize = 256 * 1024;
/// Capacity of the market-update rings.
pub const MAX_MARKET_UPDATES: usize = 256 * 1024;
/// Maximum number of simultaneous market participants.
pub const MAX_CLIENTS: usize = 256;
/// Maximum live orders per instrument.
pub const MAX_ORDER_IDS: usize = 128 * 1024;
/// Maximum price levels per book side.
pub const MAX_PRICE_LEVELS: usize = 256;
/// Maximum client requests the FIFO sequencer can hold within one poll batch.
pub const MAX_PENDING_REQUESTS: usize = 1024;

/// Order side as carried on the wire: `Buy = 1`, `Sell = -1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum Side {
    /// Not a valid side; only ever seen in rejects and sentinels.
    Invalid = 0,
    /// Bid side.
    Buy = 1,
    /// Ask side.
    Sell = -1,
}

impl Side {
    /// Wire representation (`i8`).
    #[inline]
    pub const fn to_wire(self) -> i8 {
        self as i8
    }

    /// Decode the wire representation, mapping unknown values to `Invalid`.
    #[inline]
    pub const fn from_wire(v: i8) -> Side {
        match v {
            1 => Side::Buy,
            -1 => Side::Sell,
            _ => Side::Invalid,
        }
    }

    /// The opposing side; `Invalid` stays `Invalid`.
    #[inline]
    pub const fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
            Side::Invalid => Side::Invalid,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
            Side::Invalid => "INVALID",
        })
    }
}

/// Formats an id-like value, printing `INVALID` for its sentinel.
///
/// Used by the `Display` impls of the wire records so logs stay readable.
pub(crate) struct OrInvalid<T>(pub T, pub T);

impl<T: PartialEq + fmt::Display> fmt::Display for OrInvalid<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == self.1 {
            f.write_str("INVALID")
        } else {
            self.0.fmt(f)
        }
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
#[inline]
pub fn now_nanos() -> Nanos {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as Nanos)
        .unwrap_or(0)
}
