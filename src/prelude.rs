//! Convenience re-exports for downstream users.
//!
//! ```
//! use tickmatch::prelude::*;
//! ```

pub use crate::client::gateway::OrderGateway;
pub use crate::client::market_data::{Feed, MarketDataConsumer, StreamSynchronizer};
pub use crate::config::{ConfigError, ExchangeConfig, ParticipantConfig};
pub use crate::exchange::EventSink;
pub use crate::exchange::book::{Bbo, OrderBook};
pub use crate::exchange::engine::MatchingEngine;
pub use crate::exchange::order_server::OrderServer;
pub use crate::exchange::publisher::MarketDataPublisher;
pub use crate::exchange::sequencer::FifoSequencer;
pub use crate::exchange::snapshot::{SNAPSHOT_INTERVAL, SnapshotSynthesizer};
pub use crate::msg::{
    ClientRequest, ClientResponse, MarketUpdate, RequestKind, ResponseKind, SequencedUpdate,
    UpdateKind,
};
pub use crate::net::NetError;
pub use crate::spsc::{Consumer, Producer, ring};
pub use crate::types::{
    ClientId, MAX_CLIENTS, MAX_CLIENT_UPDATES, MAX_MARKET_UPDATES, MAX_ORDER_IDS,
    MAX_PENDING_REQUESTS, MAX_PRICE_LEVELS, MAX_TICKERS, Nanos, OrderId, Price, Priority, Qty,
    Side, TickerId,
};
