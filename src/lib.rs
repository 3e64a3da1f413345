//! # Tickmatch: an electronic trading core
//!
//! A compact exchange and market-participant core in Rust: a price/time
//! priority matching engine, a sequenced multicast market-data pipeline with
//! snapshot-based recovery, and a FIFO-fair TCP order gateway, all stitched
//! together by single-producer/single-consumer ring buffers.
//!
//! ## Architecture
//!
//! The exchange side runs four busy-spinning threads that share nothing but
//! rings:
//!
//! ```text
//! participants ──TCP──► OrderServer ──► FifoSequencer ──ring──► MatchingEngine
//!                            ▲                                    │        │
//!                            │responses                    ring───┘        └───ring
//!                            └────────────────────────────────┘                │
//!                                                                  MarketDataPublisher
//!                                                                       │        │
//!                                                               multicast      ring
//!                                                                (incr.)         │
//!                                                                    SnapshotSynthesizer
//!                                                                         │
//!                                                                   multicast (snap.)
//! ```
//!
//! The participant side mirrors it: a [`client::market_data::MarketDataConsumer`]
//! follows the incremental stream (recovering through the snapshot channel
//! after packet loss) and a [`client::gateway::OrderGateway`] carries order
//! flow over one TCP session.
//!
//! ## Building blocks
//!
//! - [`spsc`] — lock-free bounded SPSC rings; the only cross-thread channel
//!   in the system.
//! - [`pool`] — fixed-size object arenas with dense index handles; the order
//!   book's intrusive lists link through these indices, so the hot path is
//!   allocation-free and immune to dangling pointers.
//! - [`exchange::book`] — intrusive price/time-priority limit order book.
//! - [`exchange::sequencer`] — kernel-timestamp FIFO fairness across client
//!   sessions within a poll batch.
//! - [`exchange::snapshot`] / [`client::market_data`] — periodic snapshot
//!   synthesis and the consumer-side recovery protocol.
//! - [`wire`] — packed little-endian records; every interface is framed by
//!   fixed record size.
//!
//! ## Determinism
//!
//! A single engine thread owns every book and both output rings; requests
//! reach it in the receive-timestamp order the sequencer established, and the
//! publisher stamps a gap-free global sequence on every market update. Replay
//! the same request stream and you get the same fills, the same responses and
//! the same market data.
//!
//! ## What this crate is not
//!
//! No persistence, no authentication, no cross-venue routing, no fractional
//! prices (prices are integer ticks), and no atomic cancel-replace: model it
//! as cancel + new.

pub mod client;
pub mod config;
pub mod exchange;
pub mod msg;
pub mod net;
pub mod pool;
pub mod prelude;
pub mod spsc;
pub mod types;
pub mod wire;

pub use config::{ConfigError, ExchangeConfig, ParticipantConfig};
pub use exchange::EventSink;
pub use exchange::book::{Bbo, OrderBook};
pub use exchange::engine::MatchingEngine;
pub use msg::{
    ClientRequest, ClientResponse, MarketUpdate, RequestKind, ResponseKind, SequencedUpdate,
    UpdateKind,
};
pub use types::Side;
