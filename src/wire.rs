//! Packed little-endian wire records and stream framing.
//!
//! Both external interfaces carry fixed-width records: the order gateway
//! frames its TCP byte stream by record size, and every market-data datagram
//! holds exactly one [`MdpMarketUpdateMsg`]. The structs here are
//! `#[repr(C, packed)]` with explicit little-endian integers so a record can
//! be read straight out of a receive buffer with `zerocopy`, no parsing.

use crate::msg::{ClientRequest, ClientResponse, MarketUpdate, RequestKind, ResponseKind, SequencedUpdate, UpdateKind};
use crate::types::Side;
use thiserror::Error;
use zerocopy::byteorder::little_endian::{I64, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Decode failures on inbound byte streams.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes than one full record.
    #[error("short record: need {need} bytes, have {have}")]
    Short {
        /// Record size required.
        need: usize,
        /// Bytes available.
        have: usize,
    },
}

/// Order request record inside [`OmClientRequestMsg`].
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct ClientRequestMsg {
    pub kind: u8,
    pub client_id: U32,
    pub ticker_id: U32,
    pub order_id: U64,
    pub side: i8,
    pub price: I64,
    pub qty: U32,
}

/// Inbound order-gateway record: per-session sequence number plus request.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct OmClientRequestMsg {
    pub seq_num: U64,
    pub request: ClientRequestMsg,
}

/// Response record inside [`OmClientResponseMsg`].
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct ClientResponseMsg {
    pub kind: u8,
    pub client_id: U32,
    pub ticker_id: U32,
    pub client_order_id: U64,
    pub market_order_id: U64,
    pub side: i8,
    pub price: I64,
    pub exec_qty: U32,
    pub leaves_qty: U32,
}

/// Outbound order-gateway record: per-session sequence number plus response.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct OmClientResponseMsg {
    pub seq_num: U64,
    pub response: ClientResponseMsg,
}

/// Market update record inside [`MdpMarketUpdateMsg`].
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct MarketUpdateMsg {
    pub kind: u8,
    pub order_id: U64,
    pub ticker_id: U32,
    pub side: i8,
    pub price: I64,
    pub qty: U32,
    pub priority: U64,
}

/// Market-data datagram payload: stream sequence number plus update.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct MdpMarketUpdateMsg {
    pub seq_num: U64,
    pub update: MarketUpdateMsg,
}

const _: () = assert!(size_of::<ClientRequestMsg>() == 30);
const _: () = assert!(size_of::<OmClientRequestMsg>() == 38);
const _: () = assert!(size_of::<ClientResponseMsg>() == 42);
const _: () = assert!(size_of::<OmClientResponseMsg>() == 50);
const _: () = assert!(size_of::<MarketUpdateMsg>() == 34);
const _: () = assert!(size_of::<MdpMarketUpdateMsg>() == 42);

impl From<ClientRequest> for ClientRequestMsg {
    fn from(r: ClientRequest) -> Self {
        ClientRequestMsg {
            kind: r.kind.to_wire(),
            client_id: U32::new(r.client_id),
            ticker_id: U32::new(r.ticker_id),
            order_id: U64::new(r.order_id),
            side: r.side.to_wire(),
            price: I64::new(r.price),
            qty: U32::new(r.qty),
        }
    }
}

impl From<ClientRequestMsg> for ClientRequest {
    fn from(m: ClientRequestMsg) -> Self {
        ClientRequest {
            kind: RequestKind::from_wire(m.kind),
            client_id: m.client_id.get(),
            ticker_id: m.ticker_id.get(),
            order_id: m.order_id.get(),
            side: Side::from_wire(m.side),
            price: m.price.get(),
            qty: m.qty.get(),
        }
    }
}

impl From<ClientResponse> for ClientResponseMsg {
    fn from(r: ClientResponse) -> Self {
        ClientResponseMsg {
            kind: r.kind.to_wire(),
            client_id: U32::new(r.client_id),
            ticker_id: U32::new(r.ticker_id),
            client_order_id: U64::new(r.client_order_id),
            market_order_id: U64::new(r.market_order_id),
            side: r.side.to_wire(),
            price: I64::new(r.price),
            exec_qty: U32::new(r.exec_qty),
            leaves_qty: U32::new(r.leaves_qty),
        }
    }
}

impl From<ClientResponseMsg> for ClientResponse {
    fn from(m: ClientResponseMsg) -> Self {
        ClientResponse {
            kind: ResponseKind::from_wire(m.kind),
            client_id: m.client_id.get(),
            ticker_id: m.ticker_id.get(),
            client_order_id: m.client_order_id.get(),
            market_order_id: m.market_order_id.get(),
            side: Side::from_wire(m.side),
            price: m.price.get(),
            exec_qty: m.exec_qty.get(),
            leaves_qty: m.leaves_qty.get(),
        }
    }
}

impl From<MarketUpdate> for MarketUpdateMsg {
    fn from(u: MarketUpdate) -> Self {
        MarketUpdateMsg {
            kind: u.kind.to_wire(),
            order_id: U64::new(u.order_id),
            ticker_id: U32::new(u.ticker_id),
            side: u.side.to_wire(),
            price: I64::new(u.price),
            qty: U32::new(u.qty),
            priority: U64::new(u.priority),
        }
    }
}

impl From<MarketUpdateMsg> for MarketUpdate {
    fn from(m: MarketUpdateMsg) -> Self {
        MarketUpdate {
            kind: UpdateKind::from_wire(m.kind),
            order_id: m.order_id.get(),
            ticker_id: m.ticker_id.get(),
            side: Side::from_wire(m.side),
            price: m.price.get(),
            qty: m.qty.get(),
            priority: m.priority.get(),
        }
    }
}

impl From<SequencedUpdate> for MdpMarketUpdateMsg {
    fn from(s: SequencedUpdate) -> Self {
        MdpMarketUpdateMsg {
            seq_num: U64::new(s.seq_num),
            update: s.update.into(),
        }
    }
}

impl From<MdpMarketUpdateMsg> for SequencedUpdate {
    fn from(m: MdpMarketUpdateMsg) -> Self {
        SequencedUpdate {
            seq_num: m.seq_num.get(),
            update: m.update.into(),
        }
    }
}

/// Reads one fixed-width record from the front of `bytes`.
pub fn decode<M>(bytes: &[u8]) -> Result<M, WireError>
where
    M: FromBytes + KnownLayout + Immutable + Unaligned + Copy,
{
    let need = size_of::<M>();
    if bytes.len() < need {
        return Err(WireError::Short {
            need,
            have: bytes.len(),
        });
    }
    // Length was checked; Unaligned removes any alignment requirement.
    Ok(M::read_from_bytes(&bytes[..need]).expect("sized read cannot fail"))
}

/// Iterator over the complete records at the front of a byte stream.
///
/// After iteration, [`Records::consumed`] reports how many bytes were decoded
/// so the caller can shift its reassembly buffer; a trailing partial record
/// stays in place for the next read.
pub struct Records<'a, M> {
    bytes: &'a [u8],
    consumed: usize,
    _marker: std::marker::PhantomData<M>,
}

impl<'a, M> Records<'a, M>
where
    M: FromBytes + KnownLayout + Immutable + Unaligned + Copy,
{
    /// Frames `bytes` into records of type `M`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Records {
            bytes,
            consumed: 0,
            _marker: std::marker::PhantomData,
        }
    }

    /// Bytes decoded so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

impl<'a, M> Iterator for Records<'a, M>
where
    M: FromBytes + KnownLayout + Immutable + Unaligned + Copy,
{
    type Item = M;

    fn next(&mut self) -> Option<M> {
        let rest = &self.bytes[self.consumed..];
        match decode::<M>(rest) {
            Ok(msg) => {
                self.consumed += size_of::<M>();
                Some(msg)
            }
            Err(WireError::Short { .. }) => None,
        }
    }
}
