//! Participant-side order gateway: one TCP session to the exchange.
//!
//! Outbound, it drains the strategy's request ring and frames each request
//! with this session's outgoing sequence number. Inbound, it reassembles
//! framed responses, drops anything with the wrong client id or sequence
//! number, and forwards the rest to the strategy's response ring.

use crate::msg::{ClientRequest, ClientResponse};
use crate::net::NetError;
use crate::net::tcp::{RecvStatus, TcpConn};
use crate::spsc::{Consumer, Producer};
use crate::types::ClientId;
use crate::wire::{OmClientRequestMsg, OmClientResponseMsg, Records};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};
use zerocopy::IntoBytes;
use zerocopy::byteorder::little_endian::U64;

/// TCP client session carrying one participant's order flow.
pub struct OrderGateway {
    client_id: ClientId,
    conn: TcpConn,
    requests: Consumer<ClientRequest>,
    responses: Producer<ClientResponse>,
    /// Sequence stamped on the next outbound request. Starts at 1.
    next_out_seq: u64,
    /// Sequence expected on the next inbound response. Starts at 1.
    next_exp_seq: u64,
    run: Arc<AtomicBool>,
}

impl OrderGateway {
    /// Connects to the exchange's order gateway at `addr`.
    pub fn connect(
        client_id: ClientId,
        addr: SocketAddr,
        requests: Consumer<ClientRequest>,
        responses: Producer<ClientResponse>,
        run: Arc<AtomicBool>,
    ) -> Result<Self, NetError> {
        let conn = TcpConn::connect(addr)?;
        debug!(client_id, %addr, "order gateway connected");
        Ok(OrderGateway {
            client_id,
            conn,
            requests,
            responses,
            next_out_seq: 1,
            next_exp_seq: 1,
            run,
        })
    }

    /// Validates one framed response; forwards it when it belongs to this
    /// session and carries the expected sequence number.
    fn handle_response(&mut self, record: OmClientResponseMsg) {
        let response: ClientResponse = record.response.into();
        if response.client_id != self.client_id {
            warn!(
                expected = self.client_id,
                received = response.client_id,
                "response for another client"
            );
            return;
        }
        let seq_num = record.seq_num.get();
        if seq_num != self.next_exp_seq {
            warn!(
                expected = self.next_exp_seq,
                received = seq_num,
                "bad outbound sequence number from exchange"
            );
            return;
        }
        self.next_exp_seq += 1;
        trace!(%response, "gateway response");
        self.responses.push(response);
    }

    /// One receive/send cycle.
    pub fn poll_once(&mut self) {
        match self.conn.recv() {
            RecvStatus::Data(..) => {
                let mut records = Records::<OmClientResponseMsg>::new(self.conn.buffer());
                let batch: Vec<OmClientResponseMsg> = records.by_ref().collect();
                let consumed = records.consumed();
                self.conn.consume(consumed);
                for record in batch {
                    self.handle_response(record);
                }
            }
            RecvStatus::WouldBlock => {}
            RecvStatus::Disconnected => {
                warn!(client_id = self.client_id, "exchange closed the session");
                self.run.store(false, Ordering::Release);
                return;
            }
        }

        while let Some(request) = self.requests.pop() {
            let framed = OmClientRequestMsg {
                seq_num: U64::new(self.next_out_seq),
                request: request.into(),
            };
            trace!(seq = self.next_out_seq, %request, "gateway request");
            self.conn.stage(framed.as_bytes());
            self.next_out_seq += 1;
        }
        self.conn.flush();
    }

    /// Busy-spins until the run flag drops, then flushes once more.
    pub fn run(&mut self) {
        debug!(client_id = self.client_id, "order gateway running");
        while self.run.load(Ordering::Acquire) {
            self.poll_once();
        }
        self.poll_once();
        debug!(client_id = self.client_id, "order gateway stopped");
    }

    /// Moves the gateway onto its own named thread.
    pub fn spawn(mut self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("trading-order-gw".into())
            .spawn(move || self.run())
            .expect("spawn order gateway thread")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{RequestKind, ResponseKind};
    use crate::spsc;
    use crate::types::Side;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    fn gateway_pair() -> (OrderGateway, std::net::TcpStream, Consumer<ClientResponse>, Producer<ClientRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (req_tx, req_rx) = spsc::ring(16);
        let (resp_tx, resp_rx) = spsc::ring(16);
        let gw = OrderGateway::connect(
            7,
            addr,
            req_rx,
            resp_tx,
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap();
        let (exchange_side, _) = listener.accept().unwrap();
        exchange_side
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        (gw, exchange_side, resp_rx, req_tx)
    }

    fn response(seq: u64, client: u32) -> OmClientResponseMsg {
        OmClientResponseMsg {
            seq_num: U64::new(seq),
            response: ClientResponse {
                kind: ResponseKind::Accepted,
                client_id: client,
                ticker_id: 0,
                client_order_id: 1,
                market_order_id: 9,
                side: Side::Buy,
                price: 50,
                exec_qty: 0,
                leaves_qty: 10,
            }
            .into(),
        }
    }

    #[test]
    fn requests_are_framed_with_increasing_sequences() {
        let (mut gw, mut exchange, _resp_rx, mut req_tx) = gateway_pair();
        for oid in [5u64, 6] {
            req_tx.push(ClientRequest {
                kind: RequestKind::New,
                client_id: 7,
                ticker_id: 0,
                order_id: oid,
                side: Side::Buy,
                price: 50,
                qty: 10,
            });
        }
        gw.poll_once();

        let mut buf = vec![0u8; 2 * size_of::<OmClientRequestMsg>()];
        exchange.read_exact(&mut buf).unwrap();
        let mut records = Records::<OmClientRequestMsg>::new(&buf);
        let first = records.next().unwrap();
        let second = records.next().unwrap();
        assert_eq!(first.seq_num.get(), 1);
        assert_eq!(first.request.order_id.get(), 5);
        assert_eq!(second.seq_num.get(), 2);
        assert_eq!(second.request.order_id.get(), 6);
    }

    #[test]
    fn responses_are_validated_and_forwarded() {
        let (mut gw, mut exchange, mut resp_rx, _req_tx) = gateway_pair();
        exchange.write_all(response(1, 7).as_bytes()).unwrap();
        exchange.write_all(response(2, 99).as_bytes()).unwrap(); // wrong client
        exchange.write_all(response(5, 7).as_bytes()).unwrap(); // wrong seq
        exchange.write_all(response(2, 7).as_bytes()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while resp_rx.len() < 2 {
            assert!(Instant::now() < deadline, "gateway test timed out");
            gw.poll_once();
        }
        assert_eq!(resp_rx.pop().unwrap().kind, ResponseKind::Accepted);
        assert_eq!(resp_rx.pop().unwrap().kind, ResponseKind::Accepted);
        assert!(resp_rx.pop().is_none());
    }

    #[test]
    fn disconnect_drops_the_run_flag() {
        let (mut gw, exchange, _resp_rx, _req_tx) = gateway_pair();
        let run = Arc::clone(&gw.run);
        drop(exchange);
        let deadline = Instant::now() + Duration::from_secs(5);
        while run.load(Ordering::Acquire) {
            assert!(Instant::now() < deadline, "disconnect test timed out");
            gw.poll_once();
        }
    }
}
