//! Exchange process: wires the matching engine, order gateway and
//! market-data pipeline together and runs until interrupted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tickmatch::exchange::engine::MatchingEngine;
use tickmatch::exchange::order_server::OrderServer;
use tickmatch::exchange::publisher::MarketDataPublisher;
use tickmatch::exchange::snapshot::SnapshotSynthesizer;
use tickmatch::spsc;
use tickmatch::types::{MAX_CLIENT_UPDATES, MAX_MARKET_UPDATES};
use tickmatch::ExchangeConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Set from the SIGINT handler; the only thing it does.
static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signal: libc::c_int) {
    STOP.store(true, Ordering::Release);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ExchangeConfig::from_file(&path).unwrap_or_else(|e| {
            eprintln!("cannot load config {path}: {e}");
            std::process::exit(1);
        }),
        None => ExchangeConfig::default(),
    };
    info!(?config, "starting exchange");

    let handler = on_sigint as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }

    let run = Arc::new(AtomicBool::new(true));
    let (request_tx, request_rx) = spsc::ring(MAX_CLIENT_UPDATES);
    let (response_tx, response_rx) = spsc::ring(MAX_CLIENT_UPDATES);
    let (update_tx, update_rx) = spsc::ring(MAX_MARKET_UPDATES);
    let (snapshot_tx, snapshot_rx) = spsc::ring(MAX_MARKET_UPDATES);

    let engine = MatchingEngine::new(request_rx, response_tx, update_tx, Arc::clone(&run));

    let publisher = MarketDataPublisher::new(
        config.incremental_group,
        config.incremental_port,
        update_rx,
        snapshot_tx,
        Arc::clone(&run),
    )
    .expect("create market data publisher");

    let synthesizer = SnapshotSynthesizer::new(
        config.snapshot_group,
        config.snapshot_port,
        snapshot_rx,
        Duration::from_secs(config.snapshot_interval_secs),
        Arc::clone(&run),
    )
    .expect("create snapshot synthesizer");

    let order_server = OrderServer::new(
        config.order_gateway,
        request_tx,
        response_rx,
        Arc::clone(&run),
    )
    .expect("bind order gateway");

    let handles = [
        engine.spawn(),
        publisher.spawn(),
        synthesizer.spawn(),
        order_server.spawn(),
    ];
    info!("exchange up");

    while !STOP.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    run.store(false, Ordering::Release);
    for handle in handles {
        let _ = handle.join();
    }
    info!("exchange stopped");
}
