//! Server binary entry point: CLI parsing, logging setup, SIGINT/SIGTERM
//! handling, and the top-level `--server [port]` lifecycle.

use clap::Parser;
use log::info;
use server::network::Server;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Capture-the-flag arena server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on.
    #[arg(default_value_t = shared::DEFAULT_PORT)]
    port: u16,
}

fn main() -> ExitCode {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info (or debug) to see server logs.");
    }

    let args = Args::parse();

    let server = Server::new();
    if !server.init(args.port) {
        return ExitCode::FAILURE;
    }

    let running = Arc::new(AtomicBool::new(true));
    let signal_running = Arc::clone(&running);
    if let Err(err) = ctrlc::set_handler(move || {
        info!("Signal received, shutting down");
        signal_running.store(false, Ordering::SeqCst);
    }) {
        log::warn!("failed to install signal handler: {err}");
    }

    server.start(true);
    info!("Server running on port {}", args.port);
    info!("Waiting for a client to request game start");

    while running.load(Ordering::SeqCst) && server.is_running() {
        thread::sleep(Duration::from_secs(1));
    }

    server.stop();
    ExitCode::SUCCESS
}
