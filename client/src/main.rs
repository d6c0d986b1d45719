//! Client binary entry point: CLI parsing, logging setup, and a log-only
//! message/connection loop. There is no rendering or input capture in this
//! codebase's scope — this binary exists to prove the wire protocol works
//! end to end and to give a real counterpart for the server's session tests.

mod network;

use clap::Parser;
use log::info;
use network::Client;
use std::io::{self, BufRead};

/// Capture-the-flag arena client.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address in "host:port" form.
    #[arg(short = 's', long, default_value = "127.0.0.1:12345")]
    server: String,
}

fn main() -> std::io::Result<()> {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info (or debug) to see client logs.");
    }

    let args = Args::parse();

    info!("Connecting to {}", args.server);
    let client = Client::connect(&args.server)?;

    client.set_connection_callback(|connected| {
        if connected {
            info!("Connected to server");
        } else {
            info!("Disconnected from server");
        }
    });
    client.set_message_callback(|message| {
        info!("Received: {message:?}");
    });

    info!("Type 'start' to request game start, 'x,y' to send input, or 'quit' to exit.");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") {
            break;
        }
        if line.eq_ignore_ascii_case("start") {
            if let Err(err) = client.send_message(&shared::Message::RequestStartGame) {
                log::warn!("failed to request game start: {err}");
            }
            continue;
        }
        match parse_input(line) {
            Some((x, y)) => client.send_player_input(x, y),
            None => info!("unrecognized command: {line}"),
        }
    }

    client.disconnect();
    Ok(())
}

fn parse_input(line: &str) -> Option<(f32, f32)> {
    let (x, y) = line.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}
