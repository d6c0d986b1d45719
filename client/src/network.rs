//! Thin client network shell: connect, frame, send/receive, and forward
//! decoded messages to caller-supplied callbacks. Everything past the wire
//! contract (rendering, input capture, prediction) is out of scope for this
//! codebase; this module exists purely so a consumer (a GUI shell, a test
//! harness, or `main`'s own log lines) can talk to [`server::network::Server`].

use log::{info, warn};
use shared::{decode_message, encode_message, frame, try_extract_message, Message};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Sentinel stored in `player_id` before `PLAYER_JOINED` has been received.
const UNASSIGNED_PLAYER_ID: u32 = 0;

type MessageCallback = Box<dyn Fn(Message) + Send + Sync>;
type ConnectionCallback = Box<dyn Fn(bool) + Send + Sync>;

/// A connected (or connecting) client session.
///
/// Intercepts `PLAYER_JOINED` (to latch the assigned id for
/// [`Client::send_player_input`]) and `SERVER_SHUTDOWN` (to trigger local
/// disconnect) before forwarding everything else to `on_message`.
pub struct Client {
    stream: TcpStream,
    running: Arc<AtomicBool>,
    player_id: Arc<AtomicU32>,
    on_message: Arc<Mutex<Option<MessageCallback>>>,
    on_connection_changed: Arc<Mutex<Option<ConnectionCallback>>>,
    receive_worker: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connects to `addr` (`host:port`) and starts the receive loop on its
    /// own worker thread.
    pub fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        info!("Connected successfully to {addr}");

        let client = Self {
            stream: stream.try_clone()?,
            running: Arc::new(AtomicBool::new(true)),
            player_id: Arc::new(AtomicU32::new(UNASSIGNED_PLAYER_ID)),
            on_message: Arc::new(Mutex::new(None)),
            on_connection_changed: Arc::new(Mutex::new(None)),
            receive_worker: Mutex::new(None),
        };

        if let Some(callback) = client.on_connection_changed.lock().unwrap().as_ref() {
            callback(true);
        }

        let running = Arc::clone(&client.running);
        let player_id = Arc::clone(&client.player_id);
        let on_message = Arc::clone(&client.on_message);
        let on_connection_changed = Arc::clone(&client.on_connection_changed);
        let mut worker_stream = stream;
        let handle = thread::spawn(move || {
            receive_loop(
                &mut worker_stream,
                &running,
                &player_id,
                &on_message,
                &on_connection_changed,
            );
        });
        *client.receive_worker.lock().unwrap() = Some(handle);

        Ok(client)
    }

    /// Registers the callback invoked with every decoded message that isn't
    /// intercepted internally (everything except `PLAYER_JOINED`/`SERVER_SHUTDOWN`).
    pub fn set_message_callback(&self, callback: impl Fn(Message) + Send + Sync + 'static) {
        *self.on_message.lock().unwrap() = Some(Box::new(callback));
    }

    /// Registers the callback invoked on connect and on disconnect.
    pub fn set_connection_callback(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        *self.on_connection_changed.lock().unwrap() = Some(Box::new(callback));
    }

    /// The id latched from the server's `PLAYER_JOINED`, or `None` if it
    /// hasn't arrived yet.
    pub fn player_id(&self) -> Option<u32> {
        match self.player_id.load(Ordering::SeqCst) {
            UNASSIGNED_PLAYER_ID => None,
            id => Some(id),
        }
    }

    /// Frames and sends one message, looping `send` until every byte is
    /// written (partial-send-safe).
    pub fn send_message(&self, message: &Message) -> std::io::Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            warn!("cannot send: not connected");
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "client is not connected",
            ));
        }
        let bytes = frame(&encode_message(message));
        (&self.stream).write_all(&bytes)
    }

    /// Sends a `PLAYER_INPUT` using the latched player id. A no-op (logged)
    /// if `PLAYER_JOINED` hasn't arrived yet.
    pub fn send_player_input(&self, input_x: f32, input_y: f32) {
        let Some(player_id) = self.player_id() else {
            warn!("cannot send input before PLAYER_JOINED has been received");
            return;
        };
        let message = Message::PlayerInput {
            player_id,
            input_x,
            input_y,
        };
        if let Err(err) = self.send_message(&message) {
            warn!("failed to send player input: {err}");
        }
    }

    /// Disconnects, closing the socket in both directions and joining the
    /// receive worker (detaching instead if called from inside that worker,
    /// since a thread cannot join itself).
    pub fn disconnect(&self) {
        info!("Disconnecting from server");
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stream.shutdown(Shutdown::Both);

        let mut worker = self.receive_worker.lock().unwrap();
        if let Some(handle) = worker.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            // else: called from inside the receive worker's own thread
            // (e.g. reacting to SERVER_SHUTDOWN); drop the handle instead of
            // joining it, since a thread can never join itself.
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn receive_loop(
    stream: &mut TcpStream,
    running: &Arc<AtomicBool>,
    player_id: &Arc<AtomicU32>,
    on_message: &Arc<Mutex<Option<MessageCallback>>>,
    on_connection_changed: &Arc<Mutex<Option<ConnectionCallback>>>,
) {
    let mut receive_buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    while running.load(Ordering::SeqCst) {
        match stream.read(&mut chunk) {
            Ok(0) => {
                info!("Server disconnected");
                running.store(false, Ordering::SeqCst);
                if let Some(callback) = on_connection_changed.lock().unwrap().as_ref() {
                    callback(false);
                }
                break;
            }
            Ok(n) => {
                receive_buffer.extend_from_slice(&chunk[..n]);
                while let Some(payload) = try_extract_message(&mut receive_buffer) {
                    match decode_message(&payload) {
                        Ok(Message::PlayerJoined(id)) => {
                            player_id.store(id, Ordering::SeqCst);
                        }
                        Ok(Message::ServerShutdown) => {
                            running.store(false, Ordering::SeqCst);
                            let _ = stream.shutdown(Shutdown::Both);
                            return;
                        }
                        Ok(message) => {
                            if let Some(callback) = on_message.lock().unwrap().as_ref() {
                                callback(message);
                            }
                        }
                        Err(err) => warn!("received an unrecognized message: {err}"),
                    }
                }
            }
            Err(_) if !running.load(Ordering::SeqCst) => break,
            Err(err) => {
                warn!("read error: {err}");
                running.store(false, Ordering::SeqCst);
                if let Some(callback) = on_connection_changed.lock().unwrap().as_ref() {
                    callback(false);
                }
                break;
            }
        }
    }
    info!("Receive loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn player_joined_is_latched_not_forwarded() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server_thread = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let bytes = frame(&encode_message(&Message::PlayerJoined(7)));
            socket.write_all(&bytes).unwrap();
            thread::sleep(std::time::Duration::from_millis(50));
        });

        let client = Client::connect(&addr.to_string()).unwrap();
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let forwarded_clone = Arc::clone(&forwarded);
        client.set_message_callback(move |msg| forwarded_clone.lock().unwrap().push(msg));

        for _ in 0..100 {
            if client.player_id() == Some(7) {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(client.player_id(), Some(7));
        assert!(forwarded.lock().unwrap().is_empty());

        server_thread.join().unwrap();
    }

    #[test]
    fn server_shutdown_triggers_local_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server_thread = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let bytes = frame(&encode_message(&Message::ServerShutdown));
            socket.write_all(&bytes).unwrap();
            thread::sleep(std::time::Duration::from_millis(50));
        });

        let client = Client::connect(&addr.to_string()).unwrap();
        let connected = Arc::new(Mutex::new(true));
        let connected_clone = Arc::clone(&connected);
        client.set_connection_callback(move |is_connected| {
            *connected_clone.lock().unwrap() = is_connected;
        });

        for _ in 0..100 {
            if !*connected.lock().unwrap() {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(10));
        }

        server_thread.join().unwrap();
    }
}
