use crate::error::Result;
use crate::types::{CompactState, VisualState};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use sha1_smol::Sha1;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Combined HTTP + WebSocket server.
///
/// - `GET /` or `GET /visualization.html` → the visualization page
/// - WebSocket upgrade → CompactState JSON, throttled to `target_fps`
/// - anything else → 404
///
/// A client that connects mid-session is sent the current picture straight away.
pub struct WsServer {
    state_rx: Receiver<VisualState>,
    addr: String,
    target_fps: u32,
    viz_path: PathBuf,
}

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

struct WsClient {
    stream: TcpStream,
    alive: bool,
}

impl WsClient {
    fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nonblocking(true);
        let _ = stream.set_nodelay(true);
        Self {
            stream,
            alive: true,
        }
    }

    fn send_text(&mut self, text: &str) {
        if self.stream.write_all(&text_frame(text)).is_err() {
            self.alive = false;
        }
    }
}

type ClientList = Arc<Mutex<Vec<WsClient>>>;
type LatestJson = Arc<Mutex<Option<String>>>;

/// Unmasked single-frame text message (server → client).
fn text_frame(text: &str) -> Vec<u8> {
    let payload = text.as_bytes();
    let len = payload.len();
    let mut frame = Vec::with_capacity(len + 10);
    frame.push(0x81); // FIN + text opcode
    match len {
        0..=125 => frame.push(len as u8),
        126..=0xFFFF => {
            frame.push(126);
            frame.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ => {
            frame.push(127);
            frame.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }
    frame.extend_from_slice(payload);
    frame
}

// ─── HTTP side ──────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Request {
    Upgrade { key: String },
    Get { path: String },
}

/// Read the request head. An upgrade without a key is treated as a plain GET.
fn read_request<R: BufRead>(reader: &mut R) -> std::io::Result<Request> {
    let mut path = String::from("/");
    let mut upgrade = false;
    let mut key = None;
    let mut line = String::new();
    let mut first = true;

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            break;
        }
        if first {
            // "GET /path HTTP/1.1"
            if let Some(p) = text.split_whitespace().nth(1) {
                path = p.to_string();
            }
            first = false;
            continue;
        }
        let Some((name, value)) = text.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "upgrade" => upgrade = value.eq_ignore_ascii_case("websocket"),
            "sec-websocket-key" => key = Some(value.to_string()),
            _ => {}
        }
    }

    Ok(match (upgrade, key) {
        (true, Some(key)) => Request::Upgrade { key },
        _ => Request::Get { path },
    })
}

fn is_page(path: &str) -> bool {
    matches!(path, "/" | "/index.html" | "/visualization.html")
}

fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64_encode(&hasher.digest().bytes())
}

fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\nCache-Control: no-cache\r\n\r\n",
        status,
        content_type,
        body.len()
    );
    if stream.write_all(head.as_bytes()).and_then(|_| stream.write_all(body)).is_err() {
        debug!("Client went away mid-response");
    }
}

fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let mut buf = [0u8; 3];
        buf[..chunk.len()].copy_from_slice(chunk);
        let n = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
        for i in 0..4 {
            if i <= chunk.len() {
                out.push(ALPHABET[(n >> (18 - 6 * i) & 0x3F) as usize] as char);
            } else {
                out.push('=');
            }
        }
    }
    out
}

fn handle_connection(mut stream: TcpStream, page: &[u8], clients: &ClientList, latest: &LatestJson) {
    let request = match stream.try_clone().and_then(|s| read_request(&mut BufReader::new(s))) {
        Ok(r) => r,
        Err(e) => {
            warn!("Request parse error: {}", e);
            return;
        }
    };

    match request {
        Request::Upgrade { key } => {
            let head = format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
                accept_key(&key)
            );
            if let Err(e) = stream.write_all(head.as_bytes()) {
                warn!("WS handshake failed: {}", e);
                return;
            }
            info!("WebSocket client connected");
            let mut client = WsClient::new(stream);
            if let Some(json) = latest.lock().ok().and_then(|l| l.clone()) {
                client.send_text(&json);
            }
            if let Ok(mut cl) = clients.lock() {
                cl.push(client);
            }
        }
        Request::Get { path } if is_page(&path) && !page.is_empty() => {
            respond(&mut stream, "200 OK", "text/html; charset=utf-8", page);
        }
        Request::Get { path } => {
            debug!("404 {}", path);
            respond(
                &mut stream,
                "404 Not Found",
                "text/html",
                b"<h1>404</h1><p>Open <a href=\"/\">/</a> for the visualization</p>",
            );
        }
    }
}

impl WsServer {
    pub fn new(
        state_rx: Receiver<VisualState>,
        addr: String,
        target_fps: u32,
        viz_path: PathBuf,
    ) -> Self {
        Self {
            state_rx,
            addr,
            target_fps,
            viz_path,
        }
    }

    /// Serve until the coordinator stops publishing.
    pub fn run(self) -> Result<()> {
        let clients: ClientList = Arc::new(Mutex::new(Vec::new()));
        let latest: LatestJson = Arc::new(Mutex::new(None));

        let page = match fs::read(&self.viz_path) {
            Ok(data) => {
                info!(
                    "Loaded visualization: {} ({} bytes)",
                    self.viz_path.display(),
                    data.len()
                );
                Arc::new(data)
            }
            Err(e) => {
                warn!(
                    "Could not load {}: {}, only WebSocket streaming available",
                    self.viz_path.display(),
                    e
                );
                Arc::new(Vec::new())
            }
        };

        let listener = TcpListener::bind(&self.addr)?;
        info!("Server listening on http://{}", self.addr);

        let accept_clients = clients.clone();
        let accept_latest = latest.clone();
        thread::Builder::new()
            .name("ws-accept".into())
            .spawn(move || {
                for stream in listener.incoming() {
                    match stream {
                        Ok(stream) => {
                            let page = page.clone();
                            let cl = accept_clients.clone();
                            let last = accept_latest.clone();
                            // HTTP connections close immediately; WS
                            // connections move to the client list.
                            thread::spawn(move || handle_connection(stream, &page, &cl, &last));
                        }
                        Err(e) => warn!("TCP accept error: {}", e),
                    }
                }
            })?;

        // Throttle to target_fps, but never leave the newest snapshot unsent
        // once the input goes quiet.
        let frame_interval = Duration::from_micros(1_000_000 / self.target_fps.max(1) as u64);
        let mut last_send: Option<Instant> = None;
        let mut pending: Option<VisualState> = None;

        loop {
            let wait = match pending {
                Some(_) => last_send.map_or(Duration::ZERO, |t| frame_interval.saturating_sub(t.elapsed())),
                None => Duration::from_secs(1),
            };
            match self.state_rx.recv_timeout(wait) {
                Ok(state) => pending = Some(state),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if last_send.is_some_and(|t| t.elapsed() < frame_interval) {
                continue;
            }
            let Some(state) = pending.take() else {
                continue;
            };
            last_send = Some(Instant::now());

            let json = match serde_json::to_string(&CompactState::from(&state)) {
                Ok(j) => j,
                Err(e) => {
                    warn!("JSON serialize error: {}", e);
                    continue;
                }
            };

            if let Ok(mut cl) = clients.lock() {
                for client in cl.iter_mut() {
                    client.send_text(&json);
                }
                cl.retain(|c| c.alive);
            }
            if let Ok(mut last) = latest.lock() {
                *last = Some(json);
            }
        }

        info!("WebSocket streamer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Request {
        read_request(&mut raw.as_bytes()).unwrap()
    }

    #[test]
    fn test_base64() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b"foob"), "Zm9vYg==");
    }

    #[test]
    fn test_accept_key_matches_rfc6455_example() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_upgrade_request() {
        let req = parse(
            "GET / HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        );
        assert_eq!(req, Request::Upgrade { key: "dGhlIHNhbXBsZSBub25jZQ==".into() });
    }

    #[test]
    fn test_plain_get_and_keyless_upgrade() {
        assert_eq!(
            parse("GET /visualization.html HTTP/1.1\r\nHost: x\r\n\r\n"),
            Request::Get { path: "/visualization.html".into() }
        );
        assert_eq!(
            parse("GET /ws HTTP/1.1\r\nUpgrade: websocket\r\n\r\n"),
            Request::Get { path: "/ws".into() }
        );
    }

    #[test]
    fn test_only_the_page_is_served() {
        assert!(is_page("/"));
        assert!(is_page("/visualization.html"));
        assert!(!is_page("/app.js"));
        assert!(!is_page("/../Cargo.toml"));
    }

    #[test]
    fn test_text_frame_lengths() {
        assert_eq!(text_frame("hi"), vec![0x81, 2, b'h', b'i']);
        let medium = "x".repeat(300);
        let f = text_frame(&medium);
        assert_eq!(&f[..4], &[0x81, 126, 0x01, 0x2C]);
        assert_eq!(f.len(), 304);
        let large = "x".repeat(70_000);
        let f = text_frame(&large);
        assert_eq!(f[1], 127);
        assert_eq!(&f[2..10], &70_000u64.to_be_bytes());
    }
}
