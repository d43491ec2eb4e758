//! CoAP endpoint over UDP
//!
//! Dispatches incoming requests to registered [`PullResponder`]s, keeps the
//! Observe subscriber table, delivers notifications through
//! [`CoapNotifier`], and correlates responses to outbound requests.
//! Message encoding and decoding is done by `coap-lite`.
//!
//! ```text
//!   GET /dh/tmp (Observe: 0) ──► register observer ──► 2.05 "2345"
//!   Reporter ──► CoapNotifier::notify ──► NON 2.05 to every observer
//!   request() ──► CON ──► pending[token] ◄── ACK/CON response, RST
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coap_lite::{
    CoapOption, ContentFormat, MessageClass, MessageType, Packet, RequestType, ResponseType,
};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::publish::{NotifyError, PullResponder, PushNotifier};

/// Default CoAP UDP port
pub const COAP_PORT: u16 = 5683;

/// Observe subscriptions held at once
pub const MAX_OBSERVERS: usize = 2;

/// Largest datagram accepted
const MAX_DATAGRAM: usize = 1152;

/// Length of tokens generated for outbound requests
const TOKEN_LEN: usize = 4;

/// Observe sequence numbers are 24 bits
const OBSERVE_SEQ_MASK: u32 = 0x00ff_ffff;

const OBSERVE_REGISTER: u32 = 0;
const OBSERVE_DEREGISTER: u32 = 1;

/// Errors from an outbound request
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request encoding failed: {0}")]
    Encode(String),

    #[error("request send failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("request rejected with reset")]
    Reset,

    #[error("endpoint stopped")]
    Closed,
}

/// An Observe subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observer {
    pub peer: SocketAddr,
    pub token: Vec<u8>,
    pub path: String,
}

/// Bounded table of Observe subscriptions
#[derive(Debug, Default)]
struct ObserverTable {
    entries: heapless::Vec<Observer, MAX_OBSERVERS>,
    sequence: u32,
}

impl ObserverTable {
    /// Returns false when the table is full
    fn register(&mut self, observer: Observer) -> bool {
        self.entries
            .retain(|o| !(o.peer == observer.peer && o.path == observer.path));
        self.entries.push(observer).is_ok()
    }

    fn deregister(&mut self, peer: SocketAddr, path: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|o| !(o.peer == peer && o.path == path));
        self.entries.len() != before
    }

    fn drop_peer(&mut self, peer: SocketAddr) -> usize {
        let before = self.entries.len();
        self.entries.retain(|o| o.peer != peer);
        before - self.entries.len()
    }

    fn for_path(&self, path: &str) -> Vec<Observer> {
        self.entries
            .iter()
            .filter(|o| o.path == path)
            .cloned()
            .collect()
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = (self.sequence + 1) & OBSERVE_SEQ_MASK;
        self.sequence
    }
}

type Resources = HashMap<String, Arc<dyn PullResponder>>;
/// Outbound request awaiting its response, keyed by token
struct PendingRequest {
    peer: SocketAddr,
    message_id: u16,
    response_tx: oneshot::Sender<Result<Packet, RequestError>>,
}

type Pending = HashMap<Vec<u8>, PendingRequest>;

/// CoAP endpoint bound to a UDP socket
#[derive(Clone)]
pub struct CoapEndpoint {
    socket: Arc<UdpSocket>,
    resources: Arc<RwLock<Resources>>,
    observers: Arc<RwLock<ObserverTable>>,
    pending: Arc<Mutex<Pending>>,
    next_mid: Arc<AtomicU16>,
}

impl CoapEndpoint {
    /// Bind an endpoint to `addr`
    pub async fn bind(addr: SocketAddr) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind(addr).await?;

        Ok(Self {
            socket: Arc::new(socket),
            resources: Arc::new(RwLock::new(HashMap::new())),
            observers: Arc::new(RwLock::new(ObserverTable::default())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_mid: Arc::new(AtomicU16::new(rand::random())),
        })
    }

    /// Get the local address this endpoint is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    /// Serve `responder` on `path`
    pub async fn register<R: PullResponder>(&self, path: &str, responder: R) {
        let path = normalize_path(path);
        info!("Registered CoAP resource {}", path);
        self.resources
            .write()
            .await
            .insert(path, Arc::new(responder));
    }

    /// Notifier delivering to this endpoint's observers
    pub fn notifier(&self) -> CoapNotifier {
        CoapNotifier {
            endpoint: self.clone(),
        }
    }

    /// Current observers of `path`
    pub async fn observers(&self, path: &str) -> Vec<Observer> {
        self.observers.read().await.for_path(&normalize_path(path))
    }

    /// Start receiving and dispatching messages in background
    pub fn start_receive(&self) -> JoinHandle<()> {
        let endpoint = self.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];

            loop {
                let (len, src) = match endpoint.socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        error!("CoAP receive error: {}", e);
                        continue;
                    }
                };

                let packet = match Packet::from_bytes(&buf[..len]) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("Failed to parse CoAP message from {}: {:?}", src, e);
                        continue;
                    }
                };

                if let Some(reply) = endpoint.handle(packet, src).await {
                    if let Err(e) = endpoint.send_packet(&reply, src).await {
                        warn!("Failed to reply to {}: {}", src, e);
                    }
                }
            }
        })
    }

    /// Send a confirmable request and wait for its response
    pub async fn request(
        &self,
        peer: SocketAddr,
        method: RequestType,
        path: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Packet, RequestError> {
        let token = rand::random::<[u8; TOKEN_LEN]>().to_vec();

        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Confirmable);
        packet.header.code = MessageClass::Request(method);
        let message_id = self.next_message_id();
        packet.header.message_id = message_id;
        packet.set_token(token.clone());
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
        }
        if !payload.is_empty() {
            packet.set_content_format(ContentFormat::TextPlain);
            packet.payload = payload.to_vec();
        }

        let bytes = packet
            .to_bytes()
            .map_err(|e| RequestError::Encode(format!("{:?}", e)))?;

        let (response_tx, response_rx) = oneshot::channel();
        self.pending.lock().await.insert(
            token.clone(),
            PendingRequest {
                peer,
                message_id,
                response_tx,
            },
        );

        debug!("Sending request {} to {}", path, peer);
        if let Err(e) = self.socket.send_to(&bytes, peer).await {
            self.pending.lock().await.remove(&token);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RequestError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&token);
                Err(RequestError::Timeout(timeout))
            }
        }
    }

    fn next_message_id(&self) -> u16 {
        self.next_mid.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_packet(&self, packet: &Packet, dest: SocketAddr) -> Result<usize, NotifyError> {
        let bytes = packet
            .to_bytes()
            .map_err(|e| NotifyError::Encode(format!("{:?}", e)))?;
        Ok(self.socket.send_to(&bytes, dest).await?)
    }

    /// Handle one incoming message, returning the reply to send (if any)
    async fn handle(&self, packet: Packet, src: SocketAddr) -> Option<Packet> {
        if let MessageClass::Request(method) = &packet.header.code {
            let get = matches!(method, RequestType::Get);
            return Some(self.handle_request(get, &packet, src).await);
        }

        if matches!(packet.header.code, MessageClass::Response(_)) {
            return self.handle_response(packet, src).await;
        }

        if matches!(packet.header.code, MessageClass::Empty) {
            return self.handle_empty(&packet, src).await;
        }

        debug!("Ignoring reserved message class from {}", src);
        None
    }

    async fn handle_request(&self, get: bool, packet: &Packet, src: SocketAddr) -> Packet {
        let path = uri_path(packet);
        let mut reply = self.reply_to(packet);

        let responder = self.resources.read().await.get(&path).cloned();
        let Some(responder) = responder else {
            debug!("{} requested unknown resource {}", src, path);
            reply.header.code = MessageClass::Response(ResponseType::NotFound);
            return reply;
        };

        if !get {
            reply.header.code = MessageClass::Response(ResponseType::MethodNotAllowed);
            return reply;
        }

        match observe_value(packet) {
            Some(OBSERVE_REGISTER) => {
                let observer = Observer {
                    peer: src,
                    token: packet.get_token().to_vec(),
                    path: path.clone(),
                };
                let mut observers = self.observers.write().await;
                if observers.register(observer) {
                    info!("{} observing {}", src, path);
                    let sequence = observers.next_sequence();
                    reply.add_option(CoapOption::Observe, encode_uint(sequence));
                } else {
                    warn!("Observer table full, serving {} without Observe", src);
                }
            }
            Some(OBSERVE_DEREGISTER) => {
                if self.observers.write().await.deregister(src, &path) {
                    info!("{} stopped observing {}", src, path);
                }
            }
            _ => {}
        }

        reply.header.code = MessageClass::Response(ResponseType::Content);
        reply.set_content_format(responder.content_format());
        reply.payload = responder.respond();
        reply
    }

    async fn handle_response(&self, packet: Packet, src: SocketAddr) -> Option<Packet> {
        let ack = if packet.header.get_type() == MessageType::Confirmable {
            Some(empty_message(MessageType::Acknowledgement, packet.header.message_id))
        } else {
            None
        };

        let token = packet.get_token().to_vec();
        match self.pending.lock().await.remove(&token) {
            Some(request) => {
                let _ = request.response_tx.send(Ok(packet));
            }
            None => debug!("Unmatched response from {}", src),
        }

        ack
    }

    async fn handle_empty(&self, packet: &Packet, src: SocketAddr) -> Option<Packet> {
        match packet.header.get_type() {
            MessageType::Confirmable => {
                debug!("CoAP ping from {}", src);
                Some(empty_message(MessageType::Reset, packet.header.message_id))
            }
            MessageType::Reset => {
                self.reject_pending(src, packet.header.message_id).await;
                let dropped = self.observers.write().await.drop_peer(src);
                if dropped > 0 {
                    info!("{} reset, dropped {} observation(s)", src, dropped);
                }
                None
            }
            _ => None,
        }
    }

    /// Complete the request sent to `peer` as `message_id` with a reset
    async fn reject_pending(&self, peer: SocketAddr, message_id: u16) {
        let mut pending = self.pending.lock().await;
        let token = pending
            .iter()
            .find(|(_, r)| r.peer == peer && r.message_id == message_id)
            .map(|(token, _)| token.clone());

        if let Some(request) = token.and_then(|t| pending.remove(&t)) {
            debug!("{} reset request {}", peer, message_id);
            let _ = request.response_tx.send(Err(RequestError::Reset));
        }
    }

    /// Response skeleton: piggybacked ACK for CON, NON otherwise
    fn reply_to(&self, request: &Packet) -> Packet {
        let mut reply = Packet::new();
        if request.header.get_type() == MessageType::Confirmable {
            reply.header.set_type(MessageType::Acknowledgement);
            reply.header.message_id = request.header.message_id;
        } else {
            reply.header.set_type(MessageType::NonConfirmable);
            reply.header.message_id = self.next_message_id();
        }
        reply.set_token(request.get_token().to_vec());
        reply
    }
}

/// Push notifier over an endpoint's Observe table
#[derive(Clone)]
pub struct CoapNotifier {
    endpoint: CoapEndpoint,
}

impl PushNotifier for CoapNotifier {
    async fn notify(&mut self, path: &str, payload: &[u8]) -> Result<usize, NotifyError> {
        let path = normalize_path(path);

        let (observers, sequence) = {
            let mut table = self.endpoint.observers.write().await;
            let observers = table.for_path(&path);
            if observers.is_empty() {
                return Err(NotifyError::NotReady);
            }
            (observers, table.next_sequence())
        };

        let content_format = self
            .endpoint
            .resources
            .read()
            .await
            .get(&path)
            .map(|r| r.content_format())
            .unwrap_or(ContentFormat::TextPlain);

        let mut sent = 0;
        let mut last_error = None;
        for observer in &observers {
            let mut packet = Packet::new();
            packet.header.set_type(MessageType::NonConfirmable);
            packet.header.code = MessageClass::Response(ResponseType::Content);
            packet.header.message_id = self.endpoint.next_message_id();
            packet.set_token(observer.token.clone());
            packet.add_option(CoapOption::Observe, encode_uint(sequence));
            packet.set_content_format(content_format);
            packet.payload = payload.to_vec();

            match self.endpoint.send_packet(&packet, observer.peer).await {
                Ok(bytes) => sent += bytes,
                Err(e) => {
                    warn!("Failed to notify {}: {}", observer.peer, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if sent == 0 => Err(e),
            _ => Ok(sent),
        }
    }
}

fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

/// Request path from the Uri-Path options
fn uri_path(packet: &Packet) -> String {
    let segments: Vec<String> = packet
        .get_option(CoapOption::UriPath)
        .map(|values| {
            values
                .iter()
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect()
        })
        .unwrap_or_default();

    format!("/{}", segments.join("/"))
}

fn observe_value(packet: &Packet) -> Option<u32> {
    packet
        .get_option(CoapOption::Observe)
        .and_then(|values| values.front())
        .and_then(|raw| decode_uint(raw))
}

fn empty_message(message_type: MessageType, message_id: u16) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(message_type);
    packet.header.code = MessageClass::Empty;
    packet.header.message_id = message_id;
    packet
}

/// Minimal big-endian encoding of an option value
fn encode_uint(value: u32) -> Vec<u8> {
    value
        .to_be_bytes()
        .iter()
        .skip_while(|b| **b == 0)
        .copied()
        .collect()
}

fn decode_uint(raw: &[u8]) -> Option<u32> {
    if raw.len() > 4 {
        return None;
    }
    Some(raw.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}
