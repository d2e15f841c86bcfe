//! UDP socket layer correlating backend requests with their responses.

use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::common::{ErrorSpecific, Message, MessageType, RequestSpecific, ResponseSpecific};

const VERSION: [u8; 4] = [75, 86, 0, 1]; // "KV" version 01
const MTU: usize = 2048;

/// Default request timeout before abandoning an inflight request to a
/// non-responding backend.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);

/// The maximum duration to block on the [UdpSocket] buffer after it is empty.
/// Lower values increase CPU usage, but reduce latency and drain the buffer
/// faster, reducing the risk of packet loss.
const MAX_THREAD_BLOCK_DURATION: Duration = Duration::from_millis(10);

/// A UdpSocket wrapper that formats and correlates backend requests and responses.
#[derive(Debug)]
pub struct KvSocket {
    next_tid: u16,
    socket: UdpSocket,
    local_addr: SocketAddrV4,
    request_timeout: Duration,
    inflight_requests: Vec<(u16, InflightRequest)>,
}

#[derive(Debug, Clone)]
pub struct InflightRequest {
    to: SocketAddrV4,
    sent_at: Instant,
}

impl KvSocket {
    pub fn bind(port: Option<u16>, request_timeout: Duration) -> Result<Self, std::io::Error> {
        let socket = match port {
            Some(port) => UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port)))?,
            None => UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))?,
        };

        let local_addr = match socket.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unimplemented!("KvSocket does not support Ipv6"),
        };

        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            next_tid: rand::random(),
            local_addr,
            request_timeout,
            inflight_requests: Vec::new(),
        })
    }

    // === Getters ===

    /// Returns the address this socket is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    // === Public Methods ===

    /// Returns true if this transaction_id is still inflight.
    pub fn inflight(&self, transaction_id: &u16) -> bool {
        self.inflight_requests
            .iter()
            .any(|(tid, request)| tid == transaction_id && !self.expired(request))
    }

    /// Send a request to the given address and return the transaction_id.
    pub fn request(&mut self, address: SocketAddrV4, request: RequestSpecific) -> u16 {
        let message = self.request_message(request);
        trace!(context = "socket_message_sending", message = ?message);

        let tid = message.transaction_id;
        self.inflight_requests.push((
            tid,
            InflightRequest {
                to: address,
                sent_at: Instant::now(),
            },
        ));

        let _ = self.send(address, message).map_err(|e| {
            debug!(?e, "Error sending request message");
        });

        tid
    }

    /// Send a response to the given address.
    pub fn response(
        &mut self,
        address: SocketAddrV4,
        transaction_id: u16,
        response: ResponseSpecific,
    ) {
        let message = self.response_message(MessageType::Response(response), transaction_id);
        trace!(context = "socket_message_sending", message = ?message);
        let _ = self.send(address, message).map_err(|e| {
            debug!(?e, "Error sending response message");
        });
    }

    /// Send an error to the given address.
    pub fn error(&mut self, address: SocketAddrV4, transaction_id: u16, error: ErrorSpecific) {
        let message = self.response_message(MessageType::Error(error), transaction_id);
        let _ = self.send(address, message).map_err(|e| {
            debug!(?e, "Error sending error message");
        });
    }

    /// Receives a single message on the socket.
    /// On success, returns the message and its origin.
    pub fn recv_from(&mut self) -> Option<(Message, SocketAddrV4)> {
        let mut buf = [0u8; MTU];

        self.cleanup();

        match self.socket.recv_from(&mut buf) {
            Ok((amt, SocketAddr::V4(from))) => {
                let bytes = &buf[..amt];

                if from.port() == 0 {
                    trace!(
                        context = "socket_validation",
                        message = "Response from port 0"
                    );
                    return None;
                }

                match Message::from_bytes(bytes) {
                    Ok(message) => {
                        let should_return = match message.message_type {
                            MessageType::Request(_) => {
                                trace!(
                                    context = "socket_message_receiving",
                                    ?message,
                                    ?from,
                                    "Received request message"
                                );
                                true
                            }
                            MessageType::Response(_) | MessageType::Error(_) => {
                                trace!(
                                    context = "socket_message_receiving",
                                    ?message,
                                    ?from,
                                    "Received response message"
                                );
                                self.is_expected_response(&message, &from)
                            }
                        };

                        if should_return {
                            return Some((message, from));
                        }
                    }
                    Err(error) => {
                        trace!(
                            context = "socket_error",
                            ?error,
                            ?from,
                            message = ?String::from_utf8_lossy(bytes),
                            "Received invalid Bencode message."
                        );
                    }
                }
            }
            Ok((_, SocketAddr::V6(_))) => {
                trace!(
                    context = "socket_validation",
                    message = "Received IPv6 packet"
                );
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(MAX_THREAD_BLOCK_DURATION);
            }
            Err(e) => {
                trace!(
                    context = "socket_error",
                    ?e,
                    "recv_from failed unexpectedly"
                );
            }
        }

        None
    }

    // === Private Methods ===

    fn expired(&self, request: &InflightRequest) -> bool {
        request.sent_at.elapsed() >= self.request_timeout
    }

    fn cleanup(&mut self) {
        let request_timeout = self.request_timeout;
        self.inflight_requests
            .retain(|(_, request)| request.sent_at.elapsed() < request_timeout);
    }

    fn is_expected_response(&mut self, message: &Message, from: &SocketAddrV4) -> bool {
        // Positive or an error response to an inflight request.
        if let Some(index) = self
            .inflight_requests
            .iter()
            .position(|(tid, _)| *tid == message.transaction_id)
        {
            let (_, request) = self.inflight_requests.remove(index);

            if compare_socket_addr(&request.to, from) {
                return true;
            } else {
                trace!(
                    context = "socket_validation",
                    message = "Response from wrong address"
                );
            }
        } else {
            trace!(
                context = "socket_validation",
                message = "Unexpected response id"
            );
        }
        false
    }

    /// Increments self.next_tid and returns the previous value.
    fn tid(&mut self) -> u16 {
        // We don't bother with reusing freed transaction ids, since the
        // timeout is so short we are unlikely to run out of 65535 ids
        // before old ones expire.
        let tid = self.next_tid;
        self.next_tid = self.next_tid.wrapping_add(1);
        tid
    }

    /// Set transaction_id and version.
    fn request_message(&mut self, message: RequestSpecific) -> Message {
        let transaction_id = self.tid();

        Message {
            transaction_id,
            version: Some(VERSION),
            message_type: MessageType::Request(message),
        }
    }

    /// Same as request_message but with the request's transaction_id.
    fn response_message(&mut self, message: MessageType, request_tid: u16) -> Message {
        Message {
            transaction_id: request_tid,
            version: Some(VERSION),
            message_type: message,
        }
    }

    /// Send a raw message.
    fn send(&mut self, address: SocketAddrV4, message: Message) -> Result<(), SendMessageError> {
        self.socket.send_to(&message.to_bytes()?, address)?;
        trace!(context = "socket_message_sending", message = ?message);
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SendMessageError {
    /// Errors related to encoding outgoing messages.
    #[error("Failed to encode message bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}

// Same as SocketAddr::eq but ignores the ip if it is unspecified for testing reasons.
fn compare_socket_addr(a: &SocketAddrV4, b: &SocketAddrV4) -> bool {
    if a.port() != b.port() {
        return false;
    }

    if a.ip().is_unspecified() {
        return true;
    }

    a.ip() == b.ip()
}

#[cfg(test)]
mod test {
    use std::thread;

    use crate::common::{GetRequestArguments, ValueResponseArguments};

    use super::*;

    #[test]
    fn tid() {
        let mut socket = KvSocket::bind(None, DEFAULT_REQUEST_TIMEOUT).unwrap();
        socket.next_tid = 0;

        assert_eq!(socket.tid(), 0);
        assert_eq!(socket.tid(), 1);
        assert_eq!(socket.tid(), 2);

        socket.next_tid = u16::MAX;

        assert_eq!(socket.tid(), 65535);
        assert_eq!(socket.tid(), 0);
    }

    #[test]
    fn recv_request() {
        let mut server = KvSocket::bind(None, DEFAULT_REQUEST_TIMEOUT).unwrap();
        let server_address = server.local_addr();

        let mut client = KvSocket::bind(None, DEFAULT_REQUEST_TIMEOUT).unwrap();
        client.next_tid = 120;

        let client_address = client.local_addr();
        let request = RequestSpecific::Get(GetRequestArguments {
            key: b"user1".to_vec().into_boxed_slice(),
        });

        let expected_request = request.clone();

        let server_thread = thread::spawn(move || loop {
            if let Some((message, from)) = server.recv_from() {
                assert_eq!(from.port(), client_address.port());
                assert_eq!(message.transaction_id, 120);
                assert_eq!(message.version, Some(VERSION), "Version should be 'KV'");
                assert_eq!(message.message_type, MessageType::Request(expected_request));
                break;
            }
        });

        client.request(server_address, request);

        server_thread.join().unwrap();
    }

    #[test]
    fn recv_response() {
        let (tx, rx) = flume::bounded(1);

        let mut client = KvSocket::bind(None, DEFAULT_REQUEST_TIMEOUT).unwrap();
        let client_address = client.local_addr();

        let response = ResponseSpecific::Value(ValueResponseArguments {
            value: bytes::Bytes::from_static(b"blob"),
        });

        let expected_response = response.clone();

        let server_thread = thread::spawn(move || {
            let mut server = KvSocket::bind(None, DEFAULT_REQUEST_TIMEOUT).unwrap();
            let server_address = server.local_addr();
            tx.send(server_address).unwrap();

            // Expect the response.
            server.inflight_requests.push((
                8,
                InflightRequest {
                    to: client_address,
                    sent_at: Instant::now(),
                },
            ));

            loop {
                if let Some((message, from)) = server.recv_from() {
                    assert_eq!(from.port(), client_address.port());
                    assert_eq!(message.transaction_id, 8);
                    assert_eq!(
                        message.message_type,
                        MessageType::Response(expected_response)
                    );
                    assert!(
                        server.inflight_requests.is_empty(),
                        "receiving removes the inflight request"
                    );
                    break;
                }
            }
        });

        let server_address = rx.recv().unwrap();

        client.response(server_address, 8, response);

        server_thread.join().unwrap();
    }

    #[test]
    fn inflight_request_timeout() {
        let request_timeout = Duration::from_millis(50);
        let mut socket = KvSocket::bind(None, request_timeout).unwrap();

        let tid = 8;
        socket.inflight_requests.push((
            tid,
            InflightRequest {
                to: SocketAddrV4::new([0, 0, 0, 0].into(), 0),
                sent_at: Instant::now(),
            },
        ));

        std::thread::sleep(request_timeout);

        assert!(!socket.inflight(&tid));
    }

    #[test]
    fn ignore_response_from_wrong_address() {
        let mut server = KvSocket::bind(None, DEFAULT_REQUEST_TIMEOUT).unwrap();
        let server_address = server.local_addr();

        let mut client = KvSocket::bind(None, DEFAULT_REQUEST_TIMEOUT).unwrap();

        let client_address = client.local_addr();

        server.inflight_requests.push((
            8,
            InflightRequest {
                to: SocketAddrV4::new([127, 0, 0, 1].into(), client_address.port() + 1),
                sent_at: Instant::now(),
            },
        ));

        let response = ResponseSpecific::Ack;

        let server_thread = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            assert!(
                server.recv_from().is_none(),
                "Should not receive a response from wrong address"
            );
        });

        client.response(server_address, 8, response);

        server_thread.join().unwrap();
    }
}
