//! Blocking client owning a session to a DHT storage backend.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::common::{
    GetRequestArguments, MessageType, PutRequestArguments, RemoveRequestArguments, RequestSpecific,
    ResponseSpecific,
};
use crate::node::DEFAULT_PORT;
use crate::socket::{KvSocket, DEFAULT_REQUEST_TIMEOUT};

/// Synthetic backend code reported when a request expires with no response.
pub const CODE_REQUEST_TIMEOUT: i32 = 408;
/// Synthetic backend code reported when a response doesn't match its request.
pub const CODE_UNEXPECTED_RESPONSE: i32 = 203;

#[derive(thiserror::Error, Debug)]
/// Client error enum.
pub enum Error {
    /// The client was used before [DhtClient::init] or after [DhtClient::shutdown].
    #[error("Client session is not initialized")]
    NotInitialized,

    /// A transport or backend fault, carrying the backend's error code verbatim.
    #[error("Backend error {code}: {message}")]
    Backend { code: i32, message: String },

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
/// Client configurations.
pub struct Config {
    /// Address of the storage backend node to talk to.
    ///
    /// Defaults to [DEFAULT_PORT] on localhost.
    pub backend: SocketAddrV4,
    /// UDP request timeout duration.
    ///
    /// The longer this duration is, the longer a caller blocks on a dead
    /// backend. The shorter it is, the more responses from a busy backend
    /// are missed.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientBuilder(Config);

impl ClientBuilder {
    /// Set the address of the storage backend node to talk to.
    pub fn backend(mut self, address: SocketAddrV4) -> Self {
        self.0.backend = address;
        self
    }

    /// Set the UDP request timeout duration.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.0.request_timeout = request_timeout;
        self
    }

    pub fn build(self) -> DhtClient {
        DhtClient::new(self.0)
    }
}

/// A client owning a single session to the DHT storage backend.
///
/// Cheap to clone; all clones share the same session and lifecycle. The
/// session must be established with [DhtClient::init] before any operation,
/// and is torn down with [DhtClient::shutdown]. Concurrent operations
/// multiplex over the single session, each blocking its caller until a
/// response, a timeout, or shutdown.
#[derive(Debug, Clone)]
pub struct DhtClient(Arc<ClientInner>);

#[derive(Debug)]
struct ClientInner {
    config: Config,
    state: RwLock<Lifecycle>,
}

#[derive(Debug)]
enum Lifecycle {
    Uninitialized,
    Initialized(Session),
    Closed,
}

#[derive(Debug)]
struct Session {
    sender: flume::Sender<ActorMessage>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DhtClient {
    pub fn new(config: Config) -> Self {
        DhtClient(Arc::new(ClientInner {
            config,
            state: RwLock::new(Lifecycle::Uninitialized),
        }))
    }

    /// Returns a builder to edit configurations before creating a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    // === Getters ===

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    // === Public Methods ===

    /// Establish the session to the backend.
    ///
    /// Calling it again on an initialized client is a no-op. Calling it
    /// after [DhtClient::shutdown] fails with [Error::NotInitialized];
    /// the lifecycle is strictly one-way.
    pub fn init(&self) -> Result<(), Error> {
        let mut state = self.0.state.write().expect("client state lock poisoned");

        match &*state {
            Lifecycle::Initialized(_) => Ok(()),
            Lifecycle::Closed => Err(Error::NotInitialized),
            Lifecycle::Uninitialized => {
                let socket = KvSocket::bind(None, self.0.config.request_timeout)?;

                let backend = self.0.config.backend;
                let request_timeout = self.0.config.request_timeout;

                let (sender, receiver) = flume::unbounded();

                let handle =
                    thread::spawn(move || run(socket, backend, request_timeout, receiver));

                debug!(?backend, "Initialized client session");

                *state = Lifecycle::Initialized(Session {
                    sender,
                    handle: Some(handle),
                });

                Ok(())
            }
        }
    }

    /// Tear the session down.
    ///
    /// A no-op if the client was never initialized or is already closed.
    /// Pending operations fail with [Error::NotInitialized].
    pub fn shutdown(&self) {
        let mut state = self.0.state.write().expect("client state lock poisoned");

        if let Lifecycle::Initialized(session) = &mut *state {
            let (sender, receiver) = flume::bounded::<()>(1);

            let _ = session.sender.send(ActorMessage::Shutdown(sender));
            let _ = receiver.recv();

            if let Some(handle) = session.handle.take() {
                let _ = handle.join();
            }

            debug!("Closed client session");

            *state = Lifecycle::Closed;
        }
    }

    /// Get the value stored under `key`.
    ///
    /// Returns `Ok(None)` when the backend has nothing stored under `key`,
    /// which is distinct from an empty stored value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, Error> {
        let request = RequestSpecific::Get(GetRequestArguments { key: key.into() });

        match self.call(request)? {
            ResponseSpecific::Value(args) => Ok(Some(args.value)),
            ResponseSpecific::NotFound => Ok(None),
            ResponseSpecific::Ack => Err(unexpected_response("ack for a get request")),
        }
    }

    /// Store `value` under `key`, overwriting any existing value.
    ///
    /// Either the write is visible to subsequent reads or it fails entirely;
    /// there are no partial writes.
    pub fn put(&self, key: &[u8], value: Bytes) -> Result<(), Error> {
        let request = RequestSpecific::Put(PutRequestArguments {
            key: key.into(),
            value,
        });

        match self.call(request)? {
            ResponseSpecific::Ack => Ok(()),
            _ => Err(unexpected_response("non-ack for a put request")),
        }
    }

    /// Remove the value stored under `key`.
    ///
    /// Removing a key with nothing stored under it is a successful no-op.
    pub fn remove(&self, key: &[u8]) -> Result<(), Error> {
        let request = RequestSpecific::Remove(RemoveRequestArguments { key: key.into() });

        match self.call(request)? {
            ResponseSpecific::Ack => Ok(()),
            _ => Err(unexpected_response("non-ack for a remove request")),
        }
    }

    // === Private Methods ===

    /// Send one request to the actor thread and block for its outcome.
    fn call(&self, request: RequestSpecific) -> Result<ResponseSpecific, Error> {
        let actor_sender = {
            let state = self.0.state.read().expect("client state lock poisoned");

            match &*state {
                Lifecycle::Initialized(session) => session.sender.clone(),
                _ => return Err(Error::NotInitialized),
            }
        };

        let (sender, receiver) = flume::bounded::<Result<ResponseSpecific, Error>>(1);

        actor_sender
            .send(ActorMessage::Request(request, sender))
            .map_err(|_| Error::NotInitialized)?;

        receiver.recv().map_err(|_| Error::NotInitialized)?
    }
}

fn unexpected_response(message: &str) -> Error {
    Error::Backend {
        code: CODE_UNEXPECTED_RESPONSE,
        message: format!("Unexpected response: {}", message),
    }
}

enum ActorMessage {
    Request(
        RequestSpecific,
        flume::Sender<Result<ResponseSpecific, Error>>,
    ),
    Shutdown(flume::Sender<()>),
}

struct PendingRequest {
    sender: flume::Sender<Result<ResponseSpecific, Error>>,
    sent_at: Instant,
}

/// Actor thread loop: drains caller commands, pumps the socket, pairs
/// responses with pending callers, and expires timed-out requests.
fn run(
    mut socket: KvSocket,
    backend: SocketAddrV4,
    request_timeout: Duration,
    receiver: flume::Receiver<ActorMessage>,
) {
    let mut pending: Vec<(u16, PendingRequest)> = Vec::new();

    loop {
        // Drain caller commands.
        loop {
            match receiver.try_recv() {
                Ok(ActorMessage::Request(request, sender)) => {
                    let tid = socket.request(backend, request);

                    pending.push((
                        tid,
                        PendingRequest {
                            sender,
                            sent_at: Instant::now(),
                        },
                    ));
                }
                Ok(ActorMessage::Shutdown(sender)) => {
                    // Dropping `pending` fails the waiting callers.
                    drop(pending);
                    let _ = sender.send(());
                    return;
                }
                Err(flume::TryRecvError::Empty) => break,
                Err(flume::TryRecvError::Disconnected) => return,
            }
        }

        // Pair one incoming message with its pending caller.
        if let Some((message, from)) = socket.recv_from() {
            let transaction_id = message.transaction_id;
            let result = match message.message_type {
                MessageType::Response(response) => Some(Ok(response)),
                MessageType::Error(error) => Some(Err(Error::Backend {
                    code: error.code,
                    message: error.description,
                })),
                MessageType::Request(_) => {
                    // Clients are never queried.
                    trace!(?from, "Ignoring incoming request message");
                    None
                }
            };

            if let Some(result) = result {
                if let Some(index) = pending
                    .iter()
                    .position(|(tid, _)| *tid == transaction_id)
                {
                    let (_, request) = pending.swap_remove(index);
                    let _ = request.sender.send(result);
                }
            }
        }

        // Expire pending requests past the timeout.
        let mut index = 0;
        while index < pending.len() {
            if pending[index].1.sent_at.elapsed() >= request_timeout {
                let (tid, request) = pending.swap_remove(index);

                debug!(tid, "Request timed out with no response from the backend");

                let _ = request.sender.send(Err(Error::Backend {
                    code: CODE_REQUEST_TIMEOUT,
                    message: "Request timed out".to_string(),
                }));
            } else {
                index += 1;
            }
        }
    }
}
