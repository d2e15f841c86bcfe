//! A single in-memory storage node speaking the client's wire protocol.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::thread;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::common::{
    ErrorSpecific, GetRequestArguments, Message, MessageType, PutRequestArguments,
    RemoveRequestArguments, RequestSpecific, ResponseSpecific, ValueResponseArguments,
};
use crate::socket::{KvSocket, DEFAULT_REQUEST_TIMEOUT};

/// Default port a storage node listens on.
pub const DEFAULT_PORT: u16 = 7401;

/// The maximum size of a stored value blob in bytes. Larger puts are
/// rejected with error code 205.
pub const MAX_VALUE_SIZE: usize = 1000;

/// A single storage node holding values in memory.
///
/// It implements no routing or replication; it backs [crate::DhtClient]
/// in tests and small single-node setups, and shuts down when dropped.
#[derive(Debug)]
pub struct StorageNode {
    local_addr: SocketAddrV4,
    sender: flume::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StorageNode {
    /// Bind and start serving on the given port (OS-assigned when `None`).
    pub fn start(port: Option<u16>) -> Result<Self, std::io::Error> {
        let mut socket = KvSocket::bind(port, DEFAULT_REQUEST_TIMEOUT)?;
        let local_addr = socket.local_addr();

        let (sender, receiver) = flume::bounded::<()>(1);

        let handle = thread::spawn(move || {
            let mut values: HashMap<Box<[u8]>, Bytes> = HashMap::new();

            loop {
                if receiver.try_recv().is_ok() {
                    break;
                }

                if let Some((message, from)) = socket.recv_from() {
                    handle_message(&mut socket, &mut values, message, from);
                }
            }
        });

        debug!(?local_addr, "Storage node listening");

        Ok(Self {
            local_addr,
            sender,
            handle: Some(handle),
        })
    }

    // === Getters ===

    /// Returns the address this node is listening on.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    // === Public Methods ===

    /// Stop serving and wait for the node thread to exit.
    pub fn shutdown(&mut self) {
        let _ = self.sender.send(());

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StorageNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn handle_message(
    socket: &mut KvSocket,
    values: &mut HashMap<Box<[u8]>, Bytes>,
    message: Message,
    from: SocketAddrV4,
) {
    let request = match message.message_type {
        MessageType::Request(request) => request,
        // Storage nodes never send requests, so nothing routes responses here.
        _ => return,
    };

    match handle_request(values, request) {
        Ok(response) => {
            trace!(?from, ?response, "Responding");
            socket.response(from, message.transaction_id, response);
        }
        Err(error) => {
            trace!(?from, ?error, "Responding with an error");
            socket.error(from, message.transaction_id, error);
        }
    }
}

fn handle_request(
    values: &mut HashMap<Box<[u8]>, Bytes>,
    request: RequestSpecific,
) -> Result<ResponseSpecific, ErrorSpecific> {
    match request {
        RequestSpecific::Get(GetRequestArguments { key }) => match values.get(&key) {
            Some(value) => Ok(ResponseSpecific::Value(ValueResponseArguments {
                value: value.clone(),
            })),
            None => Ok(ResponseSpecific::NotFound),
        },
        RequestSpecific::Put(PutRequestArguments { key, value }) => {
            if value.len() > MAX_VALUE_SIZE {
                return Err(ErrorSpecific {
                    code: 205,
                    description: "Value too big".to_string(),
                });
            }

            values.insert(key, value);
            Ok(ResponseSpecific::Ack)
        }
        RequestSpecific::Remove(RemoveRequestArguments { key }) => {
            // Removing an absent key is a successful no-op.
            values.remove(&key);
            Ok(ResponseSpecific::Ack)
        }
    }
}
