#![doc = include_str!("../README.md")]

mod common;
mod dht;
mod node;
mod socket;
mod store;

pub use crate::common::{MalformedRecord, Record};
pub use bytes::Bytes;
pub use dht::{
    ClientBuilder, Config, DhtClient, Error, CODE_REQUEST_TIMEOUT, CODE_UNEXPECTED_RESPONSE,
};
pub use node::{StorageNode, DEFAULT_PORT, MAX_VALUE_SIZE};
pub use socket::DEFAULT_REQUEST_TIMEOUT;
pub use store::{RecordStore, StoreError};
