//! Serialize and deserialize wire messages exchanged with the storage backend.

mod internal;

use bytes::Bytes;

/// A single message exchanged with the storage backend over UDP.
#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    pub transaction_id: u16,

    /// The version of the requester or responder.
    pub version: Option<[u8; 4]>,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),

    Error(ErrorSpecific),
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestSpecific {
    Get(GetRequestArguments),
    Put(PutRequestArguments),
    Remove(RemoveRequestArguments),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseSpecific {
    /// A value is stored under the requested key.
    Value(ValueResponseArguments),
    /// Nothing is stored under the requested key.
    /// Distinct from an empty stored value.
    NotFound,
    /// A put or remove was applied.
    Ack,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ErrorSpecific {
    pub code: i32,
    pub description: String,
}

// === Get ===

#[derive(Debug, PartialEq, Clone)]
pub struct GetRequestArguments {
    pub key: Box<[u8]>,
}

// === Put ===

#[derive(Debug, PartialEq, Clone)]
pub struct PutRequestArguments {
    pub key: Box<[u8]>,
    pub value: Bytes,
}

// === Remove ===

#[derive(Debug, PartialEq, Clone)]
pub struct RemoveRequestArguments {
    pub key: Box<[u8]>,
}

// === Value response ===

#[derive(Debug, PartialEq, Clone)]
pub struct ValueResponseArguments {
    pub value: Bytes,
}

impl Message {
    fn into_serde_message(self) -> internal::KvMessage {
        internal::KvMessage {
            transaction_id: self.transaction_id.to_be_bytes(),
            version: self.version,
            variant: match self.message_type {
                MessageType::Request(request_specific) => {
                    internal::KvMessageVariant::Request(match request_specific {
                        RequestSpecific::Get(get_args) => internal::KvRequestSpecific::Get {
                            arguments: internal::KvGetRequestArguments {
                                k: get_args.key.into_vec(),
                            },
                        },
                        RequestSpecific::Put(put_args) => internal::KvRequestSpecific::Put {
                            arguments: internal::KvPutRequestArguments {
                                k: put_args.key.into_vec(),
                                v: put_args.value.to_vec(),
                            },
                        },
                        RequestSpecific::Remove(remove_args) => {
                            internal::KvRequestSpecific::Remove {
                                arguments: internal::KvRemoveRequestArguments {
                                    k: remove_args.key.into_vec(),
                                },
                            }
                        }
                    })
                }
                MessageType::Response(response_specific) => {
                    internal::KvMessageVariant::Response(match response_specific {
                        ResponseSpecific::Value(value_args) => {
                            internal::KvResponseSpecific::Value {
                                arguments: internal::KvValueResponseArguments {
                                    v: value_args.value.to_vec(),
                                },
                            }
                        }
                        ResponseSpecific::NotFound => internal::KvResponseSpecific::NotFound {
                            arguments: internal::KvNotFoundResponseArguments { nf: 1 },
                        },
                        ResponseSpecific::Ack => internal::KvResponseSpecific::Ack {
                            arguments: internal::KvAckResponseArguments {},
                        },
                    })
                }
                MessageType::Error(error_specific) => {
                    internal::KvMessageVariant::Error(internal::KvErrorSpecific {
                        error_info: (error_specific.code, error_specific.description),
                    })
                }
            },
        }
    }

    fn from_serde_message(msg: internal::KvMessage) -> Message {
        Message {
            transaction_id: u16::from_be_bytes(msg.transaction_id),
            version: msg.version,
            message_type: match msg.variant {
                internal::KvMessageVariant::Request(request_variant) => {
                    MessageType::Request(match request_variant {
                        internal::KvRequestSpecific::Get { arguments } => {
                            RequestSpecific::Get(GetRequestArguments {
                                key: arguments.k.into_boxed_slice(),
                            })
                        }
                        internal::KvRequestSpecific::Put { arguments } => {
                            RequestSpecific::Put(PutRequestArguments {
                                key: arguments.k.into_boxed_slice(),
                                value: arguments.v.into(),
                            })
                        }
                        internal::KvRequestSpecific::Remove { arguments } => {
                            RequestSpecific::Remove(RemoveRequestArguments {
                                key: arguments.k.into_boxed_slice(),
                            })
                        }
                    })
                }
                internal::KvMessageVariant::Response(response_variant) => {
                    MessageType::Response(match response_variant {
                        internal::KvResponseSpecific::Value { arguments } => {
                            ResponseSpecific::Value(ValueResponseArguments {
                                value: arguments.v.into(),
                            })
                        }
                        internal::KvResponseSpecific::NotFound { .. } => ResponseSpecific::NotFound,
                        internal::KvResponseSpecific::Ack { .. } => ResponseSpecific::Ack,
                    })
                }
                internal::KvMessageVariant::Error(error_specific) => {
                    MessageType::Error(ErrorSpecific {
                        code: error_specific.error_info.0,
                        description: error_specific.error_info.1,
                    })
                }
            },
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        self.clone().into_serde_message().to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Message, serde_bencode::Error> {
        Ok(Message::from_serde_message(internal::KvMessage::from_bytes(
            bytes,
        )?))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn get_request() {
        let original = Message {
            transaction_id: 258,
            version: None,
            message_type: MessageType::Request(RequestSpecific::Get(GetRequestArguments {
                key: b"user1".to_vec().into_boxed_slice(),
            })),
        };

        let bytes = original.to_bytes().unwrap();

        assert_eq!(Message::from_bytes(&bytes).unwrap(), original);
    }

    #[test]
    fn put_request() {
        let original = Message {
            transaction_id: 1,
            version: Some([75, 86, 0, 1]),
            message_type: MessageType::Request(RequestSpecific::Put(PutRequestArguments {
                key: b"user1".to_vec().into_boxed_slice(),
                value: Bytes::from_static(b"d4:name5:Alicee"),
            })),
        };

        let bytes = original.to_bytes().unwrap();

        assert_eq!(Message::from_bytes(&bytes).unwrap(), original);
    }

    #[test]
    fn value_response() {
        let original = Message {
            transaction_id: 7,
            version: None,
            message_type: MessageType::Response(ResponseSpecific::Value(ValueResponseArguments {
                value: Bytes::from_static(b"blob"),
            })),
        };

        let bytes = original.to_bytes().unwrap();

        assert_eq!(Message::from_bytes(&bytes).unwrap(), original);
    }

    #[test]
    fn not_found_is_not_an_empty_value() {
        let not_found = Message {
            transaction_id: 7,
            version: None,
            message_type: MessageType::Response(ResponseSpecific::NotFound),
        };

        let empty_value = Message {
            transaction_id: 7,
            version: None,
            message_type: MessageType::Response(ResponseSpecific::Value(ValueResponseArguments {
                value: Bytes::new(),
            })),
        };

        let decoded_not_found = Message::from_bytes(&not_found.to_bytes().unwrap()).unwrap();
        let decoded_empty_value = Message::from_bytes(&empty_value.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded_not_found, not_found);
        assert_eq!(decoded_empty_value, empty_value);
        assert_ne!(decoded_not_found, decoded_empty_value);
    }

    #[test]
    fn ack_response() {
        let original = Message {
            transaction_id: 9,
            version: None,
            message_type: MessageType::Response(ResponseSpecific::Ack),
        };

        let bytes = original.to_bytes().unwrap();

        assert_eq!(Message::from_bytes(&bytes).unwrap(), original);
    }

    #[test]
    fn error_message() {
        let original = Message {
            transaction_id: 3,
            version: None,
            message_type: MessageType::Error(ErrorSpecific {
                code: 205,
                description: "Value too big".to_string(),
            }),
        };

        let bytes = original.to_bytes().unwrap();

        assert_eq!(Message::from_bytes(&bytes).unwrap(), original);
    }
}
