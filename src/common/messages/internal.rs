use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KvMessage {
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: [u8; 2],

    #[serde(default)]
    #[serde(rename = "v", with = "serde_bytes")]
    pub version: Option<[u8; 4]>,

    #[serde(flatten)]
    pub variant: KvMessageVariant,
}

impl KvMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<KvMessage, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes)?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "y")]
pub enum KvMessageVariant {
    #[serde(rename = "q")]
    Request(KvRequestSpecific),

    #[serde(rename = "r")]
    Response(KvResponseSpecific),

    #[serde(rename = "e")]
    Error(KvErrorSpecific),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "q")]
pub enum KvRequestSpecific {
    #[serde(rename = "get")]
    Get {
        #[serde(rename = "a")]
        arguments: KvGetRequestArguments,
    },

    #[serde(rename = "put")]
    Put {
        #[serde(rename = "a")]
        arguments: KvPutRequestArguments,
    },

    #[serde(rename = "del")]
    Remove {
        #[serde(rename = "a")]
        arguments: KvRemoveRequestArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)] // This means order matters! Order these from most to least detailed
pub enum KvResponseSpecific {
    Value {
        #[serde(rename = "r")]
        arguments: KvValueResponseArguments,
    },

    NotFound {
        #[serde(rename = "r")]
        arguments: KvNotFoundResponseArguments,
    },

    Ack {
        #[serde(rename = "r")]
        arguments: KvAckResponseArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KvErrorSpecific {
    #[serde(rename = "e")]
    pub error_info: (i32, String),
}

// === Get ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KvGetRequestArguments {
    #[serde(with = "serde_bytes")]
    pub k: Vec<u8>,
}

// === Put ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KvPutRequestArguments {
    #[serde(with = "serde_bytes")]
    pub k: Vec<u8>,

    #[serde(with = "serde_bytes")]
    pub v: Vec<u8>,
}

// === Remove ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KvRemoveRequestArguments {
    #[serde(with = "serde_bytes")]
    pub k: Vec<u8>,
}

// === Responses ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KvValueResponseArguments {
    #[serde(with = "serde_bytes")]
    pub v: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KvNotFoundResponseArguments {
    pub nf: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KvAckResponseArguments {}
