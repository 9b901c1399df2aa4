use crate::error::{BlockchainError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Wire tags, fixed by the order nodes already agree on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    TipAnnounce = 0,
    ChainRequest = 1,
    AllChain = 2,
    TxBroadcast = 3,
    BlockBroadcast = 4,
    PeerIntroduce = 5,
}

impl TryFrom<u8> for MessageKind {
    type Error = BlockchainError;

    fn try_from(value: u8) -> Result<MessageKind> {
        match value {
            0 => Ok(MessageKind::TipAnnounce),
            1 => Ok(MessageKind::ChainRequest),
            2 => Ok(MessageKind::AllChain),
            3 => Ok(MessageKind::TxBroadcast),
            4 => Ok(MessageKind::BlockBroadcast),
            5 => Ok(MessageKind::PeerIntroduce),
            other => Err(BlockchainError::Network(format!(
                "Unknown message type {other}"
            ))),
        }
    }
}

/// One line on the wire. The payload is the JSON of the kind-specific value,
/// carried as base64 so the envelope stays a flat JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    message_type: u8,
    #[serde(with = "base64_payload")]
    payload: Vec<u8>,
}

impl Message {
    pub fn new<T: Serialize>(kind: MessageKind, value: &T) -> Result<Message> {
        Ok(Message {
            message_type: kind as u8,
            payload: serde_json::to_vec(value)?,
        })
    }

    pub fn kind(&self) -> Result<MessageKind> {
        MessageKind::try_from(self.message_type)
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            BlockchainError::Serialization(format!(
                "Payload of message type {} does not decode: {e}",
                self.message_type
            ))
        })
    }

    /// Newline-terminated JSON, ready to write
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Message> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// A peer the receiver may not know yet. `open_port` is the receiver's own
/// listening port as the sender knows it, sent back in the dial handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIntroduction {
    pub address: String,
    pub port: u16,
    pub open_port: u16,
}

/// First line the dialing side writes: where it can be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub port: u16,
}

mod base64_payload {
    use data_encoding::BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
