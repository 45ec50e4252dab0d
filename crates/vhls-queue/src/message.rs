//! Queue message envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::QueueResult;

/// A message on a topic. The payload is arbitrary JSON so both backends
/// carry the same envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl QueueMessage {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// Build a message from any serializable value.
    pub fn from_serializable<T: Serialize>(
        topic: impl Into<String>,
        value: &T,
    ) -> QueueResult<Self> {
        Ok(Self {
            topic: topic.into(),
            payload: serde_json::to_value(value)?,
        })
    }

    /// Deserialize the payload into a typed value.
    pub fn parse<T: DeserializeOwned>(&self) -> QueueResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    #[test]
    fn test_typed_payload_round_trip() {
        let msg = QueueMessage::from_serializable("transcode.events", &Ping { seq: 7 }).unwrap();
        assert_eq!(msg.topic, "transcode.events");
        assert_eq!(msg.parse::<Ping>().unwrap(), Ping { seq: 7 });
    }
}
