//! The Relay Message option (option 9)

use bytes::BytesMut;

use crate::error::{Result, WireError};
use crate::message::{Message, ParseContext};

/// Relay Message (option 9): the encapsulated inner PDU of a relay message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessageOption {
    pub relayed_message: Box<Message>,
}

impl RelayMessageOption {
    pub fn new(relayed_message: Message) -> Self {
        Self {
            relayed_message: Box::new(relayed_message),
        }
    }

    pub(crate) fn from_payload(payload: &[u8], ctx: &ParseContext) -> Result<Self> {
        let (consumed, message) = Message::parse_with(payload, ctx)?;
        if consumed != payload.len() {
            return Err(WireError::InvalidLength {
                element: "relay-message",
                length: payload.len(),
            });
        }
        Ok(Self {
            relayed_message: Box::new(message),
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        self.relayed_message.save(buffer);
    }
}
