#[cfg(test)]
mod message_test;

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::socket::Association;

/// SctpMessage is one SCTP datagram together with its transport metadata:
/// the stream it travels on, the application-defined Payload Protocol
/// Identifier and the unordered delivery flag.
///
/// Messages are immutable once constructed. The payload is reference
/// counted, so cloning a message never copies the data.
#[derive(Clone, PartialEq, Eq)]
pub struct SctpMessage {
    payload: Bytes,
    stream_identifier: u16,
    payload_protocol_identifier: u32,
    unordered: bool,
}

impl SctpMessage {
    /// Creates an ordered message on the given stream with PPID 0.
    pub fn new(stream_identifier: u16, payload: Bytes) -> Self {
        SctpMessage {
            payload,
            stream_identifier,
            payload_protocol_identifier: 0,
            unordered: false,
        }
    }

    /// Creates a message with every piece of metadata spelled out.
    pub fn with_metadata(
        stream_identifier: u16,
        payload_protocol_identifier: u32,
        unordered: bool,
        payload: Bytes,
    ) -> Self {
        SctpMessage {
            payload,
            stream_identifier,
            payload_protocol_identifier,
            unordered,
        }
    }

    pub(crate) fn from_receive(payload: Bytes, info: &ReceiveInfo) -> Self {
        SctpMessage {
            payload,
            stream_identifier: info.stream_identifier,
            payload_protocol_identifier: info.payload_protocol_identifier,
            unordered: info.unordered,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn stream_identifier(&self) -> u16 {
        self.stream_identifier
    }

    pub fn payload_protocol_identifier(&self) -> u32 {
        self.payload_protocol_identifier
    }

    pub fn is_unordered(&self) -> bool {
        self.unordered
    }
}

impl fmt::Debug for SctpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SctpMessage")
            .field("stream_identifier", &self.stream_identifier)
            .field(
                "payload_protocol_identifier",
                &self.payload_protocol_identifier,
            )
            .field("unordered", &self.unordered)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl fmt::Display for SctpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SctpMessage(sid={} ppid={} unordered={} {} bytes)",
            self.stream_identifier,
            self.payload_protocol_identifier,
            self.unordered,
            self.payload.len()
        )
    }
}

/// MessageInfo describes one outgoing message to the transport: the live
/// association it belongs to, the message metadata and an optional
/// destination address. `destination: None` sends on the primary path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageInfo {
    pub association: Association,
    pub destination: Option<SocketAddr>,
    pub stream_identifier: u16,
    pub payload_protocol_identifier: u32,
    pub unordered: bool,
}

impl MessageInfo {
    /// Derives the outgoing info for `message` on the primary path of
    /// `association`.
    pub fn new(association: Association, message: &SctpMessage) -> Self {
        MessageInfo {
            association,
            destination: None,
            stream_identifier: message.stream_identifier,
            payload_protocol_identifier: message.payload_protocol_identifier,
            unordered: message.unordered,
        }
    }
}

/// ReceiveInfo is what the socket surface reports for one received
/// datagram. `message_length` bytes of the caller's buffer hold the
/// payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceiveInfo {
    pub message_length: usize,
    pub stream_identifier: u16,
    pub payload_protocol_identifier: u32,
    pub unordered: bool,
}
