#[cfg(test)]
mod notification_test;

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

/// association change state enums
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AssociationChangeState {
    CommUp = 0,
    CommLost = 1,
    Restart = 2,
    ShutdownComplete = 3,
    CantStartAssociation = 4,
}

impl From<u16> for AssociationChangeState {
    fn from(v: u16) -> AssociationChangeState {
        match v {
            1 => AssociationChangeState::CommLost,
            2 => AssociationChangeState::Restart,
            3 => AssociationChangeState::ShutdownComplete,
            4 => AssociationChangeState::CantStartAssociation,
            _ => AssociationChangeState::CommUp,
        }
    }
}

impl fmt::Display for AssociationChangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            AssociationChangeState::CommUp => "CommUp",
            AssociationChangeState::CommLost => "CommLost",
            AssociationChangeState::Restart => "Restart",
            AssociationChangeState::ShutdownComplete => "ShutdownComplete",
            AssociationChangeState::CantStartAssociation => "CantStartAssociation",
        };
        write!(f, "{s}")
    }
}

/// peer address state enums
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PeerAddressChangeState {
    Available = 0,
    Unreachable = 1,
    Removed = 2,
    Added = 3,
    MadePrimary = 4,
    Confirmed = 5,
}

impl From<u32> for PeerAddressChangeState {
    fn from(v: u32) -> PeerAddressChangeState {
        match v {
            1 => PeerAddressChangeState::Unreachable,
            2 => PeerAddressChangeState::Removed,
            3 => PeerAddressChangeState::Added,
            4 => PeerAddressChangeState::MadePrimary,
            5 => PeerAddressChangeState::Confirmed,
            _ => PeerAddressChangeState::Available,
        }
    }
}

impl fmt::Display for PeerAddressChangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            PeerAddressChangeState::Available => "Available",
            PeerAddressChangeState::Unreachable => "Unreachable",
            PeerAddressChangeState::Removed => "Removed",
            PeerAddressChangeState::Added => "Added",
            PeerAddressChangeState::MadePrimary => "MadePrimary",
            PeerAddressChangeState::Confirmed => "Confirmed",
        };
        write!(f, "{s}")
    }
}

/// The association came up, went down, restarted or finished its shutdown
/// handshake. Stream counts are the negotiated values for the (possibly
/// new) association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationChange {
    pub state: AssociationChangeState,
    pub error: u16,
    pub outbound_streams: u16,
    pub inbound_streams: u16,
    pub association_id: i32,
}

/// One of the peer's addresses changed reachability state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddressChange {
    pub address: SocketAddr,
    pub state: PeerAddressChangeState,
    pub error: u32,
    pub association_id: i32,
}

/// The transport gave up on delivering a message; the undelivered payload
/// and its metadata are returned to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailed {
    pub error: u32,
    pub stream_identifier: u16,
    pub payload_protocol_identifier: u32,
    pub payload: Bytes,
    pub association_id: i32,
}

/// The peer initiated an SCTP shutdown; no further messages will arrive
/// on this association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shutdown {
    pub association_id: i32,
}

/// Notification is an out-of-band event from the SCTP stack, delivered
/// interleaved with messages on the read path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    AssociationChange(AssociationChange),
    PeerAddressChange(PeerAddressChange),
    SendFailed(SendFailed),
    Shutdown(Shutdown),
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::AssociationChange(n) => {
                write!(f, "AssociationChange({} assoc={})", n.state, n.association_id)
            }
            Notification::PeerAddressChange(n) => {
                write!(
                    f,
                    "PeerAddressChange({} {} assoc={})",
                    n.state, n.address, n.association_id
                )
            }
            Notification::SendFailed(n) => write!(
                f,
                "SendFailed(sid={} err={} assoc={})",
                n.stream_identifier, n.error, n.association_id
            ),
            Notification::Shutdown(n) => write!(f, "Shutdown(assoc={})", n.association_id),
        }
    }
}

/// Continuation verdict of a notification handler: keep receiving in the
/// current turn, or stop and hand control back to the caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandlerResult {
    Continue,
    Return,
}

/// NotificationHandler is handed into `SctpSocket::receive` so that
/// notifications are dispatched inline, on the thread driving the
/// receive, before any further message is pulled from the socket.
pub trait NotificationHandler: Send {
    fn handle_notification(&mut self, notification: Notification) -> HandlerResult;
}
