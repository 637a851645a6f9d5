
#[cfg(target_os = "linux")]
mod socket_kernel;
mod socket_pipe;

#[cfg(target_os = "linux")]
pub use socket_kernel::KernelSctpSocket;
pub use socket_pipe::{pipe, PipeSctpSocket};

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;

use crate::config::{ChannelOption, OptionValue};
use crate::error::Result;
use crate::message::{MessageInfo, ReceiveInfo};
use crate::notification::NotificationHandler;
use crate::selector::SelectorOp;

/// Association is an opaque snapshot of a live SCTP association: its
/// kernel identifier and the negotiated stream counts. Present iff the
/// endpoint is connected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Association {
    pub association_id: i32,
    pub inbound_streams: u16,
    pub outbound_streams: u16,
}

/// SctpSocket is the kernel endpoint surface the channel consumes: a
/// non-blocking, message-oriented, multi-homed SCTP socket.
///
/// All methods are non-blocking except `ready`, which parks until the
/// requested readiness dimension fires; callers bound it with a timeout.
#[async_trait]
pub trait SctpSocket: fmt::Debug + Send + Sync {
    /// Binds the primary local address.
    fn bind(&self, addr: SocketAddr) -> Result<()>;

    /// Adds a secondary local address to the endpoint (multi-homing).
    fn bind_address(&self, addr: SocketAddr) -> Result<()>;

    /// Removes a previously added secondary local address.
    fn unbind_address(&self, addr: SocketAddr) -> Result<()>;

    /// Initiates a connect. `Ok(true)` means the association is already
    /// up; `Ok(false)` means completion must be awaited through the
    /// connect readiness dimension and `finish_connect`.
    fn connect(&self, addr: SocketAddr) -> Result<bool>;

    /// Completes a connect once connect readiness fired. `Ok(false)`
    /// means the handshake is still in flight.
    fn finish_connect(&self) -> Result<bool>;

    /// Parks until the given readiness dimension fires.
    async fn ready(&self, op: SelectorOp) -> Result<()>;

    /// Receives one datagram into `buf`. Notifications pulled from the
    /// socket are dispatched to `handler` inline; receiving continues
    /// while the handler keeps returning `Continue`. `Ok(None)` means
    /// nothing readable (or the handler stopped the turn).
    fn receive(
        &self,
        buf: &mut [u8],
        handler: &mut dyn NotificationHandler,
    ) -> Result<Option<ReceiveInfo>>;

    /// Sends one datagram described by `info`. `Err(ErrTryAgain)` means
    /// the socket buffer is full despite reported readiness.
    fn send(&self, buf: &[u8], info: &MessageInfo) -> Result<usize>;

    fn get_option(&self, key: ChannelOption) -> Result<OptionValue>;

    fn set_option(&self, key: ChannelOption, value: &OptionValue) -> Result<()>;

    /// Every bound local address, primary first.
    fn local_addresses(&self) -> Result<Vec<SocketAddr>>;

    /// Every known peer address.
    fn remote_addresses(&self) -> Result<Vec<SocketAddr>>;

    /// Snapshot of the live association, or `None` when not connected.
    fn association(&self) -> Result<Option<Association>>;

    /// Closes the endpoint. Idempotent.
    fn close(&self) -> Result<()>;
}
