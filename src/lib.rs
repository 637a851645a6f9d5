//! Blocking-style SCTP transport channel for Tokio
//!
//! [SCTP](https://en.wikipedia.org/wiki/Stream_Control_Transmission_Protocol), defined in RFC 4960,
//! is a message-oriented, multi-homed, multi-streamed transport supplied by the kernel. This crate
//! adapts a kernel SCTP endpoint into an event-loop-owned channel: one owner task performs all
//! socket I/O in bounded-wait turns over three independent readiness selectors (read, write,
//! connect), delivers discrete [`SctpMessage`]s and association [`Notification`]s into a handler
//! pipeline, and accepts operations from any thread by re-posting them to the owner.
//!
//! Per-channel configuration supports deferred option application: options set before a socket
//! exists are cached and flushed exactly once on assignment.

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

mod channel;
mod config;
mod error;
mod handler;
mod message;
mod notification;
mod selector;
mod socket;

pub use crate::channel::{ChannelFuture, ChannelState, SctpChannel};
pub use crate::config::{
    default_value, ChannelOption, InitMaxStreams, OptionValue, SctpChannelConfig,
    SctpServerChannelConfig, CHANNEL_OPTIONS, DEFAULT_CONNECT_TIMEOUT_MILLIS,
    DEFAULT_INIT_MAX_STREAMS, DEFAULT_RECEIVE_BUFFER_SIZE, DEFAULT_SEND_BUFFER_SIZE,
    DEFAULT_SO_TIMEOUT_MILLIS, DEFAULT_WRITE_SPIN_COUNT, SERVER_CHANNEL_OPTIONS,
};
pub use crate::error::{Error, Result};
pub use crate::handler::{
    FileRegion, HandlerContext, InboundPipeline, OutboundHandler, OutboundPipeline,
};
pub use crate::message::{MessageInfo, ReceiveInfo, SctpMessage};
pub use crate::notification::{
    AssociationChange, AssociationChangeState, HandlerResult, Notification, NotificationHandler,
    PeerAddressChange, PeerAddressChangeState, SendFailed, Shutdown,
};
pub use crate::selector::{Selector, SelectorOp};
#[cfg(target_os = "linux")]
pub use crate::socket::KernelSctpSocket;
pub use crate::socket::{pipe, Association, PipeSctpSocket, SctpSocket};
