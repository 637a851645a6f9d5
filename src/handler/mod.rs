#[cfg(test)]
mod handler_test;

use std::fmt;
use std::fs::File;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::channel::{ChannelFuture, SctpChannel};
use crate::error::Error;
use crate::message::SctpMessage;
use crate::notification::Notification;

/// InboundPipeline is the surface the channel produces events into: one
/// `message_received` per datagram, one `user_event_triggered` per SCTP
/// notification, and the active/inactive transitions.
pub trait InboundPipeline: Send + Sync {
    fn channel_active(&self);
    fn channel_inactive(&self);
    fn message_received(&self, message: SctpMessage);
    fn user_event_triggered(&self, notification: Notification);
}

/// A byte range of an open file, the operand of `send_file`.
#[derive(Debug, Clone)]
pub struct FileRegion {
    pub file: Arc<File>,
    pub position: u64,
    pub count: u64,
}

/// HandlerContext points one handler at the rest of its pipeline; every
/// forwarding call continues with the next handler, or the channel at
/// the tail.
pub struct HandlerContext<'a> {
    pipeline: &'a OutboundPipeline,
    index: usize,
}

impl HandlerContext<'_> {
    pub fn bind(&self, addr: SocketAddr) -> ChannelFuture {
        self.pipeline.invoke_bind(self.index + 1, addr)
    }

    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> ChannelFuture {
        self.pipeline.invoke_connect(self.index + 1, remote, local)
    }

    pub fn disconnect(&self) -> ChannelFuture {
        self.pipeline.invoke_disconnect(self.index + 1)
    }

    pub fn close(&self) -> ChannelFuture {
        self.pipeline.invoke_close(self.index + 1)
    }

    pub fn deregister(&self) -> ChannelFuture {
        self.pipeline.invoke_deregister(self.index + 1)
    }

    pub fn flush(&self) -> ChannelFuture {
        self.pipeline.invoke_flush(self.index + 1)
    }

    pub fn send_file(&self, region: FileRegion) -> ChannelFuture {
        self.pipeline.invoke_send_file(self.index + 1, region)
    }
}

/// OutboundHandler sees every outbound operation on its way to the
/// channel. Every method has a pass-through default, so an
/// implementation only overrides what it intercepts.
///
/// A handler that buffers writes must advertise it via
/// `buffers_writes` and shadow `flush`: the inherited pass-through
/// would silently lose the buffered data, so it fails with
/// `ErrFlushNotOverridden` instead.
pub trait OutboundHandler: Send + Sync {
    /// Capability advertisement: does this handler queue writes it must
    /// release on `flush`?
    fn buffers_writes(&self) -> bool {
        false
    }

    fn bind(&self, ctx: &HandlerContext<'_>, addr: SocketAddr) -> ChannelFuture {
        ctx.bind(addr)
    }

    fn connect(
        &self,
        ctx: &HandlerContext<'_>,
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> ChannelFuture {
        ctx.connect(remote, local)
    }

    fn disconnect(&self, ctx: &HandlerContext<'_>) -> ChannelFuture {
        ctx.disconnect()
    }

    fn close(&self, ctx: &HandlerContext<'_>) -> ChannelFuture {
        ctx.close()
    }

    fn deregister(&self, ctx: &HandlerContext<'_>) -> ChannelFuture {
        ctx.deregister()
    }

    fn flush(&self, ctx: &HandlerContext<'_>) -> ChannelFuture {
        if self.buffers_writes() {
            return ChannelFuture::completed(Err(Error::ErrFlushNotOverridden));
        }
        ctx.flush()
    }

    fn send_file(&self, ctx: &HandlerContext<'_>, region: FileRegion) -> ChannelFuture {
        ctx.send_file(region)
    }
}

/// OutboundPipeline walks outbound operations head to tail through its
/// handlers and hands them to the channel at the end.
pub struct OutboundPipeline {
    handlers: Vec<Arc<dyn OutboundHandler>>,
    channel: SctpChannel,
}

impl fmt::Debug for OutboundPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundPipeline")
            .field("handlers", &self.handlers.len())
            .field("channel", &self.channel)
            .finish()
    }
}

impl OutboundPipeline {
    pub fn new(channel: SctpChannel) -> Self {
        OutboundPipeline {
            handlers: Vec::new(),
            channel,
        }
    }

    /// Appends a handler; operations traverse handlers in insertion
    /// order.
    pub fn add_last(&mut self, handler: Arc<dyn OutboundHandler>) {
        self.handlers.push(handler);
    }

    pub fn channel(&self) -> &SctpChannel {
        &self.channel
    }

    pub fn bind(&self, addr: SocketAddr) -> ChannelFuture {
        self.invoke_bind(0, addr)
    }

    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> ChannelFuture {
        self.invoke_connect(0, remote, local)
    }

    pub fn disconnect(&self) -> ChannelFuture {
        self.invoke_disconnect(0)
    }

    pub fn close(&self) -> ChannelFuture {
        self.invoke_close(0)
    }

    pub fn deregister(&self) -> ChannelFuture {
        self.invoke_deregister(0)
    }

    pub fn flush(&self) -> ChannelFuture {
        self.invoke_flush(0)
    }

    pub fn send_file(&self, region: FileRegion) -> ChannelFuture {
        self.invoke_send_file(0, region)
    }

    /// Writes bypass the handler chain and land in the channel's
    /// outbound queue; `flush` releases them.
    pub fn write(&self, message: SctpMessage) -> ChannelFuture {
        self.channel.write(message)
    }

    fn invoke_bind(&self, index: usize, addr: SocketAddr) -> ChannelFuture {
        match self.handlers.get(index) {
            Some(handler) => handler.bind(&HandlerContext { pipeline: self, index }, addr),
            None => self.channel.bind(addr),
        }
    }

    fn invoke_connect(
        &self,
        index: usize,
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> ChannelFuture {
        match self.handlers.get(index) {
            Some(handler) => {
                handler.connect(&HandlerContext { pipeline: self, index }, remote, local)
            }
            None => self.channel.connect(remote, local),
        }
    }

    fn invoke_disconnect(&self, index: usize) -> ChannelFuture {
        match self.handlers.get(index) {
            Some(handler) => handler.disconnect(&HandlerContext { pipeline: self, index }),
            None => self.channel.disconnect(),
        }
    }

    fn invoke_close(&self, index: usize) -> ChannelFuture {
        match self.handlers.get(index) {
            Some(handler) => handler.close(&HandlerContext { pipeline: self, index }),
            None => self.channel.close(),
        }
    }

    fn invoke_deregister(&self, index: usize) -> ChannelFuture {
        match self.handlers.get(index) {
            Some(handler) => handler.deregister(&HandlerContext { pipeline: self, index }),
            None => self.channel.deregister(),
        }
    }

    fn invoke_flush(&self, index: usize) -> ChannelFuture {
        match self.handlers.get(index) {
            Some(handler) => handler.flush(&HandlerContext { pipeline: self, index }),
            None => self.channel.flush(),
        }
    }

    fn invoke_send_file(&self, index: usize, region: FileRegion) -> ChannelFuture {
        match self.handlers.get(index) {
            Some(handler) => {
                handler.send_file(&HandlerContext { pipeline: self, index }, region)
            }
            None => self.channel.send_file(region),
        }
    }
}
