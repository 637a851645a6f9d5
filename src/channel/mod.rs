#[cfg(test)]
mod channel_test;

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::BytesMut;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::config::SctpChannelConfig;
use crate::error::{Error, Result};
use crate::handler::{FileRegion, InboundPipeline};
use crate::message::{MessageInfo, SctpMessage};
use crate::notification::{HandlerResult, Notification, NotificationHandler};
use crate::selector::{Selector, SelectorOp};
use crate::socket::{Association, SctpSocket};

/// channel lifecycle enums. `Closed` is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Fresh = 0,
    Bound = 1,
    Connected = 2,
    Closed = 3,
}

impl From<u8> for ChannelState {
    fn from(v: u8) -> ChannelState {
        match v {
            1 => ChannelState::Bound,
            2 => ChannelState::Connected,
            3 => ChannelState::Closed,
            _ => ChannelState::Fresh,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ChannelState::Fresh => "Fresh",
            ChannelState::Bound => "Bound",
            ChannelState::Connected => "Connected",
            ChannelState::Closed => "Closed",
        };
        write!(f, "{s}")
    }
}

type Completer = oneshot::Sender<Result<()>>;

enum Command {
    Bind(SocketAddr, Completer),
    Connect {
        remote: SocketAddr,
        local: Option<SocketAddr>,
        completer: Completer,
    },
    BindAddress(SocketAddr, Completer),
    UnbindAddress(SocketAddr, Completer),
    Write(SctpMessage, Completer),
    Flush(Completer),
    Disconnect(Completer),
    Close(Completer),
    Deregister(Completer),
}

/// ChannelFuture completes when the owner loop has executed the
/// submitted operation. If the loop is gone the future fails with
/// `ErrChannelClosed`.
pub struct ChannelFuture {
    inner: FutureInner,
}

enum FutureInner {
    Pending(oneshot::Receiver<Result<()>>),
    Ready(Option<Result<()>>),
}

impl ChannelFuture {
    fn from_receiver(rx: oneshot::Receiver<Result<()>>) -> Self {
        ChannelFuture {
            inner: FutureInner::Pending(rx),
        }
    }

    /// A future that is already resolved.
    pub fn completed(result: Result<()>) -> Self {
        ChannelFuture {
            inner: FutureInner::Ready(Some(result)),
        }
    }
}

impl Future for ChannelFuture {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            FutureInner::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|r| r.unwrap_or(Err(Error::ErrChannelClosed))),
            FutureInner::Ready(slot) => {
                Poll::Ready(slot.take().unwrap_or(Err(Error::ErrChannelClosed)))
            }
        }
    }
}

struct ChannelShared {
    name: String,
    socket: Arc<dyn SctpSocket>,
    config: Arc<SctpChannelConfig>,
    state: AtomicU8,
    read_suspended: AtomicBool,
}

impl ChannelShared {
    fn state(&self) -> ChannelState {
        ChannelState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// SctpChannel adapts a kernel SCTP endpoint into an event-loop-owned
/// channel.
///
/// `register` spawns the owner loop; after that every operation —
/// from any thread — is enqueued on the owner and returns a
/// [`ChannelFuture`] that completes once the owner has executed it.
/// Submission order is preserved. All socket I/O, selector turns and
/// state transitions happen on the owner, so there is no off-loop path
/// to guard against.
#[derive(Clone)]
pub struct SctpChannel {
    shared: Arc<ChannelShared>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Command>>>>,
}

impl fmt::Debug for SctpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SctpChannel")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl SctpChannel {
    pub fn new(name: impl Into<String>, socket: Arc<dyn SctpSocket>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let config = Arc::new(SctpChannelConfig::attached(Arc::clone(&socket)));
        SctpChannel {
            shared: Arc::new(ChannelShared {
                name: name.into(),
                socket,
                config,
                state: AtomicU8::new(ChannelState::Fresh as u8),
                read_suspended: AtomicBool::new(false),
            }),
            cmd_tx,
            cmd_rx: Arc::new(Mutex::new(Some(cmd_rx))),
        }
    }

    /// Spawns the owner event loop feeding `pipeline`. One-shot: a
    /// channel is registered once for its lifetime.
    pub fn register(&self, pipeline: Arc<dyn InboundPipeline>) -> Result<()> {
        let cmd_rx = self
            .cmd_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Other("channel already registered".to_string()))?;
        let socket = Arc::clone(&self.shared.socket);
        let runner = ChannelRunner {
            shared: Arc::clone(&self.shared),
            pipeline,
            cmd_rx,
            read_selector: Selector::new(Arc::clone(&socket), SelectorOp::Read),
            write_selector: Selector::new(Arc::clone(&socket), SelectorOp::Write),
            connect_selector: Selector::new(socket, SelectorOp::Connect),
            outbound: VecDeque::new(),
        };
        tokio::spawn(runner.run());
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &SctpChannelConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Snapshot of the live association; `None` when not connected or
    /// when the socket cannot answer.
    pub fn association(&self) -> Option<Association> {
        self.shared.socket.association().ok().flatten()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ChannelState::Connected && self.association().is_some()
    }

    /// Every bound local address. Failures collapse to an empty set so
    /// idle introspection works on partially initialized sockets.
    pub fn all_local_addresses(&self) -> Vec<SocketAddr> {
        self.shared.socket.local_addresses().unwrap_or_default()
    }

    /// Every known peer address, with the same swallow-to-empty policy.
    pub fn all_remote_addresses(&self) -> Vec<SocketAddr> {
        self.shared.socket.remote_addresses().unwrap_or_default()
    }

    /// Suspends or resumes the read loop. Takes effect mid-batch.
    pub fn set_read_suspended(&self, suspended: bool) {
        self.shared.read_suspended.store(suspended, Ordering::SeqCst);
    }

    pub fn is_read_suspended(&self) -> bool {
        self.shared.read_suspended.load(Ordering::SeqCst)
    }

    fn submit(&self, make: impl FnOnce(Completer) -> Command) -> ChannelFuture {
        let (tx, rx) = oneshot::channel();
        // a failed send drops the completer, which resolves the future
        // with ErrChannelClosed
        let _ = self.cmd_tx.send(make(tx));
        ChannelFuture::from_receiver(rx)
    }

    /// Binds the primary local address.
    pub fn bind(&self, addr: SocketAddr) -> ChannelFuture {
        self.submit(|completer| Command::Bind(addr, completer))
    }

    /// Connects to `remote`, binding `local` first when given. On
    /// failure or timeout the channel is closed before the future
    /// fails; it is not reusable afterwards.
    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> ChannelFuture {
        self.submit(|completer| Command::Connect {
            remote,
            local,
            completer,
        })
    }

    /// Adds a secondary local address (multi-homing). Requires at least
    /// a bound channel.
    pub fn bind_address(&self, addr: SocketAddr) -> ChannelFuture {
        self.submit(|completer| Command::BindAddress(addr, completer))
    }

    /// Removes a secondary local address.
    pub fn unbind_address(&self, addr: SocketAddr) -> ChannelFuture {
        self.submit(|completer| Command::UnbindAddress(addr, completer))
    }

    /// Enqueues one message. Delivery starts at the next `flush`.
    pub fn write(&self, message: SctpMessage) -> ChannelFuture {
        self.submit(|completer| Command::Write(message, completer))
    }

    /// Drives the write loop over everything enqueued so far.
    pub fn flush(&self) -> ChannelFuture {
        self.submit(Command::Flush)
    }

    /// SCTP has no half-close at this layer; disconnect closes.
    pub fn disconnect(&self) -> ChannelFuture {
        if self.state() == ChannelState::Closed {
            return ChannelFuture::completed(Ok(()));
        }
        self.submit(Command::Disconnect)
    }

    /// Idempotent: closing a closed channel succeeds.
    pub fn close(&self) -> ChannelFuture {
        if self.state() == ChannelState::Closed {
            return ChannelFuture::completed(Ok(()));
        }
        self.submit(Command::Close)
    }

    /// Stops the owner loop without closing the socket.
    pub fn deregister(&self) -> ChannelFuture {
        self.submit(Command::Deregister)
    }

    /// File regions cannot be expressed as SCTP messages.
    pub fn send_file(&self, _region: FileRegion) -> ChannelFuture {
        ChannelFuture::completed(Err(Error::ErrUnsupportedOperation {
            operation: "send_file".to_string(),
        }))
    }
}

/// Inline notification dispatch for one read turn. Messages already
/// sitting in the sink are flushed to the pipeline before the
/// notification user event fires, so a shutdown can never overtake a
/// message read in the same turn.
struct ReadTurnHandler<'a> {
    name: &'a str,
    sink: &'a mut Vec<SctpMessage>,
    pipeline: &'a dyn InboundPipeline,
    close_requested: &'a mut bool,
}

impl NotificationHandler for ReadTurnHandler<'_> {
    fn handle_notification(&mut self, notification: Notification) -> HandlerResult {
        for message in self.sink.drain(..) {
            self.pipeline.message_received(message);
        }
        log::debug!("[{}] notification: {notification}", self.name);
        let shutdown = matches!(notification, Notification::Shutdown(_));
        self.pipeline.user_event_triggered(notification);
        if shutdown {
            *self.close_requested = true;
            HandlerResult::Return
        } else {
            HandlerResult::Continue
        }
    }
}

struct ChannelRunner {
    shared: Arc<ChannelShared>,
    pipeline: Arc<dyn InboundPipeline>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    read_selector: Selector,
    write_selector: Selector,
    connect_selector: Selector,
    outbound: VecDeque<(SctpMessage, Completer)>,
}

impl ChannelRunner {
    async fn run(mut self) {
        log::debug!("[{}] event loop started", self.shared.name);
        loop {
            // queued operations first, in submission order
            loop {
                match self.cmd_rx.try_recv() {
                    Ok(command) => {
                        if self.run_command(command).await {
                            self.drain_queued();
                            log::debug!("[{}] event loop stopped", self.shared.name);
                            return;
                        }
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        self.do_close();
                        break;
                    }
                }
            }

            if self.shared.state() == ChannelState::Closed {
                break;
            }

            if self.shared.state() == ChannelState::Connected
                && !self.shared.read_suspended.load(Ordering::SeqCst)
            {
                self.read_turn().await;
            } else {
                // park on the queue, bounded so close and suspension
                // flips are noticed
                match timeout(self.shared.config.so_timeout(), self.cmd_rx.recv()).await {
                    Ok(Some(command)) => {
                        if self.run_command(command).await {
                            self.drain_queued();
                            log::debug!("[{}] event loop stopped", self.shared.name);
                            return;
                        }
                    }
                    Ok(None) => self.do_close(),
                    Err(_) => {}
                }
            }
        }
        self.drain_queued();
        log::debug!("[{}] event loop stopped", self.shared.name);
    }

    /// Returns true when the loop must stop (deregister).
    async fn run_command(&mut self, command: Command) -> bool {
        if self.shared.state() == ChannelState::Closed {
            // close stays idempotent; everything else is rejected
            // without touching the socket
            return match command {
                Command::Close(completer) | Command::Disconnect(completer) => {
                    let _ = completer.send(Ok(()));
                    false
                }
                Command::Deregister(completer) => {
                    let _ = completer.send(Ok(()));
                    true
                }
                other => {
                    Self::fail_command(other);
                    false
                }
            };
        }
        match command {
            Command::Bind(addr, completer) => {
                let _ = completer.send(self.do_bind(addr));
                false
            }
            Command::Connect {
                remote,
                local,
                completer,
            } => {
                let _ = completer.send(self.do_connect(remote, local).await);
                false
            }
            Command::BindAddress(addr, completer) => {
                let _ = completer.send(self.do_bind_address(addr));
                false
            }
            Command::UnbindAddress(addr, completer) => {
                let _ = completer.send(self.do_unbind_address(addr));
                false
            }
            Command::Write(message, completer) => {
                self.outbound.push_back((message, completer));
                false
            }
            Command::Flush(completer) => {
                self.do_write_messages().await;
                let _ = completer.send(Ok(()));
                false
            }
            Command::Disconnect(completer) | Command::Close(completer) => {
                self.do_close();
                let _ = completer.send(Ok(()));
                false
            }
            Command::Deregister(completer) => {
                log::debug!("[{}] deregistered", self.shared.name);
                let _ = completer.send(Ok(()));
                true
            }
        }
    }

    fn fail_command(command: Command) {
        let completer = match command {
            Command::Bind(_, c)
            | Command::Connect { completer: c, .. }
            | Command::BindAddress(_, c)
            | Command::UnbindAddress(_, c)
            | Command::Write(_, c)
            | Command::Flush(c)
            | Command::Disconnect(c)
            | Command::Close(c)
            | Command::Deregister(c) => c,
        };
        let _ = completer.send(Err(Error::ErrChannelClosed));
    }

    fn drain_queued(&mut self) {
        self.cmd_rx.close();
        while let Ok(command) = self.cmd_rx.try_recv() {
            // terminal operations stay idempotent even while the loop
            // is tearing down; everything else is rejected
            match command {
                Command::Close(completer)
                | Command::Disconnect(completer)
                | Command::Deregister(completer) => {
                    let _ = completer.send(Ok(()));
                }
                other => Self::fail_command(other),
            }
        }
        for (_, completer) in self.outbound.drain(..) {
            let _ = completer.send(Err(Error::ErrChannelClosed));
        }
    }

    fn do_bind(&mut self, addr: SocketAddr) -> Result<()> {
        self.shared.socket.bind(addr)?;
        if self.shared.state() == ChannelState::Fresh {
            self.shared.set_state(ChannelState::Bound);
        }
        log::debug!("[{}] bound to {addr}", self.shared.name);
        Ok(())
    }

    fn do_bind_address(&self, addr: SocketAddr) -> Result<()> {
        match self.shared.state() {
            ChannelState::Bound | ChannelState::Connected => {
                self.shared.socket.bind_address(addr)
            }
            _ => Err(Error::ErrChannelNotBound),
        }
    }

    fn do_unbind_address(&self, addr: SocketAddr) -> Result<()> {
        match self.shared.state() {
            ChannelState::Bound | ChannelState::Connected => {
                self.shared.socket.unbind_address(addr)
            }
            _ => Err(Error::ErrChannelNotBound),
        }
    }

    async fn do_connect(&mut self, remote: SocketAddr, local: Option<SocketAddr>) -> Result<()> {
        if self.shared.state() == ChannelState::Connected {
            return Err(Error::ErrConnectFailed {
                reason: "already connected".to_string(),
            });
        }
        match self.connect_inner(remote, local).await {
            Ok(()) => {
                self.shared.set_state(ChannelState::Connected);
                log::debug!("[{}] connected to {remote}", self.shared.name);
                self.pipeline.channel_active();
                Ok(())
            }
            Err(e) => {
                // the endpoint is not reusable after a failed connect
                self.do_close();
                Err(e)
            }
        }
    }

    async fn connect_inner(&mut self, remote: SocketAddr, local: Option<SocketAddr>) -> Result<()> {
        if let Some(addr) = local {
            self.do_bind(addr)?;
        }
        let deadline = Instant::now() + self.shared.config.connect_timeout();
        let mut finished = self.shared.socket.connect(remote)?;
        while !finished {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ErrConnectTimeout);
            }
            let wait = self.shared.config.so_timeout().min(deadline - now);
            let selected = self
                .connect_selector
                .select(wait)
                .await
                .map_err(|e| Error::ErrConnectFailed {
                    reason: e.to_string(),
                })?;
            if selected > 0 {
                let result = self.shared.socket.finish_connect();
                self.connect_selector.clear_selected();
                finished = result?;
            }
        }
        Ok(())
    }

    async fn read_turn(&mut self) {
        let mut sink = Vec::new();
        let mut close_requested = false;
        let result = self.do_read_messages(&mut sink, &mut close_requested).await;
        self.read_selector.clear_selected();
        for message in sink {
            self.pipeline.message_received(message);
        }
        if let Err(e) = result {
            log::warn!("[{}] read failed: {e}", self.shared.name);
            self.do_close();
            return;
        }
        if close_requested {
            self.do_close();
        }
    }

    async fn do_read_messages(
        &self,
        sink: &mut Vec<SctpMessage>,
        close_requested: &mut bool,
    ) -> Result<()> {
        if self.shared.read_suspended.load(Ordering::SeqCst) || !self.read_selector.is_open() {
            return Ok(());
        }
        let selected = self
            .read_selector
            .select(self.shared.config.so_timeout())
            .await?;
        for _ in 0..selected {
            let mut buf = BytesMut::zeroed(self.shared.config.receive_buffer_size());
            let received = {
                let mut handler = ReadTurnHandler {
                    name: &self.shared.name,
                    sink: &mut *sink,
                    pipeline: self.pipeline.as_ref(),
                    close_requested: &mut *close_requested,
                };
                self.shared.socket.receive(&mut buf, &mut handler)
            };
            match received {
                Ok(Some(info)) => {
                    if info.message_length > buf.len() {
                        return Err(Error::ErrReadFailed {
                            reason: "reported message length exceeds the receive buffer"
                                .to_string(),
                        });
                    }
                    let payload = buf.split_to(info.message_length).freeze();
                    sink.push(SctpMessage::from_receive(payload, &info));
                }
                Ok(None) => {}
                Err(Error::ErrTryAgain) => {}
                Err(e) => return Err(e),
            }
            if *close_requested || self.shared.read_suspended.load(Ordering::SeqCst) {
                break;
            }
        }
        Ok(())
    }

    async fn do_write_messages(&mut self) {
        while let Some((message, completer)) = self.outbound.pop_front() {
            let result = self.write_one(&message).await;
            if let Err(e) = &result {
                log::debug!("[{}] write failed: {e}", self.shared.name);
            }
            let _ = completer.send(result);
        }
    }

    async fn write_one(&self, message: &SctpMessage) -> Result<()> {
        if self.shared.state() != ChannelState::Connected {
            return Err(Error::ErrNotConnected);
        }
        let association = match self.shared.socket.association() {
            Ok(Some(a)) => a,
            _ => return Err(Error::ErrNotConnected),
        };
        if message.stream_identifier() >= association.outbound_streams {
            return Err(Error::ErrStreamIdentifierOutOfRange {
                stream_identifier: message.stream_identifier(),
                outbound_streams: association.outbound_streams,
            });
        }
        let info = MessageInfo::new(association, message);
        let so_timeout = self.shared.config.so_timeout();
        let spin = self.shared.config.write_spin_count();
        for _ in 0..spin {
            let selected = self.write_selector.select(so_timeout).await?;
            if selected == 0 {
                continue;
            }
            let sent = self.shared.socket.send(message.payload(), &info);
            self.write_selector.clear_selected();
            match sent {
                // SCTP is message oriented: anything but the whole
                // message is a failure, not progress
                Ok(n) if n == message.payload().len() => return Ok(()),
                Ok(n) => {
                    return Err(Error::ErrShortWrite {
                        expected: message.payload().len(),
                        written: n,
                    })
                }
                Err(Error::ErrTryAgain) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::ErrWriteFailed {
            reason: format!("no write readiness after {spin} turns"),
        })
    }

    fn do_close(&mut self) {
        let prev = ChannelState::from(
            self.shared
                .state
                .swap(ChannelState::Closed as u8, Ordering::SeqCst),
        );
        if prev == ChannelState::Closed {
            return;
        }
        log::debug!("[{}] closing channel", self.shared.name);
        for selector in [
            &self.read_selector,
            &self.write_selector,
            &self.connect_selector,
        ] {
            if let Err(e) = selector.close() {
                log::warn!(
                    "[{}] failed to close {} selector: {e}",
                    self.shared.name,
                    selector.op()
                );
            }
        }
        if let Err(e) = self.shared.socket.close() {
            log::warn!("[{}] failed to close socket: {e}", self.shared.name);
        }
        for (_, completer) in self.outbound.drain(..) {
            let _ = completer.send(Err(Error::ErrChannelClosed));
        }
        if prev == ChannelState::Connected {
            self.pipeline.channel_inactive();
        }
    }
}
