use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::config::{default_value, ChannelOption, OptionValue};
use crate::error::{Error, Result};
use crate::message::{MessageInfo, ReceiveInfo};
use crate::notification::{
    AssociationChange, AssociationChangeState, HandlerResult, Notification, NotificationHandler,
    Shutdown,
};
use crate::selector::SelectorOp;
use crate::socket::{Association, SctpSocket};

static NEXT_ASSOCIATION_ID: AtomicI32 = AtomicI32::new(1);

const PIPE_STREAMS: u16 = 10;

enum PipeEvent {
    Message {
        payload: Bytes,
        stream_identifier: u16,
        payload_protocol_identifier: u32,
        unordered: bool,
    },
    Notification(Notification),
}

/// One side's inbox. `open` is cleared when the owning side closes.
struct PipeCore {
    inbox: Mutex<VecDeque<PipeEvent>>,
    readable: Notify,
    open: AtomicBool,
}

impl PipeCore {
    fn new() -> Self {
        PipeCore {
            inbox: Mutex::new(VecDeque::new()),
            readable: Notify::new(),
            open: AtomicBool::new(true),
        }
    }

    fn push(&self, event: PipeEvent) {
        self.inbox.lock().unwrap().push_back(event);
        self.readable.notify_one();
    }
}

/// PipeSctpSocket is an in-memory SCTP endpoint wired to a peer: the
/// loopback fixture behind every end-to-end test. It speaks the whole
/// `SctpSocket` surface, delivers messages and notifications in queue
/// order, and lets tests inject notifications directly.
pub struct PipeSctpSocket {
    core: Arc<PipeCore>,
    peer: Arc<PipeCore>,
    connectable: bool,
    connected: AtomicBool,
    closed: AtomicBool,
    association_id: i32,
    local: Mutex<Vec<SocketAddr>>,
    remote: Mutex<Vec<SocketAddr>>,
    options: Mutex<HashMap<ChannelOption, OptionValue>>,
}

impl fmt::Debug for PipeSctpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeSctpSocket")
            .field("association_id", &self.association_id)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Creates a wired pair of pipe endpoints sharing one association id.
pub fn pipe() -> (PipeSctpSocket, PipeSctpSocket) {
    let a = Arc::new(PipeCore::new());
    let b = Arc::new(PipeCore::new());
    let association_id = NEXT_ASSOCIATION_ID.fetch_add(1, Ordering::SeqCst);
    (
        PipeSctpSocket::new(Arc::clone(&a), Arc::clone(&b), true, association_id),
        PipeSctpSocket::new(b, a, true, association_id),
    )
}

impl PipeSctpSocket {
    fn new(
        core: Arc<PipeCore>,
        peer: Arc<PipeCore>,
        connectable: bool,
        association_id: i32,
    ) -> Self {
        PipeSctpSocket {
            core,
            peer,
            connectable,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            association_id,
            local: Mutex::new(Vec::new()),
            remote: Mutex::new(Vec::new()),
            options: Mutex::new(HashMap::new()),
        }
    }

    /// An endpoint whose connect never completes, for timeout paths.
    pub fn unconnectable() -> Self {
        let association_id = NEXT_ASSOCIATION_ID.fetch_add(1, Ordering::SeqCst);
        PipeSctpSocket::new(
            Arc::new(PipeCore::new()),
            Arc::new(PipeCore::new()),
            false,
            association_id,
        )
    }

    /// Delivers a notification to this endpoint's own inbox, as the
    /// kernel would.
    pub fn push_notification(&self, notification: Notification) {
        self.core.push(PipeEvent::Notification(notification));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn association_id(&self) -> i32 {
        self.association_id
    }
}

#[async_trait]
impl SctpSocket for PipeSctpSocket {
    fn bind(&self, addr: SocketAddr) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrBindFailed {
                reason: "socket closed".to_string(),
            });
        }
        self.local.lock().unwrap().insert(0, addr);
        Ok(())
    }

    fn bind_address(&self, addr: SocketAddr) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrBindFailed {
                reason: "socket closed".to_string(),
            });
        }
        self.local.lock().unwrap().push(addr);
        Ok(())
    }

    fn unbind_address(&self, addr: SocketAddr) -> Result<()> {
        let mut local = self.local.lock().unwrap();
        match local.iter().position(|a| *a == addr) {
            Some(i) => {
                local.remove(i);
                Ok(())
            }
            None => Err(Error::ErrBindFailed {
                reason: format!("address {addr} is not bound"),
            }),
        }
    }

    fn connect(&self, addr: SocketAddr) -> Result<bool> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectFailed {
                reason: "socket closed".to_string(),
            });
        }
        if !self.connectable {
            return Ok(false);
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.remote.lock().unwrap().push(addr);
            // the kernel reports the new association before any data
            self.core
                .push(PipeEvent::Notification(Notification::AssociationChange(
                    AssociationChange {
                        state: AssociationChangeState::CommUp,
                        error: 0,
                        outbound_streams: PIPE_STREAMS,
                        inbound_streams: PIPE_STREAMS,
                        association_id: self.association_id,
                    },
                )));
        }
        Ok(true)
    }

    fn finish_connect(&self) -> Result<bool> {
        Ok(self.connected.load(Ordering::SeqCst))
    }

    async fn ready(&self, op: SelectorOp) -> Result<()> {
        match op {
            SelectorOp::Read => loop {
                let notified = self.core.readable.notified();
                let has_input = !self.core.inbox.lock().unwrap().is_empty();
                if has_input
                    || self.closed.load(Ordering::SeqCst)
                    || !self.peer.open.load(Ordering::SeqCst)
                {
                    return Ok(());
                }
                notified.await;
            },
            SelectorOp::Write => Ok(()),
            SelectorOp::Connect => {
                if self.connectable {
                    Ok(())
                } else {
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        }
    }

    fn receive(
        &self,
        buf: &mut [u8],
        handler: &mut dyn NotificationHandler,
    ) -> Result<Option<ReceiveInfo>> {
        loop {
            let event = self.core.inbox.lock().unwrap().pop_front();
            match event {
                None => return Ok(None),
                Some(PipeEvent::Message {
                    payload,
                    stream_identifier,
                    payload_protocol_identifier,
                    unordered,
                }) => {
                    if payload.len() > buf.len() {
                        return Err(Error::ErrReadFailed {
                            reason: format!(
                                "receive buffer too small: {} < {}",
                                buf.len(),
                                payload.len()
                            ),
                        });
                    }
                    buf[..payload.len()].copy_from_slice(&payload);
                    return Ok(Some(ReceiveInfo {
                        message_length: payload.len(),
                        stream_identifier,
                        payload_protocol_identifier,
                        unordered,
                    }));
                }
                Some(PipeEvent::Notification(notification)) => {
                    match handler.handle_notification(notification) {
                        HandlerResult::Continue => {}
                        HandlerResult::Return => return Ok(None),
                    }
                }
            }
        }
    }

    fn send(&self, buf: &[u8], info: &MessageInfo) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrWriteFailed {
                reason: "socket closed".to_string(),
            });
        }
        if !self.peer.open.load(Ordering::SeqCst) {
            return Err(Error::ErrWriteFailed {
                reason: "peer closed".to_string(),
            });
        }
        self.peer.push(PipeEvent::Message {
            payload: Bytes::copy_from_slice(buf),
            stream_identifier: info.stream_identifier,
            payload_protocol_identifier: info.payload_protocol_identifier,
            unordered: info.unordered,
        });
        Ok(buf.len())
    }

    fn get_option(&self, key: ChannelOption) -> Result<OptionValue> {
        Ok(self
            .options
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| default_value(key)))
    }

    fn set_option(&self, key: ChannelOption, value: &OptionValue) -> Result<()> {
        self.options.lock().unwrap().insert(key, value.clone());
        Ok(())
    }

    fn local_addresses(&self) -> Result<Vec<SocketAddr>> {
        Ok(self.local.lock().unwrap().clone())
    }

    fn remote_addresses(&self) -> Result<Vec<SocketAddr>> {
        Ok(self.remote.lock().unwrap().clone())
    }

    fn association(&self) -> Result<Option<Association>> {
        if self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst) {
            Ok(Some(Association {
                association_id: self.association_id,
                inbound_streams: PIPE_STREAMS,
                outbound_streams: PIPE_STREAMS,
            }))
        } else {
            Ok(None)
        }
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.core.open.store(false, Ordering::SeqCst);
            self.core.readable.notify_one();
            if self.peer.open.load(Ordering::SeqCst) {
                self.peer
                    .push(PipeEvent::Notification(Notification::Shutdown(Shutdown {
                        association_id: self.association_id,
                    })));
            }
        }
        Ok(())
    }
}
