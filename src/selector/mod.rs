#[cfg(test)]
mod selector_test;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::socket::SctpSocket;

/// The readiness dimension a selector waits on. Connect completion is a
/// dimension of its own so driving a connect can never starve reads or
/// writes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SelectorOp {
    Read,
    Write,
    Connect,
}

impl fmt::Display for SelectorOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            SelectorOp::Read => "Read",
            SelectorOp::Write => "Write",
            SelectorOp::Connect => "Connect",
        };
        write!(f, "{s}")
    }
}

/// Selector is one bounded-wait readiness source over the channel's
/// socket. A channel registers three, one per dimension; each turn
/// selects at most one key and the selected set is cleared before the
/// next turn.
pub struct Selector {
    socket: Arc<dyn SctpSocket>,
    op: SelectorOp,
    open: AtomicBool,
    selected: AtomicUsize,
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("op", &self.op)
            .field("open", &self.open.load(Ordering::SeqCst))
            .finish()
    }
}

impl Selector {
    pub fn new(socket: Arc<dyn SctpSocket>, op: SelectorOp) -> Self {
        Selector {
            socket,
            op,
            open: AtomicBool::new(true),
            selected: AtomicUsize::new(0),
        }
    }

    pub fn op(&self) -> SelectorOp {
        self.op
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout` for readiness. Returns the number of
    /// selected keys: 1 when the socket is ready, 0 on timeout or when
    /// the selector is closed.
    pub async fn select(&self, timeout: Duration) -> Result<usize> {
        if !self.is_open() {
            return Ok(0);
        }
        match tokio::time::timeout(timeout, self.socket.ready(self.op)).await {
            Err(_) => Ok(0),
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => {
                self.selected.store(1, Ordering::SeqCst);
                Ok(1)
            }
        }
    }

    pub fn selected_keys(&self) -> usize {
        self.selected.load(Ordering::SeqCst)
    }

    /// Clears the selected-key set. Every turn does this in a post-hook
    /// so a failed turn cannot leak keys into the next one.
    pub fn clear_selected(&self) {
        self.selected.store(0, Ordering::SeqCst);
    }

    /// Closes the selector; later `select` calls yield zero keys.
    /// Idempotent, and reports whether this call performed the close.
    pub fn close(&self) -> Result<bool> {
        Ok(self.open.swap(false, Ordering::SeqCst))
    }
}
