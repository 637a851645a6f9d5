#[cfg(test)]
mod config_test;

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::socket::SctpSocket;

pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 32 * 1024;
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 32 * 1024;
pub const DEFAULT_CONNECT_TIMEOUT_MILLIS: u64 = 30_000;
pub const DEFAULT_SO_TIMEOUT_MILLIS: u64 = 1_000;
pub const DEFAULT_WRITE_SPIN_COUNT: u32 = 16;

/// ChannelOption is the finite set of option keys a channel understands.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChannelOption {
    Rcvbuf,
    Sndbuf,
    ReuseAddress,
    Linger,
    SctpNodelay,
    InitMaxStreams,
    PrimaryAddress,
    ConnectTimeout,
    SoTimeout,
    WriteSpinCount,
    /// Server channels only.
    Backlog,
}

impl fmt::Display for ChannelOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ChannelOption::Rcvbuf => "SO_RCVBUF",
            ChannelOption::Sndbuf => "SO_SNDBUF",
            ChannelOption::ReuseAddress => "SO_REUSEADDR",
            ChannelOption::Linger => "SO_LINGER",
            ChannelOption::SctpNodelay => "SCTP_NODELAY",
            ChannelOption::InitMaxStreams => "SCTP_INIT_MAXSTREAMS",
            ChannelOption::PrimaryAddress => "SCTP_PRIMARY_ADDR",
            ChannelOption::ConnectTimeout => "CONNECT_TIMEOUT_MILLIS",
            ChannelOption::SoTimeout => "SO_TIMEOUT",
            ChannelOption::WriteSpinCount => "WRITE_SPIN_COUNT",
            ChannelOption::Backlog => "SO_BACKLOG",
        };
        write!(f, "{s}")
    }
}

/// Requested maximum stream counts for association negotiation, carried
/// by the `SCTP_INIT_MAXSTREAMS` option.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InitMaxStreams {
    pub max_in_streams: u16,
    pub max_out_streams: u16,
}

pub const DEFAULT_INIT_MAX_STREAMS: InitMaxStreams = InitMaxStreams {
    max_in_streams: 10,
    max_out_streams: 10,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Size(usize),
    Flag(bool),
    Millis(u64),
    Linger(Option<Duration>),
    Streams(InitMaxStreams),
    Address(SocketAddr),
}

/// Keys a plain channel recognizes.
pub const CHANNEL_OPTIONS: &[ChannelOption] = &[
    ChannelOption::Rcvbuf,
    ChannelOption::Sndbuf,
    ChannelOption::ReuseAddress,
    ChannelOption::Linger,
    ChannelOption::SctpNodelay,
    ChannelOption::InitMaxStreams,
    ChannelOption::PrimaryAddress,
    ChannelOption::ConnectTimeout,
    ChannelOption::SoTimeout,
    ChannelOption::WriteSpinCount,
];

/// Keys a server channel recognizes.
pub const SERVER_CHANNEL_OPTIONS: &[ChannelOption] = &[
    ChannelOption::Rcvbuf,
    ChannelOption::Sndbuf,
    ChannelOption::ReuseAddress,
    ChannelOption::Linger,
    ChannelOption::SctpNodelay,
    ChannelOption::InitMaxStreams,
    ChannelOption::PrimaryAddress,
    ChannelOption::ConnectTimeout,
    ChannelOption::SoTimeout,
    ChannelOption::WriteSpinCount,
    ChannelOption::Backlog,
];

#[cfg(unix)]
fn somaxconn() -> usize {
    libc::SOMAXCONN as usize
}

#[cfg(not(unix))]
fn somaxconn() -> usize {
    128
}

/// The documented default for a key. Every known key has one, so a
/// config always answers `get_option` for the keys it recognizes.
pub fn default_value(key: ChannelOption) -> OptionValue {
    match key {
        ChannelOption::Rcvbuf => OptionValue::Size(DEFAULT_RECEIVE_BUFFER_SIZE),
        ChannelOption::Sndbuf => OptionValue::Size(DEFAULT_SEND_BUFFER_SIZE),
        ChannelOption::ReuseAddress => OptionValue::Flag(false),
        ChannelOption::Linger => OptionValue::Linger(None),
        ChannelOption::SctpNodelay => OptionValue::Flag(true),
        ChannelOption::InitMaxStreams => OptionValue::Streams(DEFAULT_INIT_MAX_STREAMS),
        ChannelOption::PrimaryAddress => OptionValue::Address(SocketAddr::from(([0, 0, 0, 0], 0))),
        ChannelOption::ConnectTimeout => OptionValue::Millis(DEFAULT_CONNECT_TIMEOUT_MILLIS),
        ChannelOption::SoTimeout => OptionValue::Millis(DEFAULT_SO_TIMEOUT_MILLIS),
        ChannelOption::WriteSpinCount => OptionValue::Size(DEFAULT_WRITE_SPIN_COUNT as usize),
        ChannelOption::Backlog => OptionValue::Size(somaxconn()),
    }
}

fn invalid(key: ChannelOption, reason: &str) -> Error {
    Error::ErrInvalidOption {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn validate(key: ChannelOption, value: &OptionValue) -> Result<()> {
    match (key, value) {
        (ChannelOption::Rcvbuf | ChannelOption::Sndbuf, OptionValue::Size(n)) => {
            if *n == 0 {
                Err(invalid(key, "buffer size must be positive"))
            } else {
                Ok(())
            }
        }
        (ChannelOption::Rcvbuf | ChannelOption::Sndbuf, _) => {
            Err(invalid(key, "expects a buffer size"))
        }
        (ChannelOption::ReuseAddress | ChannelOption::SctpNodelay, OptionValue::Flag(_)) => Ok(()),
        (ChannelOption::ReuseAddress | ChannelOption::SctpNodelay, _) => {
            Err(invalid(key, "expects a boolean"))
        }
        (ChannelOption::Linger, OptionValue::Linger(_)) => Ok(()),
        (ChannelOption::Linger, _) => Err(invalid(key, "expects an optional linger duration")),
        (ChannelOption::InitMaxStreams, OptionValue::Streams(s)) => {
            if s.max_in_streams == 0 || s.max_out_streams == 0 {
                Err(invalid(key, "stream counts must be positive"))
            } else {
                Ok(())
            }
        }
        (ChannelOption::InitMaxStreams, _) => Err(invalid(key, "expects stream counts")),
        (ChannelOption::PrimaryAddress, OptionValue::Address(_)) => Ok(()),
        (ChannelOption::PrimaryAddress, _) => Err(invalid(key, "expects a socket address")),
        (ChannelOption::ConnectTimeout | ChannelOption::SoTimeout, OptionValue::Millis(_)) => {
            Ok(())
        }
        (ChannelOption::ConnectTimeout | ChannelOption::SoTimeout, _) => {
            Err(invalid(key, "expects a duration in milliseconds"))
        }
        (ChannelOption::WriteSpinCount, OptionValue::Size(n)) => {
            if *n == 0 {
                Err(invalid(key, "spin count must be positive"))
            } else {
                Ok(())
            }
        }
        (ChannelOption::WriteSpinCount, _) => Err(invalid(key, "expects a count")),
        (ChannelOption::Backlog, OptionValue::Size(_)) => Ok(()),
        (ChannelOption::Backlog, _) => Err(invalid(key, "expects a queue length")),
    }
}

/// Either the options cached before a socket exists, or the socket they
/// were flushed to. The transition happens exactly once, in `assign`.
enum Backing {
    Pending(HashMap<ChannelOption, OptionValue>),
    Kernel(Arc<dyn SctpSocket>),
}

/// SctpChannelConfig is the per-channel option map.
///
/// Options set before a socket is assigned land in a pending map; the
/// first `assign` drains the map into the socket and every later
/// `set_option` writes through. This covers bootstrap paths that
/// configure a channel before a concrete socket exists.
pub struct SctpChannelConfig {
    known: &'static [ChannelOption],
    backing: Mutex<Backing>,
}

impl fmt::Debug for SctpChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let assigned = self.is_assigned();
        f.debug_struct("SctpChannelConfig")
            .field("assigned", &assigned)
            .finish()
    }
}

impl SctpChannelConfig {
    /// A config with no socket yet; options are cached until `assign`.
    pub fn deferred() -> Self {
        SctpChannelConfig {
            known: CHANNEL_OPTIONS,
            backing: Mutex::new(Backing::Pending(HashMap::new())),
        }
    }

    /// A config already attached to a live socket; options write through.
    pub fn attached(socket: Arc<dyn SctpSocket>) -> Self {
        SctpChannelConfig {
            known: CHANNEL_OPTIONS,
            backing: Mutex::new(Backing::Kernel(socket)),
        }
    }

    fn with_known(known: &'static [ChannelOption], backing: Backing) -> Self {
        SctpChannelConfig {
            known,
            backing: Mutex::new(backing),
        }
    }

    fn recognizes(&self, key: ChannelOption) -> bool {
        self.known.contains(&key)
    }

    pub fn is_assigned(&self) -> bool {
        matches!(&*self.backing.lock().unwrap(), Backing::Kernel(_))
    }

    /// Publishes `socket` and drains the pending option map into it.
    ///
    /// Exactly-once: only the first caller drains; later calls are
    /// no-ops. The first kernel error is surfaced after the whole map
    /// has been attempted.
    pub fn assign(&self, socket: Arc<dyn SctpSocket>) -> Result<()> {
        let mut backing = self.backing.lock().unwrap();
        let pending = match &mut *backing {
            Backing::Kernel(_) => return Ok(()),
            Backing::Pending(map) => std::mem::take(map),
        };
        *backing = Backing::Kernel(socket.clone());
        drop(backing);

        let mut first_err = None;
        for (key, value) in pending {
            if let Err(e) = socket.set_option(key, &value) {
                log::warn!("failed to flush pending option {key}: {e}");
                first_err.get_or_insert(Error::ErrConfigIo {
                    reason: format!("{key}: {e}"),
                });
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn get_option(&self, key: ChannelOption) -> Result<OptionValue> {
        if !self.recognizes(key) {
            return Err(Error::ErrUnknownOption {
                key: key.to_string(),
            });
        }
        match &*self.backing.lock().unwrap() {
            Backing::Pending(map) => Ok(map.get(&key).cloned().unwrap_or_else(|| default_value(key))),
            Backing::Kernel(socket) => socket.get_option(key),
        }
    }

    pub fn set_option(&self, key: ChannelOption, value: OptionValue) -> Result<()> {
        if !self.recognizes(key) {
            return Err(Error::ErrUnknownOption {
                key: key.to_string(),
            });
        }
        validate(key, &value)?;
        match &mut *self.backing.lock().unwrap() {
            Backing::Pending(map) => {
                map.insert(key, value);
                Ok(())
            }
            Backing::Kernel(socket) => socket.set_option(key, &value).map_err(|e| match e {
                e @ Error::ErrUnknownOption { .. } | e @ Error::ErrInvalidOption { .. } => e,
                e => Error::ErrConfigIo {
                    reason: format!("{key}: {e}"),
                },
            }),
        }
    }

    /// Every known key with its current value: pending, kernel-committed
    /// or the documented default.
    pub fn get_options(&self) -> HashMap<ChannelOption, OptionValue> {
        self.known
            .iter()
            .map(|&key| {
                let value = self
                    .get_option(key)
                    .unwrap_or_else(|_| default_value(key));
                (key, value)
            })
            .collect()
    }

    pub fn receive_buffer_size(&self) -> usize {
        match self.get_option(ChannelOption::Rcvbuf) {
            Ok(OptionValue::Size(n)) => n,
            _ => DEFAULT_RECEIVE_BUFFER_SIZE,
        }
    }

    pub fn set_receive_buffer_size(&self, size: usize) -> Result<()> {
        self.set_option(ChannelOption::Rcvbuf, OptionValue::Size(size))
    }

    pub fn send_buffer_size(&self) -> usize {
        match self.get_option(ChannelOption::Sndbuf) {
            Ok(OptionValue::Size(n)) => n,
            _ => DEFAULT_SEND_BUFFER_SIZE,
        }
    }

    pub fn set_send_buffer_size(&self, size: usize) -> Result<()> {
        self.set_option(ChannelOption::Sndbuf, OptionValue::Size(size))
    }

    pub fn set_reuse_address(&self, on: bool) -> Result<()> {
        self.set_option(ChannelOption::ReuseAddress, OptionValue::Flag(on))
    }

    pub fn set_sctp_nodelay(&self, on: bool) -> Result<()> {
        self.set_option(ChannelOption::SctpNodelay, OptionValue::Flag(on))
    }

    pub fn set_init_max_streams(&self, streams: InitMaxStreams) -> Result<()> {
        self.set_option(ChannelOption::InitMaxStreams, OptionValue::Streams(streams))
    }

    pub fn connect_timeout(&self) -> Duration {
        match self.get_option(ChannelOption::ConnectTimeout) {
            Ok(OptionValue::Millis(ms)) => Duration::from_millis(ms),
            _ => Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MILLIS),
        }
    }

    pub fn set_connect_timeout(&self, timeout: Duration) -> Result<()> {
        self.set_option(
            ChannelOption::ConnectTimeout,
            OptionValue::Millis(timeout.as_millis() as u64),
        )
    }

    /// The bounded wait used by every selector turn.
    pub fn so_timeout(&self) -> Duration {
        match self.get_option(ChannelOption::SoTimeout) {
            Ok(OptionValue::Millis(ms)) => Duration::from_millis(ms),
            _ => Duration::from_millis(DEFAULT_SO_TIMEOUT_MILLIS),
        }
    }

    pub fn set_so_timeout(&self, timeout: Duration) -> Result<()> {
        self.set_option(
            ChannelOption::SoTimeout,
            OptionValue::Millis(timeout.as_millis() as u64),
        )
    }

    pub fn write_spin_count(&self) -> usize {
        match self.get_option(ChannelOption::WriteSpinCount) {
            Ok(OptionValue::Size(n)) => n,
            _ => DEFAULT_WRITE_SPIN_COUNT as usize,
        }
    }

    pub fn set_write_spin_count(&self, count: usize) -> Result<()> {
        self.set_option(ChannelOption::WriteSpinCount, OptionValue::Size(count))
    }
}

/// SctpServerChannelConfig adds the accept backlog on top of the shared
/// deferred-option mechanism. Built for completion-based server
/// bootstraps where the listening socket is created late.
pub struct SctpServerChannelConfig {
    config: SctpChannelConfig,
}

impl fmt::Debug for SctpServerChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SctpServerChannelConfig")
            .field("assigned", &self.config.is_assigned())
            .finish()
    }
}

impl SctpServerChannelConfig {
    pub fn deferred() -> Self {
        SctpServerChannelConfig {
            config: SctpChannelConfig::with_known(
                SERVER_CHANNEL_OPTIONS,
                Backing::Pending(HashMap::new()),
            ),
        }
    }

    pub fn attached(socket: Arc<dyn SctpSocket>) -> Self {
        SctpServerChannelConfig {
            config: SctpChannelConfig::with_known(SERVER_CHANNEL_OPTIONS, Backing::Kernel(socket)),
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.config.is_assigned()
    }

    pub fn assign(&self, socket: Arc<dyn SctpSocket>) -> Result<()> {
        self.config.assign(socket)
    }

    pub fn get_option(&self, key: ChannelOption) -> Result<OptionValue> {
        self.config.get_option(key)
    }

    pub fn set_option(&self, key: ChannelOption, value: OptionValue) -> Result<()> {
        self.config.set_option(key, value)
    }

    pub fn get_options(&self) -> HashMap<ChannelOption, OptionValue> {
        self.config.get_options()
    }

    pub fn backlog(&self) -> usize {
        match self.config.get_option(ChannelOption::Backlog) {
            Ok(OptionValue::Size(n)) => n,
            _ => somaxconn(),
        }
    }

    /// Negative backlogs are rejected up front; the kernel clamp is not
    /// relied on.
    pub fn set_backlog(&self, backlog: i32) -> Result<()> {
        if backlog < 0 {
            return Err(invalid(ChannelOption::Backlog, "must be non-negative"));
        }
        self.config
            .set_option(ChannelOption::Backlog, OptionValue::Size(backlog as usize))
    }

    /// Connection-time/latency/bandwidth preferences are a TCP concept
    /// with no SCTP mapping.
    pub fn set_performance_preferences(
        &self,
        _connection_time: i32,
        _latency: i32,
        _bandwidth: i32,
    ) -> Result<()> {
        Err(Error::ErrUnsupportedOperation {
            operation: "set_performance_preferences".to_string(),
        })
    }
}
