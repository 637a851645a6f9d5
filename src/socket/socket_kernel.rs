use std::collections::HashMap;
use std::fmt;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use libc::{c_int, c_void, socklen_t};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use crate::config::{default_value, ChannelOption, InitMaxStreams, OptionValue};
use crate::error::{Error, Result};
use crate::message::{MessageInfo, ReceiveInfo};
use crate::notification::{
    AssociationChange, AssociationChangeState, HandlerResult, Notification, NotificationHandler,
    PeerAddressChange, PeerAddressChangeState, SendFailed, Shutdown,
};
use crate::selector::SelectorOp;
use crate::socket::{Association, SctpSocket};

// SCTP socket-level options and notification types the kernel exposes
// but libc does not declare (linux uapi sctp.h).
const SOL_SCTP: c_int = libc::IPPROTO_SCTP;
const SCTP_INITMSG: c_int = 2;
const SCTP_NODELAY: c_int = 3;
const SCTP_PRIMARY_ADDR: c_int = 6;
const SCTP_EVENTS: c_int = 11;
const SCTP_STATUS: c_int = 14;
const SCTP_SOCKOPT_BINDX_ADD: c_int = 100;
const SCTP_SOCKOPT_BINDX_REM: c_int = 101;

const SCTP_SNDRCV: c_int = 1;
const MSG_NOTIFICATION: c_int = 0x8000;

const SCTP_UNORDERED: u16 = 1;
const SCTP_ADDR_OVER: u16 = 2;

const SCTP_ASSOC_CHANGE: u16 = 0x8001;
const SCTP_PEER_ADDR_CHANGE: u16 = 0x8002;
const SCTP_SEND_FAILED: u16 = 0x8003;
const SCTP_SHUTDOWN_EVENT: u16 = 0x8005;

const SCTP_STATE_ESTABLISHED: c_int = 4;

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct SctpInitMsg {
    num_ostreams: u16,
    max_instreams: u16,
    max_attempts: u16,
    max_init_timeo: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct SctpSndRcvInfo {
    stream: u16,
    ssn: u16,
    flags: u16,
    ppid: u32,
    context: u32,
    timetolive: u32,
    tsn: u32,
    cumtsn: u32,
    assoc_id: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct SctpEventSubscribe {
    data_io_event: u8,
    association_event: u8,
    address_event: u8,
    send_failure_event: u8,
    peer_error_event: u8,
    shutdown_event: u8,
    partial_delivery_event: u8,
    adaptation_layer_event: u8,
    authentication_event: u8,
    sender_dry_event: u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct SctpNotificationHeader {
    sn_type: u16,
    sn_flags: u16,
    sn_length: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct SctpAssocChange {
    sac_type: u16,
    sac_flags: u16,
    sac_length: u32,
    sac_state: u16,
    sac_error: u16,
    sac_outbound_streams: u16,
    sac_inbound_streams: u16,
    sac_assoc_id: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct SctpPaddrChange {
    spc_type: u16,
    spc_flags: u16,
    spc_length: u32,
    spc_aaddr: libc::sockaddr_storage,
    spc_state: c_int,
    spc_error: c_int,
    spc_assoc_id: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct SctpShutdownEvent {
    sse_type: u16,
    sse_flags: u16,
    sse_length: u32,
    sse_assoc_id: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct SctpSendFailedEvent {
    ssf_type: u16,
    ssf_flags: u16,
    ssf_length: u32,
    ssf_error: u32,
    ssf_info: SctpSndRcvInfo,
    ssf_assoc_id: i32,
}

#[repr(C, packed(4))]
#[derive(Clone, Copy)]
struct SctpPrim {
    ssp_assoc_id: i32,
    ssp_addr: libc::sockaddr_storage,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct SctpPaddrInfo {
    spinfo_assoc_id: i32,
    spinfo_address: libc::sockaddr_storage,
    spinfo_state: c_int,
    spinfo_cwnd: u32,
    spinfo_srtt: u32,
    spinfo_rto: u32,
    spinfo_mtu: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct SctpStatus {
    sstat_assoc_id: i32,
    sstat_state: c_int,
    sstat_rwnd: u32,
    sstat_unackdata: u16,
    sstat_penddata: u16,
    sstat_instrms: u16,
    sstat_outstrms: u16,
    sstat_fragmentation_point: u32,
    sstat_primary: SctpPaddrInfo,
}

struct Fd(RawFd);

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

fn socket_addr_to_storage(addr: &SocketAddr) -> (libc::sockaddr_storage, socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    match addr {
        SocketAddr::V4(v4) => {
            let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            (storage, mem::size_of::<libc::sockaddr_in>() as socklen_t)
        }
        SocketAddr::V6(v6) => {
            let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            sin6.sin6_scope_id = v6.scope_id();
            (storage, mem::size_of::<libc::sockaddr_in6>() as socklen_t)
        }
    }
}

fn storage_to_socket_addr(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            let sin = unsafe { ptr::read(storage as *const _ as *const libc::sockaddr_in) };
            Some(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()),
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { ptr::read(storage as *const _ as *const libc::sockaddr_in6) };
            Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

fn getsockopt_struct<T: Copy>(fd: RawFd, level: c_int, name: c_int) -> io::Result<T> {
    let mut value: T = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<T>() as socklen_t;
    let rc = unsafe {
        libc::getsockopt(fd, level, name, &mut value as *mut T as *mut c_void, &mut len)
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(value)
    }
}

fn setsockopt_struct<T: Copy>(fd: RawFd, level: c_int, name: c_int, value: &T) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const T as *const c_void,
            mem::size_of::<T>() as socklen_t,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Zero-timeout poll of one readiness dimension, used to separate real
/// readiness from a stale reactor wake-up.
fn probe_ready(fd: RawFd, op: SelectorOp) -> io::Result<bool> {
    let events = match op {
        SelectorOp::Read => libc::POLLIN,
        SelectorOp::Write | SelectorOp::Connect => libc::POLLOUT,
    };
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc > 0 && pfd.revents & (events | libc::POLLERR | libc::POLLHUP) != 0)
}

fn parse_notification(raw: &[u8]) -> Result<Option<Notification>> {
    if raw.len() < mem::size_of::<SctpNotificationHeader>() {
        return Err(Error::ErrReadFailed {
            reason: "short SCTP notification".to_string(),
        });
    }
    let header = unsafe { ptr::read_unaligned(raw.as_ptr() as *const SctpNotificationHeader) };
    match header.sn_type {
        SCTP_ASSOC_CHANGE => {
            if raw.len() < mem::size_of::<SctpAssocChange>() {
                return Err(Error::ErrReadFailed {
                    reason: "short association change notification".to_string(),
                });
            }
            let c = unsafe { ptr::read_unaligned(raw.as_ptr() as *const SctpAssocChange) };
            Ok(Some(Notification::AssociationChange(AssociationChange {
                state: AssociationChangeState::from(c.sac_state),
                error: c.sac_error,
                outbound_streams: c.sac_outbound_streams,
                inbound_streams: c.sac_inbound_streams,
                association_id: c.sac_assoc_id,
            })))
        }
        SCTP_PEER_ADDR_CHANGE => {
            if raw.len() < mem::size_of::<SctpPaddrChange>() {
                return Err(Error::ErrReadFailed {
                    reason: "short peer address change notification".to_string(),
                });
            }
            let c = unsafe { ptr::read_unaligned(raw.as_ptr() as *const SctpPaddrChange) };
            let address = storage_to_socket_addr(&c.spc_aaddr)
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
            Ok(Some(Notification::PeerAddressChange(PeerAddressChange {
                address,
                state: PeerAddressChangeState::from(c.spc_state as u32),
                error: c.spc_error as u32,
                association_id: c.spc_assoc_id,
            })))
        }
        SCTP_SEND_FAILED => {
            let fixed = mem::size_of::<SctpSendFailedEvent>();
            if raw.len() < fixed {
                return Err(Error::ErrReadFailed {
                    reason: "short send failed notification".to_string(),
                });
            }
            let c = unsafe { ptr::read_unaligned(raw.as_ptr() as *const SctpSendFailedEvent) };
            let end = (c.ssf_length as usize).min(raw.len());
            let payload = Bytes::copy_from_slice(&raw[fixed..end.max(fixed)]);
            Ok(Some(Notification::SendFailed(SendFailed {
                error: c.ssf_error,
                stream_identifier: c.ssf_info.stream,
                payload_protocol_identifier: c.ssf_info.ppid,
                payload,
                association_id: c.ssf_assoc_id,
            })))
        }
        SCTP_SHUTDOWN_EVENT => {
            if raw.len() < mem::size_of::<SctpShutdownEvent>() {
                return Err(Error::ErrReadFailed {
                    reason: "short shutdown notification".to_string(),
                });
            }
            let c = unsafe { ptr::read_unaligned(raw.as_ptr() as *const SctpShutdownEvent) };
            Ok(Some(Notification::Shutdown(Shutdown {
                association_id: c.sse_assoc_id,
            })))
        }
        // partial delivery, adaptation etc. are not subscribed to
        _ => Ok(None),
    }
}

/// KernelSctpSocket is a one-to-one kernel SCTP endpoint in non-blocking
/// mode, registered once with the tokio reactor.
///
/// Must be constructed inside a tokio runtime. The loop-level options
/// (connect timeout, select timeout, write spin count, backlog) have no
/// kernel counterpart and are kept in a side table.
pub struct KernelSctpSocket {
    fd: AsyncFd<Fd>,
    closed: AtomicBool,
    extra_local: Mutex<Vec<SocketAddr>>,
    loop_options: Mutex<HashMap<ChannelOption, OptionValue>>,
}

impl fmt::Debug for KernelSctpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelSctpSocket")
            .field("fd", &self.raw_fd())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl KernelSctpSocket {
    /// Opens an IPv4 endpoint.
    pub fn open() -> Result<Self> {
        Self::open_family(libc::AF_INET)
    }

    /// Opens an IPv6 endpoint.
    pub fn open_ipv6() -> Result<Self> {
        Self::open_family(libc::AF_INET6)
    }

    fn open_family(family: c_int) -> Result<Self> {
        let raw = unsafe { libc::socket(family, libc::SOCK_STREAM, libc::IPPROTO_SCTP) };
        if raw < 0 {
            return Err(Error::Other(format!(
                "failed to open SCTP socket: {}",
                io::Error::last_os_error()
            )));
        }
        let fd = Fd(raw);

        let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
        if flags < 0
            || unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0
        {
            return Err(Error::Other(format!(
                "failed to set O_NONBLOCK: {}",
                io::Error::last_os_error()
            )));
        }

        let events = SctpEventSubscribe {
            association_event: 1,
            address_event: 1,
            send_failure_event: 1,
            shutdown_event: 1,
            ..Default::default()
        };
        setsockopt_struct(raw, SOL_SCTP, SCTP_EVENTS, &events).map_err(|e| {
            Error::Other(format!("failed to subscribe to SCTP events: {e}"))
        })?;

        let fd = AsyncFd::new(fd)
            .map_err(|e| Error::Other(format!("failed to register with the reactor: {e}")))?;

        Ok(KernelSctpSocket {
            fd,
            closed: AtomicBool::new(false),
            extra_local: Mutex::new(Vec::new()),
            loop_options: Mutex::new(HashMap::new()),
        })
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.get_ref().0
    }

    fn bindx(&self, addr: SocketAddr, opt: c_int) -> io::Result<()> {
        let (storage, len) = socket_addr_to_storage(&addr);
        let rc = unsafe {
            libc::setsockopt(
                self.raw_fd(),
                SOL_SCTP,
                opt,
                &storage as *const _ as *const c_void,
                len,
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn sockname(
        &self,
        f: unsafe extern "C" fn(c_int, *mut libc::sockaddr, *mut socklen_t) -> c_int,
    ) -> io::Result<Option<SocketAddr>> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
        let rc = unsafe {
            f(
                self.raw_fd(),
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(storage_to_socket_addr(&storage))
        }
    }
}

#[async_trait]
impl SctpSocket for KernelSctpSocket {
    fn bind(&self, addr: SocketAddr) -> Result<()> {
        let (storage, len) = socket_addr_to_storage(&addr);
        let rc = unsafe {
            libc::bind(
                self.raw_fd(),
                &storage as *const _ as *const libc::sockaddr,
                len,
            )
        };
        if rc < 0 {
            return Err(Error::ErrBindFailed {
                reason: io::Error::last_os_error().to_string(),
            });
        }
        Ok(())
    }

    fn bind_address(&self, addr: SocketAddr) -> Result<()> {
        self.bindx(addr, SCTP_SOCKOPT_BINDX_ADD)
            .map_err(|e| Error::ErrBindFailed {
                reason: e.to_string(),
            })?;
        self.extra_local.lock().unwrap().push(addr);
        Ok(())
    }

    fn unbind_address(&self, addr: SocketAddr) -> Result<()> {
        self.bindx(addr, SCTP_SOCKOPT_BINDX_REM)
            .map_err(|e| Error::ErrBindFailed {
                reason: e.to_string(),
            })?;
        let mut extra = self.extra_local.lock().unwrap();
        if let Some(i) = extra.iter().position(|a| *a == addr) {
            extra.remove(i);
        }
        Ok(())
    }

    fn connect(&self, addr: SocketAddr) -> Result<bool> {
        let (storage, len) = socket_addr_to_storage(&addr);
        let rc = unsafe {
            libc::connect(
                self.raw_fd(),
                &storage as *const _ as *const libc::sockaddr,
                len,
            )
        };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINPROGRESS) => Ok(false),
            Some(libc::EISCONN) => Ok(true),
            _ => Err(Error::ErrConnectFailed {
                reason: err.to_string(),
            }),
        }
    }

    fn finish_connect(&self) -> Result<bool> {
        let pending: c_int = getsockopt_struct(self.raw_fd(), libc::SOL_SOCKET, libc::SO_ERROR)
            .map_err(|e| Error::ErrConnectFailed {
                reason: e.to_string(),
            })?;
        if pending != 0 {
            return Err(Error::ErrConnectFailed {
                reason: io::Error::from_raw_os_error(pending).to_string(),
            });
        }
        Ok(true)
    }

    async fn ready(&self, op: SelectorOp) -> Result<()> {
        let interest = match op {
            SelectorOp::Read => Interest::READABLE,
            SelectorOp::Write | SelectorOp::Connect => Interest::WRITABLE,
        };
        loop {
            let mut guard = self
                .fd
                .ready(interest)
                .await
                .map_err(|e| Error::Other(format!("readiness wait failed: {e}")))?;
            let ready = probe_ready(self.raw_fd(), op)
                .map_err(|e| Error::Other(format!("poll failed: {e}")))?;
            if ready {
                return Ok(());
            }
            // stale reactor wake-up: re-arm and wait again
            guard.clear_ready();
        }
    }

    fn receive(
        &self,
        buf: &mut [u8],
        handler: &mut dyn NotificationHandler,
    ) -> Result<Option<ReceiveInfo>> {
        loop {
            let mut iov = libc::iovec {
                iov_base: buf.as_mut_ptr() as *mut c_void,
                iov_len: buf.len(),
            };
            let mut cmsg_space = [0u8; 512];
            let mut msg: libc::msghdr = unsafe { mem::zeroed() };
            msg.msg_iov = &mut iov;
            msg.msg_iovlen = 1;
            msg.msg_control = cmsg_space.as_mut_ptr() as *mut c_void;
            msg.msg_controllen = cmsg_space.len() as _;

            let rc = unsafe { libc::recvmsg(self.raw_fd(), &mut msg, 0) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    return Ok(None);
                }
                return Err(Error::ErrReadFailed {
                    reason: err.to_string(),
                });
            }
            if rc == 0 {
                // orderly peer shutdown with nothing buffered
                return Ok(None);
            }
            let n = rc as usize;

            if msg.msg_flags & MSG_NOTIFICATION != 0 {
                match parse_notification(&buf[..n])? {
                    None => continue,
                    Some(notification) => match handler.handle_notification(notification) {
                        HandlerResult::Continue => continue,
                        HandlerResult::Return => return Ok(None),
                    },
                }
            }

            if msg.msg_flags & libc::MSG_EOR == 0 {
                return Err(Error::ErrReadFailed {
                    reason: "partial message: receive buffer too small".to_string(),
                });
            }

            let mut sinfo = SctpSndRcvInfo::default();
            unsafe {
                let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
                while !cmsg.is_null() {
                    if (*cmsg).cmsg_level == SOL_SCTP && (*cmsg).cmsg_type == SCTP_SNDRCV {
                        sinfo =
                            ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const SctpSndRcvInfo);
                    }
                    cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
                }
            }

            return Ok(Some(ReceiveInfo {
                message_length: n,
                stream_identifier: sinfo.stream,
                payload_protocol_identifier: sinfo.ppid,
                unordered: sinfo.flags & SCTP_UNORDERED != 0,
            }));
        }
    }

    fn send(&self, buf: &[u8], info: &MessageInfo) -> Result<usize> {
        let mut sinfo = SctpSndRcvInfo {
            stream: info.stream_identifier,
            ppid: info.payload_protocol_identifier,
            assoc_id: info.association.association_id,
            ..Default::default()
        };
        if info.unordered {
            sinfo.flags |= SCTP_UNORDERED;
        }

        let mut dest = info.destination.map(|addr| socket_addr_to_storage(&addr));
        if dest.is_some() {
            sinfo.flags |= SCTP_ADDR_OVER;
        }

        let info_len = mem::size_of::<SctpSndRcvInfo>() as u32;
        let space = unsafe { libc::CMSG_SPACE(info_len) } as usize;
        let mut cmsg_space = vec![0u8; space];

        let mut iov = libc::iovec {
            iov_base: buf.as_ptr() as *mut c_void,
            iov_len: buf.len(),
        };
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_space.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = space as _;
        if let Some((storage, len)) = &mut dest {
            msg.msg_name = storage as *mut _ as *mut c_void;
            msg.msg_namelen = *len;
        }

        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = SOL_SCTP;
            (*cmsg).cmsg_type = SCTP_SNDRCV;
            (*cmsg).cmsg_len = libc::CMSG_LEN(info_len) as _;
            ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut SctpSndRcvInfo, sinfo);
        }

        let rc = unsafe { libc::sendmsg(self.raw_fd(), &msg, 0) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(Error::ErrTryAgain);
            }
            return Err(Error::ErrWriteFailed {
                reason: err.to_string(),
            });
        }
        Ok(rc as usize)
    }

    fn get_option(&self, key: ChannelOption) -> Result<OptionValue> {
        let config_io = |e: io::Error| Error::ErrConfigIo {
            reason: format!("{key}: {e}"),
        };
        let fd = self.raw_fd();
        match key {
            ChannelOption::Rcvbuf => {
                let n: c_int = getsockopt_struct(fd, libc::SOL_SOCKET, libc::SO_RCVBUF)
                    .map_err(config_io)?;
                Ok(OptionValue::Size(n as usize))
            }
            ChannelOption::Sndbuf => {
                let n: c_int = getsockopt_struct(fd, libc::SOL_SOCKET, libc::SO_SNDBUF)
                    .map_err(config_io)?;
                Ok(OptionValue::Size(n as usize))
            }
            ChannelOption::ReuseAddress => {
                let n: c_int = getsockopt_struct(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR)
                    .map_err(config_io)?;
                Ok(OptionValue::Flag(n != 0))
            }
            ChannelOption::Linger => {
                let l: libc::linger = getsockopt_struct(fd, libc::SOL_SOCKET, libc::SO_LINGER)
                    .map_err(config_io)?;
                if l.l_onoff != 0 {
                    Ok(OptionValue::Linger(Some(Duration::from_secs(
                        l.l_linger.max(0) as u64,
                    ))))
                } else {
                    Ok(OptionValue::Linger(None))
                }
            }
            ChannelOption::SctpNodelay => {
                let n: c_int =
                    getsockopt_struct(fd, SOL_SCTP, SCTP_NODELAY).map_err(config_io)?;
                Ok(OptionValue::Flag(n != 0))
            }
            ChannelOption::InitMaxStreams => {
                let init: SctpInitMsg =
                    getsockopt_struct(fd, SOL_SCTP, SCTP_INITMSG).map_err(config_io)?;
                Ok(OptionValue::Streams(InitMaxStreams {
                    max_in_streams: init.max_instreams,
                    max_out_streams: init.num_ostreams,
                }))
            }
            ChannelOption::PrimaryAddress => {
                let prim: SctpPrim =
                    getsockopt_struct(fd, SOL_SCTP, SCTP_PRIMARY_ADDR).map_err(config_io)?;
                let addr = unsafe { ptr::read_unaligned(ptr::addr_of!(prim.ssp_addr)) };
                match storage_to_socket_addr(&addr) {
                    Some(a) => Ok(OptionValue::Address(a)),
                    None => Err(Error::ErrConfigIo {
                        reason: format!("{key}: unsupported address family"),
                    }),
                }
            }
            ChannelOption::ConnectTimeout
            | ChannelOption::SoTimeout
            | ChannelOption::WriteSpinCount
            | ChannelOption::Backlog => Ok(self
                .loop_options
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .unwrap_or_else(|| default_value(key))),
        }
    }

    fn set_option(&self, key: ChannelOption, value: &OptionValue) -> Result<()> {
        let config_io = |e: io::Error| Error::ErrConfigIo {
            reason: format!("{key}: {e}"),
        };
        let mismatch = || Error::ErrInvalidOption {
            key: key.to_string(),
            reason: "value type mismatch".to_string(),
        };
        let fd = self.raw_fd();
        match (key, value) {
            (ChannelOption::Rcvbuf, OptionValue::Size(n)) => {
                setsockopt_struct(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, &(*n as c_int))
                    .map_err(config_io)
            }
            (ChannelOption::Sndbuf, OptionValue::Size(n)) => {
                setsockopt_struct(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, &(*n as c_int))
                    .map_err(config_io)
            }
            (ChannelOption::ReuseAddress, OptionValue::Flag(on)) => {
                setsockopt_struct(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, &(*on as c_int))
                    .map_err(config_io)
            }
            (ChannelOption::Linger, OptionValue::Linger(linger)) => {
                let l = match linger {
                    Some(d) => libc::linger {
                        l_onoff: 1,
                        l_linger: d.as_secs() as c_int,
                    },
                    None => libc::linger {
                        l_onoff: 0,
                        l_linger: 0,
                    },
                };
                setsockopt_struct(fd, libc::SOL_SOCKET, libc::SO_LINGER, &l).map_err(config_io)
            }
            (ChannelOption::SctpNodelay, OptionValue::Flag(on)) => {
                setsockopt_struct(fd, SOL_SCTP, SCTP_NODELAY, &(*on as c_int)).map_err(config_io)
            }
            (ChannelOption::InitMaxStreams, OptionValue::Streams(s)) => {
                let init = SctpInitMsg {
                    num_ostreams: s.max_out_streams,
                    max_instreams: s.max_in_streams,
                    ..Default::default()
                };
                setsockopt_struct(fd, SOL_SCTP, SCTP_INITMSG, &init).map_err(config_io)
            }
            (ChannelOption::PrimaryAddress, OptionValue::Address(addr)) => {
                let (storage, _) = socket_addr_to_storage(addr);
                let prim = SctpPrim {
                    ssp_assoc_id: 0,
                    ssp_addr: storage,
                };
                setsockopt_struct(fd, SOL_SCTP, SCTP_PRIMARY_ADDR, &prim).map_err(config_io)
            }
            (
                ChannelOption::ConnectTimeout
                | ChannelOption::SoTimeout
                | ChannelOption::WriteSpinCount
                | ChannelOption::Backlog,
                v,
            ) => {
                self.loop_options.lock().unwrap().insert(key, v.clone());
                Ok(())
            }
            _ => Err(mismatch()),
        }
    }

    fn local_addresses(&self) -> Result<Vec<SocketAddr>> {
        let mut addrs = Vec::new();
        if let Some(primary) = self.sockname(libc::getsockname).map_err(|e| Error::Other(
            format!("getsockname failed: {e}"),
        ))? {
            addrs.push(primary);
        }
        addrs.extend(self.extra_local.lock().unwrap().iter().copied());
        Ok(addrs)
    }

    fn remote_addresses(&self) -> Result<Vec<SocketAddr>> {
        let mut addrs = Vec::new();
        if let Some(peer) = self.sockname(libc::getpeername).map_err(|e| Error::Other(
            format!("getpeername failed: {e}"),
        ))? {
            addrs.push(peer);
        }
        Ok(addrs)
    }

    fn association(&self) -> Result<Option<Association>> {
        let status: SctpStatus = match getsockopt_struct(self.raw_fd(), SOL_SCTP, SCTP_STATUS) {
            Ok(s) => s,
            Err(e) => {
                return Err(Error::Other(format!("SCTP_STATUS failed: {e}")));
            }
        };
        if status.sstat_state != SCTP_STATE_ESTABLISHED {
            return Ok(None);
        }
        Ok(Some(Association {
            association_id: status.sstat_assoc_id,
            inbound_streams: status.sstat_instrms,
            outbound_streams: status.sstat_outstrms,
        }))
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // wake the peer; the descriptor itself is released on drop
            unsafe {
                libc::shutdown(self.raw_fd(), libc::SHUT_RDWR);
            }
        }
        Ok(())
    }
}
