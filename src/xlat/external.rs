//! External address resolver client
//!
//! In external addressing mode every non-cached address decision is
//! delegated to a companion process over a stream transport. The protocol
//! is a strict request/response exchange of fixed 24-byte frames:
//!
//! ```text
//! byte 0      magic (0x58)
//! byte 1      protocol version (1)
//! byte 2      request: address role / response: mapping status
//! byte 3      family of the carried address (4 or 6)
//! bytes 4..8  correlation identifier, big-endian
//! bytes 8..24 address (IPv4 in the first 4 bytes, remainder zero)
//! ```
//!
//! Each worker owns one client, so requests never interleave. Responses
//! are matched by correlation id; a response left over from a timed-out
//! request is recognized by its stale id and discarded.

use super::AddressRole;
use crate::config::{ExternalRuntime, ResolverTransportConfig};
use crate::io::interrupt::{self, IoOutcome, PollOutcome};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const FRAME_SIZE: usize = 24;
pub const WIRE_MAGIC: u8 = 0x58;
pub const WIRE_VERSION: u8 = 1;

pub const ROLE_MAIN: u8 = 0;
pub const ROLE_ICMP_ERROR: u8 = 1;
pub const STATUS_MAPPED: u8 = 0;
pub const STATUS_UNMAPPED: u8 = 1;

pub const FAMILY_IPV4: u8 = 4;
pub const FAMILY_IPV6: u8 = 6;

/// Result of one resolver round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    MappedV4([u8; 4]),
    MappedV6([u8; 16]),
    /// The resolver answered that no mapping exists.
    Unmapped,
    /// The exchange was cancelled by the termination signal.
    Interrupted,
}

enum Transport {
    /// Descriptor pair inherited from the parent process.
    Inherited { read_fd: RawFd, write_fd: RawFd },
    Unix { path: PathBuf, fd: Option<RawFd> },
    Tcp { addr: SocketAddr, fd: Option<RawFd> },
}

enum Conn {
    Ready { read_fd: RawFd, write_fd: RawFd },
    Interrupted,
}

pub struct ResolverClient {
    transport: Transport,
    timeout: Duration,
    correlation: u32,
}

impl ResolverClient {
    /// Builds a client for one worker. `inherited` supplies the descriptor
    /// pair when the configured transport is inherited-fds.
    pub fn new(cfg: &ExternalRuntime, inherited: Option<(RawFd, RawFd)>) -> Result<Self> {
        let transport = match &cfg.transport {
            ResolverTransportConfig::InheritedFds => {
                let (read_fd, write_fd) = inherited.ok_or_else(|| {
                    Error::Resolver("no resolver descriptor pair for this worker".into())
                })?;
                Transport::Inherited { read_fd, write_fd }
            }
            ResolverTransportConfig::Unix(path) => Transport::Unix {
                path: path.clone(),
                fd: None,
            },
            ResolverTransportConfig::Tcp(addr) => Transport::Tcp {
                addr: *addr,
                fd: None,
            },
        };

        let mut seed = [0u8; 4];
        getrandom::getrandom(&mut seed).map_err(|_| Error::Random)?;

        Ok(Self {
            transport,
            timeout: cfg.timeout,
            correlation: u32::from_ne_bytes(seed),
        })
    }

    /// Resolves an IPv4 address to its IPv6 counterpart.
    pub fn resolve_4(&mut self, addr: &[u8; 4], role: AddressRole) -> Result<Outcome> {
        let mut padded = [0u8; 16];
        padded[..4].copy_from_slice(addr);
        self.resolve(FAMILY_IPV4, &padded, role)
    }

    /// Resolves an IPv6 address to its IPv4 counterpart.
    pub fn resolve_6(&mut self, addr: &[u8; 16], role: AddressRole) -> Result<Outcome> {
        self.resolve(FAMILY_IPV6, addr, role)
    }

    fn resolve(&mut self, family: u8, addr: &[u8; 16], role: AddressRole) -> Result<Outcome> {
        let (read_fd, write_fd) = match self.ensure_connected()? {
            Conn::Ready { read_fd, write_fd } => (read_fd, write_fd),
            Conn::Interrupted => return Ok(Outcome::Interrupted),
        };

        self.correlation = self.correlation.wrapping_add(1);
        let frame = encode_request(role, family, self.correlation, addr);

        match write_full(write_fd, &frame) {
            Ok(WriteResult::Done) => {}
            Ok(WriteResult::Interrupted) => return Ok(Outcome::Interrupted),
            Err(err) => {
                self.disconnect();
                return Err(Error::Resolver(format!("send failed: {err}")));
            }
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let frame = match read_frame(read_fd, deadline) {
                Ok(ReadResult::Frame(frame)) => frame,
                Ok(ReadResult::TimedOut) => {
                    // The stream is now desynchronized relative to our
                    // correlation counter; the stale-id check on the next
                    // exchange resynchronizes it.
                    warn!(timeout = ?self.timeout, "resolver response timed out");
                    return Err(Error::Resolver("response timed out".into()));
                }
                Ok(ReadResult::Interrupted) => return Ok(Outcome::Interrupted),
                Ok(ReadResult::Eof) => {
                    self.disconnect();
                    return Err(Error::Resolver("resolver closed the connection".into()));
                }
                Err(err) => {
                    self.disconnect();
                    return Err(Error::Resolver(format!("receive failed: {err}")));
                }
            };

            if frame[0] != WIRE_MAGIC || frame[1] != WIRE_VERSION {
                self.disconnect();
                return Err(Error::Resolver("malformed response frame".into()));
            }

            let correlation = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);
            if correlation != self.correlation {
                // Response to a request we already gave up on.
                debug!(correlation, "discarding stale resolver response");
                continue;
            }

            return match (frame[2], frame[3]) {
                (STATUS_UNMAPPED, _) => Ok(Outcome::Unmapped),
                (STATUS_MAPPED, FAMILY_IPV6) if family == FAMILY_IPV4 => {
                    let mut v6 = [0u8; 16];
                    v6.copy_from_slice(&frame[8..24]);
                    Ok(Outcome::MappedV6(v6))
                }
                (STATUS_MAPPED, FAMILY_IPV4) if family == FAMILY_IPV6 => {
                    let mut v4 = [0u8; 4];
                    v4.copy_from_slice(&frame[8..12]);
                    Ok(Outcome::MappedV4(v4))
                }
                _ => {
                    self.disconnect();
                    Err(Error::Resolver("response family mismatch".into()))
                }
            };
        }
    }

    fn ensure_connected(&mut self) -> Result<Conn> {
        match &mut self.transport {
            Transport::Inherited { read_fd, write_fd } => Ok(Conn::Ready {
                read_fd: *read_fd,
                write_fd: *write_fd,
            }),
            Transport::Unix { path, fd } => {
                if let Some(fd) = fd {
                    return Ok(Conn::Ready {
                        read_fd: *fd,
                        write_fd: *fd,
                    });
                }
                match connect_unix(path)? {
                    Some(new_fd) => {
                        debug!(path = %path.display(), "connected to resolver");
                        *fd = Some(new_fd);
                        Ok(Conn::Ready {
                            read_fd: new_fd,
                            write_fd: new_fd,
                        })
                    }
                    None => Ok(Conn::Interrupted),
                }
            }
            Transport::Tcp { addr, fd } => {
                if let Some(fd) = fd {
                    return Ok(Conn::Ready {
                        read_fd: *fd,
                        write_fd: *fd,
                    });
                }
                match connect_tcp(*addr)? {
                    Some(new_fd) => {
                        debug!(%addr, "connected to resolver");
                        *fd = Some(new_fd);
                        Ok(Conn::Ready {
                            read_fd: new_fd,
                            write_fd: new_fd,
                        })
                    }
                    None => Ok(Conn::Interrupted),
                }
            }
        }
    }

    /// Drops a connection-oriented transport so the next resolve dials
    /// again. Inherited descriptors have no reconnect path and are kept.
    fn disconnect(&mut self) {
        match &mut self.transport {
            Transport::Inherited { .. } => {}
            Transport::Unix { fd, .. } | Transport::Tcp { fd, .. } => {
                if let Some(fd) = fd.take() {
                    let _ = interrupt::close(fd);
                }
            }
        }
    }
}

impl Drop for ResolverClient {
    fn drop(&mut self) {
        match &mut self.transport {
            Transport::Inherited { read_fd, write_fd } => {
                let _ = interrupt::close(*read_fd);
                if write_fd != read_fd {
                    let _ = interrupt::close(*write_fd);
                }
            }
            Transport::Unix { fd, .. } | Transport::Tcp { fd, .. } => {
                if let Some(fd) = fd.take() {
                    let _ = interrupt::close(fd);
                }
            }
        }
    }
}

fn encode_request(role: AddressRole, family: u8, correlation: u32, addr: &[u8; 16]) -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];
    frame[0] = WIRE_MAGIC;
    frame[1] = WIRE_VERSION;
    frame[2] = match role {
        AddressRole::Main => ROLE_MAIN,
        AddressRole::IcmpError => ROLE_ICMP_ERROR,
    };
    frame[3] = family;
    frame[4..8].copy_from_slice(&correlation.to_be_bytes());
    frame[8..24].copy_from_slice(addr);
    frame
}

enum WriteResult {
    Done,
    Interrupted,
}

fn write_full(fd: RawFd, buf: &[u8]) -> std::io::Result<WriteResult> {
    let mut written = 0;
    while written < buf.len() {
        match interrupt::write(fd, &buf[written..])? {
            IoOutcome::Transferred(n) => written += n,
            IoOutcome::Interrupted => return Ok(WriteResult::Interrupted),
        }
    }
    Ok(WriteResult::Done)
}

enum ReadResult {
    Frame([u8; FRAME_SIZE]),
    TimedOut,
    Interrupted,
    Eof,
}

/// Reads one frame, honoring the absolute deadline across short reads.
fn read_frame(fd: RawFd, deadline: Instant) -> std::io::Result<ReadResult> {
    let mut frame = [0u8; FRAME_SIZE];
    let mut filled = 0;

    while filled < FRAME_SIZE {
        let remaining = match deadline.checked_duration_since(Instant::now()) {
            Some(remaining) if !remaining.is_zero() => remaining,
            _ => return Ok(ReadResult::TimedOut),
        };

        match interrupt::wait_readable(fd, remaining)? {
            PollOutcome::Ready => {}
            PollOutcome::TimedOut => return Ok(ReadResult::TimedOut),
            PollOutcome::Interrupted => return Ok(ReadResult::Interrupted),
        }

        match interrupt::read(fd, &mut frame[filled..])? {
            IoOutcome::Transferred(0) => return Ok(ReadResult::Eof),
            IoOutcome::Transferred(n) => filled += n,
            IoOutcome::Interrupted => return Ok(ReadResult::Interrupted),
        }
    }

    Ok(ReadResult::Frame(frame))
}

fn connect_unix(path: &PathBuf) -> Result<Option<RawFd>> {
    let mut sa: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    sa.sun_family = libc::AF_UNIX as libc::sa_family_t;
    let bytes = path.as_os_str().as_bytes();
    if bytes.len() >= sa.sun_path.len() {
        return Err(Error::Resolver("resolver socket path too long".into()));
    }
    for (i, byte) in bytes.iter().enumerate() {
        sa.sun_path[i] = *byte as libc::c_char;
    }

    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }

    finish_connect(
        fd,
        &sa as *const libc::sockaddr_un as *const libc::sockaddr,
        std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
    )
}

fn connect_tcp(addr: SocketAddr) -> Result<Option<RawFd>> {
    let (domain, sa_storage, sa_len) = match addr {
        SocketAddr::V4(v4) => {
            let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            sa.sin_family = libc::AF_INET as libc::sa_family_t;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();
            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sa as *const libc::sockaddr_in as *const u8,
                    &mut storage as *mut libc::sockaddr_storage as *mut u8,
                    std::mem::size_of::<libc::sockaddr_in>(),
                );
            }
            (
                libc::AF_INET,
                storage,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        }
        SocketAddr::V6(v6) => {
            let mut sa: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sa as *const libc::sockaddr_in6 as *const u8,
                    &mut storage as *mut libc::sockaddr_storage as *mut u8,
                    std::mem::size_of::<libc::sockaddr_in6>(),
                );
            }
            (
                libc::AF_INET6,
                storage,
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        }
    };

    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }

    let one: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &one as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    finish_connect(
        fd,
        &sa_storage as *const libc::sockaddr_storage as *const libc::sockaddr,
        sa_len,
    )
}

fn finish_connect(
    fd: RawFd,
    sa: *const libc::sockaddr,
    sa_len: libc::socklen_t,
) -> Result<Option<RawFd>> {
    match interrupt::connect(fd, sa, sa_len, true) {
        Ok(IoOutcome::Transferred(_)) => Ok(Some(fd)),
        Ok(IoOutcome::Interrupted) => Ok(None),
        Err(err) => {
            let _ = interrupt::close(fd);
            Err(Error::Resolver(format!("connect failed: {err}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExternalRuntime;

    fn socketpair() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        let rc =
            unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    fn inherited_client(read_fd: RawFd, write_fd: RawFd) -> ResolverClient {
        let cfg = ExternalRuntime {
            transport: ResolverTransportConfig::InheritedFds,
            timeout: Duration::from_millis(200),
            cache_size_main: 0,
            cache_size_icmp_error: 0,
        };
        ResolverClient::new(&cfg, Some((read_fd, write_fd))).unwrap()
    }

    #[test]
    fn test_request_frame_layout() {
        let frame = encode_request(AddressRole::IcmpError, FAMILY_IPV4, 7, &{
            let mut a = [0u8; 16];
            a[..4].copy_from_slice(&[192, 0, 2, 1]);
            a
        });

        assert_eq!(frame[0], WIRE_MAGIC);
        assert_eq!(frame[1], WIRE_VERSION);
        assert_eq!(frame[2], ROLE_ICMP_ERROR);
        assert_eq!(frame[3], FAMILY_IPV4);
        assert_eq!(&frame[4..8], &7u32.to_be_bytes());
        assert_eq!(&frame[8..12], &[192, 0, 2, 1]);
        assert_eq!(&frame[12..24], &[0u8; 12]);
    }

    #[test]
    fn test_resolve_mapped_round_trip() {
        let (ours, theirs) = socketpair();
        let mut client = inherited_client(ours, ours);

        let server = std::thread::spawn(move || {
            let mut request = [0u8; FRAME_SIZE];
            let mut filled = 0;
            while filled < FRAME_SIZE {
                let n = unsafe {
                    libc::read(
                        theirs,
                        request[filled..].as_mut_ptr() as *mut libc::c_void,
                        FRAME_SIZE - filled,
                    )
                };
                assert!(n > 0);
                filled += n as usize;
            }
            assert_eq!(request[0], WIRE_MAGIC);
            assert_eq!(request[2], ROLE_MAIN);
            assert_eq!(request[3], FAMILY_IPV4);

            let mut response = request;
            response[2] = STATUS_MAPPED;
            response[3] = FAMILY_IPV6;
            response[8..24].copy_from_slice(&[0xAB; 16]);
            let n = unsafe {
                libc::write(
                    theirs,
                    response.as_ptr() as *const libc::c_void,
                    FRAME_SIZE,
                )
            };
            assert_eq!(n as usize, FRAME_SIZE);
            unsafe { libc::close(theirs) };
        });

        let outcome = client.resolve_4(&[192, 0, 2, 1], AddressRole::Main).unwrap();
        assert_eq!(outcome, Outcome::MappedV6([0xAB; 16]));
        server.join().unwrap();
    }

    #[test]
    fn test_resolve_unmapped() {
        let (ours, theirs) = socketpair();
        let mut client = inherited_client(ours, ours);

        let server = std::thread::spawn(move || {
            let mut request = [0u8; FRAME_SIZE];
            let n = unsafe {
                libc::read(
                    theirs,
                    request.as_mut_ptr() as *mut libc::c_void,
                    FRAME_SIZE,
                )
            };
            assert_eq!(n as usize, FRAME_SIZE);

            let mut response = request;
            response[2] = STATUS_UNMAPPED;
            let n = unsafe {
                libc::write(
                    theirs,
                    response.as_ptr() as *const libc::c_void,
                    FRAME_SIZE,
                )
            };
            assert_eq!(n as usize, FRAME_SIZE);
            unsafe { libc::close(theirs) };
        });

        let outcome = client.resolve_6(&[0x20; 16], AddressRole::Main).unwrap();
        assert_eq!(outcome, Outcome::Unmapped);
        server.join().unwrap();
    }

    #[test]
    fn test_torn_response_is_reassembled() {
        let (ours, theirs) = socketpair();
        let mut client = inherited_client(ours, ours);

        let server = std::thread::spawn(move || {
            let mut request = [0u8; FRAME_SIZE];
            let n = unsafe {
                libc::read(
                    theirs,
                    request.as_mut_ptr() as *mut libc::c_void,
                    FRAME_SIZE,
                )
            };
            assert_eq!(n as usize, FRAME_SIZE);

            let mut response = request;
            response[2] = STATUS_MAPPED;
            response[3] = FAMILY_IPV6;
            response[8..24].copy_from_slice(&[0x42; 16]);

            // The response dribbles in three pieces.
            for chunk in [&response[..5], &response[5..11], &response[11..]] {
                let n = unsafe {
                    libc::write(theirs, chunk.as_ptr() as *const libc::c_void, chunk.len())
                };
                assert_eq!(n as usize, chunk.len());
                std::thread::sleep(Duration::from_millis(10));
            }
            unsafe { libc::close(theirs) };
        });

        let outcome = client.resolve_4(&[192, 0, 2, 9], AddressRole::Main).unwrap();
        assert_eq!(outcome, Outcome::MappedV6([0x42; 16]));
        server.join().unwrap();
    }

    #[test]
    fn test_resolve_times_out() {
        let (ours, theirs) = socketpair();
        let mut client = inherited_client(ours, ours);

        // Nobody answers.
        let result = client.resolve_4(&[192, 0, 2, 1], AddressRole::Main);
        assert!(matches!(result, Err(Error::Resolver(_))));

        unsafe { libc::close(theirs) };
    }

    #[test]
    fn test_peer_close_is_an_error() {
        let (ours, theirs) = socketpair();
        let mut client = inherited_client(ours, ours);
        unsafe { libc::close(theirs) };

        let result = client.resolve_4(&[192, 0, 2, 1], AddressRole::Main);
        assert!(matches!(result, Err(Error::Resolver(_))));
    }
}
