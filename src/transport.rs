//! UDP transport
//!
//! One datagram socket per node, configured for address reuse (several
//! nodes can share the port on one host) and broadcast, bound to
//! `0.0.0.0:port`. The socket options have to be set between `socket(2)`
//! and `bind(2)`, which `std` cannot express, so creation goes through
//! libc; all datagram I/O afterwards uses the `std` socket.

use crate::error::Result;
use std::io;
use std::mem;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::os::fd::{FromRawFd, RawFd};

/// Create the node's datagram socket bound to `0.0.0.0:port`.
pub fn open_socket(port: u16) -> Result<UdpSocket> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }
    // Take ownership right away so the fd is released on any error below
    let sock = unsafe { UdpSocket::from_raw_fd(fd) };

    set_socket_flag(fd, libc::SO_REUSEADDR)?;
    set_socket_flag(fd, libc::SO_BROADCAST)?;

    let addr = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: port.to_be(),
        sin_addr: libc::in_addr {
            s_addr: libc::INADDR_ANY.to_be(),
        },
        sin_zero: [0; 8],
    };
    let rc = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(sock)
}

/// Receive one datagram, looping over retryable errors. `None` means the
/// socket reported orderly shutdown (zero-length read).
pub fn recv_from(sock: &UdpSocket, buf: &mut [u8]) -> Result<Option<(SocketAddrV4, usize)>> {
    loop {
        match sock.recv_from(buf) {
            Ok((0, _)) => return Ok(None),
            Ok((len, addr)) => {
                // AF_INET sockets only ever report v4 peers
                let SocketAddr::V4(addr) = addr else { continue };
                return Ok(Some((addr, len)));
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Send one datagram, looping over retryable errors. `true` only when the
/// whole datagram was handed to the kernel.
pub fn send_to(sock: &UdpSocket, addr: SocketAddrV4, datagram: &[u8]) -> Result<bool> {
    loop {
        match sock.send_to(datagram, addr) {
            Ok(len) => return Ok(len == datagram.len()),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn set_socket_flag(fd: RawFd, option: libc::c_int) -> Result<()> {
    let on: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            &on as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn datagrams_travel_between_two_sockets() {
        // Ephemeral ports so tests never collide
        let a = open_socket(0).unwrap();
        let b = open_socket(0).unwrap();
        let b_port = b.local_addr().unwrap().port();

        let target = SocketAddrV4::new(Ipv4Addr::LOCALHOST, b_port);
        assert!(send_to(&a, target, b"hello").unwrap());

        let mut buf = [0u8; 64];
        let (from, len) = recv_from(&b, &mut buf).unwrap().unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(*from.ip(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn open_socket_binds_the_requested_port() {
        let sock = open_socket(0).unwrap();
        let addr = sock.local_addr().unwrap();
        assert!(addr.port() != 0);
        assert!(addr.ip().is_unspecified());
    }
}
