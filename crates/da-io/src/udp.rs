//! Non-blocking connected UDP endpoint construction.
//!
//! `SO_REUSEADDR` + `SO_REUSEPORT` let the same bound local address be
//! shared across the read and write sides of a peer link.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;

/// Bind `local_addr`, apply `SO_REUSEADDR`/`SO_REUSEPORT`, set
/// non-blocking, and connect to `peer_addr` so `send`/`recv` can be used
/// without specifying the peer on every call.
pub fn bind_connected_udp(local_addr: SocketAddr, peer_addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(local_addr)?;
    apply_reuse_addr_port(&socket)?;
    socket.set_nonblocking(true)?;
    socket.connect(peer_addr)?;
    Ok(socket)
}

fn apply_reuse_addr_port(socket: &UdpSocket) -> io::Result<()> {
    let fd = socket.as_raw_fd();
    set_bool_sockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR)?;
    set_bool_sockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT)?;
    Ok(())
}

fn set_bool_sockopt(fd: libc::c_int, level: libc::c_int, name: libc::c_int) -> io::Result<()> {
    let value: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_and_connects_two_loopback_sockets() {
        let a_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let probe = UdpSocket::bind(a_addr).unwrap();
        let a_real_addr = probe.local_addr().unwrap();
        drop(probe);

        let b_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let probe_b = UdpSocket::bind(b_addr).unwrap();
        let b_real_addr = probe_b.local_addr().unwrap();
        drop(probe_b);

        let a = bind_connected_udp(a_real_addr, b_real_addr).unwrap();
        let b = bind_connected_udp(b_real_addr, a_real_addr).unwrap();

        a.send(b"ping").unwrap();
        let mut buf = [0u8; 16];
        // Non-blocking: retry briefly until the datagram arrives.
        let mut n = None;
        for _ in 0..200 {
            match b.recv(&mut buf) {
                Ok(len) => {
                    n = Some(len);
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                Err(e) => panic!("unexpected recv error: {e}"),
            }
        }
        assert_eq!(&buf[..n.unwrap()], b"ping");
    }
}
