use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::fd::AsRawFd;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags};

use super::header::MAX_PACKET;
use super::TIMEOUT;
use crate::Error;

/// A UDP socket with a timed receive. No framing happens here: one
/// datagram in, one packet out.
#[derive(Debug)]
pub struct Endpoint {
    sock: UdpSocket,
    timeout: Duration,
}

impl Endpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, Error> {
        let sock = UdpSocket::bind(addr)?;

        Ok(Endpoint {
            sock,
            timeout: TIMEOUT,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.sock.local_addr()?)
    }

    pub fn send(&self, packet: &[u8], to: SocketAddr) -> Result<(), Error> {
        self.sock.send_to(packet, to)?;

        Ok(())
    }

    /// Waits at most the configured timeout for a datagram; `None` means
    /// the timeout elapsed.
    pub fn recv(&self) -> Result<Option<(Vec<u8>, SocketAddr)>, Error> {
        let mut pfd = [PollFd::new(self.sock.as_raw_fd(), PollFlags::POLLIN)];

        if poll(&mut pfd[..], self.timeout.as_millis() as i32)? == 0 {
            return Ok(None);
        }

        let mut buf = [0u8; MAX_PACKET];
        let (n, from) = self.sock.recv_from(&mut buf)?;

        Ok(Some((buf[..n].to_vec(), from)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn recv_times_out_when_nothing_arrives() {
        let ep = Endpoint::bind("127.0.0.1:0").unwrap();

        let before = Instant::now();
        assert!(ep.recv().unwrap().is_none());
        // Leave some slack for poll returning a moment early.
        assert!(before.elapsed() >= TIMEOUT.mul_f32(0.8));
    }

    #[test]
    fn datagram_boundaries_are_preserved() {
        let a = Endpoint::bind("127.0.0.1:0").unwrap();
        let b = Endpoint::bind("127.0.0.1:0").unwrap();

        a.send(b"first", b.local_addr().unwrap()).unwrap();
        a.send(b"second", b.local_addr().unwrap()).unwrap();

        let (one, from) = b.recv().unwrap().unwrap();
        assert_eq!(one, b"first");
        assert_eq!(from, a.local_addr().unwrap());

        let (two, _) = b.recv().unwrap().unwrap();
        assert_eq!(two, b"second");
    }
}
