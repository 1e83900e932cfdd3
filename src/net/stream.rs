//-
// Copyright (c) 2026, the Popsync authors
//
// This file is part of Popsync.
//
// Popsync is free software: you can redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Popsync is distributed in the hope  that it will be useful,  but WITHOUT
// ANY WARRANTY;  without even  the implied  warranty of  MERCHANTABILITY or
// FITNESS FOR  A PARTICULAR PURPOSE.  See the  GNU General  Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Popsync. If not, see <http://www.gnu.org/licenses/>.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};

use crate::support::cancellation::CancellationToken;
use crate::support::error::Error;

/// Ceiling on a single underlying write call, so that one large buffer
/// cannot exceed the wait/cancel granularity.
const WRITE_CHUNK: usize = 4096;

/// Wait until `fd` reports one of `events`, the token is cancelled, or the
/// timeout elapses.
///
/// When a token is supplied its wake descriptor joins the poll set, so a
/// cancel from another thread wakes the wait immediately rather than at
/// the end of the polling interval. Without a token this degrades to a
/// plain bounded wait with interruption retry, for contexts where
/// cancellation is not meaningful.
pub(crate) fn wait_ready(
    fd: RawFd,
    events: PollFlags,
    token: Option<&CancellationToken>,
    timeout: Option<Duration>,
) -> Result<(), Error> {
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        if token.map_or(false, CancellationToken::interrupted) {
            return Err(Error::Cancelled);
        }

        // Only poll the wake descriptor when a cancellation could actually
        // be delivered; a latched-but-blocked cancel would otherwise make
        // this loop spin.
        let wake_fd = token
            .filter(|t| !t.blocked())
            .and_then(CancellationToken::wait_fd);

        let mut fds = [
            PollFd::new(fd, events),
            PollFd::new(wake_fd.unwrap_or(-1), PollFlags::POLLIN),
        ];
        let nfds = if wake_fd.is_some() { 2 } else { 1 };

        let poll_timeout = match deadline {
            None => -1,
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::TimedOut);
                }
                (deadline - now).as_millis().min(i32::max_value() as u128)
                    as i32
            }
        };

        match poll(&mut fds[..nfds], poll_timeout) {
            Err(nix::Error::Sys(Errno::EINTR)) => continue,
            Err(e) => return Err(e.into()),
            Ok(0) => return Err(Error::TimedOut),
            Ok(_) => (),
        }

        if fds[1].revents().map_or(false, |r| !r.is_empty()) {
            // Wake channel fired; deliver only if still deliverable.
            if token.map_or(false, CancellationToken::interrupted) {
                return Err(Error::Cancelled);
            }
            continue;
        }

        if fds[0].revents().map_or(false, |r| !r.is_empty()) {
            return Ok(());
        }
    }
}

fn is_retry(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// A duplex stream performing cancellable, deadline-bounded reads and
/// writes.
///
/// The wrapped stream must be in non-blocking mode; readiness is
/// established by polling before every I/O attempt, with spurious
/// would-block and interrupted conditions retried.
pub struct CancellableStream<S> {
    stream: S,
    timeout: Option<Duration>,
}

impl CancellableStream<TcpStream> {
    /// Connect to `addr`, bounded by `connect_timeout`, and wrap the
    /// resulting socket.
    pub fn connect(
        addr: impl ToSocketAddrs,
        connect_timeout: Duration,
        io_timeout: Option<Duration>,
    ) -> Result<Self, Error> {
        let mut last_err = io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no addresses resolved",
        );
        for addr in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, connect_timeout) {
                Ok(stream) => {
                    stream.set_nonblocking(true)?;
                    return Ok(Self::new(stream, io_timeout));
                }
                Err(e) => last_err = e,
            }
        }

        Err(last_err.into())
    }

    /// Unwrap the socket, restoring blocking mode, e.g. to run a TLS
    /// handshake over it.
    pub fn into_blocking_inner(self) -> Result<TcpStream, Error> {
        self.stream.set_nonblocking(false)?;
        Ok(self.stream)
    }
}

impl<S: Read + Write + AsRawFd> CancellableStream<S> {
    /// Wrap `stream`, which must already be non-blocking.
    pub fn new(stream: S, timeout: Option<Duration>) -> Self {
        CancellableStream { stream, timeout }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Read up to `buf.len()` bytes, blocking until some progress is made,
    /// the timeout elapses, or `token` is cancelled.
    ///
    /// A successful return may be shorter than requested; callers needing
    /// exact-size semantics must loop. A return of 0 means EOF.
    pub fn read(
        &mut self,
        buf: &mut [u8],
        token: Option<&CancellationToken>,
    ) -> Result<usize, Error> {
        if token.map_or(false, CancellationToken::interrupted) {
            return Err(Error::Cancelled);
        }

        loop {
            wait_ready(
                self.stream.as_raw_fd(),
                PollFlags::POLLIN,
                token,
                self.timeout,
            )?;

            match self.stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(ref e) if is_retry(e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write the whole of `buf`, in chunks of at most `WRITE_CHUNK` bytes,
    /// re-establishing writability (and re-checking cancellation) between
    /// chunks.
    pub fn write(
        &mut self,
        buf: &[u8],
        token: Option<&CancellationToken>,
    ) -> Result<(), Error> {
        if token.map_or(false, CancellationToken::interrupted) {
            return Err(Error::Cancelled);
        }

        let mut written = 0;
        while written < buf.len() {
            wait_ready(
                self.stream.as_raw_fd(),
                PollFlags::POLLOUT,
                token,
                self.timeout,
            )?;

            let end = (written + WRITE_CHUNK).min(buf.len());
            match self.stream.write(&buf[written..end]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "stream refused all bytes",
                    )
                    .into())
                }
                Ok(n) => written += n,
                Err(ref e) if is_retry(e) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    fn pair() -> (CancellableStream<TcpStream>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = CancellableStream::connect(
            addr,
            Duration::from_secs(5),
            Some(Duration::from_secs(5)),
        )
        .unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn read_returns_available_data() {
        let (mut client, mut server) = pair();
        server.write_all(b"+OK ready\r\n").unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf, None).unwrap();
        assert!(n > 0);
        assert_eq!(b"+OK ready\r\n"[..n], buf[..n]);
    }

    #[test]
    fn read_times_out_without_data() {
        let (mut client, _server) = pair();
        client.timeout = Some(Duration::from_millis(50));

        let mut buf = [0u8; 64];
        let start = Instant::now();
        assert_matches!(Err(Error::TimedOut), client.read(&mut buf, None));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn read_wakes_on_cancel_before_timeout() {
        let (mut client, _server) = pair();
        client.timeout = Some(Duration::from_secs(30));

        let token = CancellationToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });

        let mut buf = [0u8; 64];
        let start = Instant::now();
        assert_matches!(
            Err(Error::Cancelled),
            client.read(&mut buf, Some(&token))
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }

    #[test]
    fn cancelled_token_fails_read_immediately() {
        let (mut client, mut server) = pair();
        server.write_all(b"data").unwrap();

        let token = CancellationToken::new();
        token.cancel();

        let mut buf = [0u8; 64];
        assert_matches!(
            Err(Error::Cancelled),
            client.read(&mut buf, Some(&token))
        );
    }

    #[test]
    fn blocked_token_does_not_interrupt() {
        let (mut client, mut server) = pair();
        server.write_all(b"handshake").unwrap();

        let token = CancellationToken::new();
        token.block();
        token.cancel();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf, Some(&token)).unwrap();
        assert_eq!(b"handshake".len(), n);

        token.unblock();
        assert_matches!(
            Err(Error::Cancelled),
            client.read(&mut buf, Some(&token))
        );
    }

    #[test]
    fn large_write_is_chunked_and_complete() {
        let (mut client, mut server) = pair();

        let data = vec![0x5Au8; 64 * 1024];
        let expected = data.clone();
        let reader = thread::spawn(move || {
            let mut got = Vec::new();
            let mut buf = [0u8; 8192];
            while got.len() < expected.len() {
                let n = server.read(&mut buf).unwrap();
                assert!(n > 0);
                got.extend_from_slice(&buf[..n]);
            }
            assert_eq!(expected, got);
        });

        client.write(&data, None).unwrap();
        reader.join().unwrap();
    }
}
