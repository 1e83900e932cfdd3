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

use std::net::TcpStream;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::warn;
use nix::poll::PollFlags;
use openssl::ssl::{
    ErrorCode, HandshakeError, SslConnector, SslMethod, SslStream,
    SslVerifyMode,
};

use super::stream::wait_ready;
use crate::support::cancellation::CancellationToken;
use crate::support::error::Error;

/// Shared TLS client configuration.
///
/// Building an `SslConnector` loads the system trust store, so one context
/// is built per account and reused across reconnects.
pub struct TlsContext {
    connector: SslConnector,
}

impl TlsContext {
    pub fn new(verify_certificates: bool) -> Result<Self, Error> {
        let mut builder = SslConnector::builder(SslMethod::tls())?;
        if !verify_certificates {
            warn!("TLS certificate verification is disabled");
            builder.set_verify(SslVerifyMode::NONE);
        }

        Ok(TlsContext {
            connector: builder.build(),
        })
    }

    /// Run the TLS handshake over `tcp` (which must be in blocking mode)
    /// and wrap the result.
    ///
    /// Cancellation delivery is suppressed for the duration of the
    /// handshake. Tearing a handshake down half way leaves OpenSSL in a
    /// state it cannot resume from, so a cancel arriving here stays
    /// latched and is delivered on the first read or write instead.
    pub fn connect(
        &self,
        domain: &str,
        tcp: TcpStream,
        token: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<TlsStream, Error> {
        if token.interrupted() {
            return Err(Error::Cancelled);
        }

        tcp.set_read_timeout(timeout)?;
        tcp.set_write_timeout(timeout)?;

        token.block();
        let handshake = self.connector.connect(domain, tcp);
        token.unblock();

        let ssl = handshake.map_err(|e| match e {
            HandshakeError::SetupFailure(es) => Error::Ssl(es),
            HandshakeError::Failure(f) => Error::Ssl2(f.into_error()),
            // The socket is blocking during the handshake
            HandshakeError::WouldBlock(_) => unreachable!(),
        })?;

        ssl.get_ref().set_read_timeout(None)?;
        ssl.get_ref().set_write_timeout(None)?;
        ssl.get_ref().set_nonblocking(true)?;

        Ok(TlsStream {
            ssl,
            timeout,
            close: Arc::new(CloseCoordinator::new()),
        })
    }
}

/// A TLS stream with cancellable I/O and coordinated shutdown.
///
/// Another thread may hold a [`CloseHandle`] and request that the session
/// be closed while a read is blocked in this one. The shutdown itself is
/// deferred until no read is in flight, since running the TLS close
/// alongside an in-progress `SSL_read` on the same session is not sound;
/// the blocked read is woken through the cancellation token instead.
pub struct TlsStream {
    ssl: SslStream<TcpStream>,
    timeout: Option<Duration>,
    close: Arc<CloseCoordinator>,
}

impl TlsStream {
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            close: Arc::clone(&self.close),
        }
    }

    /// Read up to `buf.len()` bytes. Returns 0 at EOF or once a close has
    /// been scheduled.
    pub fn read(
        &mut self,
        buf: &mut [u8],
        token: Option<&CancellationToken>,
    ) -> Result<usize, Error> {
        if !self.close.begin_read() {
            return Ok(0);
        }

        let result = self.read_inner(buf, token);

        if self.close.end_read() {
            self.shutdown_now();
        }

        result
    }

    fn read_inner(
        &mut self,
        buf: &mut [u8],
        token: Option<&CancellationToken>,
    ) -> Result<usize, Error> {
        if token.map_or(false, CancellationToken::interrupted) {
            return Err(Error::Cancelled);
        }

        loop {
            match self.ssl.ssl_read(buf) {
                Ok(n) => return Ok(n),
                Err(e) => self.handle_want(e, token)?,
            }

            if self.close.is_scheduled() {
                return Ok(0);
            }
        }
    }

    /// Write the whole of `buf`.
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
            match self.ssl.ssl_write(&buf[written..]) {
                Ok(n) => written += n,
                Err(e) => self.handle_want(e, token)?,
            }
        }

        Ok(())
    }

    /// Close the session, now if possible, otherwise once the read in
    /// flight finishes.
    pub fn schedule_close(&mut self) {
        if self.close.schedule_close() {
            self.shutdown_now();
        }
    }

    /// Map a non-success `ssl_read`/`ssl_write` outcome to either a
    /// readiness wait (returning `Ok` so the caller retries) or a final
    /// error.
    fn handle_want(
        &mut self,
        e: openssl::ssl::Error,
        token: Option<&CancellationToken>,
    ) -> Result<(), Error> {
        let events = match e.code() {
            ErrorCode::WANT_READ => PollFlags::POLLIN,
            ErrorCode::WANT_WRITE => PollFlags::POLLOUT,
            // Clean TLS close from the peer
            ErrorCode::ZERO_RETURN => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "TLS session closed by peer",
                )))
            }
            _ => {
                return Err(match e.into_io_error() {
                    Ok(io) => Error::Io(io),
                    Err(e) => match e.ssl_error() {
                        Some(stack) => Error::Ssl(stack.clone()),
                        None => Error::Ssl2(e),
                    },
                })
            }
        };

        wait_ready(
            self.ssl.get_ref().as_raw_fd(),
            events,
            token,
            self.timeout,
        )
    }

    fn shutdown_now(&mut self) {
        // Best-effort; the TCP socket goes away regardless.
        let _ = self.ssl.shutdown();
    }
}

/// A cross-thread request to close a [`TlsStream`].
#[derive(Clone)]
pub struct CloseHandle {
    close: Arc<CloseCoordinator>,
}

impl CloseHandle {
    /// Request that the stream be closed.
    ///
    /// Must be paired with cancelling the token the blocked read is
    /// waiting on, or the request sits unnoticed until the read's own
    /// timeout.
    pub fn schedule_close(&self) {
        self.close.schedule_close();
    }
}

/// Tracks reads in flight against a close request.
struct CloseCoordinator {
    state: Mutex<CloseState>,
}

#[derive(Default)]
struct CloseState {
    reads_in_flight: u32,
    close_scheduled: bool,
    closed: bool,
}

impl CloseCoordinator {
    fn new() -> Self {
        CloseCoordinator {
            state: Mutex::new(CloseState::default()),
        }
    }

    /// Returns false if the stream is already closing; otherwise records
    /// the read and returns true.
    fn begin_read(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.close_scheduled || state.closed {
            false
        } else {
            state.reads_in_flight += 1;
            true
        }
    }

    /// Returns true if this was the last read in flight and a close is
    /// pending, in which case the caller must perform the shutdown.
    fn end_read(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.reads_in_flight -= 1;
        if state.close_scheduled && !state.closed && 0 == state.reads_in_flight
        {
            state.closed = true;
            true
        } else {
            false
        }
    }

    /// Returns true if the caller may close immediately.
    fn schedule_close(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return false;
        }

        state.close_scheduled = true;
        if 0 == state.reads_in_flight {
            state.closed = true;
            true
        } else {
            false
        }
    }

    fn is_scheduled(&self) -> bool {
        self.state.lock().unwrap().close_scheduled
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn close_with_no_reads_is_immediate() {
        let c = CloseCoordinator::new();
        assert!(c.schedule_close());
        // Only one party performs the shutdown
        assert!(!c.schedule_close());
        assert!(!c.begin_read());
    }

    #[test]
    fn close_defers_until_last_read_finishes() {
        let c = CloseCoordinator::new();
        assert!(c.begin_read());
        assert!(c.begin_read());

        assert!(!c.schedule_close());
        assert!(c.is_scheduled());
        // New reads are refused once a close is pending
        assert!(!c.begin_read());

        assert!(!c.end_read());
        assert!(c.end_read());
    }

    #[test]
    fn reads_without_close_never_shut_down() {
        let c = CloseCoordinator::new();
        assert!(c.begin_read());
        assert!(!c.end_read());
        assert!(c.begin_read());
        assert!(!c.end_read());
    }
}
