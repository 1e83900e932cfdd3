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

//! Cooperative cancellation for blocking operations.
//!
//! A `CancellationToken` is created by whatever launches a logical unit of
//! work (normally the task queue) and handed down to every blocking call
//! performed on behalf of that work. Cancellation is cooperative: setting
//! the flag makes the *next* delivery check fail, and the wake pipe makes a
//! poll-based I/O wait return early instead of running out its timeout.
//!
//! This is implemented exactly once, here, and shared by plain and TLS
//! streams alike rather than being re-implemented per stream type.

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd;

/// A shared, cooperatively-checked cancellation flag with a pollable wake
/// channel.
///
/// Clones share the same underlying state; `cancel()` is safe from any
/// thread while the owning worker polls `check()` / `interrupted()`.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    wake_read: RawFd,
    wake_write: RawFd,
}

struct State {
    cancelled: bool,
    block_depth: i32,
}

impl CancellationToken {
    pub fn new() -> Self {
        // The pipe is a convenience; if fd pressure prevents creating one,
        // the token still works, it just cannot wake a poll early.
        let (wake_read, wake_write) = match unistd::pipe() {
            Ok(fds) => fds,
            Err(_) => (-1, -1),
        };

        for &fd in &[wake_read, wake_write] {
            if fd >= 0 {
                let _ = fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK));
            }
        }

        CancellationToken {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    cancelled: false,
                    block_depth: 0,
                }),
                wake_read,
                wake_write,
            }),
        }
    }

    /// Trigger cancellation.
    ///
    /// Idempotent and callable from any thread. The wake pipe is signalled
    /// so a blocked poll returns immediately.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.cancelled {
            return;
        }

        state.cancelled = true;
        if self.inner.wake_write >= 0 {
            let _ = unistd::write(self.inner.wake_write, &[b'!']);
        }
    }

    /// Clear a previous cancellation so the token can be reused for a retry
    /// of the same logical operation.
    pub fn uncancel(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.cancelled = false;
        drop(state);

        if self.inner.wake_read >= 0 {
            let mut buf = [0u8; 16];
            while let Ok(n) = unistd::read(self.inner.wake_read, &mut buf) {
                if n < buf.len() {
                    break;
                }
            }
        }
    }

    /// The raw cancelled state, ignoring the block depth.
    pub fn check(&self) -> bool {
        self.inner.state.lock().unwrap().cancelled
    }

    /// Whether cancellation should currently be *delivered*.
    ///
    /// False while a `block()`ed critical section is in progress even if
    /// `cancel()` has already been called; the cancellation stays latched
    /// and this returns true again once the depth drops back to zero.
    pub fn interrupted(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        state.cancelled && state.block_depth == 0
    }

    /// Suppress cancellation delivery until the matching `unblock()`.
    ///
    /// Used around sequences that must not be torn down mid-flight, such
    /// as a TLS handshake.
    pub fn block(&self) {
        self.inner.state.lock().unwrap().block_depth += 1;
    }

    /// Whether delivery is currently suppressed by a `block()`.
    ///
    /// A poll loop uses this to leave the wake descriptor out of its fd
    /// set; a latched cancel would otherwise keep the descriptor readable
    /// and turn the wait into a spin.
    pub fn blocked(&self) -> bool {
        self.inner.state.lock().unwrap().block_depth > 0
    }

    pub fn unblock(&self) {
        let mut state = self.inner.state.lock().unwrap();
        debug_assert!(state.block_depth > 0);
        if state.block_depth > 0 {
            state.block_depth -= 1;
        }
    }

    /// A pollable file descriptor which becomes readable once the token is
    /// cancelled, for use in a readiness wait next to a socket.
    ///
    /// Returns `None` if no wake pipe could be allocated; callers then rely
    /// on flag polling alone. The descriptor is owned by the token and is
    /// only valid while the token (or a clone) is alive.
    pub fn wait_fd(&self) -> Option<RawFd> {
        if self.inner.wake_read >= 0 {
            Some(self.inner.wake_read)
        } else {
            None
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for &fd in &[self.wake_read, self.wake_write] {
            if fd >= 0 {
                let _ = unistd::close(fd);
            }
        }
    }
}
