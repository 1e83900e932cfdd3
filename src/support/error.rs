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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The operation's cancellation token was triggered.
    ///
    /// Never retried automatically, and never marks partial work as failed.
    #[error("Operation cancelled")]
    Cancelled,
    /// A blocking read or write exceeded its deadline.
    #[error("Operation timed out")]
    TimedOut,
    /// The server sent a malformed or negative reply.
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// No message with this UID is known remotely or locally.
    #[error("No such message: {0}")]
    NotFound(String),
    /// The server does not advertise a capability this operation needs.
    #[error("Operation not supported by server")]
    Unsupported,
    /// The summary file failed structural validation while loading.
    #[error("Summary file corrupt")]
    CorruptSummary,
    /// A cache entry's leading sentinel byte was not the commit marker.
    #[error("Cache entry incomplete or corrupt")]
    CorruptCacheEntry,
    /// The task queue has been shut down and accepts no further work.
    #[error("Task queue shut down")]
    QueueShutdown,
    #[error("Unsafe cache entry name")]
    UnsafeName,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error(transparent)]
    Ssl2(#[from] openssl::ssl::Error),
}

impl Error {
    /// Whether this error aborts the whole sync pass.
    ///
    /// A `Protocol` error fails the single command that provoked it; the
    /// pass only gives up if the failure recurs. Everything else is fatal
    /// to the pass, leaving the summary and seen log at their last
    /// checkpoint.
    pub fn is_pass_fatal(&self) -> bool {
        !matches!(self, Error::Protocol(..) | Error::NotFound(..))
    }
}
