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

//! Cancellable blocking I/O over plain and TLS streams.
//!
//! Every blocking read or write in this crate goes through one of these
//! wrappers, which race stream readiness against the worker's
//! [`CancellationToken`](crate::support::cancellation::CancellationToken)
//! wake channel and a bounded timeout. The three failure modes are kept
//! distinct: `TimedOut`, `Cancelled`, and `Io`.

pub mod stream;
pub mod tls;

pub use stream::CancellableStream;
pub use tls::{TlsContext, TlsStream};

/// A connected client stream, plain or TLS, ready to hand to a protocol
/// engine implementation.
pub enum ClientIo {
    Plain(CancellableStream<std::net::TcpStream>),
    Tls(TlsStream),
}
