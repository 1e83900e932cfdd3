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

//! Popsync is the network-facing half of a disconnected mail client: it
//! talks to a remote mailbox over a cancellable blocking stream, reconciles
//! a durable on-disk summary against the server's message list, and runs
//! all of that on a per-account worker thread with selective cancellation.
//!
//! The wire protocol itself (command encoding, reply parsing) is not
//! implemented here; it is consumed through the [`protocol::ProtocolEngine`]
//! trait so that the same reconciliation machinery works over POP3 today
//! and other list+retrieve protocols later.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod account;
pub mod net;
pub mod protocol;
pub mod queue;
pub mod store;
pub mod support;
pub mod sync;
