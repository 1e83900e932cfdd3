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

//! The contract between the sync engine and the wire-protocol engine.
//!
//! The engine itself is a collaborator, not part of this crate: it owns
//! the command pipeline (submission returns a handle; the caller iterates
//! the connection until the handle is quiescent, with cancellation
//! surfacing as a distinguished error from the iterator). What the sync
//! engine needs from it is captured by [`ProtocolEngine`]: listings,
//! line-streamed fetches, deletion, and reconnection.
//!
//! Reconnection is the only way to cut a transfer short. POP3 has no
//! abort-command primitive, so when a [`FetchSink`] answers
//! [`SinkVerdict::Stop`] mid-stream the engine's connection is left with
//! the remainder of the response in flight; the caller must invoke
//! [`ProtocolEngine::reconnect`] before issuing further commands.

use crate::store::model::SeqId;
use crate::support::cancellation::CancellationToken;
use crate::support::error::Error;

bitflags::bitflags! {
    /// Optional capabilities the server advertises.
    pub struct Capa: u32 {
        /// Stable server-assigned UIDs are available.
        const UIDL = 1 << 0;
        /// Header-only fetches are available.
        const TOP = 1 << 1;
        /// Multiple commands may be submitted before reading replies.
        const PIPELINING = 1 << 2;
    }
}

/// One line of a `LIST` response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub sequence_id: SeqId,
    pub size: u32,
}

/// How much of a message to retrieve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchKind {
    /// The entire message (`RETR`).
    Full,
    /// The header block only (`TOP n 0`); engines lacking
    /// [`Capa::TOP`] must refuse this with [`Error::Unsupported`].
    Headers,
}

/// A sink's answer to each delivered line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkVerdict {
    Continue,
    /// Stop delivering lines. The transfer is abandoned, not completed;
    /// see the module docs regarding `reconnect`.
    Stop,
}

/// Receives a fetched message line by line.
///
/// Lines are delivered unstuffed and without their CRLF terminator. The
/// header/body separator arrives as an empty line.
pub trait FetchSink {
    fn line(&mut self, line: &[u8]) -> Result<SinkVerdict, Error>;
}

/// The wire-protocol engine as seen by the sync engine.
pub trait ProtocolEngine {
    fn capabilities(&self) -> Capa;

    /// Sequence ids and sizes of every message in the maildrop.
    fn list(
        &mut self,
        token: &CancellationToken,
    ) -> Result<Vec<ListEntry>, Error>;

    /// Sequence id to UID mapping; requires [`Capa::UIDL`].
    ///
    /// Engines supporting [`Capa::PIPELINING`] submit this alongside the
    /// `LIST`, so calling `list` then `uid_list` back to back costs one
    /// round trip.
    fn uid_list(
        &mut self,
        token: &CancellationToken,
    ) -> Result<Vec<(SeqId, String)>, Error>;

    /// Stream message `seq` into `sink`.
    ///
    /// Returns `Ok` both on normal completion and after the sink stops
    /// the transfer; the sink knows which of the two happened.
    fn fetch(
        &mut self,
        seq: SeqId,
        kind: FetchKind,
        sink: &mut dyn FetchSink,
        token: &CancellationToken,
    ) -> Result<(), Error>;

    /// Mark message `seq` deleted (`DELE`); takes effect at `QUIT`.
    fn delete(
        &mut self,
        seq: SeqId,
        token: &CancellationToken,
    ) -> Result<(), Error>;

    /// Tear the connection down and establish a fresh one.
    fn reconnect(&mut self, token: &CancellationToken) -> Result<(), Error>;
}

/// Collect every delivered line, never stopping the transfer.
///
/// The workhorse sink for header probes and small fetches.
#[derive(Default)]
pub struct CollectSink {
    pub lines: Vec<Vec<u8>>,
}

impl FetchSink for CollectSink {
    fn line(&mut self, line: &[u8]) -> Result<SinkVerdict, Error> {
        self.lines.push(line.to_owned());
        Ok(SinkVerdict::Continue)
    }
}
