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

use std::fmt;

/// A message's stable identifier: the server's UIDL token, or a
/// base64-encoded header hash when the server offers none.
///
/// Opaque text; never ordered, never parsed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Uid(pub String);

impl Uid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Uid {
    fn from(s: &str) -> Self {
        Uid(s.to_owned())
    }
}

/// A message's position in the maildrop for the current connection.
///
/// 1-based, and only meaningful until the next reconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeqId(pub u32);

bitflags::bitflags! {
    /// Per-message flags, bit-compatible with the summary file's
    /// historical on-disk values.
    #[derive(Default)]
    pub struct MessageFlags: u32 {
        const ANSWERED = 1 << 0;
        const DELETED = 1 << 1;
        const DRAFT = 1 << 2;
        const FLAGGED = 1 << 3;
        const SEEN = 1 << 4;
        const ATTACHMENTS = 1 << 5;
        const JUNK = 1 << 7;
    }
}

/// One message's entry in the summary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    pub uid: Uid,
    pub sequence_id: SeqId,
    pub size: u32,
    pub flags: MessageFlags,
    pub has_attachments: bool,
}

/// Aggregate counts maintained incrementally by the summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub saved: u32,
    pub unread: u32,
    pub deleted: u32,
    pub junk: u32,
}

/// UIDs added and removed since the last notification, delivered to
/// account observers in batches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<Uid>,
    pub removed: Vec<Uid>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    /// Move the accumulated changes out, leaving this set empty.
    pub fn take(&mut self) -> ChangeSet {
        std::mem::take(self)
    }
}
