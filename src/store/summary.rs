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

//! The folder summary: one record per known message, checkpointed to a
//! single versioned binary file.
//!
//! The summary is authoritative for what the user sees between
//! connections. It is loaded whole on open, mutated only by the sync
//! engine, and written back whole at explicit checkpoints via an atomic
//! replace. `save` on a clean summary does nothing at all, so a sync pass
//! that changes nothing leaves the file byte-for-byte untouched.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use log::warn;

use super::codec;
use super::model::{Counts, MessageFlags, MessageRecord, SeqId, Uid};
use crate::support::error::Error;
use crate::support::file_ops;

/// Current file format version.
///
/// Versions 13 through 255 carry the aggregate count block in the header;
/// older files predate it and get their counts recomputed on load.
pub const SUMMARY_VERSION: u32 = 14;

const LEGACY_COUNTS_VERSION: u32 = 13;
const MAX_LEGACY_VERSION: u32 = 0xFF;

pub struct Summary {
    path: PathBuf,
    records: Vec<MessageRecord>,
    by_uid: HashMap<Uid, usize>,
    header_flags: u32,
    next_uid: u32,
    save_time: u32,
    counts: Counts,
    dirty: bool,
}

impl Summary {
    /// Open the summary at `path`, creating an empty one if the file does
    /// not exist.
    ///
    /// A file that exists but fails to load is discarded and recreated
    /// empty; the messages themselves are still on the server (or in the
    /// cache), so losing the summary costs a re-listing, not mail.
    pub fn open(path: impl Into<PathBuf>) -> Result<Summary, Error> {
        let path = path.into();
        let mut this = Summary {
            path,
            records: Vec::new(),
            by_uid: HashMap::new(),
            header_flags: 0,
            next_uid: 1,
            save_time: 0,
            counts: Counts::default(),
            dirty: false,
        };

        match fs::read(&this.path) {
            Ok(data) => {
                if let Err(e) = this.load(&data) {
                    warn!(
                        "Summary {:?} unreadable ({}), recreating empty",
                        this.path, e
                    );
                    this.clear();
                    this.save()?;
                }
            }
            Err(e) if std::io::ErrorKind::NotFound == e.kind() => {
                // First open; the file appears at the first checkpoint
                this.dirty = true;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(this)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.by_uid.contains_key(uid)
    }

    pub fn get(&self, uid: &Uid) -> Option<&MessageRecord> {
        self.by_uid.get(uid).map(|&ix| &self.records[ix])
    }

    /// Records in summary order.
    pub fn records(&self) -> impl Iterator<Item = &MessageRecord> {
        self.records.iter()
    }

    pub fn uids(&self) -> Vec<Uid> {
        self.records.iter().map(|r| r.uid.clone()).collect()
    }

    /// Append a record for a previously unknown UID.
    pub fn add(&mut self, record: MessageRecord) -> Result<(), Error> {
        if self.by_uid.contains_key(&record.uid) {
            return Err(Error::Protocol(format!(
                "duplicate UID in listing: {}",
                record.uid
            )));
        }

        self.count_in(record.flags);
        self.by_uid.insert(record.uid.clone(), self.records.len());
        self.records.push(record);
        self.next_uid = self.next_uid.wrapping_add(1).max(1);
        self.dirty = true;
        Ok(())
    }

    pub fn remove(&mut self, uid: &Uid) -> Option<MessageRecord> {
        let ix = self.by_uid.remove(uid)?;
        let record = self.records.remove(ix);
        for (_, other) in self.by_uid.iter_mut() {
            if *other > ix {
                *other -= 1;
            }
        }

        self.count_out(record.flags);
        self.dirty = true;
        Some(record)
    }

    /// Record the size reported by the latest listing; dirties the summary
    /// only if the size actually changed.
    pub fn update_size(&mut self, uid: &Uid, size: u32) {
        if let Some(&ix) = self.by_uid.get(uid) {
            if self.records[ix].size != size {
                self.records[ix].size = size;
                self.dirty = true;
            }
        }
    }

    /// Remap a record onto the sequence id the current connection assigned
    /// it. Sequence ids are connection-scoped, so this never dirties the
    /// summary on its own.
    pub fn update_sequence_id(&mut self, uid: &Uid, seq: SeqId) {
        if let Some(&ix) = self.by_uid.get(uid) {
            self.records[ix].sequence_id = seq;
        }
    }

    pub fn set_flags(&mut self, uid: &Uid, flags: MessageFlags) {
        if let Some(&ix) = self.by_uid.get(uid) {
            let old = self.records[ix].flags;
            if old != flags {
                self.count_out(old);
                self.count_in(flags);
                self.records[ix].flags = flags;
                self.records[ix].has_attachments =
                    flags.contains(MessageFlags::ATTACHMENTS);
                self.dirty = true;
            }
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.by_uid.clear();
        self.counts = Counts::default();
        self.next_uid = 1;
        self.dirty = true;
    }

    /// Checkpoint to disk; a no-op when nothing changed since the last
    /// save.
    pub fn save(&mut self) -> Result<(), Error> {
        if !self.dirty {
            return Ok(());
        }

        self.save_time = chrono::Utc::now().timestamp() as u32;

        let mut data = Vec::new();
        self.serialize(&mut data)?;

        let tmp_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        file_ops::spit(tmp_dir, &self.path, 0o600, &data)?;
        self.dirty = false;
        Ok(())
    }

    fn serialize(&self, out: &mut Vec<u8>) -> Result<(), Error> {
        codec::write_u32(out, SUMMARY_VERSION)?;
        codec::write_u32(out, self.header_flags)?;
        codec::write_u32(out, self.next_uid)?;
        codec::write_u32(out, self.save_time)?;
        codec::write_u32(out, self.records.len() as u32)?;
        codec::write_u32(out, self.counts.unread)?;
        codec::write_u32(out, self.counts.deleted)?;
        codec::write_u32(out, self.counts.junk)?;

        for record in &self.records {
            let mut flags = record.flags;
            flags.set(MessageFlags::ATTACHMENTS, record.has_attachments);

            codec::write_string(out, Some(record.uid.as_str()))?;
            codec::write_u32(out, record.sequence_id.0)?;
            codec::write_u32(out, record.size)?;
            codec::write_u32(out, flags.bits())?;
        }

        Ok(())
    }

    fn load(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut r = Cursor::new(data);

        let version = codec::read_u32(&mut r)?;
        if version > SUMMARY_VERSION {
            return Err(Error::CorruptSummary);
        }

        self.header_flags = codec::read_u32(&mut r)?;
        self.next_uid = codec::read_u32(&mut r)?;
        self.save_time = codec::read_u32(&mut r)?;
        let saved = codec::read_u32(&mut r)?;

        let has_counts =
            version >= LEGACY_COUNTS_VERSION && version <= MAX_LEGACY_VERSION;
        let mut counts = Counts {
            saved,
            ..Counts::default()
        };
        if has_counts {
            counts.unread = codec::read_u32(&mut r)?;
            counts.deleted = codec::read_u32(&mut r)?;
            counts.junk = codec::read_u32(&mut r)?;
        }

        let mut records = Vec::with_capacity(saved.min(65536) as usize);
        let mut by_uid = HashMap::new();
        for _ in 0..saved {
            let uid = Uid(codec::read_string(&mut r)?
                .ok_or(Error::CorruptSummary)?);
            let sequence_id = SeqId(codec::read_u32(&mut r)?);
            let size = codec::read_u32(&mut r)?;
            let flags = MessageFlags::from_bits_truncate(codec::read_u32(
                &mut r,
            )?);

            if by_uid.insert(uid.clone(), records.len()).is_some() {
                return Err(Error::CorruptSummary);
            }

            records.push(MessageRecord {
                uid,
                sequence_id,
                size,
                flags,
                has_attachments: flags.contains(MessageFlags::ATTACHMENTS),
            });
        }

        // Trailing garbage means the count lied
        let mut rest = [0u8; 1];
        if 0 != r.read(&mut rest)? {
            return Err(Error::CorruptSummary);
        }

        if !has_counts {
            counts = count_all(&records);
        }

        self.records = records;
        self.by_uid = by_uid;
        self.counts = counts;
        self.dirty = false;
        Ok(())
    }

    fn count_in(&mut self, flags: MessageFlags) {
        self.counts.saved += 1;
        if !flags.contains(MessageFlags::SEEN) {
            self.counts.unread += 1;
        }
        if flags.contains(MessageFlags::DELETED) {
            self.counts.deleted += 1;
        }
        if flags.contains(MessageFlags::JUNK) {
            self.counts.junk += 1;
        }
    }

    fn count_out(&mut self, flags: MessageFlags) {
        self.counts.saved -= 1;
        if !flags.contains(MessageFlags::SEEN) {
            self.counts.unread -= 1;
        }
        if flags.contains(MessageFlags::DELETED) {
            self.counts.deleted -= 1;
        }
        if flags.contains(MessageFlags::JUNK) {
            self.counts.junk -= 1;
        }
    }
}

fn count_all(records: &[MessageRecord]) -> Counts {
    let mut counts = Counts {
        saved: records.len() as u32,
        ..Counts::default()
    };
    for r in records {
        if !r.flags.contains(MessageFlags::SEEN) {
            counts.unread += 1;
        }
        if r.flags.contains(MessageFlags::DELETED) {
            counts.deleted += 1;
        }
        if r.flags.contains(MessageFlags::JUNK) {
            counts.junk += 1;
        }
    }

    counts
}
