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

//! The message body cache.
//!
//! Entries are written journal-free: the first byte of each entry file is
//! a sentinel, `*` while the download is in flight and rewritten to `#`
//! only once the entry is complete. A crash or cancellation at any point
//! leaves `*`, and every reader treats a non-`#` first byte as "absent",
//! deleting the torn file on sight. There is nothing to replay and
//! nothing to fsck.
//!
//! Flags and the partial-download bit live in a sidecar metadata file
//! that deliberately outlives the blob itself, so evicting a body does
//! not forget that the user flagged the message.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::warn;

use super::codec;
use super::model::{MessageFlags, Uid};
use crate::support::error::Error;
use crate::support::file_ops::{self, IgnoreKinds};
use crate::support::safe_name::escape_name;

const SENTINEL_WRITING: u8 = b'*';
const SENTINEL_COMMITTED: u8 = b'#';

/// An in-flight cache write.
///
/// Bytes are streamed in through `Write`; nothing becomes visible to
/// readers until `commit`. Dropping the writer without committing leaves
/// the entry torn, which readers treat as absent.
pub trait CacheWriter: Write {
    fn commit(self: Box<Self>) -> Result<(), Error>;
}

/// Store of message bodies keyed by UID.
pub trait BlobCache {
    /// Whether a committed entry exists. Torn entries report false.
    fn exists(&self, uid: &Uid) -> bool;

    /// Open a committed entry for reading, positioned after the sentinel.
    ///
    /// A torn entry is deleted and reported as `None`.
    fn open(&self, uid: &Uid) -> Result<Option<Box<dyn Read>>, Error>;

    fn begin_write(&mut self, uid: &Uid)
        -> Result<Box<dyn CacheWriter>, Error>;

    /// Evict the entry's body. The metadata mirror is retained.
    fn remove(&mut self, uid: &Uid) -> Result<(), Error>;

    fn is_partial(&self, uid: &Uid) -> Result<bool, Error>;
    fn set_partial(&mut self, uid: &Uid, partial: bool) -> Result<(), Error>;

    fn flags(&self, uid: &Uid) -> Result<MessageFlags, Error>;
    fn set_flags(
        &mut self,
        uid: &Uid,
        flags: MessageFlags,
    ) -> Result<(), Error>;
}

/// The on-disk cache: one file per UID under `data/`, metadata under
/// `meta/`, names sanitized so hostile UIDs cannot escape the directory.
pub struct DiskBlobCache {
    data_dir: PathBuf,
    meta_dir: PathBuf,
}

impl DiskBlobCache {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, Error> {
        let data_dir = root.as_ref().join("data");
        let meta_dir = root.as_ref().join("meta");
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&meta_dir)?;

        Ok(DiskBlobCache { data_dir, meta_dir })
    }

    fn data_path(&self, uid: &Uid) -> PathBuf {
        self.data_dir.join(escape_name(uid.as_str()))
    }

    fn meta_path(&self, uid: &Uid) -> PathBuf {
        self.meta_dir.join(escape_name(uid.as_str()))
    }

    fn read_meta(&self, uid: &Uid) -> Result<Meta, Error> {
        let data = match fs::read(self.meta_path(uid))
            .map(Some)
            .ignore_not_found()?
        {
            Some(data) => data,
            None => return Ok(Meta::default()),
        };

        let mut r = io::Cursor::new(&data);
        let flags =
            MessageFlags::from_bits_truncate(codec::read_u32(&mut r)?);
        let partial = 0 != codec::read_u32(&mut r)?;
        Ok(Meta { flags, partial })
    }

    fn write_meta(&self, uid: &Uid, meta: &Meta) -> Result<(), Error> {
        let mut data = Vec::with_capacity(8);
        codec::write_u32(&mut data, meta.flags.bits())?;
        codec::write_u32(&mut data, meta.partial as u32)?;
        file_ops::spit(&self.meta_dir, self.meta_path(uid), 0o600, &data)?;
        Ok(())
    }

    fn delete_torn(&self, uid: &Uid, path: &Path) {
        warn!("Deleting torn cache entry for {}", uid);
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to delete torn cache entry {:?}: {}", path, e);
        }
    }
}

#[derive(Default)]
struct Meta {
    flags: MessageFlags,
    partial: bool,
}

impl BlobCache for DiskBlobCache {
    fn exists(&self, uid: &Uid) -> bool {
        let mut sentinel = [0u8; 1];
        match fs::File::open(self.data_path(uid))
            .and_then(|mut f| f.read_exact(&mut sentinel))
        {
            Ok(()) => SENTINEL_COMMITTED == sentinel[0],
            Err(_) => false,
        }
    }

    fn open(&self, uid: &Uid) -> Result<Option<Box<dyn Read>>, Error> {
        let path = self.data_path(uid);
        let mut f = match fs::File::open(&path).map(Some).ignore_not_found()?
        {
            Some(f) => f,
            None => return Ok(None),
        };

        let mut sentinel = [0u8; 1];
        match f.read_exact(&mut sentinel) {
            Ok(()) if SENTINEL_COMMITTED == sentinel[0] => {
                Ok(Some(Box::new(f)))
            }
            // Empty or torn both mean a write never completed
            Ok(()) | Err(_) => {
                self.delete_torn(uid, &path);
                Ok(None)
            }
        }
    }

    fn begin_write(
        &mut self,
        uid: &Uid,
    ) -> Result<Box<dyn CacheWriter>, Error> {
        let path = self.data_path(uid);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file_ops::chmod(&path, 0o600)?;
        file.write_all(&[SENTINEL_WRITING])?;

        Ok(Box::new(DiskCacheWriter { file }))
    }

    fn remove(&mut self, uid: &Uid) -> Result<(), Error> {
        fs::remove_file(self.data_path(uid)).ignore_not_found()?;
        Ok(())
    }

    fn is_partial(&self, uid: &Uid) -> Result<bool, Error> {
        Ok(self.read_meta(uid)?.partial)
    }

    fn set_partial(&mut self, uid: &Uid, partial: bool) -> Result<(), Error> {
        let mut meta = self.read_meta(uid)?;
        meta.partial = partial;
        self.write_meta(uid, &meta)
    }

    fn flags(&self, uid: &Uid) -> Result<MessageFlags, Error> {
        Ok(self.read_meta(uid)?.flags)
    }

    fn set_flags(
        &mut self,
        uid: &Uid,
        flags: MessageFlags,
    ) -> Result<(), Error> {
        let mut meta = self.read_meta(uid)?;
        meta.flags = flags;
        self.write_meta(uid, &meta)
    }
}

struct DiskCacheWriter {
    file: fs::File,
}

impl Write for DiskCacheWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl CacheWriter for DiskCacheWriter {
    fn commit(mut self: Box<Self>) -> Result<(), Error> {
        // Data must be durable before the sentinel says it is
        self.file.flush()?;
        self.file.sync_all()?;

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&[SENTINEL_COMMITTED])?;
        self.file.sync_all()?;
        Ok(())
    }
}
