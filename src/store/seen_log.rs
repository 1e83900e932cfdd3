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

use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use crate::store::model::Uid;
use crate::support::error::Error;
use crate::support::file_ops::IgnoreKinds;

/// The durable set of UIDs that have been fully materialized at least
/// once.
///
/// Backed by a newline-delimited append-only file. Registration writes
/// through to disk before updating the in-memory set, so a UID once
/// promised is never forgotten by a crash; the cost of the reverse
/// failure mode (a crash right after the append) is only a skipped
/// re-fetch.
///
/// The in-memory set exists only between `open` and `close`, bracketing a
/// sync pass. A lookup on a closed log scans the file, which keeps rare
/// out-of-pass queries honest without pinning the set in memory.
pub struct SeenLog {
    path: PathBuf,
    set: Option<HashSet<String>>,
}

impl SeenLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SeenLog {
            path: path.into(),
            set: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.set.is_some()
    }

    /// Load the set into memory. A missing file is an empty set.
    pub fn open(&mut self) -> Result<(), Error> {
        if self.set.is_some() {
            return Ok(());
        }

        let mut set = HashSet::new();
        match fs::File::open(&self.path) {
            Ok(f) => {
                for line in BufReader::new(f).lines() {
                    let line = line?;
                    if !line.is_empty() {
                        set.insert(line);
                    }
                }
            }
            Err(e) if std::io::ErrorKind::NotFound == e.kind() => (),
            Err(e) => return Err(e.into()),
        }

        self.set = Some(set);
        Ok(())
    }

    pub fn close(&mut self) {
        self.set = None;
    }

    /// Durably record `uid`. The append hits the file before the
    /// in-memory set is touched.
    pub fn register(&mut self, uid: &Uid) -> Result<(), Error> {
        // The format is line-delimited; a UID that could smuggle a
        // newline in would corrupt it.
        if uid.as_str().contains(|c| c == '\n' || c == '\r') {
            return Err(Error::UnsafeName);
        }

        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        f.write_all(uid.as_str().as_bytes())?;
        f.write_all(b"\n")?;

        if let Some(ref mut set) = self.set {
            set.insert(uid.as_str().to_owned());
        }

        Ok(())
    }

    pub fn contains(&self, uid: &Uid) -> Result<bool, Error> {
        match self.set {
            Some(ref set) => Ok(set.contains(uid.as_str())),
            None => self.scan_file(uid),
        }
    }

    fn scan_file(&self, uid: &Uid) -> Result<bool, Error> {
        let f = match fs::File::open(&self.path)
            .map(Some)
            .ignore_not_found()?
        {
            Some(f) => f,
            None => return Ok(false),
        };

        for line in BufReader::new(f).lines() {
            if line? == uid.as_str() {
                return Ok(true);
            }
        }

        Ok(false)
    }
}
