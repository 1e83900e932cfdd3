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

//! Miscellaneous functions for working with files.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Write `data` into the file at `path`, atomically.
///
/// The file is staged in `tmp` (which must be on the same filesystem as
/// `path`), synced, then renamed into place. This is how the summary and
/// anything else checkpoint-shaped gets to disk: a crash leaves either the
/// old file or the new one, never a torn mixture.
pub fn spit(
    tmp: impl AsRef<Path>,
    path: impl AsRef<Path>,
    mode: u32,
    data: &[u8],
) -> io::Result<()> {
    let mut tf = tempfile::NamedTempFile::new_in(tmp)?;
    tf.as_file_mut().write_all(data)?;
    chmod(tf.path(), mode)?;
    tf.as_file_mut().sync_all()?;
    tf.persist(path)?;
    Ok(())
}

pub fn chmod(path: impl AsRef<Path>, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

pub trait IgnoreKinds {
    fn ignore_not_found(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_not_found(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(R::default()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn spit_replaces_atomically() {
        let tmpdir = TempDir::new().unwrap();
        let target = tmpdir.path().join("summary.mmap");

        spit(tmpdir.path(), &target, 0o600, b"first").unwrap();
        assert_eq!(b"first".to_vec(), fs::read(&target).unwrap());

        spit(tmpdir.path(), &target, 0o600, b"second").unwrap();
        assert_eq!(b"second".to_vec(), fs::read(&target).unwrap());
    }

    #[test]
    fn ignore_not_found_passes_other_errors() {
        let nf: io::Result<()> =
            Err(io::Error::new(io::ErrorKind::NotFound, "nf"));
        assert!(nf.ignore_not_found().is_ok());

        let denied: io::Result<()> =
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "pd"));
        assert!(denied.ignore_not_found().is_err());
    }
}
