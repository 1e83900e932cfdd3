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

//! The binary encoding shared by the summary and cache metadata files.
//!
//! All integers are fixed 4-byte big-endian. Strings are length-prefixed:
//! a `u32` length covering the content bytes plus a NUL terminator,
//! followed by the content, the NUL, and zero padding up to a 4-byte
//! boundary. A zero length denotes the absent string. The length is
//! capped at 64 KiB; anything longer is corrupt by definition.
//!
//! The format is an interop contract with existing summary files, so the
//! terminator and padding are not negotiable even though a Rust-only
//! design would have neither.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::support::error::Error;

pub const STRING_ALIGN: usize = 4;
pub const MAX_STRING: usize = 65536;

pub fn write_u32(w: &mut impl Write, v: u32) -> Result<(), Error> {
    w.write_u32::<BigEndian>(v)?;
    Ok(())
}

pub fn read_u32(r: &mut impl Read) -> Result<u32, Error> {
    Ok(r.read_u32::<BigEndian>()?)
}

fn padding_for(len: usize) -> usize {
    (STRING_ALIGN - len % STRING_ALIGN) % STRING_ALIGN
}

/// Write `s` with its length prefix, NUL terminator, and alignment
/// padding; `None` writes a bare zero length.
pub fn write_string(w: &mut impl Write, s: Option<&str>) -> Result<(), Error> {
    let s = match s {
        None => return write_u32(w, 0),
        Some(s) => s.as_bytes(),
    };

    // Truncation beats failure for a cache-grade file, but in practice
    // UIDs and header strings never approach the cap.
    let content_len = s.len().min(MAX_STRING - 1);
    let len = content_len + 1;

    write_u32(w, len as u32)?;
    w.write_all(&s[..content_len])?;

    let pad = [0u8; STRING_ALIGN];
    w.write_all(&pad[..1 + padding_for(len)])?;
    Ok(())
}

pub fn read_string(r: &mut impl Read) -> Result<Option<String>, Error> {
    let len = read_u32(r)? as usize;
    if 0 == len {
        return Ok(None);
    }
    if len > MAX_STRING {
        return Err(Error::CorruptSummary);
    }

    let mut buf = vec![0u8; len + padding_for(len)];
    r.read_exact(&mut buf)?;

    // Content runs up to the NUL at len - 1
    if buf[len - 1] != 0 {
        return Err(Error::CorruptSummary);
    }
    buf.truncate(len - 1);

    String::from_utf8(buf).map(Some).map_err(|_| Error::CorruptSummary)
}

/// Write exactly `width` bytes: the string's bytes, zero-padded, or
/// truncated at a character boundary if too long.
pub fn write_fixed_string(
    w: &mut impl Write,
    s: &str,
    width: usize,
) -> Result<(), Error> {
    let mut content = s.as_bytes();
    if content.len() > width {
        let mut end = width;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        content = &content[..end];
    }

    w.write_all(content)?;
    for _ in content.len()..width {
        w.write_all(&[0])?;
    }

    Ok(())
}

pub fn read_fixed_string(
    r: &mut impl Read,
    width: usize,
) -> Result<String, Error> {
    let mut buf = vec![0u8; width];
    r.read_exact(&mut buf)?;

    let content_len =
        memchr::memchr(0, &buf).unwrap_or(width);
    buf.truncate(content_len);

    String::from_utf8(buf).map_err(|_| Error::CorruptSummary)
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn absent_string_is_four_bytes() {
        let mut buf = Vec::new();
        write_string(&mut buf, None).unwrap();
        assert_eq!(vec![0, 0, 0, 0], buf);
        assert_eq!(None, read_string(&mut Cursor::new(&buf)).unwrap());
    }

    #[test]
    fn empty_string_is_distinct_from_absent() {
        let mut buf = Vec::new();
        write_string(&mut buf, Some("")).unwrap();
        // Length 1 (the NUL), padded out to the boundary
        assert_eq!(vec![0, 0, 0, 1, 0, 0, 0, 0], buf);
        assert_eq!(
            Some(String::new()),
            read_string(&mut Cursor::new(&buf)).unwrap()
        );
    }

    #[test]
    fn encoded_strings_are_aligned() {
        for s in &["a", "ab", "abc", "abcd", "abcde"] {
            let mut buf = Vec::new();
            write_string(&mut buf, Some(s)).unwrap();
            assert_eq!(
                0,
                buf.len() % STRING_ALIGN,
                "unaligned encoding for {:?}: {} bytes",
                s,
                buf.len()
            );
        }
    }

    #[test]
    fn oversized_length_is_corrupt() {
        let mut buf = Vec::new();
        write_u32(&mut buf, (MAX_STRING + 1) as u32).unwrap();
        assert_matches!(
            Err(Error::CorruptSummary),
            read_string(&mut Cursor::new(&buf))
        );
    }

    #[test]
    fn fixed_strings_truncate_on_char_boundaries() {
        let mut buf = Vec::new();
        // 'é' is two bytes; a naive cut at 3 would split it
        write_fixed_string(&mut buf, "aéé", 3).unwrap();
        assert_eq!(3, buf.len());
        assert_eq!(
            "aé",
            read_fixed_string(&mut Cursor::new(&buf), 3).unwrap()
        );
    }

    proptest! {
        #[test]
        fn u32_round_trip(v in any::<u32>()) {
            let mut buf = Vec::new();
            write_u32(&mut buf, v).unwrap();
            prop_assert_eq!(4, buf.len());
            prop_assert_eq!(v, read_u32(&mut Cursor::new(&buf)).unwrap());
        }

        #[test]
        fn string_round_trip(s in "\\PC{0,100}") {
            let mut buf = Vec::new();
            write_string(&mut buf, Some(&s)).unwrap();
            prop_assert_eq!(0, buf.len() % STRING_ALIGN);
            prop_assert_eq!(
                Some(s),
                read_string(&mut Cursor::new(&buf)).unwrap()
            );
        }

        #[test]
        fn fixed_string_round_trip(s in "[a-zA-Z0-9]{0,16}") {
            let mut buf = Vec::new();
            write_fixed_string(&mut buf, &s, 16).unwrap();
            prop_assert_eq!(16, buf.len());
            prop_assert_eq!(
                s,
                read_fixed_string(&mut Cursor::new(&buf), 16).unwrap()
            );
        }

        #[test]
        fn sequential_strings_decode_in_order(
            a in "[a-z]{0,40}", b in "[a-z]{0,40}",
        ) {
            let mut buf = Vec::new();
            write_string(&mut buf, Some(&a)).unwrap();
            write_string(&mut buf, None).unwrap();
            write_string(&mut buf, Some(&b)).unwrap();

            let mut cursor = Cursor::new(&buf);
            prop_assert_eq!(Some(a), read_string(&mut cursor).unwrap());
            prop_assert_eq!(None, read_string(&mut cursor).unwrap());
            prop_assert_eq!(Some(b), read_string(&mut cursor).unwrap());
        }
    }
}
