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

//! Retrieving one message body into the cache.
//!
//! The transfer streams straight into a cache writer behind the `*`
//! sentinel; only a clean finish commits the entry. Failure at any point
//! (wire error, cancellation, crash) leaves the torn entry to be
//! collected by the next reader, so there is no journal and no cleanup
//! pass.
//!
//! A partial retrieval stops at the message's first MIME part: the
//! top-level boundary is parsed out of the `Content-Type` header as the
//! lines stream past, and the transfer is cut short at the boundary's
//! second occurrence. Cutting short abandons the rest of the response on
//! the wire, which costs a reconnect; worth it for a cell link and a
//! 50 MiB message with a ringtone's worth of useful text.

use std::io::Write;

use log::debug;

use crate::protocol::{FetchKind, FetchSink, ProtocolEngine, SinkVerdict};
use crate::store::blob_cache::{BlobCache, CacheWriter};
use crate::store::model::{SeqId, Uid};
use crate::support::cancellation::CancellationToken;
use crate::support::error::Error;

/// How much of a message the caller wants materialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completeness {
    Full,
    /// The first MIME part only; non-multipart messages are fetched
    /// whole.
    Partial,
}

#[derive(Debug, PartialEq, Eq)]
pub struct FetchOutcome {
    pub bytes: u64,
    pub partial: bool,
}

/// Download message `seq` into the cache entry for `uid`.
///
/// On success the entry is committed and its partial bit reflects
/// whether the transfer was cut short. On error the entry is left torn
/// and invisible.
pub fn fetch_message(
    engine: &mut dyn ProtocolEngine,
    cache: &mut dyn BlobCache,
    uid: &Uid,
    seq: SeqId,
    completeness: Completeness,
    token: &CancellationToken,
) -> Result<FetchOutcome, Error> {
    debug!("Fetching {} (seq {}, {:?})", uid, seq.0, completeness);

    let mut writer = cache.begin_write(uid)?;
    let (bytes, stopped) = {
        let mut sink = BodySink {
            out: &mut *writer,
            bytes: 0,
            boundary_scan: match completeness {
                Completeness::Full => None,
                Completeness::Partial => Some(BoundaryScan::new()),
            },
            stopped: false,
        };
        engine.fetch(seq, FetchKind::Full, &mut sink, token)?;
        (sink.bytes, sink.stopped)
    };

    writer.commit()?;
    cache.set_partial(uid, stopped)?;

    if stopped {
        // The rest of the response is still in flight on the old
        // connection; nothing else can be pipelined until it is gone.
        engine.reconnect(token)?;
    }

    Ok(FetchOutcome {
        bytes,
        partial: stopped,
    })
}

/// Make sure the cache holds a usable entry for `uid`, fetching if
/// needed. Returns whether a fetch happened.
///
/// Without `strict`, any committed entry satisfies the request. With
/// `strict`, an entry whose completeness differs from the requested one
/// (in either direction) is deleted and re-fetched.
pub fn ensure_message(
    engine: &mut dyn ProtocolEngine,
    cache: &mut dyn BlobCache,
    uid: &Uid,
    seq: SeqId,
    completeness: Completeness,
    strict: bool,
    token: &CancellationToken,
) -> Result<bool, Error> {
    if cache.exists(uid) {
        if !strict {
            return Ok(false);
        }

        let is_partial = cache.is_partial(uid)?;
        if is_partial == (Completeness::Partial == completeness) {
            return Ok(false);
        }

        debug!(
            "Cached {} is {}, want {:?}; re-fetching",
            uid,
            if is_partial { "partial" } else { "full" },
            completeness
        );
        cache.remove(uid)?;
    }

    fetch_message(engine, cache, uid, seq, completeness, token)?;
    Ok(true)
}

struct BodySink<'a> {
    out: &'a mut dyn CacheWriter,
    bytes: u64,
    boundary_scan: Option<BoundaryScan>,
    stopped: bool,
}

impl<'a> FetchSink for BodySink<'a> {
    fn line(&mut self, line: &[u8]) -> Result<SinkVerdict, Error> {
        if let Some(ref mut scan) = self.boundary_scan {
            if BoundaryHit::Second == scan.observe(line) {
                // Close the truncated multipart instead of writing the
                // second boundary, so what remains is well-formed
                let mut closing = scan.boundary_line().to_owned();
                closing.extend_from_slice(b"--\r\n");
                self.out.write_all(&closing)?;
                self.bytes += closing.len() as u64;
                self.stopped = true;
                return Ok(SinkVerdict::Stop);
            }
        }

        self.out.write_all(line)?;
        self.out.write_all(b"\r\n")?;
        self.bytes += line.len() as u64 + 2;
        Ok(SinkVerdict::Continue)
    }
}

#[derive(PartialEq, Eq)]
enum BoundaryHit {
    None,
    Second,
}

/// Streaming scan for the top-level multipart boundary.
struct BoundaryScan {
    in_headers: bool,
    collecting_content_type: bool,
    content_type: Vec<u8>,
    boundary_line: Option<Vec<u8>>,
    occurrences: u32,
}

impl BoundaryScan {
    fn new() -> Self {
        BoundaryScan {
            in_headers: true,
            collecting_content_type: false,
            content_type: Vec::new(),
            boundary_line: None,
            occurrences: 0,
        }
    }

    fn boundary_line(&self) -> &[u8] {
        self.boundary_line.as_deref().unwrap_or(b"")
    }

    fn observe(&mut self, line: &[u8]) -> BoundaryHit {
        if self.in_headers {
            if line.is_empty() {
                self.in_headers = false;
                self.boundary_line = parse_boundary(&self.content_type)
                    .map(|b| {
                        let mut l = b"--".to_vec();
                        l.extend_from_slice(&b);
                        l
                    });
            } else if line.len() >= 13
                && line[..13].eq_ignore_ascii_case(b"content-type:")
            {
                self.collecting_content_type = true;
                self.content_type.extend_from_slice(&line[13..]);
            } else if self.collecting_content_type
                && (line[0] == b' ' || line[0] == b'\t')
            {
                self.content_type.extend_from_slice(line);
            } else {
                self.collecting_content_type = false;
            }

            return BoundaryHit::None;
        }

        if let Some(ref boundary) = self.boundary_line {
            if line == &boundary[..] {
                self.occurrences += 1;
                if self.occurrences >= 2 {
                    return BoundaryHit::Second;
                }
            }
        }

        BoundaryHit::None
    }
}

/// Extract the `boundary` parameter from a `Content-Type` header value.
fn parse_boundary(value: &[u8]) -> Option<Vec<u8>> {
    let lower: Vec<u8> = value.iter().map(u8::to_ascii_lowercase).collect();
    let ix = find_subslice(&lower, b"boundary=")?;

    let rest = &value[ix + b"boundary=".len()..];
    if rest.first() == Some(&b'"') {
        let end = memchr::memchr(b'"', &rest[1..])?;
        Some(rest[1..1 + end].to_owned())
    } else {
        let end = rest
            .iter()
            .position(|&b| b == b';' || b == b' ' || b == b'\t')
            .unwrap_or_else(|| rest.len());
        if 0 == end {
            None
        } else {
            Some(rest[..end].to_owned())
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
