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

use openssl::hash::{Hasher, MessageDigest};

use crate::store::model::Uid;
use crate::support::error::Error;

/// Synthesize a stable UID for a server that does not assign them, by
/// hashing the message's header block.
///
/// Every header's name and value feed an MD5 digest, except `Status` and
/// `X-Status`, which some servers rewrite as the message is read and
/// which would otherwise change the identity of an unchanged message.
/// Headers a relay *adds* (another `Received` line, say) still change
/// the hash; such a message is simply treated as new, which costs a
/// duplicate fetch, not mail. The digest is base64-encoded, so
/// synthesized UIDs can contain `/` and `+`.
///
/// MD5 is an identity fingerprint here, not a security boundary.
pub fn synthesize_uid(header_lines: &[Vec<u8>]) -> Result<Uid, Error> {
    let mut hasher = Hasher::new(MessageDigest::md5())?;

    for (name, value) in parse_headers(header_lines) {
        if name.eq_ignore_ascii_case(b"Status")
            || name.eq_ignore_ascii_case(b"X-Status")
        {
            continue;
        }

        hasher.update(name)?;
        hasher.update(&value)?;
    }

    let digest = hasher.finish()?;
    Ok(Uid(base64::encode(&digest)))
}

/// Split raw header lines into (name, value) pairs, gluing folded
/// continuation lines onto the preceding header.
fn parse_headers(lines: &[Vec<u8>]) -> Vec<(&[u8], Vec<u8>)> {
    let mut headers: Vec<(&[u8], Vec<u8>)> = Vec::new();

    for line in lines {
        if line.is_empty() {
            break;
        }

        if line[0] == b' ' || line[0] == b'\t' {
            if let Some(last) = headers.last_mut() {
                last.1.extend_from_slice(line);
            }
            continue;
        }

        match memchr::memchr(b':', line) {
            Some(colon) => headers
                .push((&line[..colon], line[colon + 1..].to_owned())),
            // Not a header at all; charge it to the hash as a value so
            // distinct garbage still yields distinct UIDs
            None => headers.push((&[], line.clone())),
        }
    }

    headers
}

#[cfg(test)]
mod test {
    use super::*;

    fn lines(text: &str) -> Vec<Vec<u8>> {
        text.lines().map(|l| l.as_bytes().to_owned()).collect()
    }

    #[test]
    fn deterministic() {
        let headers = lines("From: a@b\nSubject: hello");
        assert_eq!(
            synthesize_uid(&headers).unwrap(),
            synthesize_uid(&headers).unwrap()
        );
    }

    #[test]
    fn distinct_messages_get_distinct_uids() {
        let a = synthesize_uid(&lines("Subject: one")).unwrap();
        let b = synthesize_uid(&lines("Subject: two")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn status_headers_are_ignored() {
        let without = lines("From: a@b\nSubject: hi");
        let with = lines("From: a@b\nStatus: RO\nX-Status: A\nSubject: hi");
        assert_eq!(
            synthesize_uid(&without).unwrap(),
            synthesize_uid(&with).unwrap()
        );
    }

    #[test]
    fn folded_headers_hash_like_their_content() {
        let folded = lines("Subject: a long\n\tfolded subject\nFrom: a@b");
        let reordered = lines("From: a@b\nSubject: a long\n\tfolded subject");
        // Order matters; folding does not erase the continuation
        assert_ne!(
            synthesize_uid(&folded).unwrap(),
            synthesize_uid(&reordered).unwrap()
        );
    }

    #[test]
    fn body_is_not_part_of_identity() {
        let a = lines("Subject: hi\n\nbody one");
        let b = lines("Subject: hi\n\ncompletely different body");
        assert_eq!(synthesize_uid(&a).unwrap(), synthesize_uid(&b).unwrap());
    }

    #[test]
    fn output_is_base64_of_md5() {
        let uid = synthesize_uid(&lines("Subject: hi")).unwrap();
        // 16 digest bytes encode to 24 base64 characters
        assert_eq!(24, uid.as_str().len());
        assert!(uid.as_str().ends_with("=="));
    }
}
