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

/// Determine whether a UID may be used verbatim as a file name.
///
/// Server-assigned UIDLs are usually plain printable tokens, but
/// synthesized UIDs are base64 and may contain `/`, and nothing stops a
/// hostile server from handing back `../../something`. Unsafe names are
/// escaped rather than rejected (a message we cannot cache is worse than
/// one with an ugly cache file name).
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().next() != Some('.')
        && name.find('/').is_none()
        && name.find('\\').is_none()
        && name.find('%').is_none()
        && name.find(|c| c < ' ' || c == '\x7F').is_none()
        && name.len() <= 200
}

/// Map an arbitrary UID to a safe file name, percent-escaping anything
/// `is_safe_name` objects to.
///
/// The mapping is injective, so distinct UIDs never collide on disk.
pub fn escape_name(name: &str) -> String {
    if is_safe_name(name) {
        return name.to_owned();
    }

    let mut out = String::with_capacity(name.len() + 8);
    for (ix, b) in name.bytes().enumerate() {
        let safe = match b {
            b'/' | b'\\' | b'%' | 0..=0x1F | 0x7F.. => false,
            b'.' => ix != 0,
            _ => true,
        };

        if safe {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }

        // Bound the name length even for pathological UIDs
        if out.len() >= 200 {
            break;
        }
    }

    if out.is_empty() {
        out.push_str("%00");
    }

    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_is_safe_name() {
        assert!(is_safe_name("UID1234"));
        assert!(is_safe_name("abc-def_ghi"));
        assert!(is_safe_name("foo.bar"));
        assert!(!is_safe_name(""));
        assert!(!is_safe_name("."));
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name(".hidden"));
        assert!(!is_safe_name("a/b"));
        assert!(!is_safe_name("a\\b"));
        assert!(!is_safe_name("a%b"));
        assert!(!is_safe_name("a\0b"));
    }

    #[test]
    fn test_escape_name() {
        assert_eq!("UID1234", escape_name("UID1234"));
        assert_eq!("a%2Fb", escape_name("a/b"));
        // Only the leading dot is unsafe; "%2E." cannot collide with a
        // literal "%2E." because "%" itself is always escaped
        assert_eq!("%2E.", escape_name(".."));
        assert_eq!("%2Ehidden", escape_name(".hidden"));
        // base64 UID with slashes survives injectively
        assert_eq!("ab%2Fcd+==", escape_name("ab/cd+=="));

        assert_ne!(escape_name("a/b"), escape_name("a%2Fb"));
    }
}
