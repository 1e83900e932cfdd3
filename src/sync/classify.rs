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

/// Size above which a message is presumed to carry an attachment when
/// its headers are inconclusive.
const BIG_MESSAGE_BYTES: u32 = 100 * 1024;

/// Decides whether a message has attachments from its header block and
/// reported size, without fetching or parsing the body.
pub trait AttachmentClassifier {
    fn has_attachments(&self, header_lines: &[Vec<u8>], size: u32) -> bool;
}

/// The classic header-substring approximation.
///
/// Looks for an explicit attachment disposition, a dotted `filename=`
/// parameter, or an embedded rfc822 message; failing all of those, any
/// message over 100 KiB is presumed to have one. Wrong for pathological
/// messages in both directions, but it runs on a header probe alone,
/// which is the point.
pub struct HeuristicClassifier;

impl AttachmentClassifier for HeuristicClassifier {
    fn has_attachments(&self, header_lines: &[Vec<u8>], size: u32) -> bool {
        let mut text = String::new();
        for line in header_lines {
            text.push_str(&String::from_utf8_lossy(line).to_lowercase());
            text.push('\n');
        }

        if text.contains("content-disposition: attachment")
            || text.contains("content-type: message/rfc822")
        {
            return true;
        }

        for (ix, _) in text.match_indices("filename=") {
            let value = &text[ix + "filename=".len()..];
            let value_end = value
                .find(|c| c == ';' || c == '\n')
                .unwrap_or_else(|| value.len());
            if value[..value_end].contains('.') {
                return true;
            }
        }

        size > BIG_MESSAGE_BYTES
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lines(text: &str) -> Vec<Vec<u8>> {
        text.lines().map(|l| l.as_bytes().to_owned()).collect()
    }

    #[test]
    fn explicit_disposition_wins() {
        let headers = lines(
            "From: a@b\nContent-Disposition: attachment; filename=x",
        );
        assert!(HeuristicClassifier.has_attachments(&headers, 1));
    }

    #[test]
    fn dotted_filename_parameter() {
        let headers =
            lines("Content-Type: application/pdf; filename=report.pdf");
        assert!(HeuristicClassifier.has_attachments(&headers, 1));

        // A filename without an extension is not conclusive
        let headers = lines("Content-Type: text/plain; filename=README");
        assert!(!HeuristicClassifier.has_attachments(&headers, 1));
    }

    #[test]
    fn embedded_message() {
        let headers = lines("Content-Type: message/rfc822");
        assert!(HeuristicClassifier.has_attachments(&headers, 1));
    }

    #[test]
    fn size_fallback() {
        let headers = lines("From: a@b\nSubject: plain");
        assert!(!HeuristicClassifier.has_attachments(&headers, 50 * 1024));
        assert!(HeuristicClassifier.has_attachments(&headers, 200 * 1024));
    }

    #[test]
    fn case_insensitive() {
        let headers = lines("CONTENT-DISPOSITION: ATTACHMENT");
        assert!(HeuristicClassifier.has_attachments(&headers, 1));
    }
}
