// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! authorized_keys line matching.
//!
//! A line has the shape
//!
//! ```text
//! [options ]algorithm base64-key[ info]
//! ```
//!
//! where `options` runs up to the first whitespace outside double quotes and
//! `info` (the usual key comment) is kept only when it consists of
//! characters from a conservative allow-list, since callers may export it
//! into a session environment.
//!
//! Matching is pure: the caller decides what to do with the options token
//! and reads the file through [`LineReader`], which caps line length.

use std::io::{self, BufRead};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use super::wire::PayloadReader;

/// Shortest line that can hold a key entry.
pub const MIN_LINE: usize = 10;

/// Longest accepted line.
pub const MAX_LINE: usize = 4200;

const KEY_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Result of matching one line against a candidate key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineMatch<'a> {
    /// The line authorizes the candidate key.
    Accepted {
        /// Raw options token, still to be parsed.
        options: Option<&'a [u8]>,
        /// Allow-listed info field following the key.
        info: Option<String>,
    },
    /// The line does not authorize the candidate key.
    Rejected,
}

impl LineMatch<'_> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, LineMatch::Accepted { .. })
    }
}

/// Match `line` (without its terminator) against key algorithm `algo` and
/// wire-format `key_blob`.
pub fn match_line<'a>(line: &'a [u8], algo: &str, key_blob: &[u8]) -> LineMatch<'a> {
    if line.len() < MIN_LINE || line.len() > MAX_LINE {
        tracing::trace!(length = line.len(), "Bad authorized_keys line length");
        return LineMatch::Rejected;
    }
    if line.contains(&0) {
        tracing::trace!("authorized_keys line contains a NUL byte");
        return LineMatch::Rejected;
    }

    let algo = algo.as_bytes();
    let mut options = None;
    let mut pos = 0;

    if !algorithm_at(line, pos, algo) {
        pos = skip_whitespace(line, pos);
        if line.get(pos) == Some(&b'#') {
            return LineMatch::Rejected;
        }

        if !algorithm_at(line, pos, algo) {
            let end = options_end(line, pos);
            if end == pos {
                return LineMatch::Rejected;
            }
            options = Some(&line[pos..end]);
            pos = skip_whitespace(line, end);

            if !algorithm_at(line, pos, algo) {
                return LineMatch::Rejected;
            }
        }
    }
    pos += algo.len();

    if line.get(pos) != Some(&b' ') {
        tracing::trace!("Space expected after key algorithm");
        return LineMatch::Rejected;
    }
    pos += 1;

    let key_end = line[pos..]
        .iter()
        .position(|&c| c == b' ')
        .map_or(line.len(), |i| pos + i);
    let key_field = &line[pos..key_end];

    let info = line
        .get(key_end + 1..)
        .and_then(|rest| allowed_info(rest.split(|&c| c == b' ').next().unwrap_or_default()));

    if !key_field_matches(key_field, algo, key_blob) {
        return LineMatch::Rejected;
    }

    LineMatch::Accepted { options, info }
}

/// The algorithm token must be followed by a space and some key material.
fn algorithm_at(line: &[u8], pos: usize, algo: &[u8]) -> bool {
    pos + algo.len() + 3 <= line.len() && line[pos..].starts_with(algo)
}

fn skip_whitespace(line: &[u8], mut pos: usize) -> usize {
    while matches!(line.get(pos), Some(b' ' | b'\t')) {
        pos += 1;
    }
    pos
}

/// End of the options token starting at `start`: the first space or tab
/// that is neither quoted nor escaped.
fn options_end(line: &[u8], start: usize) -> usize {
    let mut quoted = false;
    let mut escaped = false;

    for (i, &c) in line.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            b'\\' => escaped = true,
            b'"' => quoted = !quoted,
            b' ' | b'\t' if !quoted => return i,
            _ => {}
        }
    }
    line.len()
}

/// Keep the info field only if every character is allowed; one bad
/// character voids the whole field.
fn allowed_info(field: &[u8]) -> Option<String> {
    let allowed = |c: &u8| c.is_ascii_alphanumeric() || b".,_-+@".contains(c);
    if field.is_empty() || !field.iter().all(allowed) {
        if !field.is_empty() {
            tracing::trace!("Ignoring key info with special characters");
        }
        return None;
    }
    // All bytes are ASCII.
    Some(String::from_utf8_lossy(field).into_owned())
}

/// Decode the base64 key field and compare it with the candidate blob. The
/// blob's embedded algorithm name must equal the line's algorithm.
fn key_field_matches(field: &[u8], algo: &[u8], key_blob: &[u8]) -> bool {
    let decoded = match KEY_BASE64.decode(field) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::trace!(error = %e, "Bad base64 key in authorized_keys");
            return false;
        }
    };

    let embedded = PayloadReader::new(&decoded).get_string("key algorithm");
    if embedded.ok() != Some(algo) {
        tracing::trace!("Key algorithm in authorized_keys blob does not match");
        return false;
    }

    decoded == key_blob
}

/// Reads lines from an authorized_keys file with a hard length cap.
///
/// Lines end at `\n`, `\r\n` or a bare `\r`. Bytes past [`MAX_LINE`] are
/// dropped and the line is returned one byte over the limit, so the
/// matcher rejects it; the dropped tail never becomes a line of its own.
pub struct LineReader<R> {
    inner: R,
    skip_lf: bool,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            skip_lf: false,
        }
    }

    /// Read the next line into `line`, without its terminator. Returns
    /// `false` at end of input.
    pub fn read_line(&mut self, line: &mut Vec<u8>) -> io::Result<bool> {
        line.clear();

        if std::mem::take(&mut self.skip_lf) && self.fill_buf()?.first() == Some(&b'\n') {
            self.inner.consume(1);
        }

        let mut read_any = false;
        loop {
            let (consumed, terminator) = {
                let available = self.fill_buf()?;
                if available.is_empty() {
                    return Ok(read_any);
                }

                let room = (MAX_LINE + 1).saturating_sub(line.len());
                match available.iter().position(|&c| c == b'\n' || c == b'\r') {
                    Some(i) => {
                        line.extend_from_slice(&available[..i.min(room)]);
                        (i + 1, Some(available[i]))
                    }
                    None => {
                        line.extend_from_slice(&available[..available.len().min(room)]);
                        (available.len(), None)
                    }
                }
            };
            self.inner.consume(consumed);
            read_any = true;

            if let Some(terminator) = terminator {
                self.skip_lf = terminator == b'\r';
                return Ok(true);
            }
        }
    }

    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        loop {
            match self.inner.fill_buf() {
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.inner.fill_buf()
    }
}
