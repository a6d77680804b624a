// SPDX-License-Identifier: MIT

//! Byte-level search helpers for the framing parsers.
//!
//! All searches are bounded by explicit `start..end` offsets and never look
//! past `end`. Matching is literal and the first occurrence wins.

/// Literal substring search over raw bytes.
///
/// Implementations must report the same match a forward byte-at-a-time scan
/// would: the lowest offset `>= start` where the whole needle fits before `end`.
pub trait Finder {
    fn find(&self, haystack: &[u8], needle: &[u8], start: usize, end: usize) -> Option<usize>;
}

/// Straight linear scan, one candidate offset at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearFinder;

impl Finder for LinearFinder {
    fn find(&self, haystack: &[u8], needle: &[u8], start: usize, end: usize) -> Option<usize> {
        let end = end.min(haystack.len());
        if needle.is_empty() || start > end || end - start < needle.len() {
            return None;
        }

        let first = needle[0];
        (start..=end - needle.len())
            .find(|&i| haystack[i] == first && &haystack[i..i + needle.len()] == needle)
    }
}

/// First `\r` or `\n` in `start..end`.
pub fn find_line_end(haystack: &[u8], start: usize, end: usize) -> Option<usize> {
    let end = end.min(haystack.len());
    if start >= end {
        return None;
    }
    haystack[start..end]
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .map(|pos| start + pos)
}

/// ASCII case-insensitive containment check restricted to `start..end`.
pub fn contains_ignore_ascii_case(
    haystack: &[u8],
    needle: &[u8],
    start: usize,
    end: usize,
) -> bool {
    let end = end.min(haystack.len());
    if needle.is_empty() {
        return true;
    }
    if start > end || end - start < needle.len() {
        return false;
    }
    haystack[start..end]
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}
