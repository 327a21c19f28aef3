//! HTTP byte-range negotiation.

use axum::http::HeaderValue;

pub const HEADER_BYTE_RANGE: &str = "Range";

/// A syntactically valid `bytes=` specification, not yet checked against
/// any resource length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start_inclusive: Option<u64>,
    end_inclusive: Option<u64>,
}

impl ByteRange {
    pub fn new(start_inclusive: Option<u64>, end_inclusive: Option<u64>) -> ByteRange {
        ByteRange {
            start_inclusive,
            end_inclusive,
        }
    }

    /// Single-range `bytes=a-b`, `bytes=a-` or `bytes=-n`. Multi-range
    /// requests and anything unparsable yield `None`.
    pub fn parse<S: AsRef<str>>(s: S) -> Option<ByteRange> {
        let v = s.as_ref().trim();
        let v = v.strip_prefix("bytes=")?;
        if v.contains(',') {
            return None;
        }

        let (start, end) = v.split_once('-')?;
        let start = parse_bound(start)?;
        let end = parse_bound(end)?;
        if start.is_none() && end.is_none() {
            return None;
        }

        Some(ByteRange {
            start_inclusive: start,
            end_inclusive: end,
        })
    }

    /// Pins this range to a resource of `total_length` bytes.
    pub fn resolve(&self, total_length: u64) -> Option<ResolvedRange> {
        if total_length == 0 {
            return None;
        }
        let last = total_length - 1;
        let (start, end) = match (self.start_inclusive, self.end_inclusive) {
            (Some(start), Some(end)) => (start, end),
            (Some(start), None) => (start, last),
            (None, Some(suffix)) => {
                if suffix == 0 || suffix > total_length {
                    return None;
                }
                (total_length - suffix, last)
            }
            (None, None) => return None,
        };
        if start > end || end > last {
            return None;
        }
        Some(ResolvedRange {
            start,
            end,
            length: end - start + 1,
        })
    }

    /// The value to forward upstream, when the length is not known locally.
    pub fn header_value(&self) -> Option<HeaderValue> {
        let s = match (self.start_inclusive, self.end_inclusive) {
            (Some(start), Some(end)) => format!("bytes={}-{}", start, end),
            (Some(start), None) => format!("bytes={}-", start),
            (None, Some(suffix)) => format!("bytes=-{}", suffix),
            (None, None) => return None,
        };
        HeaderValue::from_str(&s).ok()
    }
}

// Empty bound is `Some(None)`, garbage is `None`.
fn parse_bound(s: &str) -> Option<Option<u64>> {
    let s = s.trim();
    if s.is_empty() {
        return Some(None);
    }
    s.parse::<u64>().ok().map(Some)
}

/// A range inside `[0, total)`. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
    pub length: u64,
}

impl ResolvedRange {
    pub fn content_range(&self, total_length: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_length)
    }
}

/// Returns `None` (serve the full resource) when the header is absent,
/// malformed or out of bounds.
pub fn parse_range_request(range_header: Option<&str>, total_length: u64) -> Option<ResolvedRange> {
    ByteRange::parse(range_header?)?.resolve(total_length)
}

/// Parses a `Content-Range: bytes a-b/total` response header. The total is
/// `None` when the upstream sends `*`.
pub fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let v = value.trim().strip_prefix("bytes ")?;
    let (span, total) = v.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let start = start.trim().parse::<u64>().ok()?;
    let end = end.trim().parse::<u64>().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().ok()?),
    };
    Some((start, end, total))
}
