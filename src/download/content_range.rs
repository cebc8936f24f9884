//! Parsing of `Content-Range` response headers.

/// A satisfied `Content-Range: bytes first-last/total` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte served.
    pub first: u64,
    /// Last byte served (inclusive).
    pub last: u64,
    /// Complete resource length; `None` when the server sent `*`.
    pub total: Option<u64>,
}

impl ContentRange {
    /// Number of bytes the response body carries.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }

    /// Always false; a satisfied range holds at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Parses a satisfied byte range.
///
/// Returns `None` for other units, unsatisfied ranges (`bytes */1000`),
/// inverted bounds, or a `last` that lies beyond a known total.
#[must_use]
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim();
    let (unit, rest) = rest.split_once(char::is_whitespace)?;
    if !unit.eq_ignore_ascii_case("bytes") {
        return None;
    }

    let (span, total) = rest.trim_start().split_once('/')?;
    let (first, last) = span.trim().split_once('-')?;
    let first: u64 = first.trim().parse().ok()?;
    let last: u64 = last.trim().parse().ok()?;
    if first > last {
        return None;
    }

    let total = match total.trim() {
        "*" => None,
        digits => {
            let total: u64 = digits.parse().ok()?;
            if last >= total {
                return None;
            }
            Some(total)
        }
    };

    Some(ContentRange { first, last, total })
}
