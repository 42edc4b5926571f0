//! RFC 7233 single-range parsing, shared by the artifact responder and the
//! on-demand streamer. Only a single `bytes=...` range is supported; multi-range
//! requests are rejected rather than served as `multipart/byteranges`.

/// A parsed `Range` header, before being checked against a known size. `end` is
/// `None` for an open-ended range (`bytes=5-`); `start` is `None` for a suffix
/// range (`bytes=-500`, "last 500 bytes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRange {
    pub start: Option<u64>,
    pub end_inclusive: Option<u64>,
}

/// A range resolved against a known total size: `[start, stop)`, `stop` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub stop: u64,
}

/// Parses a `Range` header value. Returns `None` if there is no such header (caller's
/// job to check), `Some(Err(()))` if the syntax is not a single recognized `bytes` range.
pub fn parse_raw(value: &str) -> Option<RawRange> {
    let spec = value.strip_prefix("bytes=")?;
    // Reject multi-range requests; only a single range is supported.
    if spec.contains(',') {
        return None;
    }
    let (start_str, end_str) = spec.split_once('-')?;
    let start = if start_str.is_empty() { None } else { start_str.parse().ok() };
    let end_inclusive = if end_str.is_empty() { None } else { end_str.parse().ok() };
    if start.is_none() && end_inclusive.is_none() {
        return None;
    }
    Some(RawRange { start, end_inclusive })
}

/// Resolves a parsed range against a known total size. `Err(())` means the range is
/// malformed or out of bounds and the caller should respond 416.
pub fn resolve(raw: RawRange, size: u64) -> Result<ResolvedRange, ()> {
    let (start, stop) = match (raw.start, raw.end_inclusive) {
        (Some(start), Some(end)) => (start, end.saturating_add(1)),
        (Some(start), None) => (start, size),
        (None, Some(suffix_len)) => {
            let start = size.saturating_sub(suffix_len);
            (start, size)
        }
        (None, None) => return Err(()),
    };
    if start >= size || start >= stop {
        return Err(());
    }
    Ok(ResolvedRange { start, stop: stop.min(size) })
}

#[test]
fn test_parse_simple_range() {
    assert_eq!(
        parse_raw("bytes=1-3"),
        Some(RawRange { start: Some(1), end_inclusive: Some(3) })
    );
}

#[test]
fn test_parse_open_ended_range() {
    assert_eq!(parse_raw("bytes=5-"), Some(RawRange { start: Some(5), end_inclusive: None }));
}

#[test]
fn test_parse_suffix_range() {
    assert_eq!(parse_raw("bytes=-500"), Some(RawRange { start: None, end_inclusive: Some(500) }));
}

#[test]
fn test_parse_rejects_multi_range() {
    assert_eq!(parse_raw("bytes=0-10,20-30"), None);
}

#[test]
fn test_resolve_within_bounds() {
    let raw = RawRange { start: Some(1), end_inclusive: Some(3) };
    assert_eq!(resolve(raw, 5).unwrap(), ResolvedRange { start: 1, stop: 4 });
}

#[test]
fn test_resolve_rejects_start_past_end() {
    let raw = RawRange { start: Some(10), end_inclusive: Some(20) };
    assert!(resolve(raw, 5).is_err());
}

#[test]
fn test_resolve_clamps_end_inclusive_beyond_size() {
    let raw = RawRange { start: Some(0), end_inclusive: Some(100) };
    assert_eq!(resolve(raw, 5).unwrap(), ResolvedRange { start: 0, stop: 5 });
}
