//! ASCII tag-bracket framing, as spoken by the original session protocol.
//!
//! Every frame other than the bare acknowledgement is wrapped in a pair of
//! brackets: `<TAG>...data...</TAG>`. The acknowledgement frame is the single
//! sentinel `<ACK>` with no closing tag. This module only knows how to wrap
//! and find these sentinels in a byte buffer; it has no opinion on what the
//! data between them means.

/// Session id exchange: `<SID>...</SID>`.
pub const SID: &[u8] = b"<SID>";
pub const END_SID: &[u8] = b"</SID>";

/// Authentication challenge/response: `<AUT>...</AUT>`.
pub const AUT: &[u8] = b"<AUT>";
pub const END_AUT: &[u8] = b"</AUT>";

/// Random challenge bytes: `<RAN>...</RAN>`.
pub const RAN: &[u8] = b"<RAN>";
pub const END_RAN: &[u8] = b"</RAN>";

/// Replicated payload: `<REP>...</REP>`.
pub const REP: &[u8] = b"<REP>";
pub const END_REP: &[u8] = b"</REP>";

/// Bare acknowledgement, no closing tag.
pub const ACK: &[u8] = b"<ACK>";

/// Wraps `data` in `open`/`close` tags, appending the result to `out`.
pub fn wrap(out: &mut Vec<u8>, open: &[u8], close: &[u8], data: &[u8]) {
    out.extend_from_slice(open);
    out.extend_from_slice(data);
    out.extend_from_slice(close);
}

/// Returns the byte offset of the first occurrence of `needle` in `haystack`,
/// or `None` if it isn't present. Used to probe for `<ACK>` without a
/// matching close tag.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Extracts the data between the first `open...close` pair found in `buf`,
/// if both tags are present in order. Returns the payload and the byte range
/// in `buf` consumed by the whole wrapped frame (open tag through close tag
/// inclusive), so the caller can drain exactly that range.
pub fn extract(buf: &[u8], open: &[u8], close: &[u8]) -> Option<(&[u8], std::ops::Range<usize>)> {
    let open_at = find(buf, open)?;
    let data_start = open_at + open.len();
    let close_at = find(&buf[data_start..], close)? + data_start;
    let data_end = close_at;
    let frame_end = close_at + close.len();
    Some((&buf[data_start..data_end], open_at..frame_end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_then_extract_roundtrips() {
        let mut buf = Vec::new();
        wrap(&mut buf, SID, END_SID, b"hello");
        assert_eq!(buf, b"<SID>hello</SID>");
        let (data, range) = extract(&buf, SID, END_SID).unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(range, 0..buf.len());
    }

    #[test]
    fn extract_ignores_leading_noise() {
        let mut buf = b"garbage-before-".to_vec();
        let start = buf.len();
        wrap(&mut buf, REP, END_REP, b"payload");
        let (data, range) = extract(&buf, REP, END_REP).unwrap();
        assert_eq!(data, b"payload");
        assert_eq!(range.start, start);
        assert_eq!(range.end, buf.len());
    }

    #[test]
    fn extract_requires_both_tags() {
        let buf = b"<SID>no close tag here".to_vec();
        assert!(extract(&buf, SID, END_SID).is_none());
    }

    #[test]
    fn bare_ack_has_no_close_tag() {
        let mut buf = Vec::new();
        buf.extend_from_slice(ACK);
        assert_eq!(find(&buf, ACK), Some(0));
    }

    #[test]
    fn find_on_empty_needle_is_none() {
        assert_eq!(find(b"anything", b""), None);
    }
}
