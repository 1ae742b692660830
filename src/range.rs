//! `Range` request header parsing

use crate::error::{MediaError, Result};
use crate::models::ByteRange;

const BYTES_PREFIX: &str = "bytes=";

/// Turns a `Range` header into a byte window over an object of known size
///
/// Only the single-range `bytes=<start>-<end>` form is understood. A missing
/// end selects everything up to the last byte. The parser does not check the
/// window against the object size; callers clamp with [`ByteRange::clamp_to`].
pub struct RangeParser;

impl RangeParser {
    /// Parse `header` for an object of `total_size` bytes
    ///
    /// # Errors
    /// `MediaError::MalformedRange` when the prefix is wrong, either bound is
    /// not a non-negative integer, or the end precedes the start.
    pub fn parse(header: &str, total_size: u64) -> Result<ByteRange> {
        let header = header.trim();

        let range_set = header.strip_prefix(BYTES_PREFIX).ok_or_else(|| {
            MediaError::MalformedRange(format!(
                "Range header must start with '{}', got: {}",
                BYTES_PREFIX, header
            ))
        })?;

        let (start, end) = range_set.split_once('-').ok_or_else(|| {
            MediaError::MalformedRange(format!("expected 'start-end', got: {}", range_set))
        })?;

        let start = start
            .trim()
            .parse::<u64>()
            .map_err(|e| MediaError::MalformedRange(format!("Invalid start value: {}", e)))?;

        let end = match end.trim() {
            // An open-ended window that starts past the content collapses to a
            // single byte so the bounds check reports it as unsatisfiable.
            "" => total_size.saturating_sub(1).max(start),
            end => end
                .parse::<u64>()
                .map_err(|e| MediaError::MalformedRange(format!("Invalid end value: {}", e)))?,
        };

        ByteRange::new(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_closed_range() {
        let range = RangeParser::parse("bytes=0-99", 1000).unwrap();
        assert_eq!(range, ByteRange { start: 0, end: 99 });
        assert_eq!(range.len(), 100);
    }

    #[test]
    fn test_parse_open_ended_range() {
        let range = RangeParser::parse("bytes=500-", 1000).unwrap();
        assert_eq!(range, ByteRange { start: 500, end: 999 });
    }

    #[test]
    fn test_parse_rejects_non_numeric_start() {
        let err = RangeParser::parse("bytes=abc-100", 1000).unwrap_err();
        assert!(matches!(err, MediaError::MalformedRange(_)));
    }

    #[test]
    fn test_parse_rejects_wrong_unit() {
        assert!(RangeParser::parse("items=0-10", 1000).is_err());
        assert!(RangeParser::parse("0-10", 1000).is_err());
    }

    #[test]
    fn test_parse_rejects_suffix_and_multi_ranges() {
        assert!(RangeParser::parse("bytes=-500", 1000).is_err());
        assert!(RangeParser::parse("bytes=0-1,5-6", 1000).is_err());
        assert!(RangeParser::parse("bytes=10", 1000).is_err());
    }

    #[test]
    fn test_parse_rejects_inverted_range() {
        assert!(RangeParser::parse("bytes=100-50", 1000).is_err());
    }

    #[test]
    fn test_parse_does_not_clamp_explicit_end() {
        let range = RangeParser::parse("bytes=0-5000", 1000).unwrap();
        assert_eq!(range.end, 5000);
    }

    #[test]
    fn test_parse_open_ended_past_content() {
        let range = RangeParser::parse("bytes=1500-", 1000).unwrap();
        assert_eq!(range, ByteRange { start: 1500, end: 1500 });
        assert!(range.clamp_to(1000).is_err());
    }

    #[test]
    fn test_parse_is_repeatable() {
        let first = RangeParser::parse(" bytes=10-20 ", 100).unwrap();
        let second = RangeParser::parse(" bytes=10-20 ", 100).unwrap();
        assert_eq!(first, second);
    }
}
