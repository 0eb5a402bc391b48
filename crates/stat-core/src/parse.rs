//! Zero-copy validation and parsing of the statsd line grammar.
//!
//! Accepts lines of the form `<key>:<value>|<type>[|@<rate>]` and borrows
//! the key straight out of the input buffer. Nothing here allocates and the
//! input is never modified.
//!
//! The key ends at the RIGHTMOST `:` in the line. Tagged keys embed colons
//! (`ns.__tag=k:v:42|ms` names the metric `ns.__tag=k:v`), so a forward
//! scan for the first colon would split them in the wrong place.

use std::fmt;

/// Largest line the relay accepts on ingest or emits at flush time. One
/// flush emission must fit a single downstream datagram.
pub const MAX_UDP_LENGTH: usize = 1432;

/// Metric families of the statsd wire protocol. Only counters, timers and
/// gauges are candidates for sampling; the rest pass through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Timer,
    Kv,
    Gauge,
    Hist,
    Set,
    Unknown,
}

impl MetricType {
    /// Map a wire type tag to its metric type. Unrecognised tags map to
    /// `Unknown`, which the parser rejects.
    pub fn from_tag(tag: &[u8]) -> MetricType {
        match tag {
            b"c" => MetricType::Counter,
            b"ms" => MetricType::Timer,
            b"kv" => MetricType::Kv,
            b"g" => MetricType::Gauge,
            b"h" => MetricType::Hist,
            b"s" => MetricType::Set,
            _ => MetricType::Unknown,
        }
    }
}

/// Why a line failed validation. Every variant gets the same
/// drop-and-count treatment; the distinction only feeds the debug log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    MissingSeparator,
    EmptyKey,
    BadValue,
    MissingType,
    UnknownType,
    BadSampleRate,
    TrailingSegment,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ParseError::MissingSeparator => "no ':' separator",
            ParseError::EmptyKey => "empty key",
            ParseError::BadValue => "value is not a finite double",
            ParseError::MissingType => "no '|' type segment",
            ParseError::UnknownType => "unknown type tag",
            ParseError::BadSampleRate => "'|@' rate is not a finite double",
            ParseError::TrailingSegment => "trailing '|' segment without '@'",
        };
        f.write_str(msg)
    }
}

/// One validated metric line. `key` borrows from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedLine<'a> {
    pub key: &'a [u8],
    pub value: f64,
    pub metric_type: MetricType,
    /// Sampling probability already applied by the client (`|@rate`
    /// segment), 1.0 when absent.
    pub presample: f64,
}

fn parse_double(bytes: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(bytes).ok()?;
    let v: f64 = s.parse().ok()?;
    v.is_finite().then_some(v)
}

/// Validate and parse a single line (no trailing newline).
pub fn parse_line(line: &[u8]) -> Result<ParsedLine<'_>, ParseError> {
    let colon = line
        .iter()
        .rposition(|&b| b == b':')
        .ok_or(ParseError::MissingSeparator)?;
    if colon == 0 {
        return Err(ParseError::EmptyKey);
    }
    let key = &line[..colon];
    let rest = &line[colon + 1..];

    let pipe = rest
        .iter()
        .position(|&b| b == b'|')
        .ok_or(ParseError::MissingType)?;
    let value = parse_double(&rest[..pipe]).ok_or(ParseError::BadValue)?;

    let after = &rest[pipe + 1..];
    let (tag, presample) = match after.iter().position(|&b| b == b'|') {
        None => (after, 1.0),
        Some(p2) => {
            let trailer = &after[p2 + 1..];
            match trailer.first() {
                Some(b'@') => {
                    let rate =
                        parse_double(&trailer[1..]).ok_or(ParseError::BadSampleRate)?;
                    (&after[..p2], rate)
                }
                _ => return Err(ParseError::TrailingSegment),
            }
        }
    };

    let metric_type = MetricType::from_tag(tag);
    if metric_type == MetricType::Unknown {
        return Err(ParseError::UnknownType);
    }

    Ok(ParsedLine {
        key,
        value,
        metric_type,
        presample,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counter() {
        let p = parse_line(b"api.requests:1|c").expect("should parse");
        assert_eq!(p.key, b"api.requests");
        assert_eq!(p.value, 1.0);
        assert_eq!(p.metric_type, MetricType::Counter);
        assert_eq!(p.presample, 1.0);
    }

    #[test]
    fn test_parse_timer_with_rate() {
        let p = parse_line(b"test.srv.req:2.5|ms|@0.2").expect("should parse");
        assert_eq!(p.key, b"test.srv.req");
        assert_eq!(p.value, 2.5);
        assert_eq!(p.metric_type, MetricType::Timer);
        assert_eq!(p.presample, 0.2);
    }

    #[test]
    fn test_parse_tagged_key_uses_rightmost_colon() {
        let p = parse_line(b"a.b.c.__tag1=v1.__tag2=v2:v2:42.000|ms").expect("should parse");
        assert_eq!(p.key, b"a.b.c.__tag1=v1.__tag2=v2:v2");
        assert_eq!(p.value, 42.0);
        assert_eq!(p.metric_type, MetricType::Timer);
        assert_eq!(p.presample, 1.0);
    }

    #[test]
    fn test_parse_all_types() {
        for (line, ty) in [
            (&b"k:1|c"[..], MetricType::Counter),
            (b"k:1|ms", MetricType::Timer),
            (b"k:1|kv", MetricType::Kv),
            (b"k:1|g", MetricType::Gauge),
            (b"k:1|h", MetricType::Hist),
            (b"k:1|s", MetricType::Set),
        ] {
            assert_eq!(parse_line(line).expect("should parse").metric_type, ty);
        }
    }

    #[test]
    fn test_parse_negative_and_signed_values() {
        assert_eq!(parse_line(b"g:-3.5|g").unwrap().value, -3.5);
        assert_eq!(parse_line(b"g:+4|g").unwrap().value, 4.0);
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert_eq!(parse_line(b"noseparator|c"), Err(ParseError::MissingSeparator));
    }

    #[test]
    fn test_parse_rejects_empty_key() {
        assert_eq!(parse_line(b":1|c"), Err(ParseError::EmptyKey));
    }

    #[test]
    fn test_parse_rejects_bad_value() {
        assert_eq!(parse_line(b"k:|c"), Err(ParseError::BadValue));
        assert_eq!(parse_line(b"k:abc|c"), Err(ParseError::BadValue));
        assert_eq!(parse_line(b"k:inf|c"), Err(ParseError::BadValue));
        assert_eq!(parse_line(b"k:NaN|c"), Err(ParseError::BadValue));
    }

    #[test]
    fn test_parse_rejects_missing_type() {
        assert_eq!(parse_line(b"k:1"), Err(ParseError::MissingType));
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert_eq!(parse_line(b"k:1|x"), Err(ParseError::UnknownType));
        assert_eq!(parse_line(b"k:1|"), Err(ParseError::UnknownType));
    }

    #[test]
    fn test_parse_rejects_bad_sample_rate() {
        assert_eq!(parse_line(b"k:1|c|@"), Err(ParseError::BadSampleRate));
        assert_eq!(parse_line(b"k:1|c|@abc"), Err(ParseError::BadSampleRate));
    }

    #[test]
    fn test_parse_rejects_trailing_segment_without_at() {
        assert_eq!(parse_line(b"k:1|c|0.5"), Err(ParseError::TrailingSegment));
        assert_eq!(parse_line(b"k:1|c|"), Err(ParseError::TrailingSegment));
    }

    #[test]
    fn test_parse_is_pure_and_repeatable() {
        let buf = b"srv.latency:9.25|ms|@0.5".to_vec();
        let copy = buf.clone();
        let a = parse_line(&buf).expect("should parse");
        let b = parse_line(&buf).expect("should parse");
        assert_eq!(a, b);
        assert_eq!(buf, copy, "input buffer must not be modified");
    }
}
