//! Pattern grammar for metadata filters.
//!
//! Integer fields accept `lo/hi`, `lo/..`, `../hi` and `../..` (all bounds
//! inclusive). Anything else is either matched as a case-insensitive wildcard
//! against the field's text form or rejected, depending on the fallback switch.
//! String fields always use wildcard matching where `*` matches any run of
//! characters.

use std::str::FromStr;

use crate::{ObsError, ObsResult};

pub const LIKE_ESCAPE: char = '\\';

const UNBOUNDED: &str = "..";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangePattern<T> {
    pub lo: Option<T>,
    pub hi: Option<T>,
}

/// Parse one of the four range forms; `None` when the text is none of them.
pub fn parse_range<T: FromStr>(pattern: &str) -> Option<RangePattern<T>> {
    let (lo, hi) = pattern.trim().split_once('/')?;
    Some(RangePattern {
        lo: parse_bound(lo)?,
        hi: parse_bound(hi)?,
    })
}

// Outer None: not a bound. Inner None: explicitly unbounded.
fn parse_bound<T: FromStr>(raw: &str) -> Option<Option<T>> {
    let raw = raw.trim();
    if raw == UNBOUNDED {
        return Some(None);
    }
    raw.parse::<T>().ok().map(Some)
}

#[derive(Clone, Debug, PartialEq)]
pub enum IntPattern {
    Range(RangePattern<i64>),
    Wildcard(WildcardPattern),
}

pub fn parse_int_pattern(pattern: &str, allow_string_fallback: bool) -> ObsResult<IntPattern> {
    if let Some(range) = parse_range::<i64>(pattern) {
        return Ok(IntPattern::Range(range));
    }
    if allow_string_fallback {
        return Ok(IntPattern::Wildcard(WildcardPattern::new(pattern)));
    }
    Err(ObsError::invalid_pattern(format!(
        "invalid int range pattern: {pattern}; must be one of lo/hi, ../hi, lo/.., or ../.."
    )))
}

/// Height ranges reuse the range forms but have no wildcard fallback.
pub fn parse_float_range(pattern: &str) -> ObsResult<RangePattern<f64>> {
    match parse_range::<f64>(pattern) {
        Some(range) if range.lo.is_none_or(f64::is_finite) && range.hi.is_none_or(f64::is_finite) => {
            Ok(range)
        }
        _ => Err(ObsError::invalid_pattern(format!(
            "invalid range pattern: {pattern}; must be one of lo/hi, ../hi, lo/.., or ../.."
        ))),
    }
}

/// Case-insensitive wildcard pattern where `*` matches zero or more characters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WildcardPattern {
    raw: String,
}

impl WildcardPattern {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Lower-cased SQL `LIKE` pattern, escaped with [`LIKE_ESCAPE`].
    pub fn to_like(&self) -> String {
        let mut like = String::with_capacity(self.raw.len());
        for ch in self.raw.to_lowercase().chars() {
            match ch {
                '*' => like.push('%'),
                '%' | '_' | LIKE_ESCAPE => {
                    like.push(LIKE_ESCAPE);
                    like.push(ch);
                }
                other => like.push(other),
            }
        }
        like
    }
}

#[cfg(test)]
mod tests {
    use super::{IntPattern, RangePattern, WildcardPattern, parse_float_range, parse_int_pattern};
    use crate::ObsError;

    fn range(pattern: &str) -> RangePattern<i64> {
        match parse_int_pattern(pattern, false).expect("range") {
            IntPattern::Range(range) => range,
            other => panic!("expected range, got {other:?}"),
        }
    }

    #[test]
    fn closed_range_keeps_both_bounds() {
        assert_eq!(
            range("10/20"),
            RangePattern {
                lo: Some(10),
                hi: Some(20)
            }
        );
    }

    #[test]
    fn half_open_ranges() {
        assert_eq!(range("10/.."), RangePattern { lo: Some(10), hi: None });
        assert_eq!(range("../20"), RangePattern { lo: None, hi: Some(20) });
        assert_eq!(range("../.."), RangePattern { lo: None, hi: None });
    }

    #[test]
    fn whitespace_and_negative_bounds_parse() {
        let r = range(" -5 / 5 ");
        assert_eq!(r.lo, Some(-5));
        assert_eq!(r.hi, Some(5));
    }

    #[test]
    fn malformed_bounds_are_not_ranges() {
        for pattern in ["10", "10/20/30", "a/..", "../", "1.5/2"] {
            assert!(
                parse_int_pattern(pattern, false).is_err(),
                "{pattern} parsed as a range"
            );
        }
    }

    #[test]
    fn non_range_falls_back_to_wildcard_when_enabled() {
        match parse_int_pattern("1*", true).expect("fallback") {
            IntPattern::Wildcard(pattern) => assert_eq!(pattern.to_like(), "1%"),
            other => panic!("expected wildcard, got {other:?}"),
        }
    }

    #[test]
    fn non_range_without_fallback_names_valid_forms() {
        let err = parse_int_pattern("1*", false).expect_err("no fallback");
        assert!(matches!(err, ObsError::InvalidPattern { .. }));
        let message = err.to_string();
        for form in ["lo/hi", "../hi", "lo/..", "../.."] {
            assert!(message.contains(form), "{message} lacks {form}");
        }
    }

    #[test]
    fn like_translation_escapes_sql_wildcards() {
        assert_eq!(WildcardPattern::new("Air_Temp*").to_like(), "air\\_temp%");
        assert_eq!(WildcardPattern::new("100%").to_like(), "100\\%");
        assert_eq!(WildcardPattern::new("a\\b").to_like(), "a\\\\b");
    }

    #[test]
    fn like_translation_lowercases_and_keeps_stars() {
        assert_eq!(WildcardPattern::new("*TEMP*").to_like(), "%temp%");
        assert_eq!(WildcardPattern::new("*").to_like(), "%");
        assert_eq!(WildcardPattern::new("").to_like(), "");
    }

    #[test]
    fn float_ranges_reject_wildcards() {
        let r = parse_float_range("1.5/..").expect("range");
        assert_eq!(r.lo, Some(1.5));
        assert!(parse_float_range("1*").is_err());
        assert!(parse_float_range("NaN/..").is_err());
    }
}
