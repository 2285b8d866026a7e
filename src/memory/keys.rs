//! Storage key namespacing.
//!
//! Keys encode the tier and, below long-term, the owning session:
//!
//! - long-term: `lt:<base>`
//! - short-term: `st:<session>:<base>`
//! - in-session: `is:<session>:<YYYYMMDDHH>:<base>`
//!
//! Long-term keys are global so they can be read across sessions. The hour
//! bucket bounds in-session key cardinality and keeps cleanup by time cheap.

use chrono::{DateTime, Utc};

use super::types::MemoryTier;

/// Build a key for `base` in `tier` using the current hour bucket.
pub fn build_key(base: &str, tier: MemoryTier, session_id: &str) -> String {
    build_key_at(base, tier, session_id, Utc::now())
}

/// Build a key for `base` in `tier` with an explicit clock reading.
pub fn build_key_at(base: &str, tier: MemoryTier, session_id: &str, now: DateTime<Utc>) -> String {
    match tier {
        MemoryTier::LongTerm => format!("lt:{}", base),
        MemoryTier::ShortTerm => format!("st:{}:{}", session_id, base),
        MemoryTier::InSession => {
            format!("is:{}:{}:{}", session_id, hour_bucket(now), base)
        }
    }
}

/// Hour bucket used in in-session keys.
pub fn hour_bucket(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H").to_string()
}

/// Components recovered from a namespaced key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey<'a> {
    pub tier: MemoryTier,
    pub session_id: Option<&'a str>,
    pub hour_bucket: Option<&'a str>,
    pub base: &'a str,
}

/// Split a key back into its parts.
///
/// Session ids are UUIDs in practice and never contain `:`; bases may.
pub fn parse_key(key: &str) -> Option<ParsedKey<'_>> {
    let (prefix, rest) = key.split_once(':')?;
    let tier = MemoryTier::from_key_prefix(prefix)?;
    match tier {
        MemoryTier::LongTerm => Some(ParsedKey {
            tier,
            session_id: None,
            hour_bucket: None,
            base: rest,
        }),
        MemoryTier::ShortTerm => {
            let (session, base) = rest.split_once(':')?;
            Some(ParsedKey {
                tier,
                session_id: Some(session),
                hour_bucket: None,
                base,
            })
        }
        MemoryTier::InSession => {
            let (session, rest) = rest.split_once(':')?;
            let (bucket, base) = rest.split_once(':')?;
            Some(ParsedKey {
                tier,
                session_id: Some(session),
                hour_bucket: Some(bucket),
                base,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_long_term_key_is_global() {
        assert_eq!(build_key("abc", MemoryTier::LongTerm, "s1"), "lt:abc");
        assert_eq!(
            build_key("abc", MemoryTier::LongTerm, "s1"),
            build_key("abc", MemoryTier::LongTerm, "s2")
        );
    }

    #[test]
    fn test_short_term_key_is_session_scoped() {
        assert_eq!(build_key("abc", MemoryTier::ShortTerm, "s1"), "st:s1:abc");
    }

    #[test]
    fn test_in_session_key_has_hour_bucket() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 59, 59).unwrap();
        assert_eq!(
            build_key_at("abc", MemoryTier::InSession, "s1", now),
            "is:s1:2024030514:abc"
        );
    }

    #[test]
    fn test_parse_key() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap();
        let key = build_key_at("session", MemoryTier::InSession, "s1", now);
        let parsed = parse_key(&key).unwrap();
        assert_eq!(parsed.tier, MemoryTier::InSession);
        assert_eq!(parsed.session_id, Some("s1"));
        assert_eq!(parsed.hour_bucket, Some("2024030514"));
        assert_eq!(parsed.base, "session");

        let parsed = parse_key("lt:collection:reports").unwrap();
        assert_eq!(parsed.tier, MemoryTier::LongTerm);
        assert_eq!(parsed.base, "collection:reports");

        assert!(parse_key("xx:abc").is_none());
        assert!(parse_key("st:only-session").is_none());
    }
}
