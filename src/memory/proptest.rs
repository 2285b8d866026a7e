//! Property-based tests for routing, key namespacing, chunking and scoring.
//!
//! These tests check invariants that must hold for any input:
//!
//! - Tier routing is deterministic and an explicit tier always wins
//! - Keys round-trip through `parse_key` and never collide
//! - Chunks carry the overlap tail of their predecessor and lose no paragraph
//! - Tier weighting and recency boosts preserve ordering and stay bounded

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    use crate::knowledge::chunker::{chunk_text, overlap_tail};
    use crate::memory::embedding::cosine_similarity;
    use crate::memory::keys::{build_key_at, parse_key};
    use crate::memory::retrieval::recency_boost;
    use crate::memory::router::{adjust_importance_for_tier, select_tier};
    use crate::memory::types::{ContextType, MemoryTier};

    fn tier() -> impl Strategy<Value = MemoryTier> {
        prop_oneof![
            Just(MemoryTier::LongTerm),
            Just(MemoryTier::ShortTerm),
            Just(MemoryTier::InSession),
        ]
    }

    fn context_type() -> impl Strategy<Value = ContextType> {
        prop_oneof![
            Just(ContextType::Message),
            Just(ContextType::Knowledge),
            Just(ContextType::BiData),
            Just(ContextType::Decision),
            Just(ContextType::ConversationSummary),
            Just(ContextType::IntermediateResult),
            Just(ContextType::CrewContext),
            "[a-z]{3,10}".prop_map(ContextType::Custom),
        ]
    }

    fn importance() -> impl Strategy<Value = f64> {
        prop_oneof![Just(0.0), Just(0.5), Just(0.7), Just(1.0), 0.0f64..=1.0f64]
    }

    // Session ids never contain ':'; bases may
    fn session_id() -> impl Strategy<Value = String> {
        "[a-f0-9-]{1,36}"
    }

    fn base() -> impl Strategy<Value = String> {
        "[a-z0-9:_-]{1,40}"
    }

    fn paragraph() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-zA-Z]{1,8}", 1..8).prop_map(|words| words.join(" ") + ".")
    }

    // =========================================================================
    // Routing
    // =========================================================================

    proptest! {
        /// The same inputs always route to the same tier.
        #[test]
        fn routing_is_deterministic(ct in context_type(), imp in importance()) {
            prop_assert_eq!(select_tier(&ct, imp, None), select_tier(&ct, imp, None));
        }

        /// An explicit tier is returned unchanged.
        #[test]
        fn explicit_tier_wins(ct in context_type(), imp in importance(), t in tier()) {
            prop_assert_eq!(select_tier(&ct, imp, Some(t)), t);
        }

        /// Messages and intermediate results never leave the session on their own.
        #[test]
        fn conversational_records_stay_in_session(imp in importance()) {
            prop_assert_eq!(select_tier(&ContextType::Message, imp, None), MemoryTier::InSession);
            prop_assert_eq!(
                select_tier(&ContextType::IntermediateResult, imp, None),
                MemoryTier::InSession
            );
        }

        /// Adjusted importance stays in [0, 1].
        #[test]
        fn adjusted_importance_is_bounded(imp in importance(), t in tier()) {
            let adjusted = adjust_importance_for_tier(imp, t);
            prop_assert!((0.0..=1.0).contains(&adjusted), "{} out of range", adjusted);
        }
    }

    // =========================================================================
    // Keys
    // =========================================================================

    proptest! {
        /// Parsing a built key recovers its components.
        #[test]
        fn key_round_trip(b in base(), t in tier(), s in session_id(), hour in 0i64..100_000) {
            let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour);
            let key = build_key_at(&b, t, &s, now);
            let parsed = parse_key(&key).unwrap();

            prop_assert_eq!(parsed.tier, t);
            prop_assert_eq!(parsed.base, b.as_str());
            match t {
                MemoryTier::LongTerm => prop_assert_eq!(parsed.session_id, None),
                _ => prop_assert_eq!(parsed.session_id, Some(s.as_str())),
            }
            prop_assert_eq!(parsed.hour_bucket.is_some(), t == MemoryTier::InSession);
        }

        /// Distinct tiers or sessions never share a key for the same base.
        #[test]
        fn keys_do_not_collide(
            b in base(),
            t1 in tier(),
            t2 in tier(),
            s1 in session_id(),
            s2 in session_id()
        ) {
            let now = Utc::now();
            let k1 = build_key_at(&b, t1, &s1, now);
            let k2 = build_key_at(&b, t2, &s2, now);
            let same_scope = t1 == t2 && (t1 == MemoryTier::LongTerm || s1 == s2);
            prop_assert_eq!(k1 == k2, same_scope);
        }
    }

    // =========================================================================
    // Chunking
    // =========================================================================

    proptest! {
        /// Every chunk after the first starts with the tail of its predecessor.
        #[test]
        fn chunks_carry_overlap(
            paragraphs in prop::collection::vec(paragraph(), 1..20),
            chunk_size in 40usize..200,
            overlap in 0usize..30
        ) {
            let text = paragraphs.join("\n\n");
            let chunks = chunk_text(&text, chunk_size, overlap).unwrap();
            for pair in chunks.windows(2) {
                let tail = overlap_tail(&pair[0], overlap);
                prop_assert!(
                    pair[1].starts_with(&tail),
                    "chunk {:?} does not start with {:?}",
                    pair[1],
                    tail
                );
            }
        }

        /// No paragraph is lost or split.
        #[test]
        fn chunks_keep_every_paragraph(
            paragraphs in prop::collection::vec(paragraph(), 1..20),
            chunk_size in 40usize..200,
            overlap in 0usize..30
        ) {
            let text = paragraphs.join("\n\n");
            let chunks = chunk_text(&text, chunk_size, overlap).unwrap();
            for p in &paragraphs {
                prop_assert!(chunks.iter().any(|c| c.contains(p.as_str())), "lost {:?}", p);
            }
        }

        /// When overlap plus any paragraph fits, no chunk exceeds the size.
        #[test]
        fn chunks_respect_size(
            paragraphs in prop::collection::vec(paragraph(), 1..20),
            overlap in 0usize..20
        ) {
            let longest = paragraphs.iter().map(|p| p.chars().count()).max().unwrap_or(0);
            let chunk_size = longest + overlap + 2;
            let text = paragraphs.join("\n\n");
            for chunk in chunk_text(&text, chunk_size, overlap).unwrap() {
                prop_assert!(chunk.chars().count() <= chunk_size, "{:?} too long", chunk);
            }
        }
    }

    // =========================================================================
    // Scoring
    // =========================================================================

    proptest! {
        /// Weighting by tier preserves the order of scores within a tier.
        #[test]
        fn weighting_is_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0, t in tier()) {
            let weight = t.config().weight();
            prop_assert!(weight >= 1.0);
            if a <= b {
                prop_assert!(a * weight <= b * weight);
            }
        }

        /// Recency boost is bounded and never grows with age.
        #[test]
        fn recency_boost_bounded_and_decreasing(d1 in 0i64..2000, d2 in 0i64..2000) {
            let now = Utc::now();
            let b1 = recency_boost(now - Duration::days(d1), now);
            let b2 = recency_boost(now - Duration::days(d2), now);
            prop_assert!((0.1..=1.0).contains(&b1));
            if d1 <= d2 {
                prop_assert!(b1 >= b2);
            }
        }

        /// Cosine similarity is symmetric and 1 for a vector with itself.
        #[test]
        fn cosine_symmetric(v in prop::collection::vec(-1.0f32..1.0, 1..32), w in prop::collection::vec(-1.0f32..1.0, 1..32)) {
            let n = v.len().min(w.len());
            let (v, w) = (&v[..n], &w[..n]);
            prop_assert!((cosine_similarity(v, w) - cosine_similarity(w, v)).abs() < 1e-9);
            if v.iter().any(|x| x.abs() > 1e-3) {
                prop_assert!((cosine_similarity(v, v) - 1.0).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn tier_weights_are_ordered() {
        let lt = MemoryTier::LongTerm.config().weight();
        let st = MemoryTier::ShortTerm.config().weight();
        let is = MemoryTier::InSession.config().weight();
        assert!(lt > st && st > is);
    }
}
