//! Tier selection for new records.

use super::types::{ContextType, MemoryTier};

/// Choose the destination tier for a record.
///
/// Checked in order:
/// 1. an explicit tier wins unchanged;
/// 2. knowledge / BI data with importance >= 0.7 goes long-term;
/// 3. decisions / conversation summaries with importance >= 0.5 go short-term;
/// 4. messages and intermediate results stay in-session whatever their importance;
/// 5. otherwise the importance thresholds decide.
pub fn select_tier(
    context_type: &ContextType,
    importance: f64,
    explicit: Option<MemoryTier>,
) -> MemoryTier {
    if let Some(tier) = explicit {
        return tier;
    }

    let long_term = MemoryTier::LongTerm.config().importance_threshold;
    let short_term = MemoryTier::ShortTerm.config().importance_threshold;

    match context_type {
        ContextType::Knowledge | ContextType::BiData if importance >= long_term => {
            MemoryTier::LongTerm
        }
        ContextType::Decision | ContextType::ConversationSummary if importance >= short_term => {
            MemoryTier::ShortTerm
        }
        ContextType::Message | ContextType::IntermediateResult => MemoryTier::InSession,
        _ if importance >= long_term => MemoryTier::LongTerm,
        _ if importance >= short_term => MemoryTier::ShortTerm,
        _ => MemoryTier::InSession,
    }
}

/// Scale base importance by the tier's multiplier, clamped to [0, 1].
pub fn adjust_importance_for_tier(base_importance: f64, tier: MemoryTier) -> f64 {
    (base_importance * tier.config().importance_multiplier).clamp(0.0, 1.0)
}
