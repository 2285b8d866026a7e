//! Retention cleanup and cross-tier migration.
//!
//! Both operations stop at the first backend error and support a dry run
//! that reports matches without touching storage. Migration writes the new
//! record before deleting the old one, so a crash in between leaves the
//! record in both tiers rather than in neither.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};

use super::backend::UNBOUNDED;
use super::keys::build_key;
use super::registry::LayerRegistry;
use super::router::adjust_importance_for_tier;
use super::types::{ContextType, MemoryRecord, MemoryTier, RecordFilter};

/// Cleanup outcome for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierCleanup {
    pub tier: MemoryTier,
    /// Records created before this instant were selected
    pub cutoff: DateTime<Utc>,
    pub matched: usize,
    /// Structured records deleted (0 on a dry run)
    pub deleted: usize,
    /// Vectors deleted (0 on a dry run)
    pub vectors_deleted: usize,
}

/// Outcome of [`cleanup`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub tiers: Vec<TierCleanup>,
    /// Non-fatal inconsistencies found while deleting
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn total_matched(&self) -> usize {
        self.tiers.iter().map(|t| t.matched).sum()
    }

    pub fn total_deleted(&self) -> usize {
        self.tiers.iter().map(|t| t.deleted).sum()
    }
}

/// Delete records past their tier's retention window.
///
/// `tier == None` cleans every tier.
pub async fn cleanup(
    registry: &LayerRegistry,
    tier: Option<MemoryTier>,
    dry_run: bool,
    now: DateTime<Utc>,
) -> Result<CleanupReport> {
    let tiers: Vec<MemoryTier> = match tier {
        Some(t) => vec![t],
        None => MemoryTier::ALL.to_vec(),
    };

    let mut report = CleanupReport {
        dry_run,
        tiers: Vec::with_capacity(tiers.len()),
        errors: Vec::new(),
    };

    for tier in tiers {
        let storage = registry.storage(tier);
        let cutoff = now - tier.config().retention();
        let matched = storage.list_before(cutoff, UNBOUNDED).await?.len();

        let (deleted, vectors_deleted) = if dry_run {
            (0, 0)
        } else {
            storage.delete_before(cutoff).await?
        };

        if !dry_run && (deleted != matched || vectors_deleted != deleted) {
            let message = format!(
                "{}: matched {} records, deleted {} records and {} vectors",
                tier, matched, deleted, vectors_deleted
            );
            warn!(tier = %tier, matched, deleted, vectors_deleted, "Cleanup counts disagree");
            report.errors.push(message);
        }

        info!(tier = %tier, %cutoff, matched, deleted, dry_run, "Cleaned up tier");
        report.tiers.push(TierCleanup {
            tier,
            cutoff,
            matched,
            deleted,
            vectors_deleted,
        });
    }

    Ok(report)
}

/// Which records a migration moves. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationCriteria {
    /// Minimum importance
    pub importance_threshold: Option<f64>,
    /// Only records at most this many days old
    pub max_age_days: Option<i64>,
    pub context_types: Vec<ContextType>,
}

impl MigrationCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_importance_threshold(mut self, threshold: f64) -> Self {
        self.importance_threshold = Some(threshold);
        self
    }

    pub fn with_max_age_days(mut self, days: i64) -> Self {
        self.max_age_days = Some(days);
        self
    }

    pub fn with_context_type(mut self, context_type: ContextType) -> Self {
        self.context_types.push(context_type);
        self
    }

    fn to_filter(&self, now: DateTime<Utc>) -> RecordFilter {
        let mut filter = RecordFilter::new().context_types(self.context_types.clone());
        if let Some(threshold) = self.importance_threshold {
            filter = filter.min_importance(threshold);
        }
        if let Some(days) = self.max_age_days {
            filter = filter.created_after(now - Duration::days(days));
        }
        filter
    }
}

/// One record moved (or, on a dry run, that would move).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigratedRecord {
    pub original_key: String,
    pub new_key: String,
    pub original_importance: f64,
    pub new_importance: f64,
}

/// Outcome of [`migrate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub from: MemoryTier,
    pub to: MemoryTier,
    pub dry_run: bool,
    pub matched: usize,
    pub migrated: usize,
    pub records: Vec<MigratedRecord>,
}

/// Move matching records from one tier to another.
pub async fn migrate(
    registry: &LayerRegistry,
    from: MemoryTier,
    to: MemoryTier,
    criteria: &MigrationCriteria,
    dry_run: bool,
    now: DateTime<Utc>,
) -> Result<MigrationReport> {
    if from == to {
        return Err(Error::validation(format!(
            "cannot migrate {} into itself",
            from
        )));
    }

    let source = registry.storage(from);
    let target = registry.storage(to);
    let mut matches = source
        .search_structured(&criteria.to_filter(now), UNBOUNDED, None)
        .await?;
    // Session bookkeeping belongs to the session manager in short-term
    matches.retain(|record| !is_session_bookkeeping(record));

    let mut report = MigrationReport {
        from,
        to,
        dry_run,
        matched: matches.len(),
        migrated: 0,
        records: Vec::with_capacity(matches.len()),
    };

    for record in matches {
        let moved = rehome(&record, to, now);
        report.records.push(MigratedRecord {
            original_key: record.key.clone(),
            new_key: moved.key.clone(),
            original_importance: record.importance,
            new_importance: moved.importance,
        });
        if dry_run {
            continue;
        }

        target.save(&moved).await?;
        source.delete(&record.key).await?;
        report.migrated += 1;
    }

    info!(
        from = %from,
        to = %to,
        matched = report.matched,
        migrated = report.migrated,
        dry_run,
        "Migrated records"
    );
    Ok(report)
}

fn is_session_bookkeeping(record: &MemoryRecord) -> bool {
    matches!(
        record.context_type,
        ContextType::Session | ContextType::SessionState
    )
}

/// Base key of a migrated record. Leaving a session-scoped tier for a
/// shared one prefixes the session, since per-session bases such as
/// `collection:<name>` repeat across sessions.
fn migrated_base(record: &MemoryRecord, to: MemoryTier) -> String {
    if !record.tier.config().cross_session && to.config().cross_session {
        format!("{}:{}", record.session_id, record.id)
    } else {
        record.id.clone()
    }
}

/// Copy of `record` namespaced under `to`, keeping its creation time.
fn rehome(record: &MemoryRecord, to: MemoryTier, now: DateTime<Utc>) -> MemoryRecord {
    let mut moved = record.clone();
    moved.tier = to;
    moved.key = build_key(&migrated_base(record, to), to, &record.session_id);
    moved.importance = adjust_importance_for_tier(record.importance, to);
    moved.expires_at = record.created_at + to.config().retention();
    moved
        .metadata
        .insert("migrated_from".into(), Value::from(record.tier.as_str()));
    moved
        .metadata
        .insert("original_key".into(), Value::from(record.key.clone()));
    moved
        .metadata
        .insert("original_importance".into(), Value::from(record.importance));
    moved
        .metadata
        .insert("migrated_at".into(), Value::from(now.to_rfc3339()));
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::sqlite_tier;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> LayerRegistry {
        LayerRegistry::from_storages(MemoryTier::ALL.map(sqlite_tier)).unwrap()
    }

    async fn put_aged(registry: &LayerRegistry, tier: MemoryTier, age_days: i64) -> MemoryRecord {
        let record = MemoryRecord::new(tier, "s1", ContextType::Decision, "aged")
            .with_created_at(Utc::now() - Duration::days(age_days));
        registry.storage(tier).save(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn test_retention_boundary() {
        let registry = registry();
        let expired = put_aged(&registry, MemoryTier::ShortTerm, 31).await;
        let kept = put_aged(&registry, MemoryTier::ShortTerm, 29).await;

        let report = cleanup(&registry, Some(MemoryTier::ShortTerm), false, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.tiers.len(), 1);
        assert_eq!(report.total_matched(), 1);
        assert_eq!(report.total_deleted(), 1);
        assert_eq!(report.tiers[0].vectors_deleted, 1);
        assert!(report.errors.is_empty());

        let storage = registry.storage(MemoryTier::ShortTerm);
        assert!(storage.get(&expired.key).await.unwrap().is_none());
        assert!(storage.get(&kept.key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_dry_run_and_all_tiers() {
        let registry = registry();
        put_aged(&registry, MemoryTier::InSession, 2).await;
        put_aged(&registry, MemoryTier::LongTerm, 366).await;
        put_aged(&registry, MemoryTier::LongTerm, 100).await;

        let dry = cleanup(&registry, None, true, Utc::now()).await.unwrap();
        assert_eq!(dry.tiers.len(), 3);
        assert_eq!(dry.total_matched(), 2);
        assert_eq!(dry.total_deleted(), 0);
        assert_eq!(
            registry.storage(MemoryTier::LongTerm).counts().await.unwrap(),
            (2, 2)
        );

        let real = cleanup(&registry, None, false, Utc::now()).await.unwrap();
        assert_eq!(real.total_deleted(), 2);
        assert_eq!(
            registry.storage(MemoryTier::LongTerm).counts().await.unwrap(),
            (1, 1)
        );
    }

    #[tokio::test]
    async fn test_migrate_short_to_long() {
        let registry = registry();
        let record = MemoryRecord::new(MemoryTier::ShortTerm, "s1", ContextType::Decision, "keep")
            .with_importance(0.6);
        let minor = MemoryRecord::new(MemoryTier::ShortTerm, "s1", ContextType::Decision, "drop")
            .with_importance(0.2);
        let st = registry.storage(MemoryTier::ShortTerm);
        st.save(&record).await.unwrap();
        st.save(&minor).await.unwrap();

        let criteria = MigrationCriteria::new().with_importance_threshold(0.5);
        let report = migrate(
            &registry,
            MemoryTier::ShortTerm,
            MemoryTier::LongTerm,
            &criteria,
            false,
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(report.matched, 1);
        assert_eq!(report.migrated, 1);
        let moved_key = &report.records[0].new_key;
        assert_eq!(moved_key, &format!("lt:s1:{}", record.id));

        let moved = registry
            .storage(MemoryTier::LongTerm)
            .get(moved_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.importance, 0.6);
        assert_eq!(moved.tier, MemoryTier::LongTerm);
        assert_eq!(moved.expires_at - moved.created_at, Duration::days(365));
        assert_eq!(moved.get_metadata("migrated_from"), Some(&Value::from("short_term")));
        assert!(st.get(&record.key).await.unwrap().is_none());
        assert!(st.get(&minor.key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_migrate_keeps_per_session_records_apart() {
        let registry = registry();
        let st = registry.storage(MemoryTier::ShortTerm);
        for session in ["a", "b"] {
            let collection = MemoryRecord::with_base(
                "collection:manuals",
                MemoryTier::ShortTerm,
                session,
                ContextType::Knowledge,
                json!({"session": session}),
            )
            .with_importance(0.8);
            let state = MemoryRecord::with_base(
                "session_state",
                MemoryTier::ShortTerm,
                session,
                ContextType::SessionState,
                json!({"status": "active"}),
            )
            .with_importance(0.8);
            st.save(&collection).await.unwrap();
            st.save(&state).await.unwrap();
        }

        let criteria = MigrationCriteria::new().with_importance_threshold(0.7);
        let report = migrate(
            &registry,
            MemoryTier::ShortTerm,
            MemoryTier::LongTerm,
            &criteria,
            false,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(report.matched, 2);
        assert_eq!(report.migrated, 2);

        let lt = registry.storage(MemoryTier::LongTerm);
        for session in ["a", "b"] {
            let moved = lt
                .get(&format!("lt:{session}:collection:manuals"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(moved.payload, json!({"session": session}));
            assert!(st
                .get(&format!("st:{session}:session_state"))
                .await
                .unwrap()
                .is_some());
        }
        assert_eq!(st.counts().await.unwrap(), (2, 2));
    }

    #[tokio::test]
    async fn test_migrate_dry_run_and_demotion() {
        let registry = registry();
        let record = MemoryRecord::new(MemoryTier::LongTerm, "s1", ContextType::Knowledge, "x")
            .with_importance(0.9);
        registry.storage(MemoryTier::LongTerm).save(&record).await.unwrap();

        let criteria = MigrationCriteria::new().with_context_type(ContextType::Knowledge);
        let dry = migrate(
            &registry,
            MemoryTier::LongTerm,
            MemoryTier::InSession,
            &criteria,
            true,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(dry.matched, 1);
        assert_eq!(dry.migrated, 0);
        assert!((dry.records[0].new_importance - 0.54).abs() < 1e-9);
        assert!(dry.records[0].new_key.starts_with("is:s1:"));
        assert!(registry
            .storage(MemoryTier::LongTerm)
            .get(&record.key)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_migrate_max_age() {
        let registry = registry();
        put_aged(&registry, MemoryTier::ShortTerm, 10).await;
        put_aged(&registry, MemoryTier::ShortTerm, 1).await;

        let criteria = MigrationCriteria::new().with_max_age_days(5);
        let report = migrate(
            &registry,
            MemoryTier::ShortTerm,
            MemoryTier::LongTerm,
            &criteria,
            true,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(report.matched, 1);
    }

    #[tokio::test]
    async fn test_migrate_same_tier_rejected() {
        let registry = registry();
        let err = migrate(
            &registry,
            MemoryTier::LongTerm,
            MemoryTier::LongTerm,
            &MigrationCriteria::new(),
            true,
            Utc::now(),
        )
        .await;
        assert!(matches!(err, Err(Error::Validation(_))));
    }
}
