//! Session lifecycle.
//!
//! A session is two short-term records: `session` (profile, preferences)
//! and `session_state` (status, activity, registered crews). Updates are
//! read-merge-write without versioning; concurrent writers to one session
//! are last-writer-wins.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::memory::adapter::TierStorage;
use crate::memory::backend::UNBOUNDED;
use crate::memory::keys::build_key;
use crate::memory::types::{ContextType, MemoryRecord, MemoryTier, Metadata, RecordFilter};

/// Base key of the session profile record.
pub const SESSION_BASE: &str = "session";
/// Base key of the session state record.
pub const SESSION_STATE_BASE: &str = "session_state";

/// Importance of session bookkeeping records.
const SESSION_IMPORTANCE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
        }
    }
}

/// A consumer registered with a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewEntry {
    pub id: String,
    pub name: String,
    pub agent_count: usize,
    pub process_type: String,
    pub registered_at: DateTime<Utc>,
    pub task_count: u64,
    #[serde(flatten)]
    pub metadata: Metadata,
}

/// Mutable state of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub crews: Vec<CrewEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Caller-defined state entries
    #[serde(flatten)]
    pub extra: Metadata,
}

impl SessionState {
    fn active(now: DateTime<Utc>) -> Self {
        Self {
            status: SessionStatus::Active,
            last_activity: now,
            message_count: 0,
            crews: Vec::new(),
            closed_at: None,
            extra: Metadata::new(),
        }
    }
}

/// Profile of a session, fixed at creation apart from preferences and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProfile {
    pub session_id: String,
    pub user_id: String,
    pub session_type: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub preferences: Metadata,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

/// Profile and state of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub profile: SessionProfile,
    pub state: SessionState,
}

impl Session {
    pub fn session_id(&self) -> &str {
        &self.profile.session_id
    }

    pub fn is_active(&self) -> bool {
        self.state.status == SessionStatus::Active
    }
}

/// Session records in the short-term tier.
#[derive(Debug, Clone)]
pub struct SessionManager {
    storage: TierStorage,
}

impl SessionManager {
    /// `storage` must be the short-term tier.
    pub fn new(storage: TierStorage) -> Result<Self> {
        if storage.tier() != MemoryTier::ShortTerm {
            return Err(Error::Config(format!(
                "sessions live in short_term, got {}",
                storage.tier()
            )));
        }
        Ok(Self { storage })
    }

    /// Create an active session and return its id.
    pub async fn create_session(
        &self,
        user_id: &str,
        session_type: &str,
        preferences: Metadata,
        metadata: Metadata,
    ) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let profile = SessionProfile {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            session_type: session_type.to_string(),
            status: SessionStatus::Active,
            created_at: now,
            preferences,
            metadata,
            closed_at: None,
        };
        let session_record = MemoryRecord::with_base(
            SESSION_BASE,
            MemoryTier::ShortTerm,
            &session_id,
            ContextType::Session,
            serde_json::to_value(&profile)?,
        )
        .with_importance(SESSION_IMPORTANCE)
        .with_metadata("user_id", user_id)
        .with_metadata("session_type", session_type)
        .with_metadata("status", SessionStatus::Active.as_str());

        let state_record = MemoryRecord::with_base(
            SESSION_STATE_BASE,
            MemoryTier::ShortTerm,
            &session_id,
            ContextType::SessionState,
            serde_json::to_value(SessionState::active(now))?,
        )
        .with_importance(SESSION_IMPORTANCE)
        .with_metadata("user_id", user_id);

        self.storage.save(&session_record).await?;
        self.storage.save(&state_record).await?;

        info!(session_id = %session_id, user_id = %user_id, session_type = %session_type, "Created session");
        Ok(session_id)
    }

    /// Profile and state of a session, if it exists.
    pub async fn get_session_info(&self, session_id: &str) -> Result<Option<Session>> {
        let Some((_, profile)) = self.load_profile(session_id).await? else {
            return Ok(None);
        };
        let state = match self.load_state(session_id).await? {
            Some((_, state)) => state,
            None => SessionState::active(profile.created_at),
        };
        Ok(Some(Session { profile, state }))
    }

    /// Current state of a session.
    pub async fn get_state(&self, session_id: &str) -> Result<Option<SessionState>> {
        Ok(self.load_state(session_id).await?.map(|(_, state)| state))
    }

    /// Shallow-merge `partial` over the stored state and refresh
    /// `last_activity`. Returns false when the session does not exist.
    pub async fn update_session_state(&self, session_id: &str, partial: Metadata) -> Result<bool> {
        self.modify_state(session_id, |state| {
            let mut merged = match serde_json::to_value(&*state)? {
                Value::Object(map) => map,
                _ => Metadata::new(),
            };
            merged.extend(partial);
            *state = serde_json::from_value(Value::Object(merged))?;
            Ok(())
        })
        .await
    }

    /// Count one more message in the session.
    pub async fn record_message(&self, session_id: &str) -> Result<bool> {
        self.modify_state(session_id, |state| {
            state.message_count += 1;
            Ok(())
        })
        .await
    }

    /// Register a crew, replacing any earlier entry with the same id.
    pub async fn register_crew(
        &self,
        session_id: &str,
        crew_id: &str,
        crew_name: &str,
        agent_count: usize,
        process_type: &str,
        metadata: Metadata,
    ) -> Result<bool> {
        let entry = CrewEntry {
            id: crew_id.to_string(),
            name: crew_name.to_string(),
            agent_count,
            process_type: process_type.to_string(),
            registered_at: Utc::now(),
            task_count: 0,
            metadata,
        };
        let updated = self
            .modify_state(session_id, move |state| {
                state.crews.retain(|c| c.id != entry.id);
                state.crews.push(entry);
                Ok(())
            })
            .await?;
        if updated {
            debug!(session_id = %session_id, crew_id = %crew_id, "Registered crew");
        }
        Ok(updated)
    }

    /// Increment the task counter of a registered crew. Returns false when
    /// the session or the crew is unknown.
    pub async fn update_crew_task_count(&self, session_id: &str, crew_id: &str) -> Result<bool> {
        let Some((record, mut state)) = self.load_state(session_id).await? else {
            return Ok(false);
        };
        let Some(crew) = state.crews.iter_mut().find(|c| c.id == crew_id) else {
            return Ok(false);
        };
        crew.task_count += 1;
        state.last_activity = Utc::now();
        self.rewrite(record, serde_json::to_value(&state)?).await?;
        Ok(true)
    }

    /// Mark a session closed. Its records stay readable until retention
    /// removes them.
    pub async fn close_session(&self, session_id: &str) -> Result<bool> {
        let now = Utc::now();
        let Some((mut record, mut profile)) = self.load_profile(session_id).await? else {
            return Ok(false);
        };

        self.modify_state(session_id, |state| {
            state.status = SessionStatus::Closed;
            state.closed_at = Some(now);
            Ok(())
        })
        .await?;

        profile.status = SessionStatus::Closed;
        profile.closed_at = Some(now);
        record
            .metadata
            .insert("status".into(), Value::from(SessionStatus::Closed.as_str()));
        self.rewrite(record, serde_json::to_value(&profile)?).await?;

        info!(session_id = %session_id, "Closed session");
        Ok(true)
    }

    /// Active sessions with activity in the last `inactive_threshold_hours`,
    /// optionally for one user.
    pub async fn get_active_sessions(
        &self,
        user_id: Option<&str>,
        inactive_threshold_hours: i64,
    ) -> Result<Vec<Session>> {
        let mut filter = RecordFilter::new()
            .context_type(ContextType::Session)
            .attribute("status", SessionStatus::Active.as_str());
        if let Some(user) = user_id {
            filter = filter.attribute("user_id", user);
        }

        let cutoff = Utc::now() - Duration::hours(inactive_threshold_hours);
        let records = self
            .storage
            .search_structured(&filter, UNBOUNDED, None)
            .await?;

        let mut sessions = Vec::new();
        for record in records {
            let profile: SessionProfile = serde_json::from_value(record.payload)?;
            let Some((_, state)) = self.load_state(&profile.session_id).await? else {
                continue;
            };
            if state.status == SessionStatus::Active && state.last_activity >= cutoff {
                sessions.push(Session { profile, state });
            }
        }
        Ok(sessions)
    }

    /// Shallow-merge preferences into the session profile.
    pub async fn store_session_preferences(
        &self,
        session_id: &str,
        preferences: Metadata,
    ) -> Result<bool> {
        let Some((record, mut profile)) = self.load_profile(session_id).await? else {
            return Ok(false);
        };
        profile.preferences.extend(preferences);
        self.rewrite(record, serde_json::to_value(&profile)?).await?;
        Ok(true)
    }

    pub async fn get_session_preferences(&self, session_id: &str) -> Result<Option<Metadata>> {
        Ok(self
            .load_profile(session_id)
            .await?
            .map(|(_, profile)| profile.preferences))
    }

    async fn load_profile(&self, session_id: &str) -> Result<Option<(MemoryRecord, SessionProfile)>> {
        let key = build_key(SESSION_BASE, MemoryTier::ShortTerm, session_id);
        match self.storage.get(&key).await? {
            Some(record) => {
                let profile = serde_json::from_value(record.payload.clone())?;
                Ok(Some((record, profile)))
            }
            None => Ok(None),
        }
    }

    async fn load_state(&self, session_id: &str) -> Result<Option<(MemoryRecord, SessionState)>> {
        let key = build_key(SESSION_STATE_BASE, MemoryTier::ShortTerm, session_id);
        match self.storage.get(&key).await? {
            Some(record) => {
                let state = serde_json::from_value(record.payload.clone())?;
                Ok(Some((record, state)))
            }
            None => Ok(None),
        }
    }

    async fn modify_state<F>(&self, session_id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut SessionState) -> Result<()>,
    {
        let Some((record, mut state)) = self.load_state(session_id).await? else {
            return Ok(false);
        };
        f(&mut state)?;
        state.last_activity = Utc::now();
        self.rewrite(record, serde_json::to_value(&state)?).await?;
        Ok(true)
    }

    async fn rewrite(&self, mut record: MemoryRecord, payload: Value) -> Result<()> {
        record.payload = payload;
        self.storage.replace(&record).await
    }
}
