//! Core domain model and change detection for profile handle tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "pht-core";

/// Extracted, ephemeral view of a profile for one fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub identity_id: String,
    pub handle: String,
    pub display_name: String,
    /// Upstream user object, passed through to the caller untouched.
    pub user: JsonValue,
    /// Upstream statistics object; surfaced but never persisted.
    pub stats: JsonValue,
    pub extractor_version: String,
}

impl ProfileSnapshot {
    pub fn observed_fields(&self) -> ObservedFields {
        ObservedFields {
            handle: self.handle.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// The tracked identity fields as seen by one lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedFields {
    pub handle: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    Handle,
    DisplayName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub field: TrackedField,
    pub prior_value: String,
    pub new_value: String,
    pub changed_at: DateTime<Utc>,
}

/// At most one transition per tracked field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionSet {
    pub handle: Option<Transition>,
    pub display_name: Option<Transition>,
}

impl TransitionSet {
    pub fn is_empty(&self) -> bool {
        self.handle.is_none() && self.display_name.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.handle.iter().chain(self.display_name.iter())
    }

    pub fn fields(&self) -> Vec<TrackedField> {
        self.iter().map(|t| t.field).collect()
    }
}

/// Persisted change history for one identity.
///
/// Serialized with the field names the lookup API has always returned, so
/// existing clients can read `history` without changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "userId")]
    pub identity_id: String,
    #[serde(rename = "currentUsername")]
    pub current_handle: String,
    #[serde(rename = "currentNickname")]
    pub current_display_name: String,
    #[serde(rename = "previousUsername")]
    pub previous_handle: String,
    #[serde(rename = "previousNickname")]
    pub previous_display_name: String,
    #[serde(rename = "usernameLastChanged")]
    pub handle_last_changed: Option<DateTime<Utc>>,
    #[serde(rename = "nicknameLastChanged")]
    pub display_name_last_changed: Option<DateTime<Utc>>,
    #[serde(rename = "firstSeen")]
    pub first_observed: DateTime<Utc>,
    #[serde(rename = "checkCount")]
    pub observation_count: i64,
}

impl HistoryRecord {
    /// Record created by the first successful lookup of an identity.
    pub fn first_observation(
        identity_id: impl Into<String>,
        observed: &ObservedFields,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            identity_id: identity_id.into(),
            current_handle: observed.handle.clone(),
            current_display_name: observed.display_name.clone(),
            previous_handle: String::new(),
            previous_display_name: String::new(),
            handle_last_changed: None,
            display_name_last_changed: None,
            first_observed: now,
            observation_count: 1,
        }
    }

    /// Applies one observation to an existing record.
    ///
    /// Only fields named in `transitions` touch their `previous_*` value and
    /// timestamp; `first_observed` is never modified.
    pub fn apply_observation(&mut self, observed: &ObservedFields, transitions: &TransitionSet) {
        if let Some(t) = &transitions.handle {
            self.previous_handle = t.prior_value.clone();
            self.handle_last_changed = Some(t.changed_at);
        }
        if let Some(t) = &transitions.display_name {
            self.previous_display_name = t.prior_value.clone();
            self.display_name_last_changed = Some(t.changed_at);
        }
        self.current_handle = observed.handle.clone();
        self.current_display_name = observed.display_name.clone();
        self.observation_count = self.observation_count.saturating_add(1);
    }
}

/// Compares a fresh observation against the stored record.
///
/// A field changed iff a record exists and its stored current value differs
/// from the observed one. No normalization is applied.
pub fn detect_changes(
    existing: Option<&HistoryRecord>,
    observed: &ObservedFields,
    now: DateTime<Utc>,
) -> TransitionSet {
    let Some(record) = existing else {
        return TransitionSet::default();
    };

    let transition = |field, stored: &str, fresh: &str| {
        (stored != fresh).then(|| Transition {
            field,
            prior_value: stored.to_string(),
            new_value: fresh.to_string(),
            changed_at: now,
        })
    };

    TransitionSet {
        handle: transition(TrackedField::Handle, &record.current_handle, &observed.handle),
        display_name: transition(
            TrackedField::DisplayName,
            &record.current_display_name,
            &observed.display_name,
        ),
    }
}

/// Result of recording one observation in a history store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservationOutcome {
    pub record: HistoryRecord,
    pub transitions: TransitionSet,
    pub created: bool,
}

/// Shared body of every store's atomic unit: detect against the stored record
/// (if any) and produce the record to persist.
pub fn observe(
    existing: Option<HistoryRecord>,
    identity_id: &str,
    observed: &ObservedFields,
    now: DateTime<Utc>,
) -> ObservationOutcome {
    match existing {
        None => ObservationOutcome {
            record: HistoryRecord::first_observation(identity_id, observed, now),
            transitions: TransitionSet::default(),
            created: true,
        },
        Some(mut record) => {
            let transitions = detect_changes(Some(&record), observed, now);
            record.apply_observation(observed, &transitions);
            ObservationOutcome {
                record,
                transitions,
                created: false,
            }
        }
    }
}
