//! Scheduling snapshot types consumed by conflict detection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Anything with a half-open `[starts_at, ends_at)` time span
pub trait TimeWindow {
    fn starts_at(&self) -> DateTime<Utc>;
    fn ends_at(&self) -> DateTime<Utc>;
}

/// Window being proposed for a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl ProposedWindow {
    pub const fn new(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        Self { starts_at, ends_at }
    }
}

/// Calendar category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventCategory {
    Gig,
    Rehearsal,
    Travel,
    Other,
}

/// An existing calendar event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarWindow {
    pub id: String,
    pub category: EventCategory,
    #[serde(default)]
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Member availability answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AvailabilityStatus {
    Available,
    Maybe,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityEntry {
    pub member_id: String,
    pub status: AvailabilityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A member's existing commitment to some event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentWindow {
    pub member_id: String,
    pub event_id: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl TimeWindow for ProposedWindow {
    fn starts_at(&self) -> DateTime<Utc> {
        self.starts_at
    }

    fn ends_at(&self) -> DateTime<Utc> {
        self.ends_at
    }
}

impl TimeWindow for CalendarWindow {
    fn starts_at(&self) -> DateTime<Utc> {
        self.starts_at
    }

    fn ends_at(&self) -> DateTime<Utc> {
        self.ends_at
    }
}

impl TimeWindow for CommitmentWindow {
    fn starts_at(&self) -> DateTime<Utc> {
        self.starts_at
    }

    fn ends_at(&self) -> DateTime<Utc> {
        self.ends_at
    }
}
