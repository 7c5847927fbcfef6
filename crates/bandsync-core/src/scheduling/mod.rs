//! Scheduling conflict detection.
//!
//! Validates a proposed booking window against member availability, existing
//! member commitments and travel on the band calendar. Everything here is a
//! pure function over in-memory snapshots: call it synchronously before
//! confirming or updating a booking, and again whenever the schedule, lineup
//! or availability changes.
//!
//! Windows are half-open: a window ending exactly when another starts does
//! not overlap it.

use serde::{Deserialize, Serialize};

use crate::models::{
    AvailabilityEntry, AvailabilityStatus, CalendarWindow, CommitmentWindow, EventCategory,
    ProposedWindow, TimeWindow,
};

/// Snapshot of everything `detect` looks at
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionInput {
    pub proposed_window: Option<ProposedWindow>,
    /// Event being edited; its own commitments and calendar entry are ignored
    #[serde(default)]
    pub target_event_id: Option<String>,
    #[serde(default)]
    pub lineup_member_ids: Vec<String>,
    #[serde(default)]
    pub availability: Vec<AvailabilityEntry>,
    #[serde(default)]
    pub commitments: Vec<CommitmentWindow>,
    #[serde(default)]
    pub calendar_events: Vec<CalendarWindow>,
}

/// A lineup member with commitments overlapping the proposed window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoubleBooking {
    pub member_id: String,
    pub overlaps: Vec<CommitmentWindow>,
}

/// Result of a conflict check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConflicts {
    pub unavailable_members: Vec<String>,
    /// Members who answered MAYBE; informational, never blocking
    pub tentative_members: Vec<String>,
    pub double_booked_members: Vec<DoubleBooking>,
    pub travel_overlaps: Vec<CalendarWindow>,
}

impl ScheduleConflicts {
    /// Whether the booking should not be confirmed as-is
    pub fn has_blocking_conflicts(&self) -> bool {
        !self.unavailable_members.is_empty()
            || !self.double_booked_members.is_empty()
            || !self.travel_overlaps.is_empty()
    }
}

/// Half-open overlap test: `a.start < b.end && a.end > b.start`
pub fn overlaps(a: &impl TimeWindow, b: &impl TimeWindow) -> bool {
    a.starts_at() < b.ends_at() && a.ends_at() > b.starts_at()
}

/// Check a proposed window against availability, commitments and travel.
pub fn detect(
    window: &ProposedWindow,
    target_event_id: Option<&str>,
    lineup_member_ids: &[String],
    availability: &[AvailabilityEntry],
    commitments: &[CommitmentWindow],
    calendar_events: &[CalendarWindow],
) -> ScheduleConflicts {
    let is_target = |id: &str| target_event_id.is_some_and(|target| target == id);
    let lineup = unique_in_order(lineup_member_ids);

    let members_with_status = |status: AvailabilityStatus| {
        lineup
            .iter()
            .filter(|member_id| {
                availability
                    .iter()
                    .any(|entry| entry.member_id == **member_id && entry.status == status)
            })
            .map(|member_id| (*member_id).to_string())
            .collect::<Vec<_>>()
    };

    let double_booked_members = lineup
        .iter()
        .filter_map(|member_id| {
            let hits = commitments
                .iter()
                .filter(|commitment| commitment.member_id == **member_id)
                .filter(|commitment| !is_target(commitment.event_id.as_str()))
                .filter(|commitment| overlaps(window, *commitment))
                .cloned()
                .collect::<Vec<_>>();
            (!hits.is_empty()).then(|| DoubleBooking {
                member_id: (*member_id).to_string(),
                overlaps: hits,
            })
        })
        .collect();

    let travel_overlaps = calendar_events
        .iter()
        .filter(|event| event.category == EventCategory::Travel)
        .filter(|event| !is_target(event.id.as_str()))
        .filter(|event| overlaps(window, *event))
        .cloned()
        .collect();

    ScheduleConflicts {
        unavailable_members: members_with_status(AvailabilityStatus::Unavailable),
        tentative_members: members_with_status(AvailabilityStatus::Maybe),
        double_booked_members,
        travel_overlaps,
    }
}

/// Run `detect` over a deserialized snapshot.
///
/// A snapshot without a proposed window has nothing to check.
pub fn detect_snapshot(input: &DetectionInput) -> ScheduleConflicts {
    let Some(window) = input.proposed_window.as_ref() else {
        return ScheduleConflicts::default();
    };
    detect(
        window,
        input.target_event_id.as_deref(),
        &input.lineup_member_ids,
        &input.availability,
        &input.commitments,
        &input.calendar_events,
    )
}

fn unique_in_order(ids: &[String]) -> Vec<&str> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(&id.as_str()) {
            seen.push(id.as_str());
        }
    }
    seen
}
