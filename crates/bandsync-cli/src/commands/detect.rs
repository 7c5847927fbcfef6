use std::io::{self, Read};
use std::path::Path;

use bandsync_core::scheduling::{detect_snapshot, DetectionInput, ScheduleConflicts};

use crate::error::CliError;

pub fn run_detect(snapshot_path: &Path, as_json: bool) -> Result<(), CliError> {
    let raw = read_snapshot(snapshot_path)?;
    let input = serde_json::from_str::<DetectionInput>(&raw)
        .map_err(|error| CliError::InvalidArgument(format!("invalid snapshot: {error}")))?;
    if input.proposed_window.is_none() {
        return Err(CliError::InvalidArgument(
            "snapshot has no proposedWindow to check".to_string(),
        ));
    }

    let conflicts = detect_snapshot(&input);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
    } else {
        for line in format_conflict_summary(&conflicts) {
            println!("{line}");
        }
    }

    if conflicts.has_blocking_conflicts() {
        std::process::exit(2);
    }
    Ok(())
}

fn read_snapshot(path: &Path) -> Result<String, CliError> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

pub fn format_conflict_summary(conflicts: &ScheduleConflicts) -> Vec<String> {
    let mut lines = Vec::new();
    if !conflicts.unavailable_members.is_empty() {
        lines.push(format!(
            "Unavailable: {}",
            conflicts.unavailable_members.join(", ")
        ));
    }
    for booking in &conflicts.double_booked_members {
        let events = booking
            .overlaps
            .iter()
            .map(|commitment| commitment.event_id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Double-booked: {} ({events})", booking.member_id));
    }
    for travel in &conflicts.travel_overlaps {
        let title = if travel.title.is_empty() {
            travel.id.as_str()
        } else {
            travel.title.as_str()
        };
        lines.push(format!(
            "Travel overlap: {title} {} - {}",
            travel.starts_at.format("%Y-%m-%d %H:%M"),
            travel.ends_at.format("%Y-%m-%d %H:%M")
        ));
    }
    if !conflicts.tentative_members.is_empty() {
        lines.push(format!(
            "Tentative: {}",
            conflicts.tentative_members.join(", ")
        ));
    }
    if !conflicts.has_blocking_conflicts() {
        lines.push("No blocking conflicts.".to_string());
    }
    lines
}
