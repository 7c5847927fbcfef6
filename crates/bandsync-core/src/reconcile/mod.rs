//! Version conflict reconciliation and partial-patch merging.

mod patch;

pub use patch::{merge_patch, Patch, PatchField};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::models::VersionedRecord;

/// How to settle a client/server disagreement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    #[default]
    LastWriteWins,
    Manual,
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-write-wins" | "lww" => Ok(Self::LastWriteWins),
            "manual" => Ok(Self::Manual),
            other => Err(Error::InvalidInput(format!(
                "unknown resolution strategy '{other}'"
            ))),
        }
    }
}

/// Why a resolution came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionReason {
    ClientNewer,
    ServerNewer,
    ManualMergeRequired,
}

impl ResolutionReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientNewer => "client-newer",
            Self::ServerNewer => "server-newer",
            Self::ManualMergeRequired => "manual-merge-required",
        }
    }
}

impl fmt::Display for ResolutionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of `resolve_version_conflict`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub resolved: bool,
    pub record: VersionedRecord,
    pub reason: ResolutionReason,
}

/// Settle a disagreement between the client's and the server's copy of a record.
///
/// Under last-write-wins the client only wins when both timestamps parse and
/// the client's is strictly later; ties and malformed timestamps keep the
/// server record untouched. A winning client record is re-versioned past both
/// sides so the server accepts it as the next mutation.
pub fn resolve_version_conflict(
    client: &VersionedRecord,
    server: &VersionedRecord,
    strategy: ResolutionStrategy,
) -> Resolution {
    match strategy {
        ResolutionStrategy::Manual => Resolution {
            resolved: false,
            record: server.clone(),
            reason: ResolutionReason::ManualMergeRequired,
        },
        ResolutionStrategy::LastWriteWins => {
            let client_newer = matches!(
                (client.updated_at_parsed(), server.updated_at_parsed()),
                (Some(client_at), Some(server_at)) if client_at > server_at
            );

            if client_newer {
                Resolution {
                    resolved: true,
                    record: VersionedRecord {
                        version: client.version.max(server.version) + 1,
                        ..client.clone()
                    },
                    reason: ResolutionReason::ClientNewer,
                }
            } else {
                Resolution {
                    resolved: true,
                    record: server.clone(),
                    reason: ResolutionReason::ServerNewer,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(version: u64, updated_at: &str, title: &str) -> VersionedRecord {
        VersionedRecord::new("bk-1", version, updated_at, json!({ "title": title }))
    }

    #[test]
    fn newer_client_wins_with_bumped_version() {
        let client = record(3, "2026-03-10T18:00:01Z", "client");
        let server = record(5, "2026-03-10T18:00:00Z", "server");

        let resolution = resolve_version_conflict(&client, &server, ResolutionStrategy::default());
        assert!(resolution.resolved);
        assert_eq!(resolution.reason, ResolutionReason::ClientNewer);
        assert_eq!(resolution.record.version, 6);
        assert_eq!(resolution.record.data, json!({"title": "client"}));
    }

    #[test]
    fn newer_server_wins_unchanged() {
        let client = record(7, "2026-03-10T17:00:00Z", "client");
        let server = record(5, "2026-03-10T18:00:00Z", "server");

        let resolution =
            resolve_version_conflict(&client, &server, ResolutionStrategy::LastWriteWins);
        assert!(resolution.resolved);
        assert_eq!(resolution.reason, ResolutionReason::ServerNewer);
        assert_eq!(resolution.record, server);
    }

    #[test]
    fn equal_timestamps_keep_server_record() {
        let client = record(9, "2026-03-10T18:00:00Z", "client");
        let server = record(2, "2026-03-10T18:00:00Z", "server");

        let resolution =
            resolve_version_conflict(&client, &server, ResolutionStrategy::LastWriteWins);
        assert_eq!(resolution.reason, ResolutionReason::ServerNewer);
        assert_eq!(resolution.record, server);
    }

    #[test]
    fn equal_instants_in_different_offsets_are_ties() {
        let client = record(1, "2026-03-10T19:00:00+01:00", "client");
        let server = record(1, "2026-03-10T18:00:00Z", "server");

        let resolution =
            resolve_version_conflict(&client, &server, ResolutionStrategy::LastWriteWins);
        assert_eq!(resolution.reason, ResolutionReason::ServerNewer);
    }

    #[test]
    fn unparseable_timestamp_keeps_server_record() {
        let client = record(1, "not a date", "client");
        let server = record(1, "2020-01-01T00:00:00Z", "server");
        let resolution =
            resolve_version_conflict(&client, &server, ResolutionStrategy::LastWriteWins);
        assert_eq!(resolution.record, server);

        let client = record(1, "2030-01-01T00:00:00Z", "client");
        let server = record(1, "", "server");
        let resolution =
            resolve_version_conflict(&client, &server, ResolutionStrategy::LastWriteWins);
        assert_eq!(resolution.reason, ResolutionReason::ServerNewer);
        assert_eq!(resolution.record, server);
    }

    #[test]
    fn manual_never_auto_resolves() {
        let server = record(2, "2026-03-10T18:00:00Z", "server");
        for client_at in ["2030-01-01T00:00:00Z", "2000-01-01T00:00:00Z", "garbage"] {
            let client = record(1, client_at, "client");
            let resolution = resolve_version_conflict(&client, &server, ResolutionStrategy::Manual);
            assert!(!resolution.resolved);
            assert_eq!(resolution.record, server);
            assert_eq!(resolution.reason, ResolutionReason::ManualMergeRequired);
        }
    }

    #[test]
    fn strategy_parses_short_names() {
        assert_eq!(
            "lww".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::LastWriteWins
        );
        assert_eq!(
            "Manual".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::Manual
        );
        assert!("coin-flip".parse::<ResolutionStrategy>().is_err());
    }

    #[test]
    fn reason_wire_names() {
        assert_eq!(
            serde_json::to_value(ResolutionReason::ManualMergeRequired).unwrap(),
            json!("manual-merge-required")
        );
    }
}
