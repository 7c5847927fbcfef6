use bandsync_core::sync::{CycleOutcome, CycleReport};

use crate::commands::common::{open_client, short_id, CliPaths};
use crate::error::CliError;

pub async fn run_sync(as_json: bool, paths: &CliPaths) -> Result<(), CliError> {
    let client = open_client(paths)?;
    let outcome = client.run_cycle().await?;

    let CycleOutcome::Completed(report) = outcome else {
        println!("Sync already running; it will pick up this request.");
        return Ok(());
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for line in format_report_lines(&report) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_report_lines(report: &CycleReport) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Pushed {} operation(s): {} accepted, {} conflicted, {} rejected",
            report.pushed,
            report.accepted,
            report.conflicts,
            report.rejected.len()
        ),
        format!(
            "Pulled {} change(s): {} applied, {} already current",
            report.pulled, report.applied, report.stale
        ),
    ];
    for rejection in &report.rejected {
        lines.push(format!(
            "  rejected {}: {}",
            short_id(&rejection.client_id.to_string()),
            rejection.reason
        ));
    }
    if report.conflicts > 0 {
        lines.push("Run `bandsync conflicts` to review new conflicts.".to_string());
    }
    lines
}
