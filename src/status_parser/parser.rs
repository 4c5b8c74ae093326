//! Two-line grammar of the concentrator status file.
//!
//! Every line is trimmed and tried against the client stats pattern first,
//! then against the address assignment pattern. Anything else (titles,
//! column headers, section banners) is ignored.
//!
//! ```text
//! Updated,Thu Oct  3 15:31:08 2013
//! alice,203.0.113.5:1194,1000,2000,Thu Oct  3 15:31:08 2013      <- stats line
//! 10.8.0.2,alice,203.0.113.5:1194,Thu Oct  3 15:31:09 2013       <- assignment line
//! ```
//!
//! Stats lines must precede the assignment lines that reference them. An
//! assignment for a client that has not been seen yet is reported as
//! [`ParseError::OrphanAssignment`] and skipped.

use std::sync::LazyLock;

use log::{debug, trace, warn};
use regex::Regex;

use super::types::{ClientRecord, GlobalAggregate, StatusSnapshot};
use crate::error_handling::types::ParseError;
use crate::timestamp::LocaleTimestamp;

/// `commonName,ipv4:port,bytesReceived,bytesSent,connectedSince`
static STATS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^([a-z0-9_-]+),([0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}):[0-9]{1,5},([0-9]+),([0-9]+),(.*)$",
    )
    .expect("stats line pattern is valid")
});

/// `virtualIpv4,commonName,<field without commas>,assignedAt`
static ASSIGNMENT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}),([a-zA-Z0-9_-]+),[^,]+,(.*)$",
    )
    .expect("assignment line pattern is valid")
});

/// Output of a successful parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatus {
    pub snapshot: StatusSnapshot,
    pub aggregate: GlobalAggregate,
    /// Recoverable problems; each one corresponds to a skipped line
    pub issues: Vec<ParseError>,
}

/// Parses raw status file text.
///
/// The snapshot timestamp is the second comma-separated field of the second
/// line (empty when the file is too short to carry one).
///
/// Errors
/// - [`ParseError::MalformedTimestamp`] if a matched date field cannot be converted.
pub fn parse(raw: &str) -> Result<ParsedStatus, ParseError> {
    let snapshot_timestamp = declared_update_time(raw);
    let mut snapshot = StatusSnapshot::new(snapshot_timestamp.clone());
    let mut aggregate = GlobalAggregate {
        snapshot_timestamp,
        ..Default::default()
    };
    let mut issues = Vec::new();

    for (i, line) in raw.lines().enumerate() {
        let line_number = i + 1;
        let line = line.trim();

        if let Some(caps) = STATS_LINE.captures(line) {
            let common_name = &caps[1];
            if snapshot.get(common_name).is_some() {
                debug!(
                    "Ignoring duplicate stats line {} for {}",
                    line_number, common_name
                );
                continue;
            }
            let (Ok(bytes_received), Ok(bytes_sent)) =
                (caps[3].parse::<u64>(), caps[4].parse::<u64>())
            else {
                warn!(
                    "Ignoring stats line {} for {}: byte counter out of range",
                    line_number, common_name
                );
                continue;
            };
            let record = ClientRecord {
                common_name: common_name.to_string(),
                real_address: caps[2].to_string(),
                bytes_received,
                bytes_sent,
                connected_since: LocaleTimestamp::parse(&caps[5])?,
                virtual_address: None,
                virtual_assigned_at: None,
            };
            trace!("Stats line {}: {:?}", line_number, record);
            aggregate.bytes_received = aggregate.bytes_received.saturating_add(bytes_received);
            aggregate.bytes_sent = aggregate.bytes_sent.saturating_add(bytes_sent);
            aggregate.client_count += 1;
            snapshot.insert_first(record);
        } else if let Some(caps) = ASSIGNMENT_LINE.captures(line) {
            let common_name = &caps[2];
            let Some(record) = snapshot.get_mut(common_name) else {
                let issue = ParseError::OrphanAssignment {
                    common_name: common_name.to_string(),
                    line: line_number,
                };
                warn!("{}, skipping", issue);
                issues.push(issue);
                continue;
            };
            let assigned_at = LocaleTimestamp::parse(&caps[3])?;
            trace!(
                "Assignment line {}: {} -> {}",
                line_number,
                common_name,
                &caps[1]
            );
            record.virtual_address = Some(caps[1].to_string());
            record.virtual_assigned_at = Some(assigned_at);
        }
    }

    debug!(
        "Parsed {} client(s), {} skipped line(s)",
        snapshot.len(),
        issues.len()
    );
    Ok(ParsedStatus {
        snapshot,
        aggregate,
        issues,
    })
}

/// Second field of the second line, e.g. `Updated,<time>`.
pub fn declared_update_time(raw: &str) -> String {
    raw.lines()
        .nth(1)
        .and_then(|line| line.trim().split(',').nth(1))
        .unwrap_or_default()
        .to_string()
}
