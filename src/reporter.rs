//! Text rendering of client sessions and global totals.
//!
//! Rendering is pure: callers pass the reference time used for session
//! lengths so that output is reproducible.

use serde::Serialize;

use crate::formatting::{format_bytes, join_duration};
use crate::status_parser::types::{ClientRecord, GlobalAggregate};
use crate::storage::types::{StatsFact, UserIdentity};
use crate::timestamp::LocaleTimestamp;

const MISSING: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStyle {
    /// One line per record
    Plain,
    /// Multi-line outline
    Tree,
    /// One JSON object per record
    Json,
}

impl RenderStyle {
    /// Maps the CLI layout flag. Unknown values fall back to `Plain`.
    pub fn from_flag(flag: &str) -> Self {
        match flag.trim().to_ascii_lowercase().as_str() {
            "1" | "pretty" | "tree" => RenderStyle::Tree,
            "json" => RenderStyle::Json,
            _ => RenderStyle::Plain,
        }
    }
}

/// Borrowed view over either a live client record or a stored fact.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView<'a> {
    pub common_name: &'a str,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub virtual_address: Option<&'a str>,
    pub virtual_assigned_at: Option<&'a str>,
    pub real_address: &'a str,
    #[serde(skip)]
    pub connected_since: &'a LocaleTimestamp,
}

impl<'a> SessionView<'a> {
    pub fn from_client(client: &'a ClientRecord) -> Self {
        Self {
            common_name: &client.common_name,
            bytes_received: client.bytes_received,
            bytes_sent: client.bytes_sent,
            virtual_address: client.virtual_address.as_deref(),
            virtual_assigned_at: client.virtual_assigned_at.as_ref().map(|t| t.text.as_str()),
            real_address: &client.real_address,
            connected_since: &client.connected_since,
        }
    }

    pub fn from_fact(fact: &'a StatsFact) -> Self {
        Self {
            common_name: &fact.user.common_name,
            bytes_received: fact.bytes_received,
            bytes_sent: fact.bytes_sent,
            virtual_address: Some(&fact.assignment.address),
            virtual_assigned_at: Some(&fact.assignment.assigned_at.text),
            real_address: &fact.connection.address,
            connected_since: &fact.connection.connected_since,
        }
    }

    fn bytes_total(&self) -> u64 {
        self.bytes_received.saturating_add(self.bytes_sent)
    }

    /// Seconds between connection start and `now`, clamped at zero.
    fn session_seconds(&self, now: i64) -> u64 {
        (now - self.connected_since.epoch).max(0) as u64
    }
}

#[derive(Serialize)]
struct SessionJson<'a> {
    #[serde(flatten)]
    view: &'a SessionView<'a>,
    bytes_total: u64,
    connected_since: &'a str,
    connected_since_epoch: i64,
    session_seconds: u64,
}

/// Renders one session; `Tree` output spans several lines, the others one.
pub fn render_session(view: &SessionView<'_>, style: RenderStyle, now: i64) -> String {
    let session_length = join_duration(view.session_seconds(now));
    let vip = view.virtual_address.unwrap_or(MISSING);
    let vip_time = view.virtual_assigned_at.unwrap_or(MISSING);

    match style {
        RenderStyle::Plain => format!(
            "{}: {} bytes sent, {} received ({} total) on VPN IP {} (assigned on {}) while connecting from {} (connected since {} [total session length: {}]).",
            view.common_name,
            format_bytes(view.bytes_sent),
            format_bytes(view.bytes_received),
            format_bytes(view.bytes_total()),
            vip,
            vip_time,
            view.real_address,
            view.connected_since.text,
            session_length
        ),
        RenderStyle::Tree => [
            format!("+ {}", view.common_name),
            "|+ -- Data:".to_string(),
            format!("|     -- In:\t\t\t{}", format_bytes(view.bytes_received)),
            format!("|     -- Out:\t\t\t{}", format_bytes(view.bytes_sent)),
            format!("|     -- Total:\t\t\t{}", format_bytes(view.bytes_total())),
            "|+ -- VPN:".to_string(),
            format!("|     -- IP:\t\t\t{}", vip),
            format!("|     -- Date Given:\t\t{}", vip_time),
            "|+ -- Network:".to_string(),
            format!("|     -- Real IP:\t\t{}", view.real_address),
            format!("|     -- Date Connected:\t{}", view.connected_since.text),
            format!("|     -- Total Session Time:\t{}", session_length),
        ]
        .join("\n"),
        RenderStyle::Json => {
            let json = SessionJson {
                view,
                bytes_total: view.bytes_total(),
                connected_since: &view.connected_since.text,
                connected_since_epoch: view.connected_since.epoch,
                session_seconds: view.session_seconds(now),
            };
            serde_json::to_string(&json).unwrap_or_default()
        }
    }
}

/// Renders the global totals; `users` is listed in the `Tree` layout only.
pub fn render_global(aggregate: &GlobalAggregate, users: &[UserIdentity], style: RenderStyle) -> String {
    let total = aggregate.bytes_total();
    match style {
        RenderStyle::Plain => format!(
            "{}: {} bytes sent ({}), {} bytes received ({}), total of {} bytes ({}).  Total users connected: {}",
            aggregate.snapshot_timestamp,
            aggregate.bytes_sent,
            format_bytes(aggregate.bytes_sent),
            aggregate.bytes_received,
            format_bytes(aggregate.bytes_received),
            total,
            format_bytes(total),
            aggregate.client_count
        ),
        RenderStyle::Tree => {
            let mut lines = vec![
                format!("+ {}", aggregate.snapshot_timestamp),
                "|+ -- Data:".to_string(),
                format!("|     -- In:\t\t\t{} bytes ({})", aggregate.bytes_received, format_bytes(aggregate.bytes_received)),
                format!("|     -- Out:\t\t\t{} bytes ({})", aggregate.bytes_sent, format_bytes(aggregate.bytes_sent)),
                format!("|     -- Total:\t\t\t{} bytes ({})", total, format_bytes(total)),
                "|+ -- Users:".to_string(),
                format!("|     -- Total:\t\t\t{}", aggregate.client_count),
            ];
            lines.extend(
                users
                    .iter()
                    .map(|user| format!("|     -- User (CN):\t\t{}", user.common_name)),
            );
            lines.join("\n")
        }
        RenderStyle::Json => serde_json::to_string(aggregate).unwrap_or_default(),
    }
}
