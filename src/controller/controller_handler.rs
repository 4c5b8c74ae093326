use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::browser::Browser;
use crate::configuration::config::{Config, Mode};
use crate::error_handling::types::*;
use crate::reporter::{render_session, SessionView};
use crate::status_parser::parser::{declared_update_time, parse};
use crate::status_parser::ParsedStatus;
use crate::storage::{open_store, HistoryStore};

pub struct Controller {
    pub config: Config,
}

impl Controller {
    pub fn new(config: Config) -> Self {
        debug!("Controller created with {:?}", config);
        Self { config }
    }

    /// Runs the selected mode against the process stdio.
    pub fn run(&self) -> Result<(), ControllerError> {
        let now = Utc::now().timestamp();
        match &self.config.mode {
            Mode::Ingest(path) => {
                let stdout = io::stdout();
                self.ingest(path, &mut stdout.lock(), now)
            }
            Mode::Browse => self.browse(now),
        }
    }

    /// Reads one snapshot, folds it into history and prints every client.
    ///
    /// Only an unreadable input or a malformed timestamp is fatal; history
    /// failures are logged and the report is still printed.
    pub fn ingest<W: Write>(&self, path: &Path, out: &mut W, now: i64) -> Result<(), ControllerError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ControllerError::InputUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        writeln!(out, "Stats Last Updated: {}", declared_update_time(&raw))?;

        let parsed = parse(&raw)?;
        info!(
            "Parsed {} client(s) from {}",
            parsed.snapshot.len(),
            path.display()
        );
        if !parsed.issues.is_empty() {
            warn!(
                "Skipped {} unmatched assignment line(s) in {}",
                parsed.issues.len(),
                path.display()
            );
        }

        match open_store(&self.config.storage) {
            Ok(Some(store)) => {
                if let Err(e) = record(store.as_ref(), &parsed) {
                    error!("Failed to update history: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("History unavailable, continuing without it: {}", e),
        }

        for client in parsed.snapshot.clients() {
            writeln!(
                out,
                "{}",
                render_session(&SessionView::from_client(client), self.config.style, now)
            )?;
        }
        Ok(())
    }

    fn browse(&self, now: i64) -> Result<(), ControllerError> {
        let Some(store) = open_store(&self.config.storage)? else {
            println!("History storage is disabled, nothing to browse.");
            return Ok(());
        };
        let stdin = io::stdin();
        let stdout = io::stdout();
        Browser::new(store.as_ref(), stdin.lock(), stdout.lock(), self.config.style).run(now)
    }
}

fn record(store: &dyn HistoryStore, parsed: &ParsedStatus) -> Result<(), StorageError> {
    let facts = store.reconcile(&parsed.snapshot)?;
    debug!("Reconciled {} fact(s)", facts.len());
    store.save_global(&parsed.aggregate)
}
