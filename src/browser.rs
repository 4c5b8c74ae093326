//! Interactive, read-only browsing of stored history.
//!
//! Lists known users, lets the operator pick one (or the global totals), then
//! one of that user's stored connections, and renders it. Invalid choices
//! re-prompt; end of input ends the session quietly.

use std::io::{BufRead, Write};

use log::debug;

use crate::error_handling::types::ControllerError;
use crate::reporter::{render_global, render_session, RenderStyle, SessionView};
use crate::storage::storage_trait::HistoryStore;

pub struct Browser<'s, R, W> {
    store: &'s dyn HistoryStore,
    input: R,
    output: W,
    style: RenderStyle,
}

impl<'s, R: BufRead, W: Write> Browser<'s, R, W> {
    pub fn new(store: &'s dyn HistoryStore, input: R, output: W, style: RenderStyle) -> Self {
        Self {
            store,
            input,
            output,
            style,
        }
    }

    /// Runs one browse session. `now` is used for session lengths.
    pub fn run(&mut self, now: i64) -> Result<(), ControllerError> {
        let users = self.store.list_users()?;
        if users.is_empty() {
            writeln!(self.output, "Could not find any stored history.")?;
            return Ok(());
        }

        for (i, user) in users.iter().enumerate() {
            writeln!(self.output, "[{}] {}", i + 1, user.common_name)?;
        }
        writeln!(self.output, "\n[0] Global Statistics")?;

        let Some(choice) = self.prompt(
            "> Enter the ID for the user you would like to view statistics for: ",
            users.len(),
        )?
        else {
            return Ok(());
        };

        if choice == 0 {
            match self.store.load_global()? {
                Some(aggregate) => {
                    writeln!(self.output, "{}", render_global(&aggregate, &users, self.style))?
                }
                None => writeln!(self.output, "No global statistics recorded yet.")?,
            }
            return Ok(());
        }

        let user = &users[choice - 1];
        let facts = self.store.list_facts(user)?;
        debug!("Browsing {} record(s) for {}", facts.len(), user.common_name);
        if facts.is_empty() {
            writeln!(self.output, "Could not find any records for {}.", user.common_name)?;
            return Ok(());
        }

        for (i, fact) in facts.iter().enumerate() {
            writeln!(self.output, "[{}] {}", i + 1, fact.connection.connected_since.text)?;
        }
        let Some(choice) = self.prompt(
            "> Enter the ID for the date you would like to view: ",
            facts.len(),
        )?
        else {
            return Ok(());
        };
        // 0 is not a date entry; treat it like the first one
        let fact = &facts[choice.max(1) - 1];
        writeln!(
            self.output,
            "{}",
            render_session(&SessionView::from_fact(fact), self.style, now)
        )?;
        Ok(())
    }

    /// Reads choices until one in `0..=max` is entered. `None` on end of input.
    fn prompt(&mut self, message: &str, max: usize) -> Result<Option<usize>, ControllerError> {
        let mut line = String::new();
        loop {
            write!(self.output, "{}", message)?;
            self.output.flush()?;
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                writeln!(self.output)?;
                return Ok(None);
            }
            match line.trim().parse::<usize>() {
                Ok(choice) if choice <= max => return Ok(Some(choice)),
                _ => debug!("Rejected choice {:?}", line.trim()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_parser::parse;
    use crate::storage::file_storage::FlatFileStore;
    use std::io::Cursor;
    use tempfile::TempDir;

    const SNAPSHOT: &str = "OpenVPN CLIENT LIST
Updated,Thu Oct  3 15:32:00 2013
alice,203.0.113.5:1194,1000,2000,Thu Oct  3 15:31:08 2013
bob,198.51.100.7:40112,10,20,Wed Oct  2 08:00:00 2013
10.8.0.2,alice,203.0.113.5:1194,Thu Oct  3 15:31:09 2013
10.8.0.6,bob,198.51.100.7:40112,Wed Oct  2 08:00:01 2013
";

    fn seeded_store(dir: &TempDir) -> FlatFileStore {
        let store = FlatFileStore::open(dir.path()).unwrap();
        let parsed = parse(SNAPSHOT).unwrap();
        store.reconcile(&parsed.snapshot).unwrap();
        store.save_global(&parsed.aggregate).unwrap();
        store
    }

    fn browse(store: &dyn HistoryStore, input: &str) -> String {
        let mut out = Vec::new();
        Browser::new(store, Cursor::new(input.to_string()), &mut out, RenderStyle::Plain)
            .run(0)
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_browse_user_record_after_invalid_choices() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let out = browse(&store, "7\nabc\n1\n1\n");

        assert!(out.starts_with("[1] alice\n[2] bob\n\n[0] Global Statistics\n"));
        assert_eq!(out.matches("> Enter the ID for the user").count(), 3);
        assert!(out.contains("[1] Thu Oct  3 15:31:08 2013\n"));
        assert!(out.contains("alice: 1.95 KB bytes sent, 1000 B received"));
    }

    #[test]
    fn test_browse_global_statistics() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let out = browse(&store, "0\n");

        assert!(out.contains(
            "Thu Oct  3 15:32:00 2013: 2020 bytes sent (1.97 KB), 1010 bytes received (1010 B)"
        ));
        assert!(out.contains("Total users connected: 2"));
    }

    #[test]
    fn test_browse_ends_quietly_on_eof() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let out = browse(&store, "");
        assert!(out.ends_with("statistics for: \n"));
    }

    #[test]
    fn test_browse_empty_history() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        assert_eq!(browse(&store, "1\n"), "Could not find any stored history.\n");
    }
}
