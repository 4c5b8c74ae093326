//! Status snapshot parsing
//!
//! Turns the raw text of a concentrator status file into a [`StatusSnapshot`]
//! and its [`GlobalAggregate`]. Parsing never touches persisted history.
//!
//! Components:
//! - `types`: the client record and snapshot data model.
//! - `parser`: the two-line grammar (client stats lines, address assignment lines).

pub mod parser;
pub mod types;


pub use parser::{parse, ParsedStatus};
pub use types::{ClientRecord, GlobalAggregate, StatusSnapshot};
