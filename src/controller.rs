//! Top-level orchestration of one invocation: ingest a snapshot or browse history.

pub mod controller_handler;

pub use controller_handler::Controller;
