pub mod browser;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod formatting;
pub mod reporter;
pub mod status_parser;
pub mod storage;
pub mod timestamp;

pub use controller::Controller;
