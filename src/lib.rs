//! dmarcwatch Library
//!
//! This library provides the core functionality for dmarcwatch: unpacking
//! DMARC report attachments, extracting authentication verdicts, fetching and
//! diffing DNS trust records, and formatting/delivering alerts. The binary in
//! `main.rs` wires these into a CLI and the polling daemon.

pub mod alert;
pub mod config;
pub mod daemon;
pub mod diff;
pub mod dns;
pub mod error;
pub mod mailbox;
pub mod models;
pub mod report;
pub mod store;
pub mod unpack;
pub mod xml_parser;

pub use config::Config;
pub use report::evaluate;
pub use unpack::unpack;
pub use xml_parser::extract_verdicts;
