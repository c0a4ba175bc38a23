//! Error Handling Module
//!
//! This module defines custom error types for dmarcwatch using the `thiserror` crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("DNS error: {0}")]
    Dns(#[from] hickory_resolver::error::ResolveError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Mail build error: {0}")]
    Mail(#[from] lettre::error::Error),

    #[error("Address error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("File too large: {0}")]
    FileTooLarge(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
