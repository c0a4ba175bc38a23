//! Mailbox Module
//!
//! Inbound message intake behind the `MailSource` seam. The IMAP transport
//! lives outside this crate; the shipped implementation reads a local spool
//! directory where each subdirectory is one message (directory name as uid,
//! contained files as attachments, directory mtime as the message timestamp)
//! and moves handled messages into a processed directory.

use crate::error::Result;
use crate::models::{InboundMessage, RawAttachment};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;

/// Source of inbound messages for the report pipeline.
pub trait MailSource {
    /// Lists messages not yet handled, oldest naming first.
    fn fetch_unseen(&mut self) -> Result<Vec<InboundMessage>>;
    /// Marks a message as handled so it is not returned again.
    fn mark_processed(&mut self, uid: &str) -> Result<()>;
}

/// Directory-based mail source.
pub struct SpoolSource {
    incoming: PathBuf,
    processed: PathBuf,
}

impl SpoolSource {
    pub fn new(incoming: impl Into<PathBuf>, processed: impl Into<PathBuf>) -> Self {
        Self {
            incoming: incoming.into(),
            processed: processed.into(),
        }
    }
}

impl MailSource for SpoolSource {
    fn fetch_unseen(&mut self) -> Result<Vec<InboundMessage>> {
        if !self.incoming.exists() {
            return Ok(Vec::new());
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.incoming)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        let mut messages = Vec::new();
        for dir in dirs {
            let uid = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let date = fs::metadata(&dir)
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .collect();
            files.sort();

            let mut attachments = Vec::with_capacity(files.len());
            for file in files {
                let filename = file
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                attachments.push(RawAttachment {
                    filename,
                    payload: fs::read(&file)?,
                });
            }

            messages.push(InboundMessage {
                subject: uid.clone(),
                uid,
                date,
                attachments,
            });
        }
        Ok(messages)
    }

    fn mark_processed(&mut self, uid: &str) -> Result<()> {
        fs::create_dir_all(&self.processed)?;
        fs::rename(self.incoming.join(uid), self.processed.join(uid))?;
        Ok(())
    }
}
