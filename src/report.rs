//! Report Batch Evaluator Module
//!
//! Aggregates authentication verdicts across every attachment of one inbound
//! message. Failures are contained at the unit they occur in: a bad container
//! skips that attachment, a malformed document skips that document, and
//! everything already persisted stays persisted and rides along on any alert.

use crate::config::Config;
use crate::models::{InboundMessage, MessageOutcome};
use crate::store::DocumentStore;
use crate::unpack::unpack;
use crate::xml_parser::extract_verdicts;

/// Evaluates one message: unpacks each attachment in order, extracts verdicts
/// from every recovered document, and collects the failing ones in
/// document-then-record order. `attachment_paths` records every persisted
/// document regardless of verdict.
pub fn evaluate(message: &InboundMessage, store: &DocumentStore, config: &Config) -> MessageOutcome {
    let mut outcome = MessageOutcome::default();

    for attachment in &message.attachments {
        let documents = match unpack(attachment, &message.date, store, config) {
            Ok(documents) => documents,
            Err(e) => {
                log::warn!("Skipping attachment {}: {}", attachment.filename, e);
                continue;
            }
        };

        for document in documents {
            outcome.attachment_paths.push(document.path.clone());
            match extract_verdicts(&document.bytes) {
                Ok(verdicts) => {
                    outcome
                        .failing_verdicts
                        .extend(verdicts.into_iter().filter(|v| v.is_failing()));
                }
                Err(e) => {
                    log::warn!("XML parse error in {}: {}", document.name, e);
                }
            }
        }
    }

    outcome
}
