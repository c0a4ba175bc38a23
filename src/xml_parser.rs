//! XML Parser Module
//!
//! This module extracts per-record authentication verdicts from DMARC
//! aggregate-report XML. It enforces a recursion depth limit and completely
//! disables DOCTYPE processing by removing any DOCTYPE block from the input;
//! a DOCTYPE defining two or more entities is rejected outright.

use crate::error::{MonitorError, Result};
use crate::models::AuthVerdict;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

const MAX_DEPTH: u32 = 30;

/// Parses aggregate-report XML and returns one verdict per `<record>` element,
/// in document order. For each record the first nested `spf`, `dkim` and
/// `source_ip` values are taken; missing elements yield `None`.
///
/// # Errors
///
/// Returns an error for malformed XML, non-UTF-8 input, excessive nesting, or
/// a DOCTYPE with multiple entity definitions. Callers treat a failed document
/// as yielding no verdicts and continue with sibling documents.
pub fn extract_verdicts(xml: &[u8]) -> Result<Vec<AuthVerdict>> {
    let text = std::str::from_utf8(xml)
        .map_err(|e| MonitorError::Format(format!("Report is not UTF-8: {}", e)))?;
    let cleaned = strip_doctype(text)?;

    let mut reader = Reader::from_str(&cleaned);
    reader.config_mut().trim_text(true);

    let mut verdicts = Vec::new();
    let mut current: Option<AuthVerdict> = None;
    let mut depth: u32 = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = e.name();
                match name.as_ref() {
                    b"record" if current.is_none() => {
                        depth += 1;
                        current = Some(AuthVerdict {
                            source_ip: None,
                            spf: None,
                            dkim: None,
                        });
                    }
                    b"spf" | b"dkim" | b"source_ip" if current.is_some() => {
                        // read_text consumes through the matching end tag, so
                        // depth is left untouched for these elements.
                        let value = reader.read_text(name)?.trim().to_string();
                        let record = current.as_mut().unwrap();
                        let slot = match name.as_ref() {
                            b"spf" => &mut record.spf,
                            b"dkim" => &mut record.dkim,
                            _ => &mut record.source_ip,
                        };
                        if slot.is_none() {
                            *slot = Some(value);
                        }
                    }
                    _ => {
                        depth += 1;
                    }
                }
                if depth > MAX_DEPTH {
                    return Err(MonitorError::Format(
                        "XML recursion depth limit exceeded".to_string(),
                    ));
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"record" {
                    if let Some(verdict) = current.take() {
                        verdicts.push(verdict);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(MonitorError::Xml(e)),
            _ => (),
        }
    }

    Ok(verdicts)
}

/// Removes a DOCTYPE block from the input, rejecting documents whose DOCTYPE
/// defines two or more entities.
fn strip_doctype(xml: &str) -> Result<String> {
    let Some(start) = xml.find("<!DOCTYPE") else {
        return Ok(xml.to_string());
    };
    let Some(end) = xml[start..].find("]>") else {
        return Ok(xml.to_string());
    };
    let doctype = &xml[start..start + end + 2];
    if doctype.matches("<!ENTITY").count() >= 2 {
        return Err(MonitorError::Format(
            "Recursive entities detected".to_string(),
        ));
    }
    Ok(format!("{}{}", &xml[..start], &xml[start + end + 2..]))
}
