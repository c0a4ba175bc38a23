//! Container Unpacker Module
//!
//! Unpacks a named attachment into zero or more XML documents, handling raw
//! `.xml`, gzipped `.xml.gz`, and `.zip` containers. Every emitted document is
//! written to the dated raw-document store before it is returned, so callers
//! never see a document that is not already on disk. Untrusted-input limits
//! apply throughout: maximum decompressed size, maximum member count, and
//! archive member names reduced to their base filename so hostile paths cannot
//! escape the output tree.

use crate::config::Config;
use crate::error::{MonitorError, Result};
use crate::models::{ExtractedDocument, RawAttachment};
use crate::store::DocumentStore;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

/// Unpacks one attachment into persisted XML documents.
///
/// Returns `Ok(vec![])` for unrecognized extensions (no side effects). Errors
/// cover the whole attachment (bad gzip stream, unreadable archive, store
/// failure); the caller logs them and moves on to sibling attachments.
pub fn unpack(
    attachment: &RawAttachment,
    date: &DateTime<Utc>,
    store: &DocumentStore,
    config: &Config,
) -> Result<Vec<ExtractedDocument>> {
    let lower = attachment.filename.to_lowercase();

    let documents: Vec<(String, Vec<u8>)> = if lower.ends_with(".xml.gz") {
        log::debug!("Decompressing {}", attachment.filename);
        let inner_name = attachment.filename[..attachment.filename.len() - 3].to_string();
        let data = gunzip(&attachment.payload, config.max_decompressed_size)?;
        vec![(inner_name, data)]
    } else if lower.ends_with(".xml") {
        vec![(attachment.filename.clone(), attachment.payload.clone())]
    } else if lower.ends_with(".zip") {
        // The raw archive is kept as a side artifact next to its members.
        store.save(date, &attachment.filename, &attachment.payload)?;
        read_zip_members(&attachment.payload, config)?
    } else {
        log::debug!("Skipping non-XML attachment {}", attachment.filename);
        return Ok(Vec::new());
    };

    let mut extracted = Vec::with_capacity(documents.len());
    for (name, bytes) in documents {
        let path = store.save(date, &name, &bytes)?;
        extracted.push(ExtractedDocument { name, bytes, path });
    }
    Ok(extracted)
}

fn gunzip(payload: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(payload).take(max_size as u64 + 1);
    let mut data = Vec::new();
    decoder.read_to_end(&mut data)?;
    if data.len() > max_size {
        return Err(MonitorError::FileTooLarge(
            "Decompressed size too large".to_string(),
        ));
    }
    Ok(data)
}

/// Reads every `.xml` member of a zip archive, keyed by base filename.
/// Non-XML members are skipped silently.
fn read_zip_members(payload: &[u8], config: &Config) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(Cursor::new(payload))?;
    if archive.len() > config.max_files_in_zip {
        return Err(MonitorError::Format("Too many files in archive".to_string()));
    }

    let mut members = Vec::new();
    for i in 0..archive.len() {
        let mut member = archive.by_index(i)?;
        let base_name = Path::new(member.name())
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !base_name.to_lowercase().ends_with(".xml") {
            log::debug!("Skipping non-XML zip member: {}", member.name());
            continue;
        }
        if member.size() > config.max_decompressed_size as u64 {
            return Err(MonitorError::FileTooLarge(format!(
                "Zip member too large: {}",
                base_name
            )));
        }
        let mut bytes = Vec::with_capacity(member.size() as usize);
        member.read_to_end(&mut bytes)?;
        members.push((base_name, bytes));
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    const XML: &[u8] = b"<feedback><record><row><source_ip>192.0.2.1</source_ip></row></record></feedback>";

    fn attachment(name: &str, payload: Vec<u8>) -> RawAttachment {
        RawAttachment {
            filename: name.to_string(),
            payload,
        }
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn zip_of(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, data) in members {
            writer.start_file(name.to_string(), options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn setup() -> (tempfile::TempDir, DocumentStore, Config) {
        let dir = tempdir().unwrap();
        let store = DocumentStore::new(dir.path());
        let config = Config::new().unwrap();
        (dir, store, config)
    }

    #[test]
    fn test_plain_xml_passthrough() {
        let (_dir, store, config) = setup();
        let docs = unpack(
            &attachment("report.xml", XML.to_vec()),
            &Utc::now(),
            &store,
            &config,
        )
        .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "report.xml");
        assert_eq!(docs[0].bytes, XML);
        assert!(docs[0].path.exists());
    }

    #[test]
    fn test_gz_matches_plain_xml_with_suffix_stripped() {
        let (_dir, store, config) = setup();
        let now = Utc::now();
        let gz = unpack(
            &attachment("report.xml.gz", gzip(XML)),
            &now,
            &store,
            &config,
        )
        .unwrap();
        let plain = unpack(&attachment("report.xml", XML.to_vec()), &now, &store, &config)
            .unwrap();
        assert_eq!(gz, plain);
    }

    #[test]
    fn test_corrupt_gz_is_an_error_not_a_panic() {
        let (_dir, store, config) = setup();
        let result = unpack(
            &attachment("report.xml.gz", b"not gzip at all".to_vec()),
            &Utc::now(),
            &store,
            &config,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zip_extracts_only_xml_members() {
        let (_dir, store, config) = setup();
        let payload = zip_of(&[
            ("a.xml", XML),
            ("notes.txt", b"ignore me"),
            ("nested/b.XML", XML),
        ]);
        let docs = unpack(
            &attachment("reports.zip", payload),
            &Utc::now(),
            &store,
            &config,
        )
        .unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.xml", "b.XML"]);
        for doc in &docs {
            assert_eq!(doc.bytes, XML);
            assert!(doc.path.exists());
        }
    }

    #[test]
    fn test_zip_traversal_member_lands_in_dated_dir() {
        let (dir, store, config) = setup();
        let payload = zip_of(&[("../../../etc/evil.xml", XML)]);
        let docs = unpack(
            &attachment("reports.zip", payload),
            &Utc::now(),
            &store,
            &config,
        )
        .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "evil.xml");
        assert!(docs[0].path.starts_with(dir.path()));
    }

    #[test]
    fn test_unknown_extension_yields_nothing_and_writes_nothing() {
        let (dir, store, config) = setup();
        let docs = unpack(
            &attachment("summary.pdf", b"%PDF-1.4".to_vec()),
            &Utc::now(),
            &store,
            &config,
        )
        .unwrap();
        assert!(docs.is_empty());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_zip_member_count_limit() {
        let (_dir, store, mut config) = setup();
        config.max_files_in_zip = 1;
        let payload = zip_of(&[("a.xml", XML), ("b.xml", XML)]);
        let result = unpack(
            &attachment("reports.zip", payload),
            &Utc::now(),
            &store,
            &config,
        );
        assert!(matches!(result, Err(MonitorError::Format(_))));
    }

    #[test]
    fn test_oversized_gz_rejected() {
        let (_dir, store, mut config) = setup();
        config.max_decompressed_size = 64;
        let big = vec![b'A'; 4096];
        let result = unpack(
            &attachment("big.xml.gz", gzip(&big)),
            &Utc::now(),
            &store,
            &config,
        );
        assert!(matches!(result, Err(MonitorError::FileTooLarge(_))));
    }
}
