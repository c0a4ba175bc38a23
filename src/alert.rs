//! Alert Module
//!
//! Turns pipeline outcomes into human-readable subject/body text and delivers
//! them over SMTP. The submission channel follows the configured port: 465
//! uses an implicit-TLS relay, anything else upgrades with STARTTLS. When no
//! SMTP settings are configured alerts are written to the log instead.

use crate::config::{Config, SmtpConfig};
use crate::error::{MonitorError, Result};
use crate::models::{ChangeSet, MessageOutcome, MismatchSet};
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

/// An outbound notification, optionally carrying the raw report documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

/// Delivery seam for outbound alerts.
pub trait AlertSender {
    fn send(&self, alert: &Alert) -> Result<()>;
}

/// Builds the failure alert for one processed message.
pub fn failure_alert(date: &DateTime<Utc>, outcome: &MessageOutcome) -> Alert {
    let lines: Vec<String> = outcome
        .failing_verdicts
        .iter()
        .map(|v| v.to_string())
        .collect();
    Alert {
        subject: format!("DMARC FAIL {}", date.format("%Y-%m-%d")),
        body: format!("Failed records:\n{}", lines.join("\n")),
        attachments: outcome.attachment_paths.clone(),
    }
}

/// Builds the all-clear report, sent only when `notify_on_ok` is set.
pub fn ok_alert(date: &DateTime<Utc>, outcome: &MessageOutcome) -> Alert {
    Alert {
        subject: format!("DMARC OK {}", date.format("%Y-%m-%d")),
        body: "All DMARC records passed successfully.".to_string(),
        attachments: outcome.attachment_paths.clone(),
    }
}

fn render<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "<unrenderable>".to_string())
}

/// Builds the DNS change/mismatch alert body, one section per affected domain.
pub fn dns_alert(now: &DateTime<Utc>, changes: &ChangeSet, mismatches: &MismatchSet) -> Alert {
    let mut body = format!(
        "DNS configuration changes detected at {} UTC:\n",
        now.format("%Y-%m-%dT%H:%M:%S")
    );
    for (domain, records) in changes {
        let _ = write!(body, "\nDomain: {} (CHANGES)\n", domain);
        for (rtype, change) in records {
            let _ = write!(body, "  {}:\n", rtype);
            let _ = write!(body, "    OLD: {}\n", render(&change.old));
            let _ = write!(body, "    NEW: {}\n", render(&change.new));
        }
    }
    for (domain, records) in mismatches {
        let _ = write!(body, "\nDomain: {} (MISMATCH)\n", domain);
        for (rtype, mismatch) in records {
            let _ = write!(body, "  {}:\n", rtype);
            let _ = write!(body, "    EXPECTED: {}\n", render(&mismatch.expected));
            let _ = write!(body, "    FOUND: {}\n", render(&mismatch.found));
        }
    }
    Alert {
        subject: "DNS Change or Mismatch Detected".to_string(),
        body,
        attachments: Vec::new(),
    }
}

/// SMTP delivery via lettre. Unreadable attachment files are skipped with a
/// logged warning; the alert itself still goes out.
pub struct SmtpAlertSender {
    transport: SmtpTransport,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpAlertSender {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let builder = if config.port == 465 {
            SmtpTransport::relay(&config.host)?
        } else {
            SmtpTransport::starttls_relay(&config.host)?
        };
        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.user.clone(),
                config.password.clone(),
            ))
            .build();
        let from: Mailbox = format!("{} <{}>", config.from_name, config.user).parse()?;
        let to: Mailbox = config.alert_email.parse()?;
        Ok(Self { transport, from, to })
    }
}

impl AlertSender for SmtpAlertSender {
    fn send(&self, alert: &Alert) -> Result<()> {
        log::debug!("Preparing to send alert: {}", alert.subject);
        let builder = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(alert.subject.clone());

        let message = if alert.attachments.is_empty() {
            builder
                .header(ContentType::TEXT_PLAIN)
                .body(alert.body.clone())?
        } else {
            let xml_type = ContentType::parse("application/xml")
                .map_err(|e| MonitorError::Format(e.to_string()))?;
            let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(alert.body.clone()));
            for path in &alert.attachments {
                match fs::read(path) {
                    Ok(data) => {
                        let filename = path
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_else(|| "report.xml".to_string());
                        parts = parts
                            .singlepart(Attachment::new(filename).body(data, xml_type.clone()));
                    }
                    Err(e) => {
                        log::warn!("Failed to attach {}: {}", path.display(), e);
                    }
                }
            }
            builder.multipart(parts)?
        };

        self.transport.send(&message)?;
        log::debug!("Alert sent successfully.");
        Ok(())
    }
}

/// Fallback sender used when SMTP is not configured.
pub struct LogSender;

impl AlertSender for LogSender {
    fn send(&self, alert: &Alert) -> Result<()> {
        log::info!("ALERT (no SMTP configured): {}\n{}", alert.subject, alert.body);
        Ok(())
    }
}

/// Picks the sender implied by the configuration.
pub fn sender_from_config(config: &Config) -> Result<Box<dyn AlertSender>> {
    match &config.smtp {
        Some(smtp) => Ok(Box::new(SmtpAlertSender::new(smtp)?)),
        None => Ok(Box::new(LogSender)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AuthVerdict, DnsRecordType, Mismatch, RecordValue, ValueChange,
    };
    use chrono::TimeZone;

    fn outcome_with_failure() -> MessageOutcome {
        MessageOutcome {
            failing_verdicts: vec![AuthVerdict {
                source_ip: Some("192.0.2.1".into()),
                spf: Some("fail".into()),
                dkim: Some("pass".into()),
            }],
            attachment_paths: vec![PathBuf::from("/tmp/raw/2026/03/report.xml")],
        }
    }

    #[test]
    fn test_failure_alert_text() {
        let date = Utc.with_ymd_and_hms(2026, 3, 7, 8, 30, 0).unwrap();
        let alert = failure_alert(&date, &outcome_with_failure());
        assert_eq!(alert.subject, "DMARC FAIL 2026-03-07");
        assert_eq!(alert.body, "Failed records:\nIP:192.0.2.1 SPF:fail DKIM:pass");
        assert_eq!(alert.attachments.len(), 1);
    }

    #[test]
    fn test_ok_alert_still_carries_attachments() {
        let date = Utc.with_ymd_and_hms(2026, 3, 7, 8, 30, 0).unwrap();
        let outcome = MessageOutcome {
            failing_verdicts: vec![],
            attachment_paths: vec![PathBuf::from("/tmp/raw/2026/03/report.xml")],
        };
        let alert = ok_alert(&date, &outcome);
        assert_eq!(alert.subject, "DMARC OK 2026-03-07");
        assert_eq!(alert.attachments.len(), 1);
    }

    #[test]
    fn test_dns_alert_sections() {
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        let mut changes = ChangeSet::new();
        changes.entry("example.com".to_string()).or_default().insert(
            DnsRecordType::Dmarc,
            ValueChange {
                old: RecordValue::Txt(vec!["v=DMARC1; p=none".into()]),
                new: RecordValue::Txt(vec!["v=DMARC1; p=reject".into()]),
            },
        );
        let mut mismatches = MismatchSet::new();
        mismatches
            .entry("example.org".to_string())
            .or_default()
            .insert(
                DnsRecordType::Spf,
                Mismatch {
                    expected: RecordValue::Txt(vec!["v=spf1 -all".into()]),
                    found: None,
                },
            );

        let alert = dns_alert(&now, &changes, &mismatches);
        assert_eq!(alert.subject, "DNS Change or Mismatch Detected");
        assert!(alert.body.contains("Domain: example.com (CHANGES)"));
        assert!(alert.body.contains("OLD: [\"v=DMARC1; p=none\"]"));
        assert!(alert.body.contains("NEW: [\"v=DMARC1; p=reject\"]"));
        assert!(alert.body.contains("Domain: example.org (MISMATCH)"));
        assert!(alert.body.contains("FOUND: null"));
    }

    #[test]
    fn test_dns_alert_empty_sets_have_no_domain_sections() {
        let now = Utc::now();
        let alert = dns_alert(&now, &ChangeSet::new(), &MismatchSet::new());
        assert!(!alert.body.contains("Domain:"));
    }
}
