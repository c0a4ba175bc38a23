//! Daemon Module
//!
//! Orchestrates the two pipelines: the per-message report evaluation with its
//! alerting, and the DNS snapshot/diff cycle. The outer loop runs them
//! strictly sequentially; a failure in either cycle is logged at the loop
//! boundary and never stops the process or the other pipeline.

use crate::alert::{self, AlertSender};
use crate::config::Config;
use crate::diff::{diff_changes, diff_mismatches};
use crate::dns::{fetch_all, PolicyFetch, TxtResolver};
use crate::error::Result;
use crate::mailbox::MailSource;
use crate::models::{ChangeSet, MismatchSet};
use crate::report::evaluate;
use crate::store::{load_state, DocumentStore, SnapshotStore};
use chrono::Utc;
use std::time::Instant;

/// Runs one mail cycle: evaluate every unseen message, alert as configured,
/// and mark each message processed. Alert and bookkeeping failures are logged
/// per message; only a failure to list messages aborts the cycle.
pub fn process_mail(
    source: &mut dyn MailSource,
    store: &DocumentStore,
    sender: &dyn AlertSender,
    config: &Config,
) -> Result<()> {
    let messages = source.fetch_unseen()?;
    log::debug!("Found {} unseen message(s).", messages.len());

    for message in messages {
        log::debug!(
            "Processing message uid={}, subject={}",
            message.uid,
            message.subject
        );
        let outcome = evaluate(&message, store, config);

        if outcome.has_failures() {
            log::info!(
                "Detected {} failing record(s) in message {}",
                outcome.failing_verdicts.len(),
                message.uid
            );
            let alert = alert::failure_alert(&message.date, &outcome);
            if let Err(e) = sender.send(&alert) {
                log::warn!("Failed to send alert: {}", e);
            }
        } else if config.notify_on_ok {
            let alert = alert::ok_alert(&message.date, &outcome);
            if let Err(e) = sender.send(&alert) {
                log::warn!("Failed to send alert: {}", e);
            }
        } else {
            log::debug!("All records passed; no alert configured.");
        }

        if let Err(e) = source.mark_processed(&message.uid) {
            log::warn!("Failed to mark message {} processed: {}", message.uid, e);
        }
    }
    Ok(())
}

/// Runs one DNS cycle: fetch the current state of every configured domain,
/// diff against the previous snapshot and the expectation baseline, alert when
/// anything differs, and persist the new snapshot. Returns the computed sets
/// so one-shot callers can print them.
pub fn run_dns_check(
    config: &Config,
    resolver: &dyn TxtResolver,
    policies: &dyn PolicyFetch,
    snapshots: &dyn SnapshotStore,
    sender: &dyn AlertSender,
) -> Result<(ChangeSet, MismatchSet)> {
    let expected = load_state(&config.expected_path)?;
    let previous = snapshots.load()?;

    log::debug!("Fetching current DNS records...");
    let current = fetch_all(resolver, policies, &expected);

    let changes = diff_changes(&previous, &current);
    let mismatches = diff_mismatches(&current, &expected);

    if !changes.is_empty() || !mismatches.is_empty() {
        log::info!(
            "DNS drift detected: {} changed domain(s), {} mismatched domain(s)",
            changes.len(),
            mismatches.len()
        );
        let alert = alert::dns_alert(&Utc::now(), &changes, &mismatches);
        if let Err(e) = sender.send(&alert) {
            log::warn!("Failed to send alert: {}", e);
        }
    } else {
        log::debug!("No DNS changes or mismatches detected.");
    }

    snapshots.save(&current)?;
    Ok((changes, mismatches))
}

/// The poll loop: mail cycle every poll interval, DNS cycle on its slower
/// cadence. A failed DNS cycle is retried on the next poll rather than waiting
/// a full DNS interval.
#[allow(clippy::too_many_arguments)]
pub fn run_loop(
    config: &Config,
    source: &mut dyn MailSource,
    store: &DocumentStore,
    resolver: &dyn TxtResolver,
    policies: &dyn PolicyFetch,
    snapshots: &dyn SnapshotStore,
    sender: &dyn AlertSender,
) -> ! {
    let mut last_dns_check: Option<Instant> = None;
    loop {
        if let Err(e) = process_mail(source, store, sender, config) {
            log::error!("Error during mailbox check: {}", e);
        }

        let dns_due = last_dns_check
            .map_or(true, |t| t.elapsed() >= config.dns_check_interval);
        if dns_due {
            log::debug!("Running DNS check...");
            match run_dns_check(config, resolver, policies, snapshots, sender) {
                Ok(_) => last_dns_check = Some(Instant::now()),
                Err(e) => log::error!("Error during DNS check: {}", e),
            }
        }

        log::debug!("Sleeping for {:?}...", config.poll_interval);
        std::thread::sleep(config.poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Alert;
    use crate::error::MonitorError;
    use crate::mailbox::SpoolSource;
    use crate::models::{DnsRecordType, MtaStsPolicy, RecordValue};
    use crate::store::JsonSnapshotStore;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    #[derive(Default)]
    struct CollectingSender {
        sent: RefCell<Vec<Alert>>,
    }

    impl AlertSender for CollectingSender {
        fn send(&self, alert: &Alert) -> Result<()> {
            self.sent.borrow_mut().push(alert.clone());
            Ok(())
        }
    }

    struct MapResolver {
        records: HashMap<String, Vec<String>>,
    }

    impl TxtResolver for MapResolver {
        fn txt(&self, fqdn: &str) -> Result<Vec<String>> {
            self.records
                .get(fqdn)
                .cloned()
                .ok_or_else(|| MonitorError::Format(format!("NXDOMAIN {}", fqdn)))
        }
    }

    struct NoPolicies;

    impl PolicyFetch for NoPolicies {
        fn fetch_policy(&self, _domain: &str) -> Result<MtaStsPolicy> {
            Err(MonitorError::Format("unreachable host".to_string()))
        }
    }

    const FAILING_REPORT: &[u8] = br#"
    <feedback>
        <record>
            <row>
                <source_ip>192.0.2.1</source_ip>
                <policy_evaluated><spf>fail</spf><dkim>pass</dkim></policy_evaluated>
            </row>
        </record>
    </feedback>
    "#;

    fn test_config(root: &std::path::Path) -> Config {
        let mut config = Config::new().unwrap();
        config.raw_xml_dir = root.join("raw_xml");
        config.spool_dir = root.join("incoming");
        config.processed_dir = root.join("processed");
        config.expected_path = root.join("config.json");
        config.snapshot_path = root.join("last_results.json");
        config
    }

    #[test]
    fn test_mail_cycle_alerts_and_marks_processed() {
        let root = tempdir().unwrap();
        let config = test_config(root.path());
        let msg_dir = config.spool_dir.join("msg-1");
        fs::create_dir_all(&msg_dir).unwrap();
        fs::write(msg_dir.join("report.xml"), FAILING_REPORT).unwrap();

        let mut source = SpoolSource::new(&config.spool_dir, &config.processed_dir);
        let store = DocumentStore::new(&config.raw_xml_dir);
        let sender = CollectingSender::default();

        process_mail(&mut source, &store, &sender, &config).unwrap();

        let sent = sender.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.starts_with("DMARC FAIL"));
        assert_eq!(sent[0].attachments.len(), 1);
        assert!(config.processed_dir.join("msg-1").exists());
        assert!(!config.spool_dir.join("msg-1").exists());
    }

    #[test]
    fn test_mail_cycle_silent_on_pass_without_notify_on_ok() {
        let root = tempdir().unwrap();
        let config = test_config(root.path());
        let msg_dir = config.spool_dir.join("msg-2");
        fs::create_dir_all(&msg_dir).unwrap();
        fs::write(
            msg_dir.join("report.xml"),
            br#"<feedback><record><row><source_ip>192.0.2.5</source_ip>
            <policy_evaluated><spf>pass</spf><dkim>pass</dkim></policy_evaluated>
            </row></record></feedback>"#,
        )
        .unwrap();

        let mut source = SpoolSource::new(&config.spool_dir, &config.processed_dir);
        let store = DocumentStore::new(&config.raw_xml_dir);
        let sender = CollectingSender::default();

        process_mail(&mut source, &store, &sender, &config).unwrap();
        assert!(sender.sent.borrow().is_empty());
        assert!(config.processed_dir.join("msg-2").exists());
    }

    fn write_expected(config: &Config) {
        fs::write(
            &config.expected_path,
            r#"{
                "example.com": {
                    "SPF": ["v=spf1 mx ~all"],
                    "DMARC": ["v=DMARC1; p=reject"]
                }
            }"#,
        )
        .unwrap();
    }

    fn matching_resolver() -> MapResolver {
        MapResolver {
            records: HashMap::from([
                (
                    "example.com".to_string(),
                    vec!["v=spf1 mx ~all".to_string()],
                ),
                (
                    "_dmarc.example.com".to_string(),
                    vec!["v=DMARC1; p=reject".to_string()],
                ),
            ]),
        }
    }

    #[test]
    fn test_first_dns_cycle_reports_changes_and_persists() {
        let root = tempdir().unwrap();
        let config = test_config(root.path());
        write_expected(&config);

        let snapshots = JsonSnapshotStore::new(&config.snapshot_path);
        let sender = CollectingSender::default();
        let resolver = matching_resolver();

        let (changes, mismatches) =
            run_dns_check(&config, &resolver, &NoPolicies, &snapshots, &sender).unwrap();

        // First run: everything changed relative to the empty snapshot, but
        // nothing mismatches the expectation.
        assert!(changes.contains_key("example.com"));
        assert!(mismatches.is_empty());
        assert_eq!(sender.sent.borrow().len(), 1);
        assert!(config.snapshot_path.exists());

        // Second run against the persisted snapshot is quiet.
        let (changes, mismatches) =
            run_dns_check(&config, &resolver, &NoPolicies, &snapshots, &sender).unwrap();
        assert!(changes.is_empty());
        assert!(mismatches.is_empty());
        assert_eq!(sender.sent.borrow().len(), 1);
    }

    #[test]
    fn test_dns_cycle_reports_expectation_mismatch() {
        let root = tempdir().unwrap();
        let config = test_config(root.path());
        write_expected(&config);

        let resolver = MapResolver {
            records: HashMap::from([
                (
                    "example.com".to_string(),
                    vec!["v=spf1 mx ~all".to_string()],
                ),
                (
                    "_dmarc.example.com".to_string(),
                    vec!["v=DMARC1; p=none".to_string()],
                ),
            ]),
        };
        let snapshots = JsonSnapshotStore::new(&config.snapshot_path);
        let sender = CollectingSender::default();

        let (_, mismatches) =
            run_dns_check(&config, &resolver, &NoPolicies, &snapshots, &sender).unwrap();

        let mismatch = &mismatches["example.com"][&DnsRecordType::Dmarc];
        assert_eq!(
            mismatch.expected,
            RecordValue::Txt(vec!["v=DMARC1; p=reject".to_string()])
        );
        assert_eq!(
            mismatch.found,
            Some(RecordValue::Txt(vec!["v=DMARC1; p=none".to_string()]))
        );
        let sent = sender.sent.borrow();
        assert!(sent[0].body.contains("(MISMATCH)"));
    }
}
