//! Data Models Module
//!
//! This module defines the core data structures used by dmarcwatch: inbound
//! messages and their attachments, per-record authentication verdicts, and the
//! typed DNS state used by the snapshot/diff pipeline. DNS values are a closed
//! variant per record type so comparisons are exhaustively type-checked.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A named attachment payload taken from an inbound message.
#[derive(Debug, Clone)]
pub struct RawAttachment {
    pub filename: String,
    pub payload: Vec<u8>,
}

/// One inbound message as seen by the report pipeline.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub uid: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub attachments: Vec<RawAttachment>,
}

/// An XML document recovered from an attachment container, already persisted
/// to the raw-document store at `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub name: String,
    pub bytes: Vec<u8>,
    pub path: PathBuf,
}

/// SPF/DKIM evaluation outcome for one `<record>` element of an aggregate
/// report. The report publisher's verdict strings are kept as-is; anything
/// other than an exact "pass" counts as failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthVerdict {
    pub source_ip: Option<String>,
    pub spf: Option<String>,
    pub dkim: Option<String>,
}

impl AuthVerdict {
    pub fn is_failing(&self) -> bool {
        self.spf.as_deref() != Some("pass") || self.dkim.as_deref() != Some("pass")
    }
}

impl fmt::Display for AuthVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn text(v: &Option<String>) -> &str {
            v.as_deref().unwrap_or("none")
        }
        write!(
            f,
            "IP:{} SPF:{} DKIM:{}",
            text(&self.source_ip),
            text(&self.spf),
            text(&self.dkim)
        )
    }
}

/// Aggregated result of processing every attachment of one message.
#[derive(Debug, Default)]
pub struct MessageOutcome {
    pub failing_verdicts: Vec<AuthVerdict>,
    pub attachment_paths: Vec<PathBuf>,
}

impl MessageOutcome {
    pub fn has_failures(&self) -> bool {
        !self.failing_verdicts.is_empty()
    }
}

/// The DNS-published record kinds audited per domain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum DnsRecordType {
    #[serde(rename = "SPF")]
    Spf,
    #[serde(rename = "DKIM")]
    Dkim,
    #[serde(rename = "DMARC")]
    Dmarc,
    #[serde(rename = "MTA-STS")]
    MtaSts,
    #[serde(rename = "TLS-RPT")]
    TlsRpt,
    #[serde(rename = "BIMI")]
    Bimi,
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DnsRecordType::Spf => "SPF",
            DnsRecordType::Dkim => "DKIM",
            DnsRecordType::Dmarc => "DMARC",
            DnsRecordType::MtaSts => "MTA-STS",
            DnsRecordType::TlsRpt => "TLS-RPT",
            DnsRecordType::Bimi => "BIMI",
        };
        write!(f, "{}", name)
    }
}

/// Parsed MTA-STS policy text. `mx` accumulates repeated lines, `max_age` is
/// numeric, every other key is a last-value-wins string.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MtaStsPolicy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mx: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl MtaStsPolicy {
    pub fn is_empty(&self) -> bool {
        self.mx.is_empty() && self.max_age.is_none() && self.fields.is_empty()
    }
}

/// Observed or expected value for one record type. Serialized untagged so the
/// on-disk snapshot keeps the plain JSON shapes (list, selector map, policy
/// map); deserialization is driven by the record type key via
/// [`RecordValue::from_json`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RecordValue {
    /// Sorted TXT strings (SPF, DMARC, TLS-RPT, BIMI).
    Txt(Vec<String>),
    /// DKIM: selector -> sorted TXT strings.
    Selectors(BTreeMap<String, Vec<String>>),
    /// MTA-STS policy fields.
    Policy(MtaStsPolicy),
}

impl RecordValue {
    /// The "nothing published" value for a record type, used when a lookup
    /// fails or a previous snapshot has no entry.
    pub fn empty_for(rtype: DnsRecordType) -> Self {
        match rtype {
            DnsRecordType::Dkim => RecordValue::Selectors(BTreeMap::new()),
            DnsRecordType::MtaSts => RecordValue::Policy(MtaStsPolicy::default()),
            _ => RecordValue::Txt(Vec::new()),
        }
    }

    /// Decodes a JSON value into the shape mandated by the record type.
    pub fn from_json(
        rtype: DnsRecordType,
        value: serde_json::Value,
    ) -> serde_json::Result<Self> {
        Ok(match rtype {
            DnsRecordType::Dkim => RecordValue::Selectors(serde_json::from_value(value)?),
            DnsRecordType::MtaSts => RecordValue::Policy(serde_json::from_value(value)?),
            _ => RecordValue::Txt(serde_json::from_value(value)?),
        })
    }

    /// Returns the value with non-SPF TXT strings removed. Only meaningful for
    /// the `Txt` variant; other shapes pass through unchanged.
    pub fn spf_filtered(&self) -> Self {
        match self {
            RecordValue::Txt(records) => RecordValue::Txt(filter_spf(records)),
            other => other.clone(),
        }
    }
}

/// Keeps only strings that are actual SPF content, dropping unrelated TXT
/// records (site-verification tokens and the like) commingled at the apex.
pub fn filter_spf(records: &[String]) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.starts_with("v=spf"))
        .cloned()
        .collect()
}

/// Per-domain observed or expected records.
pub type DomainState = BTreeMap<DnsRecordType, RecordValue>;

/// Full DNS state keyed by domain. Serves both as the persisted snapshot and
/// as the expectation baseline, which share one configuration source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct DnsState(pub BTreeMap<String, DomainState>);

impl DnsState {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for DnsState {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: BTreeMap<String, BTreeMap<DnsRecordType, serde_json::Value>> =
            BTreeMap::deserialize(deserializer)?;
        let mut state = BTreeMap::new();
        for (domain, records) in raw {
            let mut typed = DomainState::new();
            for (rtype, value) in records {
                let value = RecordValue::from_json(rtype, value)
                    .map_err(serde::de::Error::custom)?;
                typed.insert(rtype, value);
            }
            state.insert(domain, typed);
        }
        Ok(DnsState(state))
    }
}

/// Old/new pair for a record type whose observed value changed between cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueChange {
    pub old: RecordValue,
    pub new: RecordValue,
}

/// Expected/found pair for a record type that deviates from the baseline.
/// `found` is `None` when the current state has no entry at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub expected: RecordValue,
    pub found: Option<RecordValue>,
}

/// Changes between two snapshots; domains with no differing types are absent.
pub type ChangeSet = BTreeMap<String, BTreeMap<DnsRecordType, ValueChange>>;

/// Deviations from the expectation baseline; empty domains are absent.
pub type MismatchSet = BTreeMap<String, BTreeMap<DnsRecordType, Mismatch>>;
