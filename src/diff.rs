//! DNS Diff Engine Module
//!
//! Compares DNS states structurally: the previous snapshot against the current
//! one (changes) and the current one against the expectation baseline
//! (mismatches). Both sides of every comparison carry the same normalization;
//! for SPF the `v=spf` filter is re-applied before a change is declared so
//! unrelated TXT churn at the apex never produces a false diff.

use crate::models::{
    ChangeSet, DnsRecordType, DnsState, Mismatch, MismatchSet, RecordValue, ValueChange,
};
use std::collections::BTreeMap;

/// Computes per-domain, per-type changes between two snapshots. A record type
/// absent from the previous snapshot compares as its empty value; domains with
/// no surviving differences are omitted entirely.
pub fn diff_changes(previous: &DnsState, current: &DnsState) -> ChangeSet {
    let mut changes = ChangeSet::new();
    for (domain, records) in &current.0 {
        let mut domain_changes = BTreeMap::new();
        for (&rtype, new_value) in records {
            let old_value = previous
                .0
                .get(domain)
                .and_then(|r| r.get(&rtype))
                .cloned()
                .unwrap_or_else(|| RecordValue::empty_for(rtype));
            if old_value == *new_value {
                continue;
            }
            // Raw values differ; for SPF only filtered content counts.
            let (old_value, new_value) = if rtype == DnsRecordType::Spf {
                (old_value.spf_filtered(), new_value.spf_filtered())
            } else {
                (old_value, new_value.clone())
            };
            if old_value != new_value {
                domain_changes.insert(
                    rtype,
                    ValueChange {
                        old: old_value,
                        new: new_value,
                    },
                );
            }
        }
        if !domain_changes.is_empty() {
            changes.insert(domain.clone(), domain_changes);
        }
    }
    changes
}

/// Compares the current state against the expectation baseline. A domain/type
/// missing from the current state is reported with `found: None`; domains with
/// no mismatches are omitted.
pub fn diff_mismatches(current: &DnsState, expected: &DnsState) -> MismatchSet {
    let mut mismatches = MismatchSet::new();
    for (domain, expected_records) in &expected.0 {
        let mut domain_mismatches = BTreeMap::new();
        for (&rtype, expected_value) in expected_records {
            let found = current
                .0
                .get(domain)
                .and_then(|r| r.get(&rtype))
                .cloned();
            if found.as_ref() != Some(expected_value) {
                domain_mismatches.insert(
                    rtype,
                    Mismatch {
                        expected: expected_value.clone(),
                        found,
                    },
                );
            }
        }
        if !domain_mismatches.is_empty() {
            mismatches.insert(domain.clone(), domain_mismatches);
        }
    }
    mismatches
}
