//! DNS State Fetcher Module
//!
//! Resolves the published trust records for a domain into the typed per-type
//! values the diff engine compares: TXT lookups for SPF/DKIM/DMARC/TLS-RPT/BIMI
//! and an HTTPS well-known fetch for the MTA-STS policy. A failed lookup for
//! one record type yields that type's empty value and never suppresses the
//! others. Resolution and policy fetching sit behind traits so the fetcher can
//! be driven from tests without the network.

use crate::config::Config;
use crate::error::Result;
use crate::models::{filter_spf, DnsRecordType, DnsState, DomainState, MtaStsPolicy, RecordValue};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::Resolver;
use std::collections::BTreeMap;
use std::time::Duration;

/// TXT resolution seam.
pub trait TxtResolver {
    /// Returns the TXT strings published at `fqdn`, quote-stripped and sorted.
    fn txt(&self, fqdn: &str) -> Result<Vec<String>>;
}

/// MTA-STS policy retrieval seam.
pub trait PolicyFetch {
    fn fetch_policy(&self, domain: &str) -> Result<MtaStsPolicy>;
}

/// Production resolver backed by hickory with a bounded per-query timeout.
pub struct SystemResolver {
    inner: Resolver,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        let inner = Resolver::new(ResolverConfig::default(), opts)?;
        Ok(Self { inner })
    }
}

impl TxtResolver for SystemResolver {
    fn txt(&self, fqdn: &str) -> Result<Vec<String>> {
        let lookup = self.inner.txt_lookup(fqdn)?;
        let mut records: Vec<String> = lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|segment| String::from_utf8_lossy(segment))
                    .collect::<String>()
                    .trim_matches('"')
                    .to_string()
            })
            .collect();
        records.sort();
        Ok(records)
    }
}

/// Fetches `https://mta-sts.<domain>/.well-known/mta-sts.txt` over TLS.
pub struct HttpsPolicyFetcher {
    client: reqwest::blocking::Client,
}

impl HttpsPolicyFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Fetches and parses a policy from an explicit URL.
    pub fn fetch_url(&self, url: &str) -> Result<MtaStsPolicy> {
        let text = self.client.get(url).send()?.error_for_status()?.text()?;
        Ok(parse_policy(&text))
    }
}

impl PolicyFetch for HttpsPolicyFetcher {
    fn fetch_policy(&self, domain: &str) -> Result<MtaStsPolicy> {
        self.fetch_url(&format!("https://mta-sts.{}/.well-known/mta-sts.txt", domain))
    }
}

/// Parses MTA-STS policy text: colon-delimited `key: value` lines, whitespace
/// trimmed, keys lowercased. `mx` accumulates, `max_age` parses as an integer,
/// everything else is last-value-wins. Malformed lines are skipped.
pub fn parse_policy(text: &str) -> MtaStsPolicy {
    let mut policy = MtaStsPolicy::default();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        match key.as_str() {
            "mx" => policy.mx.push(value.to_string()),
            "max_age" => match value.parse() {
                Ok(age) => policy.max_age = Some(age),
                Err(_) => log::debug!("Skipping malformed max_age line: {}", line),
            },
            _ => {
                policy.fields.insert(key, value.to_string());
            }
        }
    }
    policy
}

/// The fully-qualified TXT name a record type is published at.
fn txt_query_name(rtype: DnsRecordType, domain: &str) -> String {
    match rtype {
        DnsRecordType::Spf => domain.to_string(),
        DnsRecordType::Dmarc => format!("_dmarc.{}", domain),
        DnsRecordType::TlsRpt => format!("_smtp._tls.{}", domain),
        DnsRecordType::Bimi => format!("default._bimi.{}", domain),
        // DKIM and MTA-STS are resolved through their own paths.
        DnsRecordType::Dkim | DnsRecordType::MtaSts => domain.to_string(),
    }
}

fn txt_or_empty(resolver: &dyn TxtResolver, fqdn: &str) -> Vec<String> {
    match resolver.txt(fqdn) {
        Ok(records) => records,
        Err(e) => {
            log::warn!("Failed to resolve TXT for {}: {}", fqdn, e);
            Vec::new()
        }
    }
}

/// Fetches the current value of every record type the expectation declares for
/// `domain`. Never fails as a whole; a broken lookup leaves that type empty.
pub fn fetch_domain(
    resolver: &dyn TxtResolver,
    policies: &dyn PolicyFetch,
    domain: &str,
    expected: &DomainState,
) -> DomainState {
    let mut state = DomainState::new();
    for (&rtype, expected_value) in expected {
        let value = match rtype {
            DnsRecordType::Spf => {
                // Unrelated TXT records at the apex are never SPF content.
                let records = txt_or_empty(resolver, &txt_query_name(rtype, domain));
                RecordValue::Txt(filter_spf(&records))
            }
            DnsRecordType::Dmarc | DnsRecordType::TlsRpt | DnsRecordType::Bimi => {
                RecordValue::Txt(txt_or_empty(resolver, &txt_query_name(rtype, domain)))
            }
            DnsRecordType::Dkim => {
                let mut selectors = BTreeMap::new();
                if let RecordValue::Selectors(expected_selectors) = expected_value {
                    for selector in expected_selectors.keys() {
                        let fqdn = format!("{}._domainkey.{}", selector, domain);
                        selectors.insert(selector.clone(), txt_or_empty(resolver, &fqdn));
                    }
                }
                RecordValue::Selectors(selectors)
            }
            DnsRecordType::MtaSts => match policies.fetch_policy(domain) {
                Ok(policy) => RecordValue::Policy(policy),
                Err(e) => {
                    log::warn!("Failed to fetch MTA-STS policy for {}: {}", domain, e);
                    RecordValue::Policy(MtaStsPolicy::default())
                }
            },
        };
        state.insert(rtype, value);
    }
    state
}

/// Fetches current state for every domain the expectation baseline declares,
/// one domain at a time.
pub fn fetch_all(
    resolver: &dyn TxtResolver,
    policies: &dyn PolicyFetch,
    expected: &DnsState,
) -> DnsState {
    let mut current = DnsState::default();
    for (domain, expected_records) in &expected.0 {
        log::debug!("Fetching DNS state for {}", domain);
        current.0.insert(
            domain.clone(),
            fetch_domain(resolver, policies, domain, expected_records),
        );
    }
    current
}

/// Builds the production resolver/fetcher pair from configuration.
pub fn production_fetchers(config: &Config) -> Result<(SystemResolver, HttpsPolicyFetcher)> {
    Ok((
        SystemResolver::new(config.dns_timeout)?,
        HttpsPolicyFetcher::new(config.sts_timeout)?,
    ))
}
