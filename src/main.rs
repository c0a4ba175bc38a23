//! dmarcwatch - DMARC Report & DNS Posture Monitor
//!
//! Ingests DMARC aggregate reports (raw XML, gzip, or zip containers) and
//! audits a domain's published trust records (SPF, DKIM, DMARC, MTA-STS,
//! TLS-RPT, BIMI) against the previous snapshot and a declared baseline,
//! emailing alerts when authentication failures or DNS drift are found.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;

use dmarcwatch::alert::sender_from_config;
use dmarcwatch::config::Config;
use dmarcwatch::daemon::{run_dns_check, run_loop};
use dmarcwatch::dns::production_fetchers;
use dmarcwatch::mailbox::SpoolSource;
use dmarcwatch::models::{InboundMessage, RawAttachment};
use dmarcwatch::report::evaluate;
use dmarcwatch::store::{DocumentStore, JsonSnapshotStore};

/// CLI arguments for dmarcwatch.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "DMARC report and DNS posture monitor",
    long_about = "dmarcwatch unpacks and analyzes DMARC aggregate reports and audits \
                  DNS-published trust records against a declared baseline.\n\n\
                  USAGE:\n  dmarcwatch analyze <FILE>... | check-dns | run"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze DMARC report files (.xml, .xml.gz, .zip) without a mailbox
    Analyze {
        /// Report attachment files to process
        files: Vec<PathBuf>,
    },
    /// Run one DNS check cycle now and print the results
    CheckDns,
    /// Run the polling daemon (mail cycle + periodic DNS cycle)
    Run,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let config = Config::new().context("Failed to load configuration")?;

    match cli.command {
        Command::Analyze { files } => analyze(&config, &files),
        Command::CheckDns => check_dns(&config),
        Command::Run => run(&config),
    }
}

/// One-shot analysis of report files from disk, printed to stdout.
/// Exits non-zero when failing records were found.
fn analyze(config: &Config, files: &[PathBuf]) -> Result<()> {
    println!(
        "{}\n{}\n",
        "dmarcwatch - DMARC Report Analysis".bold().green(),
        "Extracting and evaluating authentication verdicts".dimmed()
    );

    let mut attachments = Vec::with_capacity(files.len());
    for file in files {
        let payload = std::fs::read(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        attachments.push(RawAttachment {
            filename: file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            payload,
        });
    }
    let message = InboundMessage {
        uid: "cli".to_string(),
        subject: "cli".to_string(),
        date: Utc::now(),
        attachments,
    };

    let store = DocumentStore::new(&config.raw_xml_dir);
    let outcome = evaluate(&message, &store, config);

    for path in &outcome.attachment_paths {
        println!("{} {}", "Stored:".bold(), path.display());
    }
    if outcome.has_failures() {
        println!(
            "\n{}",
            format!("{} failing record(s):", outcome.failing_verdicts.len())
                .bold()
                .red()
        );
        for verdict in &outcome.failing_verdicts {
            println!("  {}", verdict);
        }
        std::process::exit(1);
    }
    println!("\n{}", "All records passed.".bold().green());
    Ok(())
}

/// Runs a single DNS cycle and prints the change/mismatch sets as JSON.
fn check_dns(config: &Config) -> Result<()> {
    let (resolver, policies) =
        production_fetchers(config).context("Failed to build DNS fetchers")?;
    let snapshots = JsonSnapshotStore::new(&config.snapshot_path);
    let sender = sender_from_config(config).context("Failed to build alert sender")?;

    let (changes, mismatches) =
        run_dns_check(config, &resolver, &policies, &snapshots, sender.as_ref())
            .context("DNS check failed")?;

    println!("{}", "Changes:".bold());
    println!("{}", serde_json::to_string_pretty(&changes)?);
    println!("{}", "Mismatches:".bold());
    println!("{}", serde_json::to_string_pretty(&mismatches)?);
    Ok(())
}

/// The daemon: poll the spool for report mail, run the DNS cycle on its
/// slower cadence, repeat until terminated.
fn run(config: &Config) -> Result<()> {
    println!(
        "{}\n{}\n",
        "dmarcwatch - DMARC & DNS Monitor".bold().green(),
        "Watching report mail and DNS posture".dimmed()
    );

    let mut source = SpoolSource::new(&config.spool_dir, &config.processed_dir);
    let store = DocumentStore::new(&config.raw_xml_dir);
    let (resolver, policies) =
        production_fetchers(config).context("Failed to build DNS fetchers")?;
    let snapshots = JsonSnapshotStore::new(&config.snapshot_path);
    let sender = sender_from_config(config).context("Failed to build alert sender")?;

    log::info!("Monitor started successfully");
    run_loop(
        config,
        &mut source,
        &store,
        &resolver,
        &policies,
        &snapshots,
        sender.as_ref(),
    )
}
