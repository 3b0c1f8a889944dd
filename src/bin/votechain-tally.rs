#![forbid(unsafe_code)]
//! Offline election report read straight from the persisted chain files.

use clap::Parser;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table};
use std::path::{Path, PathBuf};
use votechain::blockchain::{check_validity, ChainSnapshot};
use votechain::config::{load_config, Config};
use votechain::ledger::tally_blocks;
use votechain::persistence::open_store;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
    /// Directory holding the chain files (overrides storage.data_dir)
    #[arg(long)]
    data_dir: Option<String>,
    /// Also list the public vote records, newest first
    #[arg(long)]
    records: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }

    let counting = load_snapshot(&config, &config.storage.counting_chain_path())?;
    print_tally(&config, &counting);

    if cli.records {
        let public = load_snapshot(&config, &config.storage.public_chain_path())?;
        print_records(&public);
    }
    Ok(())
}

fn load_snapshot(config: &Config, path: &Path) -> Result<ChainSnapshot, Box<dyn std::error::Error>> {
    let store = open_store(config.storage.backend, path)?;
    let snapshot = store
        .load()?
        .ok_or_else(|| format!("No chain stored at {}", store.describe()))?;
    Ok(snapshot)
}

fn print_tally(config: &Config, counting: &ChainSnapshot) {
    println!("{}", "🗳️  VoteChain results".bright_cyan().bold());
    println!();

    if !check_validity(&counting.chain, config.miner.difficulty) {
        println!("{}", "⚠️  Counting chain does not verify; results may be tampered".red().bold());
    }

    let tally = tally_blocks(&counting.chain);
    if tally.is_empty() {
        println!("{}", "📭 No confirmed votes yet".yellow());
        return;
    }

    let total: u64 = tally.values().sum();
    let mut rows: Vec<_> = tally.into_iter().collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Party").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Votes").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Share").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
        ]);

    for (i, (party, votes)) in rows.iter().enumerate() {
        let color = if i == 0 { TableColor::Green } else { TableColor::White };
        let share = *votes as f64 * 100.0 / total as f64;
        table.add_row(vec![
            Cell::new(party).fg(color),
            Cell::new(votes).set_alignment(CellAlignment::Right).fg(color),
            Cell::new(format!("{:.1}%", share)).set_alignment(CellAlignment::Right).fg(color),
        ]);
    }

    println!("{}", table);
    println!(
        "{}",
        format!(
            "📝 {} votes in {} blocks, {} pending",
            total,
            counting.chain.len().saturating_sub(1),
            counting.unconfirmed_transactions.len()
        )
        .blue()
    );
    println!();
}

fn print_records(public: &ChainSnapshot) {
    struct Record<'a> {
        block: u64,
        voter_id: &'a str,
        party: &'a str,
        timestamp: u64,
    }

    let mut records: Vec<Record> = public
        .chain
        .iter()
        .flat_map(|block| {
            block.transactions.iter().map(move |tx| Record {
                block: block.index,
                voter_id: &tx.voter_id,
                party: &tx.party,
                timestamp: tx.timestamp,
            })
        })
        .collect();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    println!("{}", "📜 Public vote records".bright_cyan().bold());
    if records.is_empty() {
        println!("{}", "📭 No records on the public chain".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Block").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Voter").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Sealed ballot").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Date").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
        ]);

    for record in &records {
        table.add_row(vec![
            Cell::new(format!("#{}", record.block)).fg(TableColor::White),
            Cell::new(record.voter_id).fg(TableColor::Yellow),
            Cell::new(shorten(record.party)).fg(TableColor::Grey),
            Cell::new(format_timestamp(record.timestamp)).fg(TableColor::Grey),
        ]);
    }
    println!("{}", table);
}

fn shorten(value: &str) -> String {
    if value.chars().count() > 24 {
        let head: String = value.chars().take(21).collect();
        format!("{}...", head)
    } else {
        value.to_string()
    }
}

fn format_timestamp(millis: u64) -> String {
    use chrono::DateTime;

    match i64::try_from(millis).ok().and_then(DateTime::from_timestamp_millis) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "Invalid".to_string(),
    }
}
