//! Command line front end for the trace engine.
//!
//! # Usage
//!
//! ```bash
//! # Print the entries of a trace, hiding one task
//! tracedeck dump --trace host.json --hide-pid 1234
//!
//! # Merge a guest trace whose clock runs 800ns ahead
//! tracedeck dump --trace host.json --trace guest.json --offset 0 --offset -800
//!
//! # List the tasks seen in a trace
//! tracedeck tasks --trace host.json
//!
//! # Per-CPU and per-event counts
//! tracedeck stats --trace host.json
//! ```

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracedeck::config::SessionConfig;
use tracedeck::entry::{Entry, TEXT_VIEW};
use tracedeck::filter::FilterKind;
use tracedeck::session::Session;
use tracedeck::source::JsonOpener;
use tracedeck::stream::Calibration;
use tracedeck::StreamId;

#[derive(Parser)]
#[command(name = "tracedeck")]
#[command(about = "Merge, filter and query per-CPU kernel trace events")]
#[command(version)]
struct Cli {
    /// Session configuration file (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the merged entries of one or more traces.
    Dump {
        /// Trace file (JSON). Repeat to merge several traces.
        #[arg(short, long, required = true)]
        trace: Vec<PathBuf>,

        /// Clock offset in ns for the trace at the same position.
        #[arg(long, allow_negative_numbers = true)]
        offset: Vec<i64>,

        /// Hide entries of this pid.
        #[arg(long)]
        hide_pid: Vec<i32>,

        /// Only show entries of this event id.
        #[arg(long)]
        show_event: Vec<i32>,

        /// Hide entries recorded on this CPU.
        #[arg(long)]
        hide_cpu: Vec<i32>,

        /// Print filtered entries too.
        #[arg(short, long)]
        all: bool,

        /// Stop after this many lines.
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// List the tasks observed in a trace.
    Tasks {
        #[arg(short, long)]
        trace: PathBuf,
    },

    /// Show per-CPU and per-event statistics for a trace.
    Stats {
        #[arg(short, long)]
        trace: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Dump {
            trace,
            offset,
            hide_pid,
            show_event,
            hide_cpu,
            all,
            limit,
        } => {
            let filters = DumpFilters {
                hide_pid,
                show_event,
                hide_cpu,
            };
            cmd_dump(cli.config, trace, offset, filters, all, limit)
        }
        Commands::Tasks { trace } => cmd_tasks(cli.config, trace),
        Commands::Stats { trace } => cmd_stats(cli.config, trace),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn make_session(config: Option<PathBuf>) -> tracedeck::Result<Session> {
    let config = match config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    Session::new(config)
}

fn open_and_load(
    config: Option<PathBuf>,
    trace: &Path,
) -> tracedeck::Result<(Session, StreamId, Vec<Entry>)> {
    let mut session = make_session(config)?;
    let sd = session.open(&JsonOpener, trace)?;
    let entries = session.load_entries(sd)?;
    Ok((session, sd, entries))
}

struct DumpFilters {
    hide_pid: Vec<i32>,
    show_event: Vec<i32>,
    hide_cpu: Vec<i32>,
}

impl DumpFilters {
    fn apply(&self, session: &mut Session, sd: StreamId) -> tracedeck::Result<()> {
        let kinds = [
            (FilterKind::HideTask, &self.hide_pid),
            (FilterKind::ShowEvent, &self.show_event),
            (FilterKind::HideCpu, &self.hide_cpu),
        ];
        for (kind, ids) in kinds {
            for &id in ids {
                session.add_filter_id(sd, kind, id)?;
            }
        }
        Ok(())
    }
}

fn cmd_dump(
    config: Option<PathBuf>,
    traces: Vec<PathBuf>,
    offsets: Vec<i64>,
    filters: DumpFilters,
    all: bool,
    limit: Option<usize>,
) -> tracedeck::Result<()> {
    let mut session = make_session(config)?;

    let mut entries = Vec::new();
    for (i, path) in traces.iter().enumerate() {
        let sd = session.open(&JsonOpener, path)?;
        filters.apply(&mut session, sd)?;
        let calibration = offsets.get(i).map(|&ns| Calibration::Offset(ns));
        entries = session.append(entries, sd, calibration)?;
    }
    eprintln!("Loaded {} entries from {} traces", entries.len(), traces.len());

    let shown = entries.iter().filter(|e| all || e.is_visible(TEXT_VIEW));
    for entry in shown.take(limit.unwrap_or(usize::MAX)) {
        println!("{}", session.dump_entry(entry)?);
    }
    Ok(())
}

fn cmd_tasks(config: Option<PathBuf>, trace: PathBuf) -> tracedeck::Result<()> {
    let (session, sd, entries) = open_and_load(config, &trace)?;

    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for entry in entries.iter().filter(|e| !e.is_lost_marker()) {
        *counts.entry(entry.pid).or_default() += 1;
    }

    println!("{:>8} {:<20} {:>10}", "PID", "Command", "Entries");
    println!("{}", "-".repeat(40));
    for pid in session.task_pids(sd)? {
        let comm = session.task_name(sd, pid)?.unwrap_or_else(|| "<...>".to_string());
        println!("{:>8} {:<20} {:>10}", pid, comm, counts.get(&pid).copied().unwrap_or(0));
    }
    Ok(())
}

fn cmd_stats(config: Option<PathBuf>, trace: PathBuf) -> tracedeck::Result<()> {
    let (session, sd, entries) = open_and_load(config, &trace)?;

    let mut per_cpu: BTreeMap<i32, usize> = BTreeMap::new();
    let mut per_event: BTreeMap<i32, usize> = BTreeMap::new();
    let mut lost = 0u64;
    for entry in &entries {
        match entry.lost_count() {
            Some(n) => lost += n,
            None => {
                *per_cpu.entry(entry.cpu).or_default() += 1;
                *per_event.entry(entry.event_id).or_default() += 1;
            }
        }
    }

    let total: usize = per_cpu.values().sum();
    println!("Trace: {}", trace.display());
    println!("CPUs: {}", session.stream(sd)?.n_cpus());
    println!("Entries: {}", total);
    println!("Lost events: {}", lost);
    println!();

    println!("{:>6} {:>10}", "CPU", "Count");
    println!("{}", "-".repeat(17));
    for (cpu, count) in &per_cpu {
        println!("{:>6} {:>10}", cpu, count);
    }
    println!();

    let mut sorted: Vec<_> = per_event.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1));

    println!("{:>25} {:>10} {:>8}", "Event", "Count", "Percent");
    println!("{}", "-".repeat(45));
    for (event_id, count) in sorted {
        let name = session
            .event_name(sd, *event_id)?
            .unwrap_or_else(|| format!("event-{}", event_id));
        let pct = *count as f64 / total.max(1) as f64 * 100.0;
        println!("{:>25} {:>10} {:>7.1}%", name, count, pct);
    }

    if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
        let duration_ms = (last.ts - first.ts) as f64 / 1_000_000.0;
        println!();
        println!("Duration: {:.3} ms", duration_ms);
    }
    Ok(())
}
