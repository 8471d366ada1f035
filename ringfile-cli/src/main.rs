use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use ringfile::format::{Consolidation, Rrd};
use ringfile::timespec::{parse_timespec, resolve_start_end};
use ringfile::update::wall_clock;
use ringfile::RrdFile;

#[derive(Parser, Debug)]
#[command(name = "ringfile")]
#[command(about = "Fixed-size round-robin database tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new database file from DS:... and RRA:... specs
    Create {
        file: PathBuf,
        /// Primary data point interval in seconds
        #[arg(long, default_value_t = 300)]
        step: u64,
        /// Timestamp of the last update before the first sample
        /// (defaults to ten seconds ago)
        #[arg(long)]
        start: Option<String>,
        /// Fail instead of replacing an existing file
        #[arg(long)]
        no_overwrite: bool,
        /// DS:name:TYPE:... and RRA:CF:... definitions
        #[arg(required = true)]
        spec: Vec<String>,
    },
    /// Feed samples into a database
    Update {
        file: PathBuf,
        /// Colon-separated data source names giving the value order
        #[arg(long)]
        template: Option<String>,
        /// One or more <time>:<value>[:<value>...] tuples
        #[arg(required = true)]
        samples: Vec<String>,
    },
    /// Read a window of consolidated values
    Fetch {
        file: PathBuf,
        /// Consolidation function (AVERAGE, MIN, MAX, LAST, ...)
        cf: String,
        #[arg(long, default_value = "end-1d")]
        start: String,
        #[arg(long, default_value = "now")]
        end: String,
        /// Preferred step in seconds; the closest archive wins
        #[arg(long)]
        resolution: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Dump the configuration and prep state of a database
    Info {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the timestamp of the most recent update
    Last { file: PathBuf },
}

/// Accept either raw epoch seconds or an at-style expression.
fn parse_time(input: &str, now: i64) -> Result<i64> {
    if let Ok(t) = input.parse::<i64>() {
        if t >= 0 {
            return Ok(t);
        }
    }
    let spec = parse_timespec(input, now)
        .with_context(|| format!("bad time specification '{input}'"))?;
    spec.resolve()
        .with_context(|| format!("bad time specification '{input}'"))
}

fn run_create(
    file: &PathBuf,
    step: u64,
    start: Option<&str>,
    no_overwrite: bool,
    spec: &[String],
) -> Result<()> {
    let now = wall_clock().0;
    let last_up = match start {
        Some(s) => parse_time(s, now)?,
        None => now - 10,
    };
    ringfile::create(file, step, last_up, no_overwrite, spec)
        .with_context(|| format!("creating {}", file.display()))?;
    Ok(())
}

fn run_fetch(
    file: &PathBuf,
    cf: &str,
    start: &str,
    end: &str,
    resolution: Option<u64>,
    json: bool,
) -> Result<()> {
    let cf = Consolidation::parse(cf)
        .with_context(|| format!("unknown consolidation function '{cf}'"))?;
    let now = wall_clock().0;
    let start_spec = parse_timespec(start, now)?;
    let end_spec = parse_timespec(end, now)?;
    let (start_t, end_t) = resolve_start_end(&start_spec, &end_spec)?;

    let result = ringfile::fetch(file, cf, start_t, end_t, resolution.unwrap_or(1))
        .with_context(|| format!("fetching from {}", file.display()))?;

    if json {
        let rows: Vec<serde_json::Value> = (0..result.rows())
            .map(|r| {
                serde_json::json!({
                    "time": result.timestamp(r),
                    "values": result.row(r),
                })
            })
            .collect();
        let doc = serde_json::json!({
            "start": result.start,
            "end": result.end,
            "step": result.step,
            "ds": result.ds_names,
            "rows": rows,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let header: Vec<String> = result
        .ds_names
        .iter()
        .map(|n| format!("{n:>18}"))
        .collect();
    println!("          {}", header.join(" "));
    for r in 0..result.rows() {
        let cells: Vec<String> = result
            .row(r)
            .iter()
            .map(|v| {
                if v.is_nan() {
                    format!("{:>18}", "nan")
                } else {
                    format!("{v:>18.10e}")
                }
            })
            .collect();
        println!("{}: {}", result.timestamp(r), cells.join(" "));
    }
    Ok(())
}

fn run_info(file: &PathBuf, json: bool) -> Result<()> {
    let entries =
        ringfile::info(file).with_context(|| format!("reading {}", file.display()))?;
    if json {
        let mut map = serde_json::Map::new();
        for (key, value) in &entries {
            map.insert(key.clone(), serde_json::to_value(value)?);
        }
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (key, value) in &entries {
            println!("{key} = {value}");
        }
    }
    Ok(())
}

fn run_last(file: &PathBuf) -> Result<()> {
    let mapped =
        RrdFile::open(file, false).with_context(|| format!("opening {}", file.display()))?;
    let rrd = Rrd::decode(mapped.data())?;
    println!("{}", rrd.live_head.last_up);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Command::Create {
            file,
            step,
            start,
            no_overwrite,
            spec,
        } => {
            if *step < 1 {
                bail!("step must be at least one second");
            }
            run_create(file, *step, start.as_deref(), *no_overwrite, spec)
        }
        Command::Update {
            file,
            template,
            samples,
        } => ringfile::update(file, template.as_deref(), samples)
            .with_context(|| format!("updating {}", file.display())),
        Command::Fetch {
            file,
            cf,
            start,
            end,
            resolution,
            json,
        } => run_fetch(file, cf, start, end, *resolution, *json),
        Command::Info { file, json } => run_info(file, *json),
        Command::Last { file } => run_last(file),
    }
}
