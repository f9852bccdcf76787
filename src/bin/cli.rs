//! WaffleDB CLI
//!
//! Command-line front end over the embedded engine: create/destroy
//! databases, write and query points, run aggregates and the textual query
//! form, and move data through CSV/JSON.
//!
//! Exit code 0 on success, 1 on any usage or runtime error; errors go to
//! stderr.

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use waffledb::{Database, QueryOutput, TagMap, TimePoint};

#[derive(Parser)]
#[command(name = "waffledb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Embedded time-series database")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a database
    Create {
        /// Database name
        name: String,
    },

    /// Delete a database and all its files
    Destroy {
        /// Database name
        name: String,
    },

    /// Write one point
    Write {
        /// Database name
        name: String,
        /// Metric name
        metric: String,
        /// Value
        value: f64,
        /// Timestamp in seconds (default: now)
        #[arg(short, long)]
        time: Option<u64>,
        /// Tags in key=value form
        #[arg(short = 'T', long)]
        tags: Vec<String>,
    },

    /// Range scan over a metric
    Query {
        /// Database name
        name: String,
        /// Metric name
        metric: String,
        /// Range start (inclusive)
        #[arg(long, default_value_t = 0)]
        start: u64,
        /// Range end (inclusive)
        #[arg(long, default_value_t = u64::MAX)]
        end: u64,
        /// Tags in key=value form
        #[arg(short = 'T', long)]
        tags: Vec<String>,
    },

    /// Aggregate over a metric range
    Aggregate {
        /// Database name
        name: String,
        /// One of: avg, sum, min, max, count
        func: String,
        /// Metric name
        metric: String,
        /// Range start (inclusive)
        #[arg(long, default_value_t = 0)]
        start: u64,
        /// Range end (inclusive)
        #[arg(long, default_value_t = u64::MAX)]
        end: u64,
        /// Tags in key=value form
        #[arg(short = 'T', long)]
        tags: Vec<String>,
    },

    /// Run a textual query over the last 24 hours
    Select {
        /// Database name
        name: String,
        /// e.g. 'SELECT avg(cpu.usage) FROM cpu.usage'
        query: String,
    },

    /// List known metrics
    ListMetrics {
        /// Database name
        name: String,
    },

    /// Remove a metric and all its data
    DeleteMetric {
        /// Database name
        name: String,
        /// Metric name
        metric: String,
    },

    /// Batch-write points from a CSV file (timestamp,value[,tags] rows)
    ImportCsv {
        /// Database name
        name: String,
        /// Metric to import into
        metric: String,
        /// CSV file path
        path: PathBuf,
    },

    /// Import points from a JSON array file
    ImportJson {
        /// Database name
        name: String,
        /// JSON file path
        path: PathBuf,
    },

    /// Export a metric range to CSV
    ExportCsv {
        /// Database name
        name: String,
        /// Metric to export
        metric: String,
        /// Output file path
        path: PathBuf,
        /// Range start (inclusive)
        #[arg(long, default_value_t = 0)]
        start: u64,
        /// Range end (inclusive)
        #[arg(long, default_value_t = u64::MAX)]
        end: u64,
    },

    /// Show engine statistics
    Stats {
        /// Database name
        name: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Create { name } => {
            let db = Database::open(&name)?;
            println!("created database '{}' at {:?}", name, db.path());
            db.close()?;
        }

        Commands::Destroy { name } => {
            let db = Database::open(&name)?;
            db.destroy();
            println!("destroyed database '{}'", name);
        }

        Commands::Write {
            name,
            metric,
            value,
            time,
            tags,
        } => {
            let timestamp = match time {
                Some(t) => t,
                None => Utc::now().timestamp().max(0) as u64,
            };
            let point = TimePoint::new(metric, timestamp, value).tags(parse_tags(&tags)?);

            let db = Database::open(&name)?;
            db.write(point)?;
            db.close()?;
            println!("ok");
        }

        Commands::Query {
            name,
            metric,
            start,
            end,
            tags,
        } => {
            let tags = parse_tags(&tags)?;
            let db = Database::open(&name)?;
            let points = db.query(&metric, start, end, &tags);
            print_points(&points);
            db.close()?;
        }

        Commands::Aggregate {
            name,
            func,
            metric,
            start,
            end,
            tags,
        } => {
            let tags = parse_tags(&tags)?;
            let db = Database::open(&name)?;
            let value = match func.to_ascii_lowercase().as_str() {
                "avg" => db.avg(&metric, start, end, &tags),
                "sum" => db.sum(&metric, start, end, &tags),
                "min" => db.min(&metric, start, end, &tags),
                "max" => db.max(&metric, start, end, &tags),
                "count" => db.count(&metric, start, end, &tags) as f64,
                other => {
                    db.close()?;
                    return Err(format!("unknown aggregate function '{}'", other).into());
                }
            };
            println!("{}", value);
            db.close()?;
        }

        Commands::Select { name, query } => {
            let db = Database::open(&name)?;
            let output = waffledb::execute(&db, &query);
            db.close()?;
            match output? {
                QueryOutput::Value(value) => println!("{}", value),
                QueryOutput::Points(points) => print_points(&points),
            }
        }

        Commands::ListMetrics { name } => {
            let db = Database::open(&name)?;
            for metric in db.get_metrics() {
                println!("{}", metric);
            }
            db.close()?;
        }

        Commands::DeleteMetric { name, metric } => {
            let db = Database::open(&name)?;
            db.delete_metric(&metric)?;
            db.close()?;
            println!("deleted metric '{}'", metric);
        }

        Commands::ImportCsv { name, metric, path } => {
            let db = Database::open(&name)?;
            let result = waffledb::import_csv(&db, &path, &metric)?;
            db.close()?;

            println!(
                "imported {} points ({} rows failed)",
                result.rows_imported, result.rows_failed
            );
            for error in &result.errors {
                eprintln!("  {}", error);
            }
        }

        Commands::ImportJson { name, path } => {
            let db = Database::open(&name)?;
            let count = waffledb::import_json(&db, &path)?;
            db.close()?;
            println!("imported {} points", count);
        }

        Commands::ExportCsv {
            name,
            metric,
            path,
            start,
            end,
        } => {
            let db = Database::open(&name)?;
            let count = waffledb::export_csv(&db, &path, &metric, start, end)?;
            db.close()?;
            println!("exported {} points to {:?}", count, path);
        }

        Commands::Stats { name } => {
            let db = Database::open(&name)?;
            println!("{}", db.stats());
            db.close()?;
        }
    }

    Ok(())
}

fn parse_tags(raw: &[String]) -> Result<TagMap, String> {
    let mut tags = TagMap::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("invalid tag '{}', expected key=value", entry))?;
        tags.insert(key.to_string(), value.to_string());
    }
    Ok(tags)
}

fn print_points(points: &[waffledb::TimePoint]) {
    if points.is_empty() {
        println!("no points");
        return;
    }

    for point in points {
        let mut pairs: Vec<String> = point.tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        pairs.sort();
        println!("{}\t{}\t{}", point.timestamp, point.value, pairs.join(";"));
    }
}
