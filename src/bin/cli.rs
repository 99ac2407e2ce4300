//! Strata CLI
//!
//! Command-line client for a running Strata server:
//! - Ingest samples, one at a time or from CSV
//! - Summaries and downsampled data for series and groups
//! - Trigger aggregation passes

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "strata-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Client for the Strata metrics server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// API server URL
    #[arg(long, default_value = "http://localhost:8086", global = true)]
    pub api_url: String,

    /// Output format (table, json, csv)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest a single sample
    Ingest {
        /// Series id
        series_id: u32,
        /// Value
        value: f64,
        /// Timestamp (default: now). Supports: "now", "yesterday", ISO 8601, Unix millis
        #[arg(short, long)]
        time: Option<String>,
    },

    /// Import samples from a CSV file with series_id, timestamp and value columns
    Import {
        /// CSV file path
        path: PathBuf,
        /// Samples per request
        #[arg(short, long, default_value = "1000")]
        batch_size: usize,
        /// Parse only, don't send
        #[arg(long)]
        dry_run: bool,
    },

    /// Summary (min, max, avg) over a time range
    Summary {
        /// Series ids; more than one queries them as a group
        #[arg(required = true)]
        series: Vec<u32>,
        /// Time range ending now (e.g., 6h, 7d, 2w)
        #[arg(short, long, default_value = "1d")]
        last: String,
    },

    /// Downsampled data over a time range
    Data {
        /// Series ids; more than one queries them as a group
        #[arg(required = true)]
        series: Vec<u32>,
        /// Time range ending now (e.g., 6h, 7d, 2w)
        #[arg(short, long, default_value = "1d")]
        last: String,
        /// Number of buckets
        #[arg(short, long, default_value = "24")]
        buckets: usize,
    },

    /// Most recent raw value of a series
    Latest {
        /// Series id
        series_id: u32,
    },

    /// Run the aggregation passes that are due
    Aggregate,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// One row of an import file
#[derive(Debug, Deserialize)]
struct CsvSample {
    series_id: u32,
    timestamp: String,
    value: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Ingest {
            series_id,
            value,
            time,
        } => {
            let timestamp = match time {
                Some(t) => parse_timestamp(&t)?,
                None => Utc::now().timestamp_millis(),
            };

            let body = serde_json::json!({
                "samples": [{
                    "series_id": series_id,
                    "value": value,
                    "timestamp": timestamp,
                }],
            });

            let result = post_json(&client, &cli.api_url, "/api/v1/samples", &body).await?;
            if result["accepted"].as_u64() == Some(1) {
                println!("Stored series {} = {} @ {}", series_id, value, timestamp);
            } else {
                eprintln!("Sample rejected: {}", first_sample_error(&result));
                std::process::exit(1);
            }
        }

        Commands::Import {
            path,
            batch_size,
            dry_run,
        } => {
            if !path.exists() {
                eprintln!("File not found: {:?}", path);
                std::process::exit(1);
            }

            let mut reader = csv::Reader::from_path(&path)?;
            let mut samples = Vec::new();
            let mut errors = Vec::new();

            for (line, record) in reader.deserialize::<CsvSample>().enumerate() {
                // Header is line 1
                let line = line + 2;
                match record {
                    Ok(row) => match parse_timestamp(&row.timestamp) {
                        Ok(timestamp) => samples.push(serde_json::json!({
                            "series_id": row.series_id,
                            "value": row.value,
                            "timestamp": timestamp,
                        })),
                        Err(e) => errors.push(format!("line {}: {}", line, e)),
                    },
                    Err(e) => errors.push(format!("line {}: {}", line, e)),
                }
            }

            println!("Parse results:");
            println!("  Samples: {}", samples.len());
            println!("  Rows failed: {}", errors.len());

            if !errors.is_empty() {
                println!();
                println!("Errors (first 10):");
                for error in errors.iter().take(10) {
                    println!("  {}", error);
                }
            }

            if dry_run {
                println!();
                println!("(Dry run - no data was sent)");
            } else if !samples.is_empty() {
                println!();
                println!("Importing data...");

                let mut accepted = 0;
                let mut rejected = 0;

                for batch in samples.chunks(batch_size.max(1)) {
                    let body = serde_json::json!({ "samples": batch });
                    match post_json(&client, &cli.api_url, "/api/v1/samples", &body).await {
                        Ok(result) => {
                            accepted += result["accepted"].as_u64().unwrap_or(0);
                            rejected += result["rejected"].as_u64().unwrap_or(0);
                        }
                        Err(e) => {
                            eprintln!("  Batch failed: {}", e);
                            rejected += batch.len() as u64;
                        }
                    }
                }

                println!("  Imported: {}", accepted);
                if rejected > 0 {
                    println!("  Rejected: {}", rejected);
                }
            }
        }

        Commands::Summary { series, last } => {
            let (begin, end) = last_range(&last)?;

            let data = if series.len() == 1 {
                get_json(
                    &client,
                    &cli.api_url,
                    &format!(
                        "/api/v1/series/{}/summary?begin={}&end={}",
                        series[0], begin, end
                    ),
                )
                .await?
            } else {
                let body = serde_json::json!({
                    "series_ids": series,
                    "begin": begin,
                    "end": end,
                });
                post_json(&client, &cli.api_url, "/api/v1/groups/summary", &body).await?
            };

            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&data)?),
                "csv" => {
                    println!("timestamp,tier,count,min,max,avg");
                    println!(
                        "{},{},{},{},{},{}",
                        data["timestamp"].as_i64().unwrap_or(begin),
                        data["tier"].as_str().unwrap_or("-"),
                        data["count"].as_u64().unwrap_or(0),
                        csv_value(&data["min"]),
                        csv_value(&data["max"]),
                        csv_value(&data["avg"]),
                    );
                }
                _ => {
                    println!("Range: {} .. {}", format_time(begin), format_time(end));
                    println!("Tier:  {}", data["tier"].as_str().unwrap_or("-"));
                    println!("Count: {}", data["count"].as_u64().unwrap_or(0));
                    println!("Min:   {}", table_value(&data["min"]));
                    println!("Max:   {}", table_value(&data["max"]));
                    println!("Avg:   {}", table_value(&data["avg"]));
                }
            }
        }

        Commands::Data {
            series,
            last,
            buckets,
        } => {
            let (begin, end) = last_range(&last)?;

            let data = if series.len() == 1 {
                get_json(
                    &client,
                    &cli.api_url,
                    &format!(
                        "/api/v1/series/{}/data?begin={}&end={}&buckets={}",
                        series[0], begin, end, buckets
                    ),
                )
                .await?
            } else {
                let body = serde_json::json!({
                    "series_ids": series,
                    "begin": begin,
                    "end": end,
                    "buckets": buckets,
                });
                post_json(&client, &cli.api_url, "/api/v1/groups/data", &body).await?
            };

            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&data)?),
                "csv" => print_buckets_csv(&data),
                _ => print_buckets_table(&data),
            }
        }

        Commands::Latest { series_id } => {
            let response = client
                .get(format!("{}/api/v1/series/{}/latest", cli.api_url, series_id))
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                println!("No data for series {}", series_id);
                return Ok(());
            }
            let data = read_response(response).await?;

            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&data)?),
                _ => {
                    println!(
                        "{} @ {}",
                        table_value(&data["value"]),
                        data["timestamp"]
                            .as_i64()
                            .map(format_time)
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            }
        }

        Commands::Aggregate => {
            let data = post_json(
                &client,
                &cli.api_url,
                "/api/v1/aggregation/run",
                &serde_json::json!({}),
            )
            .await?;

            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&data)?),
                _ => {
                    println!("Passes:             {}", data["passes"].as_u64().unwrap_or(0));
                    println!(
                        "Windows aggregated: {}",
                        data["aggregated_windows"].as_u64().unwrap_or(0)
                    );
                    println!(
                        "Windows failed:     {}",
                        data["failed_windows"].as_u64().unwrap_or(0)
                    );
                }
            }
        }

        Commands::Config { output } => {
            let config = strata::config::generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

async fn get_json(
    client: &reqwest::Client,
    api_url: &str,
    path: &str,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let response = client.get(format!("{}{}", api_url, path)).send().await?;
    read_response(response).await
}

async fn post_json(
    client: &reqwest::Client,
    api_url: &str,
    path: &str,
    body: &serde_json::Value,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}{}", api_url, path))
        .json(body)
        .send()
        .await?;
    read_response(response).await
}

async fn read_response(
    response: reqwest::Response,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(text);
    Err(format!("Request failed ({}): {}", status, message).into())
}

fn first_sample_error(result: &serde_json::Value) -> String {
    result["errors"][0]["error"]
        .as_str()
        .unwrap_or("unknown error")
        .to_string()
}

fn parse_timestamp(s: &str) -> Result<i64, Box<dyn std::error::Error>> {
    let s = s.trim();
    match s.to_lowercase().as_str() {
        "now" => return Ok(Utc::now().timestamp_millis()),
        "yesterday" => return Ok((Utc::now() - Duration::days(1)).timestamp_millis()),
        _ => {}
    }

    if let Ok(millis) = s.parse::<i64>() {
        return Ok(millis);
    }

    let parsed = chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|_| format!("Invalid timestamp: {}", s))?;
    Ok(parsed.timestamp_millis())
}

/// `[now - last, now)` in epoch millis
fn last_range(last: &str) -> Result<(i64, i64), Box<dyn std::error::Error>> {
    let duration = parse_duration(last)?;
    let end = Utc::now();
    let start = end - duration;
    Ok((start.timestamp_millis(), end.timestamp_millis()))
}

fn parse_duration(s: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let s = s.trim().to_lowercase();

    if let Some(hours) = s.strip_suffix('h') {
        Ok(Duration::hours(hours.parse()?))
    } else if let Some(days) = s.strip_suffix('d') {
        Ok(Duration::days(days.parse()?))
    } else if let Some(weeks) = s.strip_suffix('w') {
        Ok(Duration::weeks(weeks.parse()?))
    } else if let Some(years) = s.strip_suffix('y') {
        Ok(Duration::days(years.parse::<i64>()? * 365))
    } else {
        Err(format!("Invalid duration format: {}. Use: 6h, 7d, 4w, 1y", s).into())
    }
}

fn format_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

// Empty buckets and empty summaries come back with null values
fn table_value(v: &serde_json::Value) -> String {
    v.as_f64()
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "-".to_string())
}

fn csv_value(v: &serde_json::Value) -> String {
    v.as_f64().map(|v| v.to_string()).unwrap_or_default()
}

fn print_buckets_table(data: &serde_json::Value) {
    let buckets = match data["buckets"].as_array() {
        Some(b) if !b.is_empty() => b,
        _ => {
            println!("No data");
            return;
        }
    };

    println!("{:<17} | {:<10} | {:<10} | {:<10}", "Start", "Min", "Max", "Avg");
    println!("{}", "-".repeat(56));

    for bucket in buckets {
        println!(
            "{:<17} | {:<10} | {:<10} | {:<10}",
            bucket["start_time"]
                .as_i64()
                .map(format_time)
                .unwrap_or_else(|| "-".to_string()),
            table_value(&bucket["min"]),
            table_value(&bucket["max"]),
            table_value(&bucket["avg"]),
        );
    }
}

fn print_buckets_csv(data: &serde_json::Value) {
    let buckets = match data["buckets"].as_array() {
        Some(b) => b,
        None => return,
    };

    println!("start_time,min,max,avg");
    for bucket in buckets {
        println!(
            "{},{},{},{}",
            bucket["start_time"].as_i64().unwrap_or(0),
            csv_value(&bucket["min"]),
            csv_value(&bucket["max"]),
            csv_value(&bucket["avg"]),
        );
    }
}
