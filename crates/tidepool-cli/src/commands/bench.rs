use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use comfy_table::{Table, presets::UTF8_FULL};
use serde::Serialize;
use tidepool_connection::{DataSourceConfig, PoolStats};
use tidepool_core::{Connection, TidepoolError};
use tidepool_driver_sqlite::SqliteConnectionFactory;

use super::probe_query;
use crate::OutputFormat;

/// Shape of the generated load
pub struct Workload {
    pub threads: usize,
    pub iterations: usize,
    pub hold_ms: u64,
}

#[derive(Debug, Default)]
struct Failures {
    timeouts: AtomicU64,
    bad_connections: AtomicU64,
    other: AtomicU64,
}

impl Failures {
    fn record(&self, error: &TidepoolError) {
        let counter = if error.is_timeout() {
            &self.timeouts
        } else if error.is_bad_connection() {
            &self.bad_connections
        } else {
            &self.other
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Serialize)]
struct BenchReport {
    threads: usize,
    iterations: usize,
    hold_ms: u64,
    elapsed_ms: u64,
    timeouts: u64,
    bad_connections: u64,
    other_errors: u64,
    stats: PoolStats,
}

pub fn bench(path: &str, workload: Workload, format: OutputFormat) -> Result<()> {
    let config = DataSourceConfig::load(path)
        .with_context(|| format!("Invalid data source configuration in {}", path))?;
    let query = probe_query(&config.pool).to_string();
    let pool = config
        .build(SqliteConnectionFactory::new())
        .context("Failed to create connection pool")?;

    tracing::info!(
        threads = workload.threads,
        iterations = workload.iterations,
        hold_ms = workload.hold_ms,
        "starting workload"
    );

    let failures = Failures::default();
    let hold = Duration::from_millis(workload.hold_ms);
    let started = Instant::now();

    thread::scope(|s| {
        for _ in 0..workload.threads {
            s.spawn(|| {
                for _ in 0..workload.iterations {
                    let conn = match pool.acquire() {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::debug!(error = %e, "acquire failed");
                            failures.record(&e);
                            continue;
                        }
                    };
                    if let Err(e) = conn.execute(&query) {
                        tracing::debug!(error = %e, "probe query failed");
                        failures.record(&e);
                    }
                    if !hold.is_zero() {
                        thread::sleep(hold);
                    }
                    conn.release();
                }
            });
        }
    });

    let report = BenchReport {
        threads: workload.threads,
        iterations: workload.iterations,
        hold_ms: workload.hold_ms,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        timeouts: failures.timeouts.load(Ordering::Relaxed),
        bad_connections: failures.bad_connections.load(Ordering::Relaxed),
        other_errors: failures.other.load(Ordering::Relaxed),
        stats: pool.stats(),
    };
    pool.close();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => println!("{}", render_table(&report)),
    }
    Ok(())
}

fn render_table(report: &BenchReport) -> Table {
    let stats = &report.stats;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Metric", "Value"]);

    let rows: Vec<(&str, String)> = vec![
        ("pool", stats.pool_id().to_string()),
        ("threads x iterations", format!("{} x {}", report.threads, report.iterations)),
        ("elapsed", format!("{} ms", report.elapsed_ms)),
        ("requests served", stats.request_count().to_string()),
        ("average request time", format!("{:?}", stats.average_request_time())),
        ("average checkout time", format!("{:?}", stats.average_checkout_time())),
        ("had to wait", stats.had_to_wait_count().to_string()),
        ("average wait time", format!("{:?}", stats.average_wait_time())),
        ("claimed overdue", stats.claimed_overdue_count().to_string()),
        ("bad connections", stats.bad_connection_count().to_string()),
        ("idle at end", stats.idle().to_string()),
        ("timeouts", report.timeouts.to_string()),
        ("gave up on bad connections", report.bad_connections.to_string()),
        ("other errors", report.other_errors.to_string()),
    ];
    for (metric, value) in rows {
        table.add_row(vec![metric.to_string(), value]);
    }
    table
}
