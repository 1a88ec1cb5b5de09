use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, Utc};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

/// Blocks are spread over this many future days.
const SPREAD_DAYS: u64 = 900;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("availd")
        .password("availd");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// The i-th future day, wrapping inside the block horizon. The server runs
/// in UTC unless AVAILD_TIMEZONE says otherwise, so stay a day clear of today.
fn future_day(i: u64) -> NaiveDate {
    Utc::now()
        .date_naive()
        .checked_add_days(Days::new(2 + i % SPREAD_DAYS))
        .unwrap()
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;

    let n = 2000u64;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let date = future_day(i / 2);
        let sql = if i % 2 == 0 {
            format!("INSERT INTO blocked_days (date, reason) VALUES ('{date}', 'bench')")
        } else {
            format!("DELETE FROM blocked_days WHERE date = '{date}'")
        };
        let t = Instant::now();
        client.batch_execute(&sql).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} block/unblock writes in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200u64;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            // Each task uses its own tenant (unique dbname from connect())
            let client = connect(&host, port).await;
            for j in 0..n_per_task {
                let date = future_day(j);
                client
                    .batch_execute(&format!(
                        "INSERT INTO blocked_times (date, slot, reason) VALUES \
                         ('{date}', '7:00 PM', 'bench'), ('{date}', '7:30 PM', 'bench')"
                    ))
                    .await
                    .ok();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks as u64 * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} slot batches = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(host: &str, port: u16) {
    // Writers: continuously toggle full-day blocks in the background
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5u64 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut i = 0u64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let date = future_day(w * 100 + i);
                let _ = client
                    .batch_execute(&format!("INSERT INTO blocked_days (date) VALUES ('{date}')"))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let monday_ish = future_day(0);
            let until = future_day(300);
            client
                .batch_execute(&format!(
                    "INSERT INTO recurring_blocks (day_of_week, start_slot, end_slot, until_date) \
                     VALUES (1, '6:30 PM', '7:30 PM', '{until}')"
                ))
                .await
                .unwrap();
            for i in 0..50 {
                let date = future_day(i * 3);
                client
                    .batch_execute(&format!("INSERT INTO blocked_days (date) VALUES ('{date}')"))
                    .await
                    .unwrap();
            }

            let end = monday_ish.checked_add_days(Days::new(90)).unwrap();
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM availability WHERE date BETWEEN '{monday_ish}' AND '{end}'"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("90-day availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10u64;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for i in 0..ops_per_conn {
                let date = future_day(i);
                client
                    .batch_execute(&format!("INSERT INTO blocked_days (date) VALUES ('{date}')"))
                    .await
                    .unwrap();
                client
                    .simple_query(&format!("SELECT * FROM availability WHERE date = '{date}'"))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} write+read pairs each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("AVAILD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("AVAILD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid AVAILD_PORT");

    println!("=== availd stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own tenants (unique dbname) to avoid interference

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
