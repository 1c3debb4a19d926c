use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const ROOMS: u32 = 20;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date")
}

fn day(offset: u64) -> String {
    (epoch() + Days::new(offset)).format("%Y-%m-%d").to_string()
}

async fn connect(host: &str, port: u16, db: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(db)
        .user("innkeep")
        .password("innkeep");

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
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn setup_hotel(client: &tokio_postgres::Client) {
    for id in 1..=ROOMS {
        client
            .batch_execute(&format!(
                "INSERT INTO rooms (id, kind, price) VALUES ({id}, 'double', 100)"
            ))
            .await
            .unwrap();
    }
}

fn booking_sql(room: u32, from: u64, nights: u64) -> String {
    format!(
        "INSERT INTO reservations (room_id, from_date, to_date, holder, phone) \
         VALUES ({room}, '{}', '{}', 'bench', '000')",
        day(from),
        day(from + nights - 1)
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    let client = connect(host, port, &db).await;
    setup_hotel(&client).await;

    // Two-night stays back to back in every room
    let n = 2000u64;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();
    for i in 0..n {
        let room = (i % ROOMS as u64) as u32 + 1;
        let from = (i / ROOMS as u64) * 2;
        let t = Instant::now();
        client.batch_execute(&booking_sql(room, from, 2)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_contended(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    setup_hotel(&connect(host, port, &db).await).await;

    // Every task tries to book the same weeks; exactly one wins each slot
    let n_tasks = 10;
    let slots = 100u64;
    let booked = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let db = db.clone();
        let booked = booked.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            for slot in 0..slots {
                let room = (slot % ROOMS as u64) as u32 + 1;
                let from = (slot / ROOMS as u64) * 7;
                match client.batch_execute(&booking_sql(room, from, 7)).await {
                    Ok(()) => booked.fetch_add(1, Ordering::Relaxed),
                    Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    println!(
        "  {n_tasks} tasks x {slots} slots in {:.2}s: {} booked, {} rejected",
        start.elapsed().as_secs_f64(),
        booked.load(Ordering::Relaxed),
        rejected.load(Ordering::Relaxed),
    );
    assert_eq!(booked.load(Ordering::Relaxed), slots as usize, "double booking detected");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    let setup_client = connect(host, port, &db).await;
    setup_hotel(&setup_client).await;
    for i in 0..200u64 {
        let room = (i % ROOMS as u64) as u32 + 1;
        setup_client
            .batch_execute(&booking_sql(room, (i / ROOMS as u64) * 3, 2))
            .await
            .unwrap();
    }
    drop(setup_client);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..4u64 {
        let host = host.to_string();
        let db = db.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let room = ((w * 5 + i) % ROOMS as u64) as u32 + 1;
                let _ = client.batch_execute(&booking_sql(room, 400 + i, 1)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 8;
    let reads_per_reader = 300;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let db = db.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let sql = format!(
                "SELECT * FROM availability WHERE from_date >= '{}' AND to_date <= '{}'",
                day(0),
                day(89)
            );
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client.simple_query(&sql).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query (20 rooms x 90 days)", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("INNKEEP_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("INNKEEP_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid INNKEEP_PORT");

    println!("=== innkeep stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential reservation throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended reservations");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n=== benchmark complete ===");
}
