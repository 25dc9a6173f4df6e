//! End-to-end throughput benchmark for Relay.
//!
//! Connects N WebSocket clients to a running relay; every client sends as fast
//! as it can and counts what the relay delivers to it.
//!
//! ```bash
//! e2e_throughput [clients] [url]
//! ```

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://127.0.0.1:3000/ws";
const PAYLOAD_SIZE: usize = 64;
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║          Relay End-to-End Throughput Benchmark               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_broadcast_benchmark(num_clients, url).await;
}

async fn run_broadcast_benchmark(num_clients: usize, url: String) {
    println!("📊 Broadcast Benchmark: {} clients -> {}", num_clients, url);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let received = Arc::new(AtomicU64::new(0));
    let sent = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let received = Arc::clone(&received);
        let sent = Arc::clone(&sent);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(&url, received, sent, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    // Wait for all clients to connect
    barrier.wait().await;
    println!("✓ All {} clients connected", num_clients);

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    sent.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let total_received = received.load(Ordering::SeqCst);
    let total_sent = sent.load(Ordering::SeqCst);

    // Every message should reach num_clients - 1 peers
    let expected = total_sent * (num_clients.saturating_sub(1) as u64);
    let delivery_ratio = if expected == 0 {
        0.0
    } else {
        total_received as f64 / expected as f64 * 100.0
    };

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Clients:              {:>10}                           ║", num_clients);
    println!("║  Duration:             {:>10.2}s                          ║", elapsed);
    println!("║  Messages Sent:        {:>10}                           ║", total_sent);
    println!("║  Deliveries:           {:>10}                           ║", total_received);
    println!(
        "║  Throughput:           {:>10.0} msg/s                    ║",
        total_received as f64 / elapsed
    );
    println!("║  Delivered:            {:>10.1}%                          ║", delivery_ratio);
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    url: &str,
    received: Arc<AtomicU64>,
    sent: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // Wait for all clients to be ready
    barrier.wait().await;

    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Binary(_) | Message::Text(_)) => {
                    received.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    let message = Message::Binary(vec![0u8; PAYLOAD_SIZE]);
    while sender.send(message.clone()).await.is_ok() {
        sent.fetch_add(1, Ordering::Relaxed);
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
