//! Standalone WebM relay server
//!
//! Run with: webm-relay [BIND_ADDR]
//!
//! ## Publishing (send stream)
//!
//! With ffmpeg:
//!   ffmpeg -re -i input.mp4 -c:v libvpx -c:a libvorbis -f webm \
//!       -method PUT http://localhost:8080/test
//!
//! ## Playing (receive stream)
//!
//! With mpv:    mpv http://localhost:8080/test
//! With ffplay: ffplay http://localhost:8080/test
//! Or open the URL in any browser that plays WebM.
//!
//! ## Features
//!
//! - Late-joiner support: viewers joining mid-stream start at a buffered keyframe
//! - Producer reconnect: streams stay alive for a 10 s grace period
//! - Backpressure: slow viewers skip to the next keyframe instead of buffering

use std::net::SocketAddr;
use std::sync::Arc;

use webm_relay::{BroadcastConfig, BroadcastSet, NoHooks, ServerConfig};

/// Parse bind address from a command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:8080
/// - "localhost:9000" -> 127.0.0.1:9000
/// - "0.0.0.0:8080" -> 0.0.0.0:8080
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 8080;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: webm-relay [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:8080)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let bind_addr = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => "0.0.0.0:8080".parse().unwrap(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("webm_relay=info".parse()?),
        )
        .init();

    let set = BroadcastSet::new(BroadcastConfig::default(), Arc::new(NoHooks));
    let config = ServerConfig::default().bind(bind_addr);
    let app = webm_relay::router(set, config);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "WebM relay listening");

    println!("Relay running on http://{}", bind_addr);
    println!();
    println!("=== Publish a stream ===");
    println!("ffmpeg: ffmpeg -re -i input.mp4 -c:v libvpx -c:a libvorbis -f webm \\");
    println!("            -method PUT http://{}/test", bind_addr);
    println!();
    println!("=== Play a stream ===");
    println!("mpv:    mpv http://{}/test", bind_addr);
    println!("ffplay: ffplay http://{}/test", bind_addr);
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    Ok(())
}
