//!
//! gatehouse_harness
//! -----------------
//! Concurrent session-consistency check: logs in, settles on one session
//! token, then fires N workers of M sequential requests reusing that token
//! and fails if any response deviates. With `--spawn-server` it boots the
//! demo server in-process first, making this a one-command end-to-end
//! check.
//!
//! Default target: http://127.0.0.1:7878/hello with user123/pass123.
//!
//! Example:
//!   cargo run --bin gatehouse_harness -- --spawn-server --workers 20 --iterations 100
//!

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

use gatehouse::config::{valid_cookie_name, HarnessConfig, ServerConfig, DEFAULT_HTTP_PORT};
use gatehouse::harness::Harness;

fn arg_val(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i + 1 < args.len() {
        if args[i] == flag {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn print_usage() {
    println!("gatehouse_harness\n");
    println!("USAGE:");
    println!("  gatehouse_harness [OPTIONS]\n");
    println!("OPTIONS:");
    println!("  --url URL               Target endpoint (env: GATEHOUSE_URL, default http://127.0.0.1:7878/hello)");
    println!("  --workers N             Concurrent workers (env: GATEHOUSE_WORKERS, default 20)");
    println!("  --iterations N          Sequential requests per worker (env: GATEHOUSE_ITERATIONS, default 100)");
    println!("  --join-timeout SECS     Deadline for all workers to finish (env: GATEHOUSE_JOIN_TIMEOUT_SECS, default 15)");
    println!("  --user U                Login user (env: GATEHOUSE_USER, default user123)");
    println!("  --password P            Login password (env: GATEHOUSE_PASS, default pass123)");
    println!("  --cookie-name NAME      Session cookie to track (env: GATEHOUSE_COOKIE_NAME, default JSESSIONID)");
    println!("  --stabilize-attempts N  Login requests before giving up on a stable token (default 10)");
    println!("  --spawn-server          Boot the demo server in-process before the run");
    println!("  --http-port N           Port for --spawn-server (default 7878)");
    println!("  -h, --help              Show this help");
}

/// Poll until the port accepts a TCP connection or the timeout elapses.
async fn wait_for_tcp(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        match tokio::net::TcpStream::connect((host, port)).await {
            Ok(_) => return Ok(()),
            Err(err) => {
                if start.elapsed() >= timeout {
                    return Err(anyhow!("{}:{} not reachable: {}", host, port, err));
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let args: Vec<String> = std::env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        print_usage();
        return Ok(());
    }

    let mut cfg = HarnessConfig::from_env()?;
    if let Some(url) = arg_val(&args, "--url") {
        cfg.url = url;
    }
    if let Some(raw) = arg_val(&args, "--workers") {
        cfg.workers = raw.parse().map_err(|_| anyhow!("invalid --workers: {}", raw))?;
    }
    if let Some(raw) = arg_val(&args, "--iterations") {
        cfg.iterations = raw.parse().map_err(|_| anyhow!("invalid --iterations: {}", raw))?;
    }
    if let Some(raw) = arg_val(&args, "--join-timeout") {
        let secs: u64 = raw.parse().map_err(|_| anyhow!("invalid --join-timeout: {}", raw))?;
        cfg.join_timeout = Duration::from_secs(secs);
    }
    if let Some(user) = arg_val(&args, "--user") {
        cfg.username = user;
    }
    if let Some(pass) = arg_val(&args, "--password") {
        cfg.password = pass;
    }
    if let Some(name) = arg_val(&args, "--cookie-name") {
        if !valid_cookie_name(&name) {
            anyhow::bail!("invalid --cookie-name: {}", name);
        }
        cfg.cookie_name = name;
    }
    if let Some(raw) = arg_val(&args, "--stabilize-attempts") {
        cfg.stabilize_attempts =
            raw.parse().map_err(|_| anyhow!("invalid --stabilize-attempts: {}", raw))?;
    }
    cfg.validate()?;

    if has_flag(&args, "--spawn-server") {
        let http_port: u16 = match arg_val(&args, "--http-port") {
            Some(raw) => raw.parse().map_err(|_| anyhow!("invalid --http-port: {}", raw))?,
            None => DEFAULT_HTTP_PORT,
        };
        let mut server_cfg = ServerConfig::from_env()?;
        server_cfg.addr.set_port(http_port);
        // Keep the server and the harness agreeing on the cookie name.
        server_cfg.cookie_name = cfg.cookie_name.clone();
        println!("Starting gatehouse server on port {}...", http_port);
        tokio::spawn(async move {
            if let Err(err) = gatehouse::server::run_with_config(&server_cfg).await {
                eprintln!("gatehouse server terminated: {}", err);
            }
        });
        wait_for_tcp("127.0.0.1", http_port, Duration::from_secs(10))
            .await
            .context("server did not become ready")?;
        cfg.url = format!("http://127.0.0.1:{}/hello", http_port);
    }

    println!(
        "Target {} with {} workers x {} iterations...",
        cfg.url, cfg.workers, cfg.iterations
    );
    let started = Instant::now();
    let report = Harness::new(cfg).run().await?;
    let elapsed = started.elapsed();

    println!(
        "{} successful calls, and {} unsuccessful calls ({:.2?})",
        report.successful_calls,
        report.failures.len(),
        elapsed
    );
    println!(
        "Token {} stabilized after {} login request(s)",
        report.token, report.stabilize_requests
    );
    if report.cancelled_workers > 0 {
        println!(
            "WARNING: {} worker(s) force-cancelled at the join deadline",
            report.cancelled_workers
        );
    }

    if report.passed() {
        println!("Consistency check OK: every response held the stabilized token");
        Ok(())
    } else {
        for entry in report.failures.iter().take(20) {
            eprintln!(" - {}", entry);
        }
        if report.failures.len() > 20 {
            eprintln!("   ... and {} more", report.failures.len() - 20);
        }
        Err(anyhow!(
            "consistency check FAILED with {} recorded failure(s)",
            report.failures.len()
        ))
    }
}
