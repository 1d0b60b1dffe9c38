use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use gatehouse::config::{valid_cookie_name, ServerConfig};
use gatehouse::gate::GatePolicy;

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
    println!("gatehouse server\n");
    println!("USAGE:");
    println!("  gatehouse [--http-port N] [--policy P] [--cookie-name NAME] [--no-fixation-guard]\n");
    println!("OPTIONS:");
    println!("  --http-port N        HTTP port (env: GATEHOUSE_HTTP_PORT, default 7878)");
    println!("  --policy P           Gate policy: require-application | require-paired");
    println!("                       (env: GATEHOUSE_GATE_POLICY, default require-application)");
    println!("  --cookie-name NAME   Session cookie name (env: GATEHOUSE_COOKIE_NAME, default JSESSIONID)");
    println!("  --no-fixation-guard  Keep the first session token instead of rotating it on reuse");
    println!("  -h, --help           Show this help\n");
    println!("Further environment variables: GATEHOUSE_USERS (user:pass,...),");
    println!("GATEHOUSE_SESSION_TTL_SECS, GATEHOUSE_PUBLIC_PATHS, GATEHOUSE_FIXATION_GUARD.");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!(
        r"             _       _
  __ _  __ _| |_ ___| |__   ___  _   _ ___  ___
 / _` |/ _` | __/ _ \ '_ \ / _ \| | | / __|/ _ \
| (_| | (_| | ||  __/ | | | (_) | |_| \__ \  __/
 \__, |\__,_|\__\___|_| |_|\___/ \__,_|___/\___|
 |___/"
    );

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        print_usage();
        return Ok(());
    }

    let mut cfg = ServerConfig::from_env()?;
    if let Some(raw) = arg_val(&args, "--http-port") {
        let port: u16 = raw.parse().map_err(|_| anyhow::anyhow!("invalid --http-port: {}", raw))?;
        cfg.addr.set_port(port);
    }
    if let Some(raw) = arg_val(&args, "--policy") {
        cfg.policy = GatePolicy::parse(&raw)
            .ok_or_else(|| anyhow::anyhow!("unknown gate policy: {}", raw))?;
    }
    if let Some(name) = arg_val(&args, "--cookie-name") {
        if !valid_cookie_name(&name) {
            anyhow::bail!("invalid --cookie-name: {}", name);
        }
        cfg.cookie_name = name;
    }
    if has_flag(&args, "--no-fixation-guard") {
        cfg.fixation_guard = false;
    }

    info!(
        target: "gatehouse",
        "gatehouse starting: addr={}, policy={:?}, cookie='{}', fixation_guard={}, users={}",
        cfg.addr,
        cfg.policy,
        cfg.cookie_name,
        cfg.fixation_guard,
        cfg.users.len()
    );

    gatehouse::server::run_with_config(&cfg).await
}
