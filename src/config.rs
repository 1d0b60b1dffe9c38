//! Environment-driven configuration for the demo server and the harness.
//! Every knob has a default; a variable that is set but unparsable fails
//! startup instead of being silently ignored. Binaries overlay CLI flags on
//! top (flag beats env beats default).

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::gate::GatePolicy;

pub const DEFAULT_HTTP_PORT: u16 = 7878;
pub const DEFAULT_TARGET_URL: &str = "http://127.0.0.1:7878/hello";
pub const DEFAULT_WORKERS: usize = 20;
pub const DEFAULT_ITERATIONS: usize = 100;
pub const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_STABILIZE_ATTEMPTS: u32 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_COOKIE_NAME: &str = "JSESSIONID";
pub const DEFAULT_USERNAME: &str = "user123";
pub const DEFAULT_PASSWORD: &str = "pass123";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The named variable was set to something unusable.
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid(key) => write!(f, "invalid configuration value for {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Accepted truthy/falsy spellings for boolean knobs.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Cookie names travel in headers unquoted, so keep them to token chars.
pub fn valid_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse `user:pass,user2:pass2` into the credential table. The password may
/// itself contain a colon; the split happens at the first one.
fn parse_users(raw: &str) -> Option<HashMap<String, String>> {
    let mut users = HashMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (name, pass) = pair.split_once(':')?;
        if name.trim().is_empty() || pass.is_empty() {
            return None;
        }
        users.insert(name.trim().to_string(), pass.to_string());
    }
    if users.is_empty() { None } else { Some(users) }
}

/// Parse the comma-separated public path list. Entries are exact paths or a
/// prefix followed by `/*`; each must start with `/`.
fn parse_paths(raw: &str) -> Option<Vec<String>> {
    let mut paths = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if !entry.starts_with('/') {
            return None;
        }
        paths.push(entry.to_string());
    }
    Some(paths)
}

fn env_var(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Demo server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// username -> password, checked on HTTP Basic first contact.
    pub users: HashMap<String, String>,
    pub cookie_name: String,
    pub session_ttl: Duration,
    pub fixation_guard: bool,
    pub policy: GatePolicy,
    /// Paths the authenticator and the gate skip entirely. Exact match, or
    /// a `/prefix/*` pattern.
    pub public_paths: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut users = HashMap::new();
        users.insert(DEFAULT_USERNAME.to_string(), DEFAULT_PASSWORD.to_string());
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_HTTP_PORT)),
            users,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            fixation_guard: true,
            policy: GatePolicy::default(),
            public_paths: vec!["/".to_string()],
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(port) = env_var("GATEHOUSE_HTTP_PORT") {
            let port: u16 = port.parse().map_err(|_| ConfigError::Invalid("GATEHOUSE_HTTP_PORT"))?;
            cfg.addr.set_port(port);
        }
        if let Some(raw) = env_var("GATEHOUSE_USERS") {
            cfg.users = parse_users(&raw).ok_or(ConfigError::Invalid("GATEHOUSE_USERS"))?;
        }
        if let Some(name) = env_var("GATEHOUSE_COOKIE_NAME") {
            if !valid_cookie_name(&name) {
                return Err(ConfigError::Invalid("GATEHOUSE_COOKIE_NAME"));
            }
            cfg.cookie_name = name;
        }
        if let Some(secs) = env_var("GATEHOUSE_SESSION_TTL_SECS") {
            let secs: u64 =
                secs.parse().map_err(|_| ConfigError::Invalid("GATEHOUSE_SESSION_TTL_SECS"))?;
            cfg.session_ttl = Duration::from_secs(secs);
        }
        if let Some(raw) = env_var("GATEHOUSE_FIXATION_GUARD") {
            cfg.fixation_guard =
                parse_bool(&raw).ok_or(ConfigError::Invalid("GATEHOUSE_FIXATION_GUARD"))?;
        }
        if let Some(raw) = env_var("GATEHOUSE_GATE_POLICY") {
            cfg.policy =
                GatePolicy::parse(&raw).ok_or(ConfigError::Invalid("GATEHOUSE_GATE_POLICY"))?;
        }
        if let Some(raw) = env_var("GATEHOUSE_PUBLIC_PATHS") {
            cfg.public_paths =
                parse_paths(&raw).ok_or(ConfigError::Invalid("GATEHOUSE_PUBLIC_PATHS"))?;
        }
        Ok(cfg)
    }
}

/// Consistency harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub url: String,
    pub workers: usize,
    pub iterations: usize,
    pub join_timeout: Duration,
    pub username: String,
    pub password: String,
    pub cookie_name: String,
    pub stabilize_attempts: u32,
    pub request_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_TARGET_URL.to_string(),
            workers: DEFAULT_WORKERS,
            iterations: DEFAULT_ITERATIONS,
            join_timeout: Duration::from_secs(DEFAULT_JOIN_TIMEOUT_SECS),
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            stabilize_attempts: DEFAULT_STABILIZE_ATTEMPTS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl HarnessConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(url) = env_var("GATEHOUSE_URL") {
            cfg.url = url;
        }
        if let Some(raw) = env_var("GATEHOUSE_WORKERS") {
            cfg.workers = raw.parse().map_err(|_| ConfigError::Invalid("GATEHOUSE_WORKERS"))?;
        }
        if let Some(raw) = env_var("GATEHOUSE_ITERATIONS") {
            cfg.iterations =
                raw.parse().map_err(|_| ConfigError::Invalid("GATEHOUSE_ITERATIONS"))?;
        }
        if let Some(raw) = env_var("GATEHOUSE_JOIN_TIMEOUT_SECS") {
            let secs: u64 =
                raw.parse().map_err(|_| ConfigError::Invalid("GATEHOUSE_JOIN_TIMEOUT_SECS"))?;
            cfg.join_timeout = Duration::from_secs(secs);
        }
        if let Some(user) = env_var("GATEHOUSE_USER") {
            cfg.username = user;
        }
        if let Some(pass) = env_var("GATEHOUSE_PASS") {
            cfg.password = pass;
        }
        if let Some(name) = env_var("GATEHOUSE_COOKIE_NAME") {
            if !valid_cookie_name(&name) {
                return Err(ConfigError::Invalid("GATEHOUSE_COOKIE_NAME"));
            }
            cfg.cookie_name = name;
        }
        if let Some(raw) = env_var("GATEHOUSE_STABILIZE_ATTEMPTS") {
            cfg.stabilize_attempts =
                raw.parse().map_err(|_| ConfigError::Invalid("GATEHOUSE_STABILIZE_ATTEMPTS"))?;
        }
        if let Some(raw) = env_var("GATEHOUSE_REQUEST_TIMEOUT_SECS") {
            let secs: u64 =
                raw.parse().map_err(|_| ConfigError::Invalid("GATEHOUSE_REQUEST_TIMEOUT_SECS"))?;
            cfg.request_timeout = Duration::from_secs(secs);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject shapes the harness cannot run with. Stabilization needs at
    /// least two requests to ever observe two consecutive equal tokens.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("GATEHOUSE_WORKERS"));
        }
        if self.iterations == 0 {
            return Err(ConfigError::Invalid("GATEHOUSE_ITERATIONS"));
        }
        if self.stabilize_attempts < 2 {
            return Err(ConfigError::Invalid("GATEHOUSE_STABILIZE_ATTEMPTS"));
        }
        Ok(())
    }
}
