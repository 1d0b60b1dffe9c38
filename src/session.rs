//! Demo session layer: opaque tokens, TTL expiry, and the one-shot
//! fixation-guard rotation that produces the token hand-over the harness
//! must stabilize across.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// One live session: who authenticated, which token names the session, and
/// whether the fixation guard already rotated it.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub name: String,
    pub token: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
    pub rotated: bool,
}

/// Issues and validates session records. Holds only the policy knobs; the
/// live records sit in the server's shared map.
#[derive(Debug, Clone, Copy)]
pub struct SessionManager {
    pub ttl: Duration,
    /// Re-issue the token on the first cookie-authenticated reuse of a
    /// session, the way container runtimes guard against session fixation.
    /// Each session's first token is thereby superseded exactly once.
    pub fixation_guard: bool,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(60 * 60), fixation_guard: true }
    }
}

/// 32 uppercase hex characters from 16 bytes of OS randomness.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    let _ = getrandom::getrandom(&mut bytes);
    let mut token = String::with_capacity(32);
    for b in &bytes {
        let _ = write!(&mut token, "{:02X}", b);
    }
    token
}

impl SessionManager {
    /// Create a fresh session for an authenticated user.
    pub fn issue(&self, name: &str) -> SessionRecord {
        let now = Instant::now();
        SessionRecord {
            name: name.to_string(),
            token: generate_token(),
            issued_at: now,
            expires_at: now + self.ttl,
            rotated: false,
        }
    }

    /// True while the record is within its TTL.
    pub fn is_live(&self, record: &SessionRecord) -> bool {
        Instant::now() < record.expires_at
    }

    /// Whether a cookie-presented session must be re-keyed before reuse.
    pub fn needs_rotation(&self, record: &SessionRecord) -> bool {
        self.fixation_guard && !record.rotated
    }

    /// Re-issue the token for an existing session. Identity and expiry
    /// carry over; only the token changes, and only once.
    pub fn rotate(&self, record: &SessionRecord) -> SessionRecord {
        SessionRecord {
            name: record.name.clone(),
            token: generate_token(),
            issued_at: record.issued_at,
            expires_at: record.expires_at,
            rotated: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_32_uppercase_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn rotation_changes_token_and_nothing_else() {
        let manager = SessionManager::default();
        let first = manager.issue("user123");
        assert!(manager.needs_rotation(&first));

        let rotated = manager.rotate(&first);
        assert_eq!(rotated.name, "user123");
        assert_eq!(rotated.expires_at, first.expires_at);
        assert_ne!(rotated.token, first.token);
        assert!(rotated.rotated);
        assert!(!manager.needs_rotation(&rotated));
    }

    #[test]
    fn disabled_guard_never_rotates() {
        let manager = SessionManager { fixation_guard: false, ..SessionManager::default() };
        let record = manager.issue("user123");
        assert!(!manager.needs_rotation(&record));
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let manager = SessionManager { ttl: Duration::ZERO, ..SessionManager::default() };
        let record = manager.issue("user123");
        assert!(!manager.is_live(&record));
    }
}
