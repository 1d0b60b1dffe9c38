//! Gate rejection taxonomy and HTTP mapping.
//! The verification gate refuses requests with one of a closed set of
//! conditions; the serde-tagged form is embedded verbatim in error bodies so
//! operators see exactly what the gate observed.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateError {
    /// The ambient subject is entirely absent: the authentication stage is
    /// not wired in front of the gate. A deployment defect, not a
    /// per-request authentication failure.
    Configuration { message: String },
    /// A subject was present but no entry classifies as the application
    /// identity. Carries every observed entry for diagnosis.
    IdentityMissing { observed: Vec<String> },
    /// The application identity is present but unaccompanied, so the
    /// propagated set is incomplete. Raised by the paired policy only.
    AmbiguousIdentity { observed: Vec<String> },
}

impl GateError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        GateError::Configuration { message: message.into() }
    }

    pub fn identity_missing(observed: Vec<String>) -> Self {
        GateError::IdentityMissing { observed }
    }

    pub fn ambiguous_identity(observed: Vec<String>) -> Self {
        GateError::AmbiguousIdentity { observed }
    }

    /// HTTP status a request rejected with this error receives. Absence of
    /// the subject is the server's own fault; everything else is the
    /// caller's authentication problem.
    pub fn http_status(&self) -> u16 {
        match self {
            GateError::Configuration { .. } => 500,
            GateError::IdentityMissing { .. } => 401,
            GateError::AmbiguousIdentity { .. } => 401,
        }
    }
}

impl Display for GateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GateError::Configuration { message } => write!(f, "configuration: {}", message),
            GateError::IdentityMissing { observed } => write!(
                f,
                "identity_missing: no application identity among [{}]",
                observed.join(", ")
            ),
            GateError::AmbiguousIdentity { observed } => write!(
                f,
                "ambiguous_identity: application identity unaccompanied in [{}]",
                observed.join(", ")
            ),
        }
    }
}

impl std::error::Error for GateError {}

pub type GateResult<T> = Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(GateError::configuration("x").http_status(), 500);
        assert_eq!(GateError::identity_missing(vec![]).http_status(), 401);
        assert_eq!(GateError::ambiguous_identity(vec![]).http_status(), 401);
    }

    #[test]
    fn display_mentions_observed_entries() {
        let err = GateError::identity_missing(vec![
            "container(user123)".to_string(),
            "foreign(saml:cn=box)".to_string(),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("container(user123)"), "got: {}", rendered);
        assert!(rendered.contains("foreign(saml:cn=box)"), "got: {}", rendered);
    }

    #[test]
    fn serialized_form_is_tagged() {
        let err = GateError::identity_missing(vec!["container(user123)".to_string()]);
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["type"], "identity_missing");
        assert_eq!(v["observed"][0], "container(user123)");

        let back: GateError = serde_json::from_value(v).unwrap();
        assert_eq!(back, err);
    }
}
