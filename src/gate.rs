//! Principal classification and the request verification gate.
//!
//! The gate runs once per request before any handler: it reads the
//! container-established [`Subject`] and confirms the application's own
//! identity record actually survived propagation. Decisions are pure
//! functions over the subject so they stay testable without a server.

use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult};
use crate::subject::{IdentityRecord, Subject, SubjectEntry};

/// Return the application identity record carried by `entry`, unwrapping at
/// most one adapter layer.
///
/// The container adapter wraps principals exactly once; a doubly wrapped
/// record is deliberately not recognized rather than recursed into.
pub fn application_record(entry: &SubjectEntry) -> Option<&IdentityRecord> {
    match entry {
        SubjectEntry::Application(rec) => Some(rec),
        SubjectEntry::Wrapped(inner) => match inner.as_ref() {
            SubjectEntry::Application(rec) => Some(rec),
            _ => None,
        },
        _ => None,
    }
}

/// True iff `entry` carries the application identity, directly or behind one
/// adapter layer. Read-only; never panics.
pub fn is_application_identity(entry: &SubjectEntry) -> bool {
    application_record(entry).is_some()
}

/// Resolve the authenticated application name from a subject. Downstream
/// handlers read the current identity through this, the same classification
/// the gate used, never a second mechanism.
pub fn application_name(subject: &Subject) -> Option<&str> {
    subject
        .entries()
        .iter()
        .find_map(application_record)
        .map(IdentityRecord::name)
}

/// Which propagation contract the gate enforces. The two policies come from
/// different iterations of the upstream integration and are mutually
/// exclusive; a deployment selects exactly one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GatePolicy {
    /// Reject iff no entry classifies as the application identity. The
    /// empty subject is covered: zero entries means zero application
    /// records.
    #[default]
    RequireApplication,
    /// As `RequireApplication`, and additionally reject a subject whose
    /// only entry is the application identity: the container realm record
    /// that must accompany it is missing, so the propagated set is
    /// incomplete.
    RequirePaired,
}

impl GatePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "require-application" | "application" => Some(GatePolicy::RequireApplication),
            "require-paired" | "paired" | "strict" => Some(GatePolicy::RequirePaired),
            _ => None,
        }
    }
}

/// Verify the ambient subject for one request.
///
/// `None` means the upstream authentication stage never ran for this
/// request. That is a wiring defect of the deployment, reported as
/// [`GateError::Configuration`], distinct from any per-request
/// authentication failure.
pub fn verify(policy: GatePolicy, subject: Option<&Subject>) -> GateResult<()> {
    let Some(subject) = subject else {
        return Err(GateError::configuration(
            "no subject in request context - upstream authentication did not run",
        ));
    };

    let found = subject
        .entries()
        .iter()
        .filter(|entry| is_application_identity(entry))
        .count();
    if found == 0 {
        return Err(GateError::identity_missing(subject.observed()));
    }
    if policy == GatePolicy::RequirePaired && subject.len() == 1 {
        // Application identity present but unaccompanied: the realm record
        // that should travel with it is gone.
        return Err(GateError::ambiguous_identity(subject.observed()));
    }
    Ok(())
}
