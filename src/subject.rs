//! Identity records and the per-request security subject.
//! The subject is what the container authentication layer propagates into
//! application code; the verification gate only ever reads it.

use serde::{Deserialize, Serialize};

/// One authenticated identity as established at login time. Immutable once
/// constructed; discarded together with the subject that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    name: String,
}

impl IdentityRecord {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into() } }

    pub fn name(&self) -> &str { &self.name }
}

/// A single identity assertion inside a [`Subject`].
///
/// The container propagates a heterogeneous set: the application's own
/// record, the container realm's native record, records from other
/// authentication products, and any of those re-normalized through the
/// container's canonical adapter (`Wrapped`). The adapter wraps at most one
/// level by contract; deeper nesting stays representable so violations of
/// that contract remain observable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectEntry {
    /// The application's own identity record.
    Application(IdentityRecord),
    /// The container realm's native record.
    Container(IdentityRecord),
    /// Some other authentication product's record.
    Foreign { scheme: String, name: String },
    /// One level of container adapter wrapping around another entry.
    Wrapped(Box<SubjectEntry>),
}

impl SubjectEntry {
    /// Convenience constructor for the adapter-wrapped form.
    pub fn wrapped(inner: SubjectEntry) -> Self { SubjectEntry::Wrapped(Box::new(inner)) }

    /// Render the entry for failure details, e.g. `wrapped(application(user123))`.
    pub fn describe(&self) -> String {
        match self {
            SubjectEntry::Application(rec) => format!("application({})", rec.name()),
            SubjectEntry::Container(rec) => format!("container({})", rec.name()),
            SubjectEntry::Foreign { scheme, name } => format!("foreign({}:{})", scheme, name),
            SubjectEntry::Wrapped(inner) => format!("wrapped({})", inner.describe()),
        }
    }
}

/// The per-request security context established by the container
/// authentication layer before the gate runs. Entries are unordered and
/// duplicate semantic identities are representable; the gate and downstream
/// handlers treat the whole thing as read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    entries: Vec<SubjectEntry>,
}

impl Subject {
    pub fn new(entries: Vec<SubjectEntry>) -> Self { Self { entries } }

    /// The shape the demo container layer establishes for an authenticated
    /// user: the realm's native record plus the application record behind
    /// the container adapter.
    pub fn for_authenticated_user(name: &str) -> Self {
        Self::new(vec![
            SubjectEntry::Container(IdentityRecord::new(name)),
            SubjectEntry::wrapped(SubjectEntry::Application(IdentityRecord::new(name))),
        ])
    }

    pub fn entries(&self) -> &[SubjectEntry] { &self.entries }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Every entry rendered for diagnostics, in observed order.
    pub fn observed(&self) -> Vec<String> {
        self.entries.iter().map(SubjectEntry::describe).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_renders_each_shape() {
        assert_eq!(
            SubjectEntry::Application(IdentityRecord::new("user123")).describe(),
            "application(user123)"
        );
        assert_eq!(
            SubjectEntry::Container(IdentityRecord::new("user123")).describe(),
            "container(user123)"
        );
        assert_eq!(
            SubjectEntry::Foreign { scheme: "x509".into(), name: "cn=box".into() }.describe(),
            "foreign(x509:cn=box)"
        );
        assert_eq!(
            SubjectEntry::wrapped(SubjectEntry::Application(IdentityRecord::new("user123")))
                .describe(),
            "wrapped(application(user123))"
        );
    }

    #[test]
    fn describe_renders_nested_wrapping() {
        let double = SubjectEntry::wrapped(SubjectEntry::wrapped(SubjectEntry::Application(
            IdentityRecord::new("user123"),
        )));
        assert_eq!(double.describe(), "wrapped(wrapped(application(user123)))");
    }

    #[test]
    fn authenticated_shape_pairs_container_and_wrapped_application() {
        let subject = Subject::for_authenticated_user("user123");
        assert_eq!(subject.len(), 2);
        assert_eq!(
            subject.observed(),
            vec!["container(user123)".to_string(), "wrapped(application(user123))".to_string()]
        );
    }
}
